// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Read metadata from .deb package files. */

use {
    crate::{
        control::{parse_single_paragraph, ControlParagraph},
        deb::DebCompression,
        error::{MirrorError, Result},
    },
    std::{
        io::{BufReader, Read},
        path::Path,
    },
};

/// Extract the `control` paragraph from `.deb` content.
///
/// `label` names the archive in error messages.
pub fn read_control_paragraph<R: Read>(reader: R, label: &str) -> Result<ControlParagraph> {
    let mut archive = ar::Archive::new(reader);

    while let Some(entry) = archive.next_entry() {
        let entry = entry?;
        let name = String::from_utf8_lossy(entry.header().identifier()).to_string();

        if !name.starts_with("control.tar") {
            continue;
        }

        let compression = DebCompression::from_member_name(&name, "control.tar")?;
        let mut tar = tar::Archive::new(compression.decompress_reader(entry)?);

        for tar_entry in tar.entries()? {
            let tar_entry = tar_entry?;
            let path = tar_entry.path()?;
            if path.as_ref() == Path::new("./control") || path.as_ref() == Path::new("control") {
                return parse_single_paragraph(BufReader::new(tar_entry));
            }
        }

        return Err(MirrorError::DebNoControl(label.to_string()));
    }

    Err(MirrorError::DebNoControl(label.to_string()))
}

/// Extract the `control` paragraph from a `.deb` on disk.
pub fn read_control_paragraph_from_path(path: &Path) -> Result<ControlParagraph> {
    let fh = std::fs::File::open(path).map_err(|e| MirrorError::io_path(path, e))?;

    read_control_paragraph(BufReader::new(fh), &format!("{}", path.display()))
}

#[cfg(test)]
mod test {
    use {super::*, crate::deb::builder::DebBuilder};

    fn control(name: &str) -> ControlParagraph {
        let mut para = ControlParagraph::default();
        para.set_field_from_string("Package", name);
        para.set_field_from_string("Version", "2.0.0");
        para.set_field_from_string("Architecture", "amd64");
        para.set_field_from_string("Description", "test\n second line");
        para
    }

    #[test]
    fn reads_every_compression() -> Result<()> {
        for compression in [
            DebCompression::Uncompressed,
            DebCompression::Gzip,
            DebCompression::Xz,
            DebCompression::Zstandard(3),
        ] {
            let deb = DebBuilder::new(control("app"))
                .set_compression(compression)
                .install_file("usr/bin/app", b"#!/bin/sh\n".to_vec(), true)
                .to_vec()?;

            let para = read_control_paragraph(std::io::Cursor::new(deb), "app.deb")?;
            assert_eq!(para, control("app"), "{:?}", compression);
        }

        Ok(())
    }

    #[test]
    fn rejects_non_deb() {
        let res = read_control_paragraph(std::io::Cursor::new(b"!<arch>\n".to_vec()), "x.deb");
        assert!(matches!(res, Err(MirrorError::DebNoControl(_))));

        assert!(read_control_paragraph(std::io::Cursor::new(b"garbage".to_vec()), "y.deb").is_err());
    }
}
