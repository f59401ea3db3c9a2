// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Create .deb package files. */

use {
    crate::{control::ControlParagraph, deb::DebCompression, error::Result},
    digest::Digest,
    std::{
        collections::{BTreeMap, BTreeSet},
        io::Write,
    },
};

/// Modification time (seconds since UNIX epoch) of every archive member.
const MEMBER_MTIME: u64 = 0;

/// A builder for a `.deb` package file.
///
/// Archive members carry a fixed modification time, so building the same
/// control paragraph and files twice produces identical bytes.
pub struct DebBuilder {
    control: ControlParagraph,
    compression: DebCompression,
    /// Files to install, keyed by path relative to the filesystem root.
    install_files: BTreeMap<String, (Vec<u8>, bool)>,
}

impl DebBuilder {
    pub fn new(control: ControlParagraph) -> Self {
        Self {
            control,
            compression: DebCompression::Gzip,
            install_files: BTreeMap::new(),
        }
    }

    /// Set the compression format of the tar members.
    #[must_use]
    pub fn set_compression(mut self, compression: DebCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Register a file to be installed by this package, e.g. `usr/bin/myapp`.
    #[must_use]
    pub fn install_file(mut self, path: impl ToString, data: Vec<u8>, executable: bool) -> Self {
        self.install_files.insert(
            path.to_string().trim_start_matches('/').to_string(),
            (data, executable),
        );
        self
    }

    /// Write `.deb` file content to a writer.
    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        let mut ar_builder = ar::Builder::new(writer);

        self.append_ar_member(&mut ar_builder, "debian-binary", b"2.0\n")?;

        let control_tar = self.compression.compress(&self.control_tar()?)?;
        self.append_ar_member(
            &mut ar_builder,
            &format!("control.tar{}", self.compression.extension()),
            &control_tar,
        )?;

        let data_tar = self.compression.compress(&self.data_tar()?)?;
        self.append_ar_member(
            &mut ar_builder,
            &format!("data.tar{}", self.compression.extension()),
            &data_tar,
        )?;

        Ok(())
    }

    /// Build the archive in memory.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![];
        self.write(&mut buffer)?;
        Ok(buffer)
    }

    fn append_ar_member<W: Write>(
        &self,
        builder: &mut ar::Builder<W>,
        name: &str,
        data: &[u8],
    ) -> Result<()> {
        let mut header = ar::Header::new(name.as_bytes().to_vec(), data.len() as _);
        header.set_mode(0o644);
        header.set_mtime(MEMBER_MTIME);
        header.set_uid(0);
        header.set_gid(0);
        builder.append(&header, data)?;

        Ok(())
    }

    fn control_tar(&self) -> Result<Vec<u8>> {
        let mut control = vec![];
        self.control.write(&mut control)?;

        let md5sums = self
            .install_files
            .iter()
            .map(|(path, (data, _))| format!("{:x}  {}\n", md5::Md5::digest(data), path))
            .collect::<String>();

        let mut files = BTreeMap::new();
        files.insert("control".to_string(), (control, false));
        if !md5sums.is_empty() {
            files.insert("md5sums".to_string(), (md5sums.into_bytes(), false));
        }

        write_deb_tar(&files, MEMBER_MTIME)
    }

    fn data_tar(&self) -> Result<Vec<u8>> {
        write_deb_tar(&self.install_files, MEMBER_MTIME)
    }
}

fn new_tar_header(mtime: u64) -> Result<tar::Header> {
    let mut header = tar::Header::new_gnu();
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    header.set_mtime(mtime);

    Ok(header)
}

/// Set a `./`-prefixed name directly in the header.
///
/// `Header::set_path()` normalizes away the leading `./` that Debian archives
/// carry. Names here are short, generated paths that fit the GNU name field.
fn set_header_name(header: &mut tar::Header, name: &str) -> Result<()> {
    let name_buffer = &mut header.as_old_mut().name;

    if name.len() > name_buffer.len() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("tar member name too long: {}", name),
        )
        .into());
    }

    name_buffer[0..name.len()].copy_from_slice(name.as_bytes());

    Ok(())
}

/// Write a tar archive suitable for inclusion in a `.deb` archive.
fn write_deb_tar(files: &BTreeMap<String, (Vec<u8>, bool)>, mtime: u64) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut directories = BTreeSet::new();
    for path in files.keys() {
        let mut parent = std::path::Path::new(path).parent();
        while let Some(dir) = parent {
            if !dir.as_os_str().is_empty() {
                directories.insert(format!("{}", dir.display()));
            }
            parent = dir.parent();
        }
    }

    let mut header = new_tar_header(mtime)?;
    header.set_path("./")?;
    header.set_mode(0o755);
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_cksum();
    builder.append(&header, std::io::empty())?;

    for directory in directories {
        let mut header = new_tar_header(mtime)?;
        set_header_name(&mut header, &format!("./{}/", directory))?;
        header.set_mode(0o755);
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_cksum();
        builder.append(&header, std::io::empty())?;
    }

    for (path, (data, executable)) in files {
        let mut header = new_tar_header(mtime)?;
        set_header_name(&mut header, &format!("./{}", path))?;
        header.set_mode(if *executable { 0o755 } else { 0o644 });
        header.set_size(data.len() as _);
        header.set_cksum();
        builder.append(&header, data.as_slice())?;
    }

    Ok(builder.into_inner()?)
}
