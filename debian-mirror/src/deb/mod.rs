// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reading and writing `.deb` archives.

A `.deb` is an `ar` archive holding `debian-binary`, a `control.tar[.ext]`
and a `data.tar[.ext]`. [builder::DebBuilder] writes them (used for
meta-packages) and [reader::read_control_paragraph()] extracts the `control`
paragraph (used when indexing the pool).
*/

pub mod builder;
pub mod reader;

use {
    crate::error::{MirrorError, Result},
    std::io::{Read, Write},
};

/// Compression format of a `.deb` tar member.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DebCompression {
    Uncompressed,
    Gzip,
    Xz,
    Zstandard(i32),
}

impl DebCompression {
    /// File extension appended to `control.tar`/`data.tar`.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Uncompressed => "",
            Self::Gzip => ".gz",
            Self::Xz => ".xz",
            Self::Zstandard(_) => ".zst",
        }
    }

    /// Resolve the compression from an archive member name like `control.tar.xz`.
    pub fn from_member_name(name: &str, stem: &str) -> Result<Self> {
        match name.strip_prefix(stem) {
            Some("") => Ok(Self::Uncompressed),
            Some(".gz") => Ok(Self::Gzip),
            Some(".xz") => Ok(Self::Xz),
            Some(".zst") => Ok(Self::Zstandard(0)),
            _ => Err(MirrorError::DebUnknownCompression(name.to_string())),
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(match self {
            Self::Uncompressed => data.to_vec(),
            Self::Gzip => crate::io::gzip(data)?,
            Self::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
                encoder.write_all(data)?;
                encoder.finish()?
            }
            Self::Zstandard(level) => zstd::stream::encode_all(data, *level)?,
        })
    }

    /// Wrap a reader so it yields decompressed content.
    pub fn decompress_reader<'a>(&self, reader: impl Read + 'a) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Self::Uncompressed => Box::new(reader),
            Self::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Self::Zstandard(_) => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }
}
