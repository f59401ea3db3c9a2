// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers.

Everything a concurrent reader of the repository may look at is published by
writing a temporary file in the destination directory and renaming it over
the final name. [write_atomic()] and [StagedFile] implement that discipline.
Temporary names start with a `.` so directory scans can skip them.
*/

use {
    crate::error::{MirrorError, Result},
    digest::Digest,
    flate2::{write::GzEncoder, Compression, GzBuilder},
    std::{
        fmt::Formatter,
        io::{Read, Write},
        path::{Path, PathBuf},
    },
    tempfile::NamedTempFile,
};

/// Suffix of the checksum sibling written next to every pool artifact.
pub const CHECKSUM_SUFFIX: &str = ".sha256";

/// Mode of every published file. The file server runs as another user.
#[cfg(unix)]
pub const PUBLISHED_MODE: u32 = 0o644;

/// Digests of a piece of content in every flavor a `Release` file lists.
#[derive(Clone, Eq, PartialEq)]
pub struct MultiDigest {
    pub md5: Vec<u8>,
    pub sha1: Vec<u8>,
    pub sha256: Vec<u8>,
}

impl std::fmt::Debug for MultiDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiDigest")
            .field("md5", &hex::encode(&self.md5))
            .field("sha1", &hex::encode(&self.sha1))
            .field("sha256", &hex::encode(&self.sha256))
            .finish()
    }
}

impl MultiDigest {
    pub fn md5_hex(&self) -> String {
        hex::encode(&self.md5)
    }

    pub fn sha1_hex(&self) -> String {
        hex::encode(&self.sha1)
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(&self.sha256)
    }
}

/// Computes MD5, SHA-1 and SHA-256 digests of written content in one pass.
#[derive(Clone, Default)]
pub struct MultiDigester {
    md5: md5::Md5,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
    size: u64,
}

impl MultiDigester {
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.size += data.len() as u64;
    }

    /// Finish hashing, returning the content size and its digests.
    pub fn finish(self) -> (u64, MultiDigest) {
        (
            self.size,
            MultiDigest {
                md5: self.md5.finalize().to_vec(),
                sha1: self.sha1.finalize().to_vec(),
                sha256: self.sha256.finalize().to_vec(),
            },
        )
    }

    pub fn digest_bytes(data: &[u8]) -> (u64, MultiDigest) {
        let mut h = Self::default();
        h.update(data);
        h.finish()
    }

    pub fn digest_reader(reader: &mut impl Read) -> std::io::Result<(u64, MultiDigest)> {
        let mut h = Self::default();
        let mut buf = vec![0u8; 1 << 16];

        loop {
            let count = reader.read(&mut buf)?;
            if count == 0 {
                break;
            }
            h.update(&buf[0..count]);
        }

        Ok(h.finish())
    }
}

impl Write for MultiDigester {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Compute the hex SHA-256 and size of a file.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let mut fh = std::fs::File::open(path).map_err(|e| MirrorError::io_path(path, e))?;
    let mut h = sha2::Sha256::new();
    let size = std::io::copy(&mut fh, &mut h).map_err(|e| MirrorError::io_path(path, e))?;

    Ok((hex::encode(h.finalize()), size))
}

/// Render the content of a checksum sibling: `<hex-digest>  <filename>\n`.
pub fn checksum_line(sha256_hex: &str, filename: &str) -> String {
    format!("{}  {}\n", sha256_hex, filename)
}

/// Parse a checksum sibling, returning the digest if it describes `filename`.
pub fn parse_checksum_line(content: &str, filename: &str) -> Option<String> {
    let line = content.lines().next()?;
    let (digest, name) = line.split_once("  ")?;

    if name == filename && digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(digest.to_ascii_lowercase())
    } else {
        None
    }
}

/// Path of the checksum sibling for an artifact.
pub fn checksum_path(artifact: &Path) -> PathBuf {
    let mut s = artifact.as_os_str().to_owned();
    s.push(CHECKSUM_SUFFIX);
    PathBuf::from(s)
}

/// Whether a directory entry is a staging file that must never be indexed.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with('.') || name.ends_with(".part")
}

/// Gzip data with maximum compression and a zeroed header timestamp.
///
/// Identical input always yields identical output.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder: GzEncoder<Vec<u8>> =
        GzBuilder::new().mtime(0).write(Vec::new(), Compression::best());
    encoder.write_all(data)?;

    Ok(encoder.finish()?)
}

/// A file being written under a temporary name in its destination directory.
///
/// Dropping an uncommitted instance removes the temporary file.
pub struct StagedFile {
    temp: NamedTempFile,
    dest: PathBuf,
}

impl StagedFile {
    /// Create a staging file next to `dest`.
    pub fn new(dest: impl AsRef<Path>) -> Result<Self> {
        let dest = dest.as_ref().to_path_buf();
        let parent = dest
            .parent()
            .ok_or_else(|| MirrorError::io_path(&dest, std::io::ErrorKind::NotFound.into()))?;

        let file_name = dest
            .file_name()
            .map(|x| x.to_string_lossy().to_string())
            .unwrap_or_default();

        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(|e| MirrorError::io_path(parent, e))?;

        Ok(Self { temp, dest })
    }

    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> Result<u64> {
        Ok(self
            .temp
            .as_file()
            .metadata()
            .map_err(|e| MirrorError::io_path(self.temp.path(), e))?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush to disk and rename over the destination.
    ///
    /// The destination is left world-readable; staging files are created
    /// owner-only.
    pub fn commit(mut self) -> Result<PathBuf> {
        self.temp
            .flush()
            .map_err(|e| MirrorError::io_path(self.temp.path(), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            self.temp
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(PUBLISHED_MODE))
                .map_err(|e| MirrorError::io_path(self.temp.path(), e))?;
        }
        self.temp
            .as_file()
            .sync_all()
            .map_err(|e| MirrorError::io_path(self.temp.path(), e))?;

        let dest = self.dest;
        self.temp
            .persist(&dest)
            .map_err(|e| MirrorError::io_path(&dest, e.error))?;

        Ok(dest)
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.temp.flush()
    }
}

/// Write `data` to `dest` through a temporary file and an atomic rename.
pub fn write_atomic(dest: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let mut staged = StagedFile::new(dest.as_ref())?;
    staged
        .write_all(data)
        .map_err(|e| MirrorError::io_path(staged.temp_path(), e))?;
    staged.commit()?;

    Ok(())
}
