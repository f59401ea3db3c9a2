// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Packages` index generation.

The primary architecture's index lists every `.deb` under the pool: the
package's own `control` paragraph followed by `Filename`, `Size` and content
digests. Every other configured architecture gets an empty index so clients
configured for it do not fail. Output is a pure function of pool contents.
*/

use {
    crate::{
        config::MirrorConfig,
        control::{ControlField, ControlParagraph},
        deb::reader::read_control_paragraph,
        error::{MirrorError, Result},
        io::{gzip, is_staging_name, MultiDigester},
        package_version::compare_versions,
        repository::layout::RepositoryLayout,
    },
    log::{info, warn},
    std::{
        io::Cursor,
        path::{Path, PathBuf},
    },
};

/// Fields appended to each control paragraph, replacing any the package carries.
const POOL_FIELDS: &[&str] = &["Filename", "Size", "MD5sum", "SHA1", "SHA256"];

/// One stanza of a `Packages` file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    pub package: String,
    pub version: String,
    /// Path relative to the repository root.
    pub filename: String,
    pub paragraph: ControlParagraph,
}

/// Outcome of publishing indices.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexSummary {
    /// Stanzas in the primary architecture's index.
    pub entries: usize,
    /// Every index file published.
    pub files: Vec<PathBuf>,
}

/// A rendered index file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexFile {
    pub path: PathBuf,
    /// Path relative to `dists/<distribution>`, as listed in `Release`.
    pub relative: String,
    pub content: Vec<u8>,
}

/// Every index file of the distribution, rendered in memory.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexSet {
    /// Stanzas in the primary architecture's index.
    pub entries: usize,
    pub files: Vec<IndexFile>,
}

impl IndexSet {
    pub fn summary(&self) -> IndexSummary {
        IndexSummary {
            entries: self.entries,
            files: self.files.iter().map(|f| f.path.clone()).collect(),
        }
    }
}

/// Renders `Packages` and `Packages.gz` for every configured architecture.
pub struct IndexBuilder {
    layout: RepositoryLayout,
    component: String,
    primary_architecture: String,
    architectures: Vec<String>,
}

impl IndexBuilder {
    pub fn new(config: &MirrorConfig) -> Self {
        Self {
            layout: RepositoryLayout::new(config),
            component: config.component.clone(),
            primary_architecture: config.primary_architecture.clone(),
            architectures: config.architectures.clone(),
        }
    }

    /// Collect index entries for every installable artifact in the pool.
    ///
    /// Staging files are never indexed. Archives that cannot be read are
    /// skipped with a warning; an unreadable pool directory is an error.
    pub fn scan(&self) -> Result<Vec<IndexEntry>> {
        let mut entries = vec![];
        for path in collect_debs(&self.layout.pool_dir())? {
            match self.entry_for_path(&path) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!("not indexing {}: {}", path.display(), e),
            }
        }

        entries.sort_by(|a, b| {
            a.package
                .cmp(&b.package)
                .then_with(|| compare_versions(&a.version, &b.version))
                .then_with(|| a.filename.cmp(&b.filename))
        });

        Ok(entries)
    }

    fn entry_for_path(&self, path: &Path) -> Result<Option<IndexEntry>> {
        let data = std::fs::read(path).map_err(|e| MirrorError::io_path(path, e))?;
        let filename = self.layout.relative_to_root(path)?;
        let mut paragraph = read_control_paragraph(Cursor::new(&data), &filename)?;

        let package = paragraph.required_field_str("Package")?.to_string();
        let version = paragraph.required_field_str("Version")?.to_string();
        let architecture = paragraph.required_field_str("Architecture")?;

        if architecture != self.primary_architecture && architecture != "all" {
            warn!(
                "{} is built for {}; leaving it out of the {} index",
                filename, architecture, self.primary_architecture
            );
            return Ok(None);
        }

        for field in POOL_FIELDS {
            paragraph.remove_field(field);
        }

        let (size, digests) = MultiDigester::digest_bytes(&data);
        paragraph.set_field(ControlField::new("Filename", &filename));
        paragraph.set_field(ControlField::new("Size", size));
        paragraph.set_field(ControlField::new("MD5sum", digests.md5_hex()));
        paragraph.set_field(ControlField::new("SHA1", digests.sha1_hex()));
        paragraph.set_field(ControlField::new("SHA256", digests.sha256_hex()));

        Ok(Some(IndexEntry {
            package,
            version,
            filename,
            paragraph,
        }))
    }

    /// Render the indices of every architecture without writing them.
    pub fn render(&self) -> Result<IndexSet> {
        let entries = self.scan().map_err(|e| match e {
            e @ MirrorError::IndexBuild(_) => e,
            e => MirrorError::IndexBuild(format!("scanning pool: {}", e)),
        })?;

        let mut files = vec![];
        for arch in &self.architectures {
            let content = if *arch == self.primary_architecture {
                render_packages(&entries)
            } else {
                vec![]
            };
            let compressed = gzip(&content).map_err(index_error)?;

            let dir = self.layout.binary_dir(arch);
            let relative = format!("{}/binary-{}", self.component, arch);

            files.push(IndexFile {
                path: dir.join("Packages"),
                relative: format!("{}/Packages", relative),
                content,
            });
            files.push(IndexFile {
                path: dir.join("Packages.gz"),
                relative: format!("{}/Packages.gz", relative),
                content: compressed,
            });
        }

        info!(
            "{} entries in {} Packages; {} empty architecture index(es)",
            entries.len(),
            self.primary_architecture,
            self.architectures.len().saturating_sub(1)
        );

        Ok(IndexSet {
            entries: entries.len(),
            files,
        })
    }
}

fn index_error(e: MirrorError) -> MirrorError {
    MirrorError::IndexBuild(format!("{}", e))
}

/// Render stanzas in `Packages` format: each paragraph followed by a blank line.
pub fn render_packages(entries: &[IndexEntry]) -> Vec<u8> {
    entries
        .iter()
        .map(|entry| format!("{}\n", entry.paragraph))
        .collect::<String>()
        .into_bytes()
}

/// `.deb` paths under `dir`, in sorted order.
///
/// Staging files and directories are not descended into.
fn collect_debs(dir: &Path) -> Result<Vec<PathBuf>> {
    let walk = walkdir::WalkDir::new(dir)
        .follow_links(true)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !is_staging_name(&entry.file_name().to_string_lossy())
        });

    let mut paths = vec![];
    for entry in walk {
        let entry = entry.map_err(|e| MirrorError::io_path(dir, e.into()))?;

        if entry.file_type().is_file() && entry.file_name().to_string_lossy().ends_with(".deb") {
            paths.push(entry.into_path());
        }
    }

    Ok(paths)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{control::parse_paragraphs, io::sha256_file, testutil::tiny_deb},
        std::io::Read,
    };

    fn setup() -> Result<(tempfile::TempDir, MirrorConfig)> {
        let td = tempfile::tempdir()?;
        let config = MirrorConfig {
            root: td.path().to_path_buf(),
            ..Default::default()
        };
        RepositoryLayout::new(&config).ensure()?;

        Ok((td, config))
    }

    fn content<'a>(set: &'a IndexSet, relative: &str) -> &'a [u8] {
        set.files
            .iter()
            .find(|f| f.relative == relative)
            .map(|f| f.content.as_slice())
            .unwrap_or_else(|| panic!("no index file {}", relative))
    }

    #[test]
    fn indexes_pool() -> Result<()> {
        let (td, config) = setup()?;
        let pool = td.path().join("pool/main");

        std::fs::write(pool.join("discord/discord_0.0.76_amd64.deb"), tiny_deb("discord", "0.0.76", "amd64")?)?;
        std::fs::write(pool.join("freetube/freetube_0.23.5_amd64.deb"), tiny_deb("freetube", "0.23.5", "amd64")?)?;
        std::fs::write(pool.join("freetube/freetube_0.23.5_arm64.deb"), tiny_deb("freetube", "0.23.5", "arm64")?)?;
        std::fs::write(pool.join("freetube/.freetube_0.24.0_amd64.deb.x1.part"), b"partial")?;
        std::fs::write(pool.join("freetube/freetube_0.23.5_amd64.deb.sha256"), b"ignored")?;
        std::fs::write(pool.join("discord/broken.deb"), b"not an archive")?;
        std::fs::create_dir_all(pool.join("discord/.staging"))?;
        std::fs::write(
            pool.join("discord/.staging/discord_0.0.77_amd64.deb"),
            tiny_deb("discord", "0.0.77", "amd64")?,
        )?;

        let set = IndexBuilder::new(&config).render()?;
        assert_eq!(set.entries, 2);
        assert_eq!(set.files.len(), 8);

        let packages = content(&set, "main/binary-amd64/Packages");
        let paragraphs = parse_paragraphs(Cursor::new(packages))?;
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].field_str("Package"), Some("discord"));
        assert_eq!(paragraphs[0].field_str("Version"), Some("0.0.76"));
        assert_eq!(
            paragraphs[0].field_str("Filename"),
            Some("pool/main/discord/discord_0.0.76_amd64.deb")
        );
        let (sha256, size) = sha256_file(&pool.join("discord/discord_0.0.76_amd64.deb"))?;
        assert_eq!(paragraphs[0].field_str("SHA256"), Some(sha256.as_str()));
        assert_eq!(paragraphs[0].field_str("Size"), Some(size.to_string().as_str()));

        let mut decoded = vec![];
        flate2::read::GzDecoder::new(Cursor::new(content(&set, "main/binary-amd64/Packages.gz")))
            .read_to_end(&mut decoded)?;
        assert_eq!(decoded, packages);

        for arch in ["i386", "arm64", "armhf"] {
            assert!(content(&set, &format!("main/binary-{}/Packages", arch)).is_empty());
            assert!(!content(&set, &format!("main/binary-{}/Packages.gz", arch)).is_empty());
        }

        Ok(())
    }

    #[test]
    fn deterministic_order() -> Result<()> {
        let (td, config) = setup()?;
        let dir = td.path().join("pool/main/redroot-kernels");

        for version in ["6.9.0", "6.10.1", "6.10.0"] {
            std::fs::write(
                dir.join(format!("linux-image-{}_amd64.deb", version)),
                tiny_deb("linux-image", version, "amd64")?,
            )?;
        }

        let builder = IndexBuilder::new(&config);
        let versions = builder
            .scan()?
            .into_iter()
            .map(|e| e.version)
            .collect::<Vec<_>>();
        assert_eq!(versions, vec!["6.9.0", "6.10.0", "6.10.1"]);

        assert_eq!(builder.render()?, builder.render()?);

        Ok(())
    }

    #[test]
    fn render_writes_nothing() -> Result<()> {
        let (td, config) = setup()?;
        let set = IndexBuilder::new(&config).render()?;

        assert_eq!(set.entries, 0);
        assert_eq!(
            set.files.iter().map(|f| f.relative.as_str()).take(2).collect::<Vec<_>>(),
            vec!["main/binary-amd64/Packages", "main/binary-amd64/Packages.gz"]
        );
        assert!(set.files.iter().all(|f| !f.path.exists()));
        assert_eq!(set.summary().files.len(), 8);
        assert!(!td.path().join("dists/stable/main/binary-amd64/Packages").exists());

        Ok(())
    }

    #[test]
    fn missing_pool_is_index_error() -> Result<()> {
        let td = tempfile::tempdir()?;
        let config = MirrorConfig {
            root: td.path().to_path_buf(),
            ..Default::default()
        };

        assert!(matches!(
            IndexBuilder::new(&config).render(),
            Err(MirrorError::IndexBuild(_))
        ));

        Ok(())
    }
}
