// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` manifest generation and signing. */

use {
    crate::{
        config::MirrorConfig,
        control::{ControlField, ControlParagraph},
        error::{MirrorError, Result},
        io::{write_atomic, MultiDigester, StagedFile},
        repository::{
            index::{IndexFile, IndexSet},
            layout::RepositoryLayout,
        },
        signing::ReleaseSigner,
    },
    chrono::{DateTime, Utc},
    log::{error, info},
    std::{collections::BTreeMap, io::Write},
};

/// Format of the `Date` field.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Digest sections of a `Release` file, in emission order.
const CHECKSUM_FIELDS: &[&str] = &["MD5Sum", "SHA1", "SHA256"];

/// Builds, signs and publishes `Release`, `InRelease`, `Release.gpg` and `KEY.asc`.
pub struct ReleaseBuilder<'a> {
    config: &'a MirrorConfig,
    layout: RepositoryLayout,
    signer: &'a dyn ReleaseSigner,
}

impl<'a> ReleaseBuilder<'a> {
    pub fn new(config: &'a MirrorConfig, signer: &'a dyn ReleaseSigner) -> Self {
        Self {
            config,
            layout: RepositoryLayout::new(config),
            signer,
        }
    }

    fn static_release_fields(&self, date: DateTime<Utc>) -> impl Iterator<Item = ControlField> {
        let mut fields = BTreeMap::new();

        fields.insert("Architectures", self.config.architectures.join(" "));
        fields.insert("Codename", self.config.distribution.clone());
        fields.insert("Components", self.config.component.clone());
        fields.insert("Date", format!("{}", date.format(DATE_FORMAT)));
        fields.insert("Suite", self.config.distribution.clone());

        for (name, value) in [
            ("Description", &self.config.description),
            ("Label", &self.config.label),
            ("Origin", &self.config.origin),
        ] {
            if let Some(value) = value {
                fields.insert(name, value.clone());
            }
        }

        fields
            .into_iter()
            .map(|(name, value)| ControlField::new(name, value))
    }

    /// Derive the `Release` paragraph describing rendered indices.
    pub fn create_release_paragraph(
        &self,
        date: DateTime<Utc>,
        indices: &IndexSet,
    ) -> Result<ControlParagraph> {
        if indices.files.is_empty() {
            return Err(MirrorError::IndexBuild(
                "no index files to describe in Release".into(),
            ));
        }

        let digests = indices
            .files
            .iter()
            .map(|f| (f.relative.as_str(), MultiDigester::digest_bytes(&f.content)))
            .collect::<BTreeMap<_, _>>();

        let mut para = ControlParagraph::default();
        for field in self.static_release_fields(date) {
            para.set_field(field);
        }

        let longest_path = digests.keys().map(|x| x.len()).max().unwrap_or_default();
        let longest_size = digests
            .values()
            .map(|(size, _)| format!("{}", size).len())
            .max()
            .unwrap_or_default();

        for field_name in CHECKSUM_FIELDS {
            para.set_field(ControlField::multiline_from_lines(
                field_name,
                digests.iter().map(|(path, (size, digests))| {
                    let digest = match *field_name {
                        "MD5Sum" => digests.md5_hex(),
                        "SHA1" => digests.sha1_hex(),
                        _ => digests.sha256_hex(),
                    };

                    format!(
                        "{:<path_width$} {:>size_width$} {}",
                        path,
                        size,
                        digest,
                        path_width = longest_path,
                        size_width = longest_size
                    )
                }),
            ));
        }

        Ok(para)
    }

    /// Publish rendered indices together with the release describing them.
    ///
    /// Nothing is written until every signature exists.
    pub fn publish_indices(&self, date: DateTime<Utc>, indices: &IndexSet) -> Result<()> {
        let release = self.create_release_paragraph(date, indices)?;

        self.sign_and_commit(release.to_string().into_bytes(), &indices.files)
    }

    /// Everything is signed in memory before anything is renamed into place,
    /// so a signing failure leaves the previously published tree live.
    fn sign_and_commit(&self, release: Vec<u8>, indices: &[IndexFile]) -> Result<()> {
        info!("signing Release with {}", self.signer.identity());
        let inrelease = self.signer.clearsign(&release)?;
        let detached = self.signer.detach_sign(&release)?;
        let public_key = self.signer.export_public_key()?;

        // Index files are renamed first, then the detached signature and the
        // manifest, then the inline-signed manifest.
        let release_files = [
            (self.layout.release_gpg_path(), &detached),
            (self.layout.release_path(), &release),
            (self.layout.inrelease_path(), &inrelease),
        ];

        let mut staged = vec![];
        for (path, data) in indices
            .iter()
            .map(|f| (f.path.clone(), &f.content))
            .chain(release_files)
        {
            let mut file = StagedFile::new(&path)?;
            file.write_all(data)
                .map_err(|e| MirrorError::io_path(file.temp_path(), e))?;
            staged.push(file);
        }

        let total = staged.len();
        for (done, file) in staged.into_iter().enumerate() {
            if let Err(e) = file.commit() {
                error!(
                    "publication stopped after {} of {} file(s); the rest keep their previous content: {}",
                    done, total, e
                );
                return Err(e);
            }
        }
        info!(
            "published {} index file(s), Release, Release.gpg and InRelease",
            indices.len()
        );

        write_atomic(self.layout.public_key_path(), &public_key)?;
        info!("exported {}", self.layout.public_key_path().display());

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            control::parse_single_paragraph,
            repository::index::IndexBuilder,
            signing::GpgSigner,
            testutil::{fake_signature_valid, tiny_deb, FakeGpg},
        },
        std::sync::Arc,
    };

    fn setup() -> Result<(tempfile::TempDir, MirrorConfig)> {
        let td = tempfile::tempdir()?;
        let config = MirrorConfig {
            root: td.path().to_path_buf(),
            origin: Some("Redroot".into()),
            ..Default::default()
        };
        RepositoryLayout::new(&config).ensure()?;

        Ok((td, config))
    }

    fn render(config: &MirrorConfig) -> Result<IndexSet> {
        IndexBuilder::new(config).render()
    }

    #[test]
    fn release_paragraph() -> Result<()> {
        let (_td, config) = setup()?;
        let gpg = FakeGpg::new(&config.signing_identity);
        let signer = GpgSigner::from_config(&config, Arc::new(gpg));
        let builder = ReleaseBuilder::new(&config, &signer);

        let date = DateTime::parse_from_rfc2822("Sat, 20 Nov 2021 08:57:21 +0000")
            .map_err(|e| MirrorError::Config(e.to_string()))?
            .with_timezone(&Utc);
        let para = builder.create_release_paragraph(date, &render(&config)?)?;

        assert_eq!(para.field_str("Suite"), Some("stable"));
        assert_eq!(para.field_str("Codename"), Some("stable"));
        assert_eq!(para.field_str("Components"), Some("main"));
        assert_eq!(para.field_str("Architectures"), Some("amd64 i386 arm64 armhf"));
        assert_eq!(para.field_str("Origin"), Some("Redroot"));
        assert_eq!(para.field_str("Label"), None);
        assert_eq!(para.field_str("Date"), Some("Sat, 20 Nov 2021 08:57:21 +0000"));

        let sha256 = para.field("SHA256").map(|f| f.iter_lines().filter(|l| !l.is_empty()).count());
        assert_eq!(sha256, Some(8));

        let empty_line = para
            .field("MD5Sum")
            .and_then(|f| {
                f.iter_lines()
                    .find(|l| l.starts_with("main/binary-i386/Packages "))
                    .map(|l| l.to_string())
            })
            .unwrap_or_default();
        assert!(empty_line.ends_with(" 0 d41d8cd98f00b204e9800998ecf8427e"));

        assert!(matches!(
            builder.create_release_paragraph(date, &IndexSet::default()),
            Err(MirrorError::IndexBuild(_))
        ));

        Ok(())
    }

    #[test]
    fn publish_writes_signed_files() -> Result<()> {
        let (td, config) = setup()?;
        let gpg = FakeGpg::new(&config.signing_identity);
        let signer = GpgSigner::from_config(&config, Arc::new(gpg));

        ReleaseBuilder::new(&config, &signer).publish_indices(Utc::now(), &render(&config)?)?;

        let dist = td.path().join("dists/stable");
        let release = std::fs::read(dist.join("Release"))?;
        let para = parse_single_paragraph(std::io::Cursor::new(&release))?;
        assert_eq!(para.field_str("Suite"), Some("stable"));

        assert!(fake_signature_valid(&release, &std::fs::read(dist.join("Release.gpg"))?));
        assert!(String::from_utf8_lossy(&std::fs::read(dist.join("InRelease"))?)
            .contains(&String::from_utf8_lossy(&release).to_string()));
        assert!(dist.join("main/binary-amd64/Packages").exists());
        assert!(dist.join("main/binary-armhf/Packages.gz").exists());
        assert!(td.path().join("KEY.asc").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            for path in [
                dist.join("Release"),
                dist.join("InRelease"),
                dist.join("Release.gpg"),
                dist.join("main/binary-amd64/Packages.gz"),
                td.path().join("KEY.asc"),
            ] {
                assert_eq!(std::fs::metadata(&path)?.permissions().mode() & 0o777, 0o644);
            }
        }

        Ok(())
    }

    #[test]
    fn signing_failure_keeps_previous_release() -> Result<()> {
        let (td, config) = setup()?;
        let gpg = FakeGpg::new(&config.signing_identity);
        let signer = GpgSigner::from_config(&config, Arc::new(gpg.clone()));
        let builder = ReleaseBuilder::new(&config, &signer);

        builder.publish_indices(Utc::now(), &render(&config)?)?;
        let dist = td.path().join("dists/stable");
        let before = std::fs::read(dist.join("Release"))?;

        std::fs::write(
            td.path().join("pool/main/discord/discord_1.0_amd64.deb"),
            tiny_deb("discord", "1.0", "amd64")?,
        )?;
        let indices = render(&config)?;
        gpg.set_failing(true);

        assert!(matches!(
            builder.publish_indices(Utc::now(), &indices),
            Err(MirrorError::Signing(_))
        ));
        assert_eq!(std::fs::read(dist.join("Release"))?, before);
        assert!(std::fs::read(dist.join("main/binary-amd64/Packages"))?.is_empty());
        assert_eq!(std::fs::read_dir(&dist)?.count(), 4);

        Ok(())
    }

    #[test]
    fn indices_wait_for_signatures() -> Result<()> {
        let (td, config) = setup()?;
        let gpg = FakeGpg::new(&config.signing_identity);
        let signer = GpgSigner::from_config(&config, Arc::new(gpg.clone()));
        let builder = ReleaseBuilder::new(&config, &signer);

        let packages = td.path().join("dists/stable/main/binary-amd64/Packages");
        std::fs::write(
            td.path().join("pool/main/discord/discord_1.0_amd64.deb"),
            tiny_deb("discord", "1.0", "amd64")?,
        )?;
        let indices = render(&config)?;

        gpg.set_failing(true);
        assert!(builder.publish_indices(Utc::now(), &indices).is_err());
        assert!(!packages.exists());
        assert!(!td.path().join("dists/stable/Release").exists());

        gpg.set_failing(false);
        builder.publish_indices(Utc::now(), &indices)?;
        let content = std::fs::read(&packages)?;
        assert!(String::from_utf8_lossy(&content).contains("Package: discord"));

        let release = parse_single_paragraph(std::io::Cursor::new(std::fs::read(
            td.path().join("dists/stable/Release"),
        )?))?;
        let (_, digest) = MultiDigester::digest_bytes(&content);
        assert!(release
            .field("SHA256")
            .map(|f| f
                .iter_lines()
                .any(|l| l.starts_with("main/binary-amd64/Packages ") && l.ends_with(&digest.sha256_hex())))
            .unwrap_or(false));

        Ok(())
    }

    #[test]
    fn failed_rename_leaves_no_staging_files() -> Result<()> {
        let (td, config) = setup()?;
        let gpg = FakeGpg::new(&config.signing_identity);
        let signer = GpgSigner::from_config(&config, Arc::new(gpg));
        let builder = ReleaseBuilder::new(&config, &signer);

        let dist = td.path().join("dists/stable");
        std::fs::create_dir_all(dist.join("InRelease/blocked"))?;

        assert!(matches!(
            builder.publish_indices(Utc::now(), &render(&config)?),
            Err(MirrorError::IoPath(..))
        ));
        assert!(dist.join("Release").exists());
        assert!(dist.join("InRelease").is_dir());

        let leftovers = walkdir::WalkDir::new(&dist)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);

        Ok(())
    }
}
