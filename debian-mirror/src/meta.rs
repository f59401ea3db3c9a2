// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Meta-package synthesis.

A meta-package has no files. Its only content is a dependency pinned to the
newest concrete package of a group, e.g. `linux-image-redroot-znver3`
depending on `linux-image-6.16.3-tkg-redroot-znver3 (= 6.16.3-1)`. Its
version equals the targeted version, so clients upgrade through it.
Meta-packages are rebuilt from scratch on every run; builds are
reproducible, so unchanged inputs give byte-identical archives.
*/

use {
    crate::{
        config::{render_template, ChannelConfig, MetaPackageConfig, MirrorConfig, SourceConfig},
        control::ControlParagraph,
        deb::{builder::DebBuilder, reader::read_control_paragraph_from_path},
        error::Result,
        io::{checksum_line, checksum_path, is_staging_name, write_atomic, CHECKSUM_SUFFIX},
        package_version::compare_versions,
        repository::layout::RepositoryLayout,
        upstream::patterns::{AssetKind, AssetPatternTable},
    },
    digest::Digest,
    log::{info, warn},
    std::{
        cmp::Ordering,
        collections::BTreeMap,
        path::{Path, PathBuf},
    },
};

/// What a synthesis run did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SynthesisReport {
    pub built: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

/// The concrete package a meta-package points at.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Target {
    version: String,
    path: PathBuf,
}

pub struct MetaPackageSynthesizer<'a> {
    config: &'a MirrorConfig,
    layout: RepositoryLayout,
}

impl<'a> MetaPackageSynthesizer<'a> {
    pub fn new(config: &'a MirrorConfig) -> Self {
        Self {
            config,
            layout: RepositoryLayout::new(config),
        }
    }

    /// Rebuild the meta-packages of every grouped channel.
    pub fn synthesize(&self) -> Result<SynthesisReport> {
        let mut report = SynthesisReport::default();

        for channel in &self.config.channels {
            if let SourceConfig::GroupedAssets {
                patterns,
                groups,
                meta_packages,
                ..
            } = &channel.source
            {
                if meta_packages.is_empty() {
                    continue;
                }

                let table = AssetPatternTable::from_config(patterns)?;
                self.synthesize_channel(channel, &table, groups, meta_packages, &mut report)?;
            }
        }

        Ok(report)
    }

    fn synthesize_channel(
        &self,
        channel: &ChannelConfig,
        table: &AssetPatternTable,
        groups: &[String],
        meta_packages: &[MetaPackageConfig],
        report: &mut SynthesisReport,
    ) -> Result<()> {
        let dir = self.layout.channel_dir(channel);
        let latest = latest_by_group(&dir, table, groups)?;

        if latest.is_empty() {
            info!("{}: no packages in pool to build meta-packages from", channel.name);
            return Ok(());
        }

        for (group, by_kind) in &latest {
            for meta in meta_packages {
                let target = match by_kind.get(&meta.target) {
                    Some(target) => target,
                    None => continue,
                };

                let name = render_template(&meta.name_template, &[("group", group.as_str())]);
                let path = self.build_meta_package(&dir, &name, meta, target)?;
                report
                    .removed
                    .extend(remove_older_builds(&dir, &name, &path)?);
                report.built.push(path);
            }
        }

        Ok(())
    }

    fn build_meta_package(
        &self,
        dir: &Path,
        name: &str,
        meta: &MetaPackageConfig,
        target: &Target,
    ) -> Result<PathBuf> {
        let depends = dependency_on(&target.path);
        let arch = &self.config.primary_architecture;

        let mut control = ControlParagraph::default();
        control.set_field_from_string("Package", name);
        control.set_field_from_string("Version", &target.version);
        control.set_field_from_string("Architecture", arch);
        control.set_field_from_string("Depends", &depends);
        control.set_field_from_string("Priority", "optional");
        control.set_field_from_string("Section", &meta.section);
        control.set_field_from_string("Maintainer", &self.config.signing_identity);
        control.set_field_from_string(
            "Description",
            format!("Meta package for {}; pulls latest {}", name, depends),
        );

        let data = DebBuilder::new(control).to_vec()?;

        let filename = format!("{}_{}_{}.deb", name, target.version, arch);
        let path = dir.join(&filename);
        let sha256 = hex::encode(sha2::Sha256::digest(&data));

        write_atomic(checksum_path(&path), checksum_line(&sha256, &filename).as_bytes())?;
        write_atomic(&path, &data)?;
        info!("built meta-package {} -> {}", filename, depends);

        Ok(path)
    }
}

/// Newest file of each kind per group.
fn latest_by_group(
    dir: &Path,
    table: &AssetPatternTable,
    groups: &[String],
) -> Result<BTreeMap<String, BTreeMap<AssetKind, Target>>> {
    let mut latest: BTreeMap<String, BTreeMap<AssetKind, Target>> = BTreeMap::new();

    if !dir.is_dir() {
        return Ok(latest);
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|x| x.to_string_lossy().to_string())
            .unwrap_or_default();

        if is_staging_name(&name) || !name.ends_with(".deb") {
            continue;
        }

        let m = match table.match_name(&name) {
            Some(m) if groups.contains(&m.group) => m,
            _ => continue,
        };

        let slot = latest.entry(m.group).or_default();
        let newer = match slot.get(&m.kind) {
            Some(existing) => match compare_versions(&existing.version, &m.version) {
                Ordering::Less => true,
                // Ties go to the lexically greater filename.
                Ordering::Equal => existing.path < path,
                Ordering::Greater => false,
            },
            None => true,
        };

        if newer {
            slot.insert(
                m.kind,
                Target {
                    version: m.version,
                    path,
                },
            );
        }
    }

    Ok(latest)
}

/// `<package> (= <version>)` for a concrete archive.
///
/// Falls back to the unversioned package name from the filename when the
/// archive cannot be read.
fn dependency_on(path: &Path) -> String {
    match read_control_paragraph_from_path(path) {
        Ok(para) => match (para.field_str("Package"), para.field_str("Version")) {
            (Some(package), Some(version)) => format!("{} (= {})", package, version),
            (Some(package), None) => package.to_string(),
            _ => package_name_from_filename(path),
        },
        Err(e) => {
            warn!(
                "cannot read {}: {}; depending on the bare package name",
                path.display(),
                e
            );
            package_name_from_filename(path)
        }
    }
}

fn package_name_from_filename(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|x| x.to_string_lossy().to_string())
        .unwrap_or_default();

    name.split('_').next().unwrap_or_default().to_string()
}

/// Remove earlier builds of the meta-package `name`, keeping `keep`.
fn remove_older_builds(dir: &Path, name: &str, keep: &Path) -> Result<Vec<PathBuf>> {
    let prefix = format!("{}_", name);
    let keep_sibling = checksum_path(keep);
    let mut removed = vec![];

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path == keep || path == keep_sibling {
            continue;
        }

        let file_name = path
            .file_name()
            .map(|x| x.to_string_lossy().to_string())
            .unwrap_or_default();

        if file_name.starts_with(&prefix)
            && (file_name.ends_with(".deb") || file_name.ends_with(&format!(".deb{}", CHECKSUM_SUFFIX)))
        {
            std::fs::remove_file(&path)?;
            removed.push(path);
        }
    }

    removed.sort();

    Ok(removed)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{control::ControlParagraph, deb::reader::read_control_paragraph_from_path, io::sha256_file, testutil::tiny_deb},
    };

    fn setup() -> Result<(tempfile::TempDir, MirrorConfig, PathBuf)> {
        let td = tempfile::tempdir()?;
        let config = MirrorConfig {
            root: td.path().to_path_buf(),
            ..Default::default()
        };
        let layout = RepositoryLayout::new(&config);
        layout.ensure()?;
        let dir = td.path().join("pool/main/redroot-kernels");

        Ok((td, config, dir))
    }

    fn write_kernel(dir: &Path, kind: &str, version: &str, group: &str) -> Result<()> {
        let package = format!("linux-{}-{}-tkg-redroot-{}", kind, version, group);
        std::fs::write(
            dir.join(format!("{}_{}-1_amd64.deb", package, version)),
            tiny_deb(&package, &format!("{}-1", version), "amd64")?,
        )?;
        Ok(())
    }

    fn control(path: &Path) -> Result<ControlParagraph> {
        read_control_paragraph_from_path(path)
    }

    #[test]
    fn builds_pinned_meta_packages() -> Result<()> {
        let (_td, config, dir) = setup()?;
        for version in ["6.9.2", "6.10.1"] {
            write_kernel(&dir, "image", version, "znver3")?;
            write_kernel(&dir, "headers", version, "znver3")?;
        }

        let report = MetaPackageSynthesizer::new(&config).synthesize()?;
        assert_eq!(report.built.len(), 2);

        let image_meta = dir.join("linux-image-redroot-znver3_6.10.1_amd64.deb");
        let para = control(&image_meta)?;
        assert_eq!(para.field_str("Version"), Some("6.10.1"));
        assert_eq!(
            para.field_str("Depends"),
            Some("linux-image-6.10.1-tkg-redroot-znver3 (= 6.10.1-1)")
        );
        assert_eq!(para.field_str("Section"), Some("kernel"));
        assert_eq!(
            para.field_str("Maintainer"),
            Some("Pablo M. Duval <pabloduval@proton.me>")
        );

        let headers_meta = dir.join("linux-headers-redroot-znver3_6.10.1_amd64.deb");
        assert_eq!(
            control(&headers_meta)?.field_str("Depends"),
            Some("linux-headers-6.10.1-tkg-redroot-znver3 (= 6.10.1-1)")
        );

        let sibling = std::fs::read_to_string(checksum_path(&image_meta))?;
        assert_eq!(
            sibling,
            checksum_line(&sha256_file(&image_meta)?.0, "linux-image-redroot-znver3_6.10.1_amd64.deb")
        );

        Ok(())
    }

    #[test]
    fn rebuild_replaces_old_version_identically() -> Result<()> {
        let (_td, config, dir) = setup()?;
        write_kernel(&dir, "image", "6.9.2", "tigerlake")?;
        write_kernel(&dir, "headers", "6.9.2", "tigerlake")?;

        let synthesizer = MetaPackageSynthesizer::new(&config);
        synthesizer.synthesize()?;
        let old = dir.join("linux-image-redroot-tigerlake_6.9.2_amd64.deb");
        let first = std::fs::read(&old)?;

        synthesizer.synthesize()?;
        assert_eq!(std::fs::read(&old)?, first);

        write_kernel(&dir, "image", "6.9.3", "tigerlake")?;
        write_kernel(&dir, "headers", "6.9.3", "tigerlake")?;
        let report = synthesizer.synthesize()?;

        assert!(!old.exists());
        assert!(!checksum_path(&old).exists());
        assert!(dir.join("linux-image-redroot-tigerlake_6.9.3_amd64.deb").exists());
        assert_eq!(report.removed.len(), 4);

        Ok(())
    }

    #[test]
    fn empty_pool_builds_nothing() -> Result<()> {
        let (_td, config, _dir) = setup()?;
        assert_eq!(
            MetaPackageSynthesizer::new(&config).synthesize()?,
            SynthesisReport::default()
        );

        Ok(())
    }

    #[test]
    fn unreadable_target_falls_back_to_name() -> Result<()> {
        let (_td, _config, dir) = setup()?;
        let path = dir.join("linux-image-6.1-tkg-redroot-x86-64_6.1-1_amd64.deb");
        std::fs::write(&path, b"garbage")?;

        assert_eq!(dependency_on(&path), "linux-image-6.1-tkg-redroot-x86-64");

        Ok(())
    }
}
