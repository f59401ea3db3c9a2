// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The artifact pool.

Each channel owns `pool/<component>/<subdir>/`. Every artifact there has a
`<name>.sha256` sibling, and nothing appears under an artifact's final name
until its content is complete: downloads land in a staging file that is
renamed into place after validation.
*/

use {
    crate::{
        config::{ChannelConfig, SourceConfig},
        deb::reader::read_control_paragraph_from_path,
        error::{MirrorError, Result},
        io::{
            checksum_line, checksum_path, is_staging_name, parse_checksum_line, sha256_file,
            write_atomic, StagedFile, CHECKSUM_SUFFIX,
        },
        package_version::sort_versions,
        repository::layout::RepositoryLayout,
        upstream::{
            http::UpstreamClient,
            patterns::{AssetKind, AssetPatternTable},
            ArtifactGroup, ResolvedArtifact,
        },
    },
    digest::Digest,
    futures::AsyncReadExt,
    log::{debug, info, warn},
    std::{
        collections::{BTreeMap, BTreeSet},
        io::Write,
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// An artifact materialized in the pool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolEntry {
    pub channel: String,
    pub filename: String,
    pub version: String,
    pub sha256: String,
    pub size: u64,
    pub path: PathBuf,
}

/// Whether publishing an artifact removes the channel's other artifacts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Cleanup {
    /// Remove every other artifact and checksum of the channel.
    RemoveOthers,
    Keep,
}

impl Cleanup {
    /// Policy for a single-artifact channel.
    pub fn for_channel(channel: &ChannelConfig) -> Self {
        if channel.keep_latest == 1 {
            Self::RemoveOthers
        } else {
            Self::Keep
        }
    }
}

/// Files removed by a pool operation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

pub struct PoolManager {
    layout: RepositoryLayout,
    client: Arc<dyn UpstreamClient>,
    verify_digests: bool,
}

impl PoolManager {
    pub fn new(
        layout: RepositoryLayout,
        client: Arc<dyn UpstreamClient>,
        verify_digests: bool,
    ) -> Self {
        Self {
            layout,
            client,
            verify_digests,
        }
    }

    pub fn channel_dir(&self, channel: &ChannelConfig) -> PathBuf {
        self.layout.channel_dir(channel)
    }

    /// Make sure the artifact is in the channel's pool directory.
    ///
    /// Returns `None` when it already was (no change). A present artifact
    /// with a missing or stale checksum sibling gets its sibling rewritten,
    /// which is not reported as a change.
    pub async fn ensure_present(
        &self,
        artifact: &ResolvedArtifact,
        channel: &ChannelConfig,
        cleanup: Cleanup,
    ) -> Result<Option<PoolEntry>> {
        let dir = self.channel_dir(channel);
        let target = dir.join(&artifact.filename);

        if target.exists() {
            debug!("{}: {} already present", channel.name, artifact.filename);
            self.heal_checksum(&target)?;
            return Ok(None);
        }

        std::fs::create_dir_all(&dir).map_err(|e| MirrorError::io_path(&dir, e))?;

        info!(
            "{}: downloading {} {} to {}",
            channel.name, artifact.version, artifact.url, artifact.filename
        );
        let (staged, sha256, size) = self.download(artifact, &target).await?;

        // The sibling goes first so the artifact is never visible without it.
        let sibling = checksum_path(&target);
        write_atomic(&sibling, checksum_line(&sha256, &artifact.filename).as_bytes())?;
        if let Err(e) = staged.commit() {
            if let Err(cleanup) = remove_file(&sibling) {
                warn!("cannot remove orphaned {}: {}", sibling.display(), cleanup);
            }
            return Err(e);
        }
        info!(
            "{}: saved {} ({} bytes, sha256 {})",
            channel.name, artifact.filename, size, sha256
        );

        if cleanup == Cleanup::RemoveOthers {
            let report = self.remove_others(&dir, &artifact.filename)?;
            if !report.is_empty() {
                info!(
                    "{}: cleanup removed {} previous file(s)",
                    channel.name,
                    report.removed.len()
                );
            }
        }

        Ok(Some(PoolEntry {
            channel: channel.name.clone(),
            filename: artifact.filename.clone(),
            version: artifact.version.clone(),
            sha256,
            size,
            path: target,
        }))
    }

    /// Stream an artifact into a staging file next to `target`.
    async fn download(
        &self,
        artifact: &ResolvedArtifact,
        target: &Path,
    ) -> Result<(StagedFile, String, u64)> {
        let download_error = |message: String| MirrorError::Download {
            filename: artifact.filename.clone(),
            message,
        };

        let mut staged = StagedFile::new(target)?;
        let mut reader = self
            .client
            .fetch(&artifact.url)
            .await
            .map_err(|e| download_error(format!("{}", e)))?;

        let mut hasher = sha2::Sha256::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; 1 << 16];

        loop {
            let count = reader
                .read(&mut buf)
                .await
                .map_err(|e| download_error(format!("reading body: {}", e)))?;
            if count == 0 {
                break;
            }

            hasher.update(&buf[0..count]);
            staged
                .write_all(&buf[0..count])
                .map_err(|e| MirrorError::io_path(staged.temp_path(), e))?;
            size += count as u64;
        }

        if size == 0 || staged.is_empty()? {
            return Err(download_error("empty download".into()));
        }

        let sha256 = hex::encode(hasher.finalize());

        if self.verify_digests {
            if let Some(expected) = &artifact.expected_sha256 {
                if !expected.eq_ignore_ascii_case(&sha256) {
                    return Err(download_error(format!(
                        "sha256 mismatch: upstream advertises {}, got {}",
                        expected, sha256
                    )));
                }
            }
        }

        Ok((staged, sha256, size))
    }

    /// Rewrite the checksum sibling of `path` if it is missing or wrong.
    ///
    /// Returns whether a sibling was written.
    pub fn heal_checksum(&self, path: &Path) -> Result<bool> {
        let filename = file_name(path);
        let sibling = checksum_path(path);

        let recorded = match std::fs::read_to_string(&sibling) {
            Ok(content) => parse_checksum_line(&content, &filename),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(MirrorError::io_path(&sibling, e)),
        };

        if recorded.is_some() {
            return Ok(false);
        }

        let (sha256, _) = sha256_file(path)?;
        write_atomic(&sibling, checksum_line(&sha256, &filename).as_bytes())?;
        warn!("rewrote missing checksum for {}", path.display());

        Ok(true)
    }

    fn remove_others(&self, dir: &Path, keep: &str) -> Result<PruneReport> {
        let keep_sibling = format!("{}{}", keep, CHECKSUM_SUFFIX);
        let mut report = PruneReport::default();

        for path in list_files(dir)? {
            let name = file_name(&path);
            if name == keep || name == keep_sibling {
                continue;
            }
            if (name.ends_with(".deb") || name.ends_with(CHECKSUM_SUFFIX)) && remove_file(&path)? {
                report.removed.push(path);
            }
        }

        Ok(report)
    }

    /// Ingest every artifact of each complete group.
    ///
    /// A group is ingested all-or-nothing: if any half fails, halves newly
    /// written for that group are removed again and the group's error is
    /// returned alongside the successes. Other groups are unaffected.
    pub async fn ensure_groups(
        &self,
        groups: &BTreeMap<String, ArtifactGroup>,
        channel: &ChannelConfig,
    ) -> (Vec<PoolEntry>, Vec<MirrorError>) {
        let mut entries = vec![];
        let mut errors = vec![];

        for (name, group) in groups {
            let mut written: Vec<PoolEntry> = vec![];
            let mut failure = None;

            for artifact in group.artifacts.values() {
                match self.ensure_present(artifact, channel, Cleanup::Keep).await {
                    Ok(Some(entry)) => written.push(entry),
                    Ok(None) => {}
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            match failure {
                None => entries.extend(written),
                Some(e) => {
                    let mut rolled_back = PruneReport::default();
                    for entry in &written {
                        if let Err(e) = remove_artifact(&entry.path, &mut rolled_back) {
                            warn!("{}: rolling back {}: {}", channel.name, entry.filename, e);
                        }
                    }
                    errors.push(MirrorError::PoolConsistency {
                        channel: channel.name.clone(),
                        message: format!("group {} not ingested: {}", name, e),
                    });
                }
            }
        }

        (entries, errors)
    }

    /// Keep only the newest `retain` versions of each package in a channel.
    ///
    /// Grouped channels are pruned per group with both halves of a version
    /// removed together; orphaned halves are removed too. Other channels are
    /// pruned per package name read from each archive. Idempotent.
    pub fn prune(&self, channel: &ChannelConfig, retain: usize) -> Result<PruneReport> {
        let dir = self.channel_dir(channel);
        if !dir.is_dir() {
            return Ok(PruneReport::default());
        }

        let retain = retain.max(1);

        let report = match &channel.source {
            SourceConfig::GroupedAssets {
                patterns, groups, ..
            } => {
                let table = AssetPatternTable::from_config(patterns)?;
                prune_grouped(&channel.name, &dir, &table, groups, retain)?
            }
            _ => prune_by_package(&channel.name, &dir, retain)?,
        };

        if !report.is_empty() {
            info!(
                "{}: pruned {} file(s); kept last {}",
                channel.name,
                report.removed.len(),
                retain
            );
        }

        Ok(report)
    }

    /// Remove staging files left behind by an interrupted run.
    pub fn sweep_staging(&self, channel: &ChannelConfig) -> Result<usize> {
        let dir = self.channel_dir(channel);
        if !dir.is_dir() {
            return Ok(0);
        }

        let mut count = 0;
        for path in list_all(&dir)? {
            if path.is_file() && is_staging_name(&file_name(&path)) && remove_file(&path)? {
                count += 1;
            }
        }

        if count > 0 {
            info!("{}: removed {} stale staging file(s)", channel.name, count);
        }

        Ok(count)
    }

    /// Artifacts currently in a channel's directory.
    pub fn entries(&self, channel: &ChannelConfig) -> Result<Vec<PathBuf>> {
        let dir = self.channel_dir(channel);
        if !dir.is_dir() {
            return Ok(vec![]);
        }

        list_files(&dir)
    }
}

fn prune_grouped(
    channel: &str,
    dir: &Path,
    table: &AssetPatternTable,
    groups: &[String],
    retain: usize,
) -> Result<PruneReport> {
    // group -> version -> kind -> files
    let mut index: BTreeMap<String, BTreeMap<String, BTreeMap<AssetKind, Vec<PathBuf>>>> =
        BTreeMap::new();

    for path in list_files(dir)? {
        let name = file_name(&path);
        if !name.ends_with(".deb") {
            continue;
        }

        if let Some(m) = table.match_name(&name) {
            if !groups.contains(&m.group) {
                continue;
            }

            index
                .entry(m.group)
                .or_default()
                .entry(m.version)
                .or_default()
                .entry(m.kind)
                .or_default()
                .push(path);
        }
    }

    let kinds = table.kinds().collect::<BTreeSet<_>>();
    let mut report = PruneReport::default();

    for (group, versions) in index {
        let (complete, incomplete): (Vec<_>, Vec<_>) = versions
            .iter()
            .partition(|(_, by_kind)| by_kind.keys().copied().collect::<BTreeSet<_>>() == kinds);

        for (version, by_kind) in incomplete {
            let err = MirrorError::PoolConsistency {
                channel: channel.to_string(),
                message: format!("group {} version {} lacks a companion; removing it", group, version),
            };
            warn!("{}", err);

            for path in by_kind.values().flatten() {
                remove_artifact(path, &mut report)?;
            }
        }

        let ordered = sort_versions(complete.iter().map(|(version, _)| version.as_str()));
        let cut = ordered.len().saturating_sub(retain);

        for version in &ordered[..cut] {
            debug!("{}: pruning {} {}", channel, group, version);

            for path in versions[*version].values().flatten() {
                remove_artifact(path, &mut report)?;
            }
        }
    }

    Ok(report)
}

fn prune_by_package(channel: &str, dir: &Path, retain: usize) -> Result<PruneReport> {
    // package -> version -> files
    let mut index: BTreeMap<String, BTreeMap<String, Vec<PathBuf>>> = BTreeMap::new();

    for path in list_files(dir)? {
        if !file_name(&path).ends_with(".deb") {
            continue;
        }

        let para = match read_control_paragraph_from_path(&path) {
            Ok(para) => para,
            Err(e) => {
                warn!("{}: cannot read {}: {}", channel, path.display(), e);
                continue;
            }
        };

        let (package, version) = match (para.field_str("Package"), para.field_str("Version")) {
            (Some(p), Some(v)) => (p.to_string(), v.to_string()),
            _ => continue,
        };

        index
            .entry(package)
            .or_default()
            .entry(version)
            .or_default()
            .push(path);
    }

    let mut report = PruneReport::default();

    for versions in index.values() {
        let ordered = sort_versions(versions.keys().map(|v| v.as_str()));
        let cut = ordered.len().saturating_sub(retain);

        for version in &ordered[..cut] {
            for path in &versions[*version] {
                remove_artifact(path, &mut report)?;
            }
        }
    }

    Ok(report)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|x| x.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Visible regular files of a directory, sorted.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(list_all(dir)?
        .into_iter()
        .filter(|p| p.is_file() && !is_staging_name(&file_name(p)))
        .collect())
}

fn list_all(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = vec![];
    for entry in std::fs::read_dir(dir).map_err(|e| MirrorError::io_path(dir, e))? {
        paths.push(entry.map_err(|e| MirrorError::io_path(dir, e))?.path());
    }
    paths.sort();

    Ok(paths)
}

/// Remove a file, returning whether it existed.
fn remove_file(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(MirrorError::io_path(path, e)),
    }
}

/// Remove an artifact together with its checksum sibling.
fn remove_artifact(path: &Path, report: &mut PruneReport) -> Result<()> {
    for path in [path.to_path_buf(), checksum_path(path)] {
        if remove_file(&path)? {
            report.removed.push(path);
        }
    }

    Ok(())
}
