// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resolver picking a single asset from a releases listing. */

use {
    crate::{
        config::{ChannelConfig, SourceConfig},
        error::{MirrorError, Result},
        upstream::{
            canonical_filename,
            github::{Release, ReleaseAsset},
            http::UpstreamClient,
            Resolution, ResolvedArtifact, SourceResolver,
        },
    },
    async_trait::async_trait,
    log::{debug, info},
    std::sync::Arc,
};

/// Criteria an asset must meet to be picked.
#[derive(Clone, Debug)]
struct AssetFilter<'a> {
    suffix: &'a str,
    contains: Option<&'a str>,
    allow_prerelease: bool,
}

impl<'a> AssetFilter<'a> {
    fn release_qualifies(&self, release: &Release) -> bool {
        !release.draft && (self.allow_prerelease || !release.prerelease)
    }

    fn asset_qualifies(&self, asset: &ReleaseAsset) -> bool {
        asset.name.ends_with(self.suffix)
            && self.contains.map_or(true, |s| asset.name.contains(s))
            && asset.browser_download_url.is_some()
    }

    /// First qualifying asset of the newest qualifying release.
    fn select<'r>(&self, releases: &'r [Release]) -> Option<(&'r Release, &'r ReleaseAsset)> {
        releases
            .iter()
            .filter(|release| self.release_qualifies(release))
            .find_map(|release| {
                release
                    .assets()
                    .iter()
                    .find(|asset| self.asset_qualifies(asset))
                    .map(|asset| (release, asset))
            })
    }
}

/// Scans releases newest first for the first asset matching a suffix.
pub struct ReleaseAssetResolver {
    channel: ChannelConfig,
    arch: String,
    client: Arc<dyn UpstreamClient>,
}

impl ReleaseAssetResolver {
    pub fn new(channel: ChannelConfig, arch: &str, client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            channel,
            arch: arch.to_string(),
            client,
        }
    }
}

#[async_trait]
impl SourceResolver for ReleaseAssetResolver {
    fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    async fn resolve(&self) -> Result<Resolution> {
        let (repository, filter, template, per_page) = match &self.channel.source {
            SourceConfig::ReleaseAsset {
                repository,
                asset_suffix,
                asset_contains,
                allow_prerelease,
                filename_template,
                per_page,
            } => (
                repository,
                AssetFilter {
                    suffix: asset_suffix,
                    contains: asset_contains.as_deref(),
                    allow_prerelease: *allow_prerelease,
                },
                filename_template.as_deref(),
                *per_page,
            ),
            _ => {
                return Err(MirrorError::Resolution {
                    channel: self.channel.name.clone(),
                    message: "not a release asset channel".into(),
                })
            }
        };

        let releases = self
            .client
            .list_releases(repository, per_page)
            .await
            .map_err(|e| MirrorError::Resolution {
                channel: self.channel.name.clone(),
                message: format!("listing releases of {}: {}", repository, e),
            })?;
        debug!("{}: {} releases listed", self.channel.name, releases.len());

        let (release, asset) =
            filter
                .select(&releases)
                .ok_or_else(|| MirrorError::AssetNotFound {
                    channel: self.channel.name.clone(),
                    scanned: releases.len(),
                })?;

        let version = release.version_for_asset(&asset.name);
        let filename = canonical_filename(
            &self.channel,
            template,
            Some(&asset.name),
            &version,
            &self.arch,
        )?;

        info!(
            "{}: latest is {} ({} from {})",
            self.channel.name, version, filename, asset.name
        );

        Ok(Resolution::Single(ResolvedArtifact {
            url: asset.browser_download_url.clone().unwrap_or_default(),
            version,
            filename,
            group: None,
            kind: None,
            expected_sha256: asset.sha256(),
        }))
    }
}
