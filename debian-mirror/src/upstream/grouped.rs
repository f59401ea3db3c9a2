// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resolver for releases shipping companion assets per group.

The newest non-draft release is scanned. Every asset name is matched against
the channel's [AssetPatternTable]; matches are bucketed by group tag, and
only groups holding every kind of the table are returned. A group with one
half missing is dropped entirely.
*/

use {
    crate::{
        config::{ChannelConfig, SourceConfig},
        error::{MirrorError, Result},
        upstream::{
            github::Release, http::UpstreamClient, patterns::AssetPatternTable, ArtifactGroup,
            Resolution, ResolvedArtifact, SourceResolver,
        },
    },
    async_trait::async_trait,
    log::{info, warn},
    std::{
        collections::{BTreeMap, BTreeSet},
        sync::Arc,
    },
};

pub struct GroupedAssetResolver {
    channel: ChannelConfig,
    patterns: AssetPatternTable,
    client: Arc<dyn UpstreamClient>,
}

impl GroupedAssetResolver {
    pub fn new(channel: ChannelConfig, client: Arc<dyn UpstreamClient>) -> Result<Self> {
        let patterns = match &channel.source {
            SourceConfig::GroupedAssets { patterns, .. } => AssetPatternTable::from_config(patterns)?,
            _ => {
                return Err(MirrorError::Config(format!(
                    "channel {} is not a grouped channel",
                    channel.name
                )))
            }
        };

        Ok(Self {
            channel,
            patterns,
            client,
        })
    }

    /// Bucket the assets of a release into complete groups.
    pub fn group_assets(
        &self,
        release: &Release,
        groups: &[String],
        exclude_substrings: &[String],
    ) -> BTreeMap<String, ArtifactGroup> {
        let wanted = groups.iter().map(|g| g.as_str()).collect::<BTreeSet<_>>();
        let mut buckets: BTreeMap<String, ArtifactGroup> = BTreeMap::new();

        for asset in release.assets() {
            if !asset.name.ends_with(".deb")
                || exclude_substrings.iter().any(|s| asset.name.contains(s.as_str()))
            {
                continue;
            }

            let (m, url) = match (
                self.patterns.match_name(&asset.name),
                &asset.browser_download_url,
            ) {
                (Some(m), Some(url)) => (m, url),
                _ => continue,
            };

            if !wanted.contains(m.group.as_str()) {
                continue;
            }

            buckets
                .entry(m.group.clone())
                .or_insert_with(|| ArtifactGroup {
                    group: m.group.clone(),
                    artifacts: BTreeMap::new(),
                })
                .artifacts
                .insert(
                    m.kind,
                    ResolvedArtifact {
                        url: url.clone(),
                        version: m.version,
                        filename: asset.name.clone(),
                        group: Some(m.group),
                        kind: Some(m.kind),
                        expected_sha256: asset.sha256(),
                    },
                );
        }

        let kinds = self.patterns.kinds().collect::<Vec<_>>();

        buckets
            .into_iter()
            .filter(|(group, bucket)| {
                let complete = kinds.iter().all(|k| bucket.artifacts.contains_key(k));
                if !complete {
                    warn!(
                        "{}: group {} lacks a companion asset; skipping it",
                        self.channel.name, group
                    );
                }
                complete
            })
            .collect()
    }
}

#[async_trait]
impl SourceResolver for GroupedAssetResolver {
    fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    async fn resolve(&self) -> Result<Resolution> {
        let (repository, groups, exclude_substrings, per_page) = match &self.channel.source {
            SourceConfig::GroupedAssets {
                repository,
                groups,
                exclude_substrings,
                per_page,
                ..
            } => (repository, groups, exclude_substrings, *per_page),
            _ => {
                return Err(MirrorError::Resolution {
                    channel: self.channel.name.clone(),
                    message: "not a grouped channel".into(),
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

        let complete = match releases.iter().find(|r| !r.draft) {
            Some(release) => self.group_assets(release, groups, exclude_substrings),
            None => BTreeMap::new(),
        };

        info!(
            "{}: {} complete group(s) in newest release",
            self.channel.name,
            complete.len()
        );

        Ok(Resolution::Grouped(complete))
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            config::MirrorConfig,
            testutil::{release, FakeUpstream},
            upstream::patterns::AssetKind,
        },
    };

    fn kernel_channel() -> Result<ChannelConfig> {
        MirrorConfig::default()
            .channel("redroot-kernels")
            .cloned()
            .ok_or_else(|| MirrorError::Config("missing kernel channel".into()))
    }

    #[tokio::test]
    async fn half_groups_dropped() -> Result<()> {
        let upstream = FakeUpstream::default();

        let mut draft = release(
            "v6.17.0",
            &[
                "linux-image-6.17.0-tkg-redroot-znver3_6.17.0-1_amd64.deb",
                "linux-headers-6.17.0-tkg-redroot-znver3_6.17.0-1_amd64.deb",
            ],
        );
        draft.draft = true;

        let newest = release(
            "v6.16.3",
            &[
                // tigerlake only has an image
                "linux-image-6.16.3-tkg-redroot-tigerlake_6.16.3-1_amd64.deb",
                "linux-image-6.16.3-tkg-redroot-znver3_6.16.3-1_amd64.deb",
                "linux-headers-6.16.3-tkg-redroot-znver3_6.16.3-1_amd64.deb",
                "linux-image-6.16.3-tkg-redroot-znver3-dbg_6.16.3-1_amd64.deb",
                "linux-libc-dev_6.16.3-1_amd64.deb",
                // not a tracked profile
                "linux-image-6.16.3-tkg-redroot-generic_6.16.3-1_amd64.deb",
                "linux-headers-6.16.3-tkg-redroot-generic_6.16.3-1_amd64.deb",
            ],
        );

        let older = release(
            "v6.16.2",
            &[
                "linux-image-6.16.2-tkg-redroot-tigerlake_6.16.2-1_amd64.deb",
                "linux-headers-6.16.2-tkg-redroot-tigerlake_6.16.2-1_amd64.deb",
            ],
        );

        upstream.set_releases("RedrootDEV/Debian-RedRoot", vec![draft, newest, older]);

        let resolver = GroupedAssetResolver::new(kernel_channel()?, Arc::new(upstream))?;
        let groups = match resolver.resolve().await? {
            Resolution::Grouped(groups) => groups,
            other => panic!("unexpected resolution {:?}", other),
        };

        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["znver3"]);
        let znver3 = &groups["znver3"];
        assert!(znver3.artifacts.values().all(|a| a.version == "6.16.3"));
        assert_eq!(
            znver3.artifacts[&AssetKind::Headers].filename,
            "linux-headers-6.16.3-tkg-redroot-znver3_6.16.3-1_amd64.deb"
        );
        assert_eq!(znver3.artifacts[&AssetKind::Image].group.as_deref(), Some("znver3"));

        Ok(())
    }

    #[tokio::test]
    async fn no_releases_is_empty() -> Result<()> {
        let upstream = FakeUpstream::default();
        upstream.set_releases("RedrootDEV/Debian-RedRoot", vec![]);

        let resolver = GroupedAssetResolver::new(kernel_channel()?, Arc::new(upstream))?;
        assert_eq!(resolver.resolve().await?, Resolution::Grouped(BTreeMap::new()));

        Ok(())
    }
}
