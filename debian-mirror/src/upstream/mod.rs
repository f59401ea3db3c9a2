// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Discovering the latest artifacts of upstream channels.

A [SourceResolver] turns a channel's static configuration into a
[Resolution]: one [ResolvedArtifact] for single-artifact channels, or a set
of complete [ArtifactGroup]s for grouped channels. Resolvers only read from
the network. They never touch the pool.
*/

pub mod direct;
pub mod github;
pub mod grouped;
pub mod http;
pub mod patterns;
pub mod release_asset;

use {
    crate::{
        config::{render_template, ChannelConfig, MirrorConfig, SourceConfig},
        error::{MirrorError, Result},
        upstream::{http::UpstreamClient, patterns::AssetKind},
    },
    async_trait::async_trait,
    std::{collections::BTreeMap, sync::Arc},
};

/// The latest artifact of a channel (or one half of a group).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedArtifact {
    pub url: String,
    pub version: String,
    /// Filename the artifact is published under in the pool.
    pub filename: String,
    /// Group tag (CPU profile) for grouped channels.
    pub group: Option<String>,
    pub kind: Option<AssetKind>,
    /// Hex SHA-256 advertised upstream, if any.
    pub expected_sha256: Option<String>,
}

/// A group whose companion assets are all present.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactGroup {
    pub group: String,
    pub artifacts: BTreeMap<AssetKind, ResolvedArtifact>,
}

/// Outcome of resolving a channel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resolution {
    Single(ResolvedArtifact),
    /// Complete groups keyed by group tag. May be empty.
    Grouped(BTreeMap<String, ArtifactGroup>),
}

/// Resolves the latest artifact(s) of one channel.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    fn channel(&self) -> &ChannelConfig;

    async fn resolve(&self) -> Result<Resolution>;
}

/// Construct the resolver for a channel.
pub fn resolver_for_channel(
    config: &MirrorConfig,
    channel: &ChannelConfig,
    client: Arc<dyn UpstreamClient>,
) -> Result<Box<dyn SourceResolver>> {
    Ok(match &channel.source {
        SourceConfig::DirectRedirect { .. } => Box::new(direct::DirectRedirectResolver::new(
            channel.clone(),
            &config.primary_architecture,
            client,
        )),
        SourceConfig::ReleaseAsset { .. } => Box::new(
            release_asset::ReleaseAssetResolver::new(
                channel.clone(),
                &config.primary_architecture,
                client,
            ),
        ),
        SourceConfig::GroupedAssets { .. } => {
            Box::new(grouped::GroupedAssetResolver::new(channel.clone(), client)?)
        }
    })
}

/// Choose the pool filename of a resolved artifact.
///
/// A configured template wins, then the upstream name, then
/// `<subdir>_<version>_<arch>.deb`.
pub(crate) fn canonical_filename(
    channel: &ChannelConfig,
    template: Option<&str>,
    upstream_name: Option<&str>,
    version: &str,
    arch: &str,
) -> Result<String> {
    let filename = match (template, upstream_name) {
        (Some(template), _) => render_template(
            template,
            &[
                ("name", channel.name.as_str()),
                ("version", version),
                ("arch", arch),
            ],
        ),
        (None, Some(name)) if !name.is_empty() => name.to_string(),
        _ => format!("{}_{}_{}.deb", channel.subdir, version, arch),
    };

    if filename.is_empty()
        || filename.contains('/')
        || filename.starts_with('.')
        || filename.ends_with(crate::io::CHECKSUM_SUFFIX)
    {
        return Err(MirrorError::Resolution {
            channel: channel.name.clone(),
            message: format!("unusable artifact filename {:?}", filename),
        });
    }

    Ok(filename)
}

#[cfg(test)]
mod test {
    use super::*;

    fn channel() -> ChannelConfig {
        ChannelConfig {
            name: "discord".into(),
            subdir: "discord".into(),
            keep_latest: 1,
            source: SourceConfig::DirectRedirect {
                url: "https://example.com".into(),
                filename_template: None,
            },
        }
    }

    #[test]
    fn filename_choice() -> Result<()> {
        let c = channel();
        assert_eq!(
            canonical_filename(&c, Some("{name}_{version}_{arch}.deb"), Some("x.deb"), "1.2", "amd64")?,
            "discord_1.2_amd64.deb"
        );
        assert_eq!(
            canonical_filename(&c, None, Some("discord-1.2.deb"), "1.2", "amd64")?,
            "discord-1.2.deb"
        );
        assert_eq!(
            canonical_filename(&c, None, Some(""), "1.2", "amd64")?,
            "discord_1.2_amd64.deb"
        );
        assert!(canonical_filename(&c, None, Some(".hidden.deb"), "1.2", "amd64").is_err());
        assert!(canonical_filename(&c, Some("../{version}.deb"), None, "1.2", "amd64").is_err());

        Ok(())
    }
}
