// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resolver for endpoints that redirect to the latest artifact. */

use {
    crate::{
        config::{ChannelConfig, SourceConfig},
        error::{MirrorError, Result},
        upstream::{
            canonical_filename, github::find_version_token, http::UpstreamClient, Resolution,
            ResolvedArtifact, SourceResolver,
        },
    },
    async_trait::async_trait,
    log::info,
    std::sync::Arc,
};

/// Follows a "latest" URL and reads the version out of the final URL.
pub struct DirectRedirectResolver {
    channel: ChannelConfig,
    arch: String,
    client: Arc<dyn UpstreamClient>,
}

impl DirectRedirectResolver {
    pub fn new(channel: ChannelConfig, arch: &str, client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            channel,
            arch: arch.to_string(),
            client,
        }
    }

    fn resolution_error(&self, message: String) -> MirrorError {
        MirrorError::Resolution {
            channel: self.channel.name.clone(),
            message,
        }
    }
}

#[async_trait]
impl SourceResolver for DirectRedirectResolver {
    fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    async fn resolve(&self) -> Result<Resolution> {
        let (url, template) = match &self.channel.source {
            SourceConfig::DirectRedirect {
                url,
                filename_template,
            } => (url, filename_template.as_deref()),
            _ => return Err(self.resolution_error("not a direct redirect channel".into())),
        };

        info!("{}: resolving final URL of {}", self.channel.name, url);
        let final_url = self
            .client
            .resolve_redirect(url)
            .await
            .map_err(|e| self.resolution_error(format!("{}", e)))?;

        let version = find_version_token(&final_url)
            .ok_or_else(|| self.resolution_error(format!("no version in URL {}", final_url)))?;

        let upstream_name = url::Url::parse(&final_url).ok().and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
        });

        let filename = canonical_filename(
            &self.channel,
            template,
            upstream_name.as_deref(),
            &version,
            &self.arch,
        )?;

        info!("{}: latest is {} ({})", self.channel.name, version, filename);

        Ok(Resolution::Single(ResolvedArtifact {
            url: final_url,
            version,
            filename,
            group: None,
            kind: None,
            expected_sha256: None,
        }))
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::testutil::FakeUpstream};

    fn channel(template: Option<&str>) -> ChannelConfig {
        ChannelConfig {
            name: "discord".into(),
            subdir: "discord".into(),
            keep_latest: 1,
            source: SourceConfig::DirectRedirect {
                url: "https://discord.com/api/download?platform=linux&format=deb".into(),
                filename_template: template.map(|s| s.to_string()),
            },
        }
    }

    #[tokio::test]
    async fn version_from_final_url() -> Result<()> {
        let upstream = FakeUpstream::default();
        upstream.add_redirect(
            "https://discord.com/api/download?platform=linux&format=deb",
            "https://dl.discordapp.net/apps/linux/0.0.76/discord-0.0.76.deb",
        );

        let resolver = DirectRedirectResolver::new(
            channel(Some("discord_{version}_{arch}.deb")),
            "amd64",
            Arc::new(upstream.clone()),
        );
        assert_eq!(
            resolver.resolve().await?,
            Resolution::Single(ResolvedArtifact {
                url: "https://dl.discordapp.net/apps/linux/0.0.76/discord-0.0.76.deb".into(),
                version: "0.0.76".into(),
                filename: "discord_0.0.76_amd64.deb".into(),
                group: None,
                kind: None,
                expected_sha256: None,
            })
        );

        let resolver = DirectRedirectResolver::new(channel(None), "amd64", Arc::new(upstream));
        match resolver.resolve().await? {
            Resolution::Single(artifact) => assert_eq!(artifact.filename, "discord-0.0.76.deb"),
            other => panic!("unexpected resolution {:?}", other),
        }

        Ok(())
    }

    #[tokio::test]
    async fn missing_version_is_resolution_error() {
        let upstream = FakeUpstream::default();
        upstream.add_redirect(
            "https://discord.com/api/download?platform=linux&format=deb",
            "https://dl.discordapp.net/apps/linux/latest/discord.deb",
        );

        let resolver = DirectRedirectResolver::new(channel(None), "amd64", Arc::new(upstream));
        assert!(matches!(
            resolver.resolve().await,
            Err(MirrorError::Resolution { .. })
        ));
    }

    #[tokio::test]
    async fn network_failure_is_resolution_error() {
        let resolver =
            DirectRedirectResolver::new(channel(None), "amd64", Arc::new(FakeUpstream::default()));
        assert!(matches!(
            resolver.resolve().await,
            Err(MirrorError::Resolution { .. })
        ));
    }
}
