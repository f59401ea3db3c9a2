// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mirror configuration.

A [MirrorConfig] is loaded once at startup (usually from YAML) and passed by
reference to every component. Every field has a default, so an empty YAML
document describes the stock deployment: Discord, FreeTube, GitHub Desktop
and the Redroot kernel family published as `stable/main` for `amd64`.
*/

use {
    crate::{
        error::{MirrorError, Result},
        upstream::patterns::{AssetKind, AssetPatternTable},
    },
    serde::{Deserialize, Serialize},
    std::{collections::BTreeSet, path::Path, path::PathBuf, time::Duration},
};

/// Environment variable consulted when no API credential is configured.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Repository root holding `dists/`, `pool/` and `KEY.asc`.
    pub root: PathBuf,
    pub distribution: String,
    pub component: String,
    /// Architectures advertised by the repository.
    pub architectures: Vec<String>,
    /// The only architecture whose index is populated.
    pub primary_architecture: String,
    pub check_interval_secs: u64,
    /// User id of the signing key, e.g. `Name <email>`.
    pub signing_identity: String,
    /// Exported as `GNUPGHOME` to the signing tool when set.
    pub gnupg_home: Option<PathBuf>,
    pub github_api_url: String,
    /// API credential. Falls back to the `GITHUB_TOKEN` environment variable.
    pub github_token: Option<String>,
    pub user_agent: String,
    pub metadata_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// Reject downloads whose SHA-256 differs from a digest advertised upstream.
    pub verify_upstream_digests: bool,
    pub origin: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub channels: Vec<ChannelConfig>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/www/debian-redroot"),
            distribution: "stable".into(),
            component: "main".into(),
            architectures: vec![
                "amd64".into(),
                "i386".into(),
                "arm64".into(),
                "armhf".into(),
            ],
            primary_architecture: "amd64".into(),
            check_interval_secs: 900,
            signing_identity: "Pablo M. Duval <pabloduval@proton.me>".into(),
            gnupg_home: None,
            github_api_url: "https://api.github.com".into(),
            github_token: None,
            user_agent: "apt-repo-bot/1.0".into(),
            metadata_timeout_secs: 30,
            download_timeout_secs: 1800,
            tool_timeout_secs: 120,
            verify_upstream_digests: true,
            origin: None,
            label: None,
            description: None,
            channels: default_channels(),
        }
    }
}

impl MirrorConfig {
    /// Parse a YAML document and validate it.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        // serde_yaml rejects an empty document; treat it as all defaults.
        let config: Self = if s.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(s)?
        };
        config.validate()?;

        Ok(config)
    }

    pub fn from_yaml_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).map_err(|e| MirrorError::io_path(path, e))?;

        Self::from_yaml_str(&s)
    }

    /// Fill the API credential from the environment when not configured.
    #[must_use]
    pub fn with_environment(mut self) -> Self {
        if self.github_token.is_none() {
            self.github_token = std::env::var(GITHUB_TOKEN_ENV)
                .ok()
                .filter(|x| !x.is_empty());
        }
        self
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Architectures that get empty placeholder indices.
    pub fn secondary_architectures(&self) -> impl Iterator<Item = &str> {
        self.architectures
            .iter()
            .map(|x| x.as_str())
            .filter(move |x| *x != self.primary_architecture)
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| Err(MirrorError::Config(msg));

        if self.architectures.is_empty() {
            return err("at least one architecture is required".into());
        }
        if !self.architectures.contains(&self.primary_architecture) {
            return err(format!(
                "primary architecture {} is not in architectures",
                self.primary_architecture
            ));
        }
        for value in [&self.distribution, &self.component] {
            if !is_path_segment(value) {
                return err(format!("invalid distribution/component: {:?}", value));
            }
        }
        if self.check_interval_secs == 0 {
            return err("check_interval_secs must be positive".into());
        }
        if self.signing_identity.trim().is_empty() {
            return err("signing_identity must not be empty".into());
        }

        let mut names = BTreeSet::new();
        let mut subdirs = BTreeSet::new();
        for channel in &self.channels {
            if !names.insert(channel.name.as_str()) {
                return err(format!("duplicate channel name: {}", channel.name));
            }
            if !is_path_segment(&channel.subdir) {
                return err(format!(
                    "channel {} has invalid subdir {:?}",
                    channel.name, channel.subdir
                ));
            }
            if !subdirs.insert(channel.subdir.as_str()) {
                return err(format!("duplicate channel subdir: {}", channel.subdir));
            }
            if channel.keep_latest == 0 {
                return err(format!("channel {} must keep at least 1 version", channel.name));
            }

            if let SourceConfig::GroupedAssets { patterns, .. } = &channel.source {
                AssetPatternTable::from_config(patterns)
                    .map_err(|e| MirrorError::Config(format!("channel {}: {}", channel.name, e)))?;
            }
        }

        Ok(())
    }
}

fn is_path_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains('/') && !s.starts_with('.')
}

/// A tracked upstream source.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub name: String,
    /// Directory under `pool/<component>/` holding this channel's artifacts.
    pub subdir: String,
    /// Number of versions retained (per group for grouped channels).
    #[serde(default = "default_keep_latest")]
    pub keep_latest: usize,
    pub source: SourceConfig,
}

fn default_keep_latest() -> usize {
    1
}

/// How a channel discovers its latest artifact.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum SourceConfig {
    /// A URL that redirects to the latest artifact.
    DirectRedirect {
        url: String,
        /// Canonical filename. Placeholders: `{name}`, `{version}`, `{arch}`.
        #[serde(default)]
        filename_template: Option<String>,
    },

    /// The first qualifying asset of a GitHub-style releases listing.
    ReleaseAsset {
        /// `owner/repo`.
        repository: String,
        asset_suffix: String,
        #[serde(default)]
        asset_contains: Option<String>,
        #[serde(default = "default_true")]
        allow_prerelease: bool,
        #[serde(default)]
        filename_template: Option<String>,
        #[serde(default = "default_single_per_page")]
        per_page: usize,
    },

    /// Image/headers asset pairs of the newest release, grouped by CPU profile.
    GroupedAssets {
        repository: String,
        /// Groups (CPU profiles) to track. Other groups are ignored.
        groups: Vec<String>,
        patterns: Vec<AssetPatternConfig>,
        #[serde(default)]
        exclude_substrings: Vec<String>,
        #[serde(default)]
        meta_packages: Vec<MetaPackageConfig>,
        #[serde(default = "default_grouped_per_page")]
        per_page: usize,
    },
}

fn default_true() -> bool {
    true
}

fn default_single_per_page() -> usize {
    10
}

fn default_grouped_per_page() -> usize {
    5
}

/// One row of a grouped channel's filename pattern table.
///
/// The regex must capture `ver` and `group`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AssetPatternConfig {
    pub kind: AssetKind,
    pub regex: String,
}

/// An alias package depending on the newest concrete package of a group.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetaPackageConfig {
    /// Package name. Placeholder: `{group}`.
    pub name_template: String,
    /// Which half of the group the alias points at.
    pub target: AssetKind,
    #[serde(default = "default_meta_section")]
    pub section: String,
}

fn default_meta_section() -> String {
    "kernel".into()
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig {
            name: "discord".into(),
            subdir: "discord".into(),
            keep_latest: 1,
            source: SourceConfig::DirectRedirect {
                url: "https://discord.com/api/download?platform=linux&format=deb".into(),
                filename_template: Some("discord_{version}_{arch}.deb".into()),
            },
        },
        ChannelConfig {
            name: "freetube".into(),
            subdir: "freetube".into(),
            keep_latest: 1,
            source: SourceConfig::ReleaseAsset {
                repository: "FreeTubeApp/FreeTube".into(),
                asset_suffix: "amd64.deb".into(),
                asset_contains: None,
                allow_prerelease: true,
                filename_template: None,
                per_page: default_single_per_page(),
            },
        },
        ChannelConfig {
            name: "github-desktop".into(),
            subdir: "github-desktop".into(),
            keep_latest: 1,
            source: SourceConfig::ReleaseAsset {
                repository: "shiftkey/desktop".into(),
                asset_suffix: ".deb".into(),
                asset_contains: Some("amd64".into()),
                allow_prerelease: true,
                filename_template: Some("github-desktop_{version}_{arch}.deb".into()),
                per_page: default_single_per_page(),
            },
        },
        ChannelConfig {
            name: "redroot-kernels".into(),
            subdir: "redroot-kernels".into(),
            keep_latest: 3,
            source: SourceConfig::GroupedAssets {
                repository: "RedrootDEV/Debian-RedRoot".into(),
                groups: vec![
                    "znver3".into(),
                    "tigerlake".into(),
                    "x86-64-v3".into(),
                    "x86-64".into(),
                ],
                patterns: vec![
                    AssetPatternConfig {
                        kind: AssetKind::Image,
                        regex: r"^linux-image-(?P<ver>[^_]+)-tkg-redroot-(?P<group>[^_]+)_.*amd64\.deb$"
                            .into(),
                    },
                    AssetPatternConfig {
                        kind: AssetKind::Headers,
                        regex: r"^linux-headers-(?P<ver>[^_]+)-tkg-redroot-(?P<group>[^_]+)_.*amd64\.deb$"
                            .into(),
                    },
                ],
                exclude_substrings: vec!["-dbg".into(), "libc-dev".into()],
                meta_packages: vec![
                    MetaPackageConfig {
                        name_template: "linux-image-redroot-{group}".into(),
                        target: AssetKind::Image,
                        section: default_meta_section(),
                    },
                    MetaPackageConfig {
                        name_template: "linux-headers-redroot-{group}".into(),
                        target: AssetKind::Headers,
                        section: default_meta_section(),
                    },
                ],
                per_page: default_grouped_per_page(),
            },
        },
    ]
}

/// Expand `{key}` placeholders in a template.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}
