// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filename pattern tables for grouped channels.

Each row maps a regular expression to an [AssetKind]. Expressions capture
the version as `ver` and the group tag as `group`. Supporting a new upstream
naming convention means adding rows, not code.
*/

use {
    crate::{
        config::AssetPatternConfig,
        error::{MirrorError, Result},
    },
    regex::Regex,
    serde::{Deserialize, Serialize},
    std::fmt::{Display, Formatter},
};

/// Half of a companion asset pair.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Headers,
}

impl AssetKind {
    pub fn all() -> &'static [AssetKind] {
        &[Self::Image, Self::Headers]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Headers => "headers",
        }
    }
}

impl Display for AssetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields extracted from a filename.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetMatch {
    pub kind: AssetKind,
    pub version: String,
    pub group: String,
}

#[derive(Clone, Debug)]
struct AssetPattern {
    kind: AssetKind,
    regex: Regex,
}

/// An ordered set of filename patterns, one per [AssetKind].
#[derive(Clone, Debug)]
pub struct AssetPatternTable {
    patterns: Vec<AssetPattern>,
}

impl AssetPatternTable {
    /// Compile a table, requiring exactly one pattern per kind.
    pub fn from_config(rows: &[AssetPatternConfig]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(rows.len());

        for row in rows {
            let regex = Regex::new(&row.regex)?;

            for capture in ["ver", "group"] {
                if !regex.capture_names().flatten().any(|name| name == capture) {
                    return Err(MirrorError::Config(format!(
                        "{} pattern {} lacks a `{}` capture",
                        row.kind, row.regex, capture
                    )));
                }
            }

            if patterns.iter().any(|p: &AssetPattern| p.kind == row.kind) {
                return Err(MirrorError::Config(format!(
                    "more than one {} pattern",
                    row.kind
                )));
            }

            patterns.push(AssetPattern {
                kind: row.kind,
                regex,
            });
        }

        for kind in AssetKind::all() {
            if !patterns.iter().any(|p| p.kind == *kind) {
                return Err(MirrorError::Config(format!("no {} pattern", kind)));
            }
        }

        Ok(Self { patterns })
    }

    /// Kinds a complete group must contain.
    pub fn kinds(&self) -> impl Iterator<Item = AssetKind> + '_ {
        self.patterns.iter().map(|p| p.kind)
    }

    /// Match a filename against the table. The first matching row wins.
    pub fn match_name(&self, name: &str) -> Option<AssetMatch> {
        self.patterns.iter().find_map(|pattern| {
            let captures = pattern.regex.captures(name)?;

            Some(AssetMatch {
                kind: pattern.kind,
                version: captures.name("ver")?.as_str().to_string(),
                group: captures.name("group")?.as_str().to_string(),
            })
        })
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::config::MirrorConfig, crate::config::SourceConfig};

    fn kernel_table() -> Result<AssetPatternTable> {
        let config = MirrorConfig::default();
        match config.channel("redroot-kernels").map(|c| &c.source) {
            Some(SourceConfig::GroupedAssets { patterns, .. }) => {
                AssetPatternTable::from_config(patterns)
            }
            _ => Err(MirrorError::Config("missing kernel channel".into())),
        }
    }

    #[test]
    fn kernel_names() -> Result<()> {
        let table = kernel_table()?;

        assert_eq!(
            table.match_name("linux-image-6.16.3-tkg-redroot-znver3_6.16.3-1_amd64.deb"),
            Some(AssetMatch {
                kind: AssetKind::Image,
                version: "6.16.3".into(),
                group: "znver3".into(),
            })
        );
        assert_eq!(
            table.match_name("linux-headers-6.16.3-tkg-redroot-x86-64-v3_6.16.3-1_amd64.deb"),
            Some(AssetMatch {
                kind: AssetKind::Headers,
                version: "6.16.3".into(),
                group: "x86-64-v3".into(),
            })
        );
        assert_eq!(
            table.match_name("linux-image-redroot-znver3_6.16.3_amd64.deb"),
            None
        );
        assert_eq!(
            table.match_name("linux-image-6.16.3-tkg-redroot-znver3_6.16.3-1_arm64.deb"),
            None
        );

        Ok(())
    }

    #[test]
    fn rejects_incomplete_tables() {
        let image = AssetPatternConfig {
            kind: AssetKind::Image,
            regex: "^(?P<ver>.+)-(?P<group>.+)$".into(),
        };

        assert!(AssetPatternTable::from_config(&[image.clone()]).is_err());
        assert!(AssetPatternTable::from_config(&[image.clone(), image.clone()]).is_err());
        assert!(AssetPatternTable::from_config(&[
            image,
            AssetPatternConfig {
                kind: AssetKind::Headers,
                regex: "^(?P<ver>.+)$".into(),
            }
        ])
        .is_err());
    }
}
