// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Release listing models for the GitHub REST API.

Only the fields the resolvers consume are modeled. Unknown fields are
ignored and missing optional fields default, matching how loosely the API
populates them.
*/

use {once_cell::sync::Lazy, regex::Regex, serde::Deserialize};

/// Dotted numeric version token, e.g. `0.0.76` or `1.2`.
static VERSION_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]+\.[0-9]+(?:\.[0-9]+)*)").expect("static regex should compile")
});

/// One entry of `GET /repos/{owner}/{repo}/releases`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Release {
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Option<Vec<ReleaseAsset>>,
}

impl Release {
    pub fn assets(&self) -> &[ReleaseAsset] {
        self.assets.as_deref().unwrap_or(&[])
    }

    /// Version of an asset of this release.
    ///
    /// The tag with a leading `v` removed, else the first dotted numeric token
    /// of the asset name, else `0`.
    pub fn version_for_asset(&self, asset_name: &str) -> String {
        let tag = self.tag_name.as_deref().unwrap_or("").trim_start_matches('v');

        if !tag.is_empty() {
            tag.to_string()
        } else {
            find_version_token(asset_name).unwrap_or_else(|| "0".to_string())
        }
    }
}

/// A downloadable file attached to a release.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ReleaseAsset {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub browser_download_url: Option<String>,
    /// Content digest as `<algorithm>:<hex>`, when the API advertises one.
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl ReleaseAsset {
    /// Lowercase hex SHA-256 advertised for this asset, if any.
    pub fn sha256(&self) -> Option<String> {
        let (algorithm, value) = self.digest.as_deref()?.split_once(':')?;

        if algorithm.eq_ignore_ascii_case("sha256")
            && value.len() == 64
            && value.chars().all(|c| c.is_ascii_hexdigit())
        {
            Some(value.to_ascii_lowercase())
        } else {
            None
        }
    }
}

/// Find the first dotted numeric version token in a string.
pub fn find_version_token(s: &str) -> Option<String> {
    VERSION_TOKEN
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
