// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version strings and their ordering.

Pool pruning and meta-package synthesis rank versions parsed out of upstream
file names. Those strings are not always policy compliant, so besides the
strict [PackageVersion] type this module offers [compare_versions()], a total
order over arbitrary strings in which malformed values rank below every
well-formed version.
*/

use {
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        num::ParseIntError,
        str::FromStr,
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Error)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,

    #[error("error parsing epoch to integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component is empty or does not start with a digit: {0}")]
    UpstreamVersionLeadingChar(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),
}

pub type Result<T> = std::result::Result<T, VersionError>;

/// A Debian package version.
///
/// The format is `[epoch:]upstream_version[-debian_revision]`. Ordering follows
/// <https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>, so
/// equality is ordering equality: `1.0` equals `0:1.0-0`.
#[derive(Clone, Debug)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

impl PackageVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        let (epoch, remainder) = match s.find(':') {
            Some(pos) => (Some(&s[0..pos]), &s[pos + 1..]),
            None => (None, s),
        };

        let (upstream, debian) = match remainder.rfind('-') {
            Some(pos) => (&remainder[0..pos], Some(&remainder[pos + 1..])),
            None => (remainder, None),
        };

        let epoch = if let Some(epoch) = epoch {
            if epoch.is_empty() || !epoch.chars().all(|c| c.is_ascii_digit()) {
                return Err(VersionError::EpochNonNumeric(s.to_string()));
            }

            Some(u32::from_str(epoch)?)
        } else {
            None
        };

        if !upstream.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(VersionError::UpstreamVersionLeadingChar(s.to_string()));
        }

        // Hyphens are only legal in upstream_version when a debian_revision follows.
        if !upstream.chars().all(|c| match c {
            c if c.is_ascii_alphanumeric() => true,
            '.' | '+' | '~' => true,
            '-' => debian.is_some(),
            _ => false,
        }) {
            return Err(VersionError::UpstreamVersionIllegalChar(s.to_string()));
        }

        let debian_revision = if let Some(debian) = debian {
            if debian.is_empty()
                || !debian
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '~'))
            {
                return Err(VersionError::DebianRevisionIllegalChar(s.to_string()));
            }

            Some(debian.to_string())
        } else {
            None
        };

        Ok(Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision,
        })
    }

    /// The `epoch` component, if present in the source string.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// The epoch with the implicit default of `0` applied.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    pub fn debian_revision(&self) -> Option<&str> {
        self.debian_revision.as_deref()
    }
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }
        f.write_str(&self.upstream_version)?;
        if let Some(revision) = &self.debian_revision {
            write!(f, "-{}", revision)?;
        }

        Ok(())
    }
}

/// Weight of a non-digit character in the lexical part of a comparison.
///
/// Tilde sorts before everything, even the end of the string. Letters sort
/// before all other non-digit characters.
fn char_order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

/// Compare a version component string using Debian rules.
///
/// Alternates between a lexical comparison of the leading non-digit run and a
/// numeric comparison of the following digit run until a difference is found.
fn compare_component(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let ac = char_order(a.get(i).copied());
            let bc = char_order(b.get(j).copied());

            if ac != bc {
                return ac.cmp(&bc);
            }

            i += 1;
            j += 1;
        }

        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }

        // Digit runs are compared without converting to integers so arbitrarily
        // long runs cannot overflow. A longer run wins, otherwise the first
        // differing digit decides.
        let mut first_diff = Ordering::Equal;
        while i < a.len() && a[i].is_ascii_digit() && j < b.len() && b[j].is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }

        if i < a.len() && a[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }

    Ordering::Equal
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // The absence of a debian revision is equivalent to `0`.
        self.epoch_assumed()
            .cmp(&other.epoch_assumed())
            .then_with(|| compare_component(&self.upstream_version, &other.upstream_version))
            .then_with(|| {
                compare_component(
                    self.debian_revision.as_deref().unwrap_or("0"),
                    other.debian_revision.as_deref().unwrap_or("0"),
                )
            })
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

/// Compare two version strings with Debian semantics.
///
/// Strings that fail to parse rank below every valid version. Two malformed
/// strings are ordered byte-wise so the result stays a total order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (PackageVersion::parse(a), PackageVersion::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Sort and deduplicate version strings in ascending order.
pub fn sort_versions<'a>(versions: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    let mut versions = versions.into_iter().collect::<Vec<_>>();
    versions.sort_by(|a, b| compare_versions(a, b));
    versions.dedup_by(|a, b| compare_versions(a, b) == Ordering::Equal);
    versions
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() -> Result<()> {
        let v = PackageVersion::parse("1:4.7.0+dfsg1-2")?;
        assert_eq!(v.epoch(), Some(1));
        assert_eq!(v.upstream_version(), "4.7.0+dfsg1");
        assert_eq!(v.debian_revision(), Some("2"));

        let v = PackageVersion::parse("3.3.2.final~github")?;
        assert_eq!(v.epoch(), None);
        assert_eq!(v.upstream_version(), "3.3.2.final~github");
        assert_eq!(v.debian_revision(), None);

        let v = PackageVersion::parse("6.6.8-tkg-1")?;
        assert_eq!(v.upstream_version(), "6.6.8-tkg");
        assert_eq!(v.debian_revision(), Some("1"));

        Ok(())
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(PackageVersion::parse("").is_err());
        assert!(PackageVersion::parse("a:1.0").is_err());
        assert!(PackageVersion::parse("beta").is_err());
        assert!(PackageVersion::parse("1.0_2").is_err());
        assert!(PackageVersion::parse("1.0-").is_err());
    }

    #[test]
    fn format() -> Result<()> {
        for s in ["1:4.7.0+dfsg1-2", "3.3.2.final~github", "0.18.0+dfsg-2+b1"] {
            assert_eq!(PackageVersion::parse(s)?.to_string(), s);
        }

        Ok(())
    }

    #[test]
    fn test_compare_component() {
        assert_eq!(
            compare_component("1.0~beta1~svn1245", "1.0~beta1"),
            Ordering::Less
        );
        assert_eq!(compare_component("1.0~beta1", "1.0"), Ordering::Less);
        assert_eq!(compare_component("1.0", "1.0a"), Ordering::Less);
        assert_eq!(compare_component("1.0a", "1.0+"), Ordering::Less);
        assert_eq!(compare_component("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_component("1.010", "1.10"), Ordering::Equal);
        assert_eq!(compare_component("~~", "~~a"), Ordering::Less);
        assert_eq!(compare_component("~", ""), Ordering::Less);
        assert_eq!(
            compare_component("99999999999999999999999", "1"),
            Ordering::Greater
        );
    }

    #[test]
    fn epoch_dominates() -> Result<()> {
        assert!(PackageVersion::parse("1:0.1")? > PackageVersion::parse("9.9")?);
        assert_eq!(
            PackageVersion::parse("0:1.0-0")?,
            PackageVersion::parse("1.0")?
        );

        Ok(())
    }

    #[test]
    fn sorting_shuffled_reproduces_known_order() {
        let ascending = [
            "~rc1",
            "0.9",
            "1.0~alpha",
            "1.0~beta1~svn1245",
            "1.0~beta1",
            "1.0",
            "1.0-1",
            "1.0-1+b1",
            "1.0a",
            "1.0.1",
            "1.2",
            "1.10",
            "6.6.8-tkg-1",
            "6.10.2-tkg-1",
            "1:0.1",
        ];
        let shuffled = [
            ascending[7],
            ascending[13],
            ascending[0],
            ascending[10],
            ascending[3],
            ascending[14],
            ascending[5],
            ascending[1],
            ascending[12],
            ascending[8],
            ascending[2],
            ascending[11],
            ascending[6],
            ascending[4],
            ascending[9],
        ];

        assert_eq!(sort_versions(shuffled), ascending.to_vec());
    }

    #[test]
    fn compare_is_antisymmetric_and_transitive() {
        let values = ["0.9", "1.0~rc1", "1.0", "1.0-2", "2.0", "garbage", "~x", "zz"];

        for a in values {
            for b in values {
                assert_eq!(compare_versions(a, b), compare_versions(b, a).reverse());

                for c in values {
                    if compare_versions(a, b) != Ordering::Greater
                        && compare_versions(b, c) != Ordering::Greater
                    {
                        assert_ne!(compare_versions(a, c), Ordering::Greater, "{a} {b} {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn malformed_ranks_lowest() {
        assert_eq!(compare_versions("garbage", "0.0.1"), Ordering::Less);
        assert_eq!(compare_versions("0.0.1", ""), Ordering::Greater);
        assert_eq!(sort_versions(["2.0", "x", "1.0", "2.0"]), vec!["x", "1.0", "2.0"]);
    }
}
