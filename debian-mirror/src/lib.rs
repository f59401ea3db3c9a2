// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mirror upstream release channels into a signed Debian repository.

This crate keeps a self-hosted APT repository in sync with a set of upstream
*channels*: a download endpoint that redirects to the newest build, GitHub
releases carrying a single `.deb`, and GitHub releases carrying families of
kernel packages grouped by CPU profile.

# A Tour of Functionality

Configuration is one immutable [config::MirrorConfig] value, typically
loaded from YAML, handed by reference to every component.

The [upstream] module discovers what is newest upstream. Each channel gets a
[upstream::SourceResolver] producing a [upstream::Resolution]. Network access
goes through the [upstream::http::UpstreamClient] trait, implemented with
`reqwest` by [upstream::http::HttpUpstreamClient].

The [pool] module materializes artifacts on disk. [pool::PoolManager]
downloads into staging files, writes a `.sha256` sibling for every artifact,
renames into place, and applies retention.

The [meta] module synthesizes meta-packages pinned to the newest concrete
package of each group. `.deb` files are built and read in-process by the
[deb] module; their `control` paragraphs are modeled by [control].

The [repository] module derives the published tree from the pool:
[repository::index::IndexBuilder] renders `Packages` indices and
[repository::release::ReleaseBuilder] signs (via a [signing::ReleaseSigner])
and publishes `Release`, `InRelease`, `Release.gpg` and `KEY.asc`.

[reconcile::Reconciler] ties everything together into the daemon's loop,
paced by a [reconcile::Scheduler].

Every file that becomes visible to repository clients is written to a
temporary name in its final directory and renamed into place.
*/

pub mod config;
pub mod control;
pub mod deb;
pub mod error;
pub mod io;
pub mod meta;
pub mod package_version;
pub mod pool;
pub mod reconcile;
pub mod repository;
pub mod signing;
pub mod tool;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testutil;
