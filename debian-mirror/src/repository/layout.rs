// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Paths of the published repository tree. */

use {
    crate::{
        config::{ChannelConfig, MirrorConfig},
        error::{MirrorError, Result},
    },
    log::debug,
    std::path::{Path, PathBuf},
};

/// Resolves every path of the repository tree from configuration.
///
/// ```text
/// <root>/KEY.asc
/// <root>/dists/<distribution>/{Release,InRelease,Release.gpg}
/// <root>/dists/<distribution>/<component>/binary-<arch>/Packages{,.gz}
/// <root>/pool/<component>/<channel subdir>/<artifact>{,.sha256}
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepositoryLayout {
    root: PathBuf,
    distribution: String,
    component: String,
    architectures: Vec<String>,
    channel_subdirs: Vec<String>,
}

impl RepositoryLayout {
    pub fn new(config: &MirrorConfig) -> Self {
        Self {
            root: config.root.clone(),
            distribution: config.distribution.clone(),
            component: config.component.clone(),
            architectures: config.architectures.clone(),
            channel_subdirs: config.channels.iter().map(|c| c.subdir.clone()).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `pool/<component>`.
    pub fn pool_dir(&self) -> PathBuf {
        self.root.join("pool").join(&self.component)
    }

    pub fn channel_dir(&self, channel: &ChannelConfig) -> PathBuf {
        self.pool_dir().join(&channel.subdir)
    }

    /// `dists/<distribution>`.
    pub fn dist_dir(&self) -> PathBuf {
        self.root.join("dists").join(&self.distribution)
    }

    pub fn binary_dir(&self, arch: &str) -> PathBuf {
        self.dist_dir()
            .join(&self.component)
            .join(format!("binary-{}", arch))
    }

    pub fn release_path(&self) -> PathBuf {
        self.dist_dir().join("Release")
    }

    pub fn inrelease_path(&self) -> PathBuf {
        self.dist_dir().join("InRelease")
    }

    pub fn release_gpg_path(&self) -> PathBuf {
        self.dist_dir().join("Release.gpg")
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.root.join("KEY.asc")
    }

    /// Path relative to the repository root, with `/` separators.
    ///
    /// This is the form the `Filename` field of index entries uses.
    pub fn relative_to_root(&self, path: &Path) -> Result<String> {
        let rel = path.strip_prefix(&self.root).map_err(|_| {
            MirrorError::IndexBuild(format!(
                "{} is outside repository root {}",
                path.display(),
                self.root.display()
            ))
        })?;

        Ok(rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    /// Create every directory the repository needs.
    ///
    /// Failure here means nothing can be served and is reported as
    /// [MirrorError::Setup].
    pub fn ensure(&self) -> Result<()> {
        let dirs = self
            .architectures
            .iter()
            .map(|arch| self.binary_dir(arch))
            .chain(
                self.channel_subdirs
                    .iter()
                    .map(|subdir| self.pool_dir().join(subdir)),
            );

        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|e| {
                MirrorError::Setup(format!("creating {}: {}", dir.display(), e))
            })?;
            debug!("ensured directory {}", dir.display());
        }

        Ok(())
    }
}
