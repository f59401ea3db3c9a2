// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::package_version::VersionError, std::time::Duration, thiserror::Error};

/// Primary crate error type.
///
/// The first block of variants is the failure taxonomy the reconciliation loop
/// acts on. The remaining variants wrap lower-level failures.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("resolution error for {channel}: {message}")]
    Resolution { channel: String, message: String },

    #[error("no qualifying release asset for {channel} in {scanned} release(s)")]
    AssetNotFound { channel: String, scanned: usize },

    #[error("download error for {filename}: {message}")]
    Download { filename: String, message: String },

    #[error("pool consistency error in {channel}: {message}")]
    PoolConsistency { channel: String, message: String },

    #[error("index build error: {0}")]
    IndexBuild(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("setup error: {0}")]
    Setup(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("HTTP error: {0:?}")]
    Http(#[from] reqwest::Error),

    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("JSON error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0:?}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("regular expression error: {0:?}")]
    Regex(#[from] regex::Error),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("control file parse error: {0}")]
    ControlParse(String),

    #[error("required field missing in control paragraph: {0}")]
    ControlRequiredFieldMissing(&'static str),

    #[error("unknown compression in deb archive member: {0}")]
    DebUnknownCompression(String),

    #[error("no control file in deb archive {0}")]
    DebNoControl(String),

    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} did not finish within {timeout:?}")]
    ToolTimeout { program: String, timeout: Duration },
}

impl MirrorError {
    /// Whether the error should stop the daemon rather than just the current step.
    pub fn is_fatal_to_process(&self) -> bool {
        matches!(self, Self::Setup(_))
    }

    pub(crate) fn io_path(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        Self::IoPath(format!("{}", path.as_ref().display()), err)
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, MirrorError>;
