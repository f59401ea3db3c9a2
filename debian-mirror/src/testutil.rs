// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Fakes and fixtures shared by unit tests. */

use {
    crate::{
        control::ControlParagraph,
        deb::builder::DebBuilder,
        error::{MirrorError, Result},
        tool::{ToolInvocation, ToolOutput, ToolRunner},
        upstream::{
            github::{Release, ReleaseAsset},
            http::UpstreamClient,
        },
    },
    async_trait::async_trait,
    digest::Digest,
    futures::AsyncRead,
    std::{
        collections::HashMap,
        pin::Pin,
        sync::{Arc, Mutex, MutexGuard},
        thread::ThreadId,
    },
};

fn not_found(what: impl std::fmt::Display) -> MirrorError {
    MirrorError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} not served by fake upstream", what),
    ))
}

#[derive(Debug, Default)]
struct UpstreamState {
    redirects: HashMap<String, String>,
    releases: HashMap<String, Vec<Release>>,
    files: HashMap<String, Vec<u8>>,
    fetches: usize,
}

/// In-memory [UpstreamClient]. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct FakeUpstream {
    state: Arc<Mutex<UpstreamState>>,
}

impl FakeUpstream {
    fn state(&self) -> MutexGuard<'_, UpstreamState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_redirect(&self, from: &str, to: &str) {
        self.state().redirects.insert(from.to_string(), to.to_string());
    }

    /// Serve a releases listing, newest first.
    pub fn set_releases(&self, repository: &str, releases: Vec<Release>) {
        self.state()
            .releases
            .insert(repository.to_string(), releases);
    }

    pub fn add_file(&self, url: &str, data: Vec<u8>) {
        self.state().files.insert(url.to_string(), data);
    }

    pub fn remove_file(&self, url: &str) {
        self.state().files.remove(url);
    }

    /// Number of successful fetches.
    pub fn fetch_count(&self) -> usize {
        self.state().fetches
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn resolve_redirect(&self, url: &str) -> Result<String> {
        self.state()
            .redirects
            .get(url)
            .cloned()
            .ok_or_else(|| not_found(url))
    }

    async fn list_releases(&self, repository: &str, _per_page: usize) -> Result<Vec<Release>> {
        self.state()
            .releases
            .get(repository)
            .cloned()
            .ok_or_else(|| not_found(repository))
    }

    async fn fetch(&self, url: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let mut state = self.state();
        let data = state.files.get(url).cloned().ok_or_else(|| not_found(url))?;
        state.fetches += 1;

        Ok(Box::pin(futures::io::Cursor::new(data)))
    }
}

/// A published release whose assets download from `https://example.com/download/<tag>/<name>`.
pub fn release(tag: &str, asset_names: &[&str]) -> Release {
    Release {
        tag_name: Some(tag.to_string()),
        draft: false,
        prerelease: false,
        assets: Some(
            asset_names
                .iter()
                .map(|name| ReleaseAsset {
                    name: name.to_string(),
                    browser_download_url: Some(format!(
                        "https://example.com/download/{}/{}",
                        tag, name
                    )),
                    digest: None,
                    size: None,
                })
                .collect(),
        ),
    }
}

/// The detached signature [FakeGpg] produces over `data`.
fn fake_signature(data: &[u8]) -> Vec<u8> {
    format!(
        "-----BEGIN PGP SIGNATURE-----\n\n{}\n-----END PGP SIGNATURE-----\n",
        hex::encode(sha2::Sha256::digest(data))
    )
    .into_bytes()
}

/// Whether `signature` is a [FakeGpg] detached signature over `data`.
pub fn fake_signature_valid(data: &[u8], signature: &[u8]) -> bool {
    fake_signature(data) == signature
}

#[derive(Debug, Default)]
struct GpgState {
    invocations: Vec<ToolInvocation>,
    threads: Vec<ThreadId>,
    failing: bool,
}

/// A [ToolRunner] answering the `gpg` calls of the signer.
///
/// It holds a secret key for exactly one identity.
#[derive(Clone, Debug)]
pub struct FakeGpg {
    identity: String,
    state: Arc<Mutex<GpgState>>,
}

impl FakeGpg {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            state: Arc::new(Mutex::new(GpgState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, GpgState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every subsequent call fail.
    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.state().invocations.clone()
    }

    /// Threads each invocation ran on, in call order.
    pub fn invocation_threads(&self) -> Vec<ThreadId> {
        self.state().threads.clone()
    }

    fn failure(&self, message: &str) -> MirrorError {
        MirrorError::ToolFailed {
            program: "gpg".into(),
            status: "exit status: 2".into(),
            stderr: message.into(),
        }
    }
}

impl ToolRunner for FakeGpg {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        let failing = {
            let mut state = self.state();
            state.invocations.push(invocation.clone());
            state.threads.push(std::thread::current().id());
            state.failing
        };

        if failing {
            return Err(self.failure("gpg: signing failed: Inappropriate ioctl for device"));
        }

        let has = |flag: &str| invocation.args.iter().any(|a| a == flag);
        let last = invocation.args.last().map(|s| s.as_str()).unwrap_or_default();
        let local_user = invocation
            .args
            .iter()
            .skip_while(|a| *a != "--local-user")
            .nth(1)
            .map(|s| s.as_str());
        let stdin = invocation.stdin.clone().unwrap_or_default();

        let stdout = if has("--list-secret-keys") {
            if last != self.identity {
                return Err(self.failure("gpg: error reading key: No secret key"));
            }
            format!(
                "sec:u:255:22:0123456789ABCDEF:1700000000:::u:::scESC:::+:::ed25519:::0:\nuid:u::::1700000000::HASH::{}::::::::::0:\n",
                self.identity
            )
            .into_bytes()
        } else if has("--clearsign") || has("--detach-sign") {
            if local_user != Some(self.identity.as_str()) {
                return Err(self.failure("gpg: signing failed: No secret key"));
            }

            if has("--clearsign") {
                let mut out = b"-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\n".to_vec();
                out.extend_from_slice(&stdin);
                out.extend(fake_signature(&stdin));
                out
            } else {
                fake_signature(&stdin)
            }
        } else if has("--export") {
            if last == self.identity {
                format!(
                    "-----BEGIN PGP PUBLIC KEY BLOCK-----\n\n{}\n-----END PGP PUBLIC KEY BLOCK-----\n",
                    hex::encode(self.identity.as_bytes())
                )
                .into_bytes()
            } else {
                vec![]
            }
        } else {
            return Err(self.failure("gpg: unsupported invocation"));
        };

        Ok(ToolOutput {
            stdout,
            stderr: vec![],
        })
    }
}

/// A small but real `.deb` installing one documentation file.
pub fn tiny_deb(package: &str, version: &str, architecture: &str) -> Result<Vec<u8>> {
    let mut control = ControlParagraph::default();
    control.set_field_from_string("Package", package);
    control.set_field_from_string("Version", version);
    control.set_field_from_string("Architecture", architecture);
    control.set_field_from_string("Maintainer", "Test <test@example.com>");
    control.set_field_from_string("Description", format!("{} test package", package));

    DebBuilder::new(control)
        .install_file(
            format!("usr/share/doc/{}/README", package),
            format!("{} {}\n", package, version).into_bytes(),
            false,
        )
        .to_vec()
}
