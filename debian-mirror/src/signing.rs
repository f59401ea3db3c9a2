// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! PGP signing of release manifests.

Signing keys are provisioned outside this crate and live in a GnuPG
keyring. [GpgSigner] drives `gpg` through a [ToolRunner]; all inputs are
passed on stdin and all outputs are read from stdout, so callers decide
where (and how atomically) results land on disk.
*/

use {
    crate::{
        config::MirrorConfig,
        error::{MirrorError, Result},
        tool::{ToolInvocation, ToolRunner},
    },
    log::{debug, info},
    std::{path::PathBuf, sync::Arc},
};

/// Produces the signature artifacts of a release manifest.
pub trait ReleaseSigner: Send + Sync {
    /// Human readable signing identity.
    fn identity(&self) -> &str;

    /// Ensure a secret key for the identity is available.
    ///
    /// Reports [MirrorError::Setup] when it is not.
    fn check_identity(&self) -> Result<()>;

    /// Produce an `InRelease` style document: the content plus an inline signature.
    fn clearsign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Produce an ASCII armored detached signature over the content.
    fn detach_sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// ASCII armored public key of the identity.
    fn export_public_key(&self) -> Result<Vec<u8>>;
}

/// [ReleaseSigner] backed by the `gpg` command.
pub struct GpgSigner {
    identity: String,
    gnupg_home: Option<PathBuf>,
    program: String,
    runner: Arc<dyn ToolRunner>,
}

impl GpgSigner {
    pub fn new(identity: impl ToString, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            identity: identity.to_string(),
            gnupg_home: None,
            program: "gpg".to_string(),
            runner,
        }
    }

    pub fn from_config(config: &MirrorConfig, runner: Arc<dyn ToolRunner>) -> Self {
        let mut signer = Self::new(&config.signing_identity, runner);
        signer.gnupg_home = config.gnupg_home.clone();
        signer
    }

    fn invocation(&self) -> ToolInvocation {
        let invocation = ToolInvocation::new(&self.program).args(["--batch", "--yes"]);

        match &self.gnupg_home {
            Some(home) => invocation.env("GNUPGHOME", home.display()),
            None => invocation,
        }
    }

    fn sign(&self, mode: &str, data: &[u8]) -> Result<Vec<u8>> {
        let invocation = self
            .invocation()
            .args(["--pinentry-mode", "loopback", "--armor", "--local-user"])
            .arg(&self.identity)
            .args(["--digest-algo", "SHA512", "--output", "-", mode])
            .stdin(data.to_vec());

        debug!("signing {} bytes with {} ({})", data.len(), self.identity, mode);

        let output = self
            .runner
            .run(&invocation)
            .map_err(|e| MirrorError::Signing(format!("gpg {} failed: {}", mode, e)))?;

        if output.stdout.is_empty() {
            return Err(MirrorError::Signing(format!("gpg {} produced no output", mode)));
        }

        Ok(output.stdout)
    }
}

impl ReleaseSigner for GpgSigner {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn check_identity(&self) -> Result<()> {
        let invocation = self
            .invocation()
            .args(["--with-colons", "--list-secret-keys"])
            .arg(&self.identity);

        let output = self.runner.run(&invocation).map_err(|e| {
            MirrorError::Setup(format!(
                "no secret key for signing identity {}: {}",
                self.identity, e
            ))
        })?;

        if !String::from_utf8_lossy(&output.stdout)
            .lines()
            .any(|line| line.starts_with("sec:"))
        {
            return Err(MirrorError::Setup(format!(
                "no secret key for signing identity {}",
                self.identity
            )));
        }

        info!("signing identity {} is available", self.identity);

        Ok(())
    }

    fn clearsign(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.sign("--clearsign", data)
    }

    fn detach_sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.sign("--detach-sign", data)
    }

    fn export_public_key(&self) -> Result<Vec<u8>> {
        let invocation = self
            .invocation()
            .args(["--armor", "--export"])
            .arg(&self.identity);

        let output = self
            .runner
            .run(&invocation)
            .map_err(|e| MirrorError::Signing(format!("gpg --export failed: {}", e)))?;

        // gpg exits 0 with empty output for unknown identities.
        if output.stdout.is_empty() {
            return Err(MirrorError::Signing(format!(
                "no public key exported for {}",
                self.identity
            )));
        }

        Ok(output.stdout)
    }
}
