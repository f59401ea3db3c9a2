// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Running external tools.

Components needing a subprocess (currently only signing) describe it as a
[ToolInvocation] and hand it to a [ToolRunner]. Tests substitute a fake
runner; [ProcessToolRunner] runs real processes through [duct].
*/

use {
    crate::error::{MirrorError, Result},
    duct::cmd,
    log::debug,
    std::time::{Duration, Instant},
};

/// A fully described subprocess call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Bytes fed to the process's stdin.
    pub stdin: Option<Vec<u8>>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl ToolInvocation {
    pub fn new(program: impl ToString) -> Self {
        Self {
            program: program.to_string(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.args.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    #[must_use]
    pub fn stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| a.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a successful tool run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs [ToolInvocation]s.
///
/// A non-zero exit is reported as [MirrorError::ToolFailed].
pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;
}

/// [ToolRunner] spawning real processes, killed after a timeout.
#[derive(Clone, Debug)]
pub struct ProcessToolRunner {
    timeout: Duration,
    poll_interval: Duration,
}

impl ProcessToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl ToolRunner for ProcessToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        debug!("running {}", invocation.command_line());

        let mut expression = cmd(&invocation.program, &invocation.args)
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        expression = match &invocation.stdin {
            Some(data) => expression.stdin_bytes(data.clone()),
            None => expression.stdin_null(),
        };
        for (key, value) in &invocation.env {
            expression = expression.env(key, value);
        }

        let handle = expression.start()?;
        let started = Instant::now();

        let output = loop {
            if let Some(output) = handle.try_wait()? {
                break output.clone();
            }

            if started.elapsed() >= self.timeout {
                handle.kill()?;
                return Err(MirrorError::ToolTimeout {
                    program: invocation.program.clone(),
                    timeout: self.timeout,
                });
            }

            std::thread::sleep(self.poll_interval);
        };

        if output.status.success() {
            Ok(ToolOutput {
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            Err(MirrorError::ToolFailed {
                program: invocation.program.clone(),
                status: format!("{}", output.status),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
