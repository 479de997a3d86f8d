//! Provider that builds the binary by running an external command.

use crate::event::ProgressSink;
use crate::provider::{ArtifactProvider, ProvideRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Environment variable holding the path the command must write.
///
/// This is a scratch location; the file is moved onto the install path once
/// the command has exited successfully.
pub const INSTALL_PATH_ENV: &str = "BINCACHE_INSTALL_PATH";
/// Environment variable holding the requested version.
pub const VERSION_ENV: &str = "BINCACHE_VERSION";
/// Environment variable holding the target platform (`os-arch`).
pub const PLATFORM_ENV: &str = "BINCACHE_PLATFORM";

/// Lines of stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Builds the binary with a user-supplied command.
///
/// The command runs in the install's working directory once the installer
/// opens the [`BuildGate`](crate::BuildGate), and must leave a file at
/// `$BINCACHE_INSTALL_PATH`. Each stdout line becomes a `build:output` event.
///
/// The command writes into a scratch directory next to the install path, so
/// processes it leaves behind after a cancellation cannot touch the installed
/// binary.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
    binary_name: String,
    default_version: String,
    build_flags: Vec<String>,
}

impl CommandProvider {
    /// A provider running `program args...` to produce `binary_name`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, binary_name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            binary_name: binary_name.into(),
            default_version: "latest".to_string(),
            build_flags: Vec::new(),
        }
    }

    /// Set the version used when none is requested.
    #[must_use]
    pub fn with_default_version(mut self, version: impl Into<String>) -> Self {
        self.default_version = version.into();
        self
    }

    /// Advertise build-time flags.
    #[must_use]
    pub fn with_build_flags(mut self, flags: Vec<String>) -> Self {
        self.build_flags = flags;
        self
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn fail(&self, message: impl Into<String>) -> Error {
        Error::provider(self.name(), message)
    }
}

#[async_trait]
impl ArtifactProvider for CommandProvider {
    fn name(&self) -> &str {
        "command"
    }

    fn default_version(&self) -> &str {
        &self.default_version
    }

    fn build_flags(&self) -> Vec<String> {
        self.build_flags.clone()
    }

    fn binary_name(&self) -> &str {
        &self.binary_name
    }

    async fn provide(
        &self,
        request: ProvideRequest,
        events: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            opened = request.gate.wait() => if !opened {
                debug!("Build not needed, command not started");
                return Err(Error::Cancelled);
            },
        }
        let command_line = self.command_line();
        info!(command = %command_line, version = %request.version, "Building binary");
        events.emit("build:start", json!({ "command": command_line }));

        let scratch = tempfile::Builder::new()
            .prefix(".bincache-build-")
            .tempdir_in(&request.cwd)
            .map_err(|e| Error::io(e, &request.cwd, "create_build_dir"))?;
        let output = scratch.path().join(&request.binary_name);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&request.cwd)
            .env(INSTALL_PATH_ENV, &output)
            .env(VERSION_ENV, &request.version)
            .env(PLATFORM_ENV, request.platform.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| self.fail(format!("failed to spawn '{command_line}': {e}")))?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Build cancelled, killing command");
                        let _ = child.kill().await;
                        return Err(Error::Cancelled);
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => events.emit("build:output", json!({ "line": line })),
                        Ok(None) => break,
                        Err(e) => return Err(Error::io_no_path(e, "read_build_output")),
                    }
                }
            }
        }

        let status = tokio::select! {
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Cancelled);
            }
            status = child.wait() => status.map_err(|e| Error::io_no_path(e, "wait_build"))?,
        };

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            warn!(%status, "Build command failed");
            return Err(self.fail(format!(
                "'{command_line}' exited with {status}{}",
                if tail.is_empty() {
                    String::new()
                } else {
                    format!(":\n{}", tail.join("\n"))
                }
            )));
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let produced = tokio::fs::metadata(&output)
            .await
            .is_ok_and(|m| m.is_file());
        if !produced {
            return Err(self.fail(format!(
                "'{command_line}' did not produce ${INSTALL_PATH_ENV}"
            )));
        }
        tokio::fs::rename(&output, &request.install_path)
            .await
            .map_err(|e| Error::io(e, &request.install_path, "rename"))?;

        events.emit(
            "build:complete",
            json!({ "path": request.install_path.display().to_string() }),
        );
        Ok(())
    }
}
