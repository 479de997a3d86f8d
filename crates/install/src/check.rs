//! Installed-binary health check.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Default deadline for the version probe.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(8);

/// Argument passed to the binary to probe it.
pub const VERSION_PROBE_ARG: &str = "--version";

/// Options for [`check_binary`].
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Kill the probe and fail after this long.
    pub timeout: Duration,
    /// The single argument passed to the binary.
    pub probe_arg: String,
    /// Working directory for the probe.
    pub current_dir: Option<PathBuf>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CHECK_TIMEOUT,
            probe_arg: VERSION_PROBE_ARG.to_string(),
            current_dir: None,
        }
    }
}

impl CheckOptions {
    /// Override the deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the probe from `dir`.
    #[must_use]
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// Run `path <probe_arg>` and succeed only on a zero exit within the deadline.
///
/// Output is discarded; only the exit status matters. Dropping the returned
/// future kills the probe.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn check_binary(path: &Path, options: &CheckOptions) -> Result<()> {
    let start = Instant::now();
    debug!(path = %path.display(), timeout = ?options.timeout, "Checking binary");

    let mut cmd = Command::new(path);
    cmd.arg(&options.probe_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &options.current_dir {
        cmd.current_dir(dir);
    }

    let status = match timeout(options.timeout, cmd.status()).await {
        Ok(Ok(status)) => status,
        Ok(Err(io_error)) => {
            return Err(Error::health_check(
                path,
                format!("failed to execute: {io_error}"),
            ));
        }
        Err(_elapsed) => {
            warn!(path = %path.display(), "Binary check timed out after {:?}", options.timeout);
            return Err(Error::timeout("binary check", options.timeout));
        }
    };

    if status.success() {
        debug!(elapsed_ms = start.elapsed().as_millis(), "Binary check passed");
        Ok(())
    } else {
        warn!(path = %path.display(), code = ?status.code(), "Binary check failed");
        Err(Error::health_check(path, format!("exited with {status}")))
    }
}
