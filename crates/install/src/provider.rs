//! Artifact provider trait.
//!
//! A provider knows how to produce the binary from scratch, by downloading a
//! prebuilt release, compiling from source, or anything else. The installer
//! only sees a cancellable unit of work that emits progress events and ends in
//! success or failure.

use crate::Result;
use crate::event::ProgressSink;
use crate::platform::Platform;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Everything a provider needs to produce one binary.
#[derive(Debug, Clone)]
pub struct ProvideRequest {
    /// Working directory of the install.
    pub cwd: PathBuf,
    /// Where the binary must end up.
    pub install_path: PathBuf,
    /// File name of the binary.
    pub binary_name: String,
    /// Requested version.
    pub version: String,
    /// Target platform.
    pub platform: Platform,
    /// Options the installer does not interpret.
    pub extra: Map<String, Value>,
    /// Opens once the installer commits to this provider run.
    pub gate: BuildGate,
}

/// Permission for a provider run to produce output.
///
/// The installer starts the provider while it is still looking in the cache.
/// Until the gate opens a provider may prepare (resolve URLs, warm up
/// toolchains) but must not launch anything that can write the install path.
#[derive(Debug, Clone)]
pub struct BuildGate {
    rx: watch::Receiver<bool>,
}

impl BuildGate {
    /// A gate that is already open.
    #[must_use]
    pub fn opened() -> Self {
        let (_tx, rx) = watch::channel(true);
        Self { rx }
    }

    pub(crate) fn closed() -> (GateOpener, Self) {
        let (tx, rx) = watch::channel(false);
        (GateOpener(tx), Self { rx })
    }

    /// Whether the run may produce output now.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the gate to open.
    ///
    /// Returns `false` when the installer settled the run without this
    /// provider, e.g. by restoring from the cache.
    pub async fn wait(&self) -> bool {
        let mut rx = self.rx.clone();
        rx.wait_for(|open| *open).await.is_ok()
    }
}

/// Installer side of a [`BuildGate`]. Dropping it unopened releases waiters
/// with `false`.
#[derive(Debug)]
pub(crate) struct GateOpener(watch::Sender<bool>);

impl GateOpener {
    pub(crate) fn open(&self) {
        self.0.send_replace(true);
    }
}

/// Source of the binary when the cache cannot supply it.
#[async_trait]
pub trait ArtifactProvider: Send + Sync {
    /// Provider name, used in errors and logs.
    fn name(&self) -> &str;

    /// Version installed when the caller does not ask for one.
    fn default_version(&self) -> &str;

    /// Build-time flags the provider understands.
    fn build_flags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Base name of the binary, before platform suffix and rename.
    fn binary_name(&self) -> &str;

    /// Produce the binary at `request.install_path`.
    ///
    /// Implementations must wait for `request.gate` before writing to the
    /// install path or starting anything that might, and return
    /// [`crate::Error::Cancelled`] once `cancel` fires or the gate is
    /// released unopened. Nothing the provider started may outlive the
    /// returned future. The future may also be dropped at any await point.
    async fn provide(
        &self,
        request: ProvideRequest,
        events: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_opens_for_waiters() {
        let (opener, gate) = BuildGate::closed();
        assert!(!gate.is_open());
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait().await }
        });
        opener.open();
        assert!(waiter.await.unwrap());
        assert!(gate.is_open());
    }

    #[tokio::test]
    async fn dropped_opener_releases_waiters() {
        let (opener, gate) = BuildGate::closed();
        drop(opener);
        assert!(!gate.wait().await);
        assert!(BuildGate::opened().wait().await);
    }
}
