//! Progress events emitted by an install run.

use crate::Error;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// The step of an install run that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Validating the install target before any work.
    Target,
    /// Looking the binary up in the cache.
    SearchCache,
    /// Restoring the binary from a cache entry.
    RestoreCache,
    /// Running the installed binary's version probe.
    CheckBinary,
    /// Producing the binary through the artifact provider.
    Build,
    /// Writing the freshly built binary to the cache.
    WriteCache,
}

impl Phase {
    /// Wire identifier of the phase.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Target => "install-target",
            Self::SearchCache => "search-cache",
            Self::RestoreCache => "restore-cache",
            Self::CheckBinary => "check-binary",
            Self::Build => "build",
            Self::WriteCache => "write-cache",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error tagged with the phase that produced it.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("[{phase}] {error}")]
pub struct PhaseError {
    /// Phase the error came from.
    pub phase: Phase,
    /// The underlying error.
    #[source]
    #[diagnostic_source]
    pub error: Error,
}

impl PhaseError {
    /// Tag `error` with `phase`.
    #[must_use]
    pub fn new(phase: Phase, error: Error) -> Self {
        Self { phase, error }
    }

    /// Classification code of the underlying error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}

/// Opaque event emitted by an artifact provider and relayed verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEvent {
    /// Provider-chosen identifier.
    pub id: String,
    /// Provider-chosen payload.
    pub data: Value,
}

/// One step of the install narrative.
#[derive(Debug)]
pub enum ProgressEvent {
    /// The cache was consulted.
    SearchCache {
        /// Whether a compatible entry was found.
        found: bool,
        /// Location of the entry when found.
        path: Option<PathBuf>,
    },
    /// Restore from the cache started.
    RestoreCache,
    /// Restore from the cache finished.
    RestoreCacheComplete,
    /// Restore from the cache failed; a build follows.
    RestoreCacheFail(PhaseError),
    /// The installed binary is being probed.
    CheckBinary,
    /// The probe succeeded.
    CheckBinaryComplete,
    /// The probe failed; a build follows.
    CheckBinaryFail(PhaseError),
    /// Caching the built binary started.
    WriteCache {
        /// Size of the installed binary, when it could be read.
        size: Option<u64>,
    },
    /// The built binary was cached.
    WriteCacheComplete,
    /// Caching failed. The install itself still succeeded.
    WriteCacheFail(PhaseError),
    /// Pass-through from the artifact provider.
    Provider(ProviderEvent),
}

impl ProgressEvent {
    /// Wire identifier of the event.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::SearchCache { .. } => "search-cache",
            Self::RestoreCache => "restore-cache",
            Self::RestoreCacheComplete => "restore-cache:complete",
            Self::RestoreCacheFail(_) => "restore-cache:fail",
            Self::CheckBinary => "check-binary",
            Self::CheckBinaryComplete => "check-binary:complete",
            Self::CheckBinaryFail(_) => "check-binary:fail",
            Self::WriteCache { .. } => "write-cache",
            Self::WriteCacheComplete => "write-cache:complete",
            Self::WriteCacheFail(_) => "write-cache:fail",
            Self::Provider(event) => &event.id,
        }
    }

    /// Phase the run is in once this event has been emitted.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::SearchCache { .. } => Phase::SearchCache,
            Self::RestoreCache | Self::RestoreCacheComplete => Phase::RestoreCache,
            Self::CheckBinary | Self::CheckBinaryComplete => Phase::CheckBinary,
            // Every failure before the cache write falls back to a build.
            Self::RestoreCacheFail(_) | Self::CheckBinaryFail(_) | Self::Provider(_) => Phase::Build,
            Self::WriteCache { .. } | Self::WriteCacheComplete | Self::WriteCacheFail(_) => {
                Phase::WriteCache
            }
        }
    }

    /// The error carried by a `:fail` event.
    #[must_use]
    pub fn error(&self) -> Option<&PhaseError> {
        match self {
            Self::RestoreCacheFail(e) | Self::CheckBinaryFail(e) | Self::WriteCacheFail(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}

/// An item of the install event stream.
#[derive(Debug)]
pub enum InstallEvent {
    /// Progress along the way.
    Progress(ProgressEvent),
    /// Terminal: the binary is installed.
    Completed,
    /// Terminal: the install failed.
    Failed(PhaseError),
}

impl InstallEvent {
    /// Whether this is a terminal signal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// Channel handed to an artifact provider for its progress events.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    inner: mpsc::UnboundedSender<ProviderEvent>,
}

impl ProgressSink {
    /// Wrap a raw sender.
    #[must_use]
    pub fn new(inner: mpsc::UnboundedSender<ProviderEvent>) -> Self {
        Self { inner }
    }

    /// A sink paired with its receiving end.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProviderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Emit an event with a payload. Events sent after the run ended are dropped.
    pub fn emit(&self, id: impl Into<String>, data: Value) {
        let _ = self.inner.send(ProviderEvent {
            id: id.into(),
            data,
        });
    }

    /// Emit an event without a payload.
    pub fn emit_id(&self, id: impl Into<String>) {
        self.emit(id, Value::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_ids_match_wire_names() {
        let ids: Vec<_> = [
            ProgressEvent::SearchCache {
                found: false,
                path: None,
            },
            ProgressEvent::RestoreCache,
            ProgressEvent::RestoreCacheComplete,
            ProgressEvent::CheckBinary,
            ProgressEvent::CheckBinaryComplete,
            ProgressEvent::WriteCache { size: Some(1) },
            ProgressEvent::WriteCacheComplete,
        ]
        .iter()
        .map(|e| e.id().to_string())
        .collect();
        assert_eq!(
            ids,
            [
                "search-cache",
                "restore-cache",
                "restore-cache:complete",
                "check-binary",
                "check-binary:complete",
                "write-cache",
                "write-cache:complete",
            ]
        );
    }

    #[test]
    fn fail_events_carry_phase_tagged_errors() {
        let event = ProgressEvent::CheckBinaryFail(PhaseError::new(
            Phase::CheckBinary,
            Error::health_check("/bin/x", "exit 1"),
        ));
        assert_eq!(event.id(), "check-binary:fail");
        let err = event.error().unwrap();
        assert_eq!(err.phase, Phase::CheckBinary);
        assert!(err.to_string().starts_with("[check-binary]"));
    }

    #[test]
    fn provider_events_pass_through_their_id() {
        let event = ProgressEvent::Provider(ProviderEvent {
            id: "download:progress".into(),
            data: json!({"percent": 50}),
        });
        assert_eq!(event.id(), "download:progress");
        assert!(event.error().is_none());
    }

    #[tokio::test]
    async fn sink_delivers_in_order() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.emit_id("a");
        sink.emit("b", json!(1));
        drop(sink);
        assert_eq!(rx.recv().await.unwrap().id, "a");
        assert_eq!(rx.recv().await.unwrap().data, json!(1));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn failures_move_the_run_to_build() {
        let fail = ProgressEvent::RestoreCacheFail(PhaseError::new(
            Phase::RestoreCache,
            Error::invalid_cache("empty"),
        ));
        assert_eq!(ProgressEvent::RestoreCache.phase(), Phase::RestoreCache);
        assert_eq!(fail.phase(), Phase::Build);
        assert_eq!(ProgressEvent::WriteCache { size: None }.phase(), Phase::WriteCache);
    }

    #[test]
    fn terminal_detection() {
        assert!(InstallEvent::Completed.is_terminal());
        assert!(!InstallEvent::Progress(ProgressEvent::RestoreCache).is_terminal());
    }
}
