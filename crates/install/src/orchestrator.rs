//! The cache-aware install state machine.
//!
//! One [`Installer::install`] call spawns a driver task that decides between
//! restoring the binary from the cache and producing it through the
//! [`ArtifactProvider`], narrating every step as a [`ProgressEvent`] and ending
//! with exactly one terminal [`InstallEvent`].
//!
//! ```text
//! force ──────────────────────────────────────────────┐
//! probe ─ miss ───────────────────────────────────────┤ build(broken = false)
//!       ─ identity mismatch ──────────────────────────┤ build(broken = true)
//!       ─ hit ─ restore ─ fail ───────────────────────┤
//!                       ─ ok ─ check ─ fail ──────────┘
//!                                    ─ ok ─ Completed
//! build: purge ∥ provide ─ fail ─ Failed
//!                        ─ ok ─ write cache (failure tolerated) ─ Completed
//! ```

use crate::archive::{self, DEFAULT_COMPRESSION_LEVEL, MAX_READ_SIZE, PackOptions};
use crate::check::{CheckOptions, DEFAULT_CHECK_TIMEOUT, check_binary};
use crate::event::{InstallEvent, Phase, PhaseError, ProgressEvent, ProgressSink, ProviderEvent};
use crate::options::InstallOptions;
use crate::platform::{CacheIdentity, InstallTarget, Platform};
use crate::provider::{ArtifactProvider, BuildGate, GateOpener, ProvideRequest};
use crate::{CACHE_KEY, Error, Result};
use bincache_store::{CacheEntry, CacheStore, EntryMetadata, PutOptions};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, debug, info, info_span, warn};

/// Largest decompressed archive accepted on restore: one file of at most
/// [`MAX_READ_SIZE`] plus tar headers and end-of-archive padding.
const MAX_ARCHIVE_SIZE: u64 = MAX_READ_SIZE + 64 * 1024;

type Outcome = std::result::Result<(), PhaseError>;

/// Installs one binary into a working directory, backed by a cache store.
#[derive(Clone)]
pub struct Installer {
    store: Arc<dyn CacheStore>,
    provider: Arc<dyn ArtifactProvider>,
    cwd: PathBuf,
    platform: Platform,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("provider", &self.provider.name())
            .field("cwd", &self.cwd)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// Create an installer writing into `cwd` for the current platform.
    pub fn new(
        store: Arc<dyn CacheStore>,
        provider: Arc<dyn ArtifactProvider>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            provider,
            cwd: cwd.into(),
            platform: Platform::current(),
        }
    }

    /// Target another platform. Affects the binary name and cache identity.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Directory the binary is installed into.
    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Platform the binary is installed for.
    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Version installed when none is requested.
    #[must_use]
    pub fn default_version(&self) -> &str {
        self.provider.default_version()
    }

    /// Build-time flags exposed by the provider.
    #[must_use]
    pub fn build_flags(&self) -> Vec<String> {
        self.provider.build_flags()
    }

    /// Start an install run.
    ///
    /// Argument problems are returned immediately; everything else is
    /// reported through the returned handle. Must be called from within a
    /// tokio runtime.
    pub fn install(&self, options: Option<InstallOptions>) -> Result<InstallHandle> {
        let options = options.unwrap_or_default();
        let target = InstallTarget::resolve(
            &self.cwd,
            self.provider.binary_name(),
            &self.platform,
            options.rename.as_ref(),
        )?;
        let version = options
            .version
            .clone()
            .unwrap_or_else(|| self.provider.default_version().to_string());
        let identity = CacheIdentity::new(&version, &self.platform);

        let cancel = CancellationToken::new();
        let (tx, events) = mpsc::unbounded_channel();
        let span = info_span!(
            "install",
            binary = %target.binary_name,
            version = %version,
            identity = %identity,
        );

        let handle = InstallHandle::new(events, cancel.clone(), target.clone());
        let run = Run {
            store: Arc::clone(&self.store),
            provider: Arc::clone(&self.provider),
            request: ProvideRequest {
                cwd: self.cwd.clone(),
                install_path: target.install_path.clone(),
                binary_name: target.binary_name.clone(),
                version,
                platform: self.platform.clone(),
                extra: options.extra.clone(),
                gate: BuildGate::opened(),
            },
            target,
            identity,
            force_reinstall: options.force_reinstall,
            check_timeout: options.check_timeout.unwrap_or(DEFAULT_CHECK_TIMEOUT),
            cancel: cancel.clone(),
        };
        let emitter = Emitter {
            tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(run.drive(emitter).instrument(span));

        Ok(handle)
    }

    /// Start an install run from the dynamic argument list: nothing, or one
    /// options record.
    pub fn install_from_args(&self, args: &[Value]) -> Result<InstallHandle> {
        let options = InstallOptions::from_args(args)?;
        self.install(Some(options))
    }
}

/// Consumer side of an install run.
///
/// Dropping the handle cancels the run.
#[derive(Debug)]
pub struct InstallHandle {
    events: mpsc::UnboundedReceiver<InstallEvent>,
    cancel: CancellationToken,
    target: InstallTarget,
    phase: Phase,
    _guard: DropGuard,
}

impl InstallHandle {
    fn new(
        events: mpsc::UnboundedReceiver<InstallEvent>,
        cancel: CancellationToken,
        target: InstallTarget,
    ) -> Self {
        Self {
            events,
            _guard: cancel.clone().drop_guard(),
            cancel,
            target,
            phase: Phase::SearchCache,
        }
    }

    /// Where this run installs the binary.
    #[must_use]
    pub fn target(&self) -> &InstallTarget {
        &self.target
    }

    /// Next event, or `None` after the terminal signal or cancellation.
    pub async fn next(&mut self) -> Option<InstallEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let event = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        };
        if let Some(InstallEvent::Progress(progress)) = &event {
            self.phase = progress.phase();
        }
        event
    }

    /// Stop the run. No events are delivered afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels the run when triggered, usable from other tasks.
    #[must_use]
    pub fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the run to its terminal signal.
    pub async fn wait(self) -> Outcome {
        self.wait_with(|_| {}).await
    }

    /// Drain the run, passing every progress event to `on_progress`.
    pub async fn wait_with<F>(mut self, mut on_progress: F) -> Outcome
    where
        F: FnMut(&ProgressEvent),
    {
        while let Some(event) = self.next().await {
            match event {
                InstallEvent::Progress(progress) => on_progress(&progress),
                InstallEvent::Completed => return Ok(()),
                InstallEvent::Failed(error) => return Err(error),
            }
        }
        let error = if self.cancel.is_cancelled() {
            Error::Cancelled
        } else {
            Error::background("install task ended without a result")
        };
        Err(PhaseError::new(self.phase, error))
    }
}

/// Sending half of the event stream, silenced once the run is cancelled.
struct Emitter {
    tx: mpsc::UnboundedSender<InstallEvent>,
    cancel: CancellationToken,
}

impl Emitter {
    fn progress(&self, event: ProgressEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        debug!(event = event.id(), "Install progress");
        let _ = self.tx.send(InstallEvent::Progress(event));
    }

    fn finish(self, outcome: Outcome) {
        if self.cancel.is_cancelled() {
            return;
        }
        let event = match outcome {
            Ok(()) => {
                info!("Install completed");
                InstallEvent::Completed
            }
            Err(error) => {
                warn!(phase = %error.phase, code = error.code(), "Install failed: {}", error.error);
                InstallEvent::Failed(error)
            }
        };
        let _ = self.tx.send(event);
    }
}

/// An in-flight provider task with its buffered events.
///
/// The task's gate stays closed until [`ProviderRun::relay`], so a run that
/// is aborted never produced output.
struct ProviderRun {
    handle: AbortOnDropHandle<Result<()>>,
    events: mpsc::UnboundedReceiver<ProviderEvent>,
    cancel: CancellationToken,
    gate: GateOpener,
}

impl ProviderRun {
    /// Let the provider build, forward its events until the task ends, then
    /// return its result.
    async fn relay(mut self, emitter: &Emitter) -> Result<()> {
        self.gate.open();
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => {
                    emitter.progress(ProgressEvent::Provider(event));
                }
                joined = &mut self.handle => {
                    while let Ok(event) = self.events.try_recv() {
                        emitter.progress(ProgressEvent::Provider(event));
                    }
                    return joined.map_err(|e| Error::background(e.to_string()))?;
                }
            }
        }
    }

    /// Stop the task and wait until it is gone.
    async fn abort(mut self) {
        self.cancel.cancel();
        self.handle.abort();
        let _ = (&mut self.handle).await;
        debug!("Speculative provider run stopped");
    }
}

/// State of one install run, owned by its driver task.
struct Run {
    store: Arc<dyn CacheStore>,
    provider: Arc<dyn ArtifactProvider>,
    request: ProvideRequest,
    target: InstallTarget,
    identity: CacheIdentity,
    force_reinstall: bool,
    check_timeout: Duration,
    cancel: CancellationToken,
}

impl Run {
    async fn drive(self, emitter: Emitter) {
        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Install cancelled");
                return;
            }
            outcome = self.execute(&emitter) => outcome,
        };
        emitter.finish(outcome);
    }

    async fn execute(&self, emitter: &Emitter) -> Outcome {
        if self.force_reinstall {
            debug!("Forced reinstall, skipping cache lookup");
            return self.build(emitter, None, false).await;
        }

        let speculative = self.start_provider();
        let (lookup, target) = tokio::join!(self.store.info(CACHE_KEY), self.check_target());
        if let Err(error) = target {
            speculative.abort().await;
            return Err(PhaseError::new(Phase::Target, error));
        }

        let entry = match lookup {
            Ok(entry) => entry,
            Err(error) => {
                debug!(code = error.code(), "Cache lookup missed: {error}");
                emitter.progress(ProgressEvent::SearchCache {
                    found: false,
                    path: None,
                });
                return self.build(emitter, Some(speculative), false).await;
            }
        };

        if !self.identity.matches(&entry.metadata.id) {
            info!(stored = %entry.metadata.id, "Cached binary does not match this install");
            emitter.progress(ProgressEvent::SearchCache {
                found: false,
                path: None,
            });
            return self.build(emitter, Some(speculative), true).await;
        }

        emitter.progress(ProgressEvent::SearchCache {
            found: true,
            path: Some(entry.path.clone()),
        });
        speculative.abort().await;

        emitter.progress(ProgressEvent::RestoreCache);
        if let Err(error) = self.restore().await {
            warn!(code = error.code(), "Restoring from cache failed: {error}");
            emitter.progress(ProgressEvent::RestoreCacheFail(PhaseError::new(
                Phase::RestoreCache,
                error,
            )));
            return self.build(emitter, None, true).await;
        }
        emitter.progress(ProgressEvent::RestoreCacheComplete);

        emitter.progress(ProgressEvent::CheckBinary);
        let options = CheckOptions::default()
            .with_timeout(self.check_timeout)
            .with_current_dir(&self.request.cwd);
        if let Err(error) = check_binary(&self.target.install_path, &options).await {
            warn!(code = error.code(), "Restored binary failed its check: {error}");
            emitter.progress(ProgressEvent::CheckBinaryFail(PhaseError::new(
                Phase::CheckBinary,
                error,
            )));
            return self.build(emitter, None, true).await;
        }
        emitter.progress(ProgressEvent::CheckBinaryComplete);
        Ok(())
    }

    /// Produce the binary with the provider and cache it.
    ///
    /// With `broken`, the cache entry is purged while the provider runs. Only
    /// a provider failure fails the run.
    async fn build(&self, emitter: &Emitter, adopted: Option<ProviderRun>, broken: bool) -> Outcome {
        info!(broken, "Building binary with provider '{}'", self.provider.name());
        let purging = AbortOnDropHandle::new(tokio::spawn(purge(Arc::clone(&self.store), broken)));
        let run = match adopted {
            Some(run) => run,
            None => self.start_provider(),
        };

        if let Err(error) = run.relay(emitter).await {
            let _ = purging.await;
            return Err(PhaseError::new(Phase::Build, error));
        }

        let size = tokio::fs::metadata(&self.target.install_path)
            .await
            .ok()
            .map(|m| m.len());
        emitter.progress(ProgressEvent::WriteCache { size });

        match self.write_cache(purging).await {
            Ok(entry) => {
                info!(size = entry.size, path = %entry.path.display(), "Cached binary");
                emitter.progress(ProgressEvent::WriteCacheComplete);
            }
            Err(error) => {
                warn!(code = error.code(), "Caching the binary failed: {error}");
                emitter.progress(ProgressEvent::WriteCacheFail(PhaseError::new(
                    Phase::WriteCache,
                    error,
                )));
            }
        }
        Ok(())
    }

    fn start_provider(&self) -> ProviderRun {
        let (sink, events) = ProgressSink::channel();
        let (opener, gate) = BuildGate::closed();
        let cancel = self.cancel.child_token();
        let provider = Arc::clone(&self.provider);
        let request = ProvideRequest {
            gate,
            ..self.request.clone()
        };
        let token = cancel.clone();
        let handle = tokio::spawn(async move { provider.provide(request, sink, token).await });
        ProviderRun {
            handle: AbortOnDropHandle::new(handle),
            events,
            cancel,
            gate: opener,
        }
    }

    async fn check_target(&self) -> Result<()> {
        match tokio::fs::metadata(&self.target.install_path).await {
            Ok(metadata) if metadata.is_dir() => {
                Err(Error::is_directory(&self.target.install_path))
            }
            _ => Ok(()),
        }
    }

    async fn restore(&self) -> Result<()> {
        let blob = self.store.read(CACHE_KEY).await?;
        let install_path = self.target.install_path.clone();
        blocking(move || {
            let tar = archive::decompress(&blob, MAX_ARCHIVE_SIZE)?;
            archive::unpack_single_file(&tar, &install_path)
        })
        .await
    }

    async fn write_cache(&self, purging: AbortOnDropHandle<()>) -> Result<CacheEntry> {
        let cwd = self.request.cwd.clone();
        let name = self.target.binary_name.clone();
        let pack = blocking(move || {
            let options = PackOptions {
                no_dir_recurse: true,
                ..PackOptions::default()
            };
            archive::pack(&cwd, &[name], &options)
        });

        let store = Arc::clone(&self.store);
        let reserve = async move {
            let _ = purging.await;
            store.reserve_temp().await.map_err(Error::from)
        };

        let (packed, ()) = tokio::try_join!(pack, reserve)?;
        let compressed =
            blocking(move || archive::compress(&packed.bytes, DEFAULT_COMPRESSION_LEVEL)).await?;
        let options = PutOptions::new(EntryMetadata::new(self.identity.as_str()))
            .with_size(compressed.len() as u64);
        Ok(self.store.put(CACHE_KEY, compressed, options).await?)
    }
}

/// Remove the cache entry and garbage-collect the store. Failures are ignored.
async fn purge(store: Arc<dyn CacheStore>, broken: bool) {
    if !broken {
        return;
    }
    if let Err(error) = store.remove(CACHE_KEY).await {
        debug!(code = error.code(), "Ignoring cache remove failure: {error}");
    }
    match store.verify().await {
        Ok(stats) => debug!(?stats, "Cache verified"),
        Err(error) => debug!(code = error.code(), "Ignoring cache verify failure: {error}"),
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::background(e.to_string()))?
}
