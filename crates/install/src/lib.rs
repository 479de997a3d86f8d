//! Cache-aware installation of a single prebuilt executable
//!
//! This crate decides, for one binary in one working directory, whether to
//! restore it from a [`CacheStore`](bincache_store::CacheStore) or to produce
//! it with an [`ArtifactProvider`], and recovers from stale or corrupted cache
//! entries by purging them and building once.
//!
//! - [`Installer`] / [`InstallHandle`]: the install state machine and its event stream
//! - [`archive`]: tar + zstd codec for cached binaries
//! - [`check`]: the `--version` health probe
//! - [`CommandProvider`]: a provider backed by an external build command
//!
//! # Example
//!
//! ```no_run
//! use bincache_install::{CommandProvider, InstallEvent, Installer};
//! use bincache_store::FsCacheStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(FsCacheStore::open_default()?);
//! let provider = Arc::new(CommandProvider::new("make", vec!["tool".into()], "tool"));
//! let installer = Installer::new(store, provider, std::env::current_dir()?);
//!
//! let mut handle = installer.install(None)?;
//! while let Some(event) = handle.next().await {
//!     match event {
//!         InstallEvent::Progress(progress) => println!("{}", progress.id()),
//!         InstallEvent::Completed => break,
//!         InstallEvent::Failed(error) => return Err(error.into()),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod check;
mod command;
mod error;
mod event;
mod options;
mod orchestrator;
mod platform;
mod provider;

pub use command::{CommandProvider, INSTALL_PATH_ENV, PLATFORM_ENV, VERSION_ENV};
pub use error::{Error, Result};
pub use event::{InstallEvent, Phase, PhaseError, ProgressEvent, ProgressSink, ProviderEvent};
pub use options::InstallOptions;
pub use orchestrator::{InstallHandle, Installer};
pub use platform::{CacheIdentity, InstallTarget, Platform, RenameFn};
pub use provider::{ArtifactProvider, BuildGate, ProvideRequest};

/// Cache key the binary is stored under.
pub const CACHE_KEY: &str = "bincache-binary";
