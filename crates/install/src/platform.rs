//! Platform detection, cache identity and install target derivation.

use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Operating system and CPU architecture pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    /// OS name as reported by `std::env::consts::OS` (e.g. "linux").
    pub os: String,
    /// Architecture as reported by `std::env::consts::ARCH` (e.g. "x86_64").
    pub arch: String,
}

impl Platform {
    /// Create a platform from explicit parts.
    #[must_use]
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this process runs on.
    #[must_use]
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Parse from a string like "linux-x86_64".
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (os, arch) = s.split_once('-')?;
        if os.is_empty() || arch.is_empty() {
            return None;
        }
        Some(Self::new(os, arch))
    }

    /// Whether executables need an `.exe` suffix.
    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// Platform-conventional executable file name for `base`.
    #[must_use]
    pub fn executable_name(&self, base: &str) -> String {
        if self.is_windows() && !base.to_ascii_lowercase().ends_with(".exe") {
            format!("{base}.exe")
        } else {
            base.to_string()
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// Compatibility identity of a cached binary: `version ++ os ++ arch`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheIdentity(String);

impl CacheIdentity {
    /// Derive the identity for `version` on `platform`.
    #[must_use]
    pub fn new(version: &str, platform: &Platform) -> Self {
        Self(format!("{version}{}{}", platform.os, platform.arch))
    }

    /// The identity string recorded in cache metadata.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a stored identity string is compatible with this one.
    #[must_use]
    pub fn matches(&self, stored: &str) -> bool {
        self.0 == stored
    }
}

impl fmt::Display for CacheIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied mapping from the default binary name to a custom one.
pub type RenameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Where the binary is installed for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    /// File name of the installed binary.
    pub binary_name: String,
    /// `cwd.join(binary_name)`.
    pub install_path: PathBuf,
}

impl InstallTarget {
    /// Resolve the target for `base_name` under `cwd`.
    ///
    /// The name is made platform-conventional first, then passed through
    /// `rename`. The result must be a plain file name.
    pub fn resolve(
        cwd: &Path,
        base_name: &str,
        platform: &Platform,
        rename: Option<&RenameFn>,
    ) -> Result<Self> {
        let default_name = platform.executable_name(base_name);
        let binary_name = match rename {
            Some(rename) => rename(&default_name),
            None => default_name,
        };

        let as_path = Path::new(&binary_name);
        let is_plain = as_path.file_name().is_some_and(|n| n == as_path.as_os_str());
        if binary_name.is_empty() || !is_plain || binary_name == "." || binary_name == ".." {
            return Err(Error::invalid_argument(format!(
                "binary name '{binary_name}' must be a plain file name"
            )));
        }

        Ok(Self {
            install_path: cwd.join(&binary_name),
            binary_name,
        })
    }
}
