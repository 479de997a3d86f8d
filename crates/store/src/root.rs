//! Cache root directory resolution

use crate::{Error, Result};
use dirs::{cache_dir, home_dir};
use std::path::PathBuf;

/// Environment variable that overrides the cache root.
pub const CACHE_DIR_ENV: &str = "BINCACHE_CACHE_DIR";

/// Inputs for determining cache root directory
#[derive(Debug, Clone)]
struct CacheInputs {
    override_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) BINCACHE_CACHE_DIR (explicit override)
    // 2) XDG_CACHE_HOME/bincache
    // 3) OS cache dir/bincache
    // 4) ~/.bincache/cache
    // 5) TMPDIR/bincache/cache (fallback)
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.override_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("bincache"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("bincache"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".bincache/cache"));
    }
    candidates.push(inputs.temp_dir.join("bincache/cache"));

    for path in candidates {
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        // Existing directories may still be read-only (CI images, sandboxed homes).
        if path.exists() {
            let probe = path.join(".write_probe");
            match std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(_) => continue,
            }
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

/// Resolve the default cache root for this user.
///
/// The first candidate that exists and is writable, or can be created, wins.
pub fn default_cache_root() -> Result<PathBuf> {
    let env_path = |name: &str| {
        std::env::var(name)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
    };
    cache_root_from_inputs(CacheInputs {
        override_dir: env_path(CACHE_DIR_ENV),
        xdg_cache_home: env_path("XDG_CACHE_HOME"),
        os_cache_dir: cache_dir(),
        home_dir: home_dir(),
        temp_dir: std::env::temp_dir(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cache_root_skips_homeless_shelter() {
        let tmp = TempDir::new().unwrap();
        let inputs = CacheInputs {
            override_dir: None,
            xdg_cache_home: Some(PathBuf::from("/homeless-shelter/.cache")),
            os_cache_dir: None,
            home_dir: Some(PathBuf::from("/homeless-shelter")),
            temp_dir: tmp.path().to_path_buf(),
        };
        let dir = cache_root_from_inputs(inputs).expect("fallback should be writable");
        assert!(!dir.starts_with("/homeless-shelter"));
        assert_eq!(dir, tmp.path().join("bincache/cache"));
    }

    #[test]
    fn cache_root_prefers_override() {
        let tmp = TempDir::new().unwrap();
        let override_dir = tmp.path().join("override");
        let inputs = CacheInputs {
            override_dir: Some(override_dir.clone()),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            os_cache_dir: None,
            home_dir: None,
            temp_dir: tmp.path().to_path_buf(),
        };
        let dir = cache_root_from_inputs(inputs).expect("override should be used");
        assert_eq!(dir, override_dir);
        assert!(dir.is_dir());
    }

    #[test]
    fn cache_root_ignores_empty_override() {
        let tmp = TempDir::new().unwrap();
        let inputs = CacheInputs {
            override_dir: Some(PathBuf::new()),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            os_cache_dir: None,
            home_dir: None,
            temp_dir: tmp.path().to_path_buf(),
        };
        let dir = cache_root_from_inputs(inputs).unwrap();
        assert_eq!(dir, tmp.path().join("xdg").join("bincache"));
    }
}
