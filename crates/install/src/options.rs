//! Options for a single install run.

use crate::platform::RenameFn;
use crate::{Error, Result};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Caller-controlled knobs for [`crate::Installer::install`].
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOptions {
    /// Skip the cache lookup and always build.
    #[serde(default)]
    pub force_reinstall: bool,

    /// Map the default binary name to a custom one.
    #[serde(skip)]
    pub rename: Option<RenameFn>,

    /// Version to install; the provider's default when absent.
    #[serde(default)]
    pub version: Option<String>,

    /// Deadline for the binary health check.
    #[serde(default, rename = "checkTimeoutMs", deserialize_with = "millis")]
    pub check_timeout: Option<Duration>,

    /// Keys the installer does not interpret, forwarded to the provider.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

impl fmt::Debug for InstallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallOptions")
            .field("force_reinstall", &self.force_reinstall)
            .field("rename", &self.rename.as_ref().map(|_| "<fn>"))
            .field("version", &self.version)
            .field("check_timeout", &self.check_timeout)
            .field("extra", &self.extra)
            .finish()
    }
}

impl InstallOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Always build, ignoring the cache.
    #[must_use]
    pub fn with_force_reinstall(mut self, force: bool) -> Self {
        self.force_reinstall = force;
        self
    }

    /// Install a specific version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Rename the installed binary.
    #[must_use]
    pub fn with_rename<F>(mut self, rename: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.rename = Some(Arc::new(rename));
        self
    }

    /// Override the health-check deadline.
    #[must_use]
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = Some(timeout);
        self
    }

    /// Forward an opaque option to the provider.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Parse the dynamic argument list: nothing, or a single options record.
    ///
    /// A `null` argument counts as absent.
    pub fn from_args(args: &[Value]) -> Result<Self> {
        let arg = match args {
            [] | [Value::Null] => return Ok(Self::default()),
            [arg] => arg,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "expected at most one options argument, got {}",
                    args.len()
                )));
            }
        };

        let Value::Object(record) = arg else {
            return Err(Error::invalid_argument("options must be an object"));
        };
        if let Some(force) = record.get("forceReinstall")
            && !force.is_boolean()
        {
            return Err(Error::invalid_argument(
                "options.forceReinstall must be a boolean",
            ));
        }

        serde_json::from_value(arg.clone())
            .map_err(|e| Error::invalid_argument(format!("invalid options: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_arguments_means_defaults() {
        let options = InstallOptions::from_args(&[]).unwrap();
        assert!(!options.force_reinstall);
        assert!(options.version.is_none());
        assert!(options.extra.is_empty());

        let options = InstallOptions::from_args(&[Value::Null]).unwrap();
        assert!(!options.force_reinstall);
    }

    #[test]
    fn parses_known_and_extra_keys() {
        let options = InstallOptions::from_args(&[json!({
            "forceReinstall": true,
            "version": "1.2.3",
            "checkTimeoutMs": 1500,
            "mirror": "https://example.invalid"
        })])
        .unwrap();
        assert!(options.force_reinstall);
        assert_eq!(options.version.as_deref(), Some("1.2.3"));
        assert_eq!(options.check_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.extra.len(), 1);
        assert_eq!(options.extra["mirror"], "https://example.invalid");
    }

    #[test]
    fn rejects_two_arguments() {
        let err = InstallOptions::from_args(&[json!({}), json!({})]).unwrap_err();
        assert_eq!(err.code(), "EINVALIDARG");
    }

    #[test]
    fn rejects_non_object() {
        for arg in [json!(true), json!("force"), json!([1])] {
            let err = InstallOptions::from_args(&[arg]).unwrap_err();
            assert_eq!(err.code(), "EINVALIDARG");
        }
    }

    #[test]
    fn rejects_non_boolean_force() {
        for force in [json!("yes"), json!(1), Value::Null] {
            let err = InstallOptions::from_args(&[json!({ "forceReinstall": force })]).unwrap_err();
            assert_eq!(err.code(), "EINVALIDARG");
        }
    }

    #[test]
    fn builders_compose() {
        let options = InstallOptions::new()
            .with_force_reinstall(true)
            .with_version("9")
            .with_rename(|n| format!("{n}-9"))
            .with_check_timeout(Duration::from_secs(1))
            .with_extra("k", json!(1));
        assert!(options.force_reinstall);
        assert_eq!(options.rename.as_ref().map(|r| r("tool")).as_deref(), Some("tool-9"));
        assert!(format!("{options:?}").contains("<fn>"));
    }
}
