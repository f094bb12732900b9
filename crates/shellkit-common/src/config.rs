//! Worker configuration.
//!
//! The cache generation name and the bootstrap resource list are the only
//! knobs of the offline worker. They are passed explicitly to every handler
//! so several versions can be simulated side by side.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Cache generation used by the invoice generator deployment.
pub const DEFAULT_CACHE_NAME: &str = "invoice-generator-offline-v1";

/// Document served to offline navigations.
pub const DEFAULT_SHELL_ENTRY: &str = "./index.html";

/// Errors raised while loading or validating a [`WorkerConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Cannot resolve {location:?} against the worker scope: {source}")]
    InvalidUrl {
        location: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Cache name must not be empty")]
    EmptyCacheName,

    #[error("Core tier of {core_len} entries exceeds the bootstrap list of {total}")]
    CoreTierTooLong { core_len: usize, total: usize },
}

/// Where the interceptor looks for cached responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchScope {
    /// Every generation in creation order, like the platform-wide match.
    #[default]
    AllGenerations,
    /// Only the generation named by the worker's cache name.
    CurrentGeneration,
}

/// Ordered bootstrap locations; the first `core_len` form the mandatory tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapList {
    pub urls: Vec<String>,
    pub core_len: usize,
}

impl BootstrapList {
    /// Build a list from its two tiers.
    pub fn new<C, O>(core: C, optional: O) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        let mut urls: Vec<String> = core.into_iter().map(Into::into).collect();
        let core_len = urls.len();
        urls.extend(optional.into_iter().map(Into::into));
        Self { urls, core_len }
    }

    /// Mandatory tier.
    pub fn core(&self) -> &[String] {
        &self.urls[..self.core_len.min(self.urls.len())]
    }

    /// Best-effort tier.
    pub fn optional(&self) -> &[String] {
        &self.urls[self.core_len.min(self.urls.len())..]
    }
}

impl Default for BootstrapList {
    fn default() -> Self {
        Self::new(
            ["./", "./index.html", "./manifest.json"],
            [
                "https://cdnjs.cloudflare.com/ajax/libs/jspdf/2.5.1/jspdf.umd.min.js",
                "https://cdnjs.cloudflare.com/ajax/libs/jspdf-autotable/3.8.4/jspdf.plugin.autotable.min.js",
            ],
        )
    }
}

fn default_shell_entry() -> String {
    DEFAULT_SHELL_ENTRY.to_string()
}

/// Configuration injected into the installer, interceptor and activator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Name of the current cache generation.
    pub cache_name: String,
    /// Base URL that relative bootstrap locations resolve against.
    pub scope: Url,
    #[serde(default)]
    pub bootstrap: BootstrapList,
    #[serde(default = "default_shell_entry")]
    pub shell_entry: String,
    #[serde(default)]
    pub match_scope: MatchScope,
}

impl WorkerConfig {
    /// The invoice generator deployment served from `scope`.
    pub fn invoice_generator(scope: Url) -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            scope,
            bootstrap: BootstrapList::default(),
            shell_entry: default_shell_entry(),
            match_scope: MatchScope::default(),
        }
    }

    /// Same configuration under a different generation name.
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: BootstrapList) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_match_scope(mut self, scope: MatchScope) -> Self {
        self.match_scope = scope;
        self
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Check every invariant the handlers rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_name.trim().is_empty() {
            return Err(ConfigError::EmptyCacheName);
        }
        if self.bootstrap.core_len > self.bootstrap.urls.len() {
            return Err(ConfigError::CoreTierTooLong {
                core_len: self.bootstrap.core_len,
                total: self.bootstrap.urls.len(),
            });
        }
        for location in &self.bootstrap.urls {
            self.resolve(location)?;
        }
        self.shell_url()?;
        Ok(())
    }

    /// Resolve a relative or absolute location against the scope.
    ///
    /// Fragments never take part in request identity and are dropped.
    pub fn resolve(&self, location: &str) -> Result<Url, ConfigError> {
        let mut url = self
            .scope
            .join(location)
            .map_err(|source| ConfigError::InvalidUrl {
                location: location.to_string(),
                source,
            })?;
        url.set_fragment(None);
        Ok(url)
    }

    /// Resolved mandatory tier.
    pub fn core_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.bootstrap.core().iter().map(|l| self.resolve(l)).collect()
    }

    /// Resolved best-effort tier.
    pub fn optional_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.bootstrap
            .optional()
            .iter()
            .map(|l| self.resolve(l))
            .collect()
    }

    /// Resolved shell document.
    pub fn shell_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.shell_entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scope() -> Url {
        Url::parse("https://invoices.example.com/app/").unwrap()
    }

    #[test]
    fn test_default_tiers() {
        let list = BootstrapList::default();
        assert_eq!(list.core().len(), 3);
        assert_eq!(list.optional().len(), 2);
        assert_eq!(list.core()[1], "./index.html");
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let config = WorkerConfig::invoice_generator(scope());
        let core = config.core_urls().unwrap();
        assert_eq!(core[0].as_str(), "https://invoices.example.com/app/");
        assert_eq!(core[1].as_str(), "https://invoices.example.com/app/index.html");

        let optional = config.optional_urls().unwrap();
        assert_eq!(optional[0].host_str(), Some("cdnjs.cloudflare.com"));
        assert_eq!(
            config.shell_url().unwrap().as_str(),
            "https://invoices.example.com/app/index.html"
        );
    }

    #[test]
    fn test_resolve_drops_fragment() {
        let config = WorkerConfig::invoice_generator(scope());
        let url = config.resolve("./index.html#totals").unwrap();
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = WorkerConfig::from_json_str(
            r#"{ "cache_name": "v2", "scope": "https://invoices.example.com/app/" }"#,
        )
        .unwrap();
        assert_eq!(config.cache_name, "v2");
        assert_eq!(config.bootstrap, BootstrapList::default());
        assert_eq!(config.shell_entry, DEFAULT_SHELL_ENTRY);
        assert_eq!(config.match_scope, MatchScope::AllGenerations);
    }

    #[test]
    fn test_from_json_match_scope() {
        let config = WorkerConfig::from_json_str(
            r#"{
                "cache_name": "v2",
                "scope": "https://invoices.example.com/",
                "bootstrap": { "urls": ["./", "./app.js"], "core_len": 1 },
                "match_scope": "current_generation"
            }"#,
        )
        .unwrap();
        assert_eq!(config.match_scope, MatchScope::CurrentGeneration);
        assert_eq!(config.bootstrap.optional(), ["./app.js".to_string()]);
    }

    #[test]
    fn test_rejects_oversized_core_tier() {
        let err = WorkerConfig::from_json_str(
            r#"{
                "cache_name": "v2",
                "scope": "https://invoices.example.com/",
                "bootstrap": { "urls": ["./"], "core_len": 3 }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::CoreTierTooLong {
                core_len: 3,
                total: 1
            }
        ));
    }

    #[test]
    fn test_rejects_empty_cache_name() {
        let config = WorkerConfig::invoice_generator(scope()).with_cache_name("  ");
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCacheName)));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            WorkerConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config = WorkerConfig::invoice_generator(scope()).with_cache_name("v7");
        write!(file, "{}", serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = WorkerConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = WorkerConfig::load("/nonexistent/shellkit.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
