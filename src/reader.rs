//! Configuration sources.
//!
//! A [`Reader`] produces a validated [`Configuration`] and keeps the raw
//! document it was parsed from.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::Configuration;
use crate::error::{MockError, Result};

/// A source of mock configuration.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Load, parse, and validate the configuration.
    async fn parse(&self) -> Result<Configuration>;

    /// The raw document last loaded.
    fn data(&self) -> Vec<u8>;
}

/// Reads configuration from a YAML file.
#[derive(Debug)]
pub struct LocalFileReader {
    path: PathBuf,
    data: Mutex<Vec<u8>>,
}

impl LocalFileReader {
    /// Create a reader for `path`. Nothing is read until [`Reader::parse`].
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            data: Mutex::new(Vec::new()),
        }
    }

    /// The file this reader loads.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Reader for LocalFileReader {
    async fn parse(&self) -> Result<Configuration> {
        debug!(path = %self.path.display(), "Reading mock configuration");
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|source| MockError::Read {
                path: self.path.display().to_string(),
                source,
            })?;
        *self.data.lock() = data.clone();
        Configuration::from_yaml(&data)
    }

    fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

/// Holds configuration text in memory. The text can be replaced between
/// parses.
#[derive(Debug, Default)]
pub struct InMemoryReader {
    data: Mutex<Vec<u8>>,
}

impl InMemoryReader {
    /// Create a reader holding `config`.
    pub fn new(config: impl Into<String>) -> Self {
        Self {
            data: Mutex::new(config.into().into_bytes()),
        }
    }

    /// Replace the held document.
    pub fn write(&self, data: impl Into<Vec<u8>>) {
        *self.data.lock() = data.into();
    }
}

#[async_trait]
impl Reader for InMemoryReader {
    async fn parse(&self) -> Result<Configuration> {
        let data = self.data();
        Configuration::from_yaml(&data)
    }

    fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

/// Serves an already-built configuration.
#[derive(Debug, Clone, Default)]
pub struct ObjectReader {
    config: Configuration,
}

impl ObjectReader {
    /// Wrap `config`.
    pub fn new(config: Configuration) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Reader for ObjectReader {
    async fn parse(&self) -> Result<Configuration> {
        self.config.validate()?;
        Ok(self.config.clone())
    }

    fn data(&self) -> Vec<u8> {
        serde_yaml::to_string(&self.config)
            .map(String::into_bytes)
            .unwrap_or_default()
    }
}
