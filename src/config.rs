//! Engine configuration.
//!
//! Values are resolved from, lowest to highest priority: built-in defaults,
//! settings persisted in `config.redb`, and `DOCRAG_<KEY>` environment
//! variables (e.g. `DOCRAG_CHUNK_SIZE=400`).

use serde::{Deserialize, Serialize};

use crate::{
    chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config_db::ConfigDb,
    error::{Error, Result},
    extract::TextEncoding,
    vectorizer::DEFAULT_DIMENSION,
};

const ENV_PREFIX: &str = "DOCRAG_";

/// Every key understood by [`EngineConfig::set`].
pub const KEYS: &[&str] = &[
    "dimension",
    "chunk_size",
    "chunk_overlap",
    "max_features",
    "min_corpus_chunks",
    "ngram_max",
    "normalize_whitespace",
    "encodings",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Vector dimensionality `D`, fixed for every stored vector.
    pub dimension: usize,
    /// Chunk window size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Upper bound on the fitted vocabulary size.
    pub max_features: usize,
    /// Below this many non-blank chunks the statistical model is not fit.
    pub min_corpus_chunks: usize,
    /// Longest n-gram fed into the vocabulary.
    pub ngram_max: usize,
    pub normalize_whitespace: bool,
    /// Plain-text decoders, tried in order.
    pub encodings: Vec<TextEncoding>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_features: 1000,
            min_corpus_chunks: 2,
            ngram_max: 2,
            normalize_whitespace: true,
            encodings: TextEncoding::DEFAULT_ORDER.to_vec(),
        }
    }
}

impl EngineConfig {
    /// Resolve the configuration from persisted settings and the process
    /// environment.
    pub fn resolve(config_db: &ConfigDb) -> Result<Self> {
        let settings = config_db.list_settings()?;
        Self::resolve_with(&settings, |key| std::env::var(key).ok())
    }

    /// Resolve from explicit settings and an environment lookup.
    pub fn resolve_with(
        settings: &[(String, String)],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in settings {
            config.set(key, value)?;
        }

        for key in KEYS {
            let var = format!("{ENV_PREFIX}{}", key.to_uppercase());
            if let Some(value) = env(&var) {
                config.set(key, &value).map_err(|e| {
                    Error::Config(format!("{var}: {e}"))
                })?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply a single `key = value` setting.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "dimension" => self.dimension = parse_number(key, value)?,
            "chunk_size" => self.chunk_size = parse_number(key, value)?,
            "chunk_overlap" => self.chunk_overlap = parse_number(key, value)?,
            "max_features" => self.max_features = parse_number(key, value)?,
            "min_corpus_chunks" => {
                self.min_corpus_chunks = parse_number(key, value)?;
            }
            "ngram_max" => self.ngram_max = parse_number(key, value)?,
            "normalize_whitespace" => {
                self.normalize_whitespace = parse_bool(key, value)?;
            }
            "encodings" => {
                self.encodings = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|label| {
                        TextEncoding::from_label(label).ok_or_else(|| {
                            Error::Config(format!(
                                "unknown encoding '{label}'"
                            ))
                        })
                    })
                    .collect::<Result<_>>()?;
            }
            _ => {
                return Err(Error::Config(format!(
                    "unknown setting '{key}' (expected one of: {})",
                    KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// The current value of `key`, formatted the way [`Self::set`] accepts.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "dimension" => self.dimension.to_string(),
            "chunk_size" => self.chunk_size.to_string(),
            "chunk_overlap" => self.chunk_overlap.to_string(),
            "max_features" => self.max_features.to_string(),
            "min_corpus_chunks" => self.min_corpus_chunks.to_string(),
            "ngram_max" => self.ngram_max.to_string(),
            "normalize_whitespace" => self.normalize_whitespace.to_string(),
            "encodings" => self
                .encodings
                .iter()
                .map(TextEncoding::label)
                .collect::<Vec<_>>()
                .join(","),
            _ => return None,
        };
        Some(value)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::Config("dimension must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be at least 1".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.ngram_max == 0 {
            return Err(Error::Config("ngram_max must be at least 1".into()));
        }
        if self.encodings.is_empty() {
            return Err(Error::Config(
                "at least one text encoding is required".into(),
            ));
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value.parse().map_err(|_| {
        Error::Config(format!("{key} expects a non-negative integer, got '{value}'"))
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{key} expects a boolean, got '{value}'"
        ))),
    }
}
