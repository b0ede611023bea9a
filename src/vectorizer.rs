//! Deterministic, offline text vectorization.
//!
//! A [`Vectorizer`] is fit once per index generation and then embeds every
//! chunk and query of that generation. It is a tagged variant: either a
//! TF-IDF model over a corpus-derived vocabulary, or (when the corpus cannot
//! support one) a content-hash projection. Both always produce vectors of
//! exactly `dimension` components.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// Default vector dimensionality.
pub const DEFAULT_DIMENSION: usize = 384;

pub type Vector = Vec<f32>;

/// Minimum token length in characters.
const MIN_TOKEN_CHARS: usize = 2;

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "am", "an", "and",
    "any", "are", "as", "at", "be", "because", "been", "before", "being",
    "below", "between", "both", "but", "by", "can", "could", "did", "do",
    "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "if", "in", "into", "is",
    "it", "its", "itself", "me", "more", "most", "my", "myself", "no", "nor",
    "not", "of", "off", "on", "once", "only", "or", "other", "our", "ours",
    "ourselves", "out", "over", "own", "same", "she", "should", "so", "some",
    "such", "than", "that", "the", "their", "theirs", "them", "themselves",
    "then", "there", "these", "they", "this", "those", "through", "to",
    "too", "under", "until", "up", "very", "was", "we", "were", "what",
    "when", "where", "which", "while", "who", "whom", "why", "will", "with",
    "would", "you", "your", "yours", "yourself", "yourselves",
];

/// Parameters that shape a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitParams {
    pub dimension: usize,
    /// Vocabulary size cap; 0 means unlimited.
    pub max_features: usize,
    pub min_corpus_chunks: usize,
    pub ngram_max: usize,
}

impl From<&EngineConfig> for FitParams {
    fn from(config: &EngineConfig) -> Self {
        Self {
            dimension: config.dimension,
            max_features: config.max_features,
            min_corpus_chunks: config.min_corpus_chunks,
            ngram_max: config.ngram_max,
        }
    }
}

/// Why a statistical model could not be fit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FitError {
    #[error("corpus has {found} usable chunks, at least {required} required")]
    TooFewChunks { found: usize, required: usize },

    #[error("corpus produced an empty vocabulary")]
    EmptyVocabulary,

    #[error("dimension must be at least 1")]
    ZeroDimension,
}

/// Which embedding strategy a generation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    Tfidf,
    Hash,
}

impl std::fmt::Display for EmbeddingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tfidf => f.write_str("tfidf"),
            Self::Hash => f.write_str("hash"),
        }
    }
}

/// The fitted embedding model of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Vectorizer {
    Tfidf(TfidfModel),
    Hash(HashModel),
}

impl Vectorizer {
    /// Fit a TF-IDF model over `corpus`, falling back to hash embedding
    /// when the corpus cannot support one.
    pub fn fit<S: AsRef<str> + Sync>(corpus: &[S], params: &FitParams) -> Self {
        match TfidfModel::fit(corpus, params) {
            Ok(model) => {
                tracing::debug!(
                    vocabulary = model.vocabulary_size(),
                    documents = model.document_count,
                    "fitted tf-idf vocabulary"
                );
                Self::Tfidf(model)
            }
            Err(reason) => {
                tracing::warn!(
                    %reason,
                    "vectorization degraded: using hash embeddings"
                );
                Self::Hash(HashModel::new(params.dimension.max(1)))
            }
        }
    }

    /// Embed `text` into a vector of exactly [`Self::dimension`] components.
    ///
    /// Never fails: text the model knows nothing about embeds to the zero
    /// vector (TF-IDF) or to its content hash (hash mode).
    pub fn embed(&self, text: &str) -> Vector {
        match self {
            Self::Tfidf(model) => model.embed(text),
            Self::Hash(model) => model.embed(text),
        }
    }

    /// Embed many texts in parallel, preserving order.
    pub fn embed_batch<S: AsRef<str> + Sync>(&self, texts: &[S]) -> Vec<Vector> {
        texts.par_iter().map(|t| self.embed(t.as_ref())).collect()
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::Tfidf(model) => model.dimension,
            Self::Hash(model) => model.dimension,
        }
    }

    pub fn mode(&self) -> EmbeddingMode {
        match self {
            Self::Tfidf(_) => EmbeddingMode::Tfidf,
            Self::Hash(_) => EmbeddingMode::Hash,
        }
    }

    /// True when this generation fell back to hash embeddings.
    pub fn is_degraded(&self) -> bool {
        self.mode() == EmbeddingMode::Hash
    }

    pub fn vocabulary_size(&self) -> usize {
        match self {
            Self::Tfidf(model) => model.vocabulary_size(),
            Self::Hash(_) => 0,
        }
    }
}

/// A vocabulary entry: where the term lands and how much it weighs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TermWeight {
    /// Output component this term contributes to.
    pub slot: u32,
    /// +1 or -1; always +1 unless terms are hashed into shared slots.
    pub sign: i8,
    pub idf: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfModel {
    pub dimension: usize,
    pub ngram_max: usize,
    /// Non-blank chunks the model was fit on.
    pub document_count: usize,
    pub terms: BTreeMap<String, TermWeight>,
}

impl TfidfModel {
    pub fn fit<S: AsRef<str> + Sync>(
        corpus: &[S],
        params: &FitParams,
    ) -> Result<Self, FitError> {
        if params.dimension == 0 {
            return Err(FitError::ZeroDimension);
        }
        let ngram_max = params.ngram_max.max(1);

        let term_counts: Vec<BTreeMap<String, u32>> = corpus
            .par_iter()
            .filter(|text| !text.as_ref().trim().is_empty())
            .map(|text| count_terms(text.as_ref(), ngram_max))
            .collect();

        let document_count = term_counts.len();
        if document_count < params.min_corpus_chunks.max(1) {
            return Err(FitError::TooFewChunks {
                found: document_count,
                required: params.min_corpus_chunks.max(1),
            });
        }

        // term -> (total occurrences, document frequency)
        let mut stats: HashMap<&str, (u64, u32)> = HashMap::new();
        for counts in &term_counts {
            for (term, count) in counts {
                let entry = stats.entry(term.as_str()).or_default();
                entry.0 += u64::from(*count);
                entry.1 += 1;
            }
        }

        if stats.is_empty() {
            return Err(FitError::EmptyVocabulary);
        }

        let mut ranked: Vec<(&str, u64, u32)> = stats
            .into_iter()
            .map(|(term, (total, df))| (term, total, df))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        if params.max_features > 0 {
            ranked.truncate(params.max_features);
        }
        ranked.sort_by(|a, b| a.0.cmp(b.0));

        let hashed = ranked.len() > params.dimension;
        let n = document_count as f32;
        let terms = ranked
            .into_iter()
            .enumerate()
            .map(|(column, (term, _, df))| {
                let idf = ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0;
                let (slot, sign) = if hashed {
                    hashed_slot(term, params.dimension)
                } else {
                    (column as u32, 1)
                };
                (term.to_string(), TermWeight { slot, sign, idf })
            })
            .collect();

        Ok(Self {
            dimension: params.dimension,
            ngram_max,
            document_count,
            terms,
        })
    }

    pub fn vocabulary_size(&self) -> usize {
        self.terms.len()
    }

    pub fn embed(&self, text: &str) -> Vector {
        let mut vector = vec![0.0f32; self.dimension];
        for (term, count) in count_terms(text, self.ngram_max) {
            if let Some(weight) = self.terms.get(&term) {
                vector[weight.slot as usize] +=
                    f32::from(weight.sign) * count as f32 * weight.idf;
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

/// Content-hash embedding: reproducible across processes and machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashModel {
    pub dimension: usize,
}

impl HashModel {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn embed(&self, text: &str) -> Vector {
        let mut bytes = vec![0u8; self.dimension * 4];
        let mut hasher = blake3::Hasher::new();
        hasher.update(text.as_bytes());
        hasher.finalize_xof().fill(&mut bytes);

        let mut vector: Vector = bytes
            .chunks_exact(4)
            .map(|word| {
                let raw = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                (f64::from(raw) / 4_294_967_296.0 * 2.0 - 1.0) as f32
            })
            .collect();
        l2_normalize(&mut vector);
        vector
    }
}

/// Scale `vector` to unit length; the zero vector is left as is.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

fn hashed_slot(term: &str, dimension: usize) -> (u32, i8) {
    let hash = blake3::hash(term.as_bytes());
    let bytes = hash.as_bytes();
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    let value = u64::from_le_bytes(word);
    let slot = (value % dimension as u64) as u32;
    let sign = if bytes[8] & 1 == 0 { 1 } else { -1 };
    (slot, sign)
}

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Lowercased alphanumeric tokens, stop words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_lowercase)
        .filter(|t| !is_stop_word(t))
        .collect()
}

/// Count every n-gram (1..=ngram_max) in `text`, in term order so that
/// accumulation into shared slots is reproducible.
fn count_terms(text: &str, ngram_max: usize) -> BTreeMap<String, u32> {
    let tokens = tokenize(text);
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    for n in 1..=ngram_max {
        for window in tokens.windows(n) {
            *counts.entry(window.join(" ")).or_default() += 1;
        }
    }
    counts
}

/// Distinct terms of `text`, sorted.
pub fn distinct_terms(text: &str, ngram_max: usize) -> Vec<String> {
    count_terms(text, ngram_max).into_keys().collect()
}
