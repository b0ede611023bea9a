//! Immutable index generations and exact similarity search.
//!
//! A [`Generation`] pairs one fitted [`Vectorizer`] with every document,
//! chunk and vector produced by it. Generations are never mutated in place:
//! the `with_*`/`without_*` builders return the next generation, which the
//! store persists and swaps in.

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    chunking::Chunk,
    doc_id::DocumentId,
    error::{Error, Result},
    extract::SourceType,
    vectorizer::{Vector, Vectorizer},
};

/// Metadata about an ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    pub source_type: SourceType,
    pub raw_byte_length: u64,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    /// Characters of extracted (normalized) text.
    pub char_count: usize,
    pub chunk_count: usize,
}

/// A chunk together with the vector it was embedded to.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub document_id: DocumentId,
    pub chunk: Chunk,
    pub vector: Vector,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: DocumentId,
    pub filename: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
    pub char_start: usize,
    pub char_end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub number: u64,
    /// `None` until the first fit.
    pub vectorizer: Option<Vectorizer>,
    pub dimension: usize,
    pub documents: BTreeMap<DocumentId, Document>,
    /// Sorted by `(document_id, chunk.index)`.
    pub chunks: Vec<StoredChunk>,
}

impl Generation {
    pub fn empty(dimension: usize) -> Self {
        Self {
            number: 0,
            vectorizer: None,
            dimension,
            documents: BTreeMap::new(),
            chunks: Vec::new(),
        }
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.documents.contains_key(id)
    }

    pub fn chunks_of<'a>(
        &'a self,
        id: &'a DocumentId,
    ) -> impl Iterator<Item = &'a StoredChunk> + 'a {
        self.chunks.iter().filter(move |c| &c.document_id == id)
    }

    /// Embed `text` with this generation's vectorizer.
    ///
    /// Before the first fit every text embeds to the zero vector.
    pub fn embed(&self, text: &str) -> Vector {
        match &self.vectorizer {
            Some(vectorizer) => vectorizer.embed(text),
            None => vec![0.0; self.dimension],
        }
    }

    /// An unchanged copy numbered as the next generation.
    pub fn successor(&self) -> Self {
        Self {
            number: self.number + 1,
            ..self.clone()
        }
    }

    /// The next generation with `document` added (or replaced), keeping the
    /// current vectorizer. `vectors[i]` belongs to `chunks[i]`.
    pub fn with_document(
        &self,
        document: Document,
        chunks: Vec<Chunk>,
        vectors: Vec<Vector>,
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(Error::InvalidInput(format!(
                "{} chunks but {} vectors for {}",
                chunks.len(),
                vectors.len(),
                document.id
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: bad.len(),
            });
        }

        let mut next = self.without_document(&document.id);
        let id = document.id.clone();
        let mut document = document;
        document.chunk_count = chunks.len();
        next.documents.insert(id.clone(), document);
        next.chunks.extend(chunks.into_iter().zip(vectors).map(
            |(chunk, vector)| StoredChunk {
                document_id: id.clone(),
                chunk,
                vector,
            },
        ));
        next.sort_chunks();
        Ok(next)
    }

    /// The next generation without `id` and its chunks.
    pub fn without_document(&self, id: &DocumentId) -> Self {
        let mut documents = self.documents.clone();
        documents.remove(id);
        Self {
            number: self.number + 1,
            vectorizer: self.vectorizer.clone(),
            dimension: self.dimension,
            documents,
            chunks: self
                .chunks
                .iter()
                .filter(|c| &c.document_id != id)
                .cloned()
                .collect(),
        }
    }

    /// Re-embed every chunk with `vectorizer`. The generation number is kept.
    pub fn refit(self, vectorizer: Vectorizer) -> Self {
        let texts: Vec<&str> =
            self.chunks.iter().map(|c| c.chunk.text.as_str()).collect();
        let vectors = vectorizer.embed_batch(&texts);
        let chunks = self
            .chunks
            .into_iter()
            .zip(vectors)
            .map(|(stored, vector)| StoredChunk { vector, ..stored })
            .collect();

        Self {
            number: self.number,
            dimension: vectorizer.dimension(),
            vectorizer: Some(vectorizer),
            documents: self.documents,
            chunks,
        }
    }

    fn sort_chunks(&mut self) {
        self.chunks.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then(a.chunk.index.cmp(&b.chunk.index))
        });
    }

    /// Exact cosine search over this generation.
    ///
    /// An empty `filter` searches every document. Results are ordered by
    /// descending score, then ascending document id, then chunk index.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &[DocumentId],
    ) -> Vec<SearchHit> {
        if k == 0 {
            return Vec::new();
        }
        let allowed: HashSet<&DocumentId> = filter.iter().collect();

        let mut scored: Vec<(f32, &StoredChunk)> = self
            .chunks
            .par_iter()
            .filter(|c| allowed.is_empty() || allowed.contains(&c.document_id))
            .map(|c| (cosine_similarity(query, &c.vector), c))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| a.document_id.cmp(&b.document_id))
                .then(a.chunk.index.cmp(&b.chunk.index))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, c)| SearchHit {
                document_id: c.document_id.clone(),
                filename: self
                    .documents
                    .get(&c.document_id)
                    .map(|d| d.filename.clone())
                    .unwrap_or_default(),
                chunk_index: c.chunk.index,
                text: c.chunk.text.clone(),
                score,
                char_start: c.chunk.char_start,
                char_end: c.chunk.char_end,
            })
            .collect()
    }
}

/// `dot(a, b) / (|a| * |b|)`, or 0 when either vector has zero norm.
///
/// ```
/// use docrag::index::cosine_similarity;
///
/// assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
/// assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    if cosine.is_finite() {
        cosine.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(id: &str, filename: &str) -> Document {
        Document {
            id: DocumentId::from(id),
            filename: filename.to_string(),
            source_type: SourceType::Text,
            raw_byte_length: 0,
            created_at: 0,
            char_count: 0,
            chunk_count: 0,
        }
    }

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            index,
            text: text.to_string(),
            char_start: index * 10,
            char_end: index * 10 + text.chars().count(),
        }
    }

    /// Unit vector whose cosine with `[1, 0]` is `c`.
    fn at_cosine(c: f32) -> Vector {
        vec![c, (1.0 - c * c).sqrt()]
    }

    fn ranked_fixture() -> Generation {
        Generation::empty(2)
            .with_document(
                document("doc_b", "b.txt"),
                vec![chunk(0, "low"), chunk(1, "high")],
                vec![at_cosine(0.1), at_cosine(0.9)],
            )
            .unwrap()
            .with_document(
                document("doc_a", "a.txt"),
                vec![chunk(0, "mid")],
                vec![at_cosine(0.5)],
            )
            .unwrap()
    }

    #[test]
    fn cosine_handles_zero_norm() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn cosine_of_opposites_is_minus_one() {
        let s = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]);
        assert!((s + 1.0).abs() < 1e-6);
    }

    #[test]
    fn results_ordered_by_descending_score() {
        let generation = ranked_fixture();
        let hits = generation.search(&[1.0, 0.0], 3, &[]);
        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["high", "mid", "low"]);
        assert!((hits[0].score - 0.9).abs() < 1e-5);
        assert!((hits[1].score - 0.5).abs() < 1e-5);
        assert!((hits[2].score - 0.1).abs() < 1e-5);
        assert_eq!(hits[0].filename, "b.txt");
    }

    #[test]
    fn k_limits_result_count() {
        let generation = ranked_fixture();
        assert_eq!(generation.search(&[1.0, 0.0], 2, &[]).len(), 2);
        assert!(generation.search(&[1.0, 0.0], 0, &[]).is_empty());
    }

    #[test]
    fn ties_break_by_document_then_chunk() {
        let generation = Generation::empty(2)
            .with_document(
                document("doc_z", "z"),
                vec![chunk(1, "z1"), chunk(0, "z0")],
                vec![vec![1.0, 0.0], vec![1.0, 0.0]],
            )
            .unwrap()
            .with_document(
                document("doc_a", "a"),
                vec![chunk(0, "a0")],
                vec![vec![1.0, 0.0]],
            )
            .unwrap();

        let hits = generation.search(&[1.0, 0.0], 10, &[]);
        let order: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(order, vec!["a0", "z0", "z1"]);
    }

    #[test]
    fn filter_restricts_to_listed_documents() {
        let generation = ranked_fixture();
        let hits =
            generation.search(&[1.0, 0.0], 10, &[DocumentId::from("doc_a")]);
        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|h| h.document_id.as_str() == "doc_a"));
    }

    #[test]
    fn filter_on_unknown_document_is_empty() {
        let generation = ranked_fixture();
        let hits =
            generation.search(&[1.0, 0.0], 10, &[DocumentId::from("doc_x")]);
        assert!(hits.is_empty());
    }

    #[test]
    fn replacing_document_drops_old_chunks() {
        let generation = ranked_fixture()
            .with_document(
                document("doc_b", "b.txt"),
                vec![chunk(0, "only")],
                vec![at_cosine(0.3)],
            )
            .unwrap();
        assert_eq!(generation.chunk_count(), 2);
        assert_eq!(generation.documents[&DocumentId::from("doc_b")].chunk_count, 1);
    }

    #[test]
    fn mismatched_vectors_are_rejected() {
        let err = Generation::empty(2)
            .with_document(
                document("doc_a", "a"),
                vec![chunk(0, "a")],
                vec![vec![1.0, 0.0, 0.0]],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                found: 3
            }
        ));

        assert!(
            Generation::empty(2)
                .with_document(document("doc_a", "a"), vec![chunk(0, "a")], vec![])
                .is_err()
        );
    }

    #[test]
    fn builders_advance_generation_number() {
        let base = Generation::empty(2);
        let next = base.without_document(&DocumentId::from("doc_a"));
        assert_eq!(next.number, 1);
        assert_eq!(next.successor().number, 2);
    }

    #[test]
    fn refit_replaces_every_vector() {
        use crate::vectorizer::{FitParams, Vectorizer};

        let generation = ranked_fixture();
        let texts: Vec<&str> =
            generation.chunks.iter().map(|c| c.chunk.text.as_str()).collect();
        let vectorizer = Vectorizer::fit(
            &texts,
            &FitParams {
                dimension: 8,
                max_features: 100,
                min_corpus_chunks: 2,
                ngram_max: 1,
            },
        );
        let refit = generation.refit(vectorizer.clone());

        assert_eq!(refit.dimension, 8);
        for stored in &refit.chunks {
            assert_eq!(stored.vector, vectorizer.embed(&stored.chunk.text));
        }
    }
}
