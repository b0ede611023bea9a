//! The retrieval engine: ingestion and search over one vector store.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

use crate::{
    chunking::chunk_text,
    config::EngineConfig,
    doc_id::DocumentId,
    error::{Error, IngestStage, Result},
    extract::{self, SourceType},
    index::{Document, Generation, SearchHit},
    store::{Scope, VectorStore},
    text_util::normalize_whitespace,
    vectorizer::{EmbeddingMode, FitParams, Vectorizer},
};

/// What a successful ingestion produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub document_id: DocumentId,
    pub filename: String,
    pub source_type: SourceType,
    pub chunk_count: usize,
    pub char_count: usize,
    /// The generation fell back to hash embeddings.
    pub degraded: bool,
    /// A document with the same id was replaced.
    pub replaced: bool,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildOutcome {
    pub generation: u64,
    pub chunk_count: usize,
    pub dimension: usize,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub generation: u64,
    /// `None` until something has been ingested.
    pub embedding_mode: Option<EmbeddingMode>,
    pub dimension: usize,
    pub vocabulary_size: usize,
    pub by_source_type: BTreeMap<SourceType, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub generation: u64,
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedding_dimension: usize,
    pub degraded: bool,
    pub supported_formats: Vec<SourceType>,
    pub problems: Vec<String>,
}

/// Local document retrieval: ingest, search, delete.
///
/// Writers (ingest, delete, rebuild) are serialized by the store. Searches
/// run against whichever generation was current when they started, so they
/// never observe a vocabulary paired with vectors from another fit.
///
/// # Examples
///
/// ```
/// # let tmp = tempfile::tempdir().unwrap();
/// use docrag::{EngineConfig, RetrievalEngine};
///
/// let engine = RetrievalEngine::open(
///     &tmp.path().join("index.redb"),
///     EngineConfig::default(),
/// )
/// .unwrap();
/// let outcome = engine
///     .ingest(b"Invoices are due in thirty days.", "terms.txt", None)
///     .unwrap();
/// assert_eq!(outcome.chunk_count, 1);
///
/// let hits = engine.search("invoices due", 5, &[]).unwrap();
/// assert_eq!(hits[0].document_id, outcome.document_id);
/// ```
pub struct RetrievalEngine {
    store: VectorStore,
    config: EngineConfig,
}

impl RetrievalEngine {
    /// Open the index at `path`, re-embedding everything if it was built
    /// with a different dimension than `config` asks for.
    pub fn open(path: &Path, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = VectorStore::open(path, config.dimension)?;
        let engine = Self { store, config };

        let stored = engine.store.snapshot().dimension;
        if stored != engine.config.dimension {
            tracing::info!(
                from = stored,
                to = engine.config.dimension,
                "dimension changed, rebuilding index"
            );
            engine.rebuild()?;
        }

        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The current generation.
    pub fn snapshot(&self) -> Arc<Generation> {
        self.store.snapshot()
    }

    fn fit_params(&self) -> FitParams {
        FitParams::from(&self.config)
    }

    /// Ingest one document: extract, chunk, refit the vocabulary over the
    /// whole corpus, re-embed every chunk and install the new generation.
    ///
    /// `mime_hint` falls back to `filename` for format detection. On any
    /// failure the store is left exactly as it was.
    pub fn ingest(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_hint: Option<&str>,
    ) -> Result<IngestOutcome> {
        let source_type = SourceType::from_hint(mime_hint.unwrap_or(filename))
            .map_err(|e| e.at_stage(IngestStage::Extract))?;

        let raw = extract::extract(bytes, source_type, &self.config.encodings)
            .map_err(|e| e.at_stage(IngestStage::Extract))?;
        let text = if self.config.normalize_whitespace {
            normalize_whitespace(&raw)
        } else {
            raw
        };

        let chunks =
            chunk_text(&text, self.config.chunk_size, self.config.chunk_overlap);
        if chunks.is_empty() {
            tracing::warn!(filename, "no extractable text, storing empty document");
        }
        tracing::debug!(filename, chunks = chunks.len(), "chunked document");

        let document_id = DocumentId::derive(filename, bytes);
        let chunk_count = chunks.len();
        let char_count = text.chars().count();
        let document = Document {
            id: document_id.clone(),
            filename: filename.to_string(),
            source_type,
            raw_byte_length: bytes.len() as u64,
            created_at: unix_now(),
            char_count,
            chunk_count,
        };

        let params = self.fit_params();
        let mut replaced = false;
        let generation = self
            .store
            .update(|current| {
                replaced = current.contains(&document_id);

                // Placeholder vectors; the refit below replaces all of them.
                let placeholders = vec![vec![0.0; current.dimension]; chunks.len()];
                let staged = current
                    .with_document(document, chunks, placeholders)
                    .map_err(|e| e.at_stage(IngestStage::Chunk))?;

                let texts: Vec<&str> =
                    staged.chunks.iter().map(|c| c.chunk.text.as_str()).collect();
                let vectorizer = Vectorizer::fit(&texts, &params);
                let next = staged.refit(vectorizer);
                check_dimensions(&next, params.dimension)
                    .map_err(|e| e.at_stage(IngestStage::Vectorize))?;

                Ok(Some((next, Scope::All)))
            })
            .map_err(|e| match e.stage() {
                Some(_) => e,
                None => e.at_stage(IngestStage::Store),
            })?;

        let degraded = generation
            .vectorizer
            .as_ref()
            .is_some_and(Vectorizer::is_degraded);

        tracing::info!(
            document_id = %document_id,
            filename,
            chunks = chunk_count,
            generation = generation.number,
            degraded,
            "ingested document"
        );

        Ok(IngestOutcome {
            document_id,
            filename: filename.to_string(),
            source_type,
            chunk_count,
            char_count,
            degraded,
            replaced,
            generation: generation.number,
        })
    }

    /// Read and ingest a file; the file name doubles as the format hint.
    pub fn ingest_path(
        &self,
        path: &Path,
        mime_hint: Option<&str>,
    ) -> Result<IngestOutcome> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::from(e).at_stage(IngestStage::Extract))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.ingest(&bytes, &filename, mime_hint)
    }

    /// Rank chunks by cosine similarity to `query`.
    ///
    /// An empty `filter` searches every document. Fails with
    /// [`Error::EmptyIndex`] only when nothing at all is indexed; a filter
    /// that matches nothing gives an empty result.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &[DocumentId],
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(Error::InvalidQuery("top_k must be at least 1".into()));
        }

        let generation = self.store.snapshot();
        if generation.chunk_count() == 0 {
            return Err(Error::EmptyIndex);
        }
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = generation.embed(query);
        self.store.search_in(&generation, &vector, top_k, filter)
    }

    /// Delete a document and its chunks. Deleting an unknown id is a no-op
    /// that returns `false`.
    ///
    /// The vocabulary is left as fitted; the next ingest or rebuild refits.
    pub fn remove(&self, id: &DocumentId) -> Result<bool> {
        let removed = self.store.delete(id)?;
        if removed {
            tracing::info!(document_id = %id, "deleted document");
        } else {
            tracing::debug!(document_id = %id, "delete of unknown document");
        }
        Ok(removed)
    }

    pub fn delete_document(&self, id: &DocumentId) -> Result<bool> {
        self.remove(id)
    }

    pub fn list_documents(&self) -> Vec<Document> {
        self.store.snapshot().documents.values().cloned().collect()
    }

    pub fn document(&self, id: &DocumentId) -> Option<Document> {
        self.store.snapshot().documents.get(id).cloned()
    }

    pub fn stats(&self) -> EngineStats {
        let generation = self.store.snapshot();
        let mut by_source_type = BTreeMap::new();
        for document in generation.documents.values() {
            *by_source_type.entry(document.source_type).or_insert(0) += 1;
        }

        EngineStats {
            document_count: generation.document_count(),
            chunk_count: generation.chunk_count(),
            generation: generation.number,
            embedding_mode: generation.vectorizer.as_ref().map(Vectorizer::mode),
            dimension: generation.dimension,
            vocabulary_size: generation
                .vectorizer
                .as_ref()
                .map_or(0, Vectorizer::vocabulary_size),
            by_source_type,
        }
    }

    /// Check that the index is consistent and embedding works.
    pub fn health(&self) -> HealthReport {
        let generation = self.store.snapshot();
        let mut problems = Vec::new();

        let probe = generation.embed("health check probe");
        if probe.len() != self.config.dimension {
            problems.push(format!(
                "probe embedding has {} components, expected {}",
                probe.len(),
                self.config.dimension
            ));
        }
        if let Err(e) = check_dimensions(&generation, self.config.dimension) {
            problems.push(e.to_string());
        }
        let orphaned = generation
            .chunks
            .iter()
            .filter(|c| !generation.contains(&c.document_id))
            .count();
        if orphaned > 0 {
            problems.push(format!("{orphaned} chunks without a document"));
        }

        HealthReport {
            healthy: problems.is_empty(),
            generation: generation.number,
            document_count: generation.document_count(),
            chunk_count: generation.chunk_count(),
            embedding_dimension: probe.len(),
            degraded: generation
                .vectorizer
                .as_ref()
                .is_some_and(Vectorizer::is_degraded),
            supported_formats: SourceType::ALL.to_vec(),
            problems,
        }
    }

    /// Refit the vocabulary over every stored chunk and re-embed them all.
    pub fn rebuild(&self) -> Result<RebuildOutcome> {
        let params = self.fit_params();
        let generation = self.store.update(|current| {
            let texts: Vec<&str> =
                current.chunks.iter().map(|c| c.chunk.text.as_str()).collect();
            let vectorizer = Vectorizer::fit(&texts, &params);
            let next = current.successor().refit(vectorizer);
            Ok(Some((next, Scope::All)))
        })?;

        let outcome = RebuildOutcome {
            generation: generation.number,
            chunk_count: generation.chunk_count(),
            dimension: generation.dimension,
            degraded: generation
                .vectorizer
                .as_ref()
                .is_some_and(Vectorizer::is_degraded),
        };
        tracing::info!(
            generation = outcome.generation,
            chunks = outcome.chunk_count,
            "rebuilt index"
        );
        Ok(outcome)
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}

fn check_dimensions(generation: &Generation, dimension: usize) -> Result<()> {
    match generation.chunks.iter().find(|c| c.vector.len() != dimension) {
        Some(bad) => Err(Error::DimensionMismatch {
            expected: dimension,
            found: bad.vector.len(),
        }),
        None => Ok(()),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
