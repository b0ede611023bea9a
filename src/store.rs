use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;

use crate::{
    chunking::Chunk,
    doc_id::DocumentId,
    error::{Error, Result},
    index::{Document, Generation, SearchHit, StoredChunk},
    vectorizer::{Vector, Vectorizer},
};

const DOCUMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("documents");
const CHUNKS: TableDefinition<(&str, u32), &[u8]> =
    TableDefinition::new("chunks");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const GENERATION_KEY: &str = "generation";
const DIMENSION_KEY: &str = "dimension";
const VECTORIZER_KEY: &str = "vectorizer";

/// Chunk row header: char_start, char_end, dimension, text length (u32 LE).
const HEADER_SIZE: usize = 16;

/// Which rows a new generation rewrites on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every document, chunk and vector (after a refit).
    All,
    /// Only the listed documents; ids missing from the new generation are
    /// deleted.
    Documents(Vec<DocumentId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
}

/// Persistent document and vector storage with snapshot reads.
///
/// Readers take an `Arc` of the current [`Generation`] and keep it for as
/// long as they need; writers are serialized, persist the next generation
/// in a single redb transaction and only then swap it in.
///
/// Chunk rows are keyed by `(document_id, chunk_index)` and laid out as:
/// - 16 bytes: char_start, char_end, dimension D, text length L (u32 LE)
/// - D * 4 bytes: f32 vector components
/// - L bytes: UTF-8 chunk text
pub struct VectorStore {
    db: Database,
    current: RwLock<Arc<Generation>>,
    writer: Mutex<()>,
}

impl VectorStore {
    /// Open or create a store at `path`.
    ///
    /// `dimension` only applies to a store that has never been written;
    /// otherwise the persisted generation keeps its own dimension.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docrag::store::VectorStore;
    ///
    /// let store = VectorStore::open(&tmp.path().join("index.redb"), 384).unwrap();
    /// assert_eq!(store.stats().chunk_count, 0);
    /// ```
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        let db = Database::create(path).map_err(redb::Error::from)?;

        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(CHUNKS)?;
        txn.open_table(META)?;
        txn.commit()?;

        let generation = load_generation(&db, dimension)?;
        tracing::debug!(
            generation = generation.number,
            documents = generation.document_count(),
            chunks = generation.chunk_count(),
            "opened vector store"
        );

        Ok(Self {
            db,
            current: RwLock::new(Arc::new(generation)),
            writer: Mutex::new(()),
        })
    }

    /// The current generation. Later writes never affect it.
    pub fn snapshot(&self) -> Arc<Generation> {
        Arc::clone(
            &self.current.read().unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Build, persist and install the next generation.
    ///
    /// `build` runs with the writer lock held and receives the current
    /// generation; returning `None` leaves the store untouched. If `build`
    /// or the write fails, the current generation stays in place.
    pub fn update<F>(&self, build: F) -> Result<Arc<Generation>>
    where
        F: FnOnce(&Generation) -> Result<Option<(Generation, Scope)>>,
    {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();

        let Some((next, scope)) = build(current.as_ref())? else {
            return Ok(current);
        };
        if next.number != current.number + 1 {
            return Err(Error::StaleGeneration {
                current: current.number,
                found: next.number,
            });
        }

        self.persist(&next, &scope)?;

        let next = Arc::new(next);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::clone(&next);
        Ok(next)
    }

    /// Store a document with its chunks and their vectors, all or nothing.
    ///
    /// An existing document with the same id is replaced. Vectors must come
    /// from the current vectorizer; callers that refit install the whole new
    /// generation through [`Self::update`] instead.
    pub fn add(
        &self,
        document: Document,
        chunks: Vec<Chunk>,
        vectors: Vec<Vector>,
    ) -> Result<()> {
        let id = document.id.clone();
        self.update(|current| {
            let next = current.with_document(document, chunks, vectors)?;
            Ok(Some((next, Scope::Documents(vec![id]))))
        })?;
        Ok(())
    }

    /// Remove a document and all its chunks. Returns whether it existed.
    pub fn delete(&self, id: &DocumentId) -> Result<bool> {
        let mut removed = false;
        self.update(|current| {
            if !current.contains(id) {
                return Ok(None);
            }
            removed = true;
            Ok(Some((
                current.without_document(id),
                Scope::Documents(vec![id.clone()]),
            )))
        })?;
        Ok(removed)
    }

    /// Exact cosine search over the current generation.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &[DocumentId],
    ) -> Result<Vec<SearchHit>> {
        self.search_in(&self.snapshot(), query, k, filter)
    }

    /// Exact cosine search over a generation the caller already holds, so a
    /// query embedded with that generation's vectorizer is scored against
    /// the same generation's vectors.
    pub fn search_in(
        &self,
        generation: &Generation,
        query: &[f32],
        k: usize,
        filter: &[DocumentId],
    ) -> Result<Vec<SearchHit>> {
        if query.len() != generation.dimension {
            return Err(Error::DimensionMismatch {
                expected: generation.dimension,
                found: query.len(),
            });
        }
        let hits = generation.search(query, k, filter);
        tracing::trace!(
            generation = generation.number,
            filter = filter.len(),
            hits = hits.len(),
            "searched"
        );
        Ok(hits)
    }

    pub fn stats(&self) -> StoreStats {
        let generation = self.snapshot();
        StoreStats {
            document_count: generation.document_count(),
            chunk_count: generation.chunk_count(),
        }
    }

    fn persist(&self, next: &Generation, scope: &Scope) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            if *scope == Scope::All {
                txn.delete_table(DOCUMENTS)?;
                txn.delete_table(CHUNKS)?;
            }
            let mut documents = txn.open_table(DOCUMENTS)?;
            let mut chunks = txn.open_table(CHUNKS)?;
            let mut meta = txn.open_table(META)?;

            let ids: Vec<&DocumentId> = match scope {
                Scope::All => next.documents.keys().collect(),
                Scope::Documents(ids) => ids.iter().collect(),
            };

            for id in ids {
                if *scope != Scope::All {
                    documents.remove(id.as_str())?;
                    let stale: Vec<u32> = chunks
                        .range((id.as_str(), 0u32)..=(id.as_str(), u32::MAX))?
                        .map(|entry| entry.map(|(key, _)| key.value().1))
                        .collect::<std::result::Result<_, _>>()?;
                    for index in stale {
                        chunks.remove((id.as_str(), index))?;
                    }
                }

                let Some(document) = next.documents.get(id) else {
                    continue;
                };
                let json = serde_json::to_vec(document)?;
                documents.insert(id.as_str(), json.as_slice())?;

                for stored in next.chunks_of(id) {
                    write_chunk(&mut chunks, stored)?;
                }
            }

            meta.insert(GENERATION_KEY, next.number.to_le_bytes().as_slice())?;
            meta.insert(
                DIMENSION_KEY,
                (next.dimension as u64).to_le_bytes().as_slice(),
            )?;
            match &next.vectorizer {
                Some(vectorizer) => {
                    let blob = serde_json::to_vec(vectorizer)?;
                    meta.insert(VECTORIZER_KEY, blob.as_slice())?;
                }
                None => {
                    meta.remove(VECTORIZER_KEY)?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let generation = self.snapshot();
        f.debug_struct("VectorStore")
            .field("generation", &generation.number)
            .field("documents", &generation.document_count())
            .field("chunks", &generation.chunk_count())
            .finish_non_exhaustive()
    }
}

fn write_chunk(
    table: &mut redb::Table<'_, (&'static str, u32), &'static [u8]>,
    stored: &StoredChunk,
) -> Result<()> {
    let chunk = &stored.chunk;
    let text = chunk.text.as_bytes();
    let to_u32 = |value: usize, what: &str| {
        u32::try_from(value).map_err(|_| {
            Error::InvalidInput(format!("{what} {value} exceeds u32 range"))
        })
    };
    let index = to_u32(chunk.index, "chunk index")?;
    let header = [
        to_u32(chunk.char_start, "char_start")?,
        to_u32(chunk.char_end, "char_end")?,
        to_u32(stored.vector.len(), "dimension")?,
        to_u32(text.len(), "text length")?,
    ];

    let vector_bytes: &[u8] = bytemuck::cast_slice(&stored.vector);
    let byte_len = HEADER_SIZE + vector_bytes.len() + text.len();

    let mut guard = table
        .insert_reserve((stored.document_id.as_str(), index), byte_len)?;
    let dest = guard.as_mut();
    for (slot, value) in dest[..HEADER_SIZE].chunks_exact_mut(4).zip(header) {
        slot.copy_from_slice(&value.to_le_bytes());
    }
    let vector_end = HEADER_SIZE + vector_bytes.len();
    dest[HEADER_SIZE..vector_end].copy_from_slice(vector_bytes);
    dest[vector_end..].copy_from_slice(text);
    Ok(())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

fn decode_chunk(
    document_id: &str,
    index: u32,
    bytes: &[u8],
) -> Result<StoredChunk> {
    let corrupt = |reason: &str| {
        Error::CorruptIndex(format!(
            "chunk {index} of {document_id}: {reason}"
        ))
    };

    if bytes.len() < HEADER_SIZE {
        return Err(corrupt("truncated header"));
    }
    let char_start = read_u32(bytes, 0) as usize;
    let char_end = read_u32(bytes, 4) as usize;
    let dimension = read_u32(bytes, 8) as usize;
    let text_len = read_u32(bytes, 12) as usize;

    let vector_end = HEADER_SIZE + dimension * 4;
    if bytes.len() != vector_end + text_len {
        return Err(corrupt("length does not match header"));
    }

    let vector: Vector = bytes[HEADER_SIZE..vector_end]
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect();
    let text = std::str::from_utf8(&bytes[vector_end..])
        .map_err(|_| corrupt("text is not UTF-8"))?
        .to_string();

    Ok(StoredChunk {
        document_id: DocumentId::from(document_id),
        chunk: Chunk {
            index: index as usize,
            text,
            char_start,
            char_end,
        },
        vector,
    })
}

fn read_u64(bytes: &[u8]) -> Option<u64> {
    let word: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_le_bytes(word))
}

fn load_generation(db: &Database, dimension: usize) -> Result<Generation> {
    let txn = db.begin_read()?;
    let mut generation = Generation::empty(dimension);

    let meta = txn.open_table(META)?;
    if let Some(guard) = meta.get(GENERATION_KEY)? {
        generation.number = read_u64(guard.value()).ok_or_else(|| {
            Error::CorruptIndex("malformed generation counter".into())
        })?;
    }
    if let Some(guard) = meta.get(DIMENSION_KEY)? {
        generation.dimension = read_u64(guard.value())
            .ok_or_else(|| Error::CorruptIndex("malformed dimension".into()))?
            as usize;
    }
    if let Some(guard) = meta.get(VECTORIZER_KEY)? {
        let vectorizer: Vectorizer = serde_json::from_slice(guard.value())?;
        generation.vectorizer = Some(vectorizer);
    }

    let documents = txn.open_table(DOCUMENTS)?;
    for entry in documents.iter()? {
        let (key, value) = entry?;
        let document: Document = serde_json::from_slice(value.value())?;
        generation
            .documents
            .insert(DocumentId::from(key.value()), document);
    }

    let chunks = txn.open_table(CHUNKS)?;
    for entry in chunks.iter()? {
        let (key, value) = entry?;
        let (document_id, index) = key.value();
        let stored = decode_chunk(document_id, index, value.value())?;
        if stored.vector.len() != generation.dimension {
            return Err(Error::CorruptIndex(format!(
                "chunk {index} of {document_id} has {} components, expected {}",
                stored.vector.len(),
                generation.dimension
            )));
        }
        generation.chunks.push(stored);
    }

    Ok(generation)
}
