//! docrag - a local, offline document retrieval engine.
//!
//! docrag ingests PDF, plain-text and DOCX documents, splits them into
//! overlapping character windows, embeds each window with a TF-IDF model
//! fitted over the whole corpus (falling back to content-hash vectors when
//! the corpus is too small), and answers exact cosine-similarity queries,
//! optionally restricted to a set of documents. Everything lives in a single
//! [redb](https://github.com/cberner/redb) file; nothing leaves the machine.
//!
//! # Quick start
//!
//! ```no_run
//! use docrag::{ConfigDb, DataDir, EngineConfig, RetrievalEngine};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
//! let config = EngineConfig::resolve(&config_db).unwrap();
//! let engine = RetrievalEngine::open(&data_dir.index_db(), config).unwrap();
//!
//! let bytes = std::fs::read("contract.pdf").unwrap();
//! let outcome = engine.ingest(&bytes, "contract.pdf", None).unwrap();
//!
//! for hit in engine.search("termination notice", 5, &[outcome.document_id]).unwrap() {
//!     println!("{:.3} {}#{}: {}", hit.score, hit.filename, hit.chunk_index, hit.text);
//! }
//! ```

pub mod chunking;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod engine;
pub mod error;
pub mod extract;
pub mod index;
pub mod mcp;
pub mod search;
pub mod store;
pub mod text_util;
pub mod vectorizer;
pub mod walker;

pub use config::EngineConfig;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use engine::{IngestOutcome, RetrievalEngine};
pub use error::{Error, Result};
pub use extract::SourceType;
pub use index::{Document, SearchHit};
pub use store::VectorStore;
pub use vectorizer::{EmbeddingMode, Vectorizer};
