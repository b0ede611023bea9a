use std::io::{Cursor, Write};

use docrag::{
    DocumentId,
    EmbeddingMode,
    EngineConfig,
    Error,
    RetrievalEngine,
    SourceType,
};

fn open(dir: &std::path::Path, config: EngineConfig) -> RetrievalEngine {
    RetrievalEngine::open(&dir.join("index.redb"), config).unwrap()
}

/// 1000 characters of distinct, single-spaced words.
fn thousand_char_text() -> String {
    let words: Vec<String> = (0..125).map(|i| format!("tok{i:04}")).collect();
    let mut text = words.join(" ");
    text.push('x');
    assert_eq!(text.chars().count(), 1000);
    text
}

fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
        .collect();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    );
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
    writer.write_all(xml.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

#[test]
fn thousand_chars_split_into_three_windows() {
    let tmp = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        chunk_size: 400,
        chunk_overlap: 50,
        ..EngineConfig::default()
    };
    let engine = open(tmp.path(), config);
    let text = thousand_char_text();

    let outcome = engine.ingest(text.as_bytes(), "tokens.txt", None).unwrap();
    assert_eq!(outcome.chunk_count, 3);
    assert!(!outcome.degraded);

    let generation = engine.snapshot();
    let starts: Vec<usize> =
        generation.chunks.iter().map(|c| c.chunk.char_start).collect();
    assert_eq!(starts, vec![0, 350, 700]);

    let third = generation.chunks[2].chunk.text.clone();
    let hits = engine.search(&third, 3, &[]).unwrap();
    assert_eq!(hits[0].chunk_index, 2);
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn every_vector_has_the_configured_dimension() {
    let tmp = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        dimension: 48,
        chunk_size: 200,
        chunk_overlap: 20,
        ..EngineConfig::default()
    };
    let engine = open(tmp.path(), config);

    // First ingest is degraded (one chunk), the second is not.
    let first = engine
        .ingest(b"A lone short note about quarterly taxes.", "note.txt", None)
        .unwrap();
    assert!(first.degraded);
    assert!(
        engine.snapshot().chunks.iter().all(|c| c.vector.len() == 48)
    );

    engine
        .ingest(thousand_char_text().as_bytes(), "tokens.txt", None)
        .unwrap();
    let generation = engine.snapshot();
    assert_eq!(
        generation.vectorizer.as_ref().map(|v| v.mode()),
        Some(EmbeddingMode::Tfidf)
    );
    assert!(generation.chunks.iter().all(|c| c.vector.len() == 48));
}

#[test]
fn filter_never_leaks_other_documents() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = open(tmp.path(), EngineConfig::default());
    let a = engine
        .ingest(b"Contract renewal terms and notice periods.", "a.txt", None)
        .unwrap();
    let b = engine
        .ingest(b"Renewal of the software license and support terms.", "b.txt", None)
        .unwrap();

    let only_a = engine
        .search("renewal terms", 10, std::slice::from_ref(&a.document_id))
        .unwrap();
    assert!(!only_a.is_empty());
    assert!(only_a.iter().all(|h| h.document_id == a.document_id));

    let all = engine.search("renewal terms", 10, &[]).unwrap();
    let ids: Vec<&DocumentId> = all.iter().map(|h| &h.document_id).collect();
    assert!(ids.contains(&&a.document_id));
    assert!(ids.contains(&&b.document_id));
}

#[test]
fn delete_cascades_and_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        chunk_size: 400,
        chunk_overlap: 50,
        ..EngineConfig::default()
    };
    let engine = open(tmp.path(), config);
    let tokens = engine
        .ingest(thousand_char_text().as_bytes(), "tokens.txt", None)
        .unwrap();
    engine
        .ingest(b"Unrelated memo about the office picnic.", "memo.txt", None)
        .unwrap();

    let before = engine.stats().chunk_count;
    assert!(engine.remove(&tokens.document_id).unwrap());
    assert_eq!(engine.stats().chunk_count, before - tokens.chunk_count);

    let hits = engine.search("tok0001 tok0002", 10, &[]).unwrap();
    assert!(hits.iter().all(|h| h.document_id != tokens.document_id));

    assert!(!engine.delete_document(&tokens.document_id).unwrap());
    assert!(!engine.remove(&DocumentId::from("doc_ffff_ffffffff")).unwrap());
}

#[test]
fn index_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let id = {
        let engine = open(tmp.path(), EngineConfig::default());
        engine
            .ingest(b"Minutes of the annual shareholder meeting.", "minutes.txt", None)
            .unwrap();
        engine
            .ingest(b"Board resolution approving the budget.", "resolution.txt", None)
            .unwrap()
            .document_id
    };

    let engine = open(tmp.path(), EngineConfig::default());
    assert_eq!(engine.stats().document_count, 2);
    let hits = engine.search("budget resolution", 1, &[]).unwrap();
    assert_eq!(hits[0].document_id, id);
}

#[test]
fn docx_documents_are_searchable() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = open(tmp.path(), EngineConfig::default());
    let bytes = docx(&["Employee handbook", "Vacation requests need two weeks notice."]);

    let outcome = engine.ingest(&bytes, "handbook.docx", None).unwrap();
    assert_eq!(outcome.source_type, SourceType::Docx);
    engine
        .ingest(b"Expense reports are due monthly.", "expenses.txt", None)
        .unwrap();

    let hits = engine.search("vacation notice", 1, &[]).unwrap();
    assert_eq!(hits[0].document_id, outcome.document_id);
    assert!(hits[0].text.contains("Vacation requests"));
}

#[test]
fn failed_ingest_leaves_index_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = open(tmp.path(), EngineConfig::default());
    engine
        .ingest(b"Baseline document content.", "base.txt", None)
        .unwrap();
    let before = engine.snapshot();

    let err = engine
        .ingest(b"%PDF-1.7 truncated garbage", "broken.pdf", None)
        .unwrap_err();
    assert!(matches!(err, Error::IngestionFailed { .. }));
    assert_eq!(*engine.snapshot(), *before);

    drop(engine);
    let reopened = open(tmp.path(), EngineConfig::default());
    assert_eq!(reopened.stats().document_count, 1);
}

#[test]
fn mime_hint_overrides_filename() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = open(tmp.path(), EngineConfig::default());
    let outcome = engine
        .ingest(b"plain words in a file without extension", "README", Some("text/plain"))
        .unwrap();
    assert_eq!(outcome.source_type, SourceType::Text);

    let err = engine.ingest(b"data", "README", None).unwrap_err();
    assert!(matches!(
        err,
        Error::IngestionFailed { ref source, .. }
            if matches!(**source, Error::UnsupportedFormat { .. })
    ));
}
