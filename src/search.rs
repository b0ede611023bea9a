use serde::Serialize;

use crate::{
    doc_id::DocumentId,
    engine::RetrievalEngine,
    error::Result,
    index::SearchHit,
    text_util::{DEFAULT_PREVIEW_MAX_CHARS, preview},
};

/// Parameters for a search, shared by the CLI and the MCP server.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub count: usize,
    /// Restrict to these documents; empty searches everything.
    pub documents: Vec<DocumentId>,
    pub min_score: f32,
}

/// A search hit with its 1-based rank.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub rank: usize,
    #[serde(flatten)]
    pub hit: SearchHit,
}

/// Run a search and drop hits below `min_score`.
pub fn execute_search(
    engine: &RetrievalEngine,
    params: &SearchParams,
) -> Result<Vec<RankedResult>> {
    let hits = engine.search(&params.query, params.count, &params.documents)?;

    Ok(hits
        .into_iter()
        .filter(|hit| hit.score >= params.min_score)
        .enumerate()
        .map(|(i, hit)| RankedResult { rank: i + 1, hit })
        .collect())
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [RankedResult],
}

/// Render results as a single JSON object.
pub fn render_json(results: &[RankedResult], query: &str) -> Result<String> {
    Ok(serde_json::to_string_pretty(&JsonOutput {
        query,
        result_count: results.len(),
        results,
    })?)
}

/// Render results for a terminal, one block per hit.
pub fn render_human(results: &[RankedResult]) -> String {
    if results.is_empty() {
        return "No results found.\n".to_string();
    }

    let mut out = String::new();
    for r in results {
        out.push_str(&format!(
            "{:>3}. [{:.4}] {} ({}) chunk {} [{}..{}]\n",
            r.rank,
            r.hit.score,
            r.hit.filename,
            r.hit.document_id,
            r.hit.chunk_index,
            r.hit.char_start,
            r.hit.char_end,
        ));
        out.push_str(&format!(
            "     {}\n",
            preview(&r.hit.text, DEFAULT_PREVIEW_MAX_CHARS)
        ));
    }
    out
}
