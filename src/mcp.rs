use std::{path::PathBuf, sync::Arc};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config::EngineConfig,
    config_db::ConfigDb,
    data_dir::DataDir,
    doc_id::DocumentId,
    engine::RetrievalEngine,
    error,
    search::{self, RankedResult},
    text_util::{DEFAULT_PREVIEW_MAX_CHARS, preview},
};

const DEFAULT_SEARCH_LIMIT: usize = 5;

#[derive(Clone)]
pub struct DocragMcpServer {
    engine: Arc<RetrievalEngine>,
    tool_router: ToolRouter<Self>,
}

impl DocragMcpServer {
    pub fn new(engine: RetrievalEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocragMcpServer {
    #[tool(
        name = "docrag_search",
        description = "Search ingested documents by meaning-bearing terms. Optionally restrict to document ids."
    )]
    pub async fn docrag_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let request = search::SearchParams {
            query: params.query.clone(),
            count: params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            documents: params
                .document_ids
                .unwrap_or_default()
                .into_iter()
                .map(DocumentId::from)
                .collect(),
            min_score: params.min_score.unwrap_or(-1.0),
        };

        let results = match search::execute_search(&self.engine, &request) {
            Ok(results) => results,
            Err(e) => return Ok(tool_failure("search failed", &e)),
        };

        let include_text = params.include_text.unwrap_or(true);
        let items: Vec<SearchResultItem> = results
            .iter()
            .map(|r| SearchResultItem::new(r, include_text))
            .collect();

        let summary = format_search_summary(&items, &params.query);
        structured(
            summary,
            &SearchResponse {
                query: params.query,
                result_count: items.len(),
                results: items,
            },
        )
    }

    #[tool(
        name = "docrag_ingest",
        description = "Ingest a PDF, plain-text or DOCX file from the local filesystem."
    )]
    pub async fn docrag_ingest(
        &self,
        params: Parameters<IngestParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let IngestParams { path, mime_hint } = params.0;
        let engine = Arc::clone(&self.engine);

        let outcome = tokio::task::spawn_blocking(move || {
            engine.ingest_path(&path, mime_hint.as_deref())
        })
        .await
        .map_err(|e| mcp_error("ingest task failed", e))?;

        match outcome {
            Ok(outcome) => {
                let mut summary = format!(
                    "Ingested {} as {} ({} chunks)",
                    outcome.filename, outcome.document_id, outcome.chunk_count
                );
                if outcome.degraded {
                    summary.push_str("; embeddings degraded to hash fallback");
                }
                structured(summary, &outcome)
            }
            Err(e) => Ok(tool_failure("ingestion failed", &e)),
        }
    }

    #[tool(
        name = "docrag_delete",
        description = "Delete a document and all its chunks. Unknown ids are a no-op."
    )]
    pub async fn docrag_delete(
        &self,
        params: Parameters<DeleteParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let id = DocumentId::from(params.0.document_id);
        let engine = Arc::clone(&self.engine);
        let target = id.clone();

        let removed = tokio::task::spawn_blocking(move || engine.remove(&target))
            .await
            .map_err(|e| mcp_error("delete task failed", e))?;

        match removed {
            Ok(deleted) => {
                let summary = if deleted {
                    format!("Deleted {id}")
                } else {
                    format!("No document with id {id}")
                };
                structured(summary, &json!({ "documentId": id, "deleted": deleted }))
            }
            Err(e) => Ok(tool_failure("delete failed", &e)),
        }
    }

    #[tool(name = "docrag_stats", description = "Show index statistics.")]
    pub async fn docrag_stats(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let stats = self.engine.stats();
        let summary = format!(
            "{} documents, {} chunks, generation {}",
            stats.document_count, stats.chunk_count, stats.generation
        );
        structured(summary, &stats)
    }

    #[tool(name = "docrag_list", description = "List ingested documents.")]
    pub async fn docrag_list(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let documents = self.engine.list_documents();
        let mut lines = vec![format!("{} documents", documents.len())];
        lines.extend(documents.iter().map(|d| {
            format!("{} {} ({} chunks)", d.id, d.filename, d.chunk_count)
        }));
        structured(lines.join("\n"), &json!({ "documents": documents }))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocragMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = Implementation::new("docrag", env!("CARGO_PKG_VERSION"))
            .with_title("docrag MCP");
        info.instructions = Some(
            "Use docrag_ingest to add files, docrag_search to retrieve relevant passages, and docrag_list to find document ids for filtering."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of results (default: 5).
    pub limit: Option<usize>,
    /// Restrict to these document ids.
    pub document_ids: Option<Vec<String>>,
    /// Minimum cosine similarity.
    pub min_score: Option<f32>,
    /// Include the chunk text in each result (default: true).
    pub include_text: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestParams {
    /// Path of the file to ingest.
    pub path: PathBuf,
    /// MIME type or extension overriding detection from the file name.
    pub mime_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteParams {
    pub document_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<SearchResultItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultItem {
    rank: usize,
    document_id: String,
    filename: String,
    chunk_index: usize,
    score: f32,
    char_start: usize,
    char_end: usize,
    text: Option<String>,
}

impl SearchResultItem {
    fn new(result: &RankedResult, include_text: bool) -> Self {
        let hit = &result.hit;
        Self {
            rank: result.rank,
            document_id: hit.document_id.to_string(),
            filename: hit.filename.clone(),
            chunk_index: hit.chunk_index,
            score: hit.score,
            char_start: hit.char_start,
            char_end: hit.char_end,
            text: include_text.then(|| hit.text.clone()),
        }
    }
}

fn format_search_summary(results: &[SearchResultItem], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for item in results {
        let mut line = format!(
            "{:.3} {} #{} {}",
            item.score, item.document_id, item.chunk_index, item.filename
        );
        if let Some(text) = &item.text {
            line.push_str(&format!(
                "\n    {}",
                preview(text, DEFAULT_PREVIEW_MAX_CHARS / 2)
            ));
        }
        lines.push(line);
    }

    lines.join("\n")
}

fn structured(
    summary: String,
    value: &impl Serialize,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let structured = serde_json::to_value(value)
        .map_err(|e| mcp_error("failed to serialize result", e))?;
    let mut result = CallToolResult::success(vec![Content::text(summary)]);
    result.structured_content = Some(structured);
    Ok(result)
}

/// An engine error reported to the client as a failed tool call.
fn tool_failure(message: &str, error: &error::Error) -> CallToolResult {
    let mut detail = json!({ "error": error.to_string() });
    if let Some(stage) = error.stage() {
        detail["stage"] = json!(stage.to_string());
    }
    let mut result =
        CallToolResult::error(vec![Content::text(format!("{message}: {error}"))]);
    result.structured_content = Some(detail);
    result
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(data_dir: DataDir, config_db: ConfigDb) -> error::Result<()> {
    let config = EngineConfig::resolve(&config_db)?;
    let engine = RetrievalEngine::open(&data_dir.index_db(), config)?;
    let server = DocragMcpServer::new(engine);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(tmp: &tempfile::TempDir) -> DocragMcpServer {
        let engine = RetrievalEngine::open(
            &tmp.path().join("index.redb"),
            EngineConfig::default(),
        )
        .unwrap();
        DocragMcpServer::new(engine)
    }

    fn summary(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    async fn ingest(server: &DocragMcpServer, path: PathBuf) -> CallToolResult {
        server
            .docrag_ingest(Parameters(IngestParams {
                path,
                mime_hint: None,
            }))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ingest_then_search_returns_structured_results() {
        let tmp = tempfile::tempdir().unwrap();
        let lease = tmp.path().join("lease.txt");
        std::fs::write(&lease, "The tenant pays rent monthly.").unwrap();
        let invoice = tmp.path().join("invoice.txt");
        std::fs::write(&invoice, "Invoices are payable within thirty days.")
            .unwrap();

        let server = server(&tmp);
        let ingested = ingest(&server, lease).await;
        assert_eq!(ingested.is_error, Some(false));
        let lease_id = ingested.structured_content.unwrap()["document_id"]
            .as_str()
            .unwrap()
            .to_string();
        ingest(&server, invoice).await;

        let result = server
            .docrag_search(Parameters(SearchParams {
                query: "rent".to_string(),
                limit: Some(5),
                document_ids: None,
                min_score: Some(0.01),
                include_text: Some(true),
            }))
            .await
            .unwrap();

        let structured = result.structured_content.clone().expect("structured");
        let results = structured["results"].as_array().expect("results array");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["documentId"].as_str(), Some(lease_id.as_str()));
        assert_eq!(results[0]["filename"].as_str(), Some("lease.txt"));
        assert!(summary(&result).contains("Found 1 result"));
    }

    #[tokio::test]
    async fn search_on_empty_index_is_a_tool_error() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server(&tmp);
        let result = server
            .docrag_search(Parameters(SearchParams {
                query: "anything".to_string(),
                limit: None,
                document_ids: None,
                min_score: None,
                include_text: None,
            }))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
        assert!(summary(&result).contains("empty"));
    }

    #[tokio::test]
    async fn failed_ingest_reports_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("photo.png");
        std::fs::write(&bogus, b"\x89PNG").unwrap();

        let server = server(&tmp);
        let result = ingest(&server, bogus).await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(
            result.structured_content.unwrap()["stage"].as_str(),
            Some("extract")
        );
    }

    #[tokio::test]
    async fn delete_list_and_stats() {
        let tmp = tempfile::tempdir().unwrap();
        let note = tmp.path().join("note.txt");
        std::fs::write(&note, "Remember the quarterly filing deadline.").unwrap();

        let server = server(&tmp);
        let id = ingest(&server, note).await.structured_content.unwrap()
            ["document_id"]
            .as_str()
            .unwrap()
            .to_string();

        let listed = server.docrag_list().await.unwrap();
        let documents = &listed.structured_content.unwrap()["documents"];
        assert_eq!(documents.as_array().map(Vec::len), Some(1));

        let deleted = server
            .docrag_delete(Parameters(DeleteParams {
                document_id: id.clone(),
            }))
            .await
            .unwrap();
        assert_eq!(deleted.structured_content.unwrap()["deleted"], true);

        let again = server
            .docrag_delete(Parameters(DeleteParams { document_id: id }))
            .await
            .unwrap();
        assert_eq!(again.is_error, Some(false));
        assert_eq!(again.structured_content.unwrap()["deleted"], false);

        let stats = server.docrag_stats().await.unwrap();
        assert_eq!(stats.structured_content.unwrap()["document_count"], 0);
    }
}
