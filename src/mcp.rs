use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

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
    config::{self, IndexConfig},
    config_db::ConfigDb,
    data_dir::DataDir,
    error::{self, Error},
    index::NrtIndex,
    ingestion,
    paginate::Page,
    query::{Occurrence, QueryRequest},
};

const DEFAULT_PAGE_SIZE: usize = 10;
const DEFAULT_WAIT: Duration = Duration::from_secs(30);

struct McpState {
    index: NrtIndex,
    extensions: Vec<String>,
    /// Ingested when a call names no directory.
    doc_dir: PathBuf,
}

#[derive(Clone)]
pub struct DocnrtMcpServer {
    state: Arc<McpState>,
    tool_router: ToolRouter<Self>,
}

impl DocnrtMcpServer {
    fn new(state: McpState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }

    /// Run blocking index work off the async executor.
    async fn blocking<T, F>(&self, op: F) -> Result<T, rmcp::ErrorData>
    where
        T: Send + 'static,
        F: FnOnce(&McpState) -> error::Result<T> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || op(&state))
            .await
            .map_err(|e| mcp_error("index task failed", e))?
            .map_err(index_error)
    }
}

#[tool_router(router = tool_router)]
impl DocnrtMcpServer {
    #[tool(
        name = "docnrt_search",
        description = "Structured search. Each of must, should and mustNot maps a field (id, path, name, suffix, content) to keywords. Returns one page of hits ordered by score."
    )]
    pub async fn docnrt_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let request = params.to_request();
        let page = (
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        );

        let page = self
            .blocking(move |state| {
                state.index.search_request(&request, Some(page))
            })
            .await?;
        page_result(page)
    }

    #[tool(
        name = "docnrt_query",
        description = "Free-text search over document content using the engine's query syntax. Returns one page of hits ordered by score."
    )]
    pub async fn docnrt_query(
        &self,
        params: Parameters<QueryParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let page_index = params.page.unwrap_or(1);
        let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

        let page = self
            .blocking(move |state| {
                state.index.search_text(&params.query, page_index, page_size)
            })
            .await?;
        page_result(page)
    }

    #[tool(
        name = "docnrt_term",
        description = "Exact-term lookup. Maps fields to whole indexed values; a suffix term is required, other terms are alternatives."
    )]
    pub async fn docnrt_term(
        &self,
        params: Parameters<TermParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let terms: Vec<(String, String)> = params.terms.into_iter().collect();
        let page = (
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        );

        let page = self
            .blocking(move |state| state.index.search_terms(&terms, Some(page)))
            .await?;
        page_result(page)
    }

    #[tool(
        name = "docnrt_range",
        description = "Documents whose field value lies between lower and upper, both included, compared byte by byte."
    )]
    pub async fn docnrt_range(
        &self,
        params: Parameters<RangeParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let page = (
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        );

        let page = self
            .blocking(move |state| {
                state.index.search_range(
                    &params.field,
                    &params.lower,
                    &params.upper,
                    Some(page),
                )
            })
            .await?;
        page_result(page)
    }

    #[tool(
        name = "docnrt_ingest",
        description = "Index every matching file under a directory (the configured document directory when omitted) and wait until the new documents are searchable."
    )]
    pub async fn docnrt_ingest(
        &self,
        params: Parameters<IngestParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let timeout = params
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WAIT);

        let report = self
            .blocking(move |state| {
                let extensions = match &params.extensions {
                    Some(list) => list
                        .iter()
                        .flat_map(|e| config::parse_extensions(e))
                        .collect(),
                    None => state.extensions.clone(),
                };
                let root = params.path.as_ref().unwrap_or(&state.doc_dir);
                let report =
                    ingestion::ingest_dir(&state.index, root, &extensions)?;
                if let Some(generation) = report.last_generation {
                    state.index.wait_for_generation(generation, timeout)?;
                }
                Ok(report)
            })
            .await?;

        let summary = format!(
            "Indexed {} file(s), skipped {}",
            report.indexed, report.skipped
        );
        structured_result(summary, &report)
    }

    #[tool(
        name = "docnrt_delete",
        description = "Delete the document with the given id and wait until the deletion is visible."
    )]
    pub async fn docnrt_delete(
        &self,
        params: Parameters<DeleteParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let id = params.0.id;
        let generation = self
            .blocking(move |state| {
                let generation = state.index.delete_by_id(&id)?;
                state.index.wait_for_generation(generation, DEFAULT_WAIT)?;
                Ok(generation)
            })
            .await?;

        structured_result(
            format!("Deleted at generation {generation}"),
            &json!({ "generation": generation }),
        )
    }

    #[tool(
        name = "docnrt_stats",
        description = "Report document counts and snapshot generations."
    )]
    pub async fn docnrt_stats(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let stats = self.blocking(|state| state.index.stats()).await?;
        let summary = format!(
            "{} document(s) at generation {}",
            stats.num_docs, stats.generation
        );
        structured_result(summary, &stats)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocnrtMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docnrt", env!("CARGO_PKG_VERSION"))
                    .with_title("docnrt MCP"),
            )
            .with_instructions(
                "Use docnrt_search for field-based lookups (name, suffix, path), docnrt_term and docnrt_range for exact values, and docnrt_query for content search. Pages start at 1.",
            )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Field -> value that must match (substring).
    pub must: Option<BTreeMap<String, String>>,
    /// Field -> space-separated alternatives (substring).
    pub should: Option<BTreeMap<String, String>>,
    /// Field -> space-separated values to exclude.
    pub must_not: Option<BTreeMap<String, String>>,
    /// Page to return, starting at 1 (default: 1).
    pub page: Option<usize>,
    /// Hits per page (default: 10).
    pub page_size: Option<usize>,
}

impl SearchParams {
    fn to_request(&self) -> QueryRequest {
        let mut request = QueryRequest::new();
        let groups = [
            (Occurrence::Must, &self.must),
            (Occurrence::Should, &self.should),
            (Occurrence::MustNot, &self.must_not),
        ];
        for (occurrence, fields) in groups {
            for (field, keywords) in fields.iter().flatten() {
                request.insert(occurrence, field, keywords);
            }
        }
        request
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    /// Query string.
    pub query: String,
    /// Page to return, starting at 1 (default: 1).
    pub page: Option<usize>,
    /// Hits per page (default: 10).
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TermParams {
    /// Field -> exact indexed value.
    pub terms: BTreeMap<String, String>,
    /// Page to return, starting at 1 (default: 1).
    pub page: Option<usize>,
    /// Hits per page (default: 10).
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RangeParams {
    /// Field to compare.
    pub field: String,
    /// Smallest accepted value.
    pub lower: String,
    /// Largest accepted value.
    pub upper: String,
    /// Page to return, starting at 1 (default: 1).
    pub page: Option<usize>,
    /// Hits per page (default: 10).
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestParams {
    /// Directory to index (default: the configured document directory).
    pub path: Option<PathBuf>,
    /// Extensions to keep (default: the configured list).
    pub extensions: Option<Vec<String>>,
    /// How long to wait for the documents to become searchable.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteParams {
    /// Identity value of the document.
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultItem {
    id: Option<String>,
    path: String,
    name: String,
    suffix: String,
    score: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    page: usize,
    page_size: usize,
    generation: u64,
    result_count: usize,
    results: Vec<SearchResultItem>,
}

fn page_result(page: Page) -> Result<CallToolResult, rmcp::ErrorData> {
    let results: Vec<_> = page
        .hits
        .into_iter()
        .map(|hit| SearchResultItem {
            id: hit.document.id,
            path: hit.document.path,
            name: hit.document.name,
            suffix: hit.document.suffix,
            score: hit.score,
        })
        .collect();

    let response = SearchResponse {
        page: page.page_index,
        page_size: page.page_size,
        generation: page.generation.get(),
        result_count: results.len(),
        results,
    };
    let summary = format_search_summary(&response);
    structured_result(summary, &response)
}

fn format_search_summary(response: &SearchResponse) -> String {
    if response.results.is_empty() {
        return format!("No results on page {}", response.page);
    }

    let mut lines = Vec::with_capacity(response.results.len() + 1);
    let suffix = if response.result_count == 1 { "" } else { "s" };
    lines.push(format!(
        "Page {}: {} result{suffix}",
        response.page, response.result_count
    ));
    for item in &response.results {
        lines.push(format!("{:.3} {}", item.score, item.path));
    }
    lines.join("\n")
}

fn structured_result(
    summary: String,
    value: &impl Serialize,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let structured = serde_json::to_value(value)
        .map_err(|e| mcp_error("failed to serialize result", e))?;

    let mut result = CallToolResult::success(vec![Content::text(summary)]);
    result.structured_content = Some(structured);
    Ok(result)
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

/// Caller mistakes become invalid-params errors; everything else is
/// internal and flagged with whether a retry may help.
fn index_error(error: Error) -> rmcp::ErrorData {
    match error {
        Error::Validation(_)
        | Error::EmptyQuery
        | Error::QueryParse(_)
        | Error::NotFound { .. } => {
            rmcp::ErrorData::invalid_params(error.to_string(), None)
        }
        other => rmcp::ErrorData::internal_error(
            other.to_string(),
            Some(json!({ "retryable": other.is_retryable() })),
        ),
    }
}

pub fn run_mcp(data_dir: DataDir, config_db: ConfigDb) -> error::Result<()> {
    let index_dir = data_dir.index_dir(&config_db)?;
    let config = IndexConfig::from_config_db(&config_db, Some(index_dir))?;
    let extensions = config::extensions(&config_db)?;
    let doc_dir = data_dir.doc_dir(&config_db)?;
    let index = NrtIndex::open(config)?;

    let server = DocnrtMcpServer::new(McpState {
        index,
        extensions,
        doc_dir,
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            Error::Config(format!("MCP server initialization failed: {e}"))
        })?;
        running
            .waiting()
            .await
            .map_err(|e| Error::Config(format!("MCP server error: {e}")))?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_in(
        doc_dir: &std::path::Path,
        extensions: &[&str],
    ) -> DocnrtMcpServer {
        let config = IndexConfig::default()
            .with_staleness(Duration::from_millis(5), Duration::from_secs(60));
        DocnrtMcpServer::new(McpState {
            index: NrtIndex::open_in_ram(config).unwrap(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            doc_dir: doc_dir.to_path_buf(),
        })
    }

    fn server(extensions: &[&str]) -> DocnrtMcpServer {
        server_in(&std::env::temp_dir(), extensions)
    }

    fn results(result: &CallToolResult) -> Vec<serde_json::Value> {
        result
            .structured_content
            .as_ref()
            .and_then(|v| v.get("results"))
            .and_then(|v| v.as_array())
            .cloned()
            .expect("results array")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ingest_then_search_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("index.html"), "<p>home page</p>")
            .unwrap();
        std::fs::write(tmp.path().join("theme.css"), "body {}").unwrap();
        std::fs::write(tmp.path().join("notes.md"), "ignored").unwrap();
        let server = server(&["html", "css"]);

        let ingest = server
            .docnrt_ingest(Parameters(IngestParams {
                path: Some(tmp.path().to_path_buf()),
                extensions: None,
                timeout_ms: Some(10_000),
            }))
            .await
            .unwrap();
        let report = ingest.structured_content.unwrap();
        assert_eq!(report.get("indexed"), Some(&json!(2)));

        let search = server
            .docnrt_search(Parameters(SearchParams {
                should: Some(BTreeMap::from([(
                    "name".to_string(),
                    "THEME".to_string(),
                )])),
                ..SearchParams::default()
            }))
            .await
            .unwrap();
        let hits = results(&search);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get("id"), Some(&json!("theme.css")));

        server
            .docnrt_delete(Parameters(DeleteParams {
                id: "theme.css".to_string(),
            }))
            .await
            .unwrap();
        let stats = server.docnrt_stats().await.unwrap();
        let stats = stats.structured_content.unwrap();
        assert_eq!(stats.get("num_docs"), Some(&json!(1)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_search_is_invalid_params() {
        let server = server(&["html"]);
        let err = server
            .docnrt_search(Parameters(SearchParams::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn query_pages_through_content() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..3 {
            std::fs::write(
                tmp.path().join(format!("page{i}.html")),
                "shared words",
            )
            .unwrap();
        }
        let server = server(&["html"]);
        server
            .docnrt_ingest(Parameters(IngestParams {
                path: Some(tmp.path().to_path_buf()),
                extensions: Some(vec!["HTML".to_string()]),
                timeout_ms: None,
            }))
            .await
            .unwrap();

        let second = server
            .docnrt_query(Parameters(QueryParams {
                query: "shared".to_string(),
                page: Some(2),
                page_size: Some(2),
            }))
            .await
            .unwrap();
        assert_eq!(results(&second).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ingest_defaults_to_the_document_directory() {
        let docs = tempfile::tempdir().unwrap();
        std::fs::write(docs.path().join("guide.md"), "read me").unwrap();
        std::fs::write(docs.path().join("intro.md"), "start here").unwrap();
        let server = server_in(docs.path(), &["md"]);

        let ingest = server
            .docnrt_ingest(Parameters(IngestParams {
                path: None,
                extensions: None,
                timeout_ms: Some(10_000),
            }))
            .await
            .unwrap();
        let report = ingest.structured_content.unwrap();
        assert_eq!(report.get("indexed"), Some(&json!(2)));

        let term = server
            .docnrt_term(Parameters(TermParams {
                terms: BTreeMap::from([(
                    "id".to_string(),
                    "guide.md".to_string(),
                )]),
                page: None,
                page_size: None,
            }))
            .await
            .unwrap();
        assert_eq!(results(&term).len(), 1);

        let range = server
            .docnrt_range(Parameters(RangeParams {
                field: "name".to_string(),
                lower: "a".to_string(),
                upper: "h".to_string(),
                page: None,
                page_size: None,
            }))
            .await
            .unwrap();
        let hits = results(&range);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get("id"), Some(&json!("guide.md")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_text_query_is_invalid_params() {
        let server = server(&["html"]);
        let err = server
            .docnrt_query(Parameters(QueryParams {
                query: "title:draft".to_string(),
                page: None,
                page_size: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);
    }
}
