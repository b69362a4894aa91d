//! DuckDuckGo search toolkit.
//!
//! Provides web search and news search via DuckDuckGo's HTML interface.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AnalystError, Result};
use crate::tool::{Tool, ToolRegistry};

const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

/// DuckDuckGo search result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    pub body: String,
}

/// Configuration for DuckDuckGo tools
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuckDuckGoConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DuckDuckGoConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_results: default_max_results(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_results() -> usize {
    5
}

fn default_timeout_secs() -> u64 {
    10
}

/// Create a DuckDuckGo toolkit with search and news tools. Empty when disabled.
pub fn duckduckgo_toolkit(config: DuckDuckGoConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    if !config.enabled {
        return Ok(registry);
    }
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent("Mozilla/5.0 (compatible; FinanceAnalyst/0.1)")
        .build()
        .map_err(|err| AnalystError::Config(format!("http client error: {err}")))?;
    registry.register(DuckDuckGoSearchTool {
        client: client.clone(),
        max_results: config.max_results,
    });
    registry.register(DuckDuckGoNewsTool {
        client,
        max_results: config.max_results,
    });
    Ok(registry)
}

fn query_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": "Search terms"},
            "max_results": {"type": "integer", "description": "Maximum number of results"}
        },
        "required": ["query"]
    })
}

fn read_query_input(input: &Value, tool: &str, default_max: usize) -> Result<(String, usize)> {
    let query = input
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| AnalystError::Protocol(format!("missing `query` for {tool}")))?;
    let max_results = input
        .get("max_results")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(default_max);
    Ok((query.to_string(), max_results))
}

struct DuckDuckGoSearchTool {
    client: reqwest::Client,
    max_results: usize,
}

#[async_trait]
impl Tool for DuckDuckGoSearchTool {
    fn name(&self) -> &str {
        "duckduckgo_search"
    }

    fn description(&self) -> &str {
        "Search the web using DuckDuckGo. Returns titles, links and snippets."
    }

    fn parameters(&self) -> Option<Value> {
        Some(query_parameters())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let (query, max_results) = read_query_input(&input, self.name(), self.max_results)?;
        let results = search(&self.client, self.name(), &query, max_results).await?;
        Ok(json!({ "query": query, "results": results }))
    }
}

struct DuckDuckGoNewsTool {
    client: reqwest::Client,
    max_results: usize,
}

#[async_trait]
impl Tool for DuckDuckGoNewsTool {
    fn name(&self) -> &str {
        "duckduckgo_news"
    }

    fn description(&self) -> &str {
        "Get the latest news articles on a topic from DuckDuckGo."
    }

    fn parameters(&self) -> Option<Value> {
        Some(query_parameters())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let (query, max_results) = read_query_input(&input, self.name(), self.max_results)?;
        let results = search(
            &self.client,
            self.name(),
            &format!("{query} news"),
            max_results,
        )
        .await?;
        Ok(json!({ "query": query, "results": results }))
    }
}

async fn search(
    client: &reqwest::Client,
    tool: &str,
    query: &str,
    max_results: usize,
) -> Result<Vec<SearchResult>> {
    let invocation = |err: reqwest::Error| AnalystError::ToolInvocation {
        name: tool.to_string(),
        source: Box::new(err),
    };
    let url = format!("{SEARCH_URL}?q={}", urlencoding::encode(query));
    tracing::debug!(tool, query, "searching duckduckgo");
    let html = client
        .get(&url)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(invocation)?
        .text()
        .await
        .map_err(invocation)?;
    Ok(parse_results(&html, max_results))
}

fn result_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
            .expect("valid result link pattern")
    })
}

fn snippet_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#)
            .expect("valid snippet pattern")
    })
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"))
}

/// Extracts results from DuckDuckGo's HTML page. Each result block starts at
/// a `result__a` link; the snippet, if any, follows within the same block.
fn parse_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let links: Vec<_> = result_link_pattern().captures_iter(html).collect();
    let mut results = Vec::new();
    for (idx, caps) in links.iter().enumerate() {
        if results.len() >= max_results {
            break;
        }
        let (Some(whole), Some(href), Some(title)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let block_end = links
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(html.len());
        let body = snippet_pattern()
            .captures(&html[whole.end()..block_end])
            .and_then(|c| c.get(1))
            .map(|m| clean_text(m.as_str()))
            .unwrap_or_default();

        let href = resolve_href(&html_decode(href.as_str()));
        let title = clean_text(title.as_str());
        if href.starts_with("http") && !title.is_empty() {
            results.push(SearchResult { title, href, body });
        }
    }
    results
}

/// DuckDuckGo wraps targets as `//duckduckgo.com/l/?uddg=<encoded>&...`.
fn resolve_href(href: &str) -> String {
    if let Some(start) = href.find("uddg=") {
        let encoded = href[start + 5..].split('&').next().unwrap_or_default();
        if let Ok(decoded) = urlencoding::decode(encoded) {
            return decoded.into_owned();
        }
    }
    href.to_string()
}

fn clean_text(fragment: &str) -> String {
    html_decode(tag_pattern().replace_all(fragment, "").trim())
}

/// Simple HTML entity decoding
fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
}
