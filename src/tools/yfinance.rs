//! Yahoo Finance market data toolkit.
//!
//! Each sub-capability (current price, analyst recommendations, fundamentals)
//! is its own tool and can be switched off in [`YFinanceConfig`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::error::{AnalystError, Result};
use crate::tool::{Tool, ToolRegistry};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const SUMMARY_URL: &str = "https://query2.finance.yahoo.com/v10/finance/quoteSummary";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query2.finance.yahoo.com/v1/test/getcrumb";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct YFinanceConfig {
    #[serde(default = "enabled")]
    pub stock_price: bool,
    #[serde(default = "enabled")]
    pub analyst_recommendations: bool,
    #[serde(default = "enabled")]
    pub stock_fundamentals: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for YFinanceConfig {
    fn default() -> Self {
        Self {
            stock_price: true,
            analyst_recommendations: true,
            stock_fundamentals: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

fn tool_error(tool: &str, err: reqwest::Error) -> AnalystError {
    AnalystError::ToolInvocation {
        name: tool.to_string(),
        source: Box::new(err),
    }
}

/// Shared HTTP plumbing for the Yahoo endpoints.
///
/// quoteSummary only answers requests that carry the session cookie set by
/// `fc.yahoo.com` and the crumb issued for it, so both are kept for the
/// client's lifetime.
struct YahooClient {
    http: reqwest::Client,
    crumb: Mutex<Option<String>>,
}

impl YahooClient {
    fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            crumb: Mutex::new(None),
        }
    }

    async fn get_json(&self, tool: &str, url: &str) -> Result<Value> {
        tracing::debug!(tool, url, "querying yahoo finance");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| tool_error(tool, err))?;
        let status = response.status();
        // Rejections still carry a JSON error envelope worth reporting.
        match response.json::<Value>().await {
            Ok(body) => Ok(body),
            Err(err) if status.is_success() => Err(tool_error(tool, err)),
            Err(_) => Err(AnalystError::Protocol(format!(
                "yahoo finance answered {status}"
            ))),
        }
    }

    async fn crumb(&self, tool: &str) -> Result<String> {
        let mut cached = self.crumb.lock().await;
        if let Some(crumb) = cached.as_ref() {
            return Ok(crumb.clone());
        }
        // The cookie comes back on a 404, so only transport errors count.
        self.http
            .get(COOKIE_URL)
            .send()
            .await
            .map_err(|err| tool_error(tool, err))?;
        let text = self
            .http
            .get(CRUMB_URL)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| tool_error(tool, err))?
            .text()
            .await
            .map_err(|err| tool_error(tool, err))?;
        let crumb = parse_crumb(&text)?;
        tracing::debug!(tool, "fetched yahoo finance crumb");
        *cached = Some(crumb.clone());
        Ok(crumb)
    }

    async fn chart(&self, tool: &str, symbol: &str) -> Result<Value> {
        let url = format!(
            "{CHART_URL}/{}?range=1d&interval=1d",
            urlencoding::encode(symbol)
        );
        let body = self.get_json(tool, &url).await?;
        check_finance_error(&body)?;
        Ok(body)
    }

    async fn summary(&self, tool: &str, symbol: &str, modules: &str) -> Result<Value> {
        let crumb = self.crumb(tool).await?;
        let mut body = self
            .get_json(tool, &summary_url(symbol, modules, &crumb))
            .await?;
        if crumb_rejected(&body) {
            tracing::debug!(tool, "yahoo finance crumb expired, refreshing");
            self.crumb.lock().await.take();
            let crumb = self.crumb(tool).await?;
            body = self
                .get_json(tool, &summary_url(symbol, modules, &crumb))
                .await?;
        }
        check_finance_error(&body)?;
        Ok(body)
    }
}

fn summary_url(symbol: &str, modules: &str, crumb: &str) -> String {
    format!(
        "{SUMMARY_URL}/{}?modules={modules}&crumb={}",
        urlencoding::encode(symbol),
        urlencoding::encode(crumb)
    )
}

fn parse_crumb(text: &str) -> Result<String> {
    let crumb = text.trim();
    if crumb.is_empty() || crumb.contains(|c: char| c.is_whitespace() || c == '<' || c == '{') {
        return Err(AnalystError::Protocol(
            "yahoo finance did not issue a crumb".into(),
        ));
    }
    Ok(crumb.to_string())
}

fn crumb_rejected(body: &Value) -> bool {
    body["finance"]["error"]["code"].as_str() == Some("Unauthorized")
}

/// Yahoo reports request-level failures as `{"finance": {"error": {...}}}`.
fn check_finance_error(body: &Value) -> Result<()> {
    let error = &body["finance"]["error"];
    if error.is_null() {
        return Ok(());
    }
    let code = error["code"].as_str().unwrap_or("unknown");
    let description = error["description"].as_str().unwrap_or("no description");
    Err(AnalystError::Protocol(format!(
        "yahoo finance refused the request ({code}): {description}"
    )))
}

/// Builds the market data toolkit from the enabled sub-options.
pub fn yfinance_toolkit(config: YFinanceConfig) -> Result<ToolRegistry> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent("Mozilla/5.0 (compatible; FinanceAnalyst/0.1)")
        .cookie_store(true)
        .build()
        .map_err(|err| AnalystError::Config(format!("http client error: {err}")))?;
    let client = Arc::new(YahooClient::new(http));

    let mut registry = ToolRegistry::new();
    if config.stock_price {
        registry.register(StockPriceTool {
            client: Arc::clone(&client),
        });
    }
    if config.analyst_recommendations {
        registry.register(AnalystRecommendationsTool {
            client: Arc::clone(&client),
        });
    }
    if config.stock_fundamentals {
        registry.register(StockFundamentalsTool { client });
    }
    Ok(registry)
}

fn symbol_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "symbol": {"type": "string", "description": "Ticker symbol, e.g. AAPL or RELIANCE.NS"}
        },
        "required": ["symbol"]
    })
}

fn read_symbol(input: &Value, tool: &str) -> Result<String> {
    input
        .get("symbol")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AnalystError::Protocol(format!("missing `symbol` for {tool}")))
}

struct StockPriceTool {
    client: Arc<YahooClient>,
}

#[async_trait]
impl Tool for StockPriceTool {
    fn name(&self) -> &str {
        "get_current_stock_price"
    }

    fn description(&self) -> &str {
        "Get the current stock price for a ticker symbol."
    }

    fn parameters(&self) -> Option<Value> {
        Some(symbol_parameters())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let symbol = read_symbol(&input, self.name())?;
        let body = self.client.chart(self.name(), &symbol).await?;
        parse_price(&symbol, &body)
    }
}

struct AnalystRecommendationsTool {
    client: Arc<YahooClient>,
}

#[async_trait]
impl Tool for AnalystRecommendationsTool {
    fn name(&self) -> &str {
        "get_analyst_recommendations"
    }

    fn description(&self) -> &str {
        "Get analyst buy/hold/sell recommendation counts for a ticker symbol."
    }

    fn parameters(&self) -> Option<Value> {
        Some(symbol_parameters())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let symbol = read_symbol(&input, self.name())?;
        let body = self
            .client
            .summary(self.name(), &symbol, "recommendationTrend")
            .await?;
        parse_recommendations(&symbol, &body)
    }
}

struct StockFundamentalsTool {
    client: Arc<YahooClient>,
}

#[async_trait]
impl Tool for StockFundamentalsTool {
    fn name(&self) -> &str {
        "get_stock_fundamentals"
    }

    fn description(&self) -> &str {
        "Get fundamental data (sector, market cap, P/E, EPS, beta, 52-week range) for a ticker symbol."
    }

    fn parameters(&self) -> Option<Value> {
        Some(symbol_parameters())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let symbol = read_symbol(&input, self.name())?;
        let body = self
            .client
            .summary(
                self.name(),
                &symbol,
                "price,assetProfile,summaryDetail,defaultKeyStatistics",
            )
            .await?;
        parse_fundamentals(&symbol, &body)
    }
}

fn first_result<'a>(body: &'a Value, root: &str, symbol: &str) -> Result<&'a Value> {
    let node = &body[root];
    if let Some(description) = node["error"]["description"].as_str() {
        return Err(AnalystError::Protocol(format!(
            "yahoo finance rejected `{symbol}`: {description}"
        )));
    }
    node["result"]
        .get(0)
        .ok_or_else(|| AnalystError::Protocol(format!("no market data for `{symbol}`")))
}

/// Yahoo wraps most numbers as `{"raw": 1.5, "fmt": "1.50"}`.
fn raw_number(value: &Value) -> Value {
    match value.get("raw") {
        Some(raw) => raw.clone(),
        None if value.is_number() => value.clone(),
        None => Value::Null,
    }
}

fn parse_price(symbol: &str, body: &Value) -> Result<Value> {
    let meta = &first_result(body, "chart", symbol)?["meta"];
    let price = meta["regularMarketPrice"]
        .as_f64()
        .ok_or_else(|| AnalystError::Protocol(format!("no price quoted for `{symbol}`")))?;
    Ok(json!({
        "symbol": symbol,
        "price": price,
        "currency": meta["currency"],
        "exchange": meta["exchangeName"],
    }))
}

fn parse_recommendations(symbol: &str, body: &Value) -> Result<Value> {
    let trend = first_result(body, "quoteSummary", symbol)?["recommendationTrend"]["trend"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let periods: Vec<Value> = trend
        .iter()
        .map(|period| {
            json!({
                "period": period["period"],
                "strong_buy": period["strongBuy"],
                "buy": period["buy"],
                "hold": period["hold"],
                "sell": period["sell"],
                "strong_sell": period["strongSell"],
            })
        })
        .collect();
    Ok(json!({ "symbol": symbol, "recommendations": periods }))
}

fn parse_fundamentals(symbol: &str, body: &Value) -> Result<Value> {
    let result = first_result(body, "quoteSummary", symbol)?;
    let price = &result["price"];
    let profile = &result["assetProfile"];
    let detail = &result["summaryDetail"];
    let stats = &result["defaultKeyStatistics"];
    Ok(json!({
        "symbol": symbol,
        "company_name": price["longName"].as_str().or(price["shortName"].as_str()),
        "sector": profile["sector"],
        "industry": profile["industry"],
        "market_cap": raw_number(&price["marketCap"]),
        "pe_ratio": raw_number(&detail["trailingPE"]),
        "forward_pe": raw_number(&detail["forwardPE"]),
        "pb_ratio": raw_number(&stats["priceToBook"]),
        "dividend_yield": raw_number(&detail["dividendYield"]),
        "eps": raw_number(&stats["trailingEps"]),
        "beta": raw_number(&detail["beta"]),
        "52_week_high": raw_number(&detail["fiftyTwoWeekHigh"]),
        "52_week_low": raw_number(&detail["fiftyTwoWeekLow"]),
    }))
}
