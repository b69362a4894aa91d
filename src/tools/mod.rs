//! Toolkits the finance agent can call:
//! - DuckDuckGo: web and news search
//! - YFinance: stock price, analyst recommendations, fundamentals

pub mod duckduckgo;
pub mod yfinance;

pub use duckduckgo::{duckduckgo_toolkit, DuckDuckGoConfig, SearchResult};
pub use yfinance::{yfinance_toolkit, YFinanceConfig};
