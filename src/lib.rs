//! A finance-expert chat agent served as a web page.
//!
//! The crate provides:
//! - An [`Agent`] that answers a query with a hosted model (`LanguageModel`)
//!   plus web search and market data tools (`Tool` and `ToolRegistry`).
//! - A [`Session`] that runs the query/response loop and keeps an
//!   append-only [`History`].
//! - A [`ResponseExporter`] writing each answer to a downloadable markdown file.
//! - An axum server rendering the chat page (feature `server`).

mod agent;
mod config;
mod error;
mod export;
mod llm;
mod message;
mod progress;
mod render;
#[cfg(feature = "server")]
mod server;
mod session;
mod telemetry;
mod tool;
pub mod tools;

pub use agent::{
    finance_tools, Agent, AgentConfig, AgentReply, QueryAgent, RunResponse, ToolExecution,
};
pub use config::{
    AgentPreset, AgentSection, AppConfig, ExportConfig, LoggingConfig, ModelConfig, ServerConfig,
    ToolsConfig, API_KEY_VAR, ENDPOINT_VAR,
};
pub use error::{AnalystError, Result};
pub use export::{render_document, ExportedFile, ResponseExporter};
pub use llm::{AzureOpenAIClient, LanguageModel, ModelCompletion, StubModel};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use progress::{Progress, ProgressConfig};
pub use render::{markdown_to_html, render_error, render_page};
#[cfg(feature = "server")]
pub use server::{AnalystServer, SESSION_COOKIE};
pub use session::{normalize_reply, History, HistoryEntry, Session, TIMESTAMP_FORMAT};
pub use telemetry::{init_tracing, LogFormat};
pub use tool::{Tool, ToolDescription, ToolRegistry};
