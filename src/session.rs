//! The query/response loop and the per-session history it feeds.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentReply, QueryAgent};
use crate::error::{AnalystError, Result};
use crate::progress::Progress;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One answered query. Never modified after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub query: String,
    pub response: String,
    pub timestamp: String,
}

/// Append-only record of a session's answers.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Insertion order, oldest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Display order, newest first.
    pub fn display(&self) -> impl ExactSizeIterator<Item = &HistoryEntry> + '_ {
        self.entries.iter().rev()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reduces any reply shape to the markdown text that gets stored.
pub fn normalize_reply(reply: AgentReply) -> Result<String> {
    match reply {
        AgentReply::Run(run) => run.content.ok_or_else(|| {
            AnalystError::UnrecognizedResponse("run finished without content".into())
        }),
        AgentReply::Legacy { response } => Ok(response),
        AgentReply::Text(text) => Ok(text),
        AgentReply::Unrecognized(value) => Err(AnalystError::UnrecognizedResponse(value.to_string())),
    }
}

/// State owned by one user session.
#[derive(Debug, Default)]
pub struct Session {
    history: History,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Answers `query` and records it.
    ///
    /// Blank queries are ignored: `Ok(None)`, no agent call. Agent errors
    /// propagate and leave the history untouched.
    pub async fn submit(
        &mut self,
        agent: &dyn QueryAgent,
        query: &str,
        progress: Option<&Progress>,
    ) -> Result<Option<&HistoryEntry>> {
        if query.trim().is_empty() {
            return Ok(None);
        }
        if let Some(progress) = progress {
            progress.run().await;
        }

        tracing::info!(query_len = query.len(), "submitting query");
        let reply = agent.query(query).await?;
        let response = normalize_reply(reply)?;
        self.record(query, response, Local::now());
        Ok(self.history.entries().last())
    }

    fn record(&mut self, query: &str, response: String, at: DateTime<Local>) {
        self.history.push(HistoryEntry {
            query: query.to_string(),
            response,
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
        });
    }

    pub fn clear(&mut self) {
        tracing::info!(entries = self.history.len(), "clearing history");
        self.history.clear();
    }
}
