use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{AgentPreset, ModelConfig, ToolsConfig};
use crate::error::{AnalystError, Result};
use crate::llm::{AzureOpenAIClient, LanguageModel};
use crate::message::{Message, ToolCall};
use crate::tool::ToolRegistry;
use crate::tools::{duckduckgo_toolkit, yfinance_toolkit};

const FINANCE_EXPERT_DESCRIPTION: &str = "You are a friendly and knowledgeable **Finance Expert** who teaches financial concepts to beginners and intermediate learners.";

const CURATED_SOURCES: &str = "Use the DuckDuckGo tools to go through the following sources:
    CNBC: https://www.cnbc.com/personal-finance/
    Forbes Money: https://www.forbes.com/money/
    Investopedia: https://www.investopedia.com/financial-literacy-5214701
    Economic Times: https://economictimes.indiatimes.com/wealth/
    MoneyControl: https://www.moneycontrol.com/news/business/personal-finance/
    RBI Publications: https://rbi.org.in/Scripts/BS_PressReleaseDisplay.aspx
    SEBI Investor Corner: https://investor.sebi.gov.in/
    ClearTax Blog: https://cleartax.in/s/financial-planning
If the answer is not found in these sources, use your own knowledge and external links.";

const RESEARCH_REPORT_TEMPLATE: &str = "# Research Summary Report

## Topic: [Research Topic]

### Key Findings
- **Finding 1:** [Detailed explanation with supporting data]
- **Finding 2:** [Detailed explanation with supporting data]
- **Finding 3:** [Detailed explanation with supporting data]

### Source-Based Insights
#### Source 1: [Source Name / URL]
- **Summary:** [Concise summary of key points]
- **Relevant Data:** [Key statistics, dates, or figures]
- **Notable Quotes:** [Direct citations from experts, if available]

#### Source 2: [Source Name / URL]
- **Summary:** [Concise summary of key points]
- **Relevant Data:** [Key statistics, dates, or figures]
- **Notable Quotes:** [Direct citations from experts, if available]

(...repeat for all sources...)

### Overall Trends & Patterns
- **Consensus among sources:** [Common viewpoints and recurring themes]
- **Diverging Opinions:** [Conflicting perspectives and debates]
- **Emerging Trends:** [New insights, innovations, or potential shifts]

### Citations & References
- [[Source 1 Name]]([URL])
- [[Source 2 Name]]([URL])
- [...list all sources with links...]

---";

const INVESTMENT_ANALYST_DESCRIPTION: &str = "You are an investment analyst that researches stock prices, analyst recommendations, and stock fundamentals.";

/// Everything the agent needs, assembled once at start-up.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: ModelConfig,
    pub tools: ToolRegistry,
    pub description: String,
    pub instructions: Vec<String>,
    pub expected_output: Option<String>,
    pub markdown: bool,
    pub show_tool_calls: bool,
    pub add_context: bool,
    pub add_references: bool,
}

impl AgentConfig {
    pub fn for_preset(preset: AgentPreset, model: ModelConfig, tools: &ToolsConfig) -> Result<Self> {
        match preset {
            AgentPreset::FinanceExpert => Self::finance_expert(model, tools),
            AgentPreset::InvestmentAnalyst => Self::investment_analyst(model, tools),
        }
    }

    /// The teaching-oriented finance expert served by the web page.
    pub fn finance_expert(model: ModelConfig, tools: &ToolsConfig) -> Result<Self> {
        Ok(Self {
            model,
            tools: finance_tools(tools)?,
            description: FINANCE_EXPERT_DESCRIPTION.to_string(),
            instructions: vec![
                "Explain financial concepts clearly and concisely using simple language.".into(),
                "Use **markdown formatting** to organize the response: include headings, bullet points, tables, and bold for key terms.".into(),
                "Where applicable, provide **real-world examples** (e.g., for compound interest, P/E ratio).".into(),
                CURATED_SOURCES.into(),
                "If a concept is complex, break it down into **step-by-step explanations**.".into(),
                "Avoid giving investment advice. Focus on **teaching and explaining concepts**.".into(),
                "Add proper citations and links to where the data was sourced from.".into(),
                "List news, blogs and articles separately.".into(),
            ],
            expected_output: Some(RESEARCH_REPORT_TEMPLATE.to_string()),
            markdown: true,
            show_tool_calls: true,
            add_context: true,
            add_references: true,
        })
    }

    /// The stock research analyst used for one-shot questions.
    pub fn investment_analyst(model: ModelConfig, tools: &ToolsConfig) -> Result<Self> {
        Ok(Self {
            model,
            tools: finance_tools(tools)?,
            description: INVESTMENT_ANALYST_DESCRIPTION.to_string(),
            instructions: vec![
                "Format your response using markdown and use tables to display data where possible. Also provide relevant links to verify the data.".into(),
            ],
            expected_output: None,
            markdown: true,
            show_tool_calls: true,
            add_context: true,
            add_references: true,
        })
    }

    pub fn system_message(&self) -> String {
        let mut prompt = String::new();
        prompt.push_str(&self.description);
        prompt.push_str("\n\n");

        let mut instructions = self.instructions.clone();
        if self.markdown {
            instructions.push("Use markdown to format your answers.".into());
        }
        if self.add_references {
            instructions.push(
                "When you use information returned by a tool, cite it as a reference with its link."
                    .into(),
            );
        }
        if !instructions.is_empty() {
            prompt.push_str("## Instructions\n");
            for instruction in &instructions {
                prompt.push_str("- ");
                prompt.push_str(instruction);
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        if let Some(expected) = &self.expected_output {
            prompt.push_str("<expected_output>\n");
            prompt.push_str(expected.trim());
            prompt.push_str("\n</expected_output>\n");
        }
        prompt
    }

    pub fn user_message(&self, query: &str, now: DateTime<Local>) -> String {
        if !self.add_context {
            return query.to_string();
        }
        format!(
            "{query}\n\n<context>\nCurrent date and time: {}\n</context>",
            now.format("%Y-%m-%d %H:%M:%S %Z")
        )
    }
}

/// Web search plus market data, as enabled by `tools`.
pub fn finance_tools(tools: &ToolsConfig) -> Result<ToolRegistry> {
    let mut registry = duckduckgo_toolkit(tools.duckduckgo.clone())?;
    registry.extend(yfinance_toolkit(tools.yfinance.clone())?);
    Ok(registry)
}

/// A tool call made while producing a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExecution {
    pub name: String,
    pub arguments: Value,
    pub result: Value,
    pub is_error: bool,
}

/// Outcome of one [`Agent::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResponse {
    pub content: Option<String>,
    pub model: String,
    pub tools: Vec<ToolExecution>,
}

/// The shapes an agent reply can take.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReply {
    /// A structured run carrying `content`.
    Run(RunResponse),
    /// A reply carrying its text in a `response` field.
    Legacy { response: String },
    /// Already plain text.
    Text(String),
    /// Anything else; normalizing it is an error.
    Unrecognized(Value),
}

/// The single request/response boundary the query loop talks to.
#[async_trait]
pub trait QueryAgent: Send + Sync {
    async fn query(&self, input: &str) -> Result<AgentReply>;
}

/// A hosted model plus tools and instructions.
pub struct Agent<M: LanguageModel> {
    config: Arc<AgentConfig>,
    model: Arc<M>,
    model_name: String,
    max_steps: usize,
}

impl Agent<AzureOpenAIClient> {
    pub fn azure(config: AgentConfig) -> Result<Self> {
        let client = AzureOpenAIClient::from_config(&config.model)?;
        Ok(Self::new(config, Arc::new(client)))
    }
}

impl<M: LanguageModel> Agent<M> {
    pub fn new(config: AgentConfig, model: Arc<M>) -> Self {
        let model_name = config.model.model.clone();
        let max_steps = config.model.max_steps.max(1);
        Self {
            config: Arc::new(config),
            model,
            model_name,
            max_steps,
        }
    }

    fn build_messages(&self, query: &str, now: DateTime<Local>) -> Vec<Message> {
        vec![
            Message::system(self.config.system_message()),
            Message::user(self.config.user_message(query, now)),
        ]
    }

    /// Sends `query` to the model, running any requested tools until the
    /// model answers with content.
    pub async fn run(&self, query: &str) -> Result<RunResponse> {
        let mut messages = self.build_messages(query, Local::now());
        let descriptions = self.config.tools.describe();
        let mut executions = Vec::new();

        for step in 0..self.max_steps {
            tracing::debug!(step, model = %self.model_name, "requesting completion");
            let completion = self.model.complete_chat(&messages, &descriptions).await?;

            if completion.tool_calls.is_empty() {
                let content = completion
                    .content
                    .map(|text| self.decorate(text, &executions));
                return Ok(RunResponse {
                    content,
                    model: self.model_name.clone(),
                    tools: executions,
                });
            }

            messages.push(Message::tool_calls(completion.tool_calls.clone()));
            for call in completion.tool_calls {
                let execution = self.execute(&call).await;
                messages.push(Message::tool(&call, execution.result.clone()));
                executions.push(execution);
            }
        }

        Err(AnalystError::Protocol(format!(
            "agent reached the step limit of {} without returning a response",
            self.max_steps
        )))
    }

    /// Tool failures are reported back to the model rather than aborting the run.
    async fn execute(&self, call: &ToolCall) -> ToolExecution {
        tracing::info!(tool = %call.name, arguments = %call.arguments, "calling tool");
        let (result, is_error) = match self.config.tools.call(&call.name, call.arguments.clone()).await {
            Ok(output) => (output, false),
            Err(err) => {
                tracing::warn!(tool = %call.name, error = %err, "tool call failed");
                (json!({ "error": err.to_string() }), true)
            }
        };
        ToolExecution {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            result,
            is_error,
        }
    }

    fn decorate(&self, content: String, executions: &[ToolExecution]) -> String {
        if !self.config.show_tool_calls || executions.is_empty() {
            return content;
        }
        let mut shown = String::from("Running:\n");
        for execution in executions {
            shown.push_str(&format!(
                " - {}({})\n",
                execution.name,
                format_arguments(&execution.arguments)
            ));
        }
        shown.push('\n');
        shown.push_str(&content);
        shown
    }
}

#[async_trait]
impl<M: LanguageModel> QueryAgent for Agent<M> {
    async fn query(&self, input: &str) -> Result<AgentReply> {
        self.run(input).await.map(AgentReply::Run)
    }
}

fn format_arguments(arguments: &Value) -> String {
    match arguments {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{key}={s}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
