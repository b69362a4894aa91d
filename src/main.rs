use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use finance_analyst::{
    init_tracing, normalize_reply, Agent, AgentConfig, AnalystError, AnalystServer, AppConfig,
    QueryAgent, ResponseExporter, Result,
};

#[derive(Parser)]
#[command(name = "finance-analyst", version, about = "Finance expert chat agent")]
struct Cli {
    /// Optional TOML configuration file; environment variables override it.
    #[arg(long, env = "ANALYST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the chat page (default).
    Serve,
    /// Answer one query and print the markdown to stdout.
    Ask { query: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let cfg = AppConfig::from_env_or_file(cli.config.as_deref())?;
    init_tracing(cfg.logging.format)?;
    tracing::debug!(model = ?cfg.model, "configuration loaded");

    let agent_config = AgentConfig::for_preset(cfg.agent.preset, cfg.model.clone(), &cfg.tools)?;
    let agent = Agent::azure(agent_config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let host: IpAddr = cfg.server.host.parse().map_err(|err| {
                AnalystError::Config(format!("invalid host `{}`: {err}", cfg.server.host))
            })?;
            let server = AnalystServer::new(
                Arc::new(agent),
                ResponseExporter::from_config(&cfg.export),
                cfg.progress.clone(),
            )
            .with_session_idle(Duration::from_secs(cfg.server.session_idle_secs));
            server.serve(SocketAddr::new(host, cfg.server.port)).await
        }
        Command::Ask { query } => {
            if query.trim().is_empty() {
                return Ok(());
            }
            let markdown = normalize_reply(agent.query(&query).await?)?;
            println!("{markdown}");
            Ok(())
        }
    }
}
