use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::{
    app_state::AppState,
    config::{load_config, AppConfig},
    event_log::{EventCategory, EventFilter, EventKind},
    governance::{proposal_stats, Proposal},
    session::SessionRecord,
    session_guard::{evaluate, GuardDecision, GuardPolicy},
    web,
};

/// Top-level CLI for the dao_insure service
#[derive(Parser)]
#[command(
    name = "dao_insure",
    version,
    about = "Session gate, event log and governance helpers for DAO Insure"
)]
pub struct Cli {
    /// Config file (defaults to $DAO_INSURE_CONFIG or dao_insure.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve page routes behind the session guard plus the JSON API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Keep events in memory instead of the sled store
        #[arg(long)]
        ephemeral: bool,
    },

    /// Inspect or clear the event log
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },

    /// Evaluate the session guard for a path
    Session {
        /// Requested path
        #[arg(short, long)]
        path: String,
        /// Session record as JSON (raw or percent-encoded cookie value)
        #[arg(short, long)]
        session_json: Option<String>,
    },

    /// Print dashboard counters for a JSON list of proposals
    Governance {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum EventsAction {
    /// Print stored events as JSON lines
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        user: Option<String>,
    },
    /// Remove every stored event
    Clear,
}

pub fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve {
            host,
            port,
            ephemeral,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            config.validate()?;

            let state = Arc::new(AppState::open(config, ephemeral)?);
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build Tokio runtime")?;
            rt.block_on(web::serve(state))?;
        }
        Commands::Events { action } => {
            let state = AppState::open(config, false)?;
            match action {
                EventsAction::List {
                    category,
                    kind,
                    user,
                } => {
                    let filter = EventFilter {
                        kind: kind.as_deref().map(str::parse::<EventKind>).transpose()?,
                        category: category
                            .as_deref()
                            .map(str::parse::<EventCategory>)
                            .transpose()?,
                        user_id: user,
                    };
                    for event in state.logger.query(&filter) {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                }
                EventsAction::Clear => {
                    state.logger.clear();
                    println!("Cleared events under '{}'", state.logger.key());
                }
            }
        }
        Commands::Session { path, session_json } => {
            let policy = GuardPolicy::from(&config.session);
            let session = session_json
                .as_deref()
                .and_then(SessionRecord::from_cookie_value);
            if let Some(at) = session.as_ref().and_then(SessionRecord::authenticated_time) {
                println!("Session authenticated at {}", at.to_rfc3339());
            }
            match evaluate(session.as_ref(), Utc::now(), &path, &policy) {
                GuardDecision::Authorized => println!("authorized"),
                GuardDecision::Redirect(r) => println!("redirect {}", r.location()),
            }
        }
        Commands::Governance { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let proposals: Vec<Proposal> =
                serde_json::from_str(&raw).context("invalid proposal list")?;
            let now = Utc::now();
            let report = serde_json::json!({
                "stats": proposal_stats(&proposals),
                "proposals": proposals.iter().map(|p| p.summary(now)).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

/// Load config honoring `--config`.
pub fn load(cli: &Cli) -> anyhow::Result<AppConfig> {
    Ok(load_config(cli.config.as_deref())?)
}
