use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cmmn_engine::config::EngineConfig;
use cmmn_engine::definition::load_definition;
use cmmn_engine::domain::{create_actor_args, send_command, CaseActor, CaseCommand, CaseId};
use cmmn_engine::{engine_paths, render};
use ractor::Actor;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cmmn")]
#[command(about = "Event-sourced CMMN case execution engine")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CMMN_ENGINE_GIT_SHA"), ")"))]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a case definition and print its plan tree
    Validate { definition: PathBuf },

    /// Replay an event log and print each case with its plan item states
    Inspect {
        log: PathBuf,
        /// Only this case
        #[arg(long = "case")]
        case_id: Option<String>,
    },

    /// Start a case from a definition
    Start {
        definition: PathBuf,
        /// Explicit case id (random uuid otherwise)
        #[arg(long)]
        case_id: Option<String>,
        /// Engine configuration file (YAML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Case file input as a JSON object keyed by root item name
        #[arg(long)]
        input: Option<String>,
    },

    /// List the cases stored in the data directory
    List {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cmmn_engine=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate { definition } => {
            let definition = load_definition(&definition)?;
            print!("{}", render::definition_tree(&definition));
        }
        Command::Inspect { log, case_id } => {
            let cases = render::replay_cases(&log, case_id.as_deref())?;
            if cases.is_empty() {
                bail!("No events found in {}", log.display());
            }
            for case in cases {
                print!("{}", render::case_tree(&case));
            }
        }
        Command::Start {
            definition,
            case_id,
            config,
            input,
        } => {
            let config = EngineConfig::load_or_default(config.as_deref())?;
            let definition = load_definition(&definition)?;
            let input = parse_input(input.as_deref())?;
            let case_id = case_id.map(CaseId::from).unwrap_or_default();
            run_start(&config, case_id, definition, input).await?;
        }
        Command::List { config } => {
            let config = EngineConfig::load_or_default(config.as_deref())?;
            let data_dir = engine_paths::data_dir(config.storage.data_dir.as_deref())?;
            for case_id in engine_paths::list_cases(&data_dir)? {
                println!("{}", case_id);
            }
        }
    }
    Ok(())
}

fn parse_input(input: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = input else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("Failed to parse --input as JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--input must be a JSON object, got {}", other),
    }
}

async fn run_start(
    config: &EngineConfig,
    case_id: CaseId,
    definition: cmmn_engine::definition::CaseDefinition,
    input: Map<String, Value>,
) -> Result<()> {
    engine_paths::validate_case_id(case_id.as_str())?;
    let (args, _snapshots, _events) = create_actor_args(&case_id, config)?;
    let (actor, handle) = CaseActor::spawn(None, CaseActor, args)
        .await
        .context("Failed to spawn case actor")?;

    let result = send_command(
        &actor,
        CaseCommand::StartCase {
            case_id: case_id.clone(),
            definition: Arc::new(definition),
            input,
            team: Vec::new(),
            parent_case_id: None,
            root_case_id: None,
        },
    )
    .await;

    actor.stop(None);
    let _ = handle.await;

    let view = result.with_context(|| format!("Failed to start case {}", case_id))?;
    print!("{}", render::view_tree(&view));
    Ok(())
}
