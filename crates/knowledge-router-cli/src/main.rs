use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use knowledge_router_api::{load_config, load_similarity, AskRequest, KnowledgeRouterApi};
use knowledge_router_core::{
    default_routing_tie_breakers, validate, CallerContext, PipelineConfig, SemanticScorer,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "kr")]
#[command(about = "Knowledge Router CLI")]
struct Cli {
    /// Knowledge pack file (`.json`, otherwise YAML).
    #[arg(long, global = true)]
    pack: Option<PathBuf>,

    /// Pipeline config (YAML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `RUST_LOG`, e.g. `debug` or `knowledge_router_core=debug`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Pack {
        #[command(subcommand)]
        command: PackCommand,
    },
    Gate(CallerArgs),
    Route(RouteArgs),
    Confidence(ConfidenceArgs),
    Ask(AskArgs),
}

#[derive(Debug, Subcommand)]
enum PackCommand {
    Inspect,
}

#[derive(Debug, Args)]
struct CallerArgs {
    #[arg(long)]
    region: String,
    #[arg(long, default_value_t = false)]
    phi_clearance: bool,
    #[arg(long, default_value_t = false)]
    pii_clearance: bool,
}

impl CallerArgs {
    fn to_caller(&self) -> CallerContext {
        CallerContext {
            region: self.region.clone(),
            has_phi_clearance: self.phi_clearance,
            has_pii_clearance: self.pii_clearance,
        }
    }
}

#[derive(Debug, Args)]
struct RouteArgs {
    #[arg(long)]
    text: String,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct ConfidenceArgs {
    #[arg(long)]
    score: u32,
    #[arg(long)]
    semantic: Option<f64>,
}

#[derive(Debug, Args)]
struct AskArgs {
    #[arg(long)]
    text: String,
    #[command(flatten)]
    caller: CallerArgs,
    #[arg(long)]
    budget_tokens: Option<usize>,
    /// JSON array of `{file_id, section_id, similarity}` entries.
    #[arg(long)]
    similarity: Option<PathBuf>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match &cli.command {
        Command::Pack { command: PackCommand::Inspect } => run_pack_inspect(&open_api(&cli)?),
        Command::Gate(args) => run_gate(&open_api(&cli)?, args),
        Command::Route(args) => run_route(&open_api(&cli)?, args),
        Command::Confidence(args) => run_confidence(cli.config.as_deref(), args),
        Command::Ask(args) => run_ask(&open_api(&cli)?, args),
    }
}

fn open_api(cli: &Cli) -> Result<KnowledgeRouterApi> {
    let pack = cli.pack.as_deref().ok_or_else(|| anyhow!("--pack is required for this command"))?;
    KnowledgeRouterApi::open(pack, cli.config.as_deref())
}

fn run_pack_inspect(api: &KnowledgeRouterApi) -> Result<()> {
    emit_json(serde_json::to_value(api.summary())?)
}

fn run_gate(api: &KnowledgeRouterApi, args: &CallerArgs) -> Result<()> {
    let decision = api.check_access(&args.to_caller());
    emit_json(serde_json::to_value(decision)?)
}

fn run_route(api: &KnowledgeRouterApi, args: &RouteArgs) -> Result<()> {
    if args.limit == Some(0) {
        return Err(anyhow!("--limit MUST be > 0"));
    }
    let ranked = api.route(&args.text, args.limit);
    emit_json(serde_json::json!({
        "query": args.text,
        "ranked": ranked,
        "tie_breakers": default_routing_tie_breakers(),
    }))
}

fn run_confidence(config_path: Option<&Path>, args: &ConfidenceArgs) -> Result<()> {
    let config = match config_path {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    let report = validate(args.score, args.semantic, &config.confidence);
    emit_json(serde_json::to_value(report)?)
}

fn run_ask(api: &KnowledgeRouterApi, args: &AskArgs) -> Result<()> {
    let similarity = args.similarity.as_deref().map(load_similarity).transpose()?;
    let request = AskRequest {
        text: args.text.clone(),
        caller: args.caller.to_caller(),
        budget_tokens: args.budget_tokens,
    };
    let scorer = similarity.as_ref().map(|scores| scores as &dyn SemanticScorer);
    let outcome = api.ask(&request, scorer)?;
    emit_json(serde_json::to_value(outcome)?)
}
