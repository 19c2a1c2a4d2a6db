mod api;
mod config;
mod models;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modkit_entity::codec::describe_schema;
use modkit_entity::{
    APPLICATION_PROBLEM_JSON, Api, Datastore, MemoryDatastore, RequestContext, UserIdentity,
};
use serde::Deserialize;
use serde_json::{Value as Json, json};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, LoggingConfig};
use crate::models::Models;

/// Entity demo - sample record types served as RPC methods
#[derive(Parser)]
#[command(name = "entity-demo")]
#[command(about = "Entity demo - sample record types served as RPC methods")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines request script ("-" reads stdin)
    Run { script: PathBuf },
    /// Print the request and response schema of every method
    Schemas,
    /// Validate configuration and exit
    Check,
}

/// One line of a request script.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptLine {
    method: String,
    /// Email of the calling user; anonymous when absent.
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    body: Option<Json>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(ref path) = cli.config
        && !path.is_file()
    {
        anyhow::bail!("config file does not exist: {}", path.to_string_lossy());
    }

    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let Some(command) = cli.command else {
        anyhow::bail!("no command given; try --help");
    };
    match command {
        Commands::Run { script } => run_script(&config, &script),
        Commands::Schemas => print_schemas(&config),
        Commands::Check => check_config(&config),
    }
}

fn init_logging(config: &LoggingConfig, verbose: u8) {
    let level = match verbose {
        0 => config.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    let models = Models::declare()?;
    let api = api::build(&config.api, &models)?;
    tracing::info!(methods = api.endpoints().count(), "all methods registered");
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}

fn print_schemas(config: &AppConfig) -> Result<()> {
    let models = Models::declare()?;
    let api = api::build(&config.api, &models)?;
    let methods: Vec<Json> = api
        .endpoints()
        .map(|e| {
            json!({
                "name": e.name(),
                "httpMethod": e.http_method().as_str(),
                "path": e.path(),
                "request": describe_schema(e.request_schema()),
                "response": describe_schema(e.response_schema()),
            })
        })
        .collect();
    let kinds: Vec<&str> = models.all().iter().map(|rt| rt.kind()).collect();
    let doc = json!({
        "api": api.name(),
        "version": api.version(),
        "kinds": kinds,
        "methods": methods,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn read_script(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut script = String::new();
        std::io::stdin()
            .read_to_string(&mut script)
            .context("failed to read script from stdin")?;
        return Ok(script);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.to_string_lossy()))
}

/// Replay every script line against one in-memory datastore and print one
/// JSON result line per request.
fn run_script(config: &AppConfig, path: &Path) -> Result<()> {
    let script = read_script(path)?;
    let models = Models::declare()?;
    let api = api::build(&config.api, &models)?;
    let store: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
    tracing::info!(api = api.name(), version = api.version(), "replaying script");

    let mut failures = 0_usize;
    for (index, raw) in script.lines().enumerate() {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let line: ScriptLine = serde_json::from_str(raw)
            .with_context(|| format!("script line {} is not a request", index + 1))?;
        let result = replay(&api, config, &store, &line)?;
        if result.get("problem").is_some() {
            failures += 1;
        }
        println!("{result}");
    }
    tracing::info!(failures, "script finished");
    Ok(())
}

fn replay(
    api: &Api,
    config: &AppConfig,
    store: &Arc<dyn Datastore>,
    line: &ScriptLine,
) -> Result<Json> {
    let ctx = RequestContext::new(Arc::clone(store))
        .with_user(line.user.as_deref().map(UserIdentity::new))
        .with_limits(config.entity.query);
    let body = line.body.as_ref().map(Json::to_string).unwrap_or_default();
    Ok(match api.dispatch(&line.method, &ctx, &body) {
        Ok(out) => json!({
            "method": line.method,
            "status": 200,
            "contentType": api.codec().content_type(),
            "response": serde_json::from_str::<Json>(&out)?,
        }),
        Err(problem) => json!({
            "method": line.method,
            "status": problem.status.as_u16(),
            "contentType": APPLICATION_PROBLEM_JSON,
            "problem": problem,
        }),
    })
}
