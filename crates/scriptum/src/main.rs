//! Scriptum CLI
//!
//! Runs a script file through the catalog: load config, build an engine-backed
//! catalog, evaluate the script once with the supplied parameters, print the
//! result.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scriptum::{
    HostingPolicy, ParamKind, Parameter, ParameterValue, RunOutcome, ScriptCatalog,
    TransferableValue,
};

/// Scriptum script runner
#[derive(Parser, Debug)]
#[command(name = "scriptum")]
#[command(about = "Run a script in a sandboxed engine", long_about = None)]
struct Args {
    /// Path to the script file
    script: PathBuf,

    /// Path to the configuration file
    #[arg(short, long, default_value = "scriptum.toml")]
    config: PathBuf,

    /// Script parameter as name=value; the value parses as JSON, anything
    /// that is not JSON passes through as text. Repeatable.
    #[arg(short, long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// Hosting override: host, shared or individual
    #[arg(long)]
    hosting: Option<String>,
}

fn main() -> Result<()> {
    // V8 platform init must happen on the real main thread, before the
    // tokio runtime exists.
    scriptum_js_runtime::init_platform();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    // The config carries the fallback log filter, so it loads (silently)
    // before the subscriber exists; everything worth reporting about it is
    // logged right after init.
    let config = scriptum::Config::load(&args.config)?;

    let default_filter = config
        .log_filter
        .clone()
        .unwrap_or_else(|| "scriptum=info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting scriptum v{}", env!("CARGO_PKG_VERSION"));
    info!(path = %args.config.display(), present = args.config.exists(), "configuration loaded");

    let supplied = parse_params(&args.params)?;

    let catalog = ScriptCatalog::new(config);
    let mut options = catalog.default_options();
    if let Some(hosting) = &args.hosting {
        options.hosting = parse_hosting(hosting)?;
    }

    let code = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("failed to read script {}", args.script.display()))?;

    let outcome = catalog.evaluate(&code, options, &supplied).await?;
    catalog.shutdown();

    match outcome {
        RunOutcome::Success { value } => {
            let json = serde_json::Value::from(value);
            println!("{}", serde_json::to_string_pretty(&json)?);
            Ok(())
        }
        RunOutcome::Failure { errors } => {
            for run_error in &errors {
                error!("{run_error}");
            }
            std::process::exit(1);
        }
    }
}

/// Parse `name=value` pairs into supplied parameter values. The declared
/// kind is taken from the parsed value.
fn parse_params(raw: &[String]) -> Result<Vec<ParameterValue>> {
    let mut supplied = Vec::with_capacity(raw.len());
    for pair in raw {
        let Some((name, text)) = pair.split_once('=') else {
            bail!("parameter '{pair}' is not in name=value form");
        };
        let value = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(json) => TransferableValue::from(json),
            Err(_) => TransferableValue::Text(text.to_string()),
        };
        let kind = match value.kind() {
            // A null literal still declares a usable slot.
            ParamKind::Null => ParamKind::Object,
            kind => kind,
        };
        let parameter = Parameter::new(name, kind)
            .with_context(|| format!("invalid parameter name '{name}'"))?;
        supplied.push(ParameterValue::direct(parameter, value));
    }
    Ok(supplied)
}

fn parse_hosting(text: &str) -> Result<HostingPolicy> {
    match text {
        "host" => Ok(HostingPolicy::Host),
        "shared" | "shared_sandbox" => Ok(HostingPolicy::SharedSandbox),
        "individual" | "individual_sandbox" => Ok(HostingPolicy::IndividualSandbox),
        other => bail!("unknown hosting '{other}' (expected host, shared or individual)"),
    }
}
