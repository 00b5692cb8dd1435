//! callguard: issue calls through the resilient executor from the command line.
//!
//! Usage:
//!   callguard get <url> [--retries N] [--cache-ttl MS] [--repeat N] [--config FILE]
//!   callguard version

use anyhow::{anyhow, bail, Context};
use callguard::metrics::TracingMetricsSink;
use callguard::{ExecutorConfig, HttpExecutor, RequestDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "get" => cmd_get(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("callguard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"callguard: resilient JSON-over-HTTP calls

USAGE:
    callguard <COMMAND> [OPTIONS]

COMMANDS:
    get <url>                   Issue a GET and print the response envelope as JSON
        --retries N             Retry budget for this call
        --cache-ttl MS          Cache the response for MS milliseconds
        --repeat N              Issue the same call N times (shows caching/breaking)
        --config FILE           YAML executor config
    version                     Show version information
    help                        Show this help message

ENVIRONMENT:
    RUST_LOG                    Log filter (default: info)
    CALLGUARD_*                 Executor and transport overrides"#
    );
}

struct GetArgs {
    url: String,
    retries: Option<u32>,
    cache_ttl: Option<u64>,
    repeat: u32,
    config: Option<String>,
}

fn parse_get_args(args: &[String]) -> anyhow::Result<GetArgs> {
    let mut url = None;
    let mut retries = None;
    let mut cache_ttl = None;
    let mut repeat = 1;
    let mut config = None;

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| {
            it.next()
                .cloned()
                .ok_or_else(|| anyhow!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--retries" => retries = Some(value("--retries")?.parse::<u32>().context("--retries")?),
            "--cache-ttl" => cache_ttl = Some(value("--cache-ttl")?.parse::<u64>().context("--cache-ttl")?),
            "--repeat" => repeat = value("--repeat")?.parse::<u32>().context("--repeat")?,
            "--config" => config = Some(value("--config")?),
            flag if flag.starts_with("--") => bail!("unknown option {flag}"),
            positional => {
                if url.replace(positional.to_string()).is_some() {
                    bail!("only one URL may be given");
                }
            }
        }
    }

    Ok(GetArgs {
        url: url.ok_or_else(|| anyhow!("missing <url>"))?,
        retries,
        cache_ttl,
        repeat,
        config,
    })
}

async fn cmd_get(args: &[String]) -> anyhow::Result<()> {
    let args = parse_get_args(args)?;

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            ExecutorConfig::from_yaml_str(&text)?
        }
        None => ExecutorConfig::default(),
    };
    let executor = HttpExecutor::builder()
        .config(config)
        .config_from_env()
        .metrics_sink(Arc::new(TracingMetricsSink))
        .build()?;

    let mut builder = RequestDescriptor::builder(args.url.as_str());
    if let Some(n) = args.retries {
        builder = builder.retries(n);
    }
    if let Some(ms) = args.cache_ttl {
        builder = builder.cache_ttl(Duration::from_millis(ms));
    }
    let request = builder.build()?;

    for _ in 0..args.repeat.max(1) {
        let envelope = executor.execute(&request).await;
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }

    eprintln!("{}", serde_json::to_string_pretty(&executor.signals())?);
    executor.close();
    Ok(())
}
