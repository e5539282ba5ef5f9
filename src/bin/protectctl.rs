//! protectctl - command line front end for the protection engine
//!
//! Usage:
//!   cargo run --features cli --bin protectctl -- \
//!     --host https://protect.internal:8443 \
//!     tokenize --field ssn=123456789 --field lastNm=Smith --date dob=1990-01-31
//!
//!   cargo run --features cli --bin protectctl -- \
//!     --config config/protection.yaml \
//!     detokenize --input records.json --envelope
//!
//! The host may also come from PROTECTION_SERVICE_HOST, or from a secret
//! document passed with --secrets-file.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use data_protection::config::CONFIG_PATH_ENV;
use data_protection::{
    CallContext, FieldValue, JsonSecretSource, ProtectionConfig, ProtectionEngine,
    ProtectionError,
};

#[derive(Parser, Debug)]
#[command(name = "protectctl")]
#[command(about = "Tokenize and detokenize values through the data-protection service")]
struct Args {
    /// YAML config file
    #[arg(long, short = 'c', env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Service base URL (overrides config and environment)
    #[arg(long)]
    host: Option<String>,

    /// JSON secret document with `protectionServiceHost`
    #[arg(long)]
    secrets_file: Option<PathBuf>,

    /// Abort the call after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tokenize field values
    Tokenize {
        /// Field values in format key=value (can be specified multiple times)
        #[arg(long, short = 'f', value_parser = parse_key_val)]
        field: Vec<(String, String)>,

        /// Date values in format key=YYYY-MM-DD (can be specified multiple times)
        #[arg(long, short = 'd', value_parser = parse_key_val)]
        date: Vec<(String, String)>,
    },
    /// Detokenize a JSON document
    Detokenize {
        /// JSON file to read ("-" for stdin)
        #[arg(long, short = 'i', default_value = "-")]
        input: PathBuf,

        /// Treat the top-level object as an envelope and detokenize per key
        #[arg(long)]
        envelope: bool,
    },
}

/// Parse key=value pairs from command line
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: {}", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Repeated keys are collected into a list, in command line order.
fn collect_fields(
    texts: Vec<(String, String)>,
    dates: Vec<(String, String)>,
) -> Result<Vec<(String, FieldValue)>> {
    let mut fields: Vec<(String, FieldValue)> = Vec::new();
    let dates = dates
        .into_iter()
        .map(|(key, raw)| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map(|date| (key.clone(), FieldValue::Date(date)))
                .with_context(|| format!("Invalid date for {}: {}", key, raw))
        })
        .collect::<Result<Vec<_>>>()?;

    for (key, value) in texts
        .into_iter()
        .map(|(key, text)| (key, FieldValue::Text(text)))
        .chain(dates)
    {
        match fields.iter_mut().find(|(name, _)| *name == key) {
            Some((_, FieldValue::List(items))) => items.push(value),
            Some((_, existing)) => {
                let first = std::mem::replace(existing, FieldValue::List(Vec::new()));
                *existing = FieldValue::List(vec![first, value]);
            }
            None => fields.push((key, value)),
        }
    }
    Ok(fields)
}

fn read_input(path: &Path) -> Result<Value> {
    let text = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Reading stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?
    };
    serde_json::from_str(&text).context("Parsing input JSON")
}

fn build_engine(args: &Args) -> Result<ProtectionEngine> {
    let mut config = match &args.config {
        Some(path) => ProtectionConfig::load_from_file(path)?,
        None => ProtectionConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    if let Some(host) = &args.host {
        config = config.with_host(host.clone());
    }

    let engine = match &args.secrets_file {
        Some(path) => ProtectionEngine::from_secrets(config, &JsonSecretSource::file(path))?,
        None => ProtectionEngine::new(config)?,
    };
    Ok(engine)
}

async fn run(args: Args) -> Result<Value> {
    let engine = build_engine(&args)?;
    let ctx = match args.timeout_secs {
        Some(secs) => CallContext::new().with_timeout(Duration::from_secs(secs)),
        None => CallContext::new(),
    };

    match args.command {
        Command::Tokenize { field, date } => {
            let fields = collect_fields(field, date)?;
            let tokens = engine.tokenize_with_context(&fields, &ctx).await?;
            Ok(tokens.into_json())
        }
        Command::Detokenize { input, envelope } => {
            let document = read_input(&input)?;
            if envelope {
                let data = document
                    .as_object()
                    .context("--envelope requires a top-level JSON object")?;
                let out = engine.detokenize_envelope_with_context(data, &ctx).await?;
                Ok(Value::Object(out))
            } else {
                Ok(engine.detokenize_with_context(&document, &ctx).await?)
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "data_protection=info,protectctl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("error: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            match e.downcast_ref::<ProtectionError>() {
                Some(protection) => {
                    eprintln!("error (status {}): {}", protection.http_status(), protection)
                }
                None => eprintln!("error: {:#}", e),
            }
            std::process::exit(1);
        }
    }
}
