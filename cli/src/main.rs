//! chainquorum CLI — watch contract events and query receipts through a
//! quorum of JSON-RPC providers.
//!
//! Usage:
//! ```bash
//! chainquorum watch   --config chainquorum.yaml
//! chainquorum head    --provider a=https://... --provider b=https://... --provider c=https://...
//! chainquorum receipt --config chainquorum.yaml --hash 0xabc...
//! chainquorum check   --config chainquorum.yaml
//! ```

mod logging;

use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;

use chainquorum_core::{ProviderEndpoint, QuorumClient, RpcCall};
use chainquorum_evm::types::parse_quantity;
use chainquorum_evm::{DispatchedEvent, EventServiceBuilder, LogConfig, PollerEvent, ServiceConfig};
use chainquorum_http::{connect_registry, HttpClientConfig};

const DEFAULT_CONFIG: &str = "chainquorum.yaml";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "watch" => cmd_watch(&args[2..]).await,
        "head" => cmd_head(&args[2..]).await,
        "receipt" => cmd_receipt(&args[2..]).await,
        "check" => cmd_check(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("chainquorum {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainquorum {}", env!("CARGO_PKG_VERSION"));
    println!("Quorum-verified contract event ingestion\n");
    println!("USAGE:");
    println!("    chainquorum <COMMAND> [OPTIONS]\n");
    println!("COMMANDS:");
    println!("    watch    Poll configured contracts and print decoded events as JSON lines");
    println!("    head     Print every provider's head and the quorum-agreed one");
    println!("    receipt  Print the quorum-agreed receipt of a transaction (--hash)");
    println!("    check    Validate the config and print the log filters it produces");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("OPTIONS:");
    println!("    -c, --config <FILE>       Config file (default: {DEFAULT_CONFIG})");
    println!("    -p, --provider NAME=URL   Provider, repeatable; replaces the config's providers");
    println!("        --hash <TX>           Transaction hash (receipt)");
}

#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    providers: Vec<ProviderEndpoint>,
    hash: Option<String>,
    positional: Vec<String>,
}

impl Args {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
    }
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = iter.next().context("--config needs a value")?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--provider" | "-p" => {
                let value = iter.next().context("--provider needs NAME=URL")?;
                let (name, url) = value
                    .split_once('=')
                    .with_context(|| format!("--provider expects NAME=URL, got '{value}'"))?;
                parsed.providers.push(ProviderEndpoint::new(name, url)?);
            }
            "--hash" => {
                let value = iter.next().context("--hash needs a value")?;
                parsed.hash = Some(value.clone());
            }
            flag if flag.starts_with('-') => bail!("unknown option {flag}"),
            value => parsed.positional.push(value.to_string()),
        }
    }
    Ok(parsed)
}

fn load(path: &Path) -> anyhow::Result<(ServiceConfig, PathBuf)> {
    let config = ServiceConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    logging::init_tracing(&config.log);
    Ok((config, base_dir))
}

async fn cmd_watch(args: &[String]) -> anyhow::Result<()> {
    let args = parse_args(args)?;
    let (config, base_dir) = load(&args.config_path())?;
    let service = EventServiceBuilder::from_config(&config, &base_dir)?.build()?;

    let names: BTreeSet<String> = config
        .contracts
        .iter()
        .flat_map(|c| c.events.iter().map(|e| e.name.clone()))
        .collect();
    for name in &names {
        service.on(name, |ev: DispatchedEvent| async move {
            let status = match ev.receipt.get_with_retry().await {
                Ok(receipt) => match receipt.succeeded() {
                    Some(true) => "success",
                    Some(false) => "reverted",
                    None => "unknown",
                },
                Err(e) => {
                    tracing::warn!(tx = %ev.transaction_hash, error = %e, "receipt unavailable");
                    "unverified"
                }
            };
            let mut line = serde_json::to_value(&*ev.event)?;
            line["receiptStatus"] = status.into();
            println!("{line}");
            anyhow::Ok(())
        })?;
    }

    let mut diagnostics = service.diagnostics();
    tokio::spawn(async move {
        loop {
            match diagnostics.recv().await {
                Ok(PollerEvent::Alert {
                    consecutive_failures,
                    last_error,
                }) => eprintln!("ALERT: {consecutive_failures} consecutive failed ticks (last: {last_error})"),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    service.start()?;
    tracing::info!(events = ?names, "watching; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("shutting down");
    service.stop().await;
    Ok(())
}

fn quorum_client(endpoints: Vec<ProviderEndpoint>, config: &ServiceConfig) -> anyhow::Result<QuorumClient> {
    let registry = connect_registry(endpoints, &config.http)?;
    Ok(QuorumClient::for_registry(
        Arc::new(registry),
        config.quorum,
        config.lenient_quorum,
        Duration::from_millis(config.request_timeout_ms),
    ))
}

async fn cmd_head(args: &[String]) -> anyhow::Result<()> {
    let args = parse_args(args)?;
    let client = if args.providers.is_empty() {
        let (config, _) = load(&args.config_path())?;
        quorum_client(config.endpoints()?, &config)?
    } else {
        logging::init_tracing(&LogConfig::default());
        let registry = connect_registry(args.providers, &HttpClientConfig::default())?;
        QuorumClient::for_registry(Arc::new(registry), None, false, DEFAULT_TIMEOUT)
    };

    let results = client
        .batch()
        .send(&[RpcCall::block_number()], client.timeout())
        .await;
    for result in &results {
        let answer = match (&result.error, result.responses.first()) {
            (Some(e), _) => format!("error: {e}"),
            (None, Some(r)) => match &r.error {
                Some(e) => format!("error: {e}"),
                None => quantity(r.result_or_null())
                    .map_or_else(|| format!("unparsable: {}", r.result_or_null()), |n| n.to_string()),
            },
            (None, None) => "no answer".to_string(),
        };
        println!("  {:<12} {answer}", result.provider.as_str());
    }

    let decision = client.resolver().resolve(results)?;
    let head = decision
        .results()
        .first()
        .and_then(|v| quantity(v))
        .context("eth_blockNumber result is not a quantity")?;
    println!(
        "head {head} ({}/{} providers agree, quorum {}{})",
        decision.agreeing,
        client.batch().registry().len(),
        client.resolver().quorum(),
        if decision.lenient { ", lenient" } else { "" }
    );
    Ok(())
}

fn quantity(value: &serde_json::Value) -> Option<u64> {
    value.as_str().and_then(parse_quantity)
}

async fn cmd_receipt(args: &[String]) -> anyhow::Result<()> {
    let args = parse_args(args)?;
    let hash = match (&args.hash, args.positional.as_slice()) {
        (Some(hash), []) => hash,
        (None, [hash]) => hash,
        _ => bail!("usage: chainquorum receipt [--config <FILE>] --hash <TX>"),
    };
    let (config, base_dir) = load(&args.config_path())?;
    let service = EventServiceBuilder::from_config(&config, &base_dir)?.build()?;
    let receipt = service.receipts().get_receipt_with_retry(hash).await?;
    println!("{}", serde_json::to_string_pretty(&receipt.raw)?);
    Ok(())
}

fn cmd_check(args: &[String]) -> anyhow::Result<()> {
    let args = parse_args(args)?;
    let (config, base_dir) = load(&args.config_path())?;
    let contracts = config.contract_descriptors(&base_dir)?;
    println!("providers: {}", config.providers.len());
    for endpoint in config.endpoints()? {
        println!("  {:<12} {}", endpoint.id().as_str(), endpoint.redacted());
    }
    println!("quorum: {}", config.quorum.unwrap_or_else(|| chainquorum_core::majority_of(config.providers.len())));
    for contract in &contracts {
        println!("contract {}", contract.address());
        for target in contract.targets() {
            println!("  {:<16} topics {}", target.event, target.topics_json());
        }
    }
    Ok(())
}
