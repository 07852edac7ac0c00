use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway_ledger::ledger::verify::BatchReport;
use gateway_ledger::{LedgerConfig, LedgerService, LedgerWriter, ReadRange, SqliteLedgerStore};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("verify-ledger")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify hash-chain integrity of the gateway audit ledger")
        .arg(
            Arg::new("database")
                .short('d')
                .long("database")
                .value_name("URL")
                .help("Ledger database URL (defaults to LEDGER_DATABASE_URL)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("TOML config file instead of LEDGER_* environment variables"),
        )
        .arg(
            Arg::new("offset")
                .long("offset")
                .value_name("N")
                .value_parser(clap::value_parser!(u64))
                .default_value("0")
                .conflicts_with("all")
                .help("Number of entries to skip"),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .value_name("N")
                .value_parser(clap::value_parser!(u64))
                .default_value("1000")
                .conflicts_with("all")
                .help("Number of entries to verify"),
        )
        .arg(
            Arg::new("all")
                .long("all")
                .action(ArgAction::SetTrue)
                .help("Verify the whole chain page by page"),
        )
        .arg(
            Arg::new("page-size")
                .long("page-size")
                .value_name("N")
                .value_parser(clap::value_parser!(u64))
                .help("Page size for --all (defaults to LEDGER_VERIFY_PAGE_SIZE)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the report as JSON"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let default_filter = if verbose {
        "gateway_ledger=debug,verify_ledger=debug"
    } else {
        "gateway_ledger=info,verify_ledger=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => LedgerConfig::from_toml_file(Path::new(path))?,
        None => LedgerConfig::load()?,
    };
    if let Some(url) = matches.get_one::<String>("database") {
        config.database_url = url.clone();
    }
    info!("Verifying ledger at {}", config.database_url);

    let store = SqliteLedgerStore::open_read_only(&config.database_url).await?;
    let service = Arc::new(LedgerService::new(config.hmac_secret.as_bytes()));
    let writer = LedgerWriter::open(service, Arc::new(store.clone())).await?;

    let report = if matches.get_flag("all") {
        let page_size = matches
            .get_one::<u64>("page-size")
            .copied()
            .unwrap_or(config.verify_page_size);
        if page_size == 0 {
            return Err(anyhow!("--page-size must be at least 1"));
        }
        writer.verify_all(page_size).await?
    } else {
        let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);
        let limit = matches.get_one::<u64>("limit").copied().unwrap_or(1000);
        writer.verify_range(ReadRange::new(offset, limit)).await?
    };
    store.close().await;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, verbose);
    }

    if !report.all_valid {
        error!("Ledger verification failed: {}", report.summary());
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &BatchReport, verbose: bool) {
    for failure in &report.individual_failures {
        println!("✗ entry #{} ({})", failure.sequence, failure.entry_id);
        for e in &failure.errors {
            println!("    {}", e);
        }
    }
    for failure in &report.chain_failures {
        println!(
            "✗ link #{} -> #{}",
            failure.previous_sequence, failure.current_sequence
        );
        if verbose {
            println!("    {} -> {}", failure.previous_id, failure.current_id);
        }
        for e in &failure.errors {
            println!("    {}", e);
        }
    }

    if report.all_valid {
        println!("✓ {}", report.summary());
    } else {
        println!("✗ {}", report.summary());
    }
}
