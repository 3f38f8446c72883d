//! valkey-sentinel-cli - valkey-cli style client that connects through Sentinel
//!
//! Resolves the master (or a replica) of a monitored dataset through a set
//! of sentinels and keeps following it across failovers.

use anyhow::Result;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use valkey_sentinel_client::cli_mode;
use valkey_sentinel_client::config::CliArgs;
use valkey_sentinel_client::SentinelClient;

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

async fn run(args: CliArgs) -> Result<()> {
    let options = args
        .to_options()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    info!(
        "Resolving {} '{}' through {} sentinel(s)",
        options.role,
        options.name,
        options.sentinels.len()
    );

    let client = SentinelClient::new(options)?;

    if args.watch {
        return cli_mode::run_watch(&client).await;
    }

    if !args.command_args.is_empty() {
        let result = cli_mode::run_cli_command(&client, &args.command_args).await;
        client.disconnect().await;
        return result;
    }

    if !args.lazy {
        client
            .connect()
            .await
            .map_err(|e| anyhow::anyhow!("Connection failed: {}", e))?;
        if let Some(address) = client.current_address() {
            eprintln!("Connected to {} {}", args.name, address);
        }
    }

    cli_mode::run_repl(&client, &args.name).await
}

fn main() {
    let args = CliArgs::parse_args();
    setup_logging(args.verbose, args.quiet);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
