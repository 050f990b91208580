//! Lifeline Server: headless proof-of-life daemon for one wallet
//!
//! Checks in on schedule, logs escalation as it happens and exits once
//! recovery has been triggered or the enrollment revoked.
//!
//! # Usage
//!
//! ```bash
//! lifeline-server --config /path/to/lifeline-server.toml --enroll
//! lifeline-server --config /path/to/lifeline-server.toml
//! lifeline-server --check     # Check in once and exit
//! lifeline-server --validate  # Validate config and exit
//! lifeline-server --address   # Print the guardian recovery address
//! ```

mod config;
mod daemon;
mod http;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // Parse CLI args by hand
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("/config/lifeline-server.toml");
    let mut one_shot = false;
    let mut validate_only = false;
    let mut enroll = false;
    let mut address = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = PathBuf::from(&args[i]);
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--check" | "--once" => {
                one_shot = true;
            }
            "--validate" => {
                validate_only = true;
            }
            "--enroll" => {
                enroll = true;
            }
            "--address" => {
                address = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("lifeline-server {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    let mut server_config = config::ServerConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    server_config.apply_env_overrides();
    server_config
        .validate()
        .context("Configuration validation failed")?;

    std::env::set_var("RUST_LOG", &server_config.server.log_level);
    env_logger::init();

    if validate_only {
        let pol = &server_config.pol;
        println!("✅ Configuration is valid.");
        println!("  Wallet:         {}", server_config.wallet.wallet_id);
        println!("  API:            {}", server_config.api.base_url);
        println!("  Check interval: {} secs", pol.check_in_interval_secs);
        println!(
            "  Grace period:   {} secs × {} levels",
            pol.grace_period_secs,
            pol.final_escalation_level + 1
        );
        println!(
            "  Recovery after: {} secs (~{} blocks)",
            pol.escalation_deadline_secs(),
            pol.recovery_timelock()
                .map(|t| t.blocks().to_string())
                .unwrap_or_else(|_| "?".into())
        );
        println!(
            "  Guardians:      {} (threshold {})",
            server_config.recovery.guardians.len(),
            server_config.recovery.threshold
        );
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;

    if enroll {
        let enrollment = rt.block_on(daemon::run_enroll(&server_config))?;
        println!("✅ Enrolled {}", enrollment.wallet_id);
        println!("  Device key: {}", enrollment.public_key);
        println!("  Key id:     {}", enrollment.key_id);
    } else if address {
        let addr = rt.block_on(daemon::recovery_address(&server_config))?;
        println!("{}", addr);
    } else if one_shot {
        log::info!("Running single check-in…");
        rt.block_on(daemon::run_check(&server_config))?;
        log::info!("Done.");
    } else {
        // Ctrl-C stops the daemon; persisted status survives the restart
        let shutdown = rt.block_on(async {
            tokio::select! {
                result = daemon::run(server_config) => result,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received shutdown signal. Exiting…");
                    Ok(())
                }
            }
        });

        if let Err(e) = shutdown {
            log::error!("Server error: {:#}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"Lifeline Server: headless proof-of-life daemon

USAGE:
    lifeline-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (default: /config/lifeline-server.toml)
    --enroll              Enroll this device for the configured wallet and exit
    --check, --once       Check in once and exit
    --address             Print the guardian recovery address and exit
    --validate            Validate config file and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    LIFELINE_DATA_DIR         Data directory path
    LIFELINE_LOG_LEVEL        Log level (error/warn/info/debug/trace)
    LIFELINE_WALLET_ID        Wallet to monitor
    LIFELINE_PASSPHRASE       Device key passphrase
    LIFELINE_API_URL          Liveness server base URL
    LIFELINE_API_TOKEN        Liveness server bearer token
    LIFELINE_CHECK_INTERVAL   Check-in interval in seconds
    LIFELINE_GRACE_PERIOD     Grace period per escalation level in seconds
    LIFELINE_NETWORK          Bitcoin network (bitcoin/testnet/signet/regtest)

EXAMPLES:
    # First run on a new device
    lifeline-server --config config.toml --enroll

    # Run as daemon
    lifeline-server --config config.toml

    # Manual check-in (useful for cron jobs)
    lifeline-server --config config.toml --check
"#
    );
}
