//! netmon-helper entry point.
//!
//! ## CLI Subcommands
//!
//! - `netmon-helper` or `netmon-helper serve` - Run the helper (default)
//! - `netmon-helper probe` - Authenticate and heartbeat (exit 0/1/2/3)
//! - `netmon-helper stats [--json] [--interface NAME]` - Print interface counters
//! - `netmon-helper config show|defaults|validate [--json]`

use std::process::ExitCode;
use std::sync::Arc;

use netmon_helper::cli::{self, config_cmd, EXIT_CONFIG, EXIT_FAILURE};
use netmon_helper::config::{self as helper_config, EnvConfig};
use netmon_helper::executor::InterfaceCountersExecutor;
use netmon_helper::shutdown::ShutdownResult;
use netmon_helper::telemetry;
use netmon_helper::{Helper, HelperConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");
    let has_flag = |flag: &str| args.iter().skip(2).any(|a| a == flag);

    let code = match command {
        "serve" | "" => run_serve(helper_config::load()).await,
        "probe" => cli::run_probe(&helper_config::load()).await,
        "stats" => {
            let interface = flag_value(&args, "--interface").unwrap_or_default();
            cli::run_stats(&helper_config::load(), &interface, has_flag("--json")).await
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => config_cmd::run_show(has_flag("--json")),
                "defaults" => config_cmd::run_defaults(has_flag("--json")),
                "validate" => config_cmd::run_validate(),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_usage();
                    EXIT_FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            print_usage();
            0
        }
        "version" | "--version" | "-V" => {
            println!("netmon-helper {}", env!("CARGO_PKG_VERSION"));
            0
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            EXIT_FAILURE
        }
    };
    ExitCode::from(code as u8)
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn print_usage() {
    eprintln!(
        "netmon-helper v{}

USAGE:
    netmon-helper [COMMAND] [OPTIONS]

COMMANDS:
    serve        Run the elevated helper (default when no command given)
    probe        Authenticate against a running helper and heartbeat
    stats        Print per-interface byte counters from a running helper
    config       Show or validate configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

OPTIONS:
    --json              JSON output (stats, config show, config defaults)
    --interface NAME    Restrict stats to one interface

ENVIRONMENT:
    NETMON_HELPER_ENDPOINT  Pipe name or socket path
    NETMON_HELPER_SECRET    Hex launch secret shared with the UI (required)
    NETMON_HELPER_LOG       Log filter (default: info)
    See `netmon-helper config defaults` for the full list.

EXIT CODES:
    0  Success
    1  Failure
    2  Configuration error
    3  Connection error
",
        env!("CARGO_PKG_VERSION")
    );
}

async fn run_serve(env: EnvConfig) -> i32 {
    if let Err(e) = telemetry::init_logging(&env.log) {
        eprintln!("Logging setup failed: {}", e);
        return EXIT_CONFIG;
    }

    let secret = match env.shared_secret() {
        Some(Ok(secret)) => secret,
        Some(Err(e)) => {
            eprintln!("Invalid {}: {}", helper_config::ENV_SECRET, e);
            return EXIT_CONFIG;
        }
        None => {
            eprintln!("{} must be set to the launch secret", helper_config::ENV_SECRET);
            return EXIT_CONFIG;
        }
    };

    let helper = Helper::new(
        HelperConfig::from(&env),
        Arc::new(secret),
        Arc::new(InterfaceCountersExecutor::default()),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut server = tokio::spawn(helper.serve(shutdown_rx));

    // Serve until Ctrl+C, unless the server fails first
    let finished = tokio::select! {
        joined = &mut server => Some(joined),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
            None
        }
    };
    let joined = match finished {
        Some(joined) => joined,
        None => {
            tracing::info!("Shutdown signal received, draining");
            let _ = shutdown_tx.send(true);
            server.await
        }
    };

    match joined {
        Ok(Ok(ShutdownResult::Complete)) => 0,
        Ok(Ok(ShutdownResult::Timeout { remaining })) => {
            eprintln!("Shutdown timeout, {} connections remaining", remaining);
            0
        }
        Ok(Err(e)) => {
            eprintln!("Server error: {}", e);
            EXIT_FAILURE
        }
        Err(e) => {
            eprintln!("Server task failed: {}", e);
            EXIT_FAILURE
        }
    }
}
