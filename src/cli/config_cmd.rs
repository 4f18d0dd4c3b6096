//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from environment variables
//! without contacting a running helper.

use crate::cli::{EXIT_CONFIG, EXIT_SUCCESS};
use crate::config::{self, EffectiveConfig, EnvConfig};

/// Print effective config to stdout, as `KEY=value` lines or JSON.
pub fn run_show(json: bool) -> i32 {
    let cfg = config::load().effective_config();
    print_config(&cfg, json)
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults(json: bool) -> i32 {
    let cfg = EnvConfig::default().effective_config();
    print_config(&cfg, json)
}

/// Validate configuration. Returns 0 if usable, 2 otherwise.
pub fn run_validate() -> i32 {
    report(&config::load().validate())
}

fn report(problems: &[String]) -> i32 {
    if problems.is_empty() {
        println!("Configuration is valid.");
        return EXIT_SUCCESS;
    }
    for problem in problems {
        eprintln!("WARNING: {}", problem);
    }
    eprintln!("{} problem(s) found.", problems.len());
    EXIT_CONFIG
}

fn print_config(cfg: &EffectiveConfig, json: bool) -> i32 {
    if json {
        match serde_json::to_string_pretty(cfg) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Failed to render configuration: {}", e);
                return crate::cli::EXIT_FAILURE;
            }
        }
    } else {
        for line in cfg.to_env_lines() {
            println!("{}", line);
        }
    }
    EXIT_SUCCESS
}
