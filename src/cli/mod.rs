//! CLI subcommands for the helper binary.
//!
//! ```bash
//! netmon-helper            # serve (default)
//! netmon-helper probe      # authenticate + heartbeat, exit 0 if healthy
//! netmon-helper stats      # print interface counters
//! netmon-helper config show
//! ```

pub mod config_cmd;
pub mod probe;

pub use crate::config::get_endpoint;
pub use probe::{run_probe, run_stats, ProbeError};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_CONNECTION: i32 = 3;
