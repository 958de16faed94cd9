//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled          |
//! |-----------|---------------------------|
//! | `run`     | `Run`, `Watch`            |
//! | `status`  | `Sync`, `Status`, `List`  |
//! | `check`   | `Check`                   |
//! | `config`  | `Config`                  |

pub mod check;
pub mod config;
pub mod run;
pub mod status;

use std::process::ExitCode;

use promoter::controller::CycleOutcome;

pub use check::cmd_check;
pub use config::cmd_config;
pub use run::{cmd_run, cmd_watch};
pub use status::{cmd_list, cmd_status, cmd_sync};

/// Exit status for a halted queue, so schedulers can alert on it.
pub const EXIT_HALTED: u8 = 2;

pub fn exit_code(outcome: Option<&CycleOutcome>) -> ExitCode {
    match outcome {
        Some(outcome) if outcome.is_halted() => ExitCode::from(EXIT_HALTED),
        _ => ExitCode::SUCCESS,
    }
}
