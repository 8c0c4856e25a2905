//! Risk-gated command execution.

pub mod executor;
pub mod shell;

pub use executor::{preview, CommandExecutor, ExecOutcome};
pub use shell::{run_shell, ShellConfig, ShellOutput};
