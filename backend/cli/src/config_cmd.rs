//! CLI Config Subcommands

use std::path::Path;

use anyhow::{bail, Result};
use clap::Subcommand;

use aerodesk_config::{load_config, validate, write_config, AeroConfig};

use crate::terminal_output::{note_error, note_info, note_success, note_warn};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as YAML
    Show,
    /// Print the config file location
    Path,
    /// Write a config file with every default filled in
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check the config file for errors
    Validate,
}

pub async fn run(cmd: ConfigCommands, path: &Path, effective: &AeroConfig) -> Result<()> {
    match cmd {
        ConfigCommands::Show => print!("{}", serde_yaml::to_string(effective)?),
        ConfigCommands::Path => println!("{}", path.display()),
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            write_config(&AeroConfig::default(), path).await?;
            note_success(&format!("Wrote {}", path.display()));
        }
        ConfigCommands::Validate => {
            let report = validate(&load_config(path).await?);
            for warning in &report.warnings {
                note_warn(&warning.to_string());
            }
            for error in &report.errors {
                note_error(&error.to_string());
            }
            if !report.is_valid() {
                bail!("{} error(s) in {}", report.errors.len(), path.display());
            }
            note_info(&format!("{} is valid", path.display()));
        }
    }
    Ok(())
}
