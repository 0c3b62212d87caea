//! Configuration view and validation commands - `migrator config`.

use std::path::Path;

use anyhow::Result;

use migrator::config::{DEFAULT_CONFIG_FILE, MigratorConfig};

use super::super::ConfigCommands;

pub fn cmd_config(config_path: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    let file = config_path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Migrator Configuration");
            println!("======================");
            println!();
            if file.exists() {
                println!("Config file: {}", file.display());
            } else {
                println!("No {} found; showing defaults.", file.display());
            }
            println!("Effective values (with env overrides):");
            println!();

            let config = MigratorConfig::resolve(config_path.filter(|p| p.exists()))?;
            print!("{}", config.to_toml()?);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = MigratorConfig::resolve(config_path)?;
            let warnings = config.validate()?;

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init { force }) => {
            if file.exists() && !force {
                println!("{} already exists.", file.display());
                println!("Pass --force to overwrite it.");
                return Ok(());
            }
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }

            MigratorConfig::default().save(file)?;

            println!("Created {}", file.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, cors_permissive");
            println!("  - [workspace] root, artifacts_root, sweep_on_start");
            println!("  - [pipeline] max_concurrent_jobs, timeouts, clone retries, strict_tests");
            println!("  - [tools] git_cmd, maven_cmd, gradle_cmd, publish_remote");
            println!();
        }
    }

    Ok(())
}
