//! HTTP service command - `migrator serve`.

use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::warn;

use migrator::config::MigratorConfig;
use migrator::logging::{LoggingConfig, init_logging};

use crate::Cli;

/// Flags that override the file and environment layers.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub work_dir: Option<PathBuf>,
    pub artifacts_dir: Option<PathBuf>,
    pub max_jobs: Option<usize>,
    pub dev: bool,
}

impl ServeOverrides {
    pub fn apply(self, config: &mut MigratorConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = self.work_dir {
            config.workspace.root = dir;
        }
        if let Some(dir) = self.artifacts_dir {
            config.workspace.artifacts_root = dir;
        }
        if let Some(n) = self.max_jobs {
            config.pipeline.max_concurrent_jobs = n;
        }
        if self.dev {
            config.server.cors_permissive = true;
        }
    }
}

pub async fn cmd_serve(cli: &Cli, overrides: ServeOverrides) -> Result<()> {
    let mut config = MigratorConfig::resolve(cli.config.as_deref())?;
    overrides.apply(&mut config);

    init_logging(LoggingConfig::from_section(
        &config.logging,
        cli.verbose,
        cli.log_json,
    ));

    let warnings = match config.validate() {
        Ok(warnings) => warnings,
        Err(e) => bail!("Invalid configuration: {:#}", e),
    };
    for warning in warnings {
        warn!("{}", warning);
    }

    migrator::migration::server::start_server(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_config() {
        let mut config = MigratorConfig::default();
        ServeOverrides {
            port: Some(9100),
            work_dir: Some(PathBuf::from("/srv/work")),
            max_jobs: Some(8),
            dev: true,
            ..Default::default()
        }
        .apply(&mut config);
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.workspace.root, PathBuf::from("/srv/work"));
        assert_eq!(config.pipeline.max_concurrent_jobs, 8);
        assert!(config.server.cors_permissive);
        assert_eq!(config.server.host, MigratorConfig::default().server.host);
    }
}
