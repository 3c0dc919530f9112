use clap::Parser;
use waypost::cli::{run_cli, Cli};
use waypost::logging::{init_logging, LogConfig};

fn main() -> anyhow::Result<()> {
    let mut log_config = LogConfig::from_env();
    log_config.async_logging = false;
    log_config.log_level = std::env::var("WAYPOST_LOG_LEVEL").unwrap_or_else(|_| "warn".into());
    init_logging(&log_config)?;
    run_cli(Cli::parse())
}
