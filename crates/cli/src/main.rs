use std::process::ExitCode;

use clap::Parser;
use concierge_cli::Cli;
use concierge_core::config::AppConfig;

fn init_logging(config: &AppConfig) {
    use concierge_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder =
        tracing_subscriber::fmt().with_target(false).with_max_level(log_level).with_writer(std::io::stderr);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    // Commands report config errors themselves; logging just needs something usable.
    let config = AppConfig::load(cli.load_options()).unwrap_or_default();
    init_logging(&config);
    concierge_cli::execute(cli)
}
