//! sockscope: live terminal view of host sockets and their owning processes

use std::fs::File;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use log::LevelFilter;

use sockscope::cli::config::Cli;
use sockscope::cli::fetch::{ProcessInspector, SnapshotProvider, SystemProvider};
use sockscope::cli::state::ViewState;
use sockscope::cli::tui::{self, TuiOptions};

fn init_logging(cli: &Cli) -> Result<()> {
    // Logging goes to a file; stdout belongs to the terminal UI.
    let log_path = cli.log_path();
    let log_file = File::create(&log_path).map_err(|e| eyre!("cannot open log file {}: {e}", log_path.display()))?;
    let level = if cli.debug_enabled() { LevelFilter::Debug } else { LevelFilter::Info };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_millis()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    color_eyre::install()?;
    cli.validate().map_err(|e| eyre!("{e}"))?;
    init_logging(&cli)?;

    log::info!("starting sockscope (interval {:?})", cli.refresh_interval());

    let state = ViewState::with_spec(&cli.filter, cli.sort, cli.direction());
    let provider = Arc::new(SystemProvider::new());

    if cli.once {
        let fetcher = Arc::clone(&provider);
        let records = tokio::task::spawn_blocking(move || fetcher.fetch()).await?.map_err(|e| eyre!("{e:#}"))?;
        state.replace_all(records);
        let view = state.read();
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&*view)?);
        } else {
            print!("{}", tui::render_plain(&view));
        }
        return Ok(());
    }

    let snapshot: Arc<dyn SnapshotProvider> = provider.clone();
    let inspector: Arc<dyn ProcessInspector> = provider;
    let options = TuiOptions { refresh_interval: cli.refresh_interval(), export_base: cli.export_base() };
    tui::run_tui(state, snapshot, inspector, options).await?;

    log::info!("goodbye");
    Ok(())
}
