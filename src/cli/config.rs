use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::cli::DEFAULT_REFRESH_INTERVAL;
use crate::cli::types::{SortColumn, SortDirection};

/// sockscope: live view of host sockets and the processes that own them
#[derive(Parser, Debug, Clone)]
#[command(name = "sockscope")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Seconds between polls of the socket table
    #[arg(short, long, default_value_t = DEFAULT_REFRESH_INTERVAL.as_secs())]
    pub interval: u64,

    /// Initial filter text
    #[arg(short, long, default_value = "")]
    pub filter: String,

    /// Initial sort column: none, process, pid, status, family, type, local, remote
    #[arg(short, long, default_value = "none", value_parser = parse_sort_column)]
    pub sort: SortColumn,

    /// Sort descending
    #[arg(long)]
    pub desc: bool,

    /// Print one snapshot and exit
    #[arg(long)]
    pub once: bool,

    /// With --once, print JSON instead of a table
    #[arg(long, requires = "once")]
    pub json: bool,

    /// Directory relative export paths are resolved against (default: current directory)
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    /// Log file path (default: <temp dir>/sockscope.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging (also enabled by SOCKSCOPE_DEBUG)
    #[arg(short, long)]
    pub debug: bool,
}

fn parse_sort_column(s: &str) -> Result<SortColumn, String> {
    SortColumn::parse(s).ok_or_else(|| {
        let names: Vec<&str> = SortColumn::ALL.iter().map(|c| c.label()).collect();
        format!("unknown sort column '{s}' (expected one of: {})", names.join(", "))
    })
}

impl Cli {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval == 0 {
            anyhow::bail!("--interval must be at least 1 second");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }

    pub fn direction(&self) -> SortDirection {
        if self.desc { SortDirection::Descending } else { SortDirection::Ascending }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug || std::env::var_os("SOCKSCOPE_DEBUG").is_some()
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sockscope.log"))
    }

    pub fn export_base(&self) -> PathBuf {
        match &self.export_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}
