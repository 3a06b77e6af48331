use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use sysinfo::{Pid, Signal, System};

use crate::cli::DEFAULT_EXPORT_FILE;
use crate::cli::types::ConnectionRecord;

pub const CSV_HEADER: [&str; 7] = ["ProcessName", "PID", "Status", "Family", "Type", "LocalAddr", "RemoteAddr"];

fn with_process<T>(pid: u32, f: impl FnOnce(&sysinfo::Process) -> anyhow::Result<T>) -> anyhow::Result<T> {
    let mut system = System::new();
    let spid = Pid::from_u32(pid);
    if !system.refresh_process(spid) {
        anyhow::bail!("process {pid} not found");
    }
    match system.process(spid) {
        Some(process) => f(process),
        None => anyhow::bail!("process {pid} not found"),
    }
}

/// Asks the process to exit (SIGTERM). No-op for pid 0.
pub fn terminate(pid: u32) -> anyhow::Result<()> {
    if pid == 0 {
        return Ok(());
    }
    with_process(pid, |process| match process.kill_with(Signal::Term) {
        Some(true) => {
            log::info!("sent SIGTERM to pid {pid}");
            Ok(())
        }
        Some(false) => anyhow::bail!("failed to send SIGTERM to pid {pid}"),
        None => anyhow::bail!("graceful termination is not supported on this platform"),
    })
}

/// Kills the process outright (SIGKILL). No-op for pid 0.
pub fn force_kill(pid: u32) -> anyhow::Result<()> {
    if pid == 0 {
        return Ok(());
    }
    with_process(pid, |process| {
        if process.kill() {
            log::info!("sent SIGKILL to pid {pid}");
            Ok(())
        } else {
            anyhow::bail!("failed to kill pid {pid}")
        }
    })
}

/// Turns the user's answer to the filename prompt into an absolute `.csv` path.
///
/// A blank answer selects the default filename. Relative paths resolve against `base`.
pub fn resolve_export_path(input: &str, base: &Path) -> PathBuf {
    let input = input.trim();
    let name = if input.is_empty() {
        DEFAULT_EXPORT_FILE.to_string()
    } else if input.ends_with(".csv") {
        input.to_string()
    } else {
        format!("{input}.csv")
    };
    let path = PathBuf::from(name);
    if path.is_absolute() { path } else { base.join(path) }
}

fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn write_row<W: Write>(out: &mut W, fields: &[&str]) -> std::io::Result<()> {
    let line: Vec<Cow<'_, str>> = fields.iter().map(|f| csv_field(f)).collect();
    writeln!(out, "{}", line.join(","))
}

/// Writes `records` as CSV to `path`, replacing any existing file.
pub fn write_csv(records: &[ConnectionRecord], path: &Path) -> anyhow::Result<PathBuf> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);

    write_row(&mut out, &CSV_HEADER)?;
    for c in records {
        let pid = c.pid.to_string();
        write_row(
            &mut out,
            &[
                c.process_name.as_str(),
                pid.as_str(),
                c.status.as_str(),
                c.family.label(),
                c.kind.label(),
                c.local_addr.as_str(),
                c.remote_addr.as_str(),
            ],
        )?;
    }
    out.flush().with_context(|| format!("failed to write {}", path.display()))?;

    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    log::info!("exported {} connections to {}", records.len(), resolved.display());
    Ok(resolved)
}
