use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;

use anyhow::{Context, anyhow};
use netstat2::{AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState, get_sockets_info};
use sysinfo::{Pid, System, Users};

use crate::cli::types::{AddressFamily, ConnectionRecord, ProcessDetails, SocketKind};

/// Point-in-time source of socket records.
pub trait SnapshotProvider: Send + Sync {
    fn fetch(&self) -> anyhow::Result<Vec<ConnectionRecord>>;
}

/// Per-process metadata shown in the details pane.
pub trait ProcessInspector: Send + Sync {
    /// Returns placeholders for pid 0 and an error when the process cannot be read.
    fn describe(&self, pid: u32) -> anyhow::Result<ProcessDetails>;
}

/// Reads the host socket table and enriches each socket with its owning process.
///
/// Polling and detail lookups use separate process tables, so a slow poll never
/// holds up the details pane.
pub struct SystemProvider {
    system: Mutex<System>,
    inspector: Mutex<System>,
    users: Mutex<Users>,
}

impl Default for SystemProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProvider {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            inspector: Mutex::new(System::new()),
            users: Mutex::new(Users::new_with_refreshed_list()),
        }
    }

    /// Refreshes the polling process table and resolves `pids` to names.
    /// The table lock is released before the caller builds records.
    fn process_names(&self, pids: impl Iterator<Item = u32>) -> anyhow::Result<HashMap<u32, String>> {
        let mut system = self.system.lock().map_err(|_| anyhow!("process table lock poisoned"))?;
        system.refresh_processes();
        let mut names = HashMap::new();
        for pid in pids {
            names.entry(pid).or_insert_with(|| {
                system
                    .process(Pid::from_u32(pid))
                    .map(|p| p.name().to_string())
                    .unwrap_or_default()
            });
        }
        Ok(names)
    }
}

impl SnapshotProvider for SystemProvider {
    fn fetch(&self) -> anyhow::Result<Vec<ConnectionRecord>> {
        let sockets = get_sockets_info(
            AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6,
            ProtocolFlags::TCP | ProtocolFlags::UDP,
        )
        .context("failed to query socket table")?;

        let names = self.process_names(sockets.iter().flat_map(|s| s.associated_pids.iter().copied()))?;

        let mut records = Vec::with_capacity(sockets.len());
        for socket in sockets {
            let (family, kind, local, remote, status) = describe_socket(&socket.protocol_socket_info);
            let base = ConnectionRecord {
                fd: 0,
                family,
                kind,
                local_addr: local,
                remote_addr: remote,
                status,
                pid: 0,
                process_name: String::new(),
            };

            if socket.associated_pids.is_empty() {
                records.push(base);
                continue;
            }
            for pid in socket.associated_pids {
                let process_name = names.get(&pid).cloned().unwrap_or_default();
                records.push(ConnectionRecord { pid, process_name, ..base.clone() });
            }
        }

        log::debug!("fetched {} socket records", records.len());
        Ok(records)
    }
}

impl ProcessInspector for SystemProvider {
    fn describe(&self, pid: u32) -> anyhow::Result<ProcessDetails> {
        if pid == 0 {
            return Ok(ProcessDetails::placeholder());
        }

        let mut system = self.inspector.lock().map_err(|_| anyhow!("process table lock poisoned"))?;
        let spid = Pid::from_u32(pid);
        if !system.refresh_process(spid) {
            anyhow::bail!("process {pid} not found");
        }
        let process = system.process(spid).ok_or_else(|| anyhow!("process {pid} not found"))?;

        let cmdline = process.cmd().join(" ");
        let username = match process.user_id() {
            Some(uid) => {
                let users = self.users.lock().map_err(|_| anyhow!("user table lock poisoned"))?;
                users
                    .get_user_by_id(uid)
                    .map(|u| u.name().to_string())
                    .unwrap_or_else(|| "N/A".into())
            }
            None => "N/A".into(),
        };

        Ok(ProcessDetails { username, cmdline })
    }
}

fn describe_socket(info: &ProtocolSocketInfo) -> (AddressFamily, SocketKind, String, String, String) {
    match info {
        ProtocolSocketInfo::Tcp(tcp) => (
            family_of(&tcp.local_addr),
            SocketKind::Tcp,
            SocketAddr::new(tcp.local_addr, tcp.local_port).to_string(),
            SocketAddr::new(tcp.remote_addr, tcp.remote_port).to_string(),
            tcp_status(&tcp.state).to_string(),
        ),
        ProtocolSocketInfo::Udp(udp) => (
            family_of(&udp.local_addr),
            SocketKind::Udp,
            SocketAddr::new(udp.local_addr, udp.local_port).to_string(),
            String::new(),
            "NONE".to_string(),
        ),
    }
}

fn family_of(addr: &IpAddr) -> AddressFamily {
    match addr {
        IpAddr::V4(_) => AddressFamily::IPv4,
        IpAddr::V6(_) => AddressFamily::IPv6,
    }
}

fn tcp_status(state: &TcpState) -> &'static str {
    match state {
        TcpState::Listen => "LISTEN",
        TcpState::SynSent => "SYN_SENT",
        TcpState::SynReceived => "SYN_RECV",
        TcpState::Established => "ESTABLISHED",
        TcpState::FinWait1 => "FIN_WAIT1",
        TcpState::FinWait2 => "FIN_WAIT2",
        TcpState::CloseWait => "CLOSE_WAIT",
        TcpState::Closing => "CLOSING",
        TcpState::LastAck => "LAST_ACK",
        TcpState::TimeWait => "TIME_WAIT",
        TcpState::Closed => "CLOSE",
        _ => "UNKNOWN",
    }
}
