use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum AddressFamily {
    IPv4,
    IPv6,
    Unix,
    #[default]
    Unknown,
}

impl AddressFamily {
    pub fn label(&self) -> &'static str {
        match self {
            AddressFamily::IPv4 => "IPv4",
            AddressFamily::IPv6 => "IPv6",
            AddressFamily::Unix => "Unix",
            AddressFamily::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum SocketKind {
    Tcp,
    Udp,
    #[default]
    Unknown,
}

impl SocketKind {
    pub fn label(&self) -> &'static str {
        match self {
            SocketKind::Tcp => "TCP",
            SocketKind::Udp => "UDP",
            SocketKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One socket as observed at poll time. Never mutated after the poll that produced it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionRecord {
    pub fd: u32,
    pub family: AddressFamily,
    pub kind: SocketKind,
    pub local_addr: String,
    pub remote_addr: String,
    pub status: String,
    pub pid: u32,
    pub process_name: String,
}

impl ConnectionRecord {
    /// Lower-cased text the filter is matched against.
    ///
    /// Fields are joined with a single space, so a filter containing a space
    /// can match across a field boundary.
    pub fn searchable(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.process_name, self.status, self.family, self.local_addr, self.remote_addr
        )
        .to_lowercase()
    }

    /// Host part of the remote endpoint, if there is something to probe.
    pub fn remote_host(&self) -> Option<&str> {
        let host = split_host(&self.remote_addr)?;
        match host {
            "" | "*" | "0.0.0.0" | "::" => None,
            h => Some(h),
        }
    }
}

/// Splits `host:port` or `[v6host]:port` and returns the host.
fn split_host(endpoint: &str) -> Option<&str> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return None;
    }
    if let Some(rest) = endpoint.strip_prefix('[') {
        return rest.split_once(']').map(|(host, _)| host);
    }
    match endpoint.rsplit_once(':') {
        Some((host, _port)) if !host.contains(':') => Some(host),
        Some(_) => Some(endpoint),
        None => Some(endpoint),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SortColumn {
    #[default]
    None,
    ProcessName,
    Pid,
    Status,
    Family,
    Kind,
    LocalAddr,
    RemoteAddr,
}

impl SortColumn {
    pub const ALL: [SortColumn; 8] = [
        SortColumn::None,
        SortColumn::ProcessName,
        SortColumn::Pid,
        SortColumn::Status,
        SortColumn::Family,
        SortColumn::Kind,
        SortColumn::LocalAddr,
        SortColumn::RemoteAddr,
    ];

    pub fn next(&self) -> Self {
        match self {
            SortColumn::None => SortColumn::ProcessName,
            SortColumn::ProcessName => SortColumn::Pid,
            SortColumn::Pid => SortColumn::Status,
            SortColumn::Status => SortColumn::Family,
            SortColumn::Family => SortColumn::Kind,
            SortColumn::Kind => SortColumn::LocalAddr,
            SortColumn::LocalAddr => SortColumn::RemoteAddr,
            SortColumn::RemoteAddr => SortColumn::None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortColumn::None => "none",
            SortColumn::ProcessName => "process",
            SortColumn::Pid => "pid",
            SortColumn::Status => "status",
            SortColumn::Family => "family",
            SortColumn::Kind => "type",
            SortColumn::LocalAddr => "local",
            SortColumn::RemoteAddr => "remote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        SortColumn::ALL.into_iter().find(|c| c.label() == s)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn toggled(&self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "▲",
            SortDirection::Descending => "▼",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcessDetails {
    pub username: String,
    pub cmdline: String,
}

impl ProcessDetails {
    pub fn placeholder() -> Self {
        Self { username: "N/A".into(), cmdline: "N/A".into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(remote: &str) -> ConnectionRecord {
        ConnectionRecord { remote_addr: remote.into(), ..Default::default() }
    }

    #[test]
    fn test_family_and_kind_labels() {
        assert_eq!(AddressFamily::IPv4.to_string(), "IPv4");
        assert_eq!(AddressFamily::Unix.label(), "Unix");
        assert_eq!(AddressFamily::default(), AddressFamily::Unknown);
        assert_eq!(SocketKind::Udp.to_string(), "UDP");
        assert_eq!(SocketKind::default().label(), "Unknown");
    }

    #[test]
    fn test_remote_host_extraction() {
        assert_eq!(record("93.184.216.34:443").remote_host(), Some("93.184.216.34"));
        assert_eq!(record("[2001:db8::1]:443").remote_host(), Some("2001:db8::1"));
        assert_eq!(record("example.com:80").remote_host(), Some("example.com"));
        assert_eq!(record("0.0.0.0:0").remote_host(), None);
        assert_eq!(record("[::]:0").remote_host(), None);
        assert_eq!(record("").remote_host(), None);
    }

    #[test]
    fn test_sort_column_cycle_and_parse() {
        let mut col = SortColumn::None;
        for expected in SortColumn::ALL.iter().skip(1) {
            col = col.next();
            assert_eq!(col, *expected);
        }
        assert_eq!(col.next(), SortColumn::None);

        assert_eq!(SortColumn::parse("PID"), Some(SortColumn::Pid));
        assert_eq!(SortColumn::parse("type"), Some(SortColumn::Kind));
        assert_eq!(SortColumn::parse("bogus"), None);
    }

    #[test]
    fn test_searchable_is_lowercase_and_space_joined() {
        let r = ConnectionRecord {
            process_name: "Firefox".into(),
            status: "ESTABLISHED".into(),
            family: AddressFamily::IPv4,
            local_addr: "10.0.0.2:5000".into(),
            remote_addr: "1.2.3.4:443".into(),
            ..Default::default()
        };
        assert_eq!(r.searchable(), "firefox established ipv4 10.0.0.2:5000 1.2.3.4:443");
    }
}
