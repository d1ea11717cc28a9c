//! Listening-port inspection using lsof field output.

use std::collections::HashSet;

use crate::exec::{CommandExecutor, capture};

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Listener {
    pub port: u16,
    pub pid: i32,
    pub command: String,
}

pub fn listener_query(port: Option<u16>) -> String {
    match port {
        Some(port) => format!("lsof -nP -iTCP:{} -sTCP:LISTEN -Fpcn 2>/dev/null", port),
        None => "lsof -nP -iTCP -sTCP:LISTEN -Fpcn 2>/dev/null".to_string(),
    }
}

/// All TCP listeners, or only those on `port`.
pub fn scan_listeners(executor: &dyn CommandExecutor, port: Option<u16>) -> Vec<Listener> {
    let out = capture(executor, &listener_query(port), None);
    let mut listeners = parse_lsof_listeners(&out.lines);
    if let Some(port) = port {
        listeners.retain(|l| l.port == port);
    }
    listeners
}

pub fn port_in_use(executor: &dyn CommandExecutor, port: u16) -> bool {
    !scan_listeners(executor, Some(port)).is_empty()
}

/// Folds `lsof -F pcn` records into listeners. A `p` field opens a process
/// record; each following `n` field is one bound address.
pub fn parse_lsof_listeners<S: AsRef<str>>(lines: &[S]) -> Vec<Listener> {
    let mut pid: Option<i32> = None;
    let mut command = String::new();
    let mut found: HashSet<Listener> = HashSet::new();

    for field in lines.iter().map(|l| l.as_ref().trim()) {
        let mut chars = field.chars();
        let Some(tag) = chars.next() else {
            continue;
        };
        let value = chars.as_str();
        match tag {
            'p' => {
                pid = value.parse().ok();
                command.clear();
            }
            'c' => command = value.to_string(),
            'n' => {
                if let (Some(pid), Some(port)) = (pid, parse_port_from_lsof(value)) {
                    found.insert(Listener {
                        port,
                        pid,
                        command: command.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    let mut listeners: Vec<Listener> = found.into_iter().collect();
    listeners.sort();
    listeners
}

/// Port of an lsof name field such as `*:3000`, `127.0.0.1:5173` or
/// `[::1]:8000`. Connection names (`a->b`) are not listeners.
pub fn parse_port_from_lsof(name: &str) -> Option<u16> {
    if name.contains("->") {
        return None;
    }
    name.rsplit_once(':')
        .map(|(_, port)| port)
        .filter(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|port| port.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_wildcard() {
        assert_eq!(parse_port_from_lsof("*:3000"), Some(3000));
    }

    #[test]
    fn parses_ipv6_localhost() {
        assert_eq!(parse_port_from_lsof("[::1]:8000"), Some(8000));
    }

    #[test]
    fn rejects_non_listen_or_flow() {
        assert_eq!(parse_port_from_lsof("127.0.0.1:abcd"), None);
        assert_eq!(parse_port_from_lsof("127.0.0.1->192.168.0.1:1234"), None);
        assert_eq!(parse_port_from_lsof("garbage"), None);
    }

    #[test]
    fn groups_fields_by_process() {
        let lines = [
            "p101", "cnode", "n*:3000", "n[::1]:3000", "p202", "cpython3", "n127.0.0.1:8000",
        ];
        let listeners = parse_lsof_listeners(&lines);
        assert_eq!(
            listeners,
            vec![
                Listener {
                    port: 3000,
                    pid: 101,
                    command: "node".into()
                },
                Listener {
                    port: 8000,
                    pid: 202,
                    command: "python3".into()
                },
            ]
        );
    }
}
