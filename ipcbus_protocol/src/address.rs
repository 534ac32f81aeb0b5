// Socket URL parsing and building.
//
// Every physical socket on the bus is named by a URL:
// - `tcp://<host>:<port>`  stream socket over the network
// - `ipc://<path>`         local domain socket (no IP, no port)
// - `inproc://<name>`      in-process pipe (no IP, no port)
//
// `svc://<name>` is the fourth scheme, but it names a service rather than a
// socket; turning it into one of the above is the name server's job, so
// `parse_url` rejects it. See `ipcbus_hub::endpoint` for the default service
// URL built from an endpoint's name.
//
// `parse_url` returns a `SocketAddress` whose `url` field is the canonical
// form (rebuilt via `build_url`), so two spellings of the same address
// compare equal.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const URL_TCP: &str = "tcp://";
pub const URL_IPC: &str = "ipc://";
pub const URL_INPROC: &str = "inproc://";
pub const URL_SVC: &str = "svc://";

/// Wildcard host meaning "listen on every interface".
pub const IP_ALL_INTERFACES: &str = "0.0.0.0";

/// Transport family of a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    Tcp,
    Ipc,
    InProc,
}

impl SocketType {
    pub fn scheme(self) -> &'static str {
        match self {
            SocketType::Tcp => URL_TCP,
            SocketType::Ipc => URL_IPC,
            SocketType::InProc => URL_INPROC,
        }
    }

    /// True for sockets that carry IP addresses.
    pub fn is_network(self) -> bool {
        matches!(self, SocketType::Tcp)
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketType::Tcp => "tcp",
            SocketType::Ipc => "ipc",
            SocketType::InProc => "inproc",
        };
        f.write_str(name)
    }
}

/// A parsed socket URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketAddress {
    pub socket_type: SocketType,
    /// Host for TCP, path or name otherwise.
    pub address: String,
    /// Zero for non-network sockets.
    pub port: u16,
    /// Canonical URL text.
    pub url: String,
}

impl SocketAddress {
    pub fn new(socket_type: SocketType, address: &str, port: u16) -> Self {
        Self {
            socket_type,
            address: address.to_string(),
            port,
            url: build_url(socket_type, address, port),
        }
    }
}

/// Parse a socket URL. Returns `None` for unknown schemes, `svc://` URLs,
/// empty addresses, and TCP URLs without a valid port.
pub fn parse_url(text: &str) -> Option<SocketAddress> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix(URL_TCP) {
        let (host, port) = rest.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port: u16 = port.parse().ok()?;
        return Some(SocketAddress::new(SocketType::Tcp, host, port));
    }

    let (socket_type, rest) = if let Some(rest) = text.strip_prefix(URL_IPC) {
        (SocketType::Ipc, rest)
    } else if let Some(rest) = text.strip_prefix(URL_INPROC) {
        (SocketType::InProc, rest)
    } else {
        return None;
    };

    if rest.is_empty() {
        return None;
    }
    Some(SocketAddress::new(socket_type, rest, 0))
}

/// Build the canonical URL for a socket. `port` is ignored for non-network
/// sockets.
pub fn build_url(socket_type: SocketType, address: &str, port: u16) -> String {
    match socket_type {
        SocketType::Tcp => format!("{URL_TCP}{address}:{port}"),
        other => format!("{}{address}", other.scheme()),
    }
}
