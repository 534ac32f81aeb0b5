// Sessions and session containers.
//
// A `Session` is one authenticated logical connection to a peer. A transport
// creates it when a connection is accepted or established and hands it to
// the owning endpoint (`Endpoint::add_connected_session`), which files it
// under the `SessionContainer` of the socket it arrived on.
//
// A `SessionContainer` owns every session produced by one physical socket
// (a listener on the server side, a connector on the client side). Sessions
// are kept in insertion order; the first one still attached is the
// container's default ("preferred") session. Containers are owned by exactly
// one endpoint and are only mutated through it, so the mutating methods here
// are crate-private.
//
// Neither type does any I/O. Address details come from the transport via
// `SessionInfo`.

use ipcbus_protocol::address::{SocketAddress, SocketType};
use ipcbus_protocol::types::{SessionId, SocketId};
use serde::{Deserialize, Serialize};

/// OS-level identity of the peer process, when the transport can provide it
/// (e.g. `SO_PEERCRED` on local sockets).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCredentials {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

/// IP-level endpoints of a connection. Empty/zero for non-network sockets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub self_ip: String,
    pub self_port: u16,
    pub peer_ip: String,
    pub peer_port: u16,
}

/// Everything an authentication hook gets to look at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Address of the socket the session belongs to.
    pub socket: SocketAddress,
    pub connection: ConnectionInfo,
    pub credentials: Option<PeerCredentials>,
}

impl SessionInfo {
    pub fn new(socket: SocketAddress) -> Self {
        Self {
            socket,
            connection: ConnectionInfo::default(),
            credentials: None,
        }
    }

    pub fn with_connection(mut self, connection: ConnectionInfo) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_credentials(mut self, credentials: PeerCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn socket_type(&self) -> SocketType {
        self.socket.socket_type
    }
}

/// One logical connection to a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    socket_id: SocketId,
    info: SessionInfo,
}

impl Session {
    /// A session not yet attached to any container.
    pub fn new(id: SessionId, info: SessionInfo) -> Self {
        Self {
            id,
            socket_id: SocketId::INVALID,
            info,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Socket (container) this session is filed under; `SocketId::INVALID`
    /// while unattached.
    pub fn socket_id(&self) -> SocketId {
        self.socket_id
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }
}

/// The sessions of one physical socket.
#[derive(Debug)]
pub struct SessionContainer {
    socket_id: SocketId,
    address: SocketAddress,
    sessions: Vec<Session>,
}

impl SessionContainer {
    pub fn new(socket_id: SocketId, address: SocketAddress) -> Self {
        Self {
            socket_id,
            address,
            sessions: Vec::new(),
        }
    }

    pub fn socket_id(&self) -> SocketId {
        self.socket_id
    }

    pub fn address(&self) -> &SocketAddress {
        &self.address
    }

    pub fn url(&self) -> &str {
        &self.address.url
    }

    /// The earliest-inserted session still attached.
    pub fn default_session(&self) -> Option<&Session> {
        self.sessions.first()
    }

    /// Attached sessions in insertion order.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.session(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub(crate) fn add_session(&mut self, mut session: Session) -> &Session {
        session.socket_id = self.socket_id;
        self.sessions.push(session);
        &self.sessions[self.sessions.len() - 1]
    }

    pub(crate) fn remove_session(&mut self, id: SessionId) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        let mut session = self.sessions.remove(index);
        session.socket_id = SocketId::INVALID;
        Some(session)
    }

    /// Ids of every attached session, for teardown loops that need to mutate
    /// the container while walking it.
    pub(crate) fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|s| s.id).collect()
    }
}
