// Process-wide registry owned by the execution context thread.
//
// Holds the two tables that span endpoints: registered endpoint ids (with
// each endpoint's mailbox) and the session table mapping every attached
// session to the endpoint that owns it. Only `context::run_context` touches
// a `Registry`, one job at a time, so there is no locking here.
//
// Deleting a session is a request, not a mutation: the registry routes a
// `SessionClosed` event to the owning endpoint's mailbox, and the record is
// only dropped when that endpoint reports the detach back (`forget_session`).

use std::collections::BTreeMap;
use std::sync::mpsc::Sender;

use ipcbus_protocol::types::{EndpointId, SessionId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::EndpointEvent;
use crate::session::SessionInfo;

/// Registry view of one attached session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub session: SessionId,
    pub endpoint: EndpointId,
    pub info: SessionInfo,
}

/// Table sizes, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub endpoints: usize,
    pub sessions: usize,
}

struct EndpointRecord {
    name: String,
    mailbox: Sender<EndpointEvent>,
}

pub(crate) struct Registry {
    endpoints: BTreeMap<EndpointId, EndpointRecord>,
    sessions: BTreeMap<SessionId, SessionRecord>,
    next_endpoint_id: u32,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            sessions: BTreeMap::new(),
            next_endpoint_id: 0,
        }
    }

    /// Assign a fresh endpoint id. Ids of unregistered endpoints are not
    /// handed out again until the counter wraps.
    pub(crate) fn register_endpoint(
        &mut self,
        name: String,
        mailbox: Sender<EndpointEvent>,
    ) -> EndpointId {
        let id = loop {
            let candidate = EndpointId(self.next_endpoint_id);
            self.next_endpoint_id = self.next_endpoint_id.wrapping_add(1);
            if candidate.is_valid() && !self.endpoints.contains_key(&candidate) {
                break candidate;
            }
        };
        debug!(endpoint = %id, name = %name, "endpoint registered");
        self.endpoints.insert(id, EndpointRecord { name, mailbox });
        id
    }

    /// Release an endpoint id, dropping any session records it still owned.
    pub(crate) fn unregister_endpoint(&mut self, id: EndpointId) -> bool {
        let Some(record) = self.endpoints.remove(&id) else {
            return false;
        };
        self.sessions.retain(|_, s| s.endpoint != id);
        debug!(endpoint = %id, name = %record.name, "endpoint unregistered");
        true
    }

    pub(crate) fn track_session(&mut self, record: SessionRecord) {
        if !self.endpoints.contains_key(&record.endpoint) {
            warn!(
                session = %record.session,
                endpoint = %record.endpoint,
                "session tracked for unregistered endpoint"
            );
        }
        self.sessions.insert(record.session, record);
    }

    pub(crate) fn forget_session(&mut self, id: SessionId) -> Option<SessionRecord> {
        self.sessions.remove(&id)
    }

    pub(crate) fn get_session(&self, id: SessionId) -> Option<SessionRecord> {
        self.sessions.get(&id).cloned()
    }

    /// Ask the owning endpoint to close `id`. Returns false if the session
    /// is unknown or its endpoint's mailbox is gone.
    pub(crate) fn delete_session(&mut self, id: SessionId) -> bool {
        let Some(record) = self.sessions.get(&id) else {
            warn!(session = %id, "delete requested for unknown session");
            return false;
        };
        let Some(owner) = self.endpoints.get(&record.endpoint) else {
            warn!(session = %id, endpoint = %record.endpoint, "session owner not registered");
            return false;
        };
        if owner.mailbox.send(EndpointEvent::SessionClosed(id)).is_err() {
            warn!(session = %id, endpoint = %record.endpoint, "endpoint mailbox closed");
            return false;
        }
        debug!(session = %id, endpoint = %record.endpoint, "session close routed");
        true
    }

    pub(crate) fn stats(&self) -> RegistryStats {
        RegistryStats {
            endpoints: self.endpoints.len(),
            sessions: self.sessions.len(),
        }
    }
}
