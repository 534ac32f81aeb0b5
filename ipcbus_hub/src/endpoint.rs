// The endpoint: hub of sockets, sessions, and hosted objects.
//
// An `Endpoint` is the top-level addressable participant on the bus. It
// owns zero or more `SessionContainer`s (one per physical socket) and zero
// or more attached `BusObject`s, and is itself the implicit "main" object
// (`ObjectId::MAIN`).
//
// Threading: every table mutation takes `&mut self`, so all of them happen
// on whichever thread owns the endpoint. Registry-level work (endpoint id
// assignment/release, the cross-endpoint session table, kick-outs) goes to
// the execution context as jobs (see `context.rs`). Kick-outs come back as
// `EndpointEvent`s in the endpoint's mailbox and are applied by
// `process_events` on the owner thread.
//
// Notification rules:
// - Attaching an object notifies it of every session it authenticates, with
//   `is_first` set only for the first one.
// - Attaching a session notifies every object that authenticates it, then
//   the endpoint's own hooks, all with `is_first` = "this is the endpoint's
//   first session".
// - Detaching a session notifies the endpoint, then every object, with
//   `is_last` = "this was the endpoint's last session".
// - Detaching an object notifies it of every session, with `is_last` on the
//   session at which the remaining count reaches one.
//
// Teardown order (on drop, including auto-remove): disable auto-remove and
// migration, detach every object, release every socket (which detaches its
// sessions), then unregister from the context.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use ipcbus_protocol::address::{IP_ALL_INTERFACES, SocketType, URL_SVC, build_url, parse_url};
use ipcbus_protocol::message::TargetedMessage;
use ipcbus_protocol::types::{EndpointId, ObjectId, Role, SessionId, SocketId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::context::{ContextHandle, EndpointEvent};
use crate::error::{ContextError, EndpointError};
use crate::object::{BusObject, NoHooks, ObjectFactory, ObjectHooks, ObjectRef, ObjectTable};
use crate::registry::SessionRecord;
use crate::session::{Session, SessionContainer};

/// Name-server connection state of an endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Where the endpoint is in its (one-shot) registration lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    Unregistered,
    Registered(EndpointId),
    /// Registered once and released; cannot register again.
    Retired,
}

/// Outcome of `Endpoint::replace_url_ip_address`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlRewrite {
    /// Peer IP substituted for the wildcard host, if a substitution happened.
    pub ip: Option<String>,
    pub port: u16,
}

pub struct Endpoint {
    name: String,
    ns_name: Option<String>,
    role: Role,
    connection_status: ConnectionStatus,
    registration: Registration,
    context: ContextHandle,
    mailbox_tx: Sender<EndpointEvent>,
    mailbox_rx: Receiver<EndpointEvent>,
    hooks: Box<dyn ObjectHooks>,
    factory: Option<Box<dyn ObjectFactory>>,
    objects: ObjectTable,
    sockets: BTreeMap<SocketId, SessionContainer>,
    session_count: usize,
    bound_session: SessionId,
    auto_remove: bool,
    migrate_enabled: bool,
}

impl Endpoint {
    /// Create an endpoint that accepts every session, and register it.
    pub fn new(config: EndpointConfig, context: ContextHandle) -> Result<Self, EndpointError> {
        Self::with_hooks(config, context, NoHooks)
    }

    /// Create an endpoint with its own (main object) hooks, and register it.
    pub fn with_hooks(
        config: EndpointConfig,
        context: ContextHandle,
        hooks: impl ObjectHooks + 'static,
    ) -> Result<Self, EndpointError> {
        let (mailbox_tx, mailbox_rx) = mpsc::channel();
        let mut endpoint = Self {
            name: config.name,
            ns_name: config.ns_name,
            role: config.role,
            connection_status: ConnectionStatus::Disconnected,
            registration: Registration::Unregistered,
            context,
            mailbox_tx,
            mailbox_rx,
            hooks: Box::new(hooks),
            factory: None,
            objects: ObjectTable::new(),
            sockets: BTreeMap::new(),
            session_count: 0,
            bound_session: SessionId::INVALID,
            auto_remove: config.auto_remove,
            migrate_enabled: true,
        };
        endpoint.register_self()?;
        Ok(endpoint)
    }

    /// Install the hook `get_object` consults when a target is missing.
    pub fn set_object_factory(&mut self, factory: impl ObjectFactory + 'static) {
        self.factory = Some(Box::new(factory));
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ns_name(&self) -> Option<&str> {
        self.ns_name.as_deref()
    }

    pub fn set_ns_name(&mut self, ns_name: Option<String>) {
        self.ns_name = ns_name;
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Endpoint id, or `EndpointId::INVALID` while not registered.
    pub fn id(&self) -> EndpointId {
        match self.registration {
            Registration::Registered(id) => id,
            _ => EndpointId::INVALID,
        }
    }

    pub fn registration(&self) -> Registration {
        self.registration
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.registration, Registration::Registered(_))
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// Updated by the name-server glue as it connects and disconnects.
    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.connection_status = status;
    }

    pub fn session_count(&self) -> usize {
        self.session_count
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Sequence the next attached object will be stamped with.
    pub fn id_seed(&self) -> u32 {
        self.objects.id_seed()
    }

    pub fn auto_remove(&self) -> bool {
        self.auto_remove
    }

    pub fn set_auto_remove(&mut self, enabled: bool) {
        self.auto_remove = enabled;
    }

    pub fn is_migrate_enabled(&self) -> bool {
        self.migrate_enabled
    }

    pub fn enable_migrate(&mut self, enabled: bool) {
        self.migrate_enabled = enabled;
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// `svc://` followed by the name-server name, or the endpoint name.
    pub fn default_svc_url(&self) -> String {
        let name = self.ns_name.as_deref().unwrap_or(&self.name);
        format!("{URL_SVC}{name}")
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Obtain an endpoint id from the context. Returns the cached id without
    /// a round-trip if already registered.
    pub fn register_self(&mut self) -> Result<EndpointId, EndpointError> {
        match self.registration {
            Registration::Registered(id) => return Ok(id),
            Registration::Retired => return Err(EndpointError::Retired),
            Registration::Unregistered => {}
        }
        let id = self
            .context
            .register_endpoint(&self.name, self.mailbox_tx.clone())?;
        self.connection_status = ConnectionStatus::Disconnected;
        if id.is_valid() {
            self.registration = Registration::Registered(id);
            info!(endpoint = %id, name = %self.name, "endpoint registered");
        }
        Ok(id)
    }

    /// Release the endpoint id. No-op unless registered.
    pub fn unregister_self(&mut self) -> Result<(), EndpointError> {
        let Registration::Registered(id) = self.registration else {
            return Ok(());
        };
        self.context.unregister_endpoint(id)?;
        self.connection_status = ConnectionStatus::Disconnected;
        self.registration = Registration::Retired;
        info!(endpoint = %id, name = %self.name, "endpoint unregistered");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Object table
    // -----------------------------------------------------------------------

    /// Attach `obj`, assigning it a fresh composite id, and report every
    /// session it authenticates as online.
    pub fn add_object(&mut self, obj: &Arc<BusObject>) -> Result<ObjectId, EndpointError> {
        let requested = obj.id();
        if requested.is_main() {
            return Err(EndpointError::MainIdReserved(requested));
        }
        // Set while the object sits in any endpoint's table, this one included.
        if obj.is_migrate_enabled() {
            return Err(EndpointError::AlreadyAttached(requested));
        }

        let local = if requested.is_valid() && !requested.local_part().is_main() {
            requested.local_part()
        } else {
            self.objects.allocate_local_id()
        };

        if obj.role() == Role::Server && self.objects.find(local, true).is_some() {
            warn!(
                endpoint = %self.name,
                object = %obj.name(),
                class = local.class().0,
                "server object of this class already exists"
            );
            return Err(EndpointError::DuplicateServerClass(local.class()));
        }

        let id = self.objects.compose(local);
        if self.objects.holds(id) {
            return Err(EndpointError::AlreadyAttached(id));
        }
        obj.set_id(id);
        let inserted = self.objects.insert(obj.clone());
        debug_assert!(inserted);
        obj.enable_migrate(true);
        debug!(endpoint = %self.name, object = %obj.name(), id = %id, "object attached");

        let hooks = obj.hooks();
        let mut is_first = true;
        for container in self.sockets.values() {
            for session in container.sessions() {
                if !hooks.authenticate(session.info()) {
                    continue;
                }
                hooks.on_session_online(session, is_first);
                is_first = false;
            }
        }

        Ok(id)
    }

    /// Detach `obj`, reporting every session as offline to it. The object
    /// keeps its id and goes back to its creator. Returns false if `obj` was
    /// not attached here.
    pub fn remove_object(&mut self, obj: &Arc<BusObject>) -> bool {
        if !self.objects.contains(obj) {
            return false;
        }
        self.objects.remove(obj.id());
        self.release_object(obj);
        true
    }

    /// Offline-notify an object that has already left the table.
    fn release_object(&self, obj: &BusObject) {
        let hooks = obj.hooks();
        let mut remaining = self.session_count;
        for container in self.sockets.values() {
            for session in container.sessions() {
                let is_last = remaining == 1;
                remaining = remaining.saturating_sub(1);
                hooks.on_session_offline(session, is_last);
            }
        }
        obj.enable_migrate(false);
        debug!(endpoint = %self.name, object = %obj.name(), id = %obj.id(), "object detached");
    }

    /// Look up an attached object. With `server_only`, matches the first
    /// server object of the same class; otherwise requires the exact id.
    pub fn find_object(&self, id: ObjectId, server_only: bool) -> Option<Arc<BusObject>> {
        self.objects.find(id, server_only).cloned()
    }

    /// Resolve a message's target. On a miss the object factory gets one
    /// chance to create the object before the lookup is repeated.
    pub fn get_object(
        &mut self,
        message: &dyn TargetedMessage,
        server_only: bool,
    ) -> Option<ObjectRef> {
        let id = message.target_object_id();
        if id.is_main() {
            return Some(ObjectRef::Main);
        }
        if let Some(obj) = self.find_object(id, server_only) {
            return Some(ObjectRef::Hosted(obj));
        }

        if let Some(mut factory) = self.factory.take() {
            factory.create_object(self, message);
            // The factory may have installed a replacement for itself.
            if self.factory.is_none() {
                self.factory = Some(factory);
            }
        }

        let found = self.find_object(id, server_only).map(ObjectRef::Hosted);
        if found.is_none() {
            debug!(
                endpoint = %self.name,
                target = %id,
                source = ?message.source_session(),
                "no object for message target"
            );
        }
        found
    }

    // -----------------------------------------------------------------------
    // Sockets
    // -----------------------------------------------------------------------

    /// Take ownership of a session container.
    pub fn add_socket(&mut self, container: SessionContainer) -> Result<(), EndpointError> {
        let socket_id = container.socket_id();
        if self.sockets.contains_key(&socket_id) {
            return Err(EndpointError::DuplicateSocket(socket_id));
        }
        debug!(
            endpoint = %self.name,
            socket = %socket_id,
            kind = %container.address().socket_type,
            url = %container.url(),
            "socket added"
        );
        self.sockets.insert(socket_id, container);
        Ok(())
    }

    /// Delete one socket, or every socket when `socket_id` is `None`. Each
    /// deleted socket's sessions are detached first.
    pub fn delete_socket(&mut self, socket_id: Option<SocketId>) {
        match socket_id {
            Some(id) => self.release_socket(id),
            None => {
                let ids: Vec<SocketId> = self.sockets.keys().copied().collect();
                for id in ids {
                    self.release_socket(id);
                }
            }
        }
    }

    fn release_socket(&mut self, socket_id: SocketId) {
        let Some(container) = self.sockets.get(&socket_id) else {
            return;
        };
        for session_id in container.session_ids() {
            self.unsubscribe_session(session_id);
            self.delete_connected_session(session_id);
        }
        if let Some(container) = self.sockets.remove(&socket_id) {
            debug!(endpoint = %self.name, socket = %socket_id, url = %container.url(), "socket deleted");
        }
    }

    pub fn socket(&self, socket_id: SocketId) -> Option<&SessionContainer> {
        self.sockets.get(&socket_id)
    }

    /// Owned containers in socket-id order.
    pub fn sockets(&self) -> impl Iterator<Item = &SessionContainer> {
        self.sockets.values()
    }

    pub fn get_socket_by_url(&self, url: &str) -> Option<&SessionContainer> {
        self.sockets.values().find(|c| c.url() == url)
    }

    pub fn url_list(&self) -> Vec<String> {
        self.sockets.values().map(|c| c.url().to_string()).collect()
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Attach a session to the container `socket_id`, after the endpoint's
    /// own authentication hook accepts it.
    pub fn add_connected_session(
        &mut self,
        socket_id: SocketId,
        session: Session,
    ) -> Result<(), EndpointError> {
        let session_id = session.id();
        if !self.hooks.authenticate(session.info()) {
            warn!(endpoint = %self.name, session = %session_id, "session rejected by endpoint");
            return Err(EndpointError::AuthenticationRejected(session_id));
        }
        if self.session(session_id).is_some() {
            return Err(EndpointError::DuplicateSession(session_id));
        }
        let Some(container) = self.sockets.get_mut(&socket_id) else {
            return Err(EndpointError::UnknownSocket(socket_id));
        };

        let is_first = self.session_count == 0;
        self.session_count += 1;
        let session = container.add_session(session);
        debug!(
            endpoint = %self.name,
            session = %session_id,
            socket = %socket_id,
            is_first,
            "session attached"
        );

        for obj in self.objects.values() {
            let hooks = obj.hooks();
            if hooks.authenticate(session.info()) {
                hooks.on_session_online(session, is_first);
            }
        }
        self.hooks.on_session_online(session, is_first);

        if let Registration::Registered(endpoint) = self.registration {
            let record = SessionRecord {
                session: session_id,
                endpoint,
                info: session.info().clone(),
            };
            if let Err(e) = self.context.track_session(record) {
                warn!(endpoint = %self.name, session = %session_id, error = %e, "session not tracked");
            }
        }
        Ok(())
    }

    /// Detach a session and report it offline to the endpoint and then to
    /// every object. Returns the detached session, or `None` if it was not
    /// attached here.
    pub fn delete_connected_session(&mut self, session_id: SessionId) -> Option<Session> {
        let socket_id = self
            .sockets
            .values()
            .find(|c| c.contains(session_id))
            .map(SessionContainer::socket_id)?;

        let is_last = self.session_count == 1;
        let session = self.sockets.get_mut(&socket_id)?.remove_session(session_id)?;
        self.session_count = self.session_count.saturating_sub(1);
        if self.bound_session == session_id {
            self.bound_session = SessionId::INVALID;
        }
        debug!(endpoint = %self.name, session = %session_id, is_last, "session detached");

        self.hooks.on_session_offline(&session, is_last);
        for obj in self.objects.values() {
            obj.hooks().on_session_offline(&session, is_last);
        }

        if self.is_registered() {
            let forgotten = self.context.forget_session(session_id);
            if let Err(e) = forgotten {
                warn!(endpoint = %self.name, session = %session_id, error = %e, "session not forgotten");
            }
        }
        Some(session)
    }

    /// Tell every object, then the endpoint, to drop the session's
    /// subscriptions. Returns false if the session is not attached here.
    pub fn unsubscribe_session(&self, session_id: SessionId) -> bool {
        let Some(session) = self.session(session_id) else {
            return false;
        };
        for obj in self.objects.values() {
            obj.hooks().on_unsubscribe(session);
        }
        self.hooks.on_unsubscribe(session);
        true
    }

    /// Ask the context to close a session. Returns once the request is
    /// queued; the session is detached later, when its owner runs
    /// `process_events`.
    pub fn kick_out(&self, session_id: SessionId) -> Result<(), ContextError> {
        info!(endpoint = %self.name, session = %session_id, "kicking out session");
        self.context.delete_session(session_id)
    }

    /// Apply everything the context has routed to this endpoint. Returns the
    /// number of events handled. Call `check_auto_remove` afterwards if the
    /// endpoint is set to auto-remove.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.mailbox_rx.try_recv() {
            match event {
                EndpointEvent::SessionClosed(session_id) => {
                    self.unsubscribe_session(session_id);
                    if self.delete_connected_session(session_id).is_none() {
                        debug!(endpoint = %self.name, session = %session_id, "closed session already gone");
                    }
                }
            }
            handled += 1;
        }
        handled
    }

    /// Destroy the endpoint if auto-remove is on and no sessions remain.
    /// Returns the endpoint back when it survives.
    #[must_use = "dropping the returned endpoint destroys it"]
    pub fn check_auto_remove(self) -> Option<Self> {
        if self.auto_remove && self.session_count == 0 {
            info!(endpoint = %self.name, "no sessions left, auto-removing endpoint");
            drop(self);
            return None;
        }
        Some(self)
    }

    /// Find an attached session in any container.
    pub fn session(&self, session_id: SessionId) -> Option<&Session> {
        self.sockets.values().find_map(|c| c.session(session_id))
    }

    // -----------------------------------------------------------------------
    // Peer and address resolution
    // -----------------------------------------------------------------------

    /// Bind the endpoint to a particular session for `preferred_peer`.
    pub fn bind_session(&mut self, session_id: SessionId) {
        self.bound_session = session_id;
    }

    pub fn bound_session(&self) -> SessionId {
        self.bound_session
    }

    /// The bound session if it is still attached, otherwise the first
    /// socket's default session.
    pub fn preferred_peer(&self) -> Option<&Session> {
        if let Some(session) = self.session(self.bound_session) {
            return Some(session);
        }
        self.sockets.values().next()?.default_session()
    }

    /// Local (`self_side`) or peer IP of a session, defaulting to the
    /// preferred peer. `None` for sockets that have no IP.
    pub fn retrieve_ip_address(
        &self,
        session_id: Option<SessionId>,
        self_side: bool,
    ) -> Option<String> {
        let session = match session_id {
            Some(id) => self.session(id)?,
            None => self.preferred_peer()?,
        };
        let info = session.info();
        if !info.socket_type().is_network() {
            return None;
        }
        let connection = &info.connection;
        Some(if self_side {
            connection.self_ip.clone()
        } else {
            connection.peer_ip.clone()
        })
    }

    pub fn host_ip(&self, session_id: Option<SessionId>) -> Option<String> {
        self.retrieve_ip_address(session_id, true)
    }

    pub fn peer_ip(&self, session_id: Option<SessionId>) -> Option<String> {
        self.retrieve_ip_address(session_id, false)
    }

    /// Rewrite a TCP URL listening on all interfaces to the peer's concrete
    /// IP. Other TCP URLs are canonicalised; non-TCP URLs are rejected.
    pub fn replace_url_ip_address(
        &self,
        url: &mut String,
        session_id: Option<SessionId>,
    ) -> Option<UrlRewrite> {
        let addr = parse_url(url.as_str())?;
        if addr.socket_type != SocketType::Tcp {
            return None;
        }
        if addr.address != IP_ALL_INTERFACES {
            *url = addr.url;
            return Some(UrlRewrite {
                ip: None,
                port: addr.port,
            });
        }

        let peer_ip = self.peer_ip(session_id).filter(|ip| !ip.is_empty())?;
        *url = build_url(addr.socket_type, &peer_ip, addr.port);
        Some(UrlRewrite {
            ip: Some(peer_ip),
            port: addr.port,
        })
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    fn teardown(&mut self) {
        self.auto_remove = false;
        self.migrate_enabled = false;
        while let Some(obj) = self.objects.pop_first() {
            self.release_object(&obj);
        }
        self.delete_socket(None);
        if let Err(e) = self.unregister_self() {
            warn!(endpoint = %self.name, error = %e, "could not unregister endpoint");
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.teardown();
    }
}
