// ipcbus_hub: endpoint, session, and object hub of the IPC bus.
//
// An endpoint is the top-level participant on the bus. It owns the sockets
// it listens or connects on, the sessions each socket produced, and the
// service objects it hosts, and it keeps those objects informed as sessions
// come and go. Process-wide bookkeeping (endpoint ids, the cross-endpoint
// session table, kick-outs) runs on a single execution context thread.
//
// Module overview:
// - `endpoint.rs`: `Endpoint`: object table, socket/session tables,
//                  online/offline/unsubscribe broadcasting, peer and URL
//                  resolution, registration, teardown.
// - `object.rs`:   `BusObject`, the `ObjectHooks` and `ObjectFactory`
//                  traits, and the endpoint-private `ObjectTable`.
// - `session.rs`:  `Session`, `SessionInfo`, and `SessionContainer` (the
//                  sessions of one socket).
// - `context.rs`:  `ExecutionContext` (the job thread) and the cloneable
//                  `ContextHandle` every endpoint submits jobs through.
// - `registry.rs`: Tables owned by the context thread.
// - `config.rs`:   Serde-loadable configuration.
// - `error.rs`:    `ContextError` and `EndpointError`.
//
// Dependencies: `ipcbus_protocol` (ids and URLs). No transport or codec: the
// hub is fed sessions by whatever transport the embedding process runs.

pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod object;
pub mod registry;
pub mod session;

pub use config::{ContextConfig, EndpointConfig, HubConfig};
pub use context::{ContextHandle, EndpointEvent, ExecutionContext};
pub use endpoint::{ConnectionStatus, Endpoint, Registration, UrlRewrite};
pub use error::{ContextError, EndpointError};
pub use object::{BusObject, NoHooks, ObjectFactory, ObjectHooks, ObjectRef};
pub use session::{ConnectionInfo, PeerCredentials, Session, SessionContainer, SessionInfo};
