// Error types for the hub.
//
// Two layers: `ContextError` covers talking to the execution context thread
// (stopped, re-entrant sync call, mismatched reply), `EndpointError` covers
// the endpoint's table operations and wraps `ContextError` for the
// registration paths. Neither is ever raised by panicking; every public
// operation that can fail returns one of these in a `Result`.

use ipcbus_protocol::types::{ClassId, ObjectId, SessionId, SocketId};
use thiserror::Error;

/// Errors from submitting jobs to the execution context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The context thread has shut down (or was never started).
    #[error("execution context is stopped")]
    Stopped,

    /// A synchronous job was submitted from the context thread itself, which
    /// would wait on its own queue forever.
    #[error("synchronous job submitted from the execution context thread")]
    Reentrant,

    /// The job completed but produced a reply of the wrong kind.
    #[error("unexpected job output: expected {expected}")]
    UnexpectedOutput { expected: &'static str },
}

/// Errors from endpoint operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// `ObjectId::MAIN` belongs to the endpoint itself.
    #[error("object id {0} is reserved for the endpoint")]
    MainIdReserved(ObjectId),

    /// A server object of this class is already attached.
    #[error("server object of {0:?} already exists")]
    DuplicateServerClass(ClassId),

    /// The object (or another with the identical id) is already in the table.
    #[error("object {0} is already attached")]
    AlreadyAttached(ObjectId),

    /// The endpoint's own authentication hook refused the session.
    #[error("{0} rejected by endpoint authentication")]
    AuthenticationRejected(SessionId),

    #[error("{0} is already attached to this endpoint")]
    DuplicateSession(SessionId),

    #[error("{0} is not owned by this endpoint")]
    UnknownSocket(SocketId),

    #[error("{0} is already owned by this endpoint")]
    DuplicateSocket(SocketId),

    /// Registration is one-shot: an endpoint that has unregistered cannot
    /// register again.
    #[error("endpoint has already unregistered and cannot register again")]
    Retired,

    #[error(transparent)]
    Context(#[from] ContextError),
}
