// Message addressing.
//
// The hub never decodes message bodies; all it needs from an inbound message
// is which object it targets (and, for diagnostics, which session it came
// in on). `TargetedMessage` is that boundary. Codecs implement it for their
// decoded frames; `MessageHeader` is the plain-struct version used by the
// hub's own tests and by callers that only carry routing data.

use serde::{Deserialize, Serialize};

use crate::types::{ObjectId, SessionId};

/// Anything the endpoint can route to an object.
pub trait TargetedMessage {
    /// Object the message is addressed to. `ObjectId::MAIN` means the
    /// endpoint itself.
    fn target_object_id(&self) -> ObjectId;

    /// Session the message arrived on, if known.
    fn source_session(&self) -> Option<SessionId> {
        None
    }
}

/// Routing header of a bus message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub object_id: ObjectId,
    pub session: Option<SessionId>,
    /// Method or event code; opaque to the hub.
    pub code: u32,
}

impl MessageHeader {
    pub fn new(object_id: ObjectId, code: u32) -> Self {
        Self {
            object_id,
            session: None,
            code,
        }
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }
}

impl TargetedMessage for MessageHeader {
    fn target_object_id(&self) -> ObjectId {
        self.object_id
    }

    fn source_session(&self) -> Option<SessionId> {
        self.session
    }
}
