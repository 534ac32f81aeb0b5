// ipcbus_protocol: identifiers and addressing shared across the bus.
//
// This crate defines the vocabulary the hub (`ipcbus_hub`) and the
// transports/codecs around it agree on. It has no threads and no I/O.
//
// Module overview:
// - `types.rs`:    ID newtypes: the packed composite `ObjectId`
//                  (sequence, class, instance), plus `EndpointId`,
//                  `SessionId`, `SocketId`, and the client/server `Role`.
// - `address.rs`:  Socket URL parsing/building (`tcp://`, `ipc://`,
//                  `inproc://`) and the `svc://` service scheme prefix.
// - `message.rs`:  `TargetedMessage`, the only thing the hub needs from a
//                  decoded message, and the `MessageHeader` struct.
//
// Wire encoding is deliberately absent: codecs live with the transports.

pub mod address;
pub mod message;
pub mod types;

pub use address::{IP_ALL_INTERFACES, SocketAddress, SocketType, URL_SVC, build_url, parse_url};
pub use message::{MessageHeader, TargetedMessage};
pub use types::{ClassId, EndpointId, InstanceId, ObjectId, Role, SessionId, SocketId};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_routes_to_target() {
        let target = ObjectId::local(ClassId(2), InstanceId(1)).with_sequence(5);
        let header = MessageHeader::new(target, 17).with_session(SessionId(3));
        assert_eq!(header.target_object_id(), target);
        assert_eq!(header.source_session(), Some(SessionId(3)));
    }

    #[test]
    fn header_json_carries_packed_id() {
        let header = MessageHeader::new(ObjectId::MAIN, 1);
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["object_id"], 0);
        assert_eq!(json["session"], serde_json::Value::Null);
    }
}
