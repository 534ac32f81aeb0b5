// Core ID types for the bus.
//
// Lightweight newtypes shared by the address/message modules here and by the
// hub crate (`ipcbus_hub`). Endpoint, session, and socket IDs are plain
// counters handed out by their owners; `u32::MAX` is reserved as the invalid
// sentinel for each of them.
//
// `ObjectId` is the one composite identifier. It packs three components into
// a `u64`:
//
//   bits 63..32  allocation sequence (assigned by the endpoint on attach)
//   bits 31..16  class id            (service "type")
//   bits 15..0   instance id         (one instance of that type)
//
// The class id can be extracted without looking at the other two parts,
// which is what server-object lookups compare on. `ObjectId::MAIN` (all
// zeroes) always names the endpoint itself.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Object IDs
// ---------------------------------------------------------------------------

const SEQUENCE_SHIFT: u32 = 32;
const CLASS_SHIFT: u32 = 16;
const LOCAL_MASK: u64 = 0xFFFF_FFFF;

/// Service type component of an `ObjectId`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(pub u16);

/// Instance component of an `ObjectId`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u16);

/// Composite object identifier: (sequence, class, instance).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// Reserved id of the endpoint's implicit main object.
    pub const MAIN: ObjectId = ObjectId(0);
    /// Sentinel for "no id assigned".
    pub const INVALID: ObjectId = ObjectId(u64::MAX);

    pub const fn from_parts(sequence: u32, class: ClassId, instance: InstanceId) -> Self {
        Self(
            ((sequence as u64) << SEQUENCE_SHIFT)
                | ((class.0 as u64) << CLASS_SHIFT)
                | instance.0 as u64,
        )
    }

    /// An id with no sequence component, as supplied by application code
    /// before the object is attached.
    pub const fn local(class: ClassId, instance: InstanceId) -> Self {
        Self::from_parts(0, class, instance)
    }

    pub const fn sequence(self) -> u32 {
        (self.0 >> SEQUENCE_SHIFT) as u32
    }

    pub const fn class(self) -> ClassId {
        ClassId((self.0 >> CLASS_SHIFT) as u16)
    }

    pub const fn instance(self) -> InstanceId {
        InstanceId(self.0 as u16)
    }

    /// The (class, instance) half of the id, sequence stripped.
    pub const fn local_part(self) -> ObjectId {
        ObjectId(self.0 & LOCAL_MASK)
    }

    /// Same class and instance, new allocation sequence.
    pub const fn with_sequence(self, sequence: u32) -> Self {
        Self::from_parts(sequence, self.class(), self.instance())
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    pub const fn is_main(self) -> bool {
        self.0 == Self::MAIN.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "obj(invalid)");
        }
        write!(
            f,
            "obj({}:{}:{})",
            self.sequence(),
            self.class().0,
            self.instance().0
        )
    }
}

// ---------------------------------------------------------------------------
// Endpoint, session, and socket IDs
// ---------------------------------------------------------------------------

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: $name = $name(u32::MAX);

            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, concat!($label, "#{}"), self.0)
                } else {
                    write!(f, concat!($label, "#invalid"))
                }
            }
        }
    };
}

counter_id!(
    /// Process-wide endpoint id, assigned by the execution context.
    EndpointId,
    "ep"
);
counter_id!(
    /// Process-wide session id.
    SessionId,
    "session"
);
counter_id!(
    /// Socket (session container) id, unique within the process.
    SocketId,
    "socket"
);

/// Which side of a service an endpoint or object plays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Client,
    Server,
}
