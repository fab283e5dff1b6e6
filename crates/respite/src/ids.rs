//! Identifier newtypes.

use crate::id_macro::{string_id, uuid_id};

string_id! {
    /// Identifier of an authored breathing protocol.
    pub struct ProtocolId;
}

string_id! {
    /// Identifier of an authored session definition.
    pub struct SessionId;
}

string_id! {
    /// Identifier of one element inside a session definition.
    pub struct ElementId;
}

string_id! {
    /// Identifier of an authored emergency routine.
    pub struct RoutineId;
}

uuid_id! {
    /// Identifier of one execution attempt of a session.
    pub struct InstanceId;
}

uuid_id! {
    /// Opaque, already-authenticated owner of an instance.
    pub struct UserId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_ids_serialize_transparently() {
        let id = ProtocolId::new("box");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("box"));
        assert_eq!(id.to_string(), "box");
    }

    #[test]
    fn test_uuid_ids_are_unique() {
        assert_ne!(InstanceId::new(), InstanceId::new());
    }
}
