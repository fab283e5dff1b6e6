use respite_core::InstanceId;
use thiserror::Error;

/// Failures specific to snapshot storage.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// A live snapshot arrived after the instance was already stored as
    /// completed or abandoned.
    #[error("snapshot for instance {instance} would overwrite its terminal state")]
    StaleSnapshot { instance: InstanceId },

    #[error("stored record for instance {instance} is corrupt")]
    Corrupt {
        instance: InstanceId,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record for instance {instance}")]
    Encode {
        instance: InstanceId,
        #[source]
        source: serde_json::Error,
    },
}
