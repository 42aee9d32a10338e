use thiserror::Error;

#[derive(Error, Debug)]
pub enum FtError {
    #[error("shared-memory region {name}: {source}")]
    Shm {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shared-memory region {name} has an incompatible layout: {reason}")]
    LayoutMismatch { name: String, reason: String },

    #[error("shared-memory region {name} was never initialized by its creator")]
    NotInitialized { name: String },

    #[error("job registry is full ({capacity} pending submissions)")]
    CapacityExceeded { capacity: usize },

    #[error("unknown role label {0:?}, expected \"main\" or \"replica\"")]
    InvalidRole(String),

    #[error("slot {slot} is out of range (configured slots: {slots})")]
    SlotOutOfRange { slot: usize, slots: usize },

    #[error("job name {name:?} exceeds {max} bytes")]
    NameTooLong { name: String, max: usize },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl FtError {
    pub(crate) fn shm(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Shm {
            name: name.into(),
            source,
        }
    }

    pub(crate) fn layout(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LayoutMismatch {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FtError>;
