//! Error types for the stratum address-space core.
//!
//! One crate-level taxonomy built on thiserror. Validation errors are
//! returned before any registry mutation; backend failures carry the
//! collaborator's opaque error as their source.

use thiserror::Error;

/// Main error type for stratum operations.
#[derive(Debug, Error)]
pub enum StratumError {
    /// Lookup miss on a descriptor, map, or binary object.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    /// Zero-length map or a range whose end overflows the address width.
    #[error("invalid map range: from={from:#x} size={size:#x}")]
    InvalidRange { from: u64, size: u64 },

    /// Map creation against a descriptor id that is not open.
    #[error("invalid descriptor: fd {0}")]
    InvalidDescriptor(u32),

    /// Raise/delete with both filters wildcard while more than one
    /// binary object exists.
    #[error("ambiguous selection: specify a descriptor or object id")]
    AmbiguousSelection,

    /// Refusal to delete when the match would empty the object registry.
    #[error("refusing to delete the last loaded binary object")]
    LastObjectGuard,

    /// The backend rejected the URI or permissions at open time.
    #[error("cannot open {uri}")]
    Open {
        uri: String,
        #[source]
        source: anyhow::Error,
    },

    /// Reopen failed after the old handle was already closed; the target
    /// is left in the degraded `Closed` state.
    #[error("cannot reopen fd {fd}")]
    Reopen {
        fd: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The source could not be fully read into a memory snapshot.
    #[error("cannot snapshot fd {fd}")]
    Snapshot {
        fd: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The metadata parser rejected the descriptor contents.
    #[error("cannot load binary metadata from fd {fd}")]
    Load {
        fd: u32,
        #[source]
        source: anyhow::Error,
    },
}

impl StratumError {
    pub(crate) fn desc_not_found(fd: u32) -> Self {
        StratumError::NotFound {
            entity: "descriptor",
            id: fd as u64,
        }
    }

    pub(crate) fn map_not_found(id: u32) -> Self {
        StratumError::NotFound {
            entity: "map",
            id: id as u64,
        }
    }

    pub(crate) fn object_not_found(id: u32) -> Self {
        StratumError::NotFound {
            entity: "binary object",
            id: id as u64,
        }
    }
}

/// Result type alias for stratum operations.
pub type Result<T> = std::result::Result<T, StratumError>;
