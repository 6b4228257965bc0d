//! stratum: virtual address-space multiplexing for binary analysis.
//!
//! The crate overlays backing data sources (files, anonymous memory,
//! live debugger targets) into one addressable space:
//!
//! - [`desc`]: descriptor registry over backend handles, keyed by fd.
//! - [`map`]: virtual-to-physical bindings with a total priority order;
//!   [`map::MapTable::resolve`] is the dispatch primitive for byte I/O.
//! - [`binobj`]: parsed binary metadata keyed by descriptor, with one
//!   current object and change notifications.
//! - [`session`]: the explicit context object tying the registries
//!   together and driving the reopen/rebase protocol.
//! - [`listing`] and [`request`]: read-only renderings and the typed
//!   request dispatch consumed by textual front ends.
//!
//! Everything is single-threaded and synchronous; hosts embedding the
//! session in a threaded environment serialize access externally.

pub mod backend;
pub mod binobj;
pub mod desc;
pub mod error;
pub mod listing;
pub mod logging;
pub mod map;
pub mod metadata;
pub mod perm;
pub mod request;
pub mod session;

pub use backend::{Backend, BackendHandle, BackendSet};
pub use binobj::{BinaryObject, ObjId, ObjectRegistry};
pub use desc::{DescId, DescRegistry, Descriptor};
pub use error::{Result, StratumError};
pub use map::{ListOrder, Map, MapId, MapTable};
pub use metadata::{BinaryInfo, MetadataEvent, MetadataObserver, MetadataParser, ObjectFileParser};
pub use perm::Perm;
pub use request::{dispatch, Rendering, Request, Response};
pub use session::{CloseReport, FileRef, Session, SessionConfig, TargetMode, TargetState};
