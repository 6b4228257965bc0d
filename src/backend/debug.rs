//! Debugger bridge seam.
//!
//! The core never speaks a debugger protocol. A host supplies a
//! `DebuggerBridge`; given a binary path and launch arguments it returns
//! the session URI, the base address the target actually got, and an I/O
//! handle over target memory. `reopen_as_debug` consumes all three.

use super::BackendHandle;
use std::path::Path;

/// A launched (or attached) debug target.
pub struct DebugTarget {
    /// Session URI the descriptor will carry, e.g. `dbg:///bin/ls`.
    pub uri: String,
    /// Base address reported by the debugger for the main image.
    pub base_addr: u64,
    /// I/O handle over the live target's memory.
    pub handle: Box<dyn BackendHandle>,
}

/// Host-supplied debugger integration.
pub trait DebuggerBridge {
    /// Launches `path` with `args` under the debugger.
    fn launch(&mut self, path: &Path, args: &str) -> anyhow::Result<DebugTarget>;
}
