//! The session: an explicit context object over the three registries.
//!
//! A `Session` owns the descriptor registry, the map table, the
//! binary-object registry, the ordered file list and the small bits of
//! configuration the reopen protocol needs. All operations run to
//! completion on the calling thread; a multi-threaded host serializes
//! access with one external lock around every mutating call.
//!
//! Cascades flow strictly downward: the session drives descriptor
//! lifecycle, and maps/objects only ever get invalidated as a consequence.
//! A failed `reopen` deliberately leaves the target in a degraded `Closed`
//! state rather than attempting a rollback, and the debug-reopen metadata
//! cascade is deliberately non-transactional; both are surfaced, never
//! retried.

use crate::backend::debug::{DebugTarget, DebuggerBridge};
use crate::backend::BackendSet;
use crate::binobj::{ObjId, ObjectRegistry};
use crate::desc::{DescId, DescRegistry};
use crate::error::{Result, StratumError};
use crate::map::MapTable;
use crate::metadata::MetadataParser;
use crate::perm::Perm;
use anyhow::anyhow;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// How a target is currently backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    Normal,
    Debug,
}

/// Lifecycle state of a session file-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Open(TargetMode),
    /// The descriptor was closed and could not be reopened. Degraded,
    /// non-recoverable; the entry stays to surface what happened.
    Closed,
}

/// One logically opened target in the session file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRef {
    pub fd: DescId,
    pub state: TargetState,
}

/// Host configuration the reopen protocol consults.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Architecture width in bits, reapplied across a debug reopen.
    pub bits: u32,
    /// Configured base address, compared against the debugger's report.
    pub base_addr: u64,
    /// Whether the session is in debug mode.
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bits: 64,
            base_addr: 0,
            debug: false,
        }
    }
}

/// What a descriptor close cascaded away. The cleared-selection flag is
/// the surfaced no-current state: the caller must re-select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReport {
    pub fd: DescId,
    pub maps_removed: usize,
    pub objects_removed: usize,
    pub selection_cleared: bool,
}

/// An independent analysis session. No globals: every piece of shared
/// state lives here and is passed explicitly.
pub struct Session {
    pub descs: DescRegistry,
    pub maps: MapTable,
    pub objects: ObjectRegistry,
    pub config: SessionConfig,
    files: Vec<FileRef>,
    current_fd: Option<DescId>,
    parser: Box<dyn MetadataParser>,
    debugger: Option<Box<dyn DebuggerBridge>>,
}

impl Session {
    pub fn new(backends: BackendSet, parser: Box<dyn MetadataParser>) -> Self {
        Self {
            descs: DescRegistry::new(backends),
            maps: MapTable::new(),
            objects: ObjectRegistry::new(),
            config: SessionConfig::default(),
            files: Vec::new(),
            current_fd: None,
            parser,
            debugger: None,
        }
    }

    /// Attaches a debugger bridge; without one, `reopen_as_debug` fails.
    pub fn with_debugger(mut self, bridge: Box<dyn DebuggerBridge>) -> Self {
        self.debugger = Some(bridge);
        self
    }

    pub fn current_fd(&self) -> Option<DescId> {
        self.current_fd
    }

    /// The ordered file list.
    pub fn files(&self) -> &[FileRef] {
        &self.files
    }

    fn set_state(&mut self, fd: DescId, state: TargetState) {
        if let Some(entry) = self.files.iter_mut().find(|f| f.fd == fd) {
            entry.state = state;
        }
    }

    /// Opens a target and appends it to the file list. The first open
    /// becomes the current selection.
    pub fn open(&mut self, uri: &str, perm: Perm, mode: u32) -> Result<DescId> {
        let fd = self.descs.open(uri, perm, mode)?;
        self.files.push(FileRef {
            fd,
            state: TargetState::Open(TargetMode::Normal),
        });
        if self.current_fd.is_none() {
            self.current_fd = Some(fd);
        }
        Ok(fd)
    }

    /// Opens a target and maps its whole content at `addr`.
    pub fn open_at(&mut self, uri: &str, perm: Perm, mode: u32, addr: u64) -> Result<DescId> {
        let fd = self.open(uri, perm, mode)?;
        let size = self.descs.get(fd)?.size().unwrap_or(0);
        if let Err(err) = self.maps.add(&self.descs, fd, perm, 0, addr, size) {
            // keep open+map all-or-nothing
            let _ = self.close(fd);
            return Err(err);
        }
        Ok(fd)
    }

    /// Opens a target and loads its binary metadata at `base_addr`.
    pub fn open_and_load(
        &mut self,
        uri: &str,
        perm: Perm,
        mode: u32,
        base_addr: u64,
    ) -> Result<(DescId, ObjId)> {
        let fd = self.open(uri, perm, mode)?;
        match self.load(fd, base_addr) {
            Ok(obj) => Ok((fd, obj)),
            Err(err) => {
                let _ = self.close(fd);
                Err(err)
            }
        }
    }

    /// Loads binary metadata for an already-open descriptor.
    pub fn load(&mut self, fd: DescId, base_addr: u64) -> Result<ObjId> {
        self.objects
            .load(&mut self.descs, self.parser.as_ref(), fd, base_addr)
    }

    /// Switches the current target, raising its binary object when one
    /// exists.
    pub fn select(&mut self, fd: DescId) -> Result<()> {
        self.descs.get(fd)?;
        self.current_fd = Some(fd);
        if !self.objects.for_descriptor(fd).is_empty() {
            self.objects.raise(Some(fd), None)?;
        }
        debug!(fd, "target selected");
        Ok(())
    }

    /// Switches by file-list index instead of fd.
    pub fn select_nth(&mut self, index: usize) -> Result<DescId> {
        let entry = *self
            .files
            .get(index)
            .ok_or(StratumError::NotFound {
                entity: "session file",
                id: index as u64,
            })?;
        self.select(entry.fd)?;
        Ok(entry.fd)
    }

    /// Closes a descriptor and cascades away every map and binary object
    /// referencing it.
    pub fn close(&mut self, fd: DescId) -> Result<CloseReport> {
        self.descs.close(fd)?;
        let maps_removed = self.maps.remove_for_descriptor(fd).len();
        let had_current_obj = self.objects.current_id().is_some();
        let objects_removed = self.objects.remove_for_descriptor(fd).len();
        let mut selection_cleared = had_current_obj && self.objects.current_id().is_none();
        self.files.retain(|f| f.fd != fd);
        if self.current_fd == Some(fd) {
            self.current_fd = None;
            selection_cleared = true;
        }
        if selection_cleared {
            warn!(fd, "current selection cleared; caller must re-select");
        }
        info!(fd, maps_removed, objects_removed, "target closed");
        Ok(CloseReport {
            fd,
            maps_removed,
            objects_removed,
            selection_cleared,
        })
    }

    /// Closes everything: descriptors, maps, objects, file list.
    pub fn close_all(&mut self) {
        self.descs.close_all();
        self.maps = MapTable::new();
        self.objects.clear();
        self.files.clear();
        self.current_fd = None;
        info!("session cleared");
    }

    /// Swaps two descriptors' payloads, leaving every dependent map and
    /// object id untouched. Its own inverse.
    pub fn exchange(&mut self, a: DescId, b: DescId) -> Result<()> {
        self.descs.exchange(a, b)
    }

    /// Closes and immediately reopens the same URI under `perm`,
    /// preserving the fd.
    ///
    /// Failure is degraded and non-recoverable: the old handle is already
    /// gone, so dependent maps/objects are cascaded out, the file-list
    /// entry is marked `Closed`, and a reopen error is returned. Never
    /// silently retried.
    pub fn reopen(&mut self, fd: DescId, perm: Perm) -> Result<()> {
        let uri = self.descs.get(fd)?.uri.clone();
        let mode = if perm.contains(Perm::WRITE) { 0o644 } else { 0 };
        // close first; the old backend may hold the target exclusively
        self.descs.close(fd)?;
        match self.descs.backends().open(&uri, perm, mode) {
            Ok(handle) => {
                self.descs.install_at(fd, &uri, perm, handle);
                self.set_state(fd, TargetState::Open(TargetMode::Normal));
                info!(fd, uri = %uri, perm = %perm, "target reopened");
                Ok(())
            }
            Err(source) => {
                let maps = self.maps.remove_for_descriptor(fd).len();
                let objs = self.objects.remove_for_descriptor(fd).len();
                self.set_state(fd, TargetState::Closed);
                if self.current_fd == Some(fd) {
                    self.current_fd = None;
                }
                warn!(
                    fd,
                    uri = %uri,
                    maps_removed = maps,
                    objects_removed = objs,
                    "reopen failed; target left closed"
                );
                Err(StratumError::Reopen { fd, source })
            }
        }
    }

    /// Reopens a target under the debugger bridge.
    ///
    /// The on-disk path comes from the associated binary object when it
    /// recorded one, else from the descriptor's own name; with neither,
    /// this degrades to a plain read-only reopen. When the debugger
    /// reports a base address different from the configured one, the
    /// current object is rebased and the metadata-changed cascade fires.
    /// The cascade is not transactional: a missing current object leaves
    /// metadata stale, which is accepted and logged.
    pub fn reopen_as_debug(&mut self, fd: DescId, args: &str) -> Result<()> {
        self.descs.get(fd)?;
        let path: Option<PathBuf> = self
            .objects
            .for_descriptor(fd)
            .iter()
            .find_map(|o| o.path.clone())
            .or_else(|| {
                let desc = self.descs.get(fd).ok()?;
                desc.name
                    .as_ref()
                    .map(PathBuf::from)
                    .filter(|p| p.exists())
            });
        let Some(path) = path else {
            warn!(fd, "no on-disk path for target; falling back to plain reopen");
            return self.reopen(fd, Perm::r());
        };
        let bridge = self.debugger.as_mut().ok_or_else(|| StratumError::Reopen {
            fd,
            source: anyhow!("no debugger bridge configured"),
        })?;
        let DebugTarget {
            uri,
            base_addr,
            handle,
        } = bridge
            .launch(&path, args)
            .map_err(|source| StratumError::Reopen { fd, source })?;

        self.descs.replace_payload(fd, &uri, Perm::rwx(), handle)?;
        self.set_state(fd, TargetState::Open(TargetMode::Debug));
        self.config.debug = true;
        debug!(fd, bits = self.config.bits, uri = %uri, "debug reopen keeps configured arch width");

        if base_addr != self.config.base_addr {
            let old_base = self.config.base_addr;
            self.config.base_addr = base_addr;
            match self.objects.rebase(base_addr) {
                Ok(_) => info!(
                    fd,
                    old_base,
                    new_base = base_addr,
                    "rebased to debugger-reported base"
                ),
                // stale-until-resync is the documented contract here
                Err(err) => warn!(fd, %err, "debugger base moved but no current object; metadata stale"),
            }
        }
        Ok(())
    }

    /// Freezes a volatile source: reads the full current content into an
    /// anonymous memory buffer and substitutes it into the same fd,
    /// discarding the original backend.
    pub fn reopen_in_memory_snapshot(&mut self, fd: DescId) -> Result<()> {
        let desc = self.descs.get_mut(fd)?;
        let data = desc
            .read_all()
            .map_err(|source| StratumError::Snapshot { fd, source })?;
        let uri = format!("malloc://{}", data.len());
        let mut handle = self
            .descs
            .backends()
            .open(&uri, Perm::rw(), 0)
            .map_err(|source| StratumError::Snapshot { fd, source })?;
        handle
            .write_at(0, &data)
            .map_err(|source| StratumError::Snapshot { fd, source })?;
        self.descs.replace_payload(fd, &uri, Perm::rw(), handle)?;
        self.set_state(fd, TargetState::Open(TargetMode::Normal));
        info!(fd, size = data.len(), "target frozen into memory snapshot");
        Ok(())
    }
}
