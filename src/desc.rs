//! Descriptor registry: open backing sources keyed by a small integer fd.
//!
//! The registry owns the backend handles. It is a leaf component: maps and
//! binary objects reference descriptors by id only, and it is the session,
//! not the registry itself, that cascades their removal on close.

use crate::backend::{BackendHandle, BackendSet};
use crate::error::{Result, StratumError};
use crate::perm::Perm;
use anyhow::bail;
use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Descriptor id. Unique while the descriptor is open.
pub type DescId = u32;

/// Lowest fd handed out; ids below are reserved by convention.
const FIRST_FD: DescId = 3;

/// An open handle onto one backing data source.
pub struct Descriptor {
    fd: DescId,
    pub uri: String,
    pub perm: Perm,
    /// Optional display name; defaults to the URI without its scheme.
    pub name: Option<String>,
    handle: Box<dyn BackendHandle>,
}

impl Descriptor {
    pub fn fd(&self) -> DescId {
        self.fd
    }

    /// Size in bytes, `None` when the backend cannot bound it.
    pub fn size(&self) -> Option<u64> {
        self.handle.size()
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> anyhow::Result<usize> {
        self.handle.read_at(offset, buf)
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> anyhow::Result<usize> {
        self.handle.write_at(offset, data)
    }

    /// Reads the full current content. Fails on unbounded sources or when
    /// the backend returns short before the reported size.
    pub fn read_all(&mut self) -> anyhow::Result<Bytes> {
        let Some(size) = self.handle.size() else {
            bail!("source is unbounded, cannot read it whole");
        };
        let mut buf = vec![0u8; size as usize];
        let mut total = 0;
        while total < buf.len() {
            let n = self.handle.read_at(total as u64, &mut buf[total..])?;
            if n == 0 {
                bail!("short read at offset {total} of {size}");
            }
            total += n;
        }
        Ok(Bytes::from(buf))
    }
}

fn display_name(uri: &str) -> Option<String> {
    let stripped = uri.split_once("://").map(|(_, rest)| rest).unwrap_or(uri);
    (!stripped.is_empty()).then(|| stripped.to_string())
}

/// Registry of open descriptors, keyed by fd.
pub struct DescRegistry {
    backends: BackendSet,
    descs: BTreeMap<DescId, Descriptor>,
    next_fd: DescId,
}

impl DescRegistry {
    pub fn new(backends: BackendSet) -> Self {
        Self {
            backends,
            descs: BTreeMap::new(),
            next_fd: FIRST_FD,
        }
    }

    /// The backend plugin set, for listings.
    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    fn alloc_fd(&mut self) -> DescId {
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }

    /// Opens `uri` through the first backend that claims it.
    pub fn open(&mut self, uri: &str, perm: Perm, mode: u32) -> Result<DescId> {
        let handle = self
            .backends
            .open(uri, perm, mode)
            .map_err(|source| StratumError::Open {
                uri: uri.to_string(),
                source,
            })?;
        Ok(self.install(uri, perm, handle))
    }

    /// Registers an externally produced handle (e.g. a debugger target)
    /// under a fresh fd.
    pub fn install(&mut self, uri: &str, perm: Perm, handle: Box<dyn BackendHandle>) -> DescId {
        let fd = self.alloc_fd();
        let desc = Descriptor {
            fd,
            uri: uri.to_string(),
            perm,
            name: display_name(uri),
            handle,
        };
        info!(fd, uri, perm = %perm, size = ?desc.size(), "descriptor opened");
        self.descs.insert(fd, desc);
        fd
    }

    /// Re-registers a handle under a specific fd after a close, so the
    /// reopen protocol can preserve descriptor identity. The fd must not
    /// be in use.
    pub fn install_at(&mut self, fd: DescId, uri: &str, perm: Perm, handle: Box<dyn BackendHandle>) {
        debug_assert!(!self.descs.contains_key(&fd));
        let desc = Descriptor {
            fd,
            uri: uri.to_string(),
            perm,
            name: display_name(uri),
            handle,
        };
        info!(fd, uri, perm = %perm, "descriptor reinstalled");
        self.descs.insert(fd, desc);
    }

    /// Substitutes a descriptor's payload in place, preserving its fd so
    /// dependent maps and objects keep observing the same id.
    pub fn replace_payload(
        &mut self,
        fd: DescId,
        uri: &str,
        perm: Perm,
        handle: Box<dyn BackendHandle>,
    ) -> Result<()> {
        let desc = self
            .descs
            .get_mut(&fd)
            .ok_or_else(|| StratumError::desc_not_found(fd))?;
        desc.uri = uri.to_string();
        desc.perm = perm;
        desc.name = display_name(uri);
        desc.handle = handle;
        debug!(fd, uri, perm = %perm, "descriptor payload replaced");
        Ok(())
    }

    pub fn contains(&self, fd: DescId) -> bool {
        self.descs.contains_key(&fd)
    }

    pub fn get(&self, fd: DescId) -> Result<&Descriptor> {
        self.descs
            .get(&fd)
            .ok_or_else(|| StratumError::desc_not_found(fd))
    }

    pub fn get_mut(&mut self, fd: DescId) -> Result<&mut Descriptor> {
        self.descs
            .get_mut(&fd)
            .ok_or_else(|| StratumError::desc_not_found(fd))
    }

    /// Removes and returns the descriptor. The caller cascades dependent
    /// maps and binary objects.
    pub fn close(&mut self, fd: DescId) -> Result<Descriptor> {
        let desc = self
            .descs
            .remove(&fd)
            .ok_or_else(|| StratumError::desc_not_found(fd))?;
        info!(fd, uri = %desc.uri, "descriptor closed");
        Ok(desc)
    }

    pub fn close_all(&mut self) {
        self.descs.clear();
    }

    /// Swaps the payloads of two descriptors while leaving their fds (and
    /// every dependent record's stored id) untouched. Its own inverse.
    pub fn exchange(&mut self, a: DescId, b: DescId) -> Result<()> {
        if !self.descs.contains_key(&a) {
            return Err(StratumError::desc_not_found(a));
        }
        if !self.descs.contains_key(&b) {
            return Err(StratumError::desc_not_found(b));
        }
        if a == b {
            return Ok(());
        }
        let mut da = self.descs.remove(&a).unwrap();
        let mut db = self.descs.remove(&b).unwrap();
        std::mem::swap(&mut da.uri, &mut db.uri);
        std::mem::swap(&mut da.perm, &mut db.perm);
        std::mem::swap(&mut da.name, &mut db.name);
        std::mem::swap(&mut da.handle, &mut db.handle);
        self.descs.insert(a, da);
        self.descs.insert(b, db);
        debug!(a, b, "descriptors exchanged");
        Ok(())
    }

    /// Descriptors in fd order.
    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descs.values()
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }
}
