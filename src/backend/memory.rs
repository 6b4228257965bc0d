//! Anonymous in-memory descriptors.
//!
//! `malloc://<size>` opens a zero-filled buffer of the given byte size.
//! Used directly by hosts and by the reopen-in-memory-snapshot protocol
//! to freeze a volatile source.

use super::{Backend, BackendHandle};
use crate::perm::Perm;
use anyhow::{bail, Context};
use tracing::debug;

const SCHEME: &str = "malloc://";

/// Backend for anonymous zero-filled memory buffers.
pub struct MemoryBackend;

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "malloc"
    }

    fn handles(&self, uri: &str) -> bool {
        uri.starts_with(SCHEME)
    }

    fn open(&self, uri: &str, _perm: Perm, _mode: u32) -> anyhow::Result<Box<dyn BackendHandle>> {
        let Some(arg) = uri.strip_prefix(SCHEME) else {
            bail!("not a malloc uri: {uri}");
        };
        let size: usize = arg
            .parse()
            .with_context(|| format!("bad malloc size {arg:?}"))?;
        if size == 0 {
            bail!("refusing zero-size malloc buffer");
        }
        debug!(size, "opened anonymous memory buffer");
        Ok(Box::new(MemoryHandle {
            buf: vec![0u8; size],
        }))
    }
}

struct MemoryHandle {
    buf: Vec<u8>,
}

impl BackendHandle for MemoryHandle {
    fn size(&self) -> Option<u64> {
        Some(self.buf.len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> anyhow::Result<usize> {
        let start = offset as usize;
        if start >= self.buf.len() {
            return Ok(0);
        }
        let end = self.buf.len().min(start + buf.len());
        buf[..end - start].copy_from_slice(&self.buf[start..end]);
        Ok(end - start)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> anyhow::Result<usize> {
        let start = offset as usize;
        if start >= self.buf.len() {
            return Ok(0);
        }
        let end = self.buf.len().min(start + data.len());
        self.buf[start..end].copy_from_slice(&data[..end - start]);
        Ok(end - start)
    }
}
