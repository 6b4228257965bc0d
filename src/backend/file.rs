//! File-backed descriptors.
//!
//! Read-only opens are memory-mapped; writable opens fall back to
//! positioned file I/O so writes land on disk. Zero-length files cannot
//! be mapped and are held as an empty handle.

use super::{Backend, BackendHandle};
use crate::perm::Perm;
use anyhow::{bail, Context};
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

const SCHEME: &str = "file://";

/// Backend for plain on-disk files. Claims `file://` URIs and bare paths.
pub struct FileBackend;

impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn handles(&self, uri: &str) -> bool {
        uri.starts_with(SCHEME) || !uri.contains("://")
    }

    fn open(&self, uri: &str, perm: Perm, mode: u32) -> anyhow::Result<Box<dyn BackendHandle>> {
        let path = Path::new(uri.strip_prefix(SCHEME).unwrap_or(uri));
        if perm.contains(Perm::WRITE) {
            let mut opts = OpenOptions::new();
            opts.read(true).write(true);
            if mode != 0 {
                opts.create(true);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::OpenOptionsExt;
                    opts.mode(mode);
                }
            }
            let file = opts
                .open(path)
                .with_context(|| format!("opening {} read-write", path.display()))?;
            debug!(path = %path.display(), perm = %perm, "opened file read-write");
            Ok(Box::new(RwFileHandle { file }))
        } else {
            let file = File::open(path)
                .with_context(|| format!("opening {} read-only", path.display()))?;
            let len = file.metadata()?.len();
            // memmap cannot map empty files; keep None and serve zero reads.
            let mmap = if len == 0 {
                None
            } else {
                // Safety: read-only map over a regular file we just opened.
                Some(unsafe { Mmap::map(&file)? })
            };
            debug!(path = %path.display(), size = len, "opened file read-only (mapped)");
            Ok(Box::new(MappedFileHandle { mmap, len }))
        }
    }
}

struct MappedFileHandle {
    mmap: Option<Mmap>,
    len: u64,
}

impl BackendHandle for MappedFileHandle {
    fn size(&self) -> Option<u64> {
        Some(self.len)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> anyhow::Result<usize> {
        let Some(mmap) = &self.mmap else {
            return Ok(0);
        };
        if offset >= self.len {
            return Ok(0);
        }
        let start = offset as usize;
        let end = (self.len as usize).min(start + buf.len());
        buf[..end - start].copy_from_slice(&mmap[start..end]);
        Ok(end - start)
    }

    fn write_at(&mut self, _offset: u64, _data: &[u8]) -> anyhow::Result<usize> {
        bail!("descriptor is read-only")
    }
}

struct RwFileHandle {
    file: File,
}

impl BackendHandle for RwFileHandle {
    fn size(&self) -> Option<u64> {
        self.file.metadata().ok().map(|m| m.len())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> anyhow::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        // Plain read may return short; fill until EOF or full.
        while total < buf.len() {
            let n = self.file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> anyhow::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(data.len())
    }
}
