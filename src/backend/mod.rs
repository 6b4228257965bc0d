//! Backend plugins: the byte-I/O seam beneath descriptors.
//!
//! A backend claims URIs by scheme and produces opaque handles. The core
//! never touches bytes itself; it dispatches through `BackendHandle` and
//! treats every plugin failure as an opaque `anyhow::Error`.

pub mod debug;
pub mod file;
pub mod memory;

use crate::perm::Perm;
use anyhow::bail;

/// An open handle onto one backing source.
///
/// Offsets are physical offsets within the source, not virtual addresses;
/// virtual-to-physical translation is the map table's job.
pub trait BackendHandle {
    /// Total size in bytes, or `None` for unbounded/unknown sources
    /// (e.g. live target memory).
    fn size(&self) -> Option<u64>;

    /// Reads up to `buf.len()` bytes at `offset`, returning the count
    /// actually read. Reads past the end return 0.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> anyhow::Result<usize>;

    /// Writes `data` at `offset`, returning the count written.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> anyhow::Result<usize>;
}

/// A backend plugin: claims URIs and opens handles over them.
pub trait Backend {
    /// Short plugin name for listings.
    fn name(&self) -> &'static str;

    /// Whether this backend claims the given URI.
    fn handles(&self, uri: &str) -> bool;

    /// Opens a handle. `mode` carries creation permissions for backends
    /// that create their target (0 = never create).
    fn open(&self, uri: &str, perm: Perm, mode: u32) -> anyhow::Result<Box<dyn BackendHandle>>;
}

/// The set of registered backend plugins, resolved first-match by URI.
pub struct BackendSet {
    backends: Vec<Box<dyn Backend>>,
}

impl BackendSet {
    /// An empty set; the host registers its own plugins.
    pub fn empty() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// The bundled defaults: file and anonymous-memory backends.
    pub fn with_defaults() -> Self {
        let mut set = Self::empty();
        set.register(Box::new(file::FileBackend));
        set.register(Box::new(memory::MemoryBackend));
        set
    }

    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    /// Plugin names, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Resolves the first backend claiming `uri`.
    pub fn resolve(&self, uri: &str) -> Option<&dyn Backend> {
        self.backends
            .iter()
            .map(|b| b.as_ref())
            .find(|b| b.handles(uri))
    }

    /// Resolves and opens in one step.
    pub fn open(
        &self,
        uri: &str,
        perm: Perm,
        mode: u32,
    ) -> anyhow::Result<Box<dyn BackendHandle>> {
        match self.resolve(uri) {
            Some(backend) => backend.open(uri, perm, mode),
            None => bail!("no backend claims uri {uri}"),
        }
    }
}

impl Default for BackendSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}
