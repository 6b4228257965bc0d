//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use stratum::backend::memory::MemoryBackend;
use stratum::backend::debug::{DebugTarget, DebuggerBridge};
use stratum::backend::Backend;
use stratum::{BackendSet, BinaryInfo, Descriptor, MetadataParser, Perm, Session};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// Parser that accepts anything; metadata content is irrelevant to the
/// multiplexing layer under test.
pub struct StubParser;

impl MetadataParser for StubParser {
    fn parse(&self, _desc: &mut Descriptor, _base: u64) -> anyhow::Result<BinaryInfo> {
        Ok(BinaryInfo::default())
    }
}

/// Debugger bridge that pretends to launch: target memory is an anonymous
/// buffer, the reported base is fixed, launches are recorded.
pub struct FakeDebugger {
    pub base_addr: u64,
    pub launches: Rc<RefCell<Vec<String>>>,
}

impl FakeDebugger {
    pub fn reporting(base_addr: u64) -> (Self, Rc<RefCell<Vec<String>>>) {
        let launches = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                base_addr,
                launches: launches.clone(),
            },
            launches,
        )
    }
}

impl DebuggerBridge for FakeDebugger {
    fn launch(&mut self, path: &Path, args: &str) -> anyhow::Result<DebugTarget> {
        self.launches
            .borrow_mut()
            .push(format!("{} {}", path.display(), args));
        Ok(DebugTarget {
            uri: format!("dbg://{}", path.display()),
            base_addr: self.base_addr,
            handle: MemoryBackend.open("malloc://4096", Perm::rwx(), 0)?,
        })
    }
}

pub fn session() -> Session {
    Session::new(BackendSet::with_defaults(), Box::new(StubParser))
}
