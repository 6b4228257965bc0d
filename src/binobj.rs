//! Binary-object registry: parsed metadata keyed by descriptor.
//!
//! Several objects may reference one descriptor (multi-architecture
//! images); exactly one object is current at a time, and a valid no-current
//! state exists after cascades. The registry never parses anything itself
//! and never re-derives address-relative data: it delegates to the
//! `MetadataParser` and tells `MetadataObserver`s when they must resync.

use crate::desc::{DescId, DescRegistry};
use crate::error::{Result, StratumError};
use crate::metadata::{BinaryInfo, MetadataEvent, MetadataObserver, MetadataParser};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Binary object id. Unique for the registry's lifetime.
pub type ObjId = u32;

/// Parsed structural metadata of one loaded binary.
pub struct BinaryObject {
    pub id: ObjId,
    /// Owning descriptor, referenced weakly by id.
    pub fd: DescId,
    pub base_addr: u64,
    /// On-disk path of the content when one is known; preferred when
    /// resolving a debug reopen.
    pub path: Option<PathBuf>,
    pub info: BinaryInfo,
}

/// Registry of binary objects plus the current selection.
pub struct ObjectRegistry {
    objects: BTreeMap<ObjId, BinaryObject>,
    current: Option<ObjId>,
    next_id: ObjId,
    observers: Vec<Box<dyn MetadataObserver>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            current: None,
            next_id: 1,
            observers: Vec::new(),
        }
    }

    /// Registers an observer for metadata-changed notifications.
    pub fn subscribe(&mut self, observer: Box<dyn MetadataObserver>) {
        self.observers.push(observer);
    }

    fn notify(&mut self, event: MetadataEvent) {
        for obs in &mut self.observers {
            obs.metadata_changed(&event);
        }
    }

    /// Parses the descriptor's content at `base_addr` and registers the
    /// result. The newly loaded object becomes current.
    pub fn load(
        &mut self,
        descs: &mut DescRegistry,
        parser: &dyn MetadataParser,
        fd: DescId,
        base_addr: u64,
    ) -> Result<ObjId> {
        let desc = descs.get_mut(fd)?;
        let path = desc
            .name
            .as_ref()
            .map(PathBuf::from)
            .filter(|p| p.exists());
        let info = parser
            .parse(desc, base_addr)
            .map_err(|source| StratumError::Load { fd, source })?;
        let id = {
            self.next_id += 1;
            self.next_id - 1
        };
        info!(id, fd, base_addr, format = %info.format, "binary object loaded");
        self.objects.insert(
            id,
            BinaryObject {
                id,
                fd,
                base_addr,
                path,
                info,
            },
        );
        self.current = Some(id);
        Ok(id)
    }

    /// Selects the current object by owning descriptor and/or object id.
    ///
    /// A wildcard/wildcard call is only legal while at most one object is
    /// loaded; with a concrete descriptor filter and several matches the
    /// lowest object id wins, deterministically.
    pub fn raise(&mut self, desc_filter: Option<DescId>, id_filter: Option<ObjId>) -> Result<ObjId> {
        if desc_filter.is_none() && id_filter.is_none() && self.objects.len() > 1 {
            return Err(StratumError::AmbiguousSelection);
        }
        let id = self
            .matching(desc_filter, id_filter)
            .first()
            .copied()
            .ok_or_else(|| StratumError::object_not_found(id_filter.unwrap_or(0)))?;
        self.current = Some(id);
        debug!(id, "binary object raised");
        self.notify(MetadataEvent::Raised { object: id });
        Ok(id)
    }

    /// Removes every object matching the filters.
    ///
    /// Refuses with `LastObjectGuard` whenever the removal would empty the
    /// registry; only descriptor-close cascades may do that.
    pub fn delete(
        &mut self,
        desc_filter: Option<DescId>,
        id_filter: Option<ObjId>,
    ) -> Result<usize> {
        let matches = self.matching(desc_filter, id_filter);
        if matches.is_empty() {
            return Err(StratumError::object_not_found(id_filter.unwrap_or(0)));
        }
        if matches.len() == self.objects.len() {
            return Err(StratumError::LastObjectGuard);
        }
        for id in &matches {
            self.objects.remove(id);
            if self.current == Some(*id) {
                self.current = None;
            }
        }
        debug!(removed = matches.len(), "binary objects deleted");
        Ok(matches.len())
    }

    /// Moves the current object to `new_base` and emits exactly one
    /// `Rebased` notification. Returns the old base address.
    pub fn rebase(&mut self, new_base: u64) -> Result<u64> {
        let id = self.current.ok_or(StratumError::NotFound {
            entity: "current binary object",
            id: 0,
        })?;
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or_else(|| StratumError::object_not_found(id))?;
        let old_base = obj.base_addr;
        obj.base_addr = new_base;
        info!(id, old_base, new_base, "binary object rebased");
        self.notify(MetadataEvent::Rebased {
            object: id,
            old_base,
            new_base,
        });
        Ok(old_base)
    }

    /// Removes every object owned by `fd` (descriptor-close cascade),
    /// clearing the current selection if it pointed there.
    pub fn remove_for_descriptor(&mut self, fd: DescId) -> Vec<BinaryObject> {
        let ids: Vec<ObjId> = self
            .objects
            .values()
            .filter(|o| o.fd == fd)
            .map(|o| o.id)
            .collect();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if self.current == Some(id) {
                self.current = None;
            }
            if let Some(o) = self.objects.remove(&id) {
                removed.push(o);
            }
        }
        removed
    }

    fn matching(&self, desc_filter: Option<DescId>, id_filter: Option<ObjId>) -> Vec<ObjId> {
        self.objects
            .values()
            .filter(|o| desc_filter.map(|fd| o.fd == fd).unwrap_or(true))
            .filter(|o| id_filter.map(|id| o.id == id).unwrap_or(true))
            .map(|o| o.id)
            .collect()
    }

    pub fn get(&self, id: ObjId) -> Result<&BinaryObject> {
        self.objects
            .get(&id)
            .ok_or_else(|| StratumError::object_not_found(id))
    }

    pub fn current(&self) -> Option<&BinaryObject> {
        self.current.and_then(|id| self.objects.get(&id))
    }

    pub fn current_id(&self) -> Option<ObjId> {
        self.current
    }

    /// Objects owned by `fd`, in id order.
    pub fn for_descriptor(&self, fd: DescId) -> Vec<&BinaryObject> {
        self.objects.values().filter(|o| o.fd == fd).collect()
    }

    /// All objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = &BinaryObject> {
        self.objects.values()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.current = None;
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendSet;
    use crate::desc::Descriptor;
    use crate::perm::Perm;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct StubParser;

    impl MetadataParser for StubParser {
        fn parse(&self, _desc: &mut Descriptor, _base: u64) -> anyhow::Result<BinaryInfo> {
            Ok(BinaryInfo::default())
        }
    }

    struct CountingObserver(Rc<RefCell<Vec<MetadataEvent>>>);

    impl MetadataObserver for CountingObserver {
        fn metadata_changed(&mut self, event: &MetadataEvent) {
            self.0.borrow_mut().push(event.clone());
        }
    }

    fn fixtures() -> (DescRegistry, DescId, DescId) {
        let mut descs = DescRegistry::new(BackendSet::with_defaults());
        let a = descs.open("malloc://64", Perm::rw(), 0).unwrap();
        let b = descs.open("malloc://64", Perm::rw(), 0).unwrap();
        (descs, a, b)
    }

    #[test]
    fn test_load_sets_current() {
        let (mut descs, a, _) = fixtures();
        let mut reg = ObjectRegistry::new();
        let id = reg.load(&mut descs, &StubParser, a, 0x400000).unwrap();
        assert_eq!(reg.current_id(), Some(id));
        assert_eq!(reg.current().unwrap().base_addr, 0x400000);
    }

    #[test]
    fn test_load_unknown_fd_is_not_found() {
        let (mut descs, _, _) = fixtures();
        let mut reg = ObjectRegistry::new();
        assert!(matches!(
            reg.load(&mut descs, &StubParser, 99, 0),
            Err(StratumError::NotFound { .. })
        ));
    }

    #[test]
    fn test_raise_wildcard_is_ambiguous_with_many() {
        let (mut descs, a, b) = fixtures();
        let mut reg = ObjectRegistry::new();
        let first = reg.load(&mut descs, &StubParser, a, 0).unwrap();
        assert_eq!(reg.raise(None, None).unwrap(), first);
        let second = reg.load(&mut descs, &StubParser, b, 0).unwrap();
        assert!(matches!(
            reg.raise(None, None),
            Err(StratumError::AmbiguousSelection)
        ));
        assert_eq!(reg.raise(Some(a), None).unwrap(), first);
        assert_eq!(reg.raise(None, Some(second)).unwrap(), second);
    }

    #[test]
    fn test_delete_guards_last_object_for_any_filter() {
        let (mut descs, a, _) = fixtures();
        let mut reg = ObjectRegistry::new();
        let id = reg.load(&mut descs, &StubParser, a, 0).unwrap();
        assert!(matches!(
            reg.delete(None, Some(id)),
            Err(StratumError::LastObjectGuard)
        ));
        assert!(matches!(
            reg.delete(Some(a), None),
            Err(StratumError::LastObjectGuard)
        ));
        assert!(matches!(
            reg.delete(None, None),
            Err(StratumError::LastObjectGuard)
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_delete_clears_current_when_it_matches() {
        let (mut descs, a, b) = fixtures();
        let mut reg = ObjectRegistry::new();
        reg.load(&mut descs, &StubParser, a, 0).unwrap();
        let second = reg.load(&mut descs, &StubParser, b, 0).unwrap();
        assert_eq!(reg.current_id(), Some(second));
        reg.delete(None, Some(second)).unwrap();
        assert!(reg.current().is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_rebase_emits_exactly_one_notification() {
        let (mut descs, a, _) = fixtures();
        let mut reg = ObjectRegistry::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        reg.subscribe(Box::new(CountingObserver(events.clone())));
        let id = reg.load(&mut descs, &StubParser, a, 0x400000).unwrap();
        let old = reg.rebase(0x5550_0000_0000).unwrap();
        assert_eq!(old, 0x400000);
        assert_eq!(reg.current().unwrap().base_addr, 0x5550_0000_0000);
        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            MetadataEvent::Rebased {
                object: id,
                old_base: 0x400000,
                new_base: 0x5550_0000_0000,
            }
        );
    }

    #[test]
    fn test_rebase_without_current_is_not_found() {
        let mut reg = ObjectRegistry::new();
        assert!(matches!(
            reg.rebase(0x1000),
            Err(StratumError::NotFound { .. })
        ));
    }

    #[test]
    fn test_cascade_removes_all_for_descriptor() {
        let (mut descs, a, b) = fixtures();
        let mut reg = ObjectRegistry::new();
        reg.load(&mut descs, &StubParser, a, 0).unwrap();
        reg.load(&mut descs, &StubParser, a, 0x1000).unwrap();
        let kept = reg.load(&mut descs, &StubParser, b, 0).unwrap();
        let removed = reg.remove_for_descriptor(a);
        assert_eq!(removed.len(), 2);
        assert_eq!(reg.len(), 1);
        // current pointed at the kept object, so it survives
        assert_eq!(reg.current_id(), Some(kept));
        let removed = reg.remove_for_descriptor(b);
        assert_eq!(removed.len(), 1);
        assert!(reg.current().is_none());
    }
}
