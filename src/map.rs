//! Map table: virtual-to-physical bindings with a total priority order.
//!
//! Maps bind a virtual range `[from, to)` to an offset (`delta`) within one
//! descriptor. Overlapping ranges are legal; `resolve` arbitrates them with
//! an explicit order vector decoupled from storage, so priority moves are
//! positional edits, not re-sorts. Index 0 of the order vector is the
//! highest precedence, and a newly added map starts there: the most recent
//! source shadows older ones until `priorize` says otherwise.

use crate::desc::{DescId, DescRegistry};
use crate::error::{Result, StratumError};
use crate::perm::Perm;
use std::collections::BTreeMap;
use tracing::debug;

/// Map id. Unique for the lifetime of the table.
pub type MapId = u32;

/// One virtual-to-physical binding.
#[derive(Debug, Clone)]
pub struct Map {
    pub id: MapId,
    /// Owning descriptor, referenced weakly by id.
    pub fd: DescId,
    /// Offset within the descriptor where the range begins.
    pub delta: u64,
    pub from: u64,
    /// Exclusive end; always greater than `from`.
    pub to: u64,
    pub perm: Perm,
    pub name: Option<String>,
}

impl Map {
    pub fn contains(&self, addr: u64) -> bool {
        self.from <= addr && addr < self.to
    }

    pub fn size(&self) -> u64 {
        self.to - self.from
    }

    /// Delta-adjusted offset of `addr` within the owning descriptor.
    /// Meaningful only when `contains(addr)`.
    pub fn offset_of(&self, addr: u64) -> u64 {
        debug_assert!(self.contains(addr));
        addr - self.from + self.delta
    }
}

/// Iteration orders for `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    ById,
    ByPriority,
}

/// The table of maps plus their strict total priority order.
pub struct MapTable {
    maps: BTreeMap<MapId, Map>,
    /// Map ids, index 0 = highest precedence. Always in sync with `maps`.
    order: Vec<MapId>,
    next_id: MapId,
}

impl MapTable {
    pub fn new() -> Self {
        Self {
            maps: BTreeMap::new(),
            order: Vec::new(),
            next_id: 1,
        }
    }

    /// Adds a map over `[from, from + size)` backed by `fd` at `delta`.
    ///
    /// Validates before mutating: the descriptor must be open, the size
    /// non-zero, and the end address must not overflow.
    pub fn add(
        &mut self,
        descs: &DescRegistry,
        fd: DescId,
        perm: Perm,
        delta: u64,
        from: u64,
        size: u64,
    ) -> Result<MapId> {
        if !descs.contains(fd) {
            return Err(StratumError::InvalidDescriptor(fd));
        }
        let to = match from.checked_add(size) {
            Some(to) if size > 0 => to,
            _ => return Err(StratumError::InvalidRange { from, size }),
        };
        let id = self.next_id;
        self.next_id += 1;
        self.maps.insert(
            id,
            Map {
                id,
                fd,
                delta,
                from,
                to,
                perm,
                name: None,
            },
        );
        self.order.insert(0, id);
        debug!(id, fd, from, to, delta, perm = %perm, "map added");
        Ok(id)
    }

    /// The highest-precedence map whose range contains `addr`.
    pub fn resolve(&self, addr: u64) -> Result<&Map> {
        self.order
            .iter()
            .filter_map(|id| self.maps.get(id))
            .find(|m| m.contains(addr))
            .ok_or(StratumError::NotFound {
                entity: "map at address",
                id: addr,
            })
    }

    pub fn resolve_by_id(&self, id: MapId) -> Result<&Map> {
        self.maps
            .get(&id)
            .ok_or_else(|| StratumError::map_not_found(id))
    }

    pub fn delete(&mut self, id: MapId) -> Result<Map> {
        let map = self
            .maps
            .remove(&id)
            .ok_or_else(|| StratumError::map_not_found(id))?;
        self.order.retain(|&o| o != id);
        debug!(id, "map deleted");
        Ok(map)
    }

    /// Moves a map to `new_from`, preserving its length. Overlaps with
    /// other maps are not checked here; `resolve` arbitrates them.
    pub fn rebase(&mut self, id: MapId, new_from: u64) -> Result<()> {
        let len = self.resolve_by_id(id)?.size();
        let new_to = new_from
            .checked_add(len)
            .ok_or(StratumError::InvalidRange {
                from: new_from,
                size: len,
            })?;
        let map = self.maps.get_mut(&id).ok_or_else(|| StratumError::map_not_found(id))?;
        map.from = new_from;
        map.to = new_to;
        debug!(id, from = new_from, to = new_to, "map rebased");
        Ok(())
    }

    /// Moves the map to the highest-precedence position.
    pub fn priorize(&mut self, id: MapId) -> Result<()> {
        if !self.maps.contains_key(&id) {
            return Err(StratumError::map_not_found(id));
        }
        self.order.retain(|&o| o != id);
        self.order.insert(0, id);
        debug!(id, "map priorized");
        Ok(())
    }

    /// Moves every map owned by `fd` to the front as a block, preserving
    /// their relative order. Returns how many maps moved.
    pub fn priorize_for_descriptor(&mut self, fd: DescId) -> usize {
        let (mut own, rest): (Vec<MapId>, Vec<MapId>) = self
            .order
            .iter()
            .partition(|id| self.maps.get(id).map(|m| m.fd == fd).unwrap_or(false));
        let moved = own.len();
        if moved > 0 {
            own.extend(rest);
            self.order = own;
            debug!(fd, moved, "descriptor maps priorized");
        }
        moved
    }

    /// Removes every map owned by `fd` (descriptor-close cascade).
    pub fn remove_for_descriptor(&mut self, fd: DescId) -> Vec<Map> {
        let ids: Vec<MapId> = self
            .maps
            .values()
            .filter(|m| m.fd == fd)
            .map(|m| m.id)
            .collect();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            self.order.retain(|&o| o != id);
            if let Some(m) = self.maps.remove(&id) {
                removed.push(m);
            }
        }
        removed
    }

    /// Maps in id order or priority order (highest precedence first).
    pub fn list(&self, order: ListOrder) -> Vec<&Map> {
        match order {
            ListOrder::ById => self.maps.values().collect(),
            ListOrder::ByPriority => self
                .order
                .iter()
                .filter_map(|id| self.maps.get(id))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl Default for MapTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendSet;

    fn fixtures() -> (DescRegistry, DescId, DescId) {
        let mut descs = DescRegistry::new(BackendSet::with_defaults());
        let a = descs.open("malloc://4096", Perm::rw(), 0).unwrap();
        let b = descs.open("malloc://4096", Perm::rw(), 0).unwrap();
        (descs, a, b)
    }

    #[test]
    fn test_add_zero_size_is_invalid_range() {
        let (descs, fd, _) = fixtures();
        let mut t = MapTable::new();
        let err = t.add(&descs, fd, Perm::r(), 0, 0x1000, 0).unwrap_err();
        assert!(matches!(err, StratumError::InvalidRange { .. }));
        assert!(t.is_empty());
    }

    #[test]
    fn test_add_overflowing_range_is_invalid() {
        let (descs, fd, _) = fixtures();
        let mut t = MapTable::new();
        let err = t
            .add(&descs, fd, Perm::r(), 0, u64::MAX - 0x10, 0x100)
            .unwrap_err();
        assert!(matches!(err, StratumError::InvalidRange { .. }));
    }

    #[test]
    fn test_add_unknown_descriptor_is_invalid_descriptor() {
        let (descs, _, _) = fixtures();
        let mut t = MapTable::new();
        let err = t.add(&descs, 99, Perm::r(), 0, 0, 0x100).unwrap_err();
        assert!(matches!(err, StratumError::InvalidDescriptor(99)));
    }

    #[test]
    fn test_resolve_misses_outside_all_ranges() {
        let (descs, fd, _) = fixtures();
        let mut t = MapTable::new();
        t.add(&descs, fd, Perm::r(), 0, 0x1000, 0x100).unwrap();
        assert!(t.resolve(0xfff).is_err());
        assert!(t.resolve(0x1100).is_err());
        assert!(t.resolve(0x1000).is_ok());
        assert!(t.resolve(0x10ff).is_ok());
    }

    #[test]
    fn test_most_recent_map_wins_until_priorized() {
        let (descs, fd3, fd4) = fixtures();
        let mut t = MapTable::new();
        let a = t.add(&descs, fd3, Perm::r(), 0, 0x1000, 0x100).unwrap();
        let b = t.add(&descs, fd4, Perm::r(), 0, 0x1050, 0x100).unwrap();
        // 0x1060 is inside both; the most recently added wins by default.
        assert_eq!(t.resolve(0x1060).unwrap().id, b);
        assert_eq!(t.resolve(0x1060).unwrap().fd, fd4);
        t.priorize(a).unwrap();
        assert_eq!(t.resolve(0x1060).unwrap().id, a);
        assert_eq!(t.resolve(0x1060).unwrap().fd, fd3);
        // Non-overlapped tails still resolve to their only owner.
        assert_eq!(t.resolve(0x1140).unwrap().id, b);
    }

    #[test]
    fn test_priorize_for_descriptor_moves_block_preserving_order() {
        let (descs, fd3, fd4) = fixtures();
        let mut t = MapTable::new();
        let a1 = t.add(&descs, fd3, Perm::r(), 0, 0x0, 0x100).unwrap();
        let a2 = t.add(&descs, fd3, Perm::r(), 0, 0x0, 0x100).unwrap();
        let b1 = t.add(&descs, fd4, Perm::r(), 0, 0x0, 0x100).unwrap();
        // order now: b1, a2, a1
        assert_eq!(t.resolve(0x10).unwrap().id, b1);
        let moved = t.priorize_for_descriptor(fd3);
        assert_eq!(moved, 2);
        let ids: Vec<MapId> = t.list(ListOrder::ByPriority).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a2, a1, b1]);
        assert_eq!(t.priorize_for_descriptor(999), 0);
    }

    #[test]
    fn test_rebase_preserves_length_and_allows_overlap() {
        let (descs, fd3, fd4) = fixtures();
        let mut t = MapTable::new();
        let a = t.add(&descs, fd3, Perm::r(), 0x20, 0x1000, 0x100).unwrap();
        let b = t.add(&descs, fd4, Perm::r(), 0, 0x5000, 0x100).unwrap();
        t.rebase(b, 0x1000).unwrap();
        let m = t.resolve_by_id(b).unwrap();
        assert_eq!((m.from, m.to), (0x1000, 0x1100));
        // both maps now cover 0x1000; arbitration stays with resolve
        assert_eq!(t.resolve(0x1000).unwrap().id, b);
        assert!(t.rebase(a, u64::MAX - 1).is_err());
        // failed rebase left the map untouched
        let m = t.resolve_by_id(a).unwrap();
        assert_eq!((m.from, m.to), (0x1000, 0x1100));
    }

    #[test]
    fn test_delete_then_resolve_by_id_misses() {
        let (descs, fd, _) = fixtures();
        let mut t = MapTable::new();
        let id = t.add(&descs, fd, Perm::r(), 0, 0, 0x10).unwrap();
        t.delete(id).unwrap();
        assert!(t.resolve_by_id(id).is_err());
        assert!(t.delete(id).is_err());
        assert!(t.list(ListOrder::ByPriority).is_empty());
    }

    #[test]
    fn test_offset_of_applies_delta() {
        let (descs, fd, _) = fixtures();
        let mut t = MapTable::new();
        let id = t.add(&descs, fd, Perm::r(), 0x40, 0x1000, 0x100).unwrap();
        let m = t.resolve_by_id(id).unwrap();
        assert_eq!(m.offset_of(0x1010), 0x50);
    }
}
