//! Read-only listing renderings over a session.
//!
//! Three forms: a human-readable table, a re-issuable script form that can
//! reconstruct the descriptor/map set, and a structured JSON form. None of
//! them mutate anything.

use crate::map::ListOrder;
use crate::session::Session;
use serde::Serialize;
use serde_json::json;
use std::fmt::Write;

/// Serializable view of one descriptor.
#[derive(Debug, Serialize)]
pub struct DescView<'a> {
    pub fd: u32,
    pub uri: &'a str,
    pub perm: String,
    pub size: Option<u64>,
    pub name: Option<&'a str>,
    pub current: bool,
}

/// Serializable view of one map.
#[derive(Debug, Serialize)]
pub struct MapView<'a> {
    pub id: u32,
    pub fd: u32,
    pub delta: u64,
    pub from: u64,
    pub to: u64,
    pub perm: String,
    pub name: Option<&'a str>,
}

/// Serializable view of one binary object.
#[derive(Debug, Serialize)]
pub struct ObjectView<'a> {
    pub id: u32,
    pub fd: u32,
    pub base_addr: u64,
    pub current: bool,
    pub info: &'a crate::metadata::BinaryInfo,
}

/// Descriptor views in fd order.
pub fn descriptors(session: &Session) -> Vec<DescView<'_>> {
    session
        .descs
        .iter()
        .map(|d| DescView {
            fd: d.fd(),
            uri: &d.uri,
            perm: d.perm.to_string(),
            size: d.size(),
            name: d.name.as_deref(),
            current: session.current_fd() == Some(d.fd()),
        })
        .collect()
}

/// Map views in the requested order.
pub fn maps(session: &Session, order: ListOrder) -> Vec<MapView<'_>> {
    session
        .maps
        .list(order)
        .into_iter()
        .map(|m| MapView {
            id: m.id,
            fd: m.fd,
            delta: m.delta,
            from: m.from,
            to: m.to,
            perm: m.perm.to_string(),
            name: m.name.as_deref(),
        })
        .collect()
}

/// Binary-object views in id order.
pub fn objects(session: &Session) -> Vec<ObjectView<'_>> {
    session
        .objects
        .iter()
        .map(|o| ObjectView {
            id: o.id,
            fd: o.fd,
            base_addr: o.base_addr,
            current: session.objects.current_id() == Some(o.id),
            info: &o.info,
        })
        .collect()
}

/// Human-readable table: one line per descriptor, the current one starred,
/// with that descriptor's maps nested beneath it in priority order.
pub fn render_table(session: &Session) -> String {
    let mut out = String::new();
    for d in session.descs.iter() {
        let star = if session.current_fd() == Some(d.fd()) {
            '*'
        } else {
            '-'
        };
        let size = d
            .size()
            .map(|s| format!("{s:#x}"))
            .unwrap_or_else(|| "?".to_string());
        let _ = writeln!(out, "{:2} {} {} : {} size={}", d.fd(), star, d.uri, d.perm, size);
        for m in session.maps.list(ListOrder::ByPriority) {
            if m.fd == d.fd() {
                let _ = writeln!(
                    out,
                    "  +{:#x} {:#x} - {:#x} : {} : {}",
                    m.delta,
                    m.from,
                    m.to,
                    m.perm,
                    m.name.as_deref().unwrap_or("")
                );
            }
        }
    }
    out
}

/// Human-readable map table, priority order, highest precedence first.
pub fn render_map_table(session: &Session) -> String {
    let mut out = String::new();
    for m in session.maps.list(ListOrder::ByPriority) {
        let _ = writeln!(
            out,
            "map: {} fd: {} +{:#x} {:#x} - {:#x} ; {} : {}",
            m.id,
            m.fd,
            m.delta,
            m.from,
            m.to,
            m.perm,
            m.name.as_deref().unwrap_or("")
        );
    }
    out
}

/// Re-issuable script form: replaying these lines against a fresh session
/// reconstructs the descriptor and map set. Maps are emitted
/// lowest-precedence first so replay re-establishes the priority order.
pub fn render_script(session: &Session) -> String {
    let mut out = String::new();
    for d in session.descs.iter() {
        let plus = if d.perm.contains(crate::perm::Perm::WRITE) {
            "+"
        } else {
            ""
        };
        let _ = writeln!(out, "o{} {} # fd {}", plus, d.uri, d.fd());
    }
    for m in session.maps.list(ListOrder::ByPriority).iter().rev() {
        let _ = writeln!(
            out,
            "om {} {:#x} {:#x} {:#x}",
            m.fd,
            m.from,
            m.to - m.from,
            m.delta
        );
    }
    out
}

/// Structured JSON form over all three registries.
pub fn render_json(session: &Session) -> serde_json::Value {
    json!({
        "files": descriptors(session),
        "maps": maps(session, ListOrder::ByPriority),
        "objects": objects(session),
        "plugins": session.descs.backends().names(),
    })
}
