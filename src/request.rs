//! Typed request dispatch over a session.
//!
//! The open/map/object command family collapsed into one tagged request
//! type processed by a pure function returning a typed result. A textual
//! front end (parser, help text) lives outside this crate and only has to
//! build `Request` values.

use crate::binobj::ObjId;
use crate::desc::DescId;
use crate::error::{Result, StratumError};
use crate::listing;
use crate::map::{ListOrder, MapId};
use crate::perm::Perm;
use crate::session::{CloseReport, Session};

/// Output flavor for listing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendering {
    Table,
    Script,
    Json,
}

/// Every operation the core exposes, as data.
#[derive(Debug, Clone)]
pub enum Request {
    Open {
        uri: String,
        perm: Perm,
        /// Map the whole content at this address after opening.
        map_at: Option<u64>,
    },
    OpenAndLoad {
        uri: String,
        perm: Perm,
        base_addr: u64,
    },
    Close {
        fd: DescId,
    },
    CloseAll,
    Select {
        fd: DescId,
    },
    SelectNth {
        index: usize,
    },
    Exchange {
        a: DescId,
        b: DescId,
    },
    ListFiles {
        rendering: Rendering,
    },
    ListPlugins,
    MapAdd {
        fd: DescId,
        addr: u64,
        /// Defaults to the descriptor's full size.
        size: Option<u64>,
        delta: u64,
    },
    MapDelete {
        id: MapId,
    },
    MapRebase {
        id: MapId,
        addr: u64,
    },
    MapPriorize {
        id: MapId,
    },
    MapPriorizeDescriptor {
        fd: DescId,
    },
    /// The map covering an address, if any.
    MapAt {
        addr: u64,
    },
    MapList {
        rendering: Rendering,
    },
    Load {
        fd: DescId,
        base_addr: u64,
    },
    ObjRaise {
        fd: Option<DescId>,
        id: Option<ObjId>,
    },
    ObjDelete {
        fd: Option<DescId>,
        id: Option<ObjId>,
    },
    ObjRebase {
        base_addr: u64,
    },
    ObjList,
    Reopen {
        fd: DescId,
        writable: bool,
    },
    ReopenDebug {
        fd: DescId,
        args: String,
    },
    ReopenSnapshot {
        fd: DescId,
    },
}

/// Typed results matching `Request` variants.
#[derive(Debug)]
pub enum Response {
    Fd(DescId),
    Loaded { fd: DescId, object: ObjId },
    Object(ObjId),
    Map(MapId),
    Closed(CloseReport),
    Removed(usize),
    Moved(usize),
    OldBase(u64),
    Rendered(String),
    Structured(serde_json::Value),
    Unit,
}

/// Processes one request against the session.
pub fn dispatch(session: &mut Session, request: Request) -> Result<Response> {
    match request {
        Request::Open { uri, perm, map_at } => {
            let fd = match map_at {
                Some(addr) => session.open_at(&uri, perm, 0, addr)?,
                None => session.open(&uri, perm, 0)?,
            };
            Ok(Response::Fd(fd))
        }
        Request::OpenAndLoad {
            uri,
            perm,
            base_addr,
        } => {
            let (fd, object) = session.open_and_load(&uri, perm, 0, base_addr)?;
            Ok(Response::Loaded { fd, object })
        }
        Request::Close { fd } => Ok(Response::Closed(session.close(fd)?)),
        Request::CloseAll => {
            session.close_all();
            Ok(Response::Unit)
        }
        Request::Select { fd } => {
            session.select(fd)?;
            Ok(Response::Fd(fd))
        }
        Request::SelectNth { index } => Ok(Response::Fd(session.select_nth(index)?)),
        Request::Exchange { a, b } => {
            session.exchange(a, b)?;
            Ok(Response::Unit)
        }
        Request::ListFiles { rendering } => Ok(render_files(session, rendering)),
        Request::ListPlugins => Ok(Response::Structured(serde_json::json!(
            session.descs.backends().names()
        ))),
        Request::MapAdd {
            fd,
            addr,
            size,
            delta,
        } => {
            let desc = session
                .descs
                .get(fd)
                .map_err(|_| StratumError::InvalidDescriptor(fd))?;
            let perm = desc.perm;
            let size = match size {
                Some(s) => s,
                None => desc.size().ok_or(StratumError::InvalidRange {
                    from: addr,
                    size: 0,
                })?,
            };
            let id = session.maps.add(&session.descs, fd, perm, delta, addr, size)?;
            Ok(Response::Map(id))
        }
        Request::MapDelete { id } => {
            session.maps.delete(id)?;
            Ok(Response::Unit)
        }
        Request::MapRebase { id, addr } => {
            session.maps.rebase(id, addr)?;
            Ok(Response::Unit)
        }
        Request::MapPriorize { id } => {
            session.maps.priorize(id)?;
            Ok(Response::Unit)
        }
        Request::MapPriorizeDescriptor { fd } => {
            Ok(Response::Moved(session.maps.priorize_for_descriptor(fd)))
        }
        Request::MapAt { addr } => {
            let m = session.maps.resolve(addr)?;
            Ok(Response::Rendered(format!(
                "map: {} fd: {} +{:#x} {:#x} - {:#x} ; {} : {}",
                m.id,
                m.fd,
                m.delta,
                m.from,
                m.to,
                m.perm,
                m.name.as_deref().unwrap_or("")
            )))
        }
        Request::MapList { rendering } => Ok(match rendering {
            Rendering::Table => Response::Rendered(listing::render_map_table(session)),
            Rendering::Script => Response::Rendered(listing::render_script(session)),
            Rendering::Json => Response::Structured(serde_json::json!(listing::maps(
                session,
                ListOrder::ByPriority
            ))),
        }),
        Request::Load { fd, base_addr } => Ok(Response::Object(session.load(fd, base_addr)?)),
        Request::ObjRaise { fd, id } => Ok(Response::Object(session.objects.raise(fd, id)?)),
        Request::ObjDelete { fd, id } => Ok(Response::Removed(session.objects.delete(fd, id)?)),
        Request::ObjRebase { base_addr } => {
            Ok(Response::OldBase(session.objects.rebase(base_addr)?))
        }
        Request::ObjList => Ok(Response::Structured(serde_json::json!(listing::objects(
            session
        )))),
        Request::Reopen { fd, writable } => {
            let perm = if writable { Perm::rw() } else { Perm::r() };
            session.reopen(fd, perm)?;
            Ok(Response::Fd(fd))
        }
        Request::ReopenDebug { fd, args } => {
            session.reopen_as_debug(fd, &args)?;
            Ok(Response::Fd(fd))
        }
        Request::ReopenSnapshot { fd } => {
            session.reopen_in_memory_snapshot(fd)?;
            Ok(Response::Fd(fd))
        }
    }
}

fn render_files(session: &Session, rendering: Rendering) -> Response {
    match rendering {
        Rendering::Table => Response::Rendered(listing::render_table(session)),
        Rendering::Script => Response::Rendered(listing::render_script(session)),
        Rendering::Json => Response::Structured(listing::render_json(session)),
    }
}
