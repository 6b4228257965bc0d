//! Parsed binary metadata and the parser/observer seams.
//!
//! The registry treats metadata as opaque: a `MetadataParser` produces it,
//! and `MetadataObserver`s are told when address-relative data must be
//! re-derived (e.g. after a rebase). Re-derivation itself happens outside
//! this crate.
//!
//! `ObjectFileParser` is the bundled reference parser built on the `object`
//! crate; hosts with richer format support supply their own.

use crate::binobj::ObjId;
use crate::desc::Descriptor;
use anyhow::Context;
use object::{Object, ObjectSection, ObjectSymbol};
use serde::Serialize;

/// A symbol as recorded by the parser. Addresses are as found in the
/// image; base adjustment is the consumer's business.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolRecord {
    pub name: String,
    pub addr: u64,
    pub size: u64,
}

/// A section as recorded by the parser.
#[derive(Debug, Clone, Serialize)]
pub struct SectionRecord {
    pub name: String,
    pub addr: u64,
    pub size: u64,
}

/// Opaque-to-the-core parse result attached to a binary object.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BinaryInfo {
    pub format: String,
    pub arch: String,
    pub bits: u32,
    pub symbols: Vec<SymbolRecord>,
    pub sections: Vec<SectionRecord>,
}

/// Produces `BinaryInfo` from a descriptor's content.
pub trait MetadataParser {
    fn parse(&self, desc: &mut Descriptor, base_addr: u64) -> anyhow::Result<BinaryInfo>;
}

/// Change notifications emitted by the binary-object registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataEvent {
    /// The current object's base address moved; address-relative data
    /// derived from it is stale until re-derived.
    Rebased {
        object: ObjId,
        old_base: u64,
        new_base: u64,
    },
    /// A different object became current.
    Raised { object: ObjId },
}

/// External collaborator interested in metadata changes.
pub trait MetadataObserver {
    fn metadata_changed(&mut self, event: &MetadataEvent);
}

/// Reference parser over the `object` crate. Handles ELF/PE/Mach-O and
/// friends; anything `object` rejects surfaces as a parse failure.
pub struct ObjectFileParser;

impl MetadataParser for ObjectFileParser {
    fn parse(&self, desc: &mut Descriptor, _base_addr: u64) -> anyhow::Result<BinaryInfo> {
        let data = desc.read_all().context("reading descriptor contents")?;
        let obj = object::read::File::parse(data.as_ref()).context("unrecognized format")?;

        let mut info = BinaryInfo {
            format: format!("{:?}", obj.format()),
            arch: format!("{:?}", obj.architecture()),
            bits: if obj.is_64() { 64 } else { 32 },
            ..Default::default()
        };
        for section in obj.sections() {
            if let Ok(name) = section.name() {
                info.sections.push(SectionRecord {
                    name: name.to_string(),
                    addr: section.address(),
                    size: section.size(),
                });
            }
        }
        for sym in obj.symbols() {
            if let Ok(name) = sym.name() {
                if !name.is_empty() {
                    info.symbols.push(SymbolRecord {
                        name: name.to_string(),
                        addr: sym.address(),
                        size: sym.size(),
                    });
                }
            }
        }
        Ok(info)
    }
}
