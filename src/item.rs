use anyhow::{ensure, Context, Result};
use serde::Serialize;

use crate::tag_reader::TagReader;
use crate::types::{TypeDict, TypeId};

const ITEM_RECORD_SIZE: usize = 12;

const ITEM_POINTER: u8 = 0x10;
const ITEM_ARRAY: u8 = 0x20;

/// Flag byte of an item record (bits 24..=31 of the packed word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ItemFlags(u8);

impl ItemFlags {
    pub fn into_raw(self) -> u8 {
        self.0
    }

    pub fn is_pointer(self) -> bool {
        self.0 & ITEM_POINTER != 0
    }

    pub fn is_array(self) -> bool {
        self.0 & ITEM_ARRAY != 0
    }
}

/// One entry of the item table: a typed region of the DATA payload, the
/// unit pointers resolve to.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Item {
    /// `None` for the null placeholder (zero type id)
    pub typ: Option<TypeId>,
    pub flags: ItemFlags,
    /// byte offset into the DATA payload
    pub offset: u32,
    pub count: u32,
}

impl Item {
    pub fn is_null(&self) -> bool {
        self.typ.is_none()
    }
}

/// The INDX/ITEM table, indexed by ordinal. Ordinal 0 is a null sentinel;
/// pointers in the data image are stored as ordinals into this table.
#[derive(Debug, Clone, Serialize)]
pub struct ItemTable {
    items: Vec<Item>,
}

impl ItemTable {
    pub(crate) fn read(reader: &mut TagReader) -> Result<Self> {
        ensure!(
            reader.remaining() % ITEM_RECORD_SIZE == 0,
            "ITEM payload of {} bytes is not a whole number of records",
            reader.remaining()
        );
        let count = reader.remaining() / ITEM_RECORD_SIZE;
        let items = (0..count)
            .map(|ordinal| {
                let record = reader.read_bytes(ITEM_RECORD_SIZE)?;
                let (type_and_flags, offset, count): (u32, u32, u32) =
                    bincode::deserialize(record)
                        .with_context(|| format!("item record {ordinal}"))?;
                let type_id = type_and_flags & 0x00FF_FFFF;
                let flags = ItemFlags((type_and_flags >> 24) as u8);
                Ok(Item {
                    typ: (type_id != 0).then_some(TypeId(type_id)),
                    flags,
                    offset,
                    count,
                })
            })
            .collect::<Result<_>>()?;
        Ok(Self { items })
    }

    /// Items may be parsed before the TYPE section; references are checked
    /// once both tables exist.
    pub(crate) fn validate(&self, types: &TypeDict) -> Result<()> {
        for (ordinal, item) in self.items.iter().enumerate() {
            if let Some(typ) = item.typ {
                ensure!(
                    typ.index() < types.len(),
                    "item {ordinal} references type {} out of range ({} types)",
                    typ.as_u32(),
                    types.len()
                );
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, ordinal: usize) -> Option<&Item> {
        self.items.get(ordinal)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }
}
