#![forbid(unsafe_code)]
pub mod bits;
pub mod deserializer;
pub mod item;
pub mod tag_reader;
pub mod types;
pub mod value;

#[cfg(test)]
mod test;

use anyhow::{anyhow, ensure, Context, Result};
use serde::Serialize;

use deserializer::Deserializer;
use item::ItemTable;
use tag_reader::TagReader;
use types::section::TypeSectionBuilder;
use types::TypeDict;
use value::ValueTree;

pub const ROOT_TAG: &[u8; 4] = b"TAG0";

/// Framing header of one tag section: a big-endian word packing 2 flag
/// bits and a 30-bit total size, followed by 4 ASCII tag bytes. The
/// payload is `size - 8` bytes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SectionHeader {
    /// top 2 bits of the size word, preserved but not interpreted
    pub flags: u8,
    pub size: u32,
    pub tag: [u8; 4],
}

impl SectionHeader {
    pub(crate) fn read(reader: &mut TagReader) -> Result<Self> {
        let size_and_flags = reader.read_u32_be()?;
        let tag: [u8; 4] = reader.read_bytes(4)?.try_into().unwrap();
        let flags = (size_and_flags >> 30) as u8;
        let size = size_and_flags & ((1 << 30) - 1);
        ensure!(size >= 8, "section size {size} is smaller than its header");
        Ok(Self { flags, size, tag })
    }

    pub fn data_size(&self) -> u32 {
        self.size - 8
    }
}

/// Walk `[header][payload]` units until the end of the reader, handing the
/// handler a sub-reader limited to each payload. Sections the handler does
/// not recognize are skipped by construction; handlers recurse into nested
/// containers by calling this again on their sub-reader. No tag order is
/// assumed.
pub(crate) fn read_sections<'a, H>(reader: &mut TagReader<'a>, mut handler: H) -> Result<()>
where
    H: FnMut(&SectionHeader, TagReader<'a>) -> Result<()>,
{
    while !reader.eof() {
        let header = SectionHeader::read(reader)?;
        let sub = reader
            .sub_reader(header.data_size() as usize)
            .with_context(|| format!("section `{}`", String::from_utf8_lossy(&header.tag)))?;
        handler(&header, sub)?;
    }
    Ok(())
}

/// A parsed tag file: the internal tables, ready for decoding.
///
/// The string pools, type dictionary and item table are built once here
/// and immutable afterwards; [TagFile::deserialize_root] interprets the
/// DATA image on demand.
#[derive(Debug, Clone)]
pub struct TagFile {
    pub sdk_version: Option<String>,
    pub types: TypeDict,
    pub items: ItemTable,
    data: Vec<u8>,
}

impl TagFile {
    pub fn read(input: &[u8]) -> Result<TagFile> {
        let mut reader = TagReader::new(input);

        let mut seen_root = false;
        let mut sdk_version = None;
        let mut types = None;
        let mut items = None;
        let mut data = None;

        read_sections(&mut reader, |header, mut root| {
            if &header.tag != ROOT_TAG {
                return Ok(());
            }
            ensure!(!seen_root, "duplicate TAG0 section");
            seen_root = true;
            read_sections(&mut root, |header, mut sub| match &header.tag {
                b"SDKV" => {
                    ensure!(sdk_version.is_none(), "duplicate SDKV section");
                    let raw = sub.read_bytes(sub.remaining())?;
                    let version = String::from_utf8(raw.to_vec())
                        .map_err(|err| anyhow!("invalid SDKV string: {err}"))?;
                    sdk_version = Some(version);
                    Ok(())
                }
                b"TYPE" => {
                    ensure!(types.is_none(), "duplicate TYPE section");
                    types = Some(TypeSectionBuilder::read(&mut sub).context("TYPE section")?);
                    Ok(())
                }
                b"INDX" => read_sections(&mut sub, |header, mut sub| match &header.tag {
                    b"ITEM" => {
                        ensure!(items.is_none(), "duplicate ITEM section");
                        items = Some(ItemTable::read(&mut sub).context("ITEM section")?);
                        Ok(())
                    }
                    _ => Ok(()),
                }),
                b"DATA" => {
                    ensure!(data.is_none(), "duplicate DATA section");
                    data = Some(sub.read_bytes(sub.remaining())?.to_vec());
                    Ok(())
                }
                _ => Ok(()),
            })
        })?;

        ensure!(seen_root, "missing TAG0 root section");
        let types = types.ok_or_else(|| anyhow!("missing TYPE section"))?;
        let items = items.ok_or_else(|| anyhow!("missing INDX/ITEM section"))?;
        let data = data.ok_or_else(|| anyhow!("missing DATA section"))?;
        items.validate(&types)?;

        Ok(TagFile {
            sdk_version,
            types,
            items,
            data,
        })
    }

    /// The raw DATA image, indexed by item offsets.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decode the object graph rooted at item #1.
    pub fn deserialize_root(&self) -> Result<ValueTree> {
        Deserializer::new(&self.data, &self.types, &self.items).deserialize_root()
    }
}
