use anyhow::{anyhow, ensure, Context, Result};

use crate::item::ItemTable;
use crate::tag_reader::TagReader;
use crate::types::flag::format;
use crate::types::{FormatKind, TypeDict, TypeId};
use crate::value::{IntValue, Value, ValueId, ValueTree};

/// On-demand interpreter of the DATA image under the guidance of the type
/// dictionary and the item table.
///
/// Every item decodes at most once: the value cache is an index-keyed side
/// table so the item table itself stays immutable, and the cache slot is
/// claimed before the item's payload is decoded, so both sides of a
/// pointer cycle end up holding the same node.
pub struct Deserializer<'a> {
    data: TagReader<'a>,
    types: &'a TypeDict,
    items: &'a ItemTable,
    tree: ValueTree,
    cache: Vec<Option<ValueId>>,
}

impl<'a> Deserializer<'a> {
    pub fn new(data: &'a [u8], types: &'a TypeDict, items: &'a ItemTable) -> Self {
        Self {
            data: TagReader::new(data),
            types,
            items,
            tree: ValueTree::new(),
            cache: vec![None; items.len()],
        }
    }

    /// Decode item #1, the root of the object graph.
    pub fn deserialize_root(mut self) -> Result<ValueTree> {
        let root = self.deserialize_item(1)?;
        self.tree.set_root(root);
        Ok(self.tree)
    }

    pub fn deserialize_item(&mut self, ordinal: usize) -> Result<ValueId> {
        let item = *self
            .items
            .get(ordinal)
            .ok_or_else(|| anyhow!("item ordinal {ordinal} out of range"))?;
        let Some(typ) = item.typ else {
            return Ok(self.tree.null());
        };
        if let Some(cached) = self.cache[ordinal] {
            return Ok(cached);
        }

        // claim the cache slot before decoding anything
        let node = self.tree.alloc(Value::Null);
        self.cache[ordinal] = Some(node);

        let mut reader = self.data.clone_at(item.offset as usize);
        if item.flags.is_array() {
            self.tree.set(node, Value::Array(Vec::new()));
            for _ in 0..item.count {
                let element = self.deserialize_object(&mut reader, typ, None)?;
                self.tree.push_element(node, element);
            }
        } else {
            self.deserialize_object(&mut reader, typ, Some(node))?;
        }
        Ok(node)
    }

    /// Decode one object of type `typ` at the reader's position.
    ///
    /// With `into`, the result lands in that pre-claimed node; otherwise a
    /// fresh node is allocated. Alignment is honored before the payload,
    /// and the declared size after it, so siblings land on the expected
    /// stride regardless of the inner layout.
    fn deserialize_object(
        &mut self,
        reader: &mut TagReader,
        typ: TypeId,
        into: Option<ValueId>,
    ) -> Result<ValueId> {
        let types = self.types;
        let resolved = types.resolve(typ);
        let size_align = types.get(resolved).size_align;

        if let Some(sa) = size_align {
            reader.align_to(sa.align as usize);
        }
        let start = reader.tell();
        let node = self
            .deserialize_object_impl(reader, resolved, into)
            .with_context(|| format!("decoding a `{}`", types.render_name(typ)))?;
        if let Some(sa) = size_align {
            reader.seek(start + sa.size as usize);
        }
        Ok(node)
    }

    fn deserialize_object_impl(
        &mut self,
        reader: &mut TagReader,
        resolved: TypeId,
        into: Option<ValueId>,
    ) -> Result<ValueId> {
        let types = self.types;
        let ty = types.get(resolved);
        let word = ty
            .format
            .ok_or_else(|| anyhow!("type has no format anywhere in its parent chain"))?;
        let kind = FormatKind::try_from((word & format::TYPE_MASK) as u8)
            .map_err(|_| anyhow!("unknown format type {:#X}", word & format::TYPE_MASK))?;

        match kind {
            FormatKind::Bool => {
                let value = reader.read_u8()?;
                Ok(self.finish(into, Value::Bool(value != 0)))
            }
            FormatKind::String => {
                let ordinal = reader.read_u64_le()?;
                let value = match ordinal {
                    0 => Value::Null,
                    _ => Value::String(self.read_string_item(ordinal)?),
                };
                Ok(self.finish(into, value))
            }
            FormatKind::Int => {
                let value = read_int(reader, word)?;
                Ok(self.finish(into, Value::Int(value)))
            }
            FormatKind::Float => {
                let value = reader.read_f32_le()?;
                Ok(self.finish(into, Value::Float(value)))
            }
            FormatKind::Array if word & format::INLINE_ARRAY != 0 => {
                self.read_inline_array(reader, resolved, into)
            }
            FormatKind::Pointer | FormatKind::Array => {
                let target = self.read_pointer(reader, ty.subtype)?;
                match into {
                    None => Ok(target),
                    // an item whose own type is a pointer: its cache slot
                    // takes over the pointee's contents (shallow, so child
                    // identities survive)
                    Some(node) => {
                        let contents = self.tree.node(target).clone();
                        self.tree.set(node, contents);
                        Ok(node)
                    }
                }
            }
            FormatKind::Record => self.read_record(reader, resolved, into),
            FormatKind::Void | FormatKind::Opaque => {
                Err(anyhow!("cannot decode a value of format type {kind:?}"))
            }
        }
    }

    fn read_record(
        &mut self,
        reader: &mut TagReader,
        resolved: TypeId,
        into: Option<ValueId>,
    ) -> Result<ValueId> {
        let types = self.types;
        let node = match into {
            Some(node) => {
                self.tree.set(node, Value::Record(Vec::new()));
                node
            }
            None => self.tree.alloc(Value::Record(Vec::new())),
        };
        let start = reader.tell();
        for field in types.all_fields(resolved) {
            let Some(name) = &field.name else {
                // placeholder slot, nothing was serialized for it
                continue;
            };
            let typ = field.typ.ok_or_else(|| {
                anyhow!("field `{name}` of `{}` has no type", types.render_name(resolved))
            })?;
            reader.seek(start + field.offset as usize);
            let value = self
                .deserialize_object(reader, typ, None)
                .with_context(|| format!("field `{name}`"))?;
            self.tree.push_field(node, name.clone(), value);
        }
        Ok(node)
    }

    fn read_inline_array(
        &mut self,
        reader: &mut TagReader,
        resolved: TypeId,
        into: Option<ValueId>,
    ) -> Result<ValueId> {
        let types = self.types;
        let ty = types.get(resolved);
        let size = ty
            .size_align
            .map(|sa| sa.size as usize)
            .ok_or_else(|| anyhow!("inline array without a declared size"))?;
        let subtype = ty
            .subtype
            .ok_or_else(|| anyhow!("inline array without an element type"))?;

        let node = match into {
            Some(node) => {
                self.tree.set(node, Value::Array(Vec::new()));
                node
            }
            None => self.tree.alloc(Value::Array(Vec::new())),
        };
        let start = reader.tell();
        let end = start + size;
        while reader.tell() < end {
            let before = reader.tell();
            let element = self.deserialize_object(reader, subtype, None)?;
            ensure!(
                reader.tell() > before,
                "inline array element of `{}` consumed no bytes",
                types.render_name(subtype)
            );
            self.tree.push_element(node, element);
        }
        Ok(node)
    }

    /// Resolve a stored pointer: a u64 little-endian item ordinal, 0 being
    /// the null item.
    fn read_pointer(
        &mut self,
        reader: &mut TagReader,
        subtype: Option<TypeId>,
    ) -> Result<ValueId> {
        let ordinal = reader.read_u64_le()?;
        if ordinal == 0 {
            return Ok(self.tree.null());
        }
        let ordinal = usize::try_from(ordinal)
            .map_err(|_| anyhow!("pointer ordinal {ordinal:#X} does not fit"))?;
        let item = self
            .items
            .get(ordinal)
            .ok_or_else(|| anyhow!("pointer to item {ordinal} out of range"))?;

        if let (Some(expected), Some(actual)) = (subtype, item.typ) {
            let types = self.types;
            let expected_kind = types.get(types.resolve(expected)).format_kind();
            // an opaque element type accepts any item
            // TODO a structural match may be needed across template
            // instantiations, no sample has required it yet
            if expected_kind != Some(FormatKind::Opaque) {
                ensure!(
                    types.is_kind_of(actual, expected),
                    "pointer type mismatch: item {ordinal} is a `{}`, expected a `{}`",
                    types.render_name(actual),
                    types.render_name(expected),
                );
            }
        }
        self.deserialize_item(ordinal)
    }

    /// The pointee of a STRING value: an array-flagged item whose region
    /// holds `count` bytes, the last being the NUL terminator.
    fn read_string_item(&self, ordinal: u64) -> Result<String> {
        let ordinal = usize::try_from(ordinal)
            .map_err(|_| anyhow!("string ordinal {ordinal:#X} does not fit"))?;
        let item = self
            .items
            .get(ordinal)
            .ok_or_else(|| anyhow!("string pointer to item {ordinal} out of range"))?;
        ensure!(
            item.flags.is_array(),
            "string target item {ordinal} is not array-flagged"
        );
        ensure!(item.count >= 1, "string target item {ordinal} is empty");
        let mut reader = self.data.clone_at(item.offset as usize);
        let bytes = reader.read_bytes(item.count as usize - 1)?;
        String::from_utf8(bytes.to_vec())
            .with_context(|| format!("string item {ordinal} is not valid UTF-8"))
    }

    fn finish(&mut self, into: Option<ValueId>, value: Value) -> ValueId {
        match into {
            Some(node) => {
                self.tree.set(node, value);
                node
            }
            None => self.tree.alloc(value),
        }
    }
}

fn read_int(reader: &mut TagReader, word: u32) -> Result<IntValue> {
    let signed = word & format::SIGNED != 0;
    // width comes from the first set flag, smallest first
    if word & format::INT8 != 0 {
        let value = reader.read_u8()?;
        Ok(if signed {
            IntValue::I8(value as i8)
        } else {
            IntValue::U8(value)
        })
    } else if word & format::INT16 != 0 {
        let value = reader.read_u16_le()?;
        Ok(if signed {
            IntValue::I16(value as i16)
        } else {
            IntValue::U16(value)
        })
    } else if word & format::INT32 != 0 {
        let value = reader.read_u32_le()?;
        Ok(if signed {
            IntValue::I32(value as i32)
        } else {
            IntValue::U32(value)
        })
    } else if word & format::INT64 != 0 {
        let value = reader.read_u64_le()?;
        Ok(if signed {
            IntValue::I64(value as i64)
        } else {
            IntValue::U64(value)
        })
    } else {
        Err(anyhow!("integer format {word:#X} carries no width flag"))
    }
}
