use anyhow::{anyhow, ensure, Context, Result};

use crate::read_sections;
use crate::tag_reader::TagReader;
use crate::types::flag::opt;
use crate::types::{
    Field, Interface, SizeAlign, TagType, TemplateParam, TemplateValue, TypeDict, TypeId,
};

/// One NUL-terminated string pool, index = order of appearance.
#[derive(Debug, Clone)]
struct StringPool(Vec<String>);

impl StringPool {
    fn read(reader: &mut TagReader) -> Result<Self> {
        let mut strings = Vec::new();
        while !reader.eof() {
            let bytes = reader.read_nul_str()?;
            let string = String::from_utf8(bytes.to_vec())
                .map_err(|err| anyhow!("invalid string in pool: {err}"))?;
            strings.push(string);
        }
        Ok(Self(strings))
    }

    fn get(&self, index: usize) -> Result<&str> {
        self.0
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("string index {index} out of range ({} entries)", self.0.len()))
    }
}

/// Remap the serialized opts varint onto the [opt] masks: stream bit `i`
/// selects `opt::REMAP[i]`.
pub(crate) fn remap_opts(raw: u32) -> Result<u32> {
    ensure!(
        raw < (1 << opt::REMAP.len() as u32),
        "unknown type body option bits {raw:#X}"
    );
    Ok(opt::REMAP
        .iter()
        .enumerate()
        .filter(|(i, _)| raw & (1 << i) != 0)
        .fold(0, |acc, (_, mask)| acc | mask))
}

fn type_ref(len: usize, ordinal: u32) -> Result<Option<TypeId>> {
    if ordinal == 0 {
        return Ok(None);
    }
    ensure!(
        (ordinal as usize) < len,
        "type ordinal {ordinal} out of range ({len} slots)"
    );
    Ok(Some(TypeId(ordinal)))
}

/// Builds the type dictionary from the subsections of TYPE.
///
/// Two passes over one shared vector: TNA1 pre-allocates every slot and
/// fills the identities (name, template parameters), so parent, subtype
/// and template references may point at forward slots; TBDY then fills the
/// bodies in place.
#[derive(Debug, Default)]
pub(crate) struct TypeSectionBuilder {
    type_names: Option<StringPool>,
    field_names: Option<StringPool>,
    types: Vec<TagType>,
}

impl TypeSectionBuilder {
    pub(crate) fn read(reader: &mut TagReader) -> Result<TypeDict> {
        let mut builder = TypeSectionBuilder::default();
        read_sections(reader, |header, mut sub| match &header.tag {
            b"TSTR" => builder.read_tstr(&mut sub).context("TSTR section"),
            b"TNA1" => builder.read_tna1(&mut sub).context("TNA1 section"),
            b"FSTR" => builder.read_fstr(&mut sub).context("FSTR section"),
            b"TBDY" => builder.read_tbdy(&mut sub).context("TBDY section"),
            _ => Ok(()),
        })?;
        builder.finish()
    }

    fn read_tstr(&mut self, reader: &mut TagReader) -> Result<()> {
        ensure!(self.type_names.is_none(), "duplicate TSTR section");
        self.type_names = Some(StringPool::read(reader)?);
        Ok(())
    }

    fn read_fstr(&mut self, reader: &mut TagReader) -> Result<()> {
        ensure!(self.field_names.is_none(), "duplicate FSTR section");
        self.field_names = Some(StringPool::read(reader)?);
        Ok(())
    }

    fn read_tna1(&mut self, reader: &mut TagReader) -> Result<()> {
        ensure!(self.types.is_empty(), "duplicate TNA1 section");
        let names = self
            .type_names
            .as_ref()
            .ok_or_else(|| anyhow!("TNA1 section before TSTR"))?;

        let count = reader.read_varint_s32()? as usize;
        ensure!(count >= 1, "empty type table");
        let mut types = vec![TagType::default(); count];
        // slot 0 stays the reserved null slot
        for ty in types.iter_mut().skip(1) {
            let name_index = reader.read_varint_s32()? as usize;
            ty.name = names.get(name_index)?.to_owned();

            let arity = reader.read_varint_s32()? as usize;
            ty.template = (0..arity)
                .map(|_| {
                    let param_index = reader.read_varint_s32()? as usize;
                    let name = names.get(param_index)?.to_owned();
                    let raw = reader.read_varint_s32()?;
                    let value = if name.starts_with('t') {
                        TemplateValue::Type(type_ref(count, raw as u32)?)
                    } else {
                        TemplateValue::Int(raw)
                    };
                    Ok(TemplateParam { name, value })
                })
                .collect::<Result<_>>()?;
        }
        self.types = types;
        Ok(())
    }

    fn read_tbdy(&mut self, reader: &mut TagReader) -> Result<()> {
        ensure!(!self.types.is_empty(), "TBDY section before TNA1");
        let names = self
            .field_names
            .as_ref()
            .ok_or_else(|| anyhow!("TBDY section before FSTR"))?;
        let len = self.types.len();

        while !reader.eof() {
            let ordinal = reader.read_varint_s32()? as u32;
            if ordinal == 0 {
                continue;
            }
            ensure!(
                (ordinal as usize) < len,
                "type body ordinal {ordinal} out of range ({len} slots)"
            );

            let parent = type_ref(len, reader.read_varint_s32()? as u32)?;
            let opts = remap_opts(reader.read_varint_u32()?)
                .with_context(|| format!("type body {ordinal}"))?;

            let body = &mut self.types[ordinal as usize];
            body.parent = parent;
            body.opts = opts;

            if opts & opt::FORMAT != 0 {
                body.format = Some(reader.read_varint_u32()?);
            }
            if opts & opt::SUBTYPE != 0 {
                ensure!(
                    matches!(body.format, Some(format) if format != 0),
                    "type body {ordinal} has a subtype but no format"
                );
                body.subtype = type_ref(len, reader.read_varint_s32()? as u32)?;
            }
            if opts & opt::VERSION != 0 {
                body.version = Some(reader.read_varint_s32()?);
            }
            if opts & opt::SIZE_ALIGN != 0 {
                let size = reader.read_varint_u32()?;
                let align = reader.read_varint_u32()?;
                ensure!(
                    align.is_power_of_two(),
                    "type body {ordinal} alignment {align} is not a power of two"
                );
                body.size_align = Some(SizeAlign { size, align });
            }
            if opts & opt::FLAGS != 0 {
                body.flags = Some(reader.read_varint_u16()?);
            }
            if opts & opt::FIELDS != 0 {
                let pair = reader.read_varint_s32()?;
                let field_count = (pair & 0xFFFF) as usize;
                let placeholder_count = ((pair >> 16) & 0x7FFF) as usize;
                let mut fields = Vec::with_capacity(field_count + placeholder_count);
                for _ in 0..field_count {
                    let name = names.get(reader.read_varint_u16()? as usize)?.to_owned();
                    let flags = reader.read_varint_u16()?;
                    let offset = reader.read_varint_u16()?;
                    let typ = type_ref(len, reader.read_varint_s32()? as u32)?;
                    fields.push(Field {
                        name: Some(name),
                        flags,
                        offset,
                        typ,
                    });
                }
                // placeholders only preserve positions, nothing is read
                for _ in 0..placeholder_count {
                    fields.push(Field {
                        name: None,
                        flags: 0,
                        offset: 0,
                        typ: None,
                    });
                }
                body.fields = fields;
            }
            if opts & opt::INTERFACES != 0 {
                let count = reader.read_varint_s32()? as usize;
                body.interfaces = (0..count)
                    .map(|_| {
                        let typ = type_ref(len, reader.read_varint_s32()? as u32)?
                            .ok_or_else(|| anyhow!("null interface type on body {ordinal}"))?;
                        let name = names.get(reader.read_varint_s32()? as usize)?.to_owned();
                        Ok(Interface { typ, name })
                    })
                    .collect::<Result<_>>()?;
            }
            if opts & opt::ATTRIBUTE != 0 {
                body.attribute = Some(reader.read_varint_s32()?);
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<TypeDict> {
        ensure!(!self.types.is_empty(), "TYPE section without a TNA1 table");
        Ok(TypeDict::new(self.types))
    }
}
