pub mod flag;
pub mod section;

use num_enum::TryFromPrimitive;
use serde::Serialize;

/// Index of a type record in the [TypeDict] vector.
///
/// The dictionary is an arena: parents, subtypes, template parameters and
/// item types are all indices into the same vector. Slot 0 is a reserved
/// null slot, so live references are always >= 1; a zero ordinal on the
/// wire decodes to `None` before a `TypeId` is ever built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The deserialization strategy selected by the low 5 bits of a type's
/// `format` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TryFromPrimitive)]
#[repr(u8)]
pub enum FormatKind {
    Void = 0,
    Opaque = 1,
    Bool = 2,
    String = 3,
    Int = 4,
    Float = 5,
    Pointer = 6,
    Record = 7,
    Array = 8,
}

#[derive(Debug, Clone, Serialize)]
pub enum TemplateValue {
    /// parameter names starting with `t` carry a type reference
    Type(Option<TypeId>),
    Int(i32),
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateParam {
    pub name: String,
    pub value: TemplateValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct Field {
    /// `None` for placeholder entries, which only preserve positions
    pub name: Option<String>,
    pub flags: u16,
    /// byte offset within the owning record
    pub offset: u16,
    pub typ: Option<TypeId>,
}

impl Field {
    pub fn is_placeholder(&self) -> bool {
        self.name.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Interface {
    pub typ: TypeId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SizeAlign {
    pub size: u32,
    /// always a power of two
    pub align: u32,
}

/// One type record: the identity (name, template) comes from the TNA1
/// pass, everything else from the TBDY pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TagType {
    pub name: String,
    pub template: Vec<TemplateParam>,
    pub parent: Option<TypeId>,
    /// remapped optional-attribute mask, see [flag::opt]
    pub opts: u32,
    pub format: Option<u32>,
    /// element type for pointers and arrays
    pub subtype: Option<TypeId>,
    pub version: Option<i32>,
    pub size_align: Option<SizeAlign>,
    pub flags: Option<u16>,
    pub fields: Vec<Field>,
    pub interfaces: Vec<Interface>,
    pub attribute: Option<i32>,
}

impl TagType {
    pub fn format_kind(&self) -> Option<FormatKind> {
        self.format
            .and_then(|f| FormatKind::try_from((f & flag::format::TYPE_MASK) as u8).ok())
    }
}

/// The reconstructed type dictionary of one file. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct TypeDict {
    types: Vec<TagType>,
}

impl TypeDict {
    pub(crate) fn new(types: Vec<TagType>) -> Self {
        Self { types }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, id: TypeId) -> &TagType {
        &self.types[id.index()]
    }

    /// Live type records, skipping the reserved null slot.
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TagType)> {
        self.types
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, ty)| (TypeId(i as u32), ty))
    }

    /// Walk the parent chain until a record with a `format` is found.
    ///
    /// Typedef aliases carry no format of their own; the effective type
    /// used by the deserializer is the first ancestor that does. If the
    /// chain ends without one the last record is returned and the caller
    /// reports the missing format.
    pub fn resolve(&self, id: TypeId) -> TypeId {
        let mut current = id;
        for _ in 0..self.types.len() {
            let ty = self.get(current);
            if ty.format.is_some() {
                return current;
            }
            match ty.parent {
                Some(parent) => current = parent,
                None => return current,
            }
        }
        current
    }

    /// The effective field list: ancestors' fields first, then the type's
    /// own, each in declaration order. Offsets stay relative to the start
    /// of the owning record; the format does not relocate inherited
    /// fields.
    pub fn all_fields(&self, id: TypeId) -> Vec<&Field> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(ty) = current {
            chain.push(ty);
            if chain.len() > self.types.len() {
                break;
            }
            current = self.get(ty).parent;
        }
        chain
            .iter()
            .rev()
            .flat_map(|ty| self.get(*ty).fields.iter())
            .collect()
    }

    /// Whether `id` is `ancestor` or transitively inherits from it.
    pub fn is_kind_of(&self, id: TypeId, ancestor: TypeId) -> bool {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(ty) = current {
            if ty == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.types.len() {
                return false;
            }
            current = self.get(ty).parent;
        }
        false
    }

    /// Human-readable type name: `T*` renders as `<elem>*`, `T[N]` as
    /// `<elem>[N]`, any other templated name as `name<p1, p2, ...>`.
    pub fn render_name(&self, id: TypeId) -> String {
        self.render_name_depth(id, 0)
    }

    fn render_name_depth(&self, id: TypeId, depth: usize) -> String {
        if depth > 32 {
            return "...".to_owned();
        }
        let ty = self.get(id);
        let param = |value: &TemplateValue| match value {
            TemplateValue::Type(Some(inner)) => self.render_name_depth(*inner, depth + 1),
            TemplateValue::Type(None) => "?".to_owned(),
            TemplateValue::Int(value) => value.to_string(),
        };
        match (ty.name.as_str(), ty.template.as_slice()) {
            ("T*", [elem]) => format!("{}*", param(&elem.value)),
            ("T[N]", [elem, len]) => {
                format!("{}[{}]", param(&elem.value), param(&len.value))
            }
            (name, []) => name.to_owned(),
            (name, params) => {
                let params: Vec<String> = params.iter().map(|p| param(&p.value)).collect();
                format!("{}<{}>", name, params.join(", "))
            }
        }
    }
}
