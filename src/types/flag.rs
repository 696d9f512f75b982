/// Optional-attribute masks carried by a type body's `opts` word.
///
/// The serialized opts varint is a dense bitfield; stream bit `i` selects
/// `REMAP[i]`. The payloads themselves always follow in the fixed order
/// FORMAT, SUBTYPE, VERSION, SIZE_ALIGN, FLAGS, FIELDS, INTERFACES,
/// ATTRIBUTE, regardless of mask value.
pub mod opt {
    pub const FORMAT: u32 = 0x0000_0001;
    pub const SUBTYPE: u32 = 0x0000_0002;
    pub const VERSION: u32 = 0x0000_0010;
    pub const INTERFACES: u32 = 0x0002_0000;
    pub const SIZE_ALIGN: u32 = 0x0080_0000;
    pub const FLAGS: u32 = 0x0100_0000;
    pub const FIELDS: u32 = 0x0400_0000;
    pub const ATTRIBUTE: u32 = 0x1000_0000;

    /// Stream-bit order of the opts varint.
    pub const REMAP: [u32; 8] = [
        FORMAT, SUBTYPE, VERSION, SIZE_ALIGN, FLAGS, FIELDS, INTERFACES, ATTRIBUTE,
    ];
}

/// Layout of a type's `format` word. The low 5 bits select the
/// deserialization strategy, the higher bits qualify it.
pub mod format {
    /// the low 5 bits are the format-type tag
    pub const TYPE_MASK: u32 = 0x1F;

    /// array elements are laid out inside the containing record
    pub const INLINE_ARRAY: u32 = 0x20;
    /// integer is signed
    pub const SIGNED: u32 = 0x200;
    pub const INT8: u32 = 0x2000;
    pub const INT16: u32 = 0x4000;
    pub const INT32: u32 = 0x8000;
    pub const INT64: u32 = 0x1_0000;
}
