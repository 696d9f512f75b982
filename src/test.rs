use crate::deserializer::Deserializer;
use crate::tag_reader::TagReader;
use crate::value::{IntValue, Value, ValueTree};
use crate::{read_sections, TagFile};

fn section(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(tag);
    out.extend_from_slice(payload);
    out
}

fn varint(value: u32) -> Vec<u8> {
    if value <= 0x7F {
        vec![value as u8]
    } else if value <= 0x3FFF {
        vec![0x80 | (value >> 8) as u8, value as u8]
    } else if value <= 0x1F_FFFF {
        vec![0xC0 | (value >> 16) as u8, (value >> 8) as u8, value as u8]
    } else {
        panic!("no encoding helper for {value:#X}");
    }
}

fn string_pool(tag: &[u8; 4], names: &[&str]) -> Vec<u8> {
    let mut payload = Vec::new();
    for name in names {
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
    }
    section(tag, &payload)
}

/// TNA1 payload: slot count, then one identity per live slot as
/// `(name index, [(param name index, param value)])`.
fn tna1(count: u32, identities: &[(u32, &[(u32, u32)])]) -> Vec<u8> {
    assert_eq!(identities.len() as u32, count - 1);
    let mut payload = varint(count);
    for (name, params) in identities {
        payload.extend(varint(*name));
        payload.extend(varint(params.len() as u32));
        for (param_name, value) in *params {
            payload.extend(varint(*param_name));
            payload.extend(varint(*value));
        }
    }
    section(b"TNA1", &payload)
}

// stream bits of the opts varint, in serialized order
const BIT_FORMAT: u32 = 1 << 0;
const BIT_SUBTYPE: u32 = 1 << 1;
const BIT_SIZE_ALIGN: u32 = 1 << 3;
const BIT_FIELDS: u32 = 1 << 5;

/// One TBDY body record; the chained payloads must be pushed in the
/// serialized order (format, subtype, size/align, fields).
struct Body(Vec<u8>);

impl Body {
    fn new(ordinal: u32, parent: u32, bits: u32) -> Self {
        let mut bytes = varint(ordinal);
        bytes.extend(varint(parent));
        bytes.extend(varint(bits));
        Body(bytes)
    }

    fn format(mut self, value: u32) -> Self {
        self.0.extend(varint(value));
        self
    }

    fn subtype(mut self, ordinal: u32) -> Self {
        self.0.extend(varint(ordinal));
        self
    }

    fn size_align(mut self, size: u32, align: u32) -> Self {
        self.0.extend(varint(size));
        self.0.extend(varint(align));
        self
    }

    /// `(name index, offset, type ordinal)` per field, flags zero
    fn fields(mut self, fields: &[(u32, u32, u32)]) -> Self {
        self.0.extend(varint(fields.len() as u32));
        for (name, offset, typ) in fields {
            self.0.extend(varint(*name));
            self.0.extend(varint(0));
            self.0.extend(varint(*offset));
            self.0.extend(varint(*typ));
        }
        self
    }

    fn bytes(self) -> Vec<u8> {
        self.0
    }
}

fn tbdy(bodies: &[Vec<u8>]) -> Vec<u8> {
    section(b"TBDY", &bodies.concat())
}

fn item_record(type_id: u32, flags: u8, offset: u32, count: u32) -> Vec<u8> {
    let mut out = ((type_id & 0x00FF_FFFF) | (u32::from(flags) << 24))
        .to_le_bytes()
        .to_vec();
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out
}

const ITEM_ARRAY: u8 = 0x20;

fn build_file(type_payload: &[u8], items: &[Vec<u8>], data: &[u8]) -> Vec<u8> {
    let inner = [
        section(b"SDKV", b"2015.2"),
        section(b"INDX", &section(b"ITEM", &items.concat())),
        section(b"TYPE", type_payload),
        section(b"DATA", data),
    ]
    .concat();
    section(b"TAG0", &inner)
}

/// A dictionary exercising every format kind:
///
///  1 hkInt32        int, signed, 32 bit
///  2 hkUint8        int, 8 bit
///  3 hkInt16        int, signed, 16 bit
///  4 hkUint64       int, 64 bit
///  5 hkBool
///  6 hkReal         f32
///  7 hkStringPtr
///  8 hkChar         int, 8 bit (string payload elements)
///  9 hkPair         record {a: hkInt32 @ 0, b: hkInt32 @ 4}, size 16 align 8
/// 10 hkNode         record {next: hkNode* @ 0}
/// 11 T*             pointer to hkNode
/// 12 hkVec4         inline array of 4 hkInt32
/// 13 hkScalars      record over every scalar kind
/// 14 hkIntAlias     typedef of hkInt32 (no format, parent carries it)
/// 15 hkAliasedRec   record {v: hkIntAlias @ 0}
/// 16 hkOpaque       opaque format
/// 17 T*             pointer to hkOpaque
/// 18 hkOther        record {c: hkInt32 @ 0}
/// 19 T*             pointer to hkPair
fn fixture_types() -> Vec<u8> {
    let tstr = string_pool(
        b"TSTR",
        &[
            "hkInt32",      // 0
            "hkUint8",      // 1
            "hkInt16",      // 2
            "hkUint64",     // 3
            "hkBool",       // 4
            "hkReal",       // 5
            "hkStringPtr",  // 6
            "hkChar",       // 7
            "hkPair",       // 8
            "hkNode",       // 9
            "T*",           // 10
            "hkVec4",       // 11
            "hkScalars",    // 12
            "hkIntAlias",   // 13
            "hkAliasedRec", // 14
            "hkOpaque",     // 15
            "hkOther",      // 16
            "tT",           // 17
        ],
    );
    let tna1 = tna1(
        20,
        &[
            (0, &[]),
            (1, &[]),
            (2, &[]),
            (3, &[]),
            (4, &[]),
            (5, &[]),
            (6, &[]),
            (7, &[]),
            (8, &[]),
            (9, &[]),
            (10, &[(17, 10)]),
            (11, &[]),
            (12, &[]),
            (13, &[]),
            (14, &[]),
            (15, &[]),
            (10, &[(17, 16)]),
            (16, &[]),
            (10, &[(17, 9)]),
        ],
    );
    let fstr = string_pool(
        b"FSTR",
        &[
            "a",      // 0
            "b",      // 1
            "next",   // 2
            "u8f",    // 3
            "i16f",   // 4
            "i32f",   // 5
            "u64f",   // 6
            "boolf",  // 7
            "floatf", // 8
            "strf",   // 9
            "vec",    // 10
            "v",      // 11
            "c",      // 12
        ],
    );
    let scalar = BIT_FORMAT | BIT_SIZE_ALIGN;
    let record = BIT_FORMAT | BIT_SIZE_ALIGN | BIT_FIELDS;
    let pointer = BIT_FORMAT | BIT_SUBTYPE | BIT_SIZE_ALIGN;
    let bodies = [
        Body::new(1, 0, scalar).format(0x8204).size_align(4, 4).bytes(),
        Body::new(2, 0, scalar).format(0x2004).size_align(1, 1).bytes(),
        Body::new(3, 0, scalar).format(0x4204).size_align(2, 2).bytes(),
        Body::new(4, 0, scalar)
            .format(0x10004)
            .size_align(8, 8)
            .bytes(),
        Body::new(5, 0, scalar).format(2).size_align(1, 1).bytes(),
        Body::new(6, 0, scalar).format(5).size_align(4, 4).bytes(),
        Body::new(7, 0, scalar).format(3).size_align(8, 8).bytes(),
        Body::new(8, 0, scalar).format(0x2004).size_align(1, 1).bytes(),
        Body::new(9, 0, record)
            .format(7)
            .size_align(16, 8)
            .fields(&[(0, 0, 1), (1, 4, 1)])
            .bytes(),
        Body::new(10, 0, record)
            .format(7)
            .size_align(8, 8)
            .fields(&[(2, 0, 11)])
            .bytes(),
        Body::new(11, 0, pointer)
            .format(6)
            .subtype(10)
            .size_align(8, 8)
            .bytes(),
        Body::new(12, 0, pointer)
            .format(0x28)
            .subtype(1)
            .size_align(16, 4)
            .bytes(),
        Body::new(13, 0, record)
            .format(7)
            .size_align(48, 8)
            .fields(&[
                (3, 0, 2),
                (4, 2, 3),
                (5, 4, 1),
                (6, 8, 4),
                (7, 16, 5),
                (8, 20, 6),
                (9, 24, 7),
                (10, 32, 12),
            ])
            .bytes(),
        Body::new(14, 1, 0).bytes(),
        Body::new(15, 0, record)
            .format(7)
            .size_align(8, 4)
            .fields(&[(11, 0, 14)])
            .bytes(),
        Body::new(16, 0, BIT_FORMAT).format(1).bytes(),
        Body::new(17, 0, pointer)
            .format(6)
            .subtype(16)
            .size_align(8, 8)
            .bytes(),
        Body::new(18, 0, record)
            .format(7)
            .size_align(4, 4)
            .fields(&[(12, 0, 1)])
            .bytes(),
        Body::new(19, 0, pointer)
            .format(6)
            .subtype(9)
            .size_align(8, 8)
            .bytes(),
    ];
    [tstr, tna1, fstr, tbdy(&bodies)].concat()
}

fn decode(bytes: &[u8]) -> ValueTree {
    let file = TagFile::read(bytes).unwrap();
    file.deserialize_root().unwrap()
}

#[test]
fn section_framing() {
    #[rustfmt::skip]
    let bytes = [
        0x00, 0x00, 0x00, 0x0C, // size 12, flags 0
        b'T', b'A', b'G', b'0',
        0xFF, 0xFF, 0xFF, 0xFF, // 4 payload bytes
        0xC0, 0x00, 0x00, 0x08, // size 8, flags 3
        b'P', b'A', b'D', b'0',
    ];
    let mut seen = Vec::new();
    read_sections(&mut TagReader::new(&bytes), |header, sub| {
        seen.push((header.tag, header.flags, sub.remaining()));
        Ok(())
    })
    .unwrap();
    assert_eq!(seen, [(*b"TAG0", 0, 4), (*b"PAD0", 3, 0)]);
}

#[test]
fn section_size_must_cover_the_header() {
    let bytes = [0x00, 0x00, 0x00, 0x04, b'B', b'A', b'D', b'0'];
    assert!(read_sections(&mut TagReader::new(&bytes), |_, _| Ok(())).is_err());
}

#[test]
fn scalars_decode() {
    let mut data = vec![0u8; 48];
    data[0] = 0xFF;
    data[2..4].copy_from_slice(&(-2i16).to_le_bytes());
    data[4..8].copy_from_slice(&42i32.to_le_bytes());
    data[8..16].copy_from_slice(&1u64.to_le_bytes());
    data[16] = 1;
    data[20..24].copy_from_slice(&1.5f32.to_le_bytes());
    data[24..32].copy_from_slice(&2u64.to_le_bytes()); // strf -> item 2
    for (i, v) in [1i32, 2, 3, 4].iter().enumerate() {
        data[32 + i * 4..36 + i * 4].copy_from_slice(&v.to_le_bytes());
    }
    data.extend_from_slice(b"hello\0");

    let bytes = build_file(
        &fixture_types(),
        &[
            item_record(0, 0, 0, 0),
            item_record(13, 0, 0, 1),
            item_record(8, ITEM_ARRAY, 48, 6),
        ],
        &data,
    );
    let file = TagFile::read(&bytes).unwrap();
    assert_eq!(file.sdk_version.as_deref(), Some("2015.2"));

    let tree = file.deserialize_root().unwrap();
    let root = tree.root().unwrap();
    let field = |name| tree.field(root, name).unwrap();

    assert_eq!(tree.node(field("u8f")), &Value::Int(IntValue::U8(255)));
    assert_eq!(tree.node(field("i16f")), &Value::Int(IntValue::I16(-2)));
    assert_eq!(tree.node(field("i32f")), &Value::Int(IntValue::I32(42)));
    assert_eq!(tree.node(field("u64f")), &Value::Int(IntValue::U64(1)));
    assert_eq!(tree.node(field("boolf")), &Value::Bool(true));
    assert_eq!(tree.node(field("floatf")), &Value::Float(1.5));
    assert_eq!(tree.node(field("strf")), &Value::String("hello".into()));

    let vec = tree.elements(field("vec")).unwrap();
    assert_eq!(vec.len(), 4);
    for (i, element) in vec.iter().enumerate() {
        assert_eq!(tree.node(*element), &Value::Int(IntValue::I32(i as i32 + 1)));
    }

    // field iteration order matches declaration order
    let Value::Record(fields) = tree.node(root) else {
        panic!("root is not a record");
    };
    let names: Vec<_> = fields.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        ["u8f", "i16f", "i32f", "u64f", "boolf", "floatf", "strf", "vec"]
    );
}

#[test]
fn records_align_and_keep_their_stride() {
    // array of two 16-byte records at a misaligned item offset: the first
    // lands on the next 8-byte boundary, the second one stride later
    let mut data = vec![0u8; 40];
    data[8..12].copy_from_slice(&1u32.to_le_bytes());
    data[12..16].copy_from_slice(&2u32.to_le_bytes());
    data[24..28].copy_from_slice(&3u32.to_le_bytes());
    data[28..32].copy_from_slice(&4u32.to_le_bytes());

    let bytes = build_file(
        &fixture_types(),
        &[item_record(0, 0, 0, 0), item_record(9, ITEM_ARRAY, 3, 2)],
        &data,
    );
    let tree = decode(&bytes);
    let elements = tree.elements(tree.root().unwrap()).unwrap().to_vec();
    assert_eq!(elements.len(), 2);

    let pair = |record, expected_a: i32, expected_b: i32| {
        assert_eq!(
            tree.node(tree.field(record, "a").unwrap()),
            &Value::Int(IntValue::I32(expected_a))
        );
        assert_eq!(
            tree.node(tree.field(record, "b").unwrap()),
            &Value::Int(IntValue::I32(expected_b))
        );
    };
    pair(elements[0], 1, 2);
    pair(elements[1], 3, 4);
}

#[test]
fn pointer_cycle_resolves_to_the_same_nodes() {
    let mut data = vec![0u8; 16];
    data[0..8].copy_from_slice(&2u64.to_le_bytes());
    data[8..16].copy_from_slice(&1u64.to_le_bytes());

    let bytes = build_file(
        &fixture_types(),
        &[
            item_record(0, 0, 0, 0),
            item_record(10, 0, 0, 1),
            item_record(10, 0, 8, 1),
        ],
        &data,
    );
    let tree = decode(&bytes);
    let first = tree.root().unwrap();
    let second = tree.field(first, "next").unwrap();
    assert_ne!(first, second);
    assert_eq!(tree.field(second, "next"), Some(first));

    // and the JSON rendering of the cycle stays finite
    let json = tree.to_json();
    assert!(json["next"]["next"]["$cycle"].is_number());
}

#[test]
fn items_decode_once() {
    let mut data = vec![0u8; 16];
    data[0..8].copy_from_slice(&2u64.to_le_bytes());
    data[8..16].copy_from_slice(&1u64.to_le_bytes());

    let bytes = build_file(
        &fixture_types(),
        &[
            item_record(0, 0, 0, 0),
            item_record(10, 0, 0, 1),
            item_record(10, 0, 8, 1),
        ],
        &data,
    );
    let file = TagFile::read(&bytes).unwrap();
    let mut de = Deserializer::new(file.data(), &file.types, &file.items);
    let first = de.deserialize_item(2).unwrap();
    let second = de.deserialize_item(2).unwrap();
    assert_eq!(first, second);
}

#[test]
fn null_pointers_decode_to_null() {
    let data = 0u64.to_le_bytes();
    let bytes = build_file(
        &fixture_types(),
        &[item_record(0, 0, 0, 0), item_record(10, 0, 0, 1)],
        &data,
    );
    let tree = decode(&bytes);
    let next = tree.field(tree.root().unwrap(), "next").unwrap();
    assert_eq!(tree.node(next), &Value::Null);
}

#[test]
fn inline_array_fills_the_declared_size() {
    let mut data = vec![0u8; 16];
    for (i, v) in [10i32, 20, 30, 40].iter().enumerate() {
        data[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
    }
    let bytes = build_file(
        &fixture_types(),
        &[item_record(0, 0, 0, 0), item_record(12, 0, 0, 1)],
        &data,
    );
    let tree = decode(&bytes);
    let elements = tree.elements(tree.root().unwrap()).unwrap();
    assert_eq!(elements.len(), 4);
    assert_eq!(tree.node(elements[3]), &Value::Int(IntValue::I32(40)));
}

#[test]
fn typedef_fields_resolve_through_the_parent_chain() {
    let mut data = vec![0u8; 8];
    data[0..4].copy_from_slice(&7i32.to_le_bytes());
    let bytes = build_file(
        &fixture_types(),
        &[item_record(0, 0, 0, 0), item_record(15, 0, 0, 1)],
        &data,
    );
    let tree = decode(&bytes);
    let v = tree.field(tree.root().unwrap(), "v").unwrap();
    assert_eq!(tree.node(v), &Value::Int(IntValue::I32(7)));
}

#[test]
fn pointer_type_mismatch_is_fatal() {
    let mut data = vec![0u8; 12];
    data[0..8].copy_from_slice(&2u64.to_le_bytes());
    data[8..12].copy_from_slice(&5i32.to_le_bytes());
    let bytes = build_file(
        &fixture_types(),
        &[
            item_record(0, 0, 0, 0),
            item_record(19, 0, 0, 1), // expects a hkPair
            item_record(18, 0, 8, 1), // is a hkOther
        ],
        &data,
    );
    let file = TagFile::read(&bytes).unwrap();
    let err = file.deserialize_root().unwrap_err();
    assert!(format!("{err:#}").contains("pointer type mismatch"));
}

#[test]
fn opaque_element_types_accept_any_item() {
    let mut data = vec![0u8; 12];
    data[0..8].copy_from_slice(&2u64.to_le_bytes());
    data[8..12].copy_from_slice(&5i32.to_le_bytes());
    let bytes = build_file(
        &fixture_types(),
        &[
            item_record(0, 0, 0, 0),
            item_record(17, 0, 0, 1), // opaque element type
            item_record(18, 0, 8, 1),
        ],
        &data,
    );
    let tree = decode(&bytes);
    let c = tree.field(tree.root().unwrap(), "c").unwrap();
    assert_eq!(tree.node(c), &Value::Int(IntValue::I32(5)));
}

#[test]
fn duplicate_sections_are_fatal() {
    let types = fixture_types();
    let items = [item_record(0, 0, 0, 0)];

    let two_types = section(
        b"TAG0",
        &[
            section(b"INDX", &section(b"ITEM", &items.concat())),
            section(b"TYPE", &types),
            section(b"TYPE", &types),
            section(b"DATA", &[]),
        ]
        .concat(),
    );
    let err = TagFile::read(&two_types).unwrap_err();
    assert!(format!("{err:#}").contains("duplicate TYPE"));

    let pool = string_pool(b"TSTR", &["x"]);
    let two_tstr = section(
        b"TAG0",
        &[
            section(b"INDX", &section(b"ITEM", &items.concat())),
            section(
                b"TYPE",
                &[
                    pool.clone(),
                    pool,
                    tna1(2, &[(0, &[])]),
                    string_pool(b"FSTR", &[]),
                ]
                .concat(),
            ),
            section(b"DATA", &[]),
        ]
        .concat(),
    );
    let err = TagFile::read(&two_tstr).unwrap_err();
    assert!(format!("{err:#}").contains("duplicate TSTR"));

    let two_item = section(
        b"TAG0",
        &[
            section(
                b"INDX",
                &[
                    section(b"ITEM", &items.concat()),
                    section(b"ITEM", &items.concat()),
                ]
                .concat(),
            ),
            section(b"TYPE", &fixture_types()),
            section(b"DATA", &[]),
        ]
        .concat(),
    );
    let err = TagFile::read(&two_item).unwrap_err();
    assert!(format!("{err:#}").contains("duplicate ITEM"));
}

#[test]
fn subtype_without_format_is_fatal() {
    let type_payload = [
        string_pool(b"TSTR", &["x"]),
        tna1(2, &[(0, &[])]),
        string_pool(b"FSTR", &[]),
        tbdy(&[Body::new(1, 0, BIT_SUBTYPE).bytes()]),
    ]
    .concat();
    let bytes = build_file(&type_payload, &[item_record(0, 0, 0, 0)], &[]);
    let err = TagFile::read(&bytes).unwrap_err();
    assert!(format!("{err:#}").contains("subtype but no format"));
}

#[test]
fn interpreted_sections_are_required() {
    let no_data = section(
        b"TAG0",
        &[
            section(b"INDX", &section(b"ITEM", &item_record(0, 0, 0, 0))),
            section(b"TYPE", &fixture_types()),
        ]
        .concat(),
    );
    let err = TagFile::read(&no_data).unwrap_err();
    assert!(format!("{err:#}").contains("missing DATA"));

    let no_root = section(b"NOPE", &[]);
    let err = TagFile::read(&no_root).unwrap_err();
    assert!(format!("{err:#}").contains("missing TAG0"));
}

#[test]
fn unknown_sections_are_skipped() {
    let inner = [
        section(b"XXXX", b"junk payload"),
        section(b"SDKV", b"2015.2"),
        section(b"INDX", &section(b"ITEM", &item_record(0, 0, 0, 0))),
        section(b"TYPE", &fixture_types()),
        section(b"DATA", &[]),
    ]
    .concat();
    let bytes = [section(b"PAD0", b"outer junk"), section(b"TAG0", &inner)].concat();
    let file = TagFile::read(&bytes).unwrap();
    assert_eq!(file.items.len(), 1);
}

#[test]
fn missing_root_item_is_fatal() {
    let bytes = build_file(&fixture_types(), &[item_record(0, 0, 0, 0)], &[]);
    let file = TagFile::read(&bytes).unwrap();
    assert!(file.deserialize_root().is_err());
}

#[test]
fn item_type_references_are_bounds_checked() {
    let bytes = build_file(
        &fixture_types(),
        &[item_record(0, 0, 0, 0), item_record(999, 0, 0, 1)],
        &[],
    );
    assert!(TagFile::read(&bytes).unwrap_err().to_string().contains("out of range"));
}

#[test]
fn rendered_pointer_names_use_their_template() {
    let bytes = build_file(
        &fixture_types(),
        &[item_record(0, 0, 0, 0)],
        &[],
    );
    let file = TagFile::read(&bytes).unwrap();
    let named: Vec<_> = file
        .types
        .iter()
        .map(|(id, _)| file.types.render_name(id))
        .collect();
    assert!(named.contains(&"hkNode*".to_owned()));
    assert!(named.contains(&"hkPair*".to_owned()));
}
