use serde::Serialize;
use serde_json::json;

/// Identity of a node in a [ValueTree]. Two lookups of the same decoded
/// item yield the same id, which is what makes cycles in the object graph
/// representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ValueId(u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IntValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
}

/// One node of the decoded value tree. Sequences and records refer to
/// their children by [ValueId], so shared nodes and cycles cost nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(IntValue),
    Float(f32),
    String(String),
    Array(Vec<ValueId>),
    /// field iteration order matches the declared field order
    Record(Vec<(String, ValueId)>),
}

/// Arena of decoded values. Node 0 is the canonical null.
#[derive(Debug, Clone)]
pub struct ValueTree {
    nodes: Vec<Value>,
    root: Option<ValueId>,
}

impl ValueTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Value::Null],
            root: None,
        }
    }

    pub fn null(&self) -> ValueId {
        ValueId(0)
    }

    pub fn root(&self) -> Option<ValueId> {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: ValueId) {
        self.root = Some(root);
    }

    pub(crate) fn alloc(&mut self, value: Value) -> ValueId {
        let id = ValueId(self.nodes.len() as u32);
        self.nodes.push(value);
        id
    }

    pub(crate) fn set(&mut self, id: ValueId, value: Value) {
        self.nodes[id.index()] = value;
    }

    pub fn node(&self, id: ValueId) -> &Value {
        &self.nodes[id.index()]
    }

    pub(crate) fn push_element(&mut self, array: ValueId, element: ValueId) {
        match &mut self.nodes[array.index()] {
            Value::Array(elements) => elements.push(element),
            _ => unreachable!("push_element on a non-array node"),
        }
    }

    pub(crate) fn push_field(&mut self, record: ValueId, name: String, value: ValueId) {
        match &mut self.nodes[record.index()] {
            Value::Record(fields) => fields.push((name, value)),
            _ => unreachable!("push_field on a non-record node"),
        }
    }

    /// Field of a record node, by name.
    pub fn field(&self, record: ValueId, name: &str) -> Option<ValueId> {
        match self.node(record) {
            Value::Record(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, id)| *id),
            _ => None,
        }
    }

    /// Elements of an array node.
    pub fn elements(&self, array: ValueId) -> Option<&[ValueId]> {
        match self.node(array) {
            Value::Array(elements) => Some(elements),
            _ => None,
        }
    }

    /// Render the tree rooted at [ValueTree::root] as JSON. Back-edges in
    /// the object graph render as `{"$cycle": <node>}` so the output stays
    /// finite.
    pub fn to_json(&self) -> serde_json::Value {
        match self.root {
            Some(root) => self.node_to_json(root, &mut vec![false; self.nodes.len()]),
            None => serde_json::Value::Null,
        }
    }

    fn node_to_json(&self, id: ValueId, on_stack: &mut Vec<bool>) -> serde_json::Value {
        if on_stack[id.index()] {
            return json!({ "$cycle": id.0 });
        }
        match self.node(id) {
            Value::Null => serde_json::Value::Null,
            Value::Bool(value) => (*value).into(),
            Value::Int(value) => match *value {
                IntValue::I8(v) => v.into(),
                IntValue::U8(v) => v.into(),
                IntValue::I16(v) => v.into(),
                IntValue::U16(v) => v.into(),
                IntValue::I32(v) => v.into(),
                IntValue::U32(v) => v.into(),
                IntValue::I64(v) => v.into(),
                IntValue::U64(v) => v.into(),
            },
            Value::Float(value) => (*value).into(),
            Value::String(value) => value.clone().into(),
            Value::Array(elements) => {
                on_stack[id.index()] = true;
                let rendered = elements
                    .iter()
                    .map(|element| self.node_to_json(*element, on_stack))
                    .collect();
                on_stack[id.index()] = false;
                serde_json::Value::Array(rendered)
            }
            Value::Record(fields) => {
                on_stack[id.index()] = true;
                let rendered = fields
                    .iter()
                    .map(|(name, value)| (name.clone(), self.node_to_json(*value, on_stack)))
                    .collect();
                on_stack[id.index()] = false;
                serde_json::Value::Object(rendered)
            }
        }
    }
}

impl Default for ValueTree {
    fn default() -> Self {
        Self::new()
    }
}
