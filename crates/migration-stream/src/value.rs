use std::fmt::Write as _;

use serde_json::{Map, Value as Json};

/// A decoded fixed-width integer, kept in both interpretations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Integer {
    /// Width on the wire, in bytes (1..=8).
    pub size: usize,
    pub signed: i64,
    pub unsigned: u64,
}

impl Integer {
    pub fn from_be_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > 8 {
            return None;
        }
        let unsigned = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        Some(Self::from_raw(bytes.len(), unsigned))
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > 8 {
            return None;
        }
        let unsigned = bytes
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        Some(Self::from_raw(bytes.len(), unsigned))
    }

    fn from_raw(size: usize, unsigned: u64) -> Self {
        let shift = 64 - 8 * size as u32;
        let signed = ((unsigned << shift) as i64) >> shift;
        Self {
            size,
            signed,
            unsigned,
        }
    }

    fn hex(&self) -> String {
        format!("{:#0width$x}", self.unsigned, width = self.size * 2 + 2)
    }
}

/// One decoded node of a section's state tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(Integer),
    UInt(Integer),
    /// Capability names, annotations and other text.
    Str(String),
    NullPtr,
    Bytes(Vec<u8>),
    Struct(Fields),
    /// Repeated occurrences of one field name within a struct.
    List(Vec<Value>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(i) | Value::Int(i) => Some(i.unsigned),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::UInt(i) | Value::Int(i) => Some(i.signed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_fields(&self) -> Option<&Fields> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Renders the tree the way `analyze-migration` prints it: integers as zero-padded hex of
    /// their width, blobs as space-separated hex pairs.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) if i.signed < 0 => Json::String(format!("{} ({})", i.hex(), i.signed)),
            Value::Int(i) | Value::UInt(i) => Json::String(i.hex()),
            Value::Str(s) => Json::String(s.clone()),
            Value::NullPtr => Json::String("nullptr".to_string()),
            Value::Bytes(bytes) => Json::String(hex_pairs(bytes)),
            Value::Struct(fields) => fields.to_json(),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
        }
    }
}

pub(crate) fn hex_pairs(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (idx, b) in bytes.iter().enumerate() {
        if idx != 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Insertion-ordered `name -> value` mapping of a decoded struct.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, Value)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.0.iter_mut().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Sets `name`, replacing any previous value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.get_mut(&name) {
            Some(slot) => *slot = value,
            None => self.0.push((name, value)),
        }
    }

    /// Appends a field occurrence. A name seen before turns into a list holding every occurrence
    /// in stream order (QEMU splits arrays into several segments sharing one name).
    pub fn accumulate(&mut self, name: &str, value: Value) {
        match self.get_mut(name) {
            None => self.0.push((name.to_string(), value)),
            Some(Value::List(items)) => items.push(value),
            Some(slot) => {
                let first = std::mem::replace(slot, Value::List(Vec::new()));
                *slot = Value::List(vec![first, value]);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        for (name, value) in &self.0 {
            map.insert(name.clone(), value.to_json());
        }
        Json::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uint(v: u64) -> Value {
        Value::UInt(Integer::from_be_bytes(&v.to_be_bytes()[4..]).unwrap())
    }

    #[test]
    fn sign_extension_keeps_both_forms() {
        let i = Integer::from_be_bytes(&[0xff, 0xfe]).unwrap();
        assert_eq!(i.size, 2);
        assert_eq!(i.unsigned, 0xfffe);
        assert_eq!(i.signed, -2);

        let le = Integer::from_le_bytes(&[0x2a, 0, 0, 0]).unwrap();
        assert_eq!(le.signed, 42);
        assert!(Integer::from_be_bytes(&[0; 9]).is_none());
    }

    #[test]
    fn repeated_names_become_a_list() {
        let mut fields = Fields::new();
        fields.accumulate("a", uint(1));
        fields.accumulate("b", uint(9));
        fields.accumulate("a", uint(2));
        fields.accumulate("a", uint(3));

        assert_eq!(fields.len(), 2);
        let a = fields.get("a").and_then(Value::as_list).unwrap();
        let got: Vec<_> = a.iter().filter_map(Value::as_u64).collect();
        assert_eq!(got, [1, 2, 3]);
    }

    #[test]
    fn json_rendering_matches_field_widths() {
        let mut fields = Fields::new();
        fields.insert("x", uint(42));
        fields.insert(
            "neg",
            Value::Int(Integer::from_be_bytes(&[0xff, 0xff, 0xff, 0xff]).unwrap()),
        );
        fields.insert("blob", Value::Bytes(vec![0xde, 0xad, 0x01]));
        fields.insert("p", Value::NullPtr);
        fields.insert("on", Value::Bool(true));

        let json = fields.to_json();
        assert_eq!(json["x"], "0x0000002a");
        assert_eq!(json["neg"], "0xffffffff (-1)");
        assert_eq!(json["blob"], "de ad 01");
        assert_eq!(json["p"], "nullptr");
        assert_eq!(json["on"], true);

        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["x", "neg", "blob", "p", "on"]);
    }
}
