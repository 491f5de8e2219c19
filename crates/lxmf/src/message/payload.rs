use std::collections::BTreeMap;

use rmpv::Value;

use crate::error::LxmfError;

/// The `fields` value space (spec §4.1, §9): integer, byte string, list, or
/// map of the same, modeled as a tagged sum type rather than `rmpv::Value`
/// directly so callers get typed constructors/accessors while still
/// round-tripping through msgpack without losing type fidelity (an empty
/// binary string is not an absent field; a UTF-8 string is never emitted as
/// msgpack `str`, only `bin`, per the wire codec's field serialization
/// rule).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bin(Vec<u8>),
    Int(i64),
    List(Vec<FieldValue>),
    Map(BTreeMap<i64, FieldValue>),
}

impl FieldValue {
    pub fn string(s: impl Into<String>) -> Self {
        FieldValue::Bin(s.into().into_bytes())
    }

    pub fn as_bin(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bin(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bin().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(l) => Some(l),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            FieldValue::Bin(b) => Value::Binary(b.clone()),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            FieldValue::Map(map) => Value::Map(
                map.iter().map(|(k, v)| (Value::from(*k), v.to_value())).collect(),
            ),
        }
    }

    fn from_value(value: &Value) -> Result<Self, LxmfError> {
        match value {
            Value::Binary(b) => Ok(FieldValue::Bin(b.clone())),
            Value::String(s) => Ok(FieldValue::Bin(
                s.as_str().map(|s| s.as_bytes().to_vec()).unwrap_or_else(|| s.as_bytes().to_vec()),
            )),
            Value::Integer(i) => i
                .as_i64()
                .map(FieldValue::Int)
                .ok_or_else(|| LxmfError::StructuralDecode("field integer out of range".into())),
            Value::Array(items) => {
                items.iter().map(Self::from_value).collect::<Result<_, _>>().map(FieldValue::List)
            }
            Value::Map(entries) => {
                let mut map = BTreeMap::new();
                for (k, v) in entries {
                    let key = k.as_i64().ok_or_else(|| {
                        LxmfError::StructuralDecode("field map key must be an integer".into())
                    })?;
                    map.insert(key, Self::from_value(v)?);
                }
                Ok(FieldValue::Map(map))
            }
            other => Err(LxmfError::StructuralDecode(format!(
                "unsupported field value type: {other:?}"
            ))),
        }
    }
}

/// The packed payload (spec §4.1): `msgpack([timestamp, title, content,
/// fields])`. `title`/`content` are raw byte strings, never UTF-8-tagged.
/// `fields` is always emitted as a map (empty when absent, never omitted).
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub timestamp: f64,
    pub title: Vec<u8>,
    pub content: Vec<u8>,
    pub fields: BTreeMap<i64, FieldValue>,
}

impl Payload {
    pub fn new(timestamp: f64, title: Vec<u8>, content: Vec<u8>) -> Self {
        Self { timestamp, title, content, fields: BTreeMap::new() }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, LxmfError> {
        let fields_value = Value::Map(
            self.fields.iter().map(|(k, v)| (Value::from(*k), v.to_value())).collect(),
        );
        let array = Value::Array(vec![
            Value::F64(self.timestamp),
            Value::Binary(self.title.clone()),
            Value::Binary(self.content.clone()),
            fields_value,
        ]);
        let mut out = Vec::new();
        rmpv::encode::write_value(&mut out, &array)
            .map_err(|e| LxmfError::Encode(e.to_string()))?;
        Ok(out)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, LxmfError> {
        let value = rmpv::decode::read_value(&mut &bytes[..])
            .map_err(|e| LxmfError::StructuralDecode(e.to_string()))?;
        let Value::Array(items) = value else {
            return Err(LxmfError::StructuralDecode("packed payload is not an array".into()));
        };
        if items.len() != 4 {
            return Err(LxmfError::StructuralDecode(format!(
                "packed payload arity {} != 4",
                items.len()
            )));
        }
        let timestamp = items[0]
            .as_f64()
            .ok_or_else(|| LxmfError::StructuralDecode("timestamp is not a float64".into()))?;
        let title = items[1]
            .as_slice()
            .ok_or_else(|| LxmfError::StructuralDecode("title is not binary".into()))?
            .to_vec();
        let content = items[2]
            .as_slice()
            .ok_or_else(|| LxmfError::StructuralDecode("content is not binary".into()))?
            .to_vec();
        let fields = match &items[3] {
            Value::Map(entries) => {
                let mut map = BTreeMap::new();
                for (k, v) in entries {
                    let key = k.as_i64().ok_or_else(|| {
                        LxmfError::StructuralDecode("fields key must be an integer".into())
                    })?;
                    map.insert(key, FieldValue::from_value(v)?);
                }
                map
            }
            Value::Nil => BTreeMap::new(),
            _ => return Err(LxmfError::StructuralDecode("fields is not a map".into())),
        };
        Ok(Self { timestamp, title, content, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_empty_fields_as_map_not_omission() {
        let payload = Payload::new(1700000000.5, b"hi".to_vec(), b"body".to_vec());
        let packed = payload.to_msgpack().unwrap();
        let decoded = Payload::from_msgpack(&packed).unwrap();
        assert_eq!(decoded, payload);
        assert!(decoded.fields.is_empty());
    }

    #[test]
    fn timestamp_round_trips_bit_exact() {
        let timestamp = 1712345678.123456;
        let payload = Payload::new(timestamp, Vec::new(), Vec::new());
        let decoded = Payload::from_msgpack(&payload.to_msgpack().unwrap()).unwrap();
        assert_eq!(decoded.timestamp.to_bits(), timestamp.to_bits());
    }

    #[test]
    fn unicode_title_and_content_round_trip() {
        let mut payload =
            Payload::new(1.0, "中文 / Русский".as_bytes().to_vec(), "Hello 🚀".as_bytes().to_vec());
        payload.fields.insert(9, FieldValue::string("ok"));
        let decoded = Payload::from_msgpack(&payload.to_msgpack().unwrap()).unwrap();
        assert_eq!(decoded.title, payload.title);
        assert_eq!(decoded.content, payload.content);
        assert_eq!(decoded.fields.get(&9).unwrap().as_str(), Some("ok"));
    }

    #[test]
    fn nested_file_attachments_field_round_trips_binary_exactly() {
        use sha2::{Digest, Sha256};

        let mut rng_bytes = vec![0u8; 1024];
        for (i, byte) in rng_bytes.iter_mut().enumerate() {
            *byte = (i * 37 % 251) as u8;
        }
        let attachments = FieldValue::List(vec![
            FieldValue::List(vec![FieldValue::string("readme.txt"), FieldValue::Bin(b"Hello".to_vec())]),
            FieldValue::List(vec![
                FieldValue::string("data.bin"),
                FieldValue::Bin(rng_bytes.clone()),
            ]),
        ]);
        let mut payload = Payload::new(2.0, Vec::new(), Vec::new());
        payload.fields.insert(crate::constants::FIELD_FILE_ATTACHMENTS as i64, attachments);

        let decoded = Payload::from_msgpack(&payload.to_msgpack().unwrap()).unwrap();
        let list = decoded.fields[&(crate::constants::FIELD_FILE_ATTACHMENTS as i64)]
            .as_list()
            .unwrap();
        let second = list[1].as_list().unwrap();
        assert_eq!(second[0].as_str(), Some("data.bin"));
        let recovered_bin = second[1].as_bin().unwrap();
        assert_eq!(Sha256::digest(recovered_bin).as_slice(), Sha256::digest(&rng_bytes).as_slice());
    }

    #[test]
    fn rejects_wrong_arity() {
        let array = Value::Array(vec![Value::F64(1.0), Value::Binary(vec![]), Value::Binary(vec![])]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &array).unwrap();
        assert!(Payload::from_msgpack(&bytes).is_err());
    }
}
