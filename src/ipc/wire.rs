//! Translation between [`Variant`] and the transport's native value format.
//!
//! [`WireValue`] is what travels on the socket. Every wire value reports a
//! runtime type string in signature grammar; decoding parses that string
//! first, so a value whose shape cannot be described by a [`TypeSignature`]
//! is rejected before any [`Variant`] is built.
//!
//! Dicts are always sent as [`WireValue::Dict`]. Some peers send them as an
//! array of two-field tuples instead. [`from_wire`] leaves such arrays alone;
//! [`from_wire_as`] folds them into a dict wherever the declared type asks
//! for one, at any depth.

use super::signature::{InvalidType, Kind, Primitive, TypeSignature};
use super::variant::{Variant, VariantDict};
use serde::{Deserialize, Serialize};

/// A value in the transport's native representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum WireValue {
    #[serde(rename = "int16")]
    Int16(i16),
    #[serde(rename = "uint16")]
    UInt16(u16),
    #[serde(rename = "int32")]
    Int32(i32),
    #[serde(rename = "uint32")]
    UInt32(u32),
    #[serde(rename = "int64")]
    Int64(i64),
    #[serde(rename = "uint64")]
    UInt64(u64),
    #[serde(rename = "double")]
    Double(f64),
    #[serde(rename = "byte")]
    Byte(u8),
    #[serde(rename = "boolean")]
    Boolean(bool),
    #[serde(rename = "string")]
    String(String),
    #[serde(rename = "signature")]
    Signature(String),
    #[serde(rename = "object_path")]
    ObjectPath(String),
    /// `element` is the signature text of every item.
    #[serde(rename = "array")]
    Array {
        element: String,
        items: Vec<WireValue>,
    },
    #[serde(rename = "tuple")]
    Tuple(Vec<WireValue>),
    #[serde(rename = "dict")]
    Dict {
        key: String,
        value: String,
        entries: Vec<(WireValue, WireValue)>,
    },
}

impl WireValue {
    /// The runtime type string, in signature grammar.
    pub fn type_string(&self) -> String {
        let mut out = String::new();
        self.write_type(&mut out);
        out
    }

    fn write_type(&self, out: &mut String) {
        match self {
            WireValue::Int16(_) => out.push('n'),
            WireValue::UInt16(_) => out.push('q'),
            WireValue::Int32(_) => out.push('i'),
            WireValue::UInt32(_) => out.push('u'),
            WireValue::Int64(_) => out.push('x'),
            WireValue::UInt64(_) => out.push('t'),
            WireValue::Double(_) => out.push('d'),
            WireValue::Byte(_) => out.push('y'),
            WireValue::Boolean(_) => out.push('b'),
            WireValue::String(_) => out.push('s'),
            WireValue::Signature(_) => out.push('g'),
            WireValue::ObjectPath(_) => out.push('o'),
            WireValue::Array { element, .. } => {
                out.push('a');
                out.push_str(element);
            }
            WireValue::Tuple(items) => {
                out.push('(');
                for item in items {
                    item.write_type(out);
                }
                out.push(')');
            }
            WireValue::Dict { key, value, .. } => {
                out.push('{');
                out.push_str(key);
                out.push_str(value);
                out.push('}');
            }
        }
    }
}

/// Encode a variant. Total for every validly constructed variant.
pub fn to_wire(variant: &Variant) -> WireValue {
    match variant.kind() {
        Kind::Primitive(p) => primitive_to_wire(variant, p),
        Kind::Array => WireValue::Array {
            element: variant
                .signature()
                .array_type()
                .map(|t| t.to_string())
                .unwrap_or_default(),
            items: variant.as_array().unwrap_or_default().iter().map(to_wire).collect(),
        },
        Kind::Struct => {
            WireValue::Tuple(variant.as_tuple().unwrap_or_default().iter().map(to_wire).collect())
        }
        Kind::Dict => {
            let (key, value) = match variant.signature().dict_type() {
                Ok((k, v)) => (k.to_string(), v.to_string()),
                Err(_) => (String::new(), String::new()),
            };
            let entries = match variant.as_dict() {
                Ok(entries) => entries.iter().map(|(k, v)| (to_wire(k), to_wire(v))).collect(),
                Err(_) => Vec::new(),
            };
            WireValue::Dict {
                key,
                value,
                entries,
            }
        }
    }
}

fn primitive_to_wire(variant: &Variant, kind: Primitive) -> WireValue {
    let text = || variant.as_str().unwrap_or_default().to_string();
    match kind {
        Primitive::Int16 => WireValue::Int16(variant.as_int16().unwrap_or_default()),
        Primitive::UInt16 => WireValue::UInt16(variant.as_uint16().unwrap_or_default()),
        Primitive::Int32 => WireValue::Int32(variant.as_int32().unwrap_or_default()),
        Primitive::UInt32 => WireValue::UInt32(variant.as_uint32().unwrap_or_default()),
        Primitive::Int64 => WireValue::Int64(variant.as_int64().unwrap_or_default()),
        Primitive::UInt64 => WireValue::UInt64(variant.as_uint64().unwrap_or_default()),
        Primitive::Double => WireValue::Double(variant.as_double().unwrap_or_default()),
        Primitive::Byte => WireValue::Byte(variant.as_byte().unwrap_or_default()),
        Primitive::Boolean => WireValue::Boolean(variant.as_bool().unwrap_or_default()),
        Primitive::String => WireValue::String(text()),
        Primitive::Signature => WireValue::Signature(text()),
        Primitive::ObjectPath => WireValue::ObjectPath(text()),
    }
}

/// Decode a wire value exactly as sent.
pub fn from_wire(wire: &WireValue) -> Result<Variant, InvalidType> {
    TypeSignature::parse(&wire.type_string())?;
    decode(wire)
}

fn decode(wire: &WireValue) -> Result<Variant, InvalidType> {
    Ok(match wire {
        WireValue::Int16(v) => Variant::from(*v),
        WireValue::UInt16(v) => Variant::from(*v),
        WireValue::Int32(v) => Variant::from(*v),
        WireValue::UInt32(v) => Variant::from(*v),
        WireValue::Int64(v) => Variant::from(*v),
        WireValue::UInt64(v) => Variant::from(*v),
        WireValue::Double(v) => Variant::from(*v),
        WireValue::Byte(v) => Variant::from(*v),
        WireValue::Boolean(v) => Variant::from(*v),
        WireValue::String(s) => Variant::from(s.as_str()),
        WireValue::Signature(s) => Variant::of(s.as_str(), Primitive::Signature)?,
        WireValue::ObjectPath(s) => Variant::of(s.as_str(), Primitive::ObjectPath)?,
        WireValue::Array { element, items } => {
            let element = TypeSignature::parse(element)?;
            let children = items.iter().map(decode).collect::<Result<Vec<_>, _>>()?;
            Variant::array(children, element)?
        }
        WireValue::Tuple(items) => {
            Variant::tuple_of(items.iter().map(decode).collect::<Result<Vec<_>, _>>()?)?
        }
        WireValue::Dict {
            key,
            value,
            entries,
        } => {
            let key = TypeSignature::parse(key)?;
            let value = TypeSignature::parse(value)?;
            let mut map = VariantDict::new();
            for (k, v) in entries {
                map.insert(decode(k)?, decode(v)?);
            }
            Variant::dict(map, key, value)?
        }
    })
}

/// Decode a wire value against the type the receiver declared.
///
/// Fails with [`InvalidType`] when the decoded value is not of `expected`.
pub fn from_wire_as(wire: &WireValue, expected: &TypeSignature) -> Result<Variant, InvalidType> {
    let variant = decode_as(wire, expected)?;
    if variant.signature() != expected {
        return Err(InvalidType(variant.signature().to_string()));
    }
    Ok(variant)
}

fn decode_as(wire: &WireValue, expected: &TypeSignature) -> Result<Variant, InvalidType> {
    match (wire, expected.kind()) {
        (WireValue::Array { items, .. }, Kind::Dict) => {
            let (key, value) = expected.dict_type()?;
            let mut map = VariantDict::new();
            for item in items {
                match item {
                    WireValue::Tuple(pair) if pair.len() == 2 => {
                        map.insert(decode_as(&pair[0], key)?, decode_as(&pair[1], value)?);
                    }
                    other => return Err(InvalidType(other.type_string())),
                }
            }
            Variant::dict(map, key.clone(), value.clone())
        }
        (WireValue::Dict { entries, .. }, Kind::Dict) => {
            let (key, value) = expected.dict_type()?;
            let mut map = VariantDict::new();
            for (k, v) in entries {
                map.insert(decode_as(k, key)?, decode_as(v, value)?);
            }
            Variant::dict(map, key.clone(), value.clone())
        }
        (WireValue::Array { items, .. }, Kind::Array) => {
            let element = expected.array_type()?;
            let children = items
                .iter()
                .map(|item| decode_as(item, element))
                .collect::<Result<Vec<_>, _>>()?;
            Variant::array(children, element.clone())
        }
        (WireValue::Tuple(items), Kind::Struct) => {
            let fields = expected.struct_format()?;
            if fields.len() != items.len() {
                return Err(InvalidType(wire.type_string()));
            }
            let children = items
                .iter()
                .zip(fields)
                .map(|(item, field)| decode_as(item, field))
                .collect::<Result<Vec<_>, _>>()?;
            Variant::tuple(children, fields)
        }
        _ => from_wire(wire),
    }
}
