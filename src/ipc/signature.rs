//! Structural type signatures.
//!
//! A [`TypeSignature`] describes the shape of a [`Variant`](super::Variant):
//! one of twelve primitive kinds, or an array, struct or dict built from
//! other signatures. Every signature has exactly one textual encoding and two
//! signatures are equal iff their encodings are equal.
//!
//! # Grammar
//!
//! ```text
//! sig       := primitive | 'a' sig | '(' sig+ ')' | '{' primitive sig '}'
//! primitive := 'n' | 'q' | 'i' | 'u' | 'x' | 't' | 'd' | 'y' | 'b' | 's' | 'g' | 'o'
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Longest signature text accepted from anywhere, including the wire.
pub const MAX_SIGNATURE_LEN: usize = 255;

/// Deepest composite nesting accepted by the parser.
pub const MAX_DEPTH: usize = 64;

/// A value or signature did not match the expected type.
///
/// Carries the offending signature text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid type {0}")]
pub struct InvalidType(pub String);

/// The twelve single-character kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Primitive {
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    Byte,
    Boolean,
    String,
    Signature,
    ObjectPath,
}

impl Primitive {
    pub const ALL: [Primitive; 12] = [
        Primitive::Int16,
        Primitive::UInt16,
        Primitive::Int32,
        Primitive::UInt32,
        Primitive::Int64,
        Primitive::UInt64,
        Primitive::Double,
        Primitive::Byte,
        Primitive::Boolean,
        Primitive::String,
        Primitive::Signature,
        Primitive::ObjectPath,
    ];

    /// Signature character for this kind.
    pub fn code(self) -> char {
        match self {
            Primitive::Int16 => 'n',
            Primitive::UInt16 => 'q',
            Primitive::Int32 => 'i',
            Primitive::UInt32 => 'u',
            Primitive::Int64 => 'x',
            Primitive::UInt64 => 't',
            Primitive::Double => 'd',
            Primitive::Byte => 'y',
            Primitive::Boolean => 'b',
            Primitive::String => 's',
            Primitive::Signature => 'g',
            Primitive::ObjectPath => 'o',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    /// String, signature and object path share string storage.
    pub fn is_string_like(self) -> bool {
        matches!(
            self,
            Primitive::String | Primitive::Signature | Primitive::ObjectPath
        )
    }
}

/// Primary kind of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Primitive(Primitive),
    Array,
    Struct,
    Dict,
}

impl Kind {
    pub fn is_primitive(self) -> bool {
        matches!(self, Kind::Primitive(_))
    }
}

#[derive(Debug, Clone)]
enum Shape {
    Primitive(Primitive),
    Array(Box<TypeSignature>),
    Struct(Vec<TypeSignature>),
    Dict(Box<TypeSignature>, Box<TypeSignature>),
}

/// A parsed, immutable type signature.
#[derive(Clone)]
pub struct TypeSignature {
    text: String,
    shape: Shape,
}

impl TypeSignature {
    /// Parse a complete signature.
    ///
    /// Fails with [`InvalidType`] carrying `text` on any malformed input:
    /// unknown characters, trailing characters after a complete signature,
    /// unbalanced `()`/`{}`, empty structs, dicts with the wrong arity or a
    /// composite key, or input beyond the length/depth limits.
    pub fn parse(text: &str) -> Result<Self, InvalidType> {
        if text.is_empty() || text.len() > MAX_SIGNATURE_LEN || !text.is_ascii() {
            return Err(InvalidType(text.to_string()));
        }

        let mut parser = Parser {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        };
        let signature = parser.parse_one(0)?;
        if parser.pos != text.len() {
            return Err(parser.error());
        }
        Ok(signature)
    }

    pub fn primitive(kind: Primitive) -> Self {
        Self {
            text: kind.code().to_string(),
            shape: Shape::Primitive(kind),
        }
    }

    pub fn array(element: TypeSignature) -> Self {
        Self {
            text: format!("a{}", element.text),
            shape: Shape::Array(Box::new(element)),
        }
    }

    /// Struct of the given fields, in order. At least one field is required.
    pub fn structure(fields: Vec<TypeSignature>) -> Result<Self, InvalidType> {
        if fields.is_empty() {
            return Err(InvalidType("()".to_string()));
        }
        let mut text = String::from("(");
        for field in &fields {
            text.push_str(&field.text);
        }
        text.push(')');
        Ok(Self {
            text,
            shape: Shape::Struct(fields),
        })
    }

    /// Dict from `key` to `value`. The key must be primitive.
    pub fn dict(key: TypeSignature, value: TypeSignature) -> Result<Self, InvalidType> {
        let text = format!("{{{}{}}}", key.text, value.text);
        if !key.kind().is_primitive() {
            return Err(InvalidType(text));
        }
        Ok(Self {
            text,
            shape: Shape::Dict(Box::new(key), Box::new(value)),
        })
    }

    pub fn kind(&self) -> Kind {
        match &self.shape {
            Shape::Primitive(p) => Kind::Primitive(*p),
            Shape::Array(_) => Kind::Array,
            Shape::Struct(_) => Kind::Struct,
            Shape::Dict(_, _) => Kind::Dict,
        }
    }

    /// The primitive kind, if this is a primitive signature.
    pub fn as_primitive(&self) -> Option<Primitive> {
        match self.shape {
            Shape::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn array_type(&self) -> Result<&TypeSignature, InvalidType> {
        match &self.shape {
            Shape::Array(element) => Ok(element),
            _ => Err(InvalidType(self.text.clone())),
        }
    }

    pub fn struct_format(&self) -> Result<&[TypeSignature], InvalidType> {
        match &self.shape {
            Shape::Struct(fields) => Ok(fields),
            _ => Err(InvalidType(self.text.clone())),
        }
    }

    pub fn dict_type(&self) -> Result<(&TypeSignature, &TypeSignature), InvalidType> {
        match &self.shape {
            Shape::Dict(key, value) => Ok((key, value)),
            _ => Err(InvalidType(self.text.clone())),
        }
    }
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self) -> InvalidType {
        InvalidType(self.text.to_string())
    }

    fn peek(&self) -> Option<char> {
        self.bytes.get(self.pos).map(|&b| b as char)
    }

    /// Parse exactly one complete signature starting at `self.pos`.
    fn parse_one(&mut self, depth: usize) -> Result<TypeSignature, InvalidType> {
        if depth > MAX_DEPTH {
            return Err(self.error());
        }

        let start = self.pos;
        let c = self.peek().ok_or_else(|| self.error())?;
        self.pos += 1;

        let shape = match c {
            'a' => Shape::Array(Box::new(self.parse_one(depth + 1)?)),
            '(' => {
                let mut fields = Vec::new();
                loop {
                    match self.peek() {
                        Some(')') => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => fields.push(self.parse_one(depth + 1)?),
                        None => return Err(self.error()),
                    }
                }
                if fields.is_empty() {
                    return Err(self.error());
                }
                Shape::Struct(fields)
            }
            '{' => {
                let key = self.parse_one(depth + 1)?;
                if !key.kind().is_primitive() {
                    return Err(self.error());
                }
                let value = self.parse_one(depth + 1)?;
                if self.peek() != Some('}') {
                    return Err(self.error());
                }
                self.pos += 1;
                Shape::Dict(Box::new(key), Box::new(value))
            }
            other => Shape::Primitive(Primitive::from_code(other).ok_or_else(|| self.error())?),
        };

        Ok(TypeSignature {
            text: self.text[start..self.pos].to_string(),
            shape,
        })
    }
}

impl From<Primitive> for TypeSignature {
    fn from(kind: Primitive) -> Self {
        Self::primitive(kind)
    }
}

impl FromStr for TypeSignature {
    type Err = InvalidType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for TypeSignature {
    type Error = InvalidType;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl PartialEq for TypeSignature {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for TypeSignature {}

impl Hash for TypeSignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl PartialOrd for TypeSignature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeSignature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text)
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeSignature({:?})", self.text)
    }
}

impl Serialize for TypeSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for TypeSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct SignatureVisitor;

        impl Visitor<'_> for SignatureVisitor {
            type Value = TypeSignature;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a type signature string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                TypeSignature::parse(value).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(SignatureVisitor)
    }
}
