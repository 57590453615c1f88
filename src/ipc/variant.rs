//! Typed values carried across the IPC boundary.
//!
//! A [`Variant`] always carries the [`TypeSignature`] it was built with.
//! Construction and every mutation validate against that signature, so a
//! malformed value is never observable. Reads through the wrong accessor
//! fail with [`InvalidType`]; there is no implicit widening or narrowing.

use super::signature::{InvalidType, Kind, Primitive, TypeSignature};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Entries of a dict variant.
pub type VariantDict = BTreeMap<Variant, Variant>;

#[derive(Debug, Clone)]
enum Value {
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Byte(u8),
    Boolean(bool),
    Str(String),
    /// Array elements or struct fields.
    Seq(Vec<Variant>),
    Dict(VariantDict),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Int16(_) => 0,
            Value::UInt16(_) => 1,
            Value::Int32(_) => 2,
            Value::UInt32(_) => 3,
            Value::Int64(_) => 4,
            Value::UInt64(_) => 5,
            Value::Double(_) => 6,
            Value::Byte(_) => 7,
            Value::Boolean(_) => 8,
            Value::Str(_) => 9,
            Value::Seq(_) => 10,
            Value::Dict(_) => 11,
        }
    }

    fn cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int16(a), Value::Int16(b)) => a.cmp(b),
            (Value::UInt16(a), Value::UInt16(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::UInt32(a), Value::UInt32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::UInt64(a), Value::UInt64(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Byte(a), Value::Byte(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Seq(a), Value::Seq(b)) => a.cmp(b),
            (Value::Dict(a), Value::Dict(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

/// A value tagged with its type signature.
#[derive(Debug, Clone)]
pub struct Variant {
    signature: TypeSignature,
    value: Value,
}

macro_rules! scalar_access {
    ($($ty:ty => $variant:ident, $prim:ident, $get:ident, $set:ident;)*) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Self {
                        signature: TypeSignature::primitive(Primitive::$prim),
                        value: Value::$variant(value),
                    }
                }
            }

            impl Variant {
                pub fn $get(&self) -> Result<$ty, InvalidType> {
                    match self.value {
                        Value::$variant(v) => Ok(v),
                        _ => Err(self.invalid()),
                    }
                }

                pub fn $set(&mut self, value: $ty) -> Result<(), InvalidType> {
                    match self.value {
                        Value::$variant(ref mut v) => {
                            *v = value;
                            Ok(())
                        }
                        _ => Err(self.invalid()),
                    }
                }
            }
        )*
    };
}

scalar_access! {
    i16 => Int16, Int16, as_int16, set_int16;
    u16 => UInt16, UInt16, as_uint16, set_uint16;
    i32 => Int32, Int32, as_int32, set_int32;
    u32 => UInt32, UInt32, as_uint32, set_uint32;
    i64 => Int64, Int64, as_int64, set_int64;
    u64 => UInt64, UInt64, as_uint64, set_uint64;
    f64 => Double, Double, as_double, set_double;
    u8 => Byte, Byte, as_byte, set_byte;
    bool => Boolean, Boolean, as_bool, set_bool;
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Self {
            signature: TypeSignature::primitive(Primitive::String),
            value: Value::Str(value),
        }
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl Variant {
    /// Build a primitive variant of an explicit kind.
    ///
    /// `value` is converted to its natural kind first; the result must either
    /// already be `kind`, or be a string retagged as a signature or object
    /// path whose text is valid for that kind.
    pub fn of(value: impl Into<Variant>, kind: Primitive) -> Result<Self, InvalidType> {
        let mut variant = value.into();
        let natural = variant.signature.as_primitive();
        if natural == Some(kind) {
            return Ok(variant);
        }
        if natural != Some(Primitive::String) || !kind.is_string_like() {
            return Err(InvalidType(kind.code().to_string()));
        }
        if let Value::Str(ref text) = variant.value {
            check_string_kind(text, kind)?;
        }
        variant.signature = TypeSignature::primitive(kind);
        Ok(variant)
    }

    /// Array whose every element has type `element`.
    pub fn array(children: Vec<Variant>, element: TypeSignature) -> Result<Self, InvalidType> {
        let signature = TypeSignature::array(element);
        check_elements(&signature, &children)?;
        Ok(Self {
            signature,
            value: Value::Seq(children),
        })
    }

    /// Struct whose fields match `types` positionally.
    pub fn tuple(children: Vec<Variant>, types: &[TypeSignature]) -> Result<Self, InvalidType> {
        let signature = TypeSignature::structure(types.to_vec())?;
        check_elements(&signature, &children)?;
        Ok(Self {
            signature,
            value: Value::Seq(children),
        })
    }

    /// Struct typed after its own fields.
    pub fn tuple_of(children: Vec<Variant>) -> Result<Self, InvalidType> {
        let types: Vec<TypeSignature> = children.iter().map(|c| c.signature.clone()).collect();
        Self::tuple(children, &types)
    }

    /// Dict from `key` to `value`.
    pub fn dict(
        entries: VariantDict,
        key: TypeSignature,
        value: TypeSignature,
    ) -> Result<Self, InvalidType> {
        let signature = TypeSignature::dict(key, value)?;
        check_entries(&signature, &entries)?;
        Ok(Self {
            signature,
            value: Value::Dict(entries),
        })
    }

    /// An empty value for a signature: zero, empty string, empty array or
    /// dict, or a struct of empty fields.
    pub fn empty(signature: &TypeSignature) -> Self {
        let value = match signature.kind() {
            Kind::Primitive(p) => match p {
                Primitive::Int16 => Value::Int16(0),
                Primitive::UInt16 => Value::UInt16(0),
                Primitive::Int32 => Value::Int32(0),
                Primitive::UInt32 => Value::UInt32(0),
                Primitive::Int64 => Value::Int64(0),
                Primitive::UInt64 => Value::UInt64(0),
                Primitive::Double => Value::Double(0.0),
                Primitive::Byte => Value::Byte(0),
                Primitive::Boolean => Value::Boolean(false),
                Primitive::String => Value::Str(String::new()),
                Primitive::Signature => Value::Str("s".to_string()),
                Primitive::ObjectPath => Value::Str("/".to_string()),
            },
            Kind::Array => Value::Seq(Vec::new()),
            Kind::Dict => Value::Dict(VariantDict::new()),
            Kind::Struct => Value::Seq(
                signature
                    .struct_format()
                    .unwrap_or_default()
                    .iter()
                    .map(Variant::empty)
                    .collect(),
            ),
        };
        Self {
            signature: signature.clone(),
            value,
        }
    }

    pub fn signature(&self) -> &TypeSignature {
        &self.signature
    }

    pub fn kind(&self) -> Kind {
        self.signature.kind()
    }

    fn invalid(&self) -> InvalidType {
        InvalidType(self.signature.to_string())
    }

    /// Text of a string, signature or object path.
    pub fn as_str(&self) -> Result<&str, InvalidType> {
        match self.value {
            Value::Str(ref s) => Ok(s),
            _ => Err(self.invalid()),
        }
    }

    pub fn as_array(&self) -> Result<&[Variant], InvalidType> {
        match (self.kind(), &self.value) {
            (Kind::Array, Value::Seq(items)) => Ok(items),
            _ => Err(self.invalid()),
        }
    }

    pub fn as_tuple(&self) -> Result<&[Variant], InvalidType> {
        match (self.kind(), &self.value) {
            (Kind::Struct, Value::Seq(items)) => Ok(items),
            _ => Err(self.invalid()),
        }
    }

    pub fn as_dict(&self) -> Result<&VariantDict, InvalidType> {
        match self.value {
            Value::Dict(ref entries) => Ok(entries),
            _ => Err(self.invalid()),
        }
    }

    /// Element of an array or field of a struct.
    pub fn get(&self, index: usize) -> Result<&Variant, InvalidType> {
        match self.value {
            Value::Seq(ref items) => items.get(index).ok_or_else(|| self.invalid()),
            _ => Err(self.invalid()),
        }
    }

    pub fn lookup(&self, key: &Variant) -> Result<Option<&Variant>, InvalidType> {
        Ok(self.as_dict()?.get(key))
    }

    /// Replace the text of a string, signature or object path.
    pub fn set_str(&mut self, text: impl Into<String>) -> Result<(), InvalidType> {
        let kind = match self.signature.as_primitive() {
            Some(p) if p.is_string_like() => p,
            _ => return Err(self.invalid()),
        };
        let text = text.into();
        check_string_kind(&text, kind)?;
        self.value = Value::Str(text);
        Ok(())
    }

    /// Replace the elements of an array or the fields of a struct.
    pub fn set_elements(&mut self, children: Vec<Variant>) -> Result<(), InvalidType> {
        check_elements(&self.signature, &children)?;
        self.value = Value::Seq(children);
        Ok(())
    }

    pub fn set_entries(&mut self, entries: VariantDict) -> Result<(), InvalidType> {
        check_entries(&self.signature, &entries)?;
        self.value = Value::Dict(entries);
        Ok(())
    }

    /// Replace the whole value with another of the same type.
    pub fn assign(&mut self, other: Variant) -> Result<(), InvalidType> {
        if other.signature != self.signature {
            return Err(InvalidType(other.signature.to_string()));
        }
        self.value = other.value;
        Ok(())
    }

    /// Append to an array.
    pub fn push(&mut self, child: Variant) -> Result<(), InvalidType> {
        let element = self.signature.array_type()?;
        if child.signature != *element {
            return Err(InvalidType(child.signature.to_string()));
        }
        match self.value {
            Value::Seq(ref mut items) => {
                items.push(child);
                Ok(())
            }
            _ => Err(self.invalid()),
        }
    }

    /// Insert into a dict, returning the previous value for `key`.
    pub fn insert(&mut self, key: Variant, value: Variant) -> Result<Option<Variant>, InvalidType> {
        let (key_type, value_type) = self.signature.dict_type()?;
        if key.signature != *key_type {
            return Err(InvalidType(key.signature.to_string()));
        }
        if value.signature != *value_type {
            return Err(InvalidType(value.signature.to_string()));
        }
        match self.value {
            Value::Dict(ref mut entries) => Ok(entries.insert(key, value)),
            _ => Err(self.invalid()),
        }
    }
}

fn check_elements(signature: &TypeSignature, children: &[Variant]) -> Result<(), InvalidType> {
    match signature.kind() {
        Kind::Array => {
            let element = signature.array_type()?;
            if let Some(bad) = children.iter().find(|c| c.signature != *element) {
                return Err(InvalidType(bad.signature.to_string()));
            }
            Ok(())
        }
        Kind::Struct => {
            let fields = signature.struct_format()?;
            if fields.len() != children.len() {
                return Err(InvalidType(signature.to_string()));
            }
            if let Some((bad, _)) = children
                .iter()
                .zip(fields)
                .find(|(child, field)| child.signature != **field)
            {
                return Err(InvalidType(bad.signature.to_string()));
            }
            Ok(())
        }
        _ => Err(InvalidType(signature.to_string())),
    }
}

fn check_entries(signature: &TypeSignature, entries: &VariantDict) -> Result<(), InvalidType> {
    let (key_type, value_type) = signature.dict_type()?;
    for (key, value) in entries {
        if key.signature != *key_type {
            return Err(InvalidType(key.signature.to_string()));
        }
        if value.signature != *value_type {
            return Err(InvalidType(value.signature.to_string()));
        }
    }
    Ok(())
}

fn check_string_kind(text: &str, kind: Primitive) -> Result<(), InvalidType> {
    match kind {
        Primitive::Signature => TypeSignature::parse(text).map(|_| ()),
        Primitive::ObjectPath if !is_object_path(text) => Err(InvalidType(text.to_string())),
        _ => Ok(()),
    }
}

/// `/`, or `/`-separated non-empty elements of `[A-Za-z0-9_]`.
pub fn is_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    match path.strip_prefix('/') {
        Some(rest) => rest.split('/').all(|element| {
            !element.is_empty()
                && element
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        }),
        None => false,
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Variant {}

impl PartialOrd for Variant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Variant {
    fn cmp(&self, other: &Self) -> Ordering {
        self.signature
            .cmp(&other.signature)
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, items: &[Variant]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        }

        match &self.value {
            Value::Int16(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Seq(items) if self.kind() == Kind::Struct => {
                f.write_str("(")?;
                list(f, items)?;
                f.write_str(")")
            }
            Value::Seq(items) => {
                f.write_str("[")?;
                list(f, items)?;
                f.write_str("]")
            }
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(s: &str) -> TypeSignature {
        TypeSignature::parse(s).unwrap()
    }

    #[test]
    fn test_scalar_natural_kinds() {
        assert_eq!(Variant::from(5i16).signature().as_str(), "n");
        assert_eq!(Variant::from(5u16).signature().as_str(), "q");
        assert_eq!(Variant::from(5i32).signature().as_str(), "i");
        assert_eq!(Variant::from(5u32).signature().as_str(), "u");
        assert_eq!(Variant::from(5i64).signature().as_str(), "x");
        assert_eq!(Variant::from(5u64).signature().as_str(), "t");
        assert_eq!(Variant::from(0.5f64).signature().as_str(), "d");
        assert_eq!(Variant::from(5u8).signature().as_str(), "y");
        assert_eq!(Variant::from(true).signature().as_str(), "b");
        assert_eq!(Variant::from("x").signature().as_str(), "s");
    }

    #[test]
    fn test_of_retags_strings() {
        let path = Variant::of("/io/hwconfd/device/1", Primitive::ObjectPath).unwrap();
        assert_eq!(path.signature().as_str(), "o");
        assert_eq!(path.as_str().unwrap(), "/io/hwconfd/device/1");

        let signature = Variant::of("a(aqb)", Primitive::Signature).unwrap();
        assert_eq!(signature.signature().as_str(), "g");
    }

    #[test]
    fn test_of_rejects_incompatible_kind() {
        assert!(Variant::of(5u16, Primitive::String).is_err());
        assert!(Variant::of("hello", Primitive::UInt16).is_err());
        assert!(Variant::of(1u8, Primitive::UInt16).is_err());
        assert!(Variant::of("not/a/path", Primitive::ObjectPath).is_err());
        assert!(Variant::of("/trailing/", Primitive::ObjectPath).is_err());
        assert!(Variant::of("((", Primitive::Signature).is_err());
    }

    #[test]
    fn test_accessor_kind_mismatch() {
        let v = Variant::from(800u16);
        assert_eq!(v.as_uint16().unwrap(), 800);
        assert_eq!(v.as_int16().unwrap_err(), InvalidType("q".to_string()));
        assert!(v.as_uint32().is_err());
        assert!(v.as_str().is_err());
        assert!(v.as_array().is_err());
        assert!(v.as_dict().is_err());
    }

    #[test]
    fn test_array_rejects_mismatched_child() {
        let children = vec![Variant::from(1u16), Variant::from(2u32), Variant::from(3u16)];
        let err = Variant::array(children, sig("q")).unwrap_err();
        assert_eq!(err, InvalidType("u".to_string()));
    }

    #[test]
    fn test_tuple_arity_and_slots() {
        let types = [sig("b"), sig("y")];
        let ok = Variant::tuple(vec![Variant::from(true), Variant::from(30u8)], &types).unwrap();
        assert_eq!(ok.signature().as_str(), "(by)");
        assert_eq!(ok.get(1).unwrap().as_byte().unwrap(), 30);

        assert!(Variant::tuple(vec![Variant::from(true)], &types).is_err());
        assert!(Variant::tuple(vec![Variant::from(30u8), Variant::from(true)], &types).is_err());
        assert!(Variant::tuple(vec![], &[]).is_err());
    }

    #[test]
    fn test_dict_validation() {
        let mut entries = VariantDict::new();
        entries.insert(Variant::from("a"), Variant::from(1u32));
        let dict = Variant::dict(entries.clone(), sig("s"), sig("u")).unwrap();
        assert_eq!(dict.signature().as_str(), "{su}");
        assert_eq!(
            dict.lookup(&Variant::from("a")).unwrap(),
            Some(&Variant::from(1u32))
        );

        assert!(Variant::dict(entries, sig("s"), sig("q")).is_err());
        assert!(Variant::dict(VariantDict::new(), sig("as"), sig("q")).is_err());
    }

    #[test]
    fn test_failed_assignment_leaves_value() {
        let mut array = Variant::array(vec![Variant::from("a")], sig("s")).unwrap();
        let before = array.clone();
        assert!(array
            .set_elements(vec![Variant::from("b"), Variant::from(1u8)])
            .is_err());
        assert_eq!(array, before);

        let mut n = Variant::from(7u16);
        assert!(n.assign(Variant::from(8u32)).is_err());
        assert!(n.set_int16(3).is_err());
        assert_eq!(n.as_uint16().unwrap(), 7);
        n.set_uint16(9).unwrap();
        assert_eq!(n.as_uint16().unwrap(), 9);
    }

    #[test]
    fn test_push_and_insert_validate() {
        let mut devices = Variant::empty(&sig("as"));
        devices.push(Variant::from("1")).unwrap();
        assert!(devices.push(Variant::from(2u8)).is_err());
        assert_eq!(devices.as_array().unwrap().len(), 1);

        let mut map = Variant::empty(&sig("{sq}"));
        map.insert(Variant::from("dpi"), Variant::from(800u16)).unwrap();
        assert!(map.insert(Variant::from(1u8), Variant::from(800u16)).is_err());
        assert!(map.insert(Variant::from("x"), Variant::from("y")).is_err());
        assert_eq!(map.as_dict().unwrap().len(), 1);
    }

    #[test]
    fn test_equality_requires_same_signature() {
        assert_eq!(Variant::from(1u16), Variant::from(1u16));
        assert_ne!(Variant::from(1u16), Variant::from(1u32));
        assert_ne!(Variant::from(1u8), Variant::from(true));
        assert_ne!(
            Variant::from("/a"),
            Variant::of("/a", Primitive::ObjectPath).unwrap()
        );

        let nan = Variant::from(f64::NAN);
        assert_eq!(nan, nan.clone());
    }

    #[test]
    fn test_dict_equality_is_setwise() {
        let mut a = Variant::empty(&sig("{su}"));
        a.insert(Variant::from("x"), Variant::from(1u32)).unwrap();
        a.insert(Variant::from("y"), Variant::from(2u32)).unwrap();

        let mut b = Variant::empty(&sig("{su}"));
        b.insert(Variant::from("y"), Variant::from(2u32)).unwrap();
        b.insert(Variant::from("x"), Variant::from(1u32)).unwrap();

        assert_eq!(a, b);
        b.insert(Variant::from("x"), Variant::from(3u32)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_struct_fields() {
        let v = Variant::empty(&sig("(aqb)"));
        assert_eq!(v.signature().as_str(), "(aqb)");
        assert_eq!(v.as_tuple().unwrap().len(), 2);
        assert_eq!(v.get(1).unwrap().as_bool().unwrap(), false);
    }

    #[test]
    fn test_display() {
        let pair = Variant::tuple_of(vec![Variant::from(true), Variant::from(3u8)]).unwrap();
        assert_eq!(pair.to_string(), "(true, 3)");
        let list = Variant::array(vec![Variant::from("a")], sig("s")).unwrap();
        assert_eq!(list.to_string(), "[\"a\"]");
    }
}
