//! Structural description of registered interfaces.
//!
//! Built from an [`Interface`](super::Interface) each time it is
//! registered and handed to the transport, which uses it to answer
//! introspection requests without calling back into the server.

use super::signature::TypeSignature;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named, typed argument of a method or signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgInfo {
    pub name: String,
    pub signature: TypeSignature,
}

impl ArgInfo {
    pub fn new(name: impl Into<String>, signature: impl Into<TypeSignature>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    pub args: Vec<ArgInfo>,
    pub response: Vec<ArgInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub name: String,
    pub signature: TypeSignature,
    pub readable: bool,
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalInfo {
    pub name: String,
    pub args: Vec<ArgInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodInfo>,
    #[serde(default)]
    pub properties: Vec<PropertyInfo>,
    #[serde(default)]
    pub signals: Vec<SignalInfo>,
}

/// Every interface registered on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub node: String,
    pub interfaces: Vec<InterfaceInfo>,
}

impl InterfaceInfo {
    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalInfo> {
        self.signals.iter().find(|s| s.name == name)
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[ArgInfo]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}: {}", arg.name, arg.signature)?;
    }
    Ok(())
}

impl fmt::Display for InterfaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "interface {}", self.name)?;
        for method in &self.methods {
            write!(f, "  method {}(", method.name)?;
            write_args(f, &method.args)?;
            f.write_str(")")?;
            if !method.response.is_empty() {
                f.write_str(" -> (")?;
                write_args(f, &method.response)?;
                f.write_str(")")?;
            }
            writeln!(f)?;
        }
        for property in &self.properties {
            let access = match (property.readable, property.writable) {
                (true, true) => "readwrite",
                (true, false) => "read",
                (false, true) => "write",
                (false, false) => "none",
            };
            writeln!(
                f,
                "  property {}: {} [{}]",
                property.name, property.signature, access
            )?;
        }
        for signal in &self.signals {
            write!(f, "  signal {}(", signal.name)?;
            write_args(f, &signal.args)?;
            writeln!(f, ")")?;
        }
        Ok(())
    }
}

impl fmt::Display for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.node)?;
        for interface in &self.interfaces {
            write!(f, "{}", interface)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::signature::Primitive;

    fn dpi_info() -> InterfaceInfo {
        InterfaceInfo {
            name: "io.hwconfd.DPI".to_string(),
            methods: vec![MethodInfo {
                name: "getDPI".to_string(),
                args: vec![ArgInfo::new("sensor", Primitive::Byte)],
                response: vec![ArgInfo::new("dpi", Primitive::UInt16)],
            }],
            properties: vec![PropertyInfo {
                name: "sensorCount".to_string(),
                signature: Primitive::Byte.into(),
                readable: true,
                writable: false,
            }],
            signals: vec![],
        }
    }

    #[test]
    fn test_render() {
        let text = dpi_info().to_string();
        assert!(text.contains("interface io.hwconfd.DPI"));
        assert!(text.contains("method getDPI(sensor: y) -> (dpi: q)"));
        assert!(text.contains("property sensorCount: y [read]"));
    }

    #[test]
    fn test_lookup_and_json() {
        let info = dpi_info();
        assert!(info.method("getDPI").is_some());
        assert!(info.property("sensorCount").is_some());
        assert!(info.signal("nope").is_none());

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"signature\":\"y\""));
        let parsed: InterfaceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
    }
}
