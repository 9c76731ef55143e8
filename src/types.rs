//! Core data types for the flowgraph engine
//!
//! This module contains the fundamental data structures shared between the
//! graph editor and the evaluation engine.
//!
//! # Main Types
//!
//! - [`BlockDescriptor`] - Declarative document describing a block type
//! - [`ParamDesc`] / [`CallDesc`] / [`PortDesc`] - Descriptor sub-documents
//! - [`PropertyResult`] - Tagged result of evaluating one property expression
//! - [`GraphBlockInfo`] - Per-node state submitted by the editor
//! - [`ConnectionInfo`] - A single declared connection between two ports
//! - [`GraphSnapshot`] - The complete editor -> engine submission
//!
//! # Descriptor Documents
//!
//! Block descriptors are JSON documents keyed globally by their factory
//! `path`. The evaluation algorithms consume three pieces of them: the
//! parameter list (what to evaluate), the constructor argument keys and
//! initializer calls (what forces a full re-creation when edited), and the
//! setter calls (what can be re-applied to a live object).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::ZoneConfig;

/// A single declared parameter of a block type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDesc {
    /// Property key referenced by args/calls
    pub key: String,

    /// Default expression string
    #[serde(default)]
    pub default: String,

    /// Optional type hint for the editor
    #[serde(default)]
    pub type_hint: String,

    /// Preview rule ("enable", "disable", "valid")
    #[serde(default)]
    pub preview: String,
}

impl ParamDesc {
    /// Create a parameter with just a key and default expression
    pub fn new(key: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            default: default.into(),
            type_hint: String::new(),
            preview: String::new(),
        }
    }
}

/// Kind of a declared call on a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    /// Applied once after construction; edits force re-creation
    Initializer,
    /// Re-applied to the live object when referenced properties change
    Setter,
}

/// A declared method call wired to one or more properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallDesc {
    /// Remote method name (e.g. "setGain")
    pub name: String,

    /// Whether this is an initializer or a setter
    pub kind: CallKind,

    /// Property keys passed as arguments, in order
    #[serde(default)]
    pub args: Vec<String>,
}

impl CallDesc {
    /// Create a setter call taking a single property argument
    pub fn setter(name: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CallKind::Setter,
            args: vec![arg.into()],
        }
    }

    /// Create an initializer call
    pub fn initializer(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: CallKind::Initializer,
            args,
        }
    }
}

/// A declared input or output port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDesc {
    /// Port name ("0", "in", "trigger", ...)
    pub name: String,

    /// Declared data type string
    #[serde(default)]
    pub dtype: String,
}

impl PortDesc {
    pub fn new(name: impl Into<String>, dtype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.into(),
        }
    }
}

/// Immutable declarative document describing a block type
///
/// Keyed globally by `path`. Produced by host-side block registries,
/// cached process-wide by the description cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockDescriptor {
    /// Factory path, globally unique (e.g. "/blocks/gain")
    pub path: String,

    /// Display name for the editor
    #[serde(default)]
    pub name: String,

    /// Declared parameters, in evaluation order
    #[serde(default)]
    pub params: Vec<ParamDesc>,

    /// Property keys passed to the constructor
    #[serde(default)]
    pub args: Vec<String>,

    /// Declared initializer and setter calls
    #[serde(default)]
    pub calls: Vec<CallDesc>,

    /// Declared input ports
    #[serde(default)]
    pub inputs: Vec<PortDesc>,

    /// Declared output ports
    #[serde(default)]
    pub outputs: Vec<PortDesc>,

    /// Signal (output event) names
    #[serde(default)]
    pub signals: Vec<String>,

    /// Slot (input event) names
    #[serde(default)]
    pub slots: Vec<String>,
}

impl BlockDescriptor {
    /// Parse a descriptor from its JSON document
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize this descriptor to its JSON document
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Property keys whose edits force object re-creation: constructor
    /// arguments plus every argument of an initializer call.
    pub fn critical_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.args.iter().map(String::as_str).collect();
        for call in &self.calls {
            if call.kind == CallKind::Initializer {
                keys.extend(call.args.iter().map(String::as_str));
            }
        }
        keys
    }

    /// Declared setter calls, in declaration order
    pub fn setters(&self) -> impl Iterator<Item = &CallDesc> {
        self.calls.iter().filter(|c| c.kind == CallKind::Setter)
    }
}

/// Tagged result of evaluating one property expression
///
/// Carried across the RPC boundary instead of an untyped dynamic object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PropertyResult {
    /// Type string of the evaluated value ("i64", "f64", "string", ...)
    #[serde(default)]
    pub type_string: String,

    /// Display rendering of the evaluated value
    #[serde(default)]
    pub display_string: String,

    /// Error message when evaluation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PropertyResult {
    /// Successful result
    pub fn ok(type_string: impl Into<String>, display_string: impl Into<String>) -> Self {
        Self {
            type_string: type_string.into(),
            display_string: display_string.into(),
            error: None,
        }
    }

    /// Failed result carrying the error message
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            type_string: String::new(),
            display_string: String::new(),
            error: Some(message.into()),
        }
    }

    /// True if evaluation succeeded
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A single declared connection between two block ports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub src_id: String,
    pub src_port: String,
    pub dst_id: String,
    pub dst_port: String,
}

impl ConnectionInfo {
    pub fn new(
        src_id: impl Into<String>,
        src_port: impl Into<String>,
        dst_id: impl Into<String>,
        dst_port: impl Into<String>,
    ) -> Self {
        Self {
            src_id: src_id.into(),
            src_port: src_port.into(),
            dst_id: dst_id.into(),
            dst_port: dst_port.into(),
        }
    }
}

/// Per-node state submitted by the editor for one graph block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GraphBlockInfo {
    /// Unique block id within the graph
    pub id: String,

    /// Factory path of the block type
    pub path: String,

    /// Affinity zone name; empty means the in-process default zone
    #[serde(default)]
    pub zone: String,

    /// Property key -> expression string pairs, in declaration order
    #[serde(default)]
    pub properties: Vec<(String, String)>,
}

impl GraphBlockInfo {
    /// Look up a property expression by key
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// The complete editor -> engine submission: ordered block list,
/// connection list, and the zone configuration map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub blocks: Vec<GraphBlockInfo>,

    #[serde(default)]
    pub connections: Vec<ConnectionInfo>,

    #[serde(default)]
    pub zones: HashMap<String, ZoneConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gain_descriptor() -> BlockDescriptor {
        BlockDescriptor {
            path: "/blocks/gain".to_string(),
            name: "Gain".to_string(),
            params: vec![
                ParamDesc::new("dtype", "\"float32\""),
                ParamDesc::new("gain", "1.0"),
            ],
            args: vec!["dtype".to_string()],
            calls: vec![CallDesc::setter("setGain", "gain")],
            inputs: vec![PortDesc::new("0", "float32")],
            outputs: vec![PortDesc::new("0", "float32")],
            signals: Vec::new(),
            slots: Vec::new(),
        }
    }

    #[test]
    fn test_descriptor_json_roundtrip() {
        let desc = gain_descriptor();
        let json = desc.to_json();
        let parsed = BlockDescriptor::from_json(&json).unwrap();
        assert_eq!(desc, parsed);
    }

    #[test]
    fn test_critical_keys_include_initializer_args() {
        let mut desc = gain_descriptor();
        desc.calls
            .push(CallDesc::initializer("setup", vec!["mode".to_string()]));
        let keys = desc.critical_keys();
        assert!(keys.contains(&"dtype"));
        assert!(keys.contains(&"mode"));
        assert!(!keys.contains(&"gain"));
    }

    #[test]
    fn test_setters_in_declaration_order() {
        let mut desc = gain_descriptor();
        desc.calls.push(CallDesc::setter("setLabel", "label"));
        let names: Vec<_> = desc.setters().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["setGain", "setLabel"]);
    }

    #[test]
    fn test_property_lookup() {
        let info = GraphBlockInfo {
            id: "b0".to_string(),
            path: "/blocks/gain".to_string(),
            zone: String::new(),
            properties: vec![("gain".to_string(), "2.0".to_string())],
        };
        assert_eq!(info.property("gain"), Some("2.0"));
        assert_eq!(info.property("missing"), None);
    }
}
