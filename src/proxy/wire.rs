//! Wire frames for the remote proxy transport
//!
//! Frames are line-delimited JSON: one request or response document per
//! line. The value payload is the tagged [`ObjectValue`] model; arbitrary
//! application types never cross this boundary directly.

use crate::error::{FlowgraphError, Result};
use crate::proxy::value::ObjectValue;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

/// A request frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    /// Correlation id, echoed in the response
    pub id: u64,
    pub op: WireOp,
}

/// Operations a client may issue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WireOp {
    /// Handshake and liveness probe
    Hello,
    /// Resolve a named root object
    FindProxy { name: String },
    /// Invoke a method on a held object
    Call {
        handle: u64,
        method: String,
        args: Vec<WireArg>,
    },
    /// Wrap a plain value as a server-side object
    MakeObject { value: ObjectValue },
    /// Read the plain value of a server-side object
    GetObject { handle: u64 },
    /// Serialize an object reference
    Serialize { handle: u64 },
    /// Resolve a serialized object reference
    Deserialize { data: String },
    /// Order two objects
    Compare { a: u64, b: u64 },
    /// Content-hash an object
    Hash { handle: u64 },
    /// Increment an object's reference count
    AddRef { handle: u64 },
    /// Decrement an object's reference count
    Release { handle: u64 },
}

/// A call argument on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WireArg {
    /// Plain value transferred by value
    Value { value: ObjectValue },
    /// Handle already held on the server
    Handle { handle: u64 },
}

/// A response frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub id: u64,
    pub result: std::result::Result<WireReply, WireError>,
}

/// Successful results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum WireReply {
    Unit,
    Hello { pid: u32 },
    Handle { handle: u64 },
    Value { value: ObjectValue },
    Text { text: String },
    Ordering { ordering: i8 },
    Hash { hash: u64 },
}

/// Error taxonomy carried across the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireErrorKind {
    Connect,
    Call,
    Exception,
    Compare,
    Evaluation,
    Config,
    Serialization,
    Internal,
}

/// A failed result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: WireErrorKind,
    pub message: String,
}

impl From<&FlowgraphError> for WireError {
    fn from(err: &FlowgraphError) -> Self {
        let kind = match err {
            FlowgraphError::Connect(_) => WireErrorKind::Connect,
            FlowgraphError::Call(_) => WireErrorKind::Call,
            FlowgraphError::Exception(_) => WireErrorKind::Exception,
            FlowgraphError::Compare(_) => WireErrorKind::Compare,
            FlowgraphError::Evaluation(_) => WireErrorKind::Evaluation,
            FlowgraphError::Config(_) => WireErrorKind::Config,
            FlowgraphError::Serialization(_) => WireErrorKind::Serialization,
            _ => WireErrorKind::Internal,
        };
        WireError {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<WireError> for FlowgraphError {
    fn from(err: WireError) -> Self {
        match err.kind {
            WireErrorKind::Connect => FlowgraphError::Connect(err.message),
            WireErrorKind::Call => FlowgraphError::Call(err.message),
            WireErrorKind::Exception => FlowgraphError::Exception(err.message),
            WireErrorKind::Compare => FlowgraphError::Compare(err.message),
            WireErrorKind::Evaluation => FlowgraphError::Evaluation(err.message),
            WireErrorKind::Config => FlowgraphError::Config(err.message),
            WireErrorKind::Serialization => FlowgraphError::Serialization(err.message),
            WireErrorKind::Internal => FlowgraphError::Call(err.message),
        }
    }
}

/// Write one frame followed by a newline
pub fn write_frame<T: Serialize>(writer: &mut impl Write, frame: &T) -> Result<()> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    writer.write_all(line.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read one frame; `Ok(None)` on clean EOF
pub fn read_frame<T: for<'de> Deserialize<'de>>(reader: &mut impl BufRead) -> Result<Option<T>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    let frame = serde_json::from_str(line.trim_end())?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    #[test]
    fn test_request_frame_roundtrip() {
        let req = WireRequest {
            id: 7,
            op: WireOp::Call {
                handle: 3,
                method: "setGain".to_string(),
                args: vec![WireArg::Value {
                    value: ObjectValue::Float(0.5),
                }],
            },
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &req).unwrap();
        let mut reader = BufReader::new(Cursor::new(buf));
        let back: WireRequest = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(back.id, 7);
        match back.op {
            WireOp::Call { method, args, .. } => {
                assert_eq!(method, "setGain");
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected op: {:?}", other),
        }
    }

    #[test]
    fn test_error_kind_mapping() {
        let err = FlowgraphError::Compare("mismatch".to_string());
        let wire = WireError::from(&err);
        assert_eq!(wire.kind, WireErrorKind::Compare);
        let back: FlowgraphError = wire.into();
        assert!(matches!(back, FlowgraphError::Compare(_)));
    }

    #[test]
    fn test_read_frame_eof() {
        let mut reader = BufReader::new(Cursor::new(Vec::new()));
        let frame: Option<WireRequest> = read_frame(&mut reader).unwrap();
        assert!(frame.is_none());
    }
}
