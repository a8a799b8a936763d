//! Argument and result encoding

use std::collections::BTreeMap;
use std::fmt::Debug;

pub use ciborium::Value;

use crate::error::{Error, Result};
use crate::proto::DataFormat;

/// Encodes call arguments and decodes results for a remote function.
///
/// A serializer is identified on the wire by its [`DataFormat`]; results are
/// only decoded when the server reports the same format.
pub trait Serializer: Send + Sync + Debug {
    /// The wire format this serializer produces.
    fn format(&self) -> DataFormat;

    /// Encode positional and keyword arguments into one payload.
    fn encode_args(&self, args: &[Value], kwargs: &BTreeMap<String, Value>) -> Result<Vec<u8>>;

    /// Decode a result payload.
    fn decode(&self, data: &[u8]) -> Result<Value>;
}

/// CBOR encoding: arguments travel as `[args, kwargs]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborSerializer;

impl Serializer for CborSerializer {
    fn format(&self) -> DataFormat {
        DataFormat::Cbor
    }

    fn encode_args(&self, args: &[Value], kwargs: &BTreeMap<String, Value>) -> Result<Vec<u8>> {
        let kwargs = kwargs
            .iter()
            .map(|(key, value)| (Value::Text(key.clone()), value.clone()))
            .collect();
        let payload = Value::Array(vec![Value::Array(args.to_vec()), Value::Map(kwargs)]);

        let mut buf = Vec::new();
        ciborium::into_writer(&payload, &mut buf)
            .map_err(|e| Error::Serialization(format!("failed to encode arguments: {e}")))?;
        Ok(buf)
    }

    fn decode(&self, data: &[u8]) -> Result<Value> {
        ciborium::from_reader(data)
            .map_err(|e| Error::Serialization(format!("failed to decode result: {e}")))
    }
}
