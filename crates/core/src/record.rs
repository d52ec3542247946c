//! Job records and their storage codec.
//!
//! A job record is a job name plus an ordered mapping of arguments. On the
//! wire it is a single flat JSON object where the reserved `name` key carries
//! the job name and every other key is an argument:
//!
//! ```json
//! {"name":"fetch","url":"https://example.com","depth":2}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Key reserved for the job name inside an encoded record.
pub const NAME_KEY: &str = "name";

/// A named unit of work with ordered, JSON-compatible arguments.
///
/// Records are not deduplicated: two equal records added to a queue are two
/// entries (except on backends that key entries by payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    name: String,
    #[serde(flatten)]
    args: Map<String, Value>,
}

impl JobRecord {
    /// Create a record with no arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
        }
    }

    /// Create a record from an argument map.
    ///
    /// A `name` entry in `args` is discarded; the job name always wins.
    pub fn with_args(name: impl Into<String>, mut args: Map<String, Value>) -> Self {
        args.remove(NAME_KEY);
        Self {
            name: name.into(),
            args,
        }
    }

    /// Append an argument, keeping insertion order.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != NAME_KEY {
            self.args.insert(key, value.into());
        }
        self
    }

    /// The job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The job arguments, in insertion order.
    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    /// Look up a single argument.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    /// Split the record into its name and arguments.
    pub fn into_parts(self) -> (String, Map<String, Value>) {
        (self.name, self.args)
    }
}

/// Encode a record as canonical JSON text.
pub fn encode(record: &JobRecord) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

/// Decode a record from JSON text.
///
/// Fails with [`QueueError::MalformedRecord`](crate::QueueError::MalformedRecord)
/// when the text is not a JSON object with a string `name`.
pub fn decode(text: &str) -> Result<JobRecord> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a record as UTF-8 JSON bytes, for blob columns.
pub fn encode_bytes(record: &JobRecord) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

/// Decode a record from UTF-8 JSON bytes.
pub fn decode_bytes(bytes: &[u8]) -> Result<JobRecord> {
    Ok(serde_json::from_slice(bytes)?)
}
