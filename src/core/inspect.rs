//! Human-readable dumps of encoded values

use crate::core::Payload;
use crate::error::Result;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

/// JSON view of a payload with its body hash; hashes, keys and signatures are hex.
pub fn to_json(payload: &Payload) -> Result<Value> {
    Ok(json!({
        "tag": payload.tag(),
        "hash": payload.hash(),
        "payload": serde_json::to_value(payload)?,
    }))
}

pub fn to_pretty_string(payload: &Payload) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_json(payload)?)?)
}

/// Decode a stored block file (or any tagged value) and render it.
pub fn dump_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let payload = Payload::decode(&bytes)?;
    if let Payload::Block(block) = &payload {
        log::debug!(
            "{} holds a block with {} transactions",
            path.display(),
            block.transactions.len()
        );
    }
    to_pretty_string(&payload)
}
