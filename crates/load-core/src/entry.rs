use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One record of a loadspec: a single request with its relative timing.
///
/// Using delay-since-last instead of an absolute timestamp makes replay a
/// plain sleep-then-dispatch loop. Unknown fields are ignored on read so
/// newer writers stay compatible with older replayers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: u64,
    pub delay_since_last_nanos: i64,
    pub url: String,
    pub source: String,
}

impl Entry {
    /// Parses one JSONL line, tagging failures with the 1-based line number.
    pub fn from_json_line(line: &str, line_no: usize) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| Error::MalformedInput {
            line_no,
            reason: e.to_string(),
        })
    }
}

/// Writes one entry as a single JSON line.
pub fn write_jsonl<W: Write>(out: &mut W, entry: &Entry) -> Result<()> {
    serde_json::to_writer(&mut *out, entry)?;
    out.write_all(b"\n")?;
    Ok(())
}
