//! Job accounting preprocessing
//!
//! Scheduler accounting records carry a handful of fields whose type drifts
//! between records: host core lists arrive as `[host, value]` pairs, time
//! limits as `D-HH:MM:SS` text and requested memory as `<n><unit><type>`
//! text. These rules coerce them into a stable shape. Nothing here fails:
//! unparseable input gets a fixed default.

use crate::discovery::SourceFile;
use crate::error::Result;
use jobdex_common::{Document, FieldPath, Map};
use regex::Regex;

pub const HOSTCORES_FIELD: &str = "acct.hostcores";
pub const TIMELIMIT_FIELD: &str = "acct.timelimit";
pub const REQMEM_FIELD: &str = "acct.reqmem";
pub const RESOURCE_ID_FIELD: &str = "resource_id";

/// Placeholder the scheduler writes when it could not count cores.
const ERROR_SENTINEL: &str = "error";

const SECONDS_PER_DAY: i64 = 86_400;

/// Compiled accounting rules
#[derive(Debug, Clone)]
pub struct AccountingRules {
    duration: Regex,
    memory: Regex,
    hostcores: FieldPath,
    timelimit: FieldPath,
    reqmem: FieldPath,
}

impl AccountingRules {
    pub fn new() -> Result<Self> {
        Ok(Self {
            duration: Regex::new(r"^(?:(\d+)-)?(\d{1,2}):(\d{2}):(\d{2})$")?,
            memory: Regex::new(r"^(\d+(?:\.\d+)?)([KMGT])([A-Za-z])$")?,
            hostcores: FieldPath::parse(HOSTCORES_FIELD),
            timelimit: FieldPath::parse(TIMELIMIT_FIELD),
            reqmem: FieldPath::parse(REQMEM_FIELD),
        })
    }

    pub fn apply(&self, doc: &mut Document, source: &SourceFile) {
        self.hostcores.update(doc, convert_hostcores);

        if let Some(slot) = self.timelimit.get_mut(doc) {
            if let Document::String(text) = &*slot {
                let seconds = self.parse_duration(text).unwrap_or(0);
                *slot = Document::Int(seconds);
            }
        }

        if let Some(slot) = self.reqmem.get_mut(doc) {
            if let Document::String(text) = &*slot {
                *slot = self.memory_quantity(text);
            }
        }

        if let (Some(map), Some(id)) = (doc.as_map_mut(), source.resource_number()) {
            map.insert(RESOURCE_ID_FIELD, Document::Int(id));
        }
    }

    /// `HH:MM:SS` or `D-HH:MM:SS` to seconds
    pub fn parse_duration(&self, text: &str) -> Option<i64> {
        let caps = self.duration.captures(text.trim())?;
        let field = |i: usize| -> Option<i64> {
            caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
        };

        let (days, hours, minutes, seconds) = (field(1)?, field(2)?, field(3)?, field(4)?);
        if hours >= 24 || minutes >= 60 || seconds >= 60 {
            return None;
        }

        days.checked_mul(SECONDS_PER_DAY)?
            .checked_add(hours * 3600 + minutes * 60 + seconds)
    }

    /// `<number><K|M|G|T><type>` to whole megabytes and the type character
    pub fn parse_memory(&self, text: &str) -> Option<(i64, char)> {
        let caps = self.memory.captures(text.trim())?;
        let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
        let multiplier = match caps.get(2)?.as_str() {
            "K" => 1.0 / 1024.0,
            "M" => 1.0,
            "G" => 1024.0,
            "T" => 1024.0 * 1024.0,
            _ => return None,
        };
        let kind = caps.get(3)?.as_str().chars().next()?;

        let megabytes = (amount * multiplier).floor();
        if !megabytes.is_finite() || megabytes > i64::MAX as f64 {
            return None;
        }
        Some((megabytes as i64, kind))
    }

    fn memory_quantity(&self, text: &str) -> Document {
        let mut out = Map::with_capacity(2);
        match self.parse_memory(text) {
            Some((megabytes, kind)) => {
                out.insert("megabytes", Document::Int(megabytes));
                out.insert("type", Document::String(kind.to_string()));
            },
            None => {
                out.insert("type", Document::String(text.to_string()));
                out.insert("megabytes", Document::Int(0));
            },
        }
        Document::Map(out)
    }
}

/// `[[host, cores], ...]` to `[{hostname, value}, ...]`; the error sentinel
/// becomes `-1`. Entries that are not pairs are dropped.
fn convert_hostcores(value: Document) -> Document {
    let Document::Array(pairs) = value else {
        return value;
    };

    let converted = pairs
        .into_iter()
        .filter_map(|pair| match pair {
            Document::Array(mut items) if items.len() >= 2 => {
                let value = items.swap_remove(1);
                let hostname = items.swap_remove(0);
                let mut entry = Map::with_capacity(2);
                entry.insert("hostname", hostname);
                entry.insert("value", replace_sentinel(value));
                Some(Document::Map(entry))
            },
            _ => None,
        })
        .collect();

    Document::Array(converted)
}

fn replace_sentinel(value: Document) -> Document {
    match value {
        Document::String(s) if s == ERROR_SENTINEL => Document::Int(-1),
        Document::Array(items) => Document::Array(items.into_iter().map(replace_sentinel).collect()),
        other => other,
    }
}
