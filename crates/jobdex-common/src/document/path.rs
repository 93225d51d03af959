//! Dotted-path navigation over [`Document`]
//!
//! Every operation treats a missing segment, a type mismatch along the way
//! or an out-of-range index as "absent" and does nothing. Callers never have
//! to check whether a record carries a field before touching it.

use super::Document;
use std::fmt;

/// A parsed dotted path such as `acct.hostcores` or `cpu.nodes.0.user`.
///
/// Numeric segments index into sequences; against a mapping they are
/// ordinary keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Split a dotted path. Empty segments are dropped, so `"a..b"` is `a.b`.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, i.e. the field name the path points at.
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn get<'a>(&self, doc: &'a Document) -> Option<&'a Document> {
        self.segments
            .iter()
            .try_fold(doc, |current, segment| step(current, segment))
    }

    pub fn get_mut<'a>(&self, doc: &'a mut Document) -> Option<&'a mut Document> {
        self.segments
            .iter()
            .try_fold(doc, |current, segment| step_mut(current, segment))
    }

    /// Container holding the leaf, if every segment before it resolves.
    fn parent_mut<'a>(&self, doc: &'a mut Document) -> Option<(&'a mut Document, &str)> {
        let (leaf, parents) = self.segments.split_last()?;
        let parent = parents
            .iter()
            .try_fold(doc, |current, segment| step_mut(current, segment))?;
        Some((parent, leaf.as_str()))
    }

    /// Write `value` at the path.
    ///
    /// Replaces an existing leaf, or adds a new key when the parent is a
    /// mapping. Returns false (and drops `value`) when the parent is absent.
    pub fn set(&self, doc: &mut Document, value: Document) -> bool {
        let Some((parent, leaf)) = self.parent_mut(doc) else {
            return false;
        };
        match parent {
            Document::Map(map) => {
                map.insert(leaf, value);
                true
            },
            Document::Array(items) => match leaf.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(slot) => {
                    *slot = value;
                    true
                },
                None => false,
            },
            _ => false,
        }
    }

    /// Detach and return the value at the path.
    pub fn remove(&self, doc: &mut Document) -> Option<Document> {
        let (parent, leaf) = self.parent_mut(doc)?;
        match parent {
            Document::Map(map) => map.remove(leaf),
            Document::Array(items) => {
                let idx = leaf.parse::<usize>().ok()?;
                (idx < items.len()).then(|| items.remove(idx))
            },
            _ => None,
        }
    }

    /// Replace the value at the path with `f(old)`. No-op when absent.
    pub fn update(&self, doc: &mut Document, f: impl FnOnce(Document) -> Document) -> bool {
        match self.get_mut(doc) {
            Some(slot) => {
                let old = std::mem::take(slot);
                *slot = f(old);
                true
            },
            None => false,
        }
    }
}

fn step<'a>(current: &'a Document, segment: &str) -> Option<&'a Document> {
    match current {
        Document::Map(map) => map.get(segment),
        Document::Array(items) => items.get(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

fn step_mut<'a>(current: &'a mut Document, segment: &str) -> Option<&'a mut Document> {
    match current {
        Document::Map(map) => map.get_mut(segment),
        Document::Array(items) => items.get_mut(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}
