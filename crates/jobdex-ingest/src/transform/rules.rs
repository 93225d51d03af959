//! Source-independent normalization rules

use jobdex_common::{Document, FieldPath, Map};

/// Identity field as stored by the source database.
pub const RESERVED_ID_FIELD: &str = "_id";

/// Field the reserved identity is moved to.
pub const ID_FIELD: &str = "id";

pub const NESTED_LIST_FIELD: &str = "nested_list";
pub const NESTED_KEY_FIELD: &str = "_key";
pub const NESTED_VALUE_FIELD: &str = "_value";

/// Keys containing this marker stay in place during consolidation.
const ERROR_MARKER: &str = "error";

/// Move `_id` to `id` so the sink's identity field is free for the
/// derived identifier.
pub fn rename_identity(doc: &mut Document) {
    if let Some(map) = doc.as_map_mut() {
        if let Some(value) = map.remove(RESERVED_ID_FIELD) {
            map.insert(ID_FIELD, value);
        }
    }
}

/// Remove every NaN and infinite float, at any depth.
///
/// Returns true when `value` itself is non-finite, so the caller can drop
/// it. Surviving sequence elements keep their order; emptied containers
/// stay.
pub fn purge_non_finite(value: &mut Document) -> bool {
    match value {
        Document::Map(map) => {
            map.retain(|_, child| !purge_non_finite(child));
            false
        },
        Document::Array(items) => {
            items.retain_mut(|child| !purge_non_finite(child));
            false
        },
        other => other.is_non_finite(),
    }
}

/// Turn the mapping at `path` into `{"nested_list": [...]}`.
///
/// Each entry becomes a list element tagged with `_key`; scalar and list
/// values are wrapped as `{"_value": v}` first. Keys containing "error"
/// are not moved.
pub fn consolidate(doc: &mut Document, path: &FieldPath) {
    let Some(Document::Map(map)) = path.get_mut(doc) else {
        return;
    };

    let mut kept = Map::new();
    let mut list = Vec::with_capacity(map.len());

    for (key, value) in std::mem::take(map) {
        if key.contains(ERROR_MARKER) {
            kept.insert(key, value);
            continue;
        }

        let mut entry = match value {
            Document::Map(inner) => inner,
            other => {
                let mut wrapped = Map::with_capacity(2);
                wrapped.insert(NESTED_VALUE_FIELD, other);
                wrapped
            },
        };
        entry.insert(NESTED_KEY_FIELD, Document::String(key));
        list.push(Document::Map(entry));
    }

    kept.insert(NESTED_LIST_FIELD, Document::Array(list));
    *map = kept;
}

/// Replace the value at `path` with its compact JSON text.
pub fn flatten_path(doc: &mut Document, path: &FieldPath) {
    path.update(doc, |value| stringify(&value));
}

/// Replace every value stored under one of `keys`, at any depth, with its
/// compact JSON text. Children are visited first. Values that are already
/// text are left alone, so a path flattened earlier is not encoded twice.
pub fn flatten_named_keys(value: &mut Document, keys: &[String]) {
    match value {
        Document::Map(map) => {
            for (key, child) in map.iter_mut() {
                flatten_named_keys(child, keys);
                if !matches!(child, Document::String(_)) && keys.iter().any(|k| k == key) {
                    *child = stringify(child);
                }
            }
        },
        Document::Array(items) => {
            for item in items {
                flatten_named_keys(item, keys);
            }
        },
        _ => {},
    }
}

fn stringify(value: &Document) -> Document {
    Document::String(value.to_json_value().to_string())
}
