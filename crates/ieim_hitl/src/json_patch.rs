use serde_json::Value;
use thiserror::Error;

use ieim_schema::PatchOp;

#[derive(Debug, Error)]
pub enum JsonPatchError {
    #[error("json patch path must start with '/': {0}")]
    NotAPointer(String),
    #[error("json patch '-' is only allowed in the final segment")]
    DashNotFinal,
    #[error("json patch list index must be an integer: {0}")]
    BadIndex(String),
    #[error("json patch list index out of range: {0}")]
    IndexOutOfRange(usize),
    #[error("json patch path segment not found: {0}")]
    SegmentNotFound(String),
    #[error("json patch cannot traverse into a scalar value")]
    NotTraversable,
    #[error("json patch replace missing key: {0}")]
    ReplaceMissingKey(String),
    #[error("json patch remove missing key: {0}")]
    RemoveMissingKey(String),
    #[error("json patch replace does not support '-' index")]
    ReplaceDash,
    #[error("json patch remove does not support '-' index")]
    RemoveDash,
    #[error("json patch target must be an object or array")]
    NotObjectOrArray,
}

fn decode_segment(seg: &str) -> String {
    seg.replace("~1", "/").replace("~0", "~")
}

fn split_pointer(path: &str) -> Result<Vec<String>, JsonPatchError> {
    if path.is_empty() {
        return Ok(vec![]);
    }
    if !path.starts_with('/') {
        return Err(JsonPatchError::NotAPointer(path.to_string()));
    }
    Ok(path.split('/').skip(1).map(decode_segment).collect())
}

enum ParsedIndex {
    Append,
    At(usize),
}

fn parse_index(seg: &str) -> Result<ParsedIndex, JsonPatchError> {
    if seg == "-" {
        return Ok(ParsedIndex::Append);
    }
    seg.parse::<usize>().map(ParsedIndex::At).map_err(|_| JsonPatchError::BadIndex(seg.to_string()))
}

fn resolve_parent<'a>(doc: &'a mut Value, path: &str) -> Result<(&'a mut Value, String), JsonPatchError> {
    let parts = split_pointer(path)?;
    let (last, init) = parts.split_last().ok_or_else(|| JsonPatchError::NotAPointer(path.to_string()))?;
    let mut parent = doc;
    for seg in init {
        parent = match parent {
            Value::Object(map) => map.get_mut(seg).ok_or_else(|| JsonPatchError::SegmentNotFound(seg.clone()))?,
            Value::Array(arr) => {
                if seg == "-" {
                    return Err(JsonPatchError::DashNotFinal);
                }
                match parse_index(seg)? {
                    ParsedIndex::Append => return Err(JsonPatchError::DashNotFinal),
                    ParsedIndex::At(idx) => arr.get_mut(idx).ok_or(JsonPatchError::IndexOutOfRange(idx))?,
                }
            }
            _ => return Err(JsonPatchError::NotTraversable),
        };
    }
    Ok((parent, last.clone()))
}

/// Apply a sequence of `add`/`replace`/`remove` operations against a JSON
/// document in order, resolving each op's parent via an RFC 6901 pointer.
/// `-` is accepted only as the final segment of an `add` path (array
/// append); every other failure mode fails closed with an error rather
/// than silently skipping the op.
pub fn apply_json_patch(mut doc: Value, ops: &[PatchOp]) -> Result<Value, JsonPatchError> {
    for op in ops {
        match op {
            PatchOp::Add { path, value } => {
                let (parent, key) = resolve_parent(&mut doc, path)?;
                match parent {
                    Value::Object(map) => {
                        map.insert(key, value.clone());
                    }
                    Value::Array(arr) => match parse_index(&key)? {
                        ParsedIndex::Append => arr.push(value.clone()),
                        ParsedIndex::At(idx) => {
                            if idx > arr.len() {
                                return Err(JsonPatchError::IndexOutOfRange(idx));
                            }
                            arr.insert(idx, value.clone());
                        }
                    },
                    _ => return Err(JsonPatchError::NotObjectOrArray),
                }
            }
            PatchOp::Replace { path, value } => {
                let (parent, key) = resolve_parent(&mut doc, path)?;
                match parent {
                    Value::Object(map) => {
                        if !map.contains_key(&key) {
                            return Err(JsonPatchError::ReplaceMissingKey(key));
                        }
                        map.insert(key, value.clone());
                    }
                    Value::Array(arr) => match parse_index(&key)? {
                        ParsedIndex::Append => return Err(JsonPatchError::ReplaceDash),
                        ParsedIndex::At(idx) => {
                            if idx >= arr.len() {
                                return Err(JsonPatchError::IndexOutOfRange(idx));
                            }
                            arr[idx] = value.clone();
                        }
                    },
                    _ => return Err(JsonPatchError::NotObjectOrArray),
                }
            }
            PatchOp::Remove { path } => {
                let (parent, key) = resolve_parent(&mut doc, path)?;
                match parent {
                    Value::Object(map) => {
                        if map.remove(&key).is_none() {
                            return Err(JsonPatchError::RemoveMissingKey(key));
                        }
                    }
                    Value::Array(arr) => match parse_index(&key)? {
                        ParsedIndex::Append => return Err(JsonPatchError::RemoveDash),
                        ParsedIndex::At(idx) => {
                            if idx >= arr.len() {
                                return Err(JsonPatchError::IndexOutOfRange(idx));
                            }
                            arr.remove(idx);
                        }
                    },
                    _ => return Err(JsonPatchError::NotObjectOrArray),
                }
            }
        }
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_appends_to_array_with_dash() {
        let doc = json!({"items": [1, 2]});
        let ops = vec![PatchOp::Add { path: "/items/-".into(), value: json!(3) }];
        let out = apply_json_patch(doc, &ops).unwrap();
        assert_eq!(out, json!({"items": [1, 2, 3]}));
    }

    #[test]
    fn replace_missing_key_fails_closed() {
        let doc = json!({"a": 1});
        let ops = vec![PatchOp::Replace { path: "/b".into(), value: json!(2) }];
        assert!(apply_json_patch(doc, &ops).is_err());
    }

    #[test]
    fn remove_then_add_applies_in_order() {
        let doc = json!({"a": 1, "b": 2});
        let ops = vec![PatchOp::Remove { path: "/a".into() }, PatchOp::Add { path: "/c".into(), value: json!(3) }];
        let out = apply_json_patch(doc, &ops).unwrap();
        assert_eq!(out, json!({"b": 2, "c": 3}));
    }
}
