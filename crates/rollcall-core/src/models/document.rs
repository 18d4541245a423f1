//! Replica member documents and dotted-path access

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A replica member document: nested JSON groups keyed by name.
pub type Document = Map<String, Value>;

/// Who performed a replica write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOrigin {
    /// Application or operator edit; detected and queued
    Local,
    /// Applied by the push channel or the reconciler; never re-queued
    Sync,
}

/// Look up a dotted path such as `profile.name`.
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set a dotted path, creating intermediate groups as needed.
///
/// A non-object value sitting where a group is expected gets replaced.
pub fn set_path(document: &mut Document, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut current = document;
    for segment in segments {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(leaf.to_string(), value);
}

/// Remove a dotted path, returning the previous value.
pub fn remove_path(document: &mut Document, path: &str) -> Option<Value> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };
    let container = match parent {
        Some(parent) => get_path_mut(document, parent)?.as_object_mut()?,
        None => document,
    };
    container.remove(leaf)
}

fn get_path_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let mut current = document.get_mut(segments.next()?)?;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn get_path_walks_groups() {
        let document = doc(json!({"profile": {"name": "Anna"}}));
        assert_eq!(get_path(&document, "profile.name"), Some(&json!("Anna")));
        assert_eq!(get_path(&document, "profile.email"), None);
        assert_eq!(get_path(&document, "profile.name.first"), None);
    }

    #[test]
    fn set_path_creates_missing_groups() {
        let mut document = Document::new();
        set_path(&mut document, "address.city", json!("Akureyri"));
        set_path(&mut document, "membership.status", json!("active"));
        assert_eq!(
            Value::Object(document),
            json!({"address": {"city": "Akureyri"}, "membership": {"status": "active"}})
        );
    }

    #[test]
    fn set_path_replaces_scalar_group() {
        let mut document = doc(json!({"profile": "broken"}));
        set_path(&mut document, "profile.name", json!("Anna"));
        assert_eq!(Value::Object(document), json!({"profile": {"name": "Anna"}}));
    }

    #[test]
    fn remove_path_returns_previous_value() {
        let mut document = doc(json!({"profile": {"name": "Anna", "email": "a@b.is"}}));
        assert_eq!(remove_path(&mut document, "profile.email"), Some(json!("a@b.is")));
        assert_eq!(remove_path(&mut document, "profile.email"), None);
        assert_eq!(Value::Object(document), json!({"profile": {"name": "Anna"}}));
    }
}
