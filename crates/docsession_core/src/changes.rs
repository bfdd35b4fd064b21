//! Structural change detection.
//!
//! A tracked entity is compared field by field against the document it was
//! loaded from (or last saved as). Server-owned metadata keys are ignored.

use crate::constants::metadata;
use crate::entity::DocumentInfo;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of a single detected change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// The document is staged for deletion.
    DocumentDeleted,
    /// The document has no persisted baseline yet.
    DocumentAdded,
    /// A field holds a different value.
    FieldChanged,
    /// A field was added.
    NewField,
    /// A field was removed.
    RemovedField,
    /// An array element holds a different value.
    ArrayValueChanged,
    /// An array grew.
    ArrayValueAdded,
    /// An array shrank.
    ArrayValueRemoved,
}

/// One field-level difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentsChanges {
    /// Value before the change.
    pub field_old_value: Option<Value>,
    /// Value after the change.
    pub field_new_value: Option<Value>,
    /// Kind of change.
    pub change: ChangeType,
    /// Name of the changed field, if the change is field-level.
    pub field_name: Option<String>,
    /// Dotted path of the object holding the field (empty at top level).
    pub field_path: Option<String>,
}

impl DocumentsChanges {
    /// Creates a document-level change.
    #[must_use]
    pub fn document(change: ChangeType) -> Self {
        Self {
            field_old_value: None,
            field_new_value: None,
            change,
            field_name: None,
            field_path: None,
        }
    }

    pub(crate) fn field(
        path: &str,
        name: &str,
        old: Option<&Value>,
        new: Option<&Value>,
        change: ChangeType,
    ) -> Self {
        Self {
            field_old_value: old.cloned(),
            field_new_value: new.cloned(),
            change,
            field_name: Some(name.to_string()),
            field_path: Some(path.to_string()),
        }
    }
}

/// Returns true if `new_document` differs from the baseline held by `info`.
///
/// Without a change list the comparison stops at the first difference. With
/// one, every difference is recorded.
pub fn entity_changed(
    new_document: &Value,
    info: &DocumentInfo,
    changes: Option<&mut Vec<DocumentsChanges>>,
) -> bool {
    let baseline = match &info.document {
        Some(document) if !info.new_document => document,
        _ => {
            if let Some(changes) = changes {
                changes.push(DocumentsChanges::document(ChangeType::DocumentAdded));
            }
            return true;
        }
    };

    match (baseline.as_object(), new_document.as_object()) {
        (Some(old), Some(new)) => {
            let mut detector = Detector { changes };
            detector.compare_objects("", old, new)
        }
        _ => baseline != new_document,
    }
}

struct Detector<'a> {
    changes: Option<&'a mut Vec<DocumentsChanges>>,
}

impl Detector<'_> {
    fn collecting(&self) -> bool {
        self.changes.is_some()
    }

    fn record(&mut self, change: DocumentsChanges) {
        if let Some(changes) = self.changes.as_deref_mut() {
            changes.push(change);
        }
    }

    fn compare_objects(&mut self, path: &str, old: &Map<String, Value>, new: &Map<String, Value>) -> bool {
        let mut changed = false;

        for (name, value) in old {
            if is_server_owned(name) || new.contains_key(name) {
                continue;
            }
            if !self.collecting() {
                return true;
            }
            changed = true;
            self.record(DocumentsChanges::field(
                path,
                name,
                Some(value),
                None,
                ChangeType::RemovedField,
            ));
        }

        for (name, new_value) in new {
            if is_server_owned(name) {
                continue;
            }
            let Some(old_value) = old.get(name) else {
                if !self.collecting() {
                    return true;
                }
                changed = true;
                self.record(DocumentsChanges::field(
                    path,
                    name,
                    None,
                    Some(new_value),
                    ChangeType::NewField,
                ));
                continue;
            };

            let differs = match (old_value, new_value) {
                (Value::Object(old_obj), Value::Object(new_obj)) => {
                    self.compare_objects(&child_path(path, name), old_obj, new_obj)
                }
                (Value::Array(old_arr), Value::Array(new_arr)) => {
                    self.compare_arrays(path, name, old_arr, new_arr)
                }
                (old_value, new_value) => {
                    let differs = !values_equal(old_value, new_value);
                    if differs {
                        self.record(DocumentsChanges::field(
                            path,
                            name,
                            Some(old_value),
                            Some(new_value),
                            ChangeType::FieldChanged,
                        ));
                    }
                    differs
                }
            };

            if differs {
                if !self.collecting() {
                    return true;
                }
                changed = true;
            }
        }

        changed
    }

    fn compare_arrays(&mut self, path: &str, name: &str, old: &[Value], new: &[Value]) -> bool {
        if old.len() != new.len() && !self.collecting() {
            return true;
        }

        let mut changed = false;
        for (old_item, new_item) in old.iter().zip(new) {
            let differs = match (old_item, new_item) {
                (Value::Object(old_obj), Value::Object(new_obj)) => {
                    self.compare_objects(&child_path(path, name), old_obj, new_obj)
                }
                (Value::Array(old_arr), Value::Array(new_arr)) => {
                    self.compare_arrays(path, name, old_arr, new_arr)
                }
                (old_item, new_item) => {
                    let differs = !values_equal(old_item, new_item);
                    if differs {
                        self.record(DocumentsChanges::field(
                            path,
                            name,
                            Some(old_item),
                            Some(new_item),
                            ChangeType::ArrayValueChanged,
                        ));
                    }
                    differs
                }
            };
            if differs {
                if !self.collecting() {
                    return true;
                }
                changed = true;
            }
        }

        for removed in old.iter().skip(new.len()) {
            changed = true;
            self.record(DocumentsChanges::field(
                path,
                name,
                Some(removed),
                None,
                ChangeType::ArrayValueRemoved,
            ));
        }
        for added in new.iter().skip(old.len()) {
            changed = true;
            self.record(DocumentsChanges::field(
                path,
                name,
                None,
                Some(added),
                ChangeType::ArrayValueAdded,
            ));
        }

        changed
    }
}

fn is_server_owned(name: &str) -> bool {
    metadata::SERVER_OWNED.contains(&name)
}

fn child_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

/// Numbers compare by value so `1` and `1.0` are equal.
fn values_equal(old: &Value, new: &Value) -> bool {
    match (old, new) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        _ => old == new,
    }
}
