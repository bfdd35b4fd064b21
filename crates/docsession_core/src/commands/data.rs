//! Batch commands and their wire form.

use crate::counters::CounterCache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Kind of a batch command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// Write a whole document.
    Put,
    /// Delete a document.
    Delete,
    /// Patch one document with a script.
    Patch,
    /// Patch many documents with one script.
    BatchPatch,
    /// Counter operations on one document.
    Counters,
    /// Upload an attachment.
    AttachmentPut,
    /// Delete an attachment.
    AttachmentDelete,
    /// Copy an attachment.
    AttachmentCopy,
    /// Move an attachment.
    AttachmentMove,
    /// Put a compare-exchange value.
    CompareExchangePut,
    /// Delete a compare-exchange value.
    CompareExchangeDelete,
}

impl CommandType {
    /// Returns the wire name of the command type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::BatchPatch => "BatchPATCH",
            Self::Counters => "Counters",
            Self::AttachmentPut => "AttachmentPUT",
            Self::AttachmentDelete => "AttachmentDELETE",
            Self::AttachmentCopy => "AttachmentCOPY",
            Self::AttachmentMove => "AttachmentMOVE",
            Self::CompareExchangePut => "CompareExchangePUT",
            Self::CompareExchangeDelete => "CompareExchangeDELETE",
        }
    }

    /// Returns true if commands of this type change the document body.
    #[must_use]
    pub const fn modifies_document(self) -> bool {
        matches!(self, Self::Put | Self::Delete | Self::Patch | Self::BatchPatch)
    }

    /// Returns true if this type may appear in a cluster-wide transaction.
    #[must_use]
    pub const fn allowed_in_cluster_transaction(self) -> bool {
        matches!(
            self,
            Self::Put | Self::Delete | Self::CompareExchangePut | Self::CompareExchangeDelete
        )
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A patch script with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatchRequest {
    /// Script source.
    pub script: String,
    /// Named script arguments.
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl PatchRequest {
    /// Creates a patch without arguments.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            values: Map::new(),
        }
    }

    /// Adds a named argument.
    #[must_use]
    pub fn value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

/// Kind of a counter operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterOperationType {
    /// Add a delta, creating the counter if needed.
    Increment,
    /// Remove the counter.
    Delete,
    /// Read the counter.
    Get,
}

/// One operation inside a [`CommandData::Counters`] command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CounterOperation {
    /// Operation kind.
    #[serde(rename = "Type")]
    pub kind: CounterOperationType,
    /// Target counter.
    pub counter_name: String,
    /// Increment amount.
    #[serde(default)]
    pub delta: i64,
}

impl CounterOperation {
    /// Creates an increment.
    pub fn increment(counter_name: impl Into<String>, delta: i64) -> Self {
        Self {
            kind: CounterOperationType::Increment,
            counter_name: counter_name.into(),
            delta,
        }
    }

    /// Creates a delete.
    pub fn delete(counter_name: impl Into<String>) -> Self {
        Self {
            kind: CounterOperationType::Delete,
            counter_name: counter_name.into(),
            delta: 0,
        }
    }
}

/// A single command of a save-changes batch.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandData {
    /// Write a whole document.
    Put {
        /// Document id.
        id: String,
        /// Expected change vector; `Some("")` asserts the document is new.
        change_vector: Option<String>,
        /// Full document including `@metadata`.
        document: Value,
    },
    /// Delete a document.
    Delete {
        /// Document id.
        id: String,
        /// Expected change vector.
        change_vector: Option<String>,
    },
    /// Patch a document.
    Patch {
        /// Document id.
        id: String,
        /// Expected change vector.
        change_vector: Option<String>,
        /// Patch to apply.
        patch: PatchRequest,
        /// Patch to apply if the document does not exist.
        patch_if_missing: Option<PatchRequest>,
    },
    /// Patch several documents with one script.
    BatchPatch {
        /// Targets as `(id, expected change vector)`.
        ids: Vec<(String, Option<String>)>,
        /// Patch to apply.
        patch: PatchRequest,
    },
    /// Counter operations on a document.
    Counters {
        /// Document id.
        id: String,
        /// Operations in order.
        operations: Vec<CounterOperation>,
    },
    /// Upload an attachment.
    AttachmentPut {
        /// Document id.
        id: String,
        /// Attachment name.
        name: String,
        /// MIME type.
        content_type: Option<String>,
        /// Expected change vector.
        change_vector: Option<String>,
    },
    /// Delete an attachment.
    AttachmentDelete {
        /// Document id.
        id: String,
        /// Attachment name.
        name: String,
        /// Expected change vector.
        change_vector: Option<String>,
    },
    /// Copy an attachment.
    AttachmentCopy {
        /// Source document id.
        id: String,
        /// Source attachment name.
        name: String,
        /// Destination document id.
        destination_id: String,
        /// Destination attachment name.
        destination_name: String,
        /// Expected change vector.
        change_vector: Option<String>,
    },
    /// Move an attachment.
    AttachmentMove {
        /// Source document id.
        id: String,
        /// Source attachment name.
        name: String,
        /// Destination document id.
        destination_id: String,
        /// Destination attachment name.
        destination_name: String,
        /// Expected change vector.
        change_vector: Option<String>,
    },
    /// Put a compare-exchange value.
    CompareExchangePut {
        /// Compare-exchange key.
        key: String,
        /// Value to store.
        value: Value,
        /// Expected index; 0 creates the key.
        index: u64,
    },
    /// Delete a compare-exchange value.
    CompareExchangeDelete {
        /// Compare-exchange key.
        key: String,
        /// Expected index.
        index: u64,
    },
}

impl CommandData {
    /// Creates a put.
    pub fn put(id: impl Into<String>, change_vector: Option<String>, document: Value) -> Self {
        Self::Put {
            id: id.into(),
            change_vector,
            document,
        }
    }

    /// Creates a delete.
    pub fn delete(id: impl Into<String>, change_vector: Option<String>) -> Self {
        Self::Delete {
            id: id.into(),
            change_vector,
        }
    }

    /// Creates a patch.
    pub fn patch(id: impl Into<String>, change_vector: Option<String>, patch: PatchRequest) -> Self {
        Self::Patch {
            id: id.into(),
            change_vector,
            patch,
            patch_if_missing: None,
        }
    }

    /// Creates a batch patch over `ids`.
    pub fn batch_patch<I, S>(ids: I, patch: PatchRequest) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::BatchPatch {
            ids: ids.into_iter().map(|id| (id.into(), None)).collect(),
            patch,
        }
    }

    /// Creates a counters command.
    pub fn counters(id: impl Into<String>, operations: Vec<CounterOperation>) -> Self {
        Self::Counters {
            id: id.into(),
            operations,
        }
    }

    /// Creates an attachment delete.
    pub fn attachment_delete(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AttachmentDelete {
            id: id.into(),
            name: name.into(),
            change_vector: None,
        }
    }

    /// Returns the command type.
    #[must_use]
    pub fn command_type(&self) -> CommandType {
        match self {
            Self::Put { .. } => CommandType::Put,
            Self::Delete { .. } => CommandType::Delete,
            Self::Patch { .. } => CommandType::Patch,
            Self::BatchPatch { .. } => CommandType::BatchPatch,
            Self::Counters { .. } => CommandType::Counters,
            Self::AttachmentPut { .. } => CommandType::AttachmentPut,
            Self::AttachmentDelete { .. } => CommandType::AttachmentDelete,
            Self::AttachmentCopy { .. } => CommandType::AttachmentCopy,
            Self::AttachmentMove { .. } => CommandType::AttachmentMove,
            Self::CompareExchangePut { .. } => CommandType::CompareExchangePut,
            Self::CompareExchangeDelete { .. } => CommandType::CompareExchangeDelete,
        }
    }

    /// Returns the target id; batch patches have none.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Put { id, .. }
            | Self::Delete { id, .. }
            | Self::Patch { id, .. }
            | Self::Counters { id, .. }
            | Self::AttachmentPut { id, .. }
            | Self::AttachmentDelete { id, .. }
            | Self::AttachmentCopy { id, .. }
            | Self::AttachmentMove { id, .. } => Some(id.as_str()),
            Self::CompareExchangePut { key, .. } | Self::CompareExchangeDelete { key, .. } => {
                Some(key.as_str())
            }
            Self::BatchPatch { .. } => None,
        }
    }

    /// Returns the secondary name (attachment name) used in conflict keys.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::AttachmentPut { name, .. }
            | Self::AttachmentDelete { name, .. }
            | Self::AttachmentCopy { name, .. }
            | Self::AttachmentMove { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Returns the expected change vector.
    #[must_use]
    pub fn change_vector(&self) -> Option<&str> {
        match self {
            Self::Put { change_vector, .. }
            | Self::Delete { change_vector, .. }
            | Self::Patch { change_vector, .. }
            | Self::AttachmentPut { change_vector, .. }
            | Self::AttachmentDelete { change_vector, .. }
            | Self::AttachmentCopy { change_vector, .. }
            | Self::AttachmentMove { change_vector, .. } => change_vector.as_deref(),
            _ => None,
        }
    }

    /// Serializes the command to its wire form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let kind = self.command_type().as_str();
        match self {
            Self::Put {
                id,
                change_vector,
                document,
            } => json!({
                "Id": id,
                "ChangeVector": change_vector,
                "Document": document,
                "Type": kind,
            }),
            Self::Delete { id, change_vector } => json!({
                "Id": id,
                "ChangeVector": change_vector,
                "Type": kind,
            }),
            Self::Patch {
                id,
                change_vector,
                patch,
                patch_if_missing,
            } => json!({
                "Id": id,
                "ChangeVector": change_vector,
                "Patch": patch,
                "PatchIfMissing": patch_if_missing,
                "Type": kind,
            }),
            Self::BatchPatch { ids, patch } => json!({
                "Ids": ids
                    .iter()
                    .map(|(id, cv)| json!({"Id": id, "ChangeVector": cv}))
                    .collect::<Vec<_>>(),
                "Patch": patch,
                "Type": kind,
            }),
            Self::Counters { id, operations } => json!({
                "Id": id,
                "Counters": {"DocumentId": id, "Operations": operations},
                "Type": kind,
            }),
            Self::AttachmentPut {
                id,
                name,
                content_type,
                change_vector,
            } => json!({
                "Id": id,
                "Name": name,
                "ContentType": content_type,
                "ChangeVector": change_vector,
                "Type": kind,
            }),
            Self::AttachmentDelete {
                id,
                name,
                change_vector,
            } => json!({
                "Id": id,
                "Name": name,
                "ChangeVector": change_vector,
                "Type": kind,
            }),
            Self::AttachmentCopy {
                id,
                name,
                destination_id,
                destination_name,
                change_vector,
            }
            | Self::AttachmentMove {
                id,
                name,
                destination_id,
                destination_name,
                change_vector,
            } => json!({
                "Id": id,
                "Name": name,
                "DestinationId": destination_id,
                "DestinationName": destination_name,
                "ChangeVector": change_vector,
                "Type": kind,
            }),
            Self::CompareExchangePut { key, value, index } => json!({
                "Id": key,
                "Document": {"Object": value},
                "Index": index,
                "Type": kind,
            }),
            Self::CompareExchangeDelete { key, index } => json!({
                "Id": key,
                "Index": index,
                "Type": kind,
            }),
        }
    }

    /// Hook run once per deferred command just before the batch is sent.
    ///
    /// Deletes drop the document's cached counters; counter operations drop
    /// the cached values they touch.
    pub fn on_before_save_changes(&self, counters: &mut CounterCache) {
        match self {
            Self::Delete { id, .. } => {
                counters.remove(id);
            }
            Self::Counters { id, operations } => {
                let names: Vec<String> = operations
                    .iter()
                    .map(|op| op.counter_name.clone())
                    .collect();
                counters.invalidate(id, &names);
            }
            _ => {}
        }
    }
}
