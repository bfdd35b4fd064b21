//! Reserved names of the document format.
//!
//! These keys are part of the wire contract shared with the server and
//! must not be altered.

/// Reserved keys of a document's metadata object.
pub mod metadata {
    /// Key under which a document carries its metadata.
    pub const KEY: &str = "@metadata";
    /// Collection the document belongs to.
    pub const COLLECTION: &str = "@collection";
    /// Projection marker.
    pub const PROJECTION: &str = "@projection";
    /// Document identifier.
    pub const ID: &str = "@id";
    /// Conflict marker set by the server on conflicted documents.
    pub const CONFLICT: &str = "@conflict";
    /// Document flags.
    pub const FLAGS: &str = "@flags";
    /// Attachments list.
    pub const ATTACHMENTS: &str = "@attachments";
    /// Query relevance score.
    pub const INDEX_SCORE: &str = "@index-score";
    /// Last modification timestamp.
    pub const LAST_MODIFIED: &str = "@last-modified";
    /// Client type marker.
    pub const TYPE_NAME: &str = "Raven-Node-Type";
    /// Concurrency token.
    pub const CHANGE_VECTOR: &str = "@change-vector";
    /// Expiration timestamp.
    pub const EXPIRES: &str = "@expires";
    /// Nested type markers.
    pub const NESTED_OBJECT_TYPES: &str = "@nested-object-types";
    /// Names of the counters attached to the document.
    pub const COUNTERS: &str = "@counters";
    /// Collection name used for documents of every collection.
    pub const ALL_DOCUMENTS_COLLECTION: &str = "@all_docs";
    /// Collection name used for documents without a collection.
    pub const EMPTY_COLLECTION: &str = "@empty";

    /// Keys owned by the server and skipped during change detection.
    pub const SERVER_OWNED: [&str; 4] = [LAST_MODIFIED, COLLECTION, CHANGE_VECTOR, ID];
}

/// Names used by counter requests.
pub mod counters {
    /// Sentinel requesting every counter of a document.
    pub const ALL: &str = "@all_counters";
}

/// Include path that refers to the document id itself.
pub const DOCUMENT_ID_FIELD_NAME: &str = "id()";

/// Returns true if `id` ends with a suffix that asks the server to assign
/// the final identifier (`orders|` or `orders/`).
///
/// Such ids are not unique until the batch has been committed.
#[must_use]
pub fn is_server_assigned_id(id: &str) -> bool {
    id.ends_with('|') || id.ends_with('/')
}
