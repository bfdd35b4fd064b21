//! In-memory transport with server-side semantics.
//!
//! Batches are transactional: every command is checked against a working
//! copy of the data and the copy is committed only if all of them succeed.
//! Patches apply their `Values` as top-level field assignments; scripts are
//! not evaluated.

use async_trait::async_trait;
use chrono::Utc;
use docsession_core::constants::{is_server_assigned_id, metadata};
use docsession_core::includes::collect_include_ids;
use docsession_core::{
    BatchCommand, BatchCommandResult, ReadBalanceBehavior, ReadRequest, ServerNode, SessionInfo,
    TransactionMode, Transport, TransportError,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Data held by the in-memory server.
#[derive(Debug, Clone, Default)]
struct Data {
    documents: IndexMap<String, Value>,
    counters: HashMap<String, IndexMap<String, i64>>,
    compare_exchange: HashMap<String, (Value, u64)>,
    etag: u64,
    identities: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct ServerState {
    data: Data,
    transaction_index: u64,
    batches: Vec<BatchCommand>,
    reads: Vec<ReadRequest>,
    fail_next_dispatch: Option<TransportError>,
    round_robin: u64,
}

/// A [`Transport`] backed by an in-memory document store.
#[derive(Debug)]
pub struct InMemoryTransport {
    state: Mutex<ServerState>,
    nodes: Vec<ServerNode>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Creates a transport serving a single node.
    #[must_use]
    pub fn new() -> Self {
        Self::with_nodes(vec![ServerNode::new("http://127.0.0.1:8080", "shop", "A")])
    }

    /// Creates a transport serving `nodes`.
    #[must_use]
    pub fn with_nodes(nodes: Vec<ServerNode>) -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            nodes,
        }
    }

    /// Stores a document directly, bypassing sessions. Returns its change
    /// vector.
    pub fn seed(&self, id: &str, collection: &str, body: Value) -> String {
        let mut state = self.state.lock();
        let data = &mut state.data;
        data.etag += 1;
        let change_vector = format!("A:{}", data.etag);
        let mut document = body;
        if let Some(fields) = document.as_object_mut() {
            fields.insert(
                metadata::KEY.to_string(),
                json!({
                    metadata::ID: id,
                    metadata::COLLECTION: collection,
                    metadata::CHANGE_VECTOR: change_vector,
                    metadata::LAST_MODIFIED: Utc::now().to_rfc3339(),
                }),
            );
        }
        data.documents.insert(id.to_lowercase(), document);
        change_vector
    }

    /// Sets a counter directly.
    pub fn seed_counter(&self, id: &str, name: &str, value: i64) {
        self.state
            .lock()
            .data
            .counters
            .entry(id.to_lowercase())
            .or_default()
            .insert(name.to_string(), value);
    }

    /// Returns the stored form of a document.
    #[must_use]
    pub fn document(&self, id: &str) -> Option<Value> {
        self.state.lock().data.documents.get(&id.to_lowercase()).cloned()
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.state.lock().data.documents.len()
    }

    /// Returns the value of a counter.
    #[must_use]
    pub fn counter(&self, id: &str, name: &str) -> Option<i64> {
        self.state
            .lock()
            .data
            .counters
            .get(&id.to_lowercase())
            .and_then(|counters| counters.get(name).copied())
    }

    /// Returns a compare-exchange value and its index.
    #[must_use]
    pub fn compare_exchange(&self, key: &str) -> Option<(Value, u64)> {
        self.state.lock().data.compare_exchange.get(key).cloned()
    }

    /// Returns every batch dispatched so far.
    #[must_use]
    pub fn batches(&self) -> Vec<BatchCommand> {
        self.state.lock().batches.clone()
    }

    /// Returns every read executed so far.
    #[must_use]
    pub fn reads(&self) -> Vec<ReadRequest> {
        self.state.lock().reads.clone()
    }

    /// Makes the next dispatch fail with `error` without touching any data.
    pub fn fail_next_dispatch(&self, error: TransportError) {
        self.state.lock().fail_next_dispatch = Some(error);
    }

    fn read_document(data: &Data, id: &str) -> Option<Value> {
        let key = id.to_lowercase();
        let mut document = data.documents.get(&key)?.clone();
        if let Some(counters) = data.counters.get(&key).filter(|c| !c.is_empty()) {
            if let Some(meta) = document
                .get_mut(metadata::KEY)
                .and_then(Value::as_object_mut)
            {
                let names: Vec<Value> = counters.keys().cloned().map(Value::String).collect();
                meta.insert(metadata::COUNTERS.to_string(), Value::Array(names));
            }
        }
        Some(document)
    }

    fn get_documents(data: &Data, ids: &[String], includes: &[String]) -> Value {
        let results: Vec<Value> = ids
            .iter()
            .map(|id| Self::read_document(data, id).unwrap_or(Value::Null))
            .collect();

        let mut included = Map::new();
        for document in results.iter().filter(|doc| !doc.is_null()) {
            for path in includes {
                for id in collect_include_ids(document, path) {
                    let value = Self::read_document(data, &id).unwrap_or(Value::Null);
                    included.entry(id).or_insert(value);
                }
            }
        }
        json!({"Results": results, "Includes": included})
    }

    fn get_counters(data: &Data, id: &str, names: &[String]) -> Value {
        let stored = data.counters.get(&id.to_lowercase());
        let counters: Vec<Value> = if names.is_empty() {
            stored
                .into_iter()
                .flatten()
                .map(|(name, value)| counter_detail(id, name, *value))
                .collect()
        } else {
            names
                .iter()
                .map(|name| {
                    stored
                        .and_then(|counters| {
                            counters
                                .iter()
                                .find(|(stored, _)| stored.eq_ignore_ascii_case(name))
                        })
                        .map_or(Value::Null, |(name, value)| counter_detail(id, name, *value))
                })
                .collect()
        };
        json!({"Counters": counters})
    }
}

fn counter_detail(id: &str, name: &str, value: i64) -> Value {
    json!({"DocumentId": id, "CounterName": name, "TotalValue": value})
}

fn string_field<'a>(command: &'a Value, field: &str) -> Result<&'a str, TransportError> {
    command
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| TransportError::protocol(format!("command is missing '{field}'")))
}

impl Data {
    fn next_change_vector(&mut self) -> String {
        self.etag += 1;
        format!("A:{}", self.etag)
    }

    fn check_change_vector(&self, id: &str, expected: Option<&str>) -> Result<(), TransportError> {
        let Some(expected) = expected else {
            return Ok(());
        };
        let current = self
            .documents
            .get(&id.to_lowercase())
            .and_then(|doc| doc.get(metadata::KEY))
            .and_then(|meta| meta.get(metadata::CHANGE_VECTOR))
            .and_then(Value::as_str);
        match current {
            None if expected.is_empty() => Ok(()),
            Some(current) if current == expected => Ok(()),
            current => Err(TransportError::concurrency(
                id,
                format!("expected change vector '{expected}' but found {current:?}"),
            )),
        }
    }

    fn assign_id(&mut self, id: &str, collection: Option<&str>) -> String {
        if !id.is_empty() && !is_server_assigned_id(id) {
            return id.to_string();
        }
        let prefix = match id.strip_suffix(['|', '/']) {
            Some(prefix) if !prefix.is_empty() => prefix.to_string(),
            _ => collection.unwrap_or("docs").to_lowercase(),
        };
        let next = self.identities.entry(prefix.to_lowercase()).or_insert(0);
        *next += 1;
        if id.ends_with('|') {
            format!("{prefix}/{next}")
        } else {
            format!("{prefix}/{next:019}-A")
        }
    }

    fn put(&mut self, command: &Value) -> Result<Value, TransportError> {
        let raw_id = command.get("Id").and_then(Value::as_str).unwrap_or_default();
        let mut document = command
            .get("Document")
            .filter(|doc| doc.is_object())
            .cloned()
            .ok_or_else(|| TransportError::protocol("PUT requires a document"))?;
        let collection = document
            .get(metadata::KEY)
            .and_then(|meta| meta.get(metadata::COLLECTION))
            .and_then(Value::as_str)
            .map(str::to_string);

        let id = self.assign_id(raw_id, collection.as_deref());
        self.check_change_vector(&id, command.get("ChangeVector").and_then(Value::as_str))?;

        let change_vector = self.next_change_vector();
        let last_modified = Utc::now().to_rfc3339();
        if let Some(fields) = document.as_object_mut() {
            let meta = fields
                .entry(metadata::KEY.to_string())
                .or_insert_with(|| json!({}));
            if let Some(meta) = meta.as_object_mut() {
                meta.insert(metadata::ID.to_string(), json!(id));
                meta.insert(metadata::CHANGE_VECTOR.to_string(), json!(change_vector));
                meta.insert(metadata::LAST_MODIFIED.to_string(), json!(last_modified));
                meta.remove(metadata::COUNTERS);
            }
        }
        self.documents.insert(id.to_lowercase(), document);

        Ok(json!({
            "Type": "PUT",
            metadata::ID: id,
            metadata::COLLECTION: collection,
            metadata::CHANGE_VECTOR: change_vector,
            metadata::LAST_MODIFIED: last_modified,
        }))
    }

    fn delete(&mut self, command: &Value) -> Result<Value, TransportError> {
        let id = string_field(command, "Id")?;
        self.check_change_vector(id, command.get("ChangeVector").and_then(Value::as_str))?;
        let deleted = self.documents.shift_remove(&id.to_lowercase()).is_some();
        self.counters.remove(&id.to_lowercase());
        Ok(json!({"Type": "DELETE", metadata::ID: id, "Deleted": deleted}))
    }

    fn patch_one(
        &mut self,
        id: &str,
        change_vector: Option<&str>,
        values: Option<&Value>,
    ) -> Result<Value, TransportError> {
        self.check_change_vector(id, change_vector)?;
        let key = id.to_lowercase();
        if !self.documents.contains_key(&key) {
            return Ok(json!({"Type": "PATCH", "Id": id, "Status": "DocumentDoesNotExist"}));
        }
        let change_vector = self.next_change_vector();
        let Some(document) = self.documents.get_mut(&key) else {
            return Ok(json!({"Type": "PATCH", "Id": id, "Status": "DocumentDoesNotExist"}));
        };
        if let (Some(fields), Some(values)) = (document.as_object_mut(), values.and_then(Value::as_object)) {
            for (name, value) in values {
                fields.insert(name.clone(), value.clone());
            }
        }
        if let Some(meta) = document
            .get_mut(metadata::KEY)
            .and_then(Value::as_object_mut)
        {
            meta.insert(metadata::CHANGE_VECTOR.to_string(), json!(change_vector));
        }
        Ok(json!({
            "Type": "PATCH",
            "Id": id,
            "ChangeVector": change_vector,
            "Status": "Patched",
            "ModifiedDocument": document.clone(),
        }))
    }

    fn patch(&mut self, command: &Value) -> Result<Value, TransportError> {
        let id = string_field(command, "Id")?;
        let values = command.get("Patch").and_then(|patch| patch.get("Values"));
        self.patch_one(id, command.get("ChangeVector").and_then(Value::as_str), values)
    }

    fn batch_patch(&mut self, command: &Value) -> Result<Value, TransportError> {
        let values = command.get("Patch").and_then(|patch| patch.get("Values")).cloned();
        let targets = command
            .get("Ids")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut results = Vec::with_capacity(targets.len());
        for target in &targets {
            let id = string_field(target, "Id")?;
            let change_vector = target.get("ChangeVector").and_then(Value::as_str);
            results.push(self.patch_one(id, change_vector, values.as_ref())?);
        }
        Ok(json!({"Type": "BatchPATCH", "Results": results}))
    }

    fn counters(&mut self, command: &Value) -> Result<Value, TransportError> {
        let id = string_field(command, "Id")?;
        if !self.documents.contains_key(&id.to_lowercase()) {
            return Err(TransportError::Server {
                status: 404,
                message: format!("document {id} does not exist"),
            });
        }
        let operations = command
            .get("Counters")
            .and_then(|counters| counters.get("Operations"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let counters = self.counters.entry(id.to_lowercase()).or_default();
        let mut details = Vec::new();
        for operation in &operations {
            let name = string_field(operation, "CounterName")?;
            match operation.get("Type").and_then(Value::as_str) {
                Some("Increment") => {
                    let delta = operation.get("Delta").and_then(Value::as_i64).unwrap_or(0);
                    let total = counters.entry(name.to_string()).or_insert(0);
                    *total += delta;
                    details.push(counter_detail(id, name, *total));
                }
                Some("Delete") => {
                    counters.shift_remove(name);
                }
                _ => {}
            }
        }
        Ok(json!({
            "Type": "Counters",
            "Id": id,
            "CountersDetail": {"Counters": details},
        }))
    }

    fn compare_exchange_put(&mut self, command: &Value) -> Result<Value, TransportError> {
        let key = string_field(command, "Id")?;
        let expected = command.get("Index").and_then(Value::as_u64).unwrap_or(0);
        let current = self.compare_exchange.get(key).map(|(_, index)| *index);
        if current.unwrap_or(0) != expected {
            return Err(TransportError::concurrency(
                key,
                format!("expected index {expected} but found {current:?}"),
            ));
        }
        self.etag += 1;
        let value = command
            .get("Document")
            .and_then(|doc| doc.get("Object"))
            .cloned()
            .unwrap_or(Value::Null);
        self.compare_exchange.insert(key.to_string(), (value, self.etag));
        Ok(json!({"Type": "CompareExchangePUT", "Key": key, "Index": self.etag}))
    }

    fn compare_exchange_delete(&mut self, command: &Value) -> Result<Value, TransportError> {
        let key = string_field(command, "Id")?;
        let expected = command.get("Index").and_then(Value::as_u64).unwrap_or(0);
        match self.compare_exchange.get(key) {
            Some((_, index)) if *index == expected => {
                self.compare_exchange.remove(key);
                Ok(json!({"Type": "CompareExchangeDELETE", "Key": key}))
            }
            current => Err(TransportError::concurrency(
                key,
                format!("expected index {expected} but found {:?}", current.map(|(_, i)| i)),
            )),
        }
    }

    fn execute(&mut self, command: &Value) -> Result<Value, TransportError> {
        match string_field(command, "Type")? {
            "PUT" => self.put(command),
            "DELETE" => self.delete(command),
            "PATCH" => self.patch(command),
            "BatchPATCH" => self.batch_patch(command),
            "Counters" => self.counters(command),
            "CompareExchangePUT" => self.compare_exchange_put(command),
            "CompareExchangeDELETE" => self.compare_exchange_delete(command),
            kind @ ("AttachmentPUT" | "AttachmentDELETE" | "AttachmentCOPY" | "AttachmentMOVE") => {
                let id = string_field(command, "Id")?;
                Ok(json!({"Type": kind, metadata::ID: id}))
            }
            other => Err(TransportError::protocol(format!("unknown command type '{other}'"))),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn dispatch(
        &self,
        _database: &str,
        batch: &BatchCommand,
        _session: &SessionInfo,
    ) -> Result<BatchCommandResult, TransportError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next_dispatch.take() {
            return Err(error);
        }
        state.batches.push(batch.clone());

        let mut working = state.data.clone();
        let mut results = Vec::with_capacity(batch.commands.len());
        for command in &batch.commands {
            results.push(working.execute(command)?);
        }
        state.data = working;

        let transaction_index = match batch.transaction_mode {
            TransactionMode::ClusterWide => {
                state.transaction_index += 1;
                Some(state.transaction_index)
            }
            TransactionMode::SingleNode => None,
        };
        Ok(BatchCommandResult {
            results,
            transaction_index,
        })
    }

    async fn execute(
        &self,
        _database: &str,
        request: &ReadRequest,
        _session: &SessionInfo,
    ) -> Result<Value, TransportError> {
        let mut state = self.state.lock();
        state.reads.push(request.clone());
        let response = match request {
            ReadRequest::GetDocuments { ids, includes } => {
                Self::get_documents(&state.data, ids, includes)
            }
            ReadRequest::GetCounters {
                document_id,
                counters,
            } => Self::get_counters(&state.data, document_id, counters),
        };
        Ok(response)
    }

    async fn select_node(
        &self,
        _database: &str,
        policy: ReadBalanceBehavior,
        session_affinity: u64,
    ) -> Result<ServerNode, TransportError> {
        if self.nodes.is_empty() {
            return Err(TransportError::network("no nodes available", false));
        }
        let count = self.nodes.len() as u64;
        let position = match policy {
            ReadBalanceBehavior::None => 0,
            ReadBalanceBehavior::RoundRobin => session_affinity % count,
            ReadBalanceBehavior::FastestNode => {
                let mut state = self.state.lock();
                state.round_robin += 1;
                state.round_robin % count
            }
        };
        let index = usize::try_from(position).unwrap_or(0);
        Ok(self.nodes[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsession_core::CommandData;

    fn batch(commands: Vec<CommandData>) -> BatchCommand {
        BatchCommand {
            commands: commands.iter().map(CommandData::to_json).collect(),
            options: Default::default(),
            transaction_mode: TransactionMode::SingleNode,
        }
    }

    fn session() -> SessionInfo {
        SessionInfo {
            session_id: 1,
            last_cluster_transaction_index: None,
            no_caching: false,
        }
    }

    #[tokio::test]
    async fn failed_batch_changes_nothing() {
        let transport = InMemoryTransport::new();
        let cv = transport.seed("products/1", "Products", json!({"name": "Chai"}));

        let commands = vec![
            CommandData::put("products/2", None, json!({"name": "Chang"})),
            CommandData::delete("products/1", Some(format!("{cv}-stale"))),
        ];
        let err = transport
            .dispatch("shop", &batch(commands), &session())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Concurrency { .. }));
        assert!(transport.document("products/2").is_none());
        assert!(transport.document("products/1").is_some());
    }

    #[tokio::test]
    async fn empty_change_vector_requires_new_document() {
        let transport = InMemoryTransport::new();
        transport.seed("products/1", "Products", json!({"name": "Chai"}));

        let put = CommandData::put("products/1", Some(String::new()), json!({"name": "x"}));
        assert!(transport.dispatch("shop", &batch(vec![put]), &session()).await.is_err());
    }

    #[tokio::test]
    async fn includes_are_resolved() {
        let transport = InMemoryTransport::new();
        transport.seed("orders/1", "Orders", json!({"company": "companies/1"}));
        transport.seed("companies/1", "Companies", json!({"name": "Acme"}));

        let response = transport
            .execute(
                "shop",
                &ReadRequest::GetDocuments {
                    ids: vec!["orders/1".into()],
                    includes: vec!["company".into()],
                },
                &session(),
            )
            .await
            .unwrap();
        assert_eq!(response["Includes"]["companies/1"]["name"], json!("Acme"));
    }

    #[tokio::test]
    async fn round_robin_uses_affinity() {
        let transport = InMemoryTransport::with_nodes(vec![
            ServerNode::new("http://a", "shop", "A"),
            ServerNode::new("http://b", "shop", "B"),
        ]);
        let node = transport
            .select_node("shop", ReadBalanceBehavior::RoundRobin, 3)
            .await
            .unwrap();
        assert_eq!(node.cluster_tag, "B");
    }
}
