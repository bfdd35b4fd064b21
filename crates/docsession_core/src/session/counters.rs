//! Counter reads backed by the session's counter cache.

use super::DocumentSession;
use crate::counters::CounterDetail;
use crate::entity::EntityRef;
use crate::error::{SessionError, SessionResult};
use crate::transport::{CountersDetail, ReadRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

impl DocumentSession {
    /// Returns counter values of a tracked entity.
    ///
    /// An empty `names` asks for every counter. Counters that do not exist
    /// are left out of the result. The cache answers without a round trip
    /// when it is complete or holds every requested name.
    pub async fn get_counters(
        &mut self,
        entity: &EntityRef,
        names: &[&str],
    ) -> SessionResult<BTreeMap<String, i64>> {
        self.guard.ensure_not_disposed()?;
        let id = self
            .document_info(entity)?
            .id
            .clone()
            .ok_or_else(|| SessionError::invalid_operation("entity has no document id"))?;

        if let Some(cached) = self.cached_counters(&id, names) {
            trace!(id = %id, "counters served from cache");
            return Ok(cached);
        }

        self.increment_request_count()?;
        let names: Vec<String> = names.iter().map(|name| (*name).to_string()).collect();
        let request = ReadRequest::GetCounters {
            document_id: id.clone(),
            counters: names.clone(),
        };
        let transport = Arc::clone(self.store.transport());
        let response = transport
            .execute(&self.database, &request, &self.session_info)
            .await?;
        let detail: CountersDetail = serde_json::from_value(response)?;

        let results = BTreeMap::from([(id.clone(), detail.counters.clone())]);
        self.register_counters_for_ids(&results, &[id], &names, names.is_empty());

        Ok(detail
            .counters
            .into_iter()
            .flatten()
            .filter(|counter| {
                names.is_empty()
                    || names
                        .iter()
                        .any(|name| name.eq_ignore_ascii_case(&counter.counter_name))
            })
            .map(|counter| (counter.counter_name, counter.total_value))
            .collect())
    }

    fn cached_counters(&self, id: &str, names: &[&str]) -> Option<BTreeMap<String, i64>> {
        let tracking = self.counters.get(id)?;
        if names.is_empty() {
            if !tracking.got_all {
                return None;
            }
            return Some(
                tracking
                    .iter()
                    .filter_map(|(name, value)| value.map(|value| (name.to_string(), value)))
                    .collect(),
            );
        }

        let mut values = BTreeMap::new();
        for name in names {
            match tracking.get(name) {
                Some(Some(value)) => {
                    values.insert((*name).to_string(), value);
                }
                Some(None) => {}
                None if tracking.got_all => {}
                None => return None,
            }
        }
        Some(values)
    }

    /// Merges counters fetched alongside documents into the cache.
    pub fn register_counters(
        &mut self,
        results: &BTreeMap<String, Vec<Option<CounterDetail>>>,
        to_include: &BTreeMap<String, Vec<String>>,
    ) {
        if self.no_tracking {
            return;
        }
        self.counters.register_counters(results, to_include);
    }

    /// Merges counters fetched for `ids` into the cache.
    pub fn register_counters_for_ids(
        &mut self,
        results: &BTreeMap<String, Vec<Option<CounterDetail>>>,
        ids: &[String],
        names: &[String],
        got_all: bool,
    ) {
        if self.no_tracking {
            return;
        }
        self.counters
            .register_counters_for_ids(results, ids, names, got_all);
    }
}
