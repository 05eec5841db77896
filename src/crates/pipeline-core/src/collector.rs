//! List collector port: buffers fan-out siblings until their provenance
//! chain is complete, then releases one ordered batch (SPEC_FULL §4.4).

use crate::error::Result;
use crate::port::Envelope;
use crate::provenance::{ProvenanceChain, ProvenanceSegment};
use pipeline_checkpoint::{CollectorSnapshot, EnvelopeSnapshot, Payload};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// §4.4 [ADDED]: a prefix's last segment already ends in `":0:1"`,
    /// meaning it is the sole aggregated output of a prior collection.
    /// Re-collecting it would silently merge two independent collection
    /// events under one prefix.
    #[error("provenance prefix is already a collected aggregate: {0}")]
    AlreadyAggregated(String),
}

/// One batch of sibling payloads, released in index order, with parents
/// set to the shared prefix with its final segment replaced by
/// `"<uuid>:0:1"` (§4.4).
///
/// `Serialize`/`Deserialize` so a `ListModel<T>` can itself be an agent's
/// `Input` — the type a `Mapper → ListCollector → Reducer` pipeline's
/// `Reducer` declares (§4.4, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListModel<T> {
    pub data: Vec<T>,
}

struct Partial<T> {
    fanout: u32,
    by_index: HashMap<u32, Envelope<T>>,
}

/// A specialised input port accumulating fan-out siblings by provenance
/// prefix until `|seen| == fanout`, then emitting one [`ListModel`]
/// envelope (§4.4).
pub struct ListCollectorPort<T> {
    partials: HashMap<String, Partial<T>>,
}

impl<T> Default for ListCollectorPort<T> {
    fn default() -> Self {
        Self {
            partials: HashMap::new(),
        }
    }
}

impl<T: Payload + Clone> ListCollectorPort<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    pub fn pending_prefixes(&self) -> usize {
        self.partials.len()
    }

    /// Accepts one sibling envelope. Returns `Some(envelope)` if this
    /// completed the chain (`|seen| == fanout`), `None` otherwise.
    pub fn receive(&mut self, envelope: Envelope<T>) -> std::result::Result<Option<Envelope<ListModel<T>>>, CollectorError> {
        let Some(last) = envelope.parents.0.last().copied() else {
            // No provenance segment at all: nothing to collect against,
            // treat as a singleton batch of one.
            return Ok(Some(envelope.map_payload(ListModel { data: vec![envelope.payload.clone()] })));
        };

        if envelope.parents.ends_already_aggregated() {
            return Err(CollectorError::AlreadyAggregated(envelope.parents.collector_key()));
        }

        let key = envelope.parents.collector_key();
        let entry = self.partials.entry(key.clone()).or_insert_with(|| Partial {
            fanout: last.fanout,
            by_index: HashMap::new(),
        });
        entry.by_index.insert(last.index, envelope);

        if entry.by_index.len() as u32 == entry.fanout {
            let partial = self.partials.remove(&key).expect("just inserted above");
            let mut indices: Vec<u32> = partial.by_index.keys().copied().collect();
            indices.sort_unstable();

            let prefix_len = indices
                .first()
                .and_then(|_| partial.by_index.values().next())
                .map(|env| env.parents.0.len().saturating_sub(1))
                .unwrap_or(0);
            let any_envelope = partial.by_index.values().next().expect("fanout >= 1");
            let shared_prefix = ProvenanceChain(any_envelope.parents.0[..prefix_len].to_vec());
            let aggregate_segment = ProvenanceSegment::new(Uuid::new_v4().as_u128(), 0, 1);
            let new_parents = shared_prefix.with_appended(aggregate_segment);

            let correlation_id = any_envelope.correlation_id.clone();
            let data: Vec<T> = indices
                .into_iter()
                .map(|i| partial.by_index.get(&i).unwrap().payload.clone())
                .collect();

            Ok(Some(Envelope::new(new_parents, correlation_id, ListModel { data })))
        } else {
            Ok(None)
        }
    }

    pub fn snapshot(&self) -> Result<CollectorSnapshot> {
        let mut partial_buffers: HashMap<String, Vec<EnvelopeSnapshot>> = HashMap::new();
        for (key, partial) in &self.partials {
            let mut indices: Vec<u32> = partial.by_index.keys().copied().collect();
            indices.sort_unstable();
            let snapshots = indices
                .into_iter()
                .map(|i| {
                    let env = &partial.by_index[&i];
                    Ok(EnvelopeSnapshot {
                        parents: env.parents.to_strings(),
                        timestamp_ms: env.timestamp_ms,
                        correlation_id: env.correlation_id.clone(),
                        payload: serde_json::to_value(&env.payload)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            partial_buffers.insert(key.clone(), snapshots);
        }
        Ok(CollectorSnapshot { partial_buffers })
    }
}
