// ABOUTME: Stream authorization table with per-stream owner and writer sets
// ABOUTME: Preserves request metadata verbatim for welcome snapshots

//! The stream authorization table (C5).
//!
//! A stream is a named side channel for binary or bulk data. The table maps
//! each stream id to its owner, its authorized writer set, and the metadata
//! its `stream/request` carried. Binary frames are authorized with one
//! lookup here; everything custom in the original request payload is
//! preserved verbatim so late joiners can learn content types and parse
//! hints from their welcome.

use crate::envelope::{StreamDirection, StreamRequestPayload};
use crate::error::ErrorCode;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use uuid::Uuid;

/// Why a stream operation was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamOpError {
    #[error("stream '{0}' not found")]
    NotFound(String),

    #[error("only the owner of stream '{0}' may do that")]
    NotOwner(String),

    #[error("the owner of stream '{0}' cannot be revoked")]
    OwnerRevocation(String),

    #[error("'{participant}' is not an authorized writer of stream '{stream_id}'")]
    NotAuthorized {
        stream_id: String,
        participant: String,
    },
}

impl StreamOpError {
    /// Wire code for the `system/error` reflection.
    pub fn code(&self) -> ErrorCode {
        match self {
            StreamOpError::NotFound(_) => ErrorCode::StreamNotFound,
            StreamOpError::NotOwner(_) => ErrorCode::Forbidden,
            StreamOpError::OwnerRevocation(_) => ErrorCode::InvalidOperation,
            StreamOpError::NotAuthorized { .. } => ErrorCode::UnauthorizedStreamWrite,
        }
    }
}

/// One active stream.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub stream_id: String,
    pub owner: String,
    pub authorized_writers: BTreeSet<String>,
    pub direction: StreamDirection,
    pub created: DateTime<Utc>,
    /// Every `stream/request` payload field except `direction`, verbatim
    pub metadata: Map<String, Value>,
}

impl StreamRecord {
    /// Assemble the welcome `active_streams` entry: the stored metadata
    /// spread over the canonical fields (canonical fields win collisions).
    pub fn welcome_record(&self) -> Value {
        let mut record = self.metadata.clone();
        record.insert("stream_id".to_string(), Value::from(self.stream_id.clone()));
        record.insert("owner".to_string(), Value::from(self.owner.clone()));
        record.insert(
            "created".to_string(),
            Value::from(self.created.to_rfc3339()),
        );
        record.insert(
            "authorized_writers".to_string(),
            Value::from(
                self.authorized_writers
                    .iter()
                    .cloned()
                    .collect::<Vec<String>>(),
            ),
        );
        Value::Object(record)
    }
}

/// What a participant disconnect did to the table.
#[derive(Debug, Default)]
pub struct DisconnectOutcome {
    /// Streams closed because the departing owner was the only writer
    pub closed: Vec<StreamRecord>,
    /// Stream ids the participant was removed from as a non-owner writer
    pub writer_removed_from: Vec<String>,
}

/// The stream table (C5).
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: HashMap<String, StreamRecord>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stream for `owner` from a `stream/request` payload.
    ///
    /// The table entry is seeded with `authorized_writers = {owner}` and
    /// every payload field except `direction` preserved verbatim.
    pub fn create(&mut self, owner: &str, request: &StreamRequestPayload) -> &StreamRecord {
        let stream_id = Uuid::now_v7().to_string();

        let mut metadata = Map::new();
        if let Some(v) = request.expected_size_bytes {
            metadata.insert("expected_size_bytes".to_string(), Value::from(v));
        }
        if let Some(v) = &request.description {
            metadata.insert("description".to_string(), Value::from(v.clone()));
        }
        if let Some(v) = &request.content_type {
            metadata.insert("content_type".to_string(), Value::from(v.clone()));
        }
        if let Some(v) = &request.format {
            metadata.insert("format".to_string(), Value::from(v.clone()));
        }
        if let Some(v) = &request.metadata {
            metadata.insert("metadata".to_string(), v.clone());
        }
        for (key, value) in &request.extra {
            metadata.insert(key.clone(), value.clone());
        }

        let record = StreamRecord {
            stream_id: stream_id.clone(),
            owner: owner.to_string(),
            authorized_writers: BTreeSet::from([owner.to_string()]),
            direction: request.direction,
            created: Utc::now(),
            metadata,
        };
        self.streams.entry(stream_id).or_insert(record)
    }

    pub fn get(&self, stream_id: &str) -> Option<&StreamRecord> {
        self.streams.get(stream_id)
    }

    /// `stream/grant-write`: only the owner may grant.
    pub fn grant_write(
        &mut self,
        stream_id: &str,
        requester: &str,
        participant: &str,
    ) -> Result<(), StreamOpError> {
        let record = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| StreamOpError::NotFound(stream_id.to_string()))?;
        if record.owner != requester {
            return Err(StreamOpError::NotOwner(stream_id.to_string()));
        }
        record.authorized_writers.insert(participant.to_string());
        Ok(())
    }

    /// `stream/revoke-write`: only the owner may revoke; the owner itself
    /// is irrevocable.
    pub fn revoke_write(
        &mut self,
        stream_id: &str,
        requester: &str,
        participant: &str,
    ) -> Result<(), StreamOpError> {
        let record = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| StreamOpError::NotFound(stream_id.to_string()))?;
        if record.owner != requester {
            return Err(StreamOpError::NotOwner(stream_id.to_string()));
        }
        if record.owner == participant {
            return Err(StreamOpError::OwnerRevocation(stream_id.to_string()));
        }
        record.authorized_writers.remove(participant);
        Ok(())
    }

    /// `stream/transfer-ownership`: only the current owner may transfer.
    /// The new owner is always left authorized.
    pub fn transfer_ownership(
        &mut self,
        stream_id: &str,
        requester: &str,
        new_owner: &str,
    ) -> Result<(), StreamOpError> {
        let record = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| StreamOpError::NotFound(stream_id.to_string()))?;
        if record.owner != requester {
            return Err(StreamOpError::NotOwner(stream_id.to_string()));
        }
        record.owner = new_owner.to_string();
        record.authorized_writers.insert(new_owner.to_string());
        Ok(())
    }

    /// `stream/close`: any authorized writer or the owner closes the stream.
    pub fn close(
        &mut self,
        stream_id: &str,
        requester: &str,
    ) -> Result<StreamRecord, StreamOpError> {
        let record = self
            .streams
            .get(stream_id)
            .ok_or_else(|| StreamOpError::NotFound(stream_id.to_string()))?;
        if record.owner != requester && !record.authorized_writers.contains(requester) {
            return Err(StreamOpError::NotAuthorized {
                stream_id: stream_id.to_string(),
                participant: requester.to_string(),
            });
        }
        Ok(self.streams.remove(stream_id).expect("record just looked up"))
    }

    /// Authorize one binary frame.
    pub fn authorize_frame(&self, stream_id: &str, sender: &str) -> Result<(), StreamOpError> {
        let record = self
            .streams
            .get(stream_id)
            .ok_or_else(|| StreamOpError::NotFound(stream_id.to_string()))?;
        if !record.authorized_writers.contains(sender) {
            return Err(StreamOpError::NotAuthorized {
                stream_id: stream_id.to_string(),
                participant: sender.to_string(),
            });
        }
        Ok(())
    }

    /// Apply a participant disconnect.
    ///
    /// Owned streams stay open while other writers remain (ownership is
    /// never transferred automatically); a stream whose only writer was the
    /// departing owner is closed. Non-owner write authorizations are
    /// removed.
    pub fn on_disconnect(&mut self, participant: &str) -> DisconnectOutcome {
        let mut outcome = DisconnectOutcome::default();

        let ids: Vec<String> = self.streams.keys().cloned().collect();
        for id in ids {
            let record = self.streams.get_mut(&id).expect("id from key scan");
            if record.owner == participant {
                let sole_writer = record.authorized_writers.len() == 1
                    && record.authorized_writers.contains(participant);
                if sole_writer {
                    outcome
                        .closed
                        .push(self.streams.remove(&id).expect("id from key scan"));
                }
            } else if record.authorized_writers.remove(participant) {
                outcome.writer_removed_from.push(id);
            }
        }
        outcome
    }

    /// Close every stream whose sole authorized writer is `participant`
    /// (the restart rule).
    pub fn close_sole_writer_streams(&mut self, participant: &str) -> Vec<StreamRecord> {
        let ids: Vec<String> = self
            .streams
            .iter()
            .filter(|(_, r)| {
                r.authorized_writers.len() == 1 && r.authorized_writers.contains(participant)
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.streams.remove(&id))
            .collect()
    }

    /// Welcome `active_streams` entries for every open stream.
    pub fn welcome_records(&self) -> Vec<Value> {
        let mut records: Vec<&StreamRecord> = self.streams.values().collect();
        records.sort_by(|a, b| a.created.cmp(&b.created).then(a.stream_id.cmp(&b.stream_id)));
        records.into_iter().map(|r| r.welcome_record()).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(extra: Value) -> StreamRequestPayload {
        let mut base = json!({"direction": "upload"});
        if let (Value::Object(base_map), Value::Object(extra_map)) = (&mut base, extra) {
            base_map.extend(extra_map);
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn test_create_seeds_owner_as_sole_writer() {
        let mut table = StreamTable::new();
        let id = table.create("alice", &request(json!({}))).stream_id.clone();
        let record = table.get(&id).unwrap();
        assert_eq!(record.owner, "alice");
        assert!(record.authorized_writers.contains("alice"));
        assert_eq!(record.authorized_writers.len(), 1);
    }

    #[test]
    fn test_only_owner_grants_and_revokes() {
        let mut table = StreamTable::new();
        let id = table.create("alice", &request(json!({}))).stream_id.clone();

        assert_eq!(
            table.grant_write(&id, "bob", "carol").unwrap_err(),
            StreamOpError::NotOwner(id.clone())
        );
        table.grant_write(&id, "alice", "bob").unwrap();
        assert!(table.authorize_frame(&id, "bob").is_ok());

        assert!(matches!(
            table.revoke_write(&id, "bob", "alice"),
            Err(StreamOpError::NotOwner(_))
        ));
        table.revoke_write(&id, "alice", "bob").unwrap();
        assert!(table.authorize_frame(&id, "bob").is_err());
    }

    #[test]
    fn test_owner_revocation_is_refused() {
        let mut table = StreamTable::new();
        let id = table.create("alice", &request(json!({}))).stream_id.clone();
        let err = table.revoke_write(&id, "alice", "alice").unwrap_err();
        assert_eq!(err, StreamOpError::OwnerRevocation(id.clone()));
        assert_eq!(err.code(), ErrorCode::InvalidOperation);
        assert!(table.authorize_frame(&id, "alice").is_ok());
    }

    #[test]
    fn test_ownership_transfer_keeps_new_owner_authorized() {
        let mut table = StreamTable::new();
        let id = table.create("alice", &request(json!({}))).stream_id.clone();
        table.transfer_ownership(&id, "alice", "bob").unwrap();

        let record = table.get(&id).unwrap();
        assert_eq!(record.owner, "bob");
        assert!(record.authorized_writers.contains("bob"));

        // The previous owner can no longer administer the stream.
        assert!(matches!(
            table.revoke_write(&id, "alice", "bob"),
            Err(StreamOpError::NotOwner(_))
        ));
    }

    #[test]
    fn test_close_requires_authorization() {
        let mut table = StreamTable::new();
        let id = table.create("alice", &request(json!({}))).stream_id.clone();
        assert!(matches!(
            table.close(&id, "mallory"),
            Err(StreamOpError::NotAuthorized { .. })
        ));
        table.grant_write(&id, "alice", "bob").unwrap();
        table.close(&id, "bob").unwrap();
        assert!(table.get(&id).is_none());
    }

    #[test]
    fn test_frame_authorization_codes() {
        let table = StreamTable::new();
        let err = table.authorize_frame("nope", "alice").unwrap_err();
        assert_eq!(err.code(), ErrorCode::StreamNotFound);
    }

    #[test]
    fn test_disconnect_closes_sole_writer_streams_only() {
        let mut table = StreamTable::new();
        let solo = table.create("alice", &request(json!({}))).stream_id.clone();
        let shared = table.create("alice", &request(json!({}))).stream_id.clone();
        table.grant_write(&shared, "alice", "bob").unwrap();
        let foreign = table.create("carol", &request(json!({}))).stream_id.clone();
        table.grant_write(&foreign, "carol", "alice").unwrap();

        let outcome = table.on_disconnect("alice");

        assert_eq!(outcome.closed.len(), 1);
        assert_eq!(outcome.closed[0].stream_id, solo);
        assert_eq!(outcome.writer_removed_from, vec![foreign.clone()]);

        // The shared stream stays open, owner unchanged.
        let record = table.get(&shared).unwrap();
        assert_eq!(record.owner, "alice");
        assert!(record.authorized_writers.contains("bob"));
        assert!(!table.get(&foreign).unwrap().authorized_writers.contains("alice"));
    }

    #[test]
    fn test_welcome_record_preserves_custom_metadata() {
        let mut table = StreamTable::new();
        let id = table
            .create(
                "alice",
                &request(json!({
                    "content_type": "application/x-game-positions",
                    "format": "binary-vector3",
                    "metadata": {"update_rate_hz": 60}
                })),
            )
            .stream_id
            .clone();

        let record = table.get(&id).unwrap().welcome_record();
        assert_eq!(record["content_type"], json!("application/x-game-positions"));
        assert_eq!(record["format"], json!("binary-vector3"));
        assert_eq!(record["metadata"]["update_rate_hz"], json!(60));
        assert_eq!(record["stream_id"], json!(id));
        assert_eq!(record["owner"], json!("alice"));
        assert_eq!(record["authorized_writers"], json!(["alice"]));
        assert!(record.get("created").is_some());
        // Direction is not part of the preserved metadata.
        assert!(record.get("direction").is_none());
    }
}
