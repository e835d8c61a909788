//! Publishing rendezvous records.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::types::{RecordType, RendezvousRecord};

/// Upserts rendezvous records in an external naming service.
///
/// Implementations must be idempotent: publishing the same record twice leaves
/// one effective record.
pub trait RendezvousPublisher: Send + Sync {
    /// Creates or replaces the record with this name and type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FleetError::RendezvousUpdateFailed`] if the upstream call fails.
    fn upsert(&self, record: &RendezvousRecord) -> impl Future<Output = Result<()>> + Send;
}

/// An in-memory rendezvous table for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRendezvous {
    records: Arc<RwLock<BTreeMap<(String, RecordType), RendezvousRecord>>>,
}

impl InMemoryRendezvous {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record with this name and type.
    #[must_use]
    pub fn get(&self, name: &str, record_type: RecordType) -> Option<RendezvousRecord> {
        self.records
            .read()
            .get(&(name.to_string(), record_type))
            .cloned()
    }

    /// Returns every record, ordered by name then type.
    #[must_use]
    pub fn records(&self) -> Vec<RendezvousRecord> {
        self.records.read().values().cloned().collect()
    }
}

impl RendezvousPublisher for InMemoryRendezvous {
    async fn upsert(&self, record: &RendezvousRecord) -> Result<()> {
        let key = (record.name.clone(), record.record_type);
        let previous = self.records.write().insert(key, record.clone());
        debug!(
            name = %record.name,
            record_type = %record.record_type,
            value = %record.value,
            replaced = previous.is_some(),
            "upserted rendezvous record"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let table = InMemoryRendezvous::new();
        let record = RendezvousRecord::new("vpn.example.com", "203.0.113.7".parse().expect("ip"), 60);
        table.upsert(&record).await.expect("upsert");
        table.upsert(&record).await.expect("upsert");
        assert_eq!(table.records(), vec![record]);
    }

    #[tokio::test]
    async fn upsert_replaces_value_per_type() {
        let table = InMemoryRendezvous::new();
        table
            .upsert(&RendezvousRecord::new("vpn.example.com", "203.0.113.7".parse().expect("ip"), 60))
            .await
            .expect("upsert");
        table
            .upsert(&RendezvousRecord::new("vpn.example.com", "203.0.113.9".parse().expect("ip"), 60))
            .await
            .expect("upsert");
        table
            .upsert(&RendezvousRecord::new("vpn.example.com", "2001:db8::9".parse().expect("ip"), 60))
            .await
            .expect("upsert");

        assert_eq!(table.records().len(), 2);
        let a = table.get("vpn.example.com", RecordType::A).expect("A record");
        assert_eq!(a.value.to_string(), "203.0.113.9");
    }
}
