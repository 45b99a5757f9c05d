//! Per-entity audit logs and the incremental where clause built on them.
//!
//! An audit event is recorded against the table it happened to. A copy of an
//! entity from a source table into a destination table leaves an event of the
//! copy type against the destination; a later change exported from the source
//! leaves one against the source. An entity is stable when its latest copy into
//! the destination is strictly newer than its latest copy out of the source.
use chrono::{DateTime, Utc};
use tracing::trace;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::clause::WhereClause;
use crate::construct::VariableEntity;
use crate::datatype::Value;
use crate::error::Result;
use crate::table::TableRef;

pub const COPY_EVENT: &str = "COPY";

// ------------- AuditEvent -------------
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    event_type: String,
    datetime: DateTime<Utc>,
    source_datasource: String,
    source_table: String,
    details: Vec<(String, Value)>,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        datetime: DateTime<Utc>,
        source_datasource: impl Into<String>,
        source_table: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            datetime,
            source_datasource: source_datasource.into(),
            source_table: source_table.into(),
            details: Vec::new(),
        }
    }
    pub fn with_detail(mut self, name: impl Into<String>, value: Value) -> Self {
        self.details.push((name.into(), value));
        self
    }
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
    pub fn datetime(&self) -> DateTime<Utc> {
        self.datetime
    }
    pub fn source_datasource(&self) -> &str {
        &self.source_datasource
    }
    pub fn source_table(&self) -> &str {
        &self.source_table
    }
    pub fn detail(&self, name: &str) -> Option<&Value> {
        self.details.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
    pub fn details(&self) -> &[(String, Value)] {
        &self.details
    }
    fn concerns(&self, datasource: &str, table: &str) -> bool {
        self.source_datasource == datasource && self.source_table == table
    }
}

// ------------- AuditLog -------------
/// The audit trail of a single entity.
pub trait AuditLog: Send + Sync {
    fn entity(&self) -> &VariableEntity;
    fn events_for_table(&self, datasource: &str, table: &str) -> Vec<AuditEvent>;
    fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent>;
}

pub trait AuditLogProvider: Send + Sync {
    /// `None` when nothing was ever recorded for the entity.
    fn audit_log(&self, entity: &VariableEntity) -> Option<Arc<dyn AuditLog>>;
}

struct MemoryAuditLog {
    entity: VariableEntity,
    events: Vec<AuditEvent>,
}

impl AuditLog for MemoryAuditLog {
    fn entity(&self) -> &VariableEntity {
        &self.entity
    }
    fn events_for_table(&self, datasource: &str, table: &str) -> Vec<AuditEvent> {
        self.events.iter().filter(|e| e.concerns(datasource, table)).cloned().collect()
    }
    fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events.iter().filter(|e| e.event_type == event_type).cloned().collect()
    }
}

/// Keeps audit events in memory, per entity.
#[derive(Default)]
pub struct MemoryAuditLogProvider {
    logs: RwLock<HashMap<VariableEntity, Vec<AuditEvent>>>,
}

impl MemoryAuditLogProvider {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn record(&self, entity: &VariableEntity, event: AuditEvent) -> Result<()> {
        self.logs.write()?.entry(entity.clone()).or_default().push(event);
        Ok(())
    }
}

impl AuditLogProvider for MemoryAuditLogProvider {
    fn audit_log(&self, entity: &VariableEntity) -> Option<Arc<dyn AuditLog>> {
        let logs = self.logs.read().ok()?;
        let events = logs.get(entity)?.clone();
        Some(Arc::new(MemoryAuditLog { entity: entity.clone(), events }))
    }
}

// ------------- IncrementalWhereClause -------------
/// Admits the entities whose latest copy into the destination is newer than
/// their latest change at the logical source.
pub struct IncrementalWhereClause {
    source: (String, String),
    destination: (String, String),
    event_type: String,
    provider: Arc<dyn AuditLogProvider>,
}

impl IncrementalWhereClause {
    pub fn new(
        source: (&str, &str),
        destination: (&str, &str),
        provider: Arc<dyn AuditLogProvider>,
    ) -> Self {
        Self {
            source: (source.0.to_string(), source.1.to_string()),
            destination: (destination.0.to_string(), destination.1.to_string()),
            event_type: COPY_EVENT.to_string(),
            provider,
        }
    }
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    fn latest(&self, log: &dyn AuditLog, (datasource, table): &(String, String)) -> Option<DateTime<Utc>> {
        log.events_for_table(datasource, table)
            .iter()
            .filter(|e| e.event_type == self.event_type)
            .map(|e| e.datetime)
            .max()
    }

    pub fn is_stable(&self, entity: &VariableEntity) -> bool {
        let Some(log) = self.provider.audit_log(entity) else {
            return false;
        };
        let Some(copied) = self.latest(log.as_ref(), &self.destination) else {
            return false;
        };
        let stable = match self.latest(log.as_ref(), &self.source) {
            Some(changed) => copied > changed,
            None => true,
        };
        trace!("entity {} stable: {}", entity, stable);
        stable
    }
}

impl WhereClause for IncrementalWhereClause {
    fn admits(&self, _table: &TableRef, entity: &VariableEntity) -> Result<bool> {
        Ok(self.is_stable(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).single().expect("valid time")
    }

    fn clause(provider: &Arc<MemoryAuditLogProvider>) -> IncrementalWhereClause {
        let provider: Arc<dyn AuditLogProvider> = provider.clone();
        IncrementalWhereClause::new(("src", "T"), ("dst", "T"), provider)
    }

    #[test]
    fn entity_without_log_is_not_stable() {
        let provider = Arc::new(MemoryAuditLogProvider::new());
        assert!(!clause(&provider).is_stable(&VariableEntity::new("Participant", "p1")));
    }

    #[test]
    fn copy_without_source_change_is_stable() {
        let provider = Arc::new(MemoryAuditLogProvider::new());
        let p1 = VariableEntity::new("Participant", "p1");
        provider.record(&p1, AuditEvent::new(COPY_EVENT, at(3), "dst", "T")).expect("recorded");
        assert!(clause(&provider).is_stable(&p1));
    }

    #[test]
    fn only_strictly_newer_copies_are_stable() {
        let provider = Arc::new(MemoryAuditLogProvider::new());
        let newer = VariableEntity::new("Participant", "newer");
        let equal = VariableEntity::new("Participant", "equal");
        let older = VariableEntity::new("Participant", "older");
        for (entity, copied) in [(&newer, 5), (&equal, 4), (&older, 3)] {
            provider.record(entity, AuditEvent::new(COPY_EVENT, at(4), "src", "T")).expect("recorded");
            provider.record(entity, AuditEvent::new(COPY_EVENT, at(copied), "dst", "T")).expect("recorded");
        }
        let clause = clause(&provider);
        assert!(clause.is_stable(&newer));
        assert!(!clause.is_stable(&equal));
        assert!(!clause.is_stable(&older));
    }

    #[test]
    fn other_event_types_are_ignored() {
        let provider = Arc::new(MemoryAuditLogProvider::new());
        let p1 = VariableEntity::new("Participant", "p1");
        provider
            .record(&p1, AuditEvent::new("VALIDATE", at(9), "dst", "T").with_detail("by", Value::text("qa")))
            .expect("recorded");
        assert!(!clause(&provider).is_stable(&p1));
        let log = provider.audit_log(&p1).expect("log");
        assert_eq!(log.events_of_type("VALIDATE").len(), 1);
        assert_eq!(log.events_of_type("VALIDATE")[0].detail("by"), Some(&Value::text("qa")));
    }
}
