//! # In-Memory Schema Registry
//!
//! Subjects hold an append-only list of versions. Ids are global and shared
//! by identical schema text across subjects, as a Confluent registry does.
//! Schema text is compared after JSON compaction when it parses.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{compact_schema, RegistryError, SchemaHandle};
use crate::ports::outbound::{RegistryCalls, SchemaRegistry};

#[derive(Clone, Debug)]
struct StoredVersion {
    id: u32,
    version: i32,
    canonical: String,
    definition: String,
}

impl StoredVersion {
    fn handle(&self) -> SchemaHandle {
        SchemaHandle::new(self.id, self.definition.as_str()).with_version(self.version)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    subjects: HashMap<String, Vec<StoredVersion>>,
    ids: HashMap<String, u32>,
    next_id: u32,
    calls: RegistryCalls,
    unavailable: bool,
}

/// Process-local schema registry.
#[derive(Debug, Default)]
pub struct InMemorySchemaRegistry {
    state: RwLock<RegistryState>,
}

fn canonical(schema: &str) -> String {
    compact_schema(schema).unwrap_or_else(|_| schema.to_string())
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema` directly, bypassing call accounting. For seeding.
    pub fn seed(&self, subject: &str, schema: &str) -> SchemaHandle {
        let mut state = self.state.write();
        Self::register_locked(&mut state, subject, schema)
    }

    /// Make every call fail with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    pub fn calls(&self) -> RegistryCalls {
        self.state.read().calls
    }

    /// Versions registered under `subject`, oldest first.
    pub fn versions(&self, subject: &str) -> Vec<SchemaHandle> {
        self.state
            .read()
            .subjects
            .get(subject)
            .map(|versions| versions.iter().map(StoredVersion::handle).collect())
            .unwrap_or_default()
    }

    fn register_locked(state: &mut RegistryState, subject: &str, schema: &str) -> SchemaHandle {
        let canonical = canonical(schema);
        if let Some(existing) = state
            .subjects
            .get(subject)
            .and_then(|versions| versions.iter().find(|v| v.canonical == canonical))
        {
            return existing.handle();
        }

        let id = match state.ids.get(&canonical) {
            Some(id) => *id,
            None => {
                state.next_id += 1;
                state.ids.insert(canonical.clone(), state.next_id);
                state.next_id
            }
        };
        let versions = state.subjects.entry(subject.to_string()).or_default();
        let stored = StoredVersion {
            id,
            version: versions.len() as i32 + 1,
            canonical,
            definition: schema.to_string(),
        };
        let handle = stored.handle();
        versions.push(stored);
        handle
    }

    fn check_available(state: &RegistryState) -> Result<(), RegistryError> {
        if state.unavailable {
            return Err(RegistryError::Connection(
                "in-memory registry marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn check_registered(
        &self,
        subject: &str,
        schema: &str,
    ) -> Result<Option<SchemaHandle>, RegistryError> {
        let mut state = self.state.write();
        state.calls.check += 1;
        Self::check_available(&state)?;
        let canonical = canonical(schema);
        Ok(state.subjects.get(subject).and_then(|versions| {
            versions
                .iter()
                .find(|v| v.canonical == canonical)
                .map(StoredVersion::handle)
        }))
    }

    async fn latest(&self, subject: &str) -> Result<SchemaHandle, RegistryError> {
        let mut state = self.state.write();
        state.calls.latest += 1;
        Self::check_available(&state)?;
        state
            .subjects
            .get(subject)
            .and_then(|versions| versions.last())
            .map(StoredVersion::handle)
            .ok_or_else(|| RegistryError::SubjectNotFound(subject.to_string()))
    }

    async fn create(&self, subject: &str, schema: &str) -> Result<SchemaHandle, RegistryError> {
        let mut state = self.state.write();
        state.calls.create += 1;
        Self::check_available(&state)?;
        Ok(Self::register_locked(&mut state, subject, schema))
    }
}
