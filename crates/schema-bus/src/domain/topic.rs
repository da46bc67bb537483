//! # Topic
//!
//! A named event stream versioned by a serialization schema. The resolved
//! schema lives in a write-once cell: it is filled by the resolver exactly
//! once and read concurrently by every worker of the topic afterwards.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

/// Suffix the registry uses for value schemas.
pub const VALUE_SUBJECT_SUFFIX: &str = "-value";

/// Registry subject for a topic name.
pub fn subject_for(topic: &str) -> String {
    format!("{topic}{VALUE_SUBJECT_SUFFIX}")
}

/// A schema as known to the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaHandle {
    id: u32,
    version: Option<i32>,
    definition: Arc<str>,
}

impl SchemaHandle {
    pub fn new(id: u32, definition: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            version: None,
            definition: definition.into(),
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = Some(version);
        self
    }

    /// Registry-wide numeric id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Version under the subject, when the registry reported one.
    pub fn version(&self) -> Option<i32> {
        self.version
    }

    /// Canonical schema text.
    pub fn definition(&self) -> &str {
        &self.definition
    }
}

/// Which branch of negotiation produced a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResolutionOutcome {
    /// Identical text was already registered under the subject.
    AdoptedRegistered,
    /// Latest registered version was adopted without registering.
    AdoptedLatest,
    /// The schema was registered by this instance.
    Created,
}

impl ResolutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdoptedRegistered => "adopted_registered",
            Self::AdoptedLatest => "adopted_latest",
            Self::Created => "created",
        }
    }
}

/// A topic and its schema negotiation state.
#[derive(Debug)]
pub struct Topic {
    name: String,
    version: i32,
    raw_schema: String,
    register_schema: bool,
    schema: OnceCell<SchemaHandle>,
}

impl Topic {
    /// Consumer-side topic: takes whatever the registry has as latest.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            raw_schema: String::new(),
            register_schema: false,
            schema: OnceCell::new(),
        }
    }

    /// Attach the desired version and schema text.
    #[must_use]
    pub fn with_schema(mut self, version: i32, raw_schema: impl Into<String>) -> Self {
        self.version = version;
        self.raw_schema = raw_schema.into();
        self
    }

    /// Allow this instance to register the schema when the registry lags.
    #[must_use]
    pub fn register_schema(mut self, register: bool) -> Self {
        self.register_schema = register;
        self
    }

    /// Pre-resolved topic. Resolution becomes a no-op.
    #[must_use]
    pub fn with_resolved(mut self, handle: SchemaHandle) -> Self {
        self.schema = OnceCell::new_with(Some(handle));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn raw_schema(&self) -> &str {
        &self.raw_schema
    }

    pub fn registers_schema(&self) -> bool {
        self.register_schema
    }

    /// `"<name>-value"`.
    pub fn subject(&self) -> String {
        subject_for(&self.name)
    }

    /// Resolved handle, if negotiation already happened.
    pub fn schema(&self) -> Option<&SchemaHandle> {
        self.schema.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.schema.initialized()
    }

    /// Run `init` unless the handle is already set. Concurrent callers wait
    /// for the single in-flight initialization.
    pub(crate) async fn get_or_try_resolve<F, Fut, E>(&self, init: F) -> Result<&SchemaHandle, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SchemaHandle, E>>,
    {
        self.schema.get_or_try_init(init).await
    }
}
