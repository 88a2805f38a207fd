use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Working context ──────────────────────────────────────────────────────────

/// Metadata key recording which payload version a working context carries.
const PAYLOAD_VERSION_KEY: &str = "payloadVersion";

/// A typed payload carried across conversation turns: the "object under
/// refinement" (a query being tuned, a basket being filled).
///
/// The payload itself is opaque JSON; the [`PayloadTypeRegistry`] knows how
/// to validate and migrate it based on `context_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingContext {
    pub context_type: String,
    pub payload: Value,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl WorkingContext {
    pub fn new(context_type: impl Into<String>, payload: Value) -> Self {
        Self {
            context_type: context_type.into(),
            payload,
            last_modified: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn payload_version(&self) -> u32 {
        self.metadata
            .get(PAYLOAD_VERSION_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }

    pub fn set_payload_version(&mut self, version: u32) {
        self.metadata
            .insert(PAYLOAD_VERSION_KEY.to_string(), version.to_string());
    }
}

// ── Payload types ────────────────────────────────────────────────────────────

/// Hooks for one working-context payload domain.
///
/// `migrate` is called once per version step: given a payload at
/// `from_version` it returns the payload at `from_version + 1`. The chain
/// applied to a current-version payload is the identity.
pub trait PayloadType: Send + Sync {
    fn context_type(&self) -> &str;

    fn current_version(&self) -> u32 {
        1
    }

    fn validate(&self, payload: &Value) -> Result<(), String>;

    fn migrate(&self, from_version: u32, payload: Value) -> Result<Value, String> {
        let _ = from_version;
        Ok(payload)
    }
}

/// Registry of payload domains, keyed by `context_type`. Unknown types are
/// preserved as raw JSON rather than rejected; an application may load a
/// blob written by a build that knew more types than this one.
#[derive(Default, Clone)]
pub struct PayloadTypeRegistry {
    types: HashMap<String, Arc<dyn PayloadType>>,
}

impl PayloadTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, payload_type: Arc<dyn PayloadType>) {
        self.types
            .insert(payload_type.context_type().to_string(), payload_type);
    }

    pub fn find(&self, context_type: &str) -> Option<Arc<dyn PayloadType>> {
        self.types.get(context_type).cloned()
    }

    /// Bring a decoded working context up to its domain's current payload
    /// version, then validate it. No-op for unregistered types.
    pub fn materialize(&self, context: &mut WorkingContext) -> Result<(), String> {
        let Some(payload_type) = self.find(&context.context_type) else {
            return Ok(());
        };
        let current = payload_type.current_version();
        let mut version = context.payload_version();
        while version < current {
            let payload = std::mem::replace(&mut context.payload, Value::Null);
            context.payload = payload_type.migrate(version, payload)?;
            version += 1;
        }
        context.set_payload_version(current);
        payload_type.validate(&context.payload)?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
