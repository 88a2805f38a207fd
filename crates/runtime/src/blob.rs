use std::io::{Read, Write};
use std::sync::Arc;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::context::PayloadTypeRegistry;
use crate::conversation::ConversationState;

// ── Format constants ─────────────────────────────────────────────────────────

pub const BLOB_MAGIC: [u8; 4] = *b"CVST";
pub const BLOB_VERSION: u16 = 1;

/// magic(4) + version(2) + flags(2) + hash(32) + payload length(4).
const HEADER_LEN: usize = 44;
const HASH_OFFSET: usize = 8;
const LEN_OFFSET: usize = 40;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Blob decode/encode failures. Integrity and migration problems are
/// unrecoverable for the conversation: callers must clear or refuse the
/// blob and start fresh.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob too short ({0} bytes); not a conversation blob")]
    TooShort(usize),
    #[error("bad magic; not a conversation blob")]
    BadMagic,
    #[error("unsupported blob version {0}")]
    UnsupportedVersion(u16),
    #[error("payload length mismatch: header says {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("integrity hash mismatch")]
    HashMismatch,
    #[error("payload compression failure: {0}")]
    Compression(#[from] std::io::Error),
    #[error("state encoding failure: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no migration registered from version {from}")]
    MissingMigration { from: u16 },
    #[error("migration from version {from} failed: {message}")]
    MigrationFailed { from: u16, message: String },
    #[error("working-context payload '{context_type}' rejected: {message}")]
    Payload {
        context_type: String,
        message: String,
    },
}

impl BlobError {
    /// True for header/hash/length corruption, as opposed to migration or
    /// payload-domain failures.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            BlobError::TooShort(_)
                | BlobError::BadMagic
                | BlobError::UnsupportedVersion(_)
                | BlobError::LengthMismatch { .. }
                | BlobError::HashMismatch
        )
    }
}

// ── Migrations ───────────────────────────────────────────────────────────────

type MigrationFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

struct Migration {
    from: u16,
    to: u16,
    transform: MigrationFn,
}

/// Ordered `(from, to, transform)` entries composing a deterministic
/// migration chain over the decoded JSON tree. A transform receives the
/// state at `from` and returns it at `to`.
#[derive(Default, Clone)]
pub struct MigrationRegistry {
    steps: Vec<Arc<Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, from: u16, to: u16, transform: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.steps.push(Arc::new(Migration {
            from,
            to,
            transform: Arc::new(transform),
        }));
    }

    /// Apply the chain taking `tree` from `from` up to `target`. The first
    /// registered step matching the current version wins at each link.
    fn apply(&self, mut tree: Value, from: u16, target: u16) -> Result<Value, BlobError> {
        let mut version = from;
        while version < target {
            let step = self
                .steps
                .iter()
                .find(|m| m.from == version && m.to <= target)
                .ok_or(BlobError::MissingMigration { from: version })?;
            tree = (step.transform)(tree).map_err(|message| BlobError::MigrationFailed {
                from: version,
                message,
            })?;
            version = step.to;
        }
        Ok(tree)
    }
}

// ── Codec ────────────────────────────────────────────────────────────────────

/// Encodes [`ConversationState`] into the versioned binary blob and back.
///
/// The byte layout is stable: callers persist blobs as opaque bytes and
/// must never parse them. Hashing is optional on encode; on decode, a
/// non-zero hash field is always verified.
#[derive(Clone)]
pub struct BlobCodec {
    version: u16,
    hash_payload: bool,
    migrations: MigrationRegistry,
    payload_types: PayloadTypeRegistry,
}

impl Default for BlobCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobCodec {
    pub fn new() -> Self {
        Self {
            version: BLOB_VERSION,
            hash_payload: true,
            migrations: MigrationRegistry::new(),
            payload_types: PayloadTypeRegistry::new(),
        }
    }

    /// Override the current state-schema version. Applications that evolve
    /// their state shape bump this alongside registering the migration that
    /// brings older trees forward.
    pub fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn with_hashing(mut self, hash_payload: bool) -> Self {
        self.hash_payload = hash_payload;
        self
    }

    pub fn with_migrations(mut self, migrations: MigrationRegistry) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn with_payload_types(mut self, payload_types: PayloadTypeRegistry) -> Self {
        self.payload_types = payload_types;
        self
    }

    pub fn encode(&self, state: &ConversationState) -> Result<Vec<u8>, BlobError> {
        let json = serde_json::to_vec(state)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let payload = encoder.finish()?;

        let mut blob = Vec::with_capacity(HEADER_LEN + payload.len());
        blob.extend_from_slice(&BLOB_MAGIC);
        blob.extend_from_slice(&self.version.to_be_bytes());
        blob.extend_from_slice(&0u16.to_be_bytes());
        if self.hash_payload {
            blob.extend_from_slice(&Sha256::digest(&payload));
        } else {
            blob.extend_from_slice(&[0u8; 32]);
        }
        blob.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        blob.extend_from_slice(&payload);
        Ok(blob)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<ConversationState, BlobError> {
        let (version, tree) = self.decode_tree(bytes)?;
        let tree = if version < self.version {
            self.migrations.apply(tree, version, self.version)?
        } else {
            tree
        };
        let mut state: ConversationState = serde_json::from_value(tree)?;
        if let Some(context) = &mut state.working_context {
            let context_type = context.context_type.clone();
            self.payload_types
                .materialize(context)
                .map_err(|message| BlobError::Payload {
                    context_type,
                    message,
                })?;
        }
        Ok(state)
    }

    /// Pretty-printed JSON view of a blob's payload, for debugging. The
    /// stored tree is shown as-is: no migrations, no payload hooks.
    pub fn to_readable_json(&self, bytes: &[u8]) -> Result<String, BlobError> {
        let (_, tree) = self.decode_tree(bytes)?;
        Ok(serde_json::to_string_pretty(&tree)?)
    }

    fn decode_tree(&self, bytes: &[u8]) -> Result<(u16, Value), BlobError> {
        if bytes.len() < HEADER_LEN {
            return Err(BlobError::TooShort(bytes.len()));
        }
        if bytes[..4] != BLOB_MAGIC {
            return Err(BlobError::BadMagic);
        }
        let version = u16::from_be_bytes([bytes[4], bytes[5]]);
        if version == 0 || version > self.version {
            return Err(BlobError::UnsupportedVersion(version));
        }
        let expected = u32::from_be_bytes([
            bytes[LEN_OFFSET],
            bytes[LEN_OFFSET + 1],
            bytes[LEN_OFFSET + 2],
            bytes[LEN_OFFSET + 3],
        ]) as usize;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != expected {
            return Err(BlobError::LengthMismatch {
                expected,
                found: payload.len(),
            });
        }

        let stored_hash = &bytes[HASH_OFFSET..HASH_OFFSET + 32];
        if stored_hash.iter().any(|b| *b != 0) {
            let actual = Sha256::digest(payload);
            if actual.as_slice() != stored_hash {
                return Err(BlobError::HashMismatch);
            }
        }

        let mut json = Vec::new();
        GzDecoder::new(payload).read_to_end(&mut json)?;
        Ok((version, serde_json::from_slice(&json)?))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
