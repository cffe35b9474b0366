//! Versioned unified-schema records and the activation state machine.
//!
//! At most one record is active at any instant; activation is a single
//! transactional update that clears the old flag and sets the new one, and
//! bumps a change generation that invalidates the in-memory active-schema
//! cache. Versions are immutable once created.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;

use parking_lot::RwLock;
use semver::Version;
use serde::Serialize;
use uuid::Uuid;

use opendx_federation::FederationError;
use opendx_federation::UnifiedSchema;
use opendx_federation::schema::sdl_checksum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SchemaStatus {
    Draft,
    Active,
    Deprecated,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaRecord {
    pub id: Uuid,
    pub version: String,
    pub sdl: String,
    pub status: SchemaStatus,
    pub is_active: bool,
    /// Hex-encoded sha-256 of the SDL text.
    pub checksum: String,
    pub created_at: SystemTime,
    pub created_by: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateSchema {
    pub version: String,
    pub sdl: String,
    pub created_by: String,
    pub notes: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaStoreError {
    #[error("schema version \"{0}\" already exists")]
    VersionExists(String),
    #[error("\"{0}\" is not a valid semantic version")]
    InvalidVersion(String),
    #[error("schema version \"{0}\" was not found")]
    NotFound(String),
    #[error("schema storage failure: {0}")]
    Storage(String),
}

/// The narrow seam the gateway needs from persistence. The in-memory
/// implementation below is the one that ships; a database-backed store only
/// has to honor the one-active-at-a-time invariant behind the same trait.
pub trait SchemaStore: Send + Sync {
    fn create(&self, request: CreateSchema) -> Result<SchemaRecord, SchemaStoreError>;
    fn list(&self) -> Result<Vec<SchemaRecord>, SchemaStoreError>;
    fn get_by_version(&self, version: &str) -> Result<Option<SchemaRecord>, SchemaStoreError>;
    fn get_active(&self) -> Result<Option<SchemaRecord>, SchemaStoreError>;
    fn activate(&self, version: &str) -> Result<SchemaRecord, SchemaStoreError>;
    /// Monotonic counter bumped by every activation, letting the
    /// active-schema cache detect staleness without re-reading records.
    fn change_generation(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeType {
    Created,
    Activated,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeHistoryEntry {
    pub change_type: ChangeType,
    pub version: String,
    pub created_by: String,
    pub created_at: SystemTime,
}

#[derive(Default)]
pub struct MemorySchemaStore {
    records: RwLock<Vec<SchemaRecord>>,
    history: RwLock<Vec<ChangeHistoryEntry>>,
    generation: AtomicU64,
}

impl MemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<ChangeHistoryEntry> {
        self.history.read().clone()
    }

    fn record_change(&self, change_type: ChangeType, version: &str, created_by: &str) {
        self.history.write().push(ChangeHistoryEntry {
            change_type,
            version: version.to_owned(),
            created_by: created_by.to_owned(),
            created_at: SystemTime::now(),
        });
    }
}

impl SchemaStore for MemorySchemaStore {
    fn create(&self, request: CreateSchema) -> Result<SchemaRecord, SchemaStoreError> {
        Version::parse(&request.version)
            .map_err(|_| SchemaStoreError::InvalidVersion(request.version.clone()))?;
        let mut records = self.records.write();
        if records.iter().any(|record| record.version == request.version) {
            return Err(SchemaStoreError::VersionExists(request.version));
        }
        let record = SchemaRecord {
            id: Uuid::new_v4(),
            checksum: sdl_checksum(&request.sdl),
            version: request.version,
            sdl: request.sdl,
            status: SchemaStatus::Draft,
            is_active: false,
            created_at: SystemTime::now(),
            created_by: request.created_by,
            notes: request.notes,
        };
        records.push(record.clone());
        drop(records);
        self.record_change(ChangeType::Created, &record.version, &record.created_by);
        Ok(record)
    }

    fn list(&self) -> Result<Vec<SchemaRecord>, SchemaStoreError> {
        Ok(self.records.read().clone())
    }

    fn get_by_version(&self, version: &str) -> Result<Option<SchemaRecord>, SchemaStoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .find(|record| record.version == version)
            .cloned())
    }

    fn get_active(&self) -> Result<Option<SchemaRecord>, SchemaStoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .find(|record| record.is_active)
            .cloned())
    }

    fn activate(&self, version: &str) -> Result<SchemaRecord, SchemaStoreError> {
        let mut records = self.records.write();
        if !records.iter().any(|record| record.version == version) {
            return Err(SchemaStoreError::NotFound(version.to_owned()));
        }
        let mut activated = None;
        for record in records.iter_mut() {
            if record.version == version {
                record.is_active = true;
                record.status = SchemaStatus::Active;
                activated = Some(record.clone());
            } else if record.is_active {
                record.is_active = false;
                record.status = SchemaStatus::Deprecated;
            }
        }
        drop(records);
        let record = activated.ok_or_else(|| SchemaStoreError::NotFound(version.to_owned()))?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.record_change(ChangeType::Activated, &record.version, &record.created_by);
        tracing::info!(version = %record.version, "unified schema activated");
        Ok(record)
    }

    fn change_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

struct CacheState {
    generation: u64,
    schema: Option<Arc<UnifiedSchema>>,
}

/// Read-mostly handle on the parsed active schema. Readers clone an `Arc`
/// under a briefly-held read lock; the parse happens once per activation.
/// When the store has no active record the SDL is resolved through the
/// fallback chain: store, embedded configuration, shipped SDL file.
pub struct ActiveSchemaCache {
    store: Arc<dyn SchemaStore>,
    fallback_sdl: Option<String>,
    fallback_file: Option<PathBuf>,
    state: RwLock<CacheState>,
}

impl ActiveSchemaCache {
    pub fn new(
        store: Arc<dyn SchemaStore>,
        fallback_sdl: Option<String>,
        fallback_file: Option<PathBuf>,
    ) -> Self {
        ActiveSchemaCache {
            store,
            fallback_sdl,
            fallback_file,
            state: RwLock::new(CacheState {
                generation: 0,
                schema: None,
            }),
        }
    }

    pub fn current(&self) -> Result<Arc<UnifiedSchema>, FederationError> {
        let generation = self.store.change_generation();
        {
            let state = self.state.read();
            if state.generation == generation {
                if let Some(schema) = &state.schema {
                    return Ok(schema.clone());
                }
            }
        }
        let mut state = self.state.write();
        if state.generation == generation {
            if let Some(schema) = &state.schema {
                return Ok(schema.clone());
            }
        }
        let sdl = self.resolve_sdl()?;
        let schema = Arc::new(UnifiedSchema::parse(&sdl)?);
        state.generation = generation;
        state.schema = Some(schema.clone());
        Ok(schema)
    }

    fn resolve_sdl(&self) -> Result<String, FederationError> {
        match self.store.get_active() {
            Ok(Some(record)) => return Ok(record.sdl),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(%error, "schema store read failed, trying fallbacks");
            }
        }
        if let Some(sdl) = &self.fallback_sdl {
            tracing::debug!("serving the embedded configuration SDL");
            return Ok(sdl.clone());
        }
        if let Some(path) = &self.fallback_file {
            match std::fs::read_to_string(path) {
                Ok(sdl) => {
                    tracing::debug!(path = %path.display(), "serving the shipped SDL file");
                    return Ok(sdl);
                }
                Err(error) => {
                    tracing::warn!(%error, path = %path.display(), "could not read the shipped SDL file");
                }
            }
        }
        Err(FederationError::MissingActiveSchema)
    }
}
