//! Local Cache - persisted snapshots for offline use
//!
//! Stores the last accepted live snapshot of the cached kinds, plus the
//! selected scope, as JSON files.
//!
//! # Storage Format
//!
//! ```text
//! <home>/cache/
//! ├── scope.json
//! └── {scope}/
//!     ├── units.json
//!     └── work_orders.json
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rtgrefit_protocol::{EntityKind, Record, ScopeKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SCOPE_FILE: &str = "scope.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub scope: ScopeKey,
    pub kind: EntityKind,
    pub saved_at: DateTime<Utc>,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedScope {
    scope: ScopeKey,
    selected_at: DateTime<Utc>,
}

/// Snapshot cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct LocalCache {
    dir: PathBuf,
}

impl LocalCache {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn scope_dir(&self, scope: &ScopeKey) -> PathBuf {
        self.dir.join(scope.as_str())
    }

    fn snapshot_path(&self, scope: &ScopeKey, kind: EntityKind) -> PathBuf {
        self.scope_dir(scope).join(format!("{}.json", kind.as_str()))
    }

    /// Persist a snapshot. Kinds outside `EntityKind::CACHED` are ignored.
    pub fn save_snapshot(
        &self,
        scope: &ScopeKey,
        kind: EntityKind,
        records: &[Record],
    ) -> Result<bool> {
        if !kind.is_cached() {
            return Ok(false);
        }
        let dir = self.scope_dir(scope);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;

        let snapshot = CachedSnapshot {
            scope: scope.clone(),
            kind,
            saved_at: Utc::now(),
            records: records.to_vec(),
        };
        let path = self.snapshot_path(scope, kind);
        let json = serde_json::to_string_pretty(&snapshot)?;
        atomic_write(&path, json.as_bytes())
            .with_context(|| format!("Failed to write cache file: {}", path.display()))?;

        debug!("Cached {} {} records for {}", records.len(), kind, scope);
        Ok(true)
    }

    pub fn load_snapshot(
        &self,
        scope: &ScopeKey,
        kind: EntityKind,
    ) -> Result<Option<CachedSnapshot>> {
        let path = self.snapshot_path(scope, kind);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", path.display()))?;
        let snapshot: CachedSnapshot = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse cache file: {}", path.display()))?;
        Ok(Some(snapshot))
    }

    /// Every snapshot cached for a scope.
    pub fn list(&self, scope: &ScopeKey) -> Result<Vec<CachedSnapshot>> {
        EntityKind::CACHED
            .into_iter()
            .filter_map(|kind| self.load_snapshot(scope, kind).transpose())
            .collect()
    }

    /// Scopes with a cache directory.
    pub fn scopes(&self) -> Result<Vec<ScopeKey>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read cache directory: {}", self.dir.display()))?;
        let mut scopes = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(scope) = ScopeKey::parse(name) {
                    scopes.push(scope);
                }
            }
        }
        scopes.sort();
        Ok(scopes)
    }

    pub fn save_scope(&self, scope: &ScopeKey) -> Result<()> {
        let path = self.dir.join(SCOPE_FILE);
        let persisted = PersistedScope {
            scope: scope.clone(),
            selected_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&persisted)?;
        atomic_write(&path, json.as_bytes())
            .with_context(|| format!("Failed to write scope file: {}", path.display()))?;
        debug!("Persisted scope {}", scope);
        Ok(())
    }

    pub fn load_scope(&self) -> Result<Option<ScopeKey>> {
        let path = self.dir.join(SCOPE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scope file: {}", path.display()))?;
        let persisted: PersistedScope = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse scope file: {}", path.display()))?;
        Ok(Some(persisted.scope))
    }

    pub fn clear_scope(&self) -> Result<bool> {
        let path = self.dir.join(SCOPE_FILE);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .with_context(|| format!("Failed to delete scope file: {}", path.display()))?;
        Ok(true)
    }
}

/// Atomic write via temp file + rename
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{unit, work_order};
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_snapshot() {
        let temp = TempDir::new().unwrap();
        let cache = LocalCache::new(temp.path().to_path_buf()).unwrap();
        let scope = ScopeKey::from("P1");
        let records: Vec<Record> = vec![unit("P1", "U1").into(), unit("P1", "U2").into()];

        assert!(cache.save_snapshot(&scope, EntityKind::Units, &records).unwrap());
        let loaded = cache.load_snapshot(&scope, EntityKind::Units).unwrap();
        let loaded = loaded.unwrap();
        assert_eq!(loaded.records, records);
        assert_eq!(loaded.kind, EntityKind::Units);
    }

    #[test]
    fn test_uncached_kinds_are_skipped() {
        let temp = TempDir::new().unwrap();
        let cache = LocalCache::new(temp.path().to_path_buf()).unwrap();
        let scope = ScopeKey::from("P1");
        assert!(!cache.save_snapshot(&scope, EntityKind::Zones, &[]).unwrap());
        let zones = cache.load_snapshot(&scope, EntityKind::Zones).unwrap();
        assert!(zones.is_none());
    }

    #[test]
    fn test_list_and_scopes() {
        let temp = TempDir::new().unwrap();
        let cache = LocalCache::new(temp.path().to_path_buf()).unwrap();
        let p1 = ScopeKey::from("P1");
        let p2 = ScopeKey::from("P2");
        let units: Vec<Record> = vec![unit("P1", "U1").into()];
        let orders: Vec<Record> = vec![work_order("P1", "U1", "wo1").into()];
        cache.save_snapshot(&p1, EntityKind::Units, &units).unwrap();
        cache
            .save_snapshot(&p1, EntityKind::WorkOrders, &orders)
            .unwrap();
        cache.save_snapshot(&p2, EntityKind::Units, &[]).unwrap();

        assert_eq!(cache.list(&p1).unwrap().len(), 2);
        assert_eq!(cache.scopes().unwrap(), vec![p1, p2]);
    }

    #[test]
    fn test_scope_persistence() {
        let temp = TempDir::new().unwrap();
        let cache = LocalCache::new(temp.path().to_path_buf()).unwrap();
        assert!(cache.load_scope().unwrap().is_none());

        cache.save_scope(&ScopeKey::from("P7")).unwrap();
        assert_eq!(cache.load_scope().unwrap(), Some(ScopeKey::from("P7")));

        assert!(cache.clear_scope().unwrap());
        assert!(!cache.clear_scope().unwrap());
        assert!(cache.load_scope().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let cache = LocalCache::new(temp.path().to_path_buf()).unwrap();
        let scope = ScopeKey::from("P1");
        fs::create_dir_all(temp.path().join("P1")).unwrap();
        fs::write(temp.path().join("P1").join("units.json"), "{not json").unwrap();
        assert!(cache.load_snapshot(&scope, EntityKind::Units).is_err());
    }
}
