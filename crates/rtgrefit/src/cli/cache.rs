//! `rtgrefit cache` - inspect the local snapshot cache.

use crate::cli::output::{format_timestamp, print_table};
use anyhow::Result;
use rtgrefit_protocol::ScopeKey;
use rtgrefit_sync::{CachedSnapshot, LocalCache, SyncConfig};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct SnapshotInfo {
    scope: String,
    kind: String,
    records: usize,
    saved_at: String,
}

impl From<&CachedSnapshot> for SnapshotInfo {
    fn from(snapshot: &CachedSnapshot) -> Self {
        Self {
            scope: snapshot.scope.to_string(),
            kind: snapshot.kind.to_string(),
            records: snapshot.records.len(),
            saved_at: snapshot.saved_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CacheReport {
    dir: String,
    selected_scope: Option<String>,
    snapshots: Vec<SnapshotInfo>,
}

fn collect(
    cache: &LocalCache,
    scope: Option<&str>,
) -> Result<(Option<ScopeKey>, Vec<CachedSnapshot>)> {
    let scopes = match scope {
        Some(scope) => vec![ScopeKey::parse(scope)?],
        None => cache.scopes()?,
    };
    let mut snapshots = Vec::new();
    for scope in &scopes {
        snapshots.extend(cache.list(scope)?);
    }
    Ok((cache.load_scope()?, snapshots))
}

pub fn run(config: &SyncConfig, scope: Option<&str>, json: bool) -> Result<()> {
    let cache = LocalCache::new(config.cache_dir())?;
    let (selected, snapshots) = collect(&cache, scope)?;

    if json {
        let report = CacheReport {
            dir: cache.dir().display().to_string(),
            selected_scope: selected.map(|s| s.to_string()),
            snapshots: snapshots.iter().map(SnapshotInfo::from).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Cache: {}", cache.dir().display());
    if let Some(selected) = &selected {
        println!("Selected scope: {}", selected);
    }
    if snapshots.is_empty() {
        println!("No cached snapshots.");
        return Ok(());
    }
    let rows = snapshots
        .iter()
        .map(|s| {
            vec![
                s.scope.to_string(),
                s.kind.to_string(),
                s.records.len().to_string(),
                format_timestamp(s.saved_at),
            ]
        })
        .collect();
    print_table(&["Scope", "Kind", "Records", "Saved"], rows);
    Ok(())
}
