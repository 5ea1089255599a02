// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Draft/active mapping-file state (spec C8): a single writer discipline
//! enforced by a per-store mutex, atomic deploy via write+rename, and an
//! append-only capped history, grounded on
//! `original_source/lib/MappingAdminRouter.cpp`'s `JsonMappingReader`
//! calls (`readDraftOrActive`, `saveDraft`, `deployDraft`, `rollbackTo`,
//! `getHistory`).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Error, ErrorKind};

/// Fired after a successful `deploy`/`rollback` so the owning process can
/// hot-reload whatever is consuming the active mapping file (spec §4.8).
pub type ReloadCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub comment: String,
    pub date: String,
}

pub struct ConfigStore {
    active_path: PathBuf,
    draft_path: PathBuf,
    history_dir: PathBuf,
    history_cap: usize,
    lock: Mutex<()>,
    on_reload: ReloadCallback,
}

impl ConfigStore {
    /// `history_cap` resolves spec.md §9's open question on eviction; the
    /// admin binary defaults it to 50. `on_reload` fires after every
    /// successful `deploy`/`rollback` (spec §4.8's "invoke reload callback").
    #[must_use]
    pub fn new(active_path: impl Into<PathBuf>, history_cap: usize, on_reload: ReloadCallback) -> Self {
        let active_path = active_path.into();
        let draft_path = active_path.with_extension("draft");
        let history_dir = sibling_dir(&active_path, "history");
        Self { active_path, draft_path, history_dir, history_cap, lock: Mutex::new(()), on_reload }
    }

    #[must_use]
    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    pub async fn read_draft_or_active(&self) -> Result<Value, Error> {
        let _guard = self.lock.lock().await;
        self.read_draft_or_active_locked()
    }

    fn read_draft_or_active_locked(&self) -> Result<Value, Error> {
        let path = if self.draft_path.exists() { &self.draft_path } else { &self.active_path };
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply an RFC-6902 patch to the draft (created from the active
    /// document if no draft yet exists), validate the result, and persist
    /// it as the new draft. Returns the patched document.
    pub async fn apply_patch(&self, patch: &json_patch::Patch) -> Result<Value, Error> {
        let _guard = self.lock.lock().await;
        let mut current = self.read_draft_or_active_locked().unwrap_or_else(|_| serde_json::json!({}));
        json_patch::patch(&mut current, patch).map_err(|err| Error::new(ErrorKind::PatchFailed, err.to_string()))?;
        validate_document(&current)?;
        write_atomic_json(&self.draft_path, &current)?;
        Ok(current)
    }

    pub fn validate(&self, document: &Value) -> Result<(), Error> {
        validate_document(document)
    }

    /// Atomically rename the draft over the active path and append a
    /// history snapshot.
    pub async fn deploy(&self) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        if !self.draft_path.exists() {
            return Err(Error::new(ErrorKind::IoError, "no draft to deploy"));
        }
        let content = fs::read_to_string(&self.draft_path)?;
        fs::rename(&self.draft_path, &self.active_path)?;
        self.append_history_locked(&content, "deploy")?;
        (self.on_reload)();
        Ok(())
    }

    pub async fn rollback(&self, version_id: &str) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let snapshot_path = self.history_dir.join(format!("{version_id}.json"));
        let content = fs::read_to_string(&snapshot_path)
            .map_err(|_| Error::new(ErrorKind::VersionNotFound, version_id.to_string()))?;
        write_atomic_raw(&self.active_path, &content)?;
        self.append_history_locked(&content, format!("rollback to {version_id}"))?;
        (self.on_reload)();
        Ok(())
    }

    /// Oldest-to-newest, per spec §4.8.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, Error> {
        let _guard = self.lock.lock().await;
        self.read_manifest_locked()
    }

    fn append_history_locked(&self, content: &str, comment: impl Into<String>) -> Result<(), Error> {
        fs::create_dir_all(&self.history_dir)?;
        let mut manifest = self.read_manifest_locked().unwrap_or_default();
        let id = next_id(&manifest);
        let date = chrono::Utc::now().to_rfc3339();
        write_atomic_raw(&self.history_dir.join(format!("{id}.json")), content)?;
        manifest.push(HistoryEntry { id: id.clone(), comment: comment.into(), date });
        while manifest.len() > self.history_cap {
            let evicted = manifest.remove(0);
            let _ = fs::remove_file(self.history_dir.join(format!("{}.json", evicted.id)));
        }
        write_atomic_json(&self.history_dir.join("index.json"), &serde_json::to_value(&manifest)?)
    }

    fn read_manifest_locked(&self) -> Result<Vec<HistoryEntry>, Error> {
        let path = self.history_dir.join("index.json");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn next_id(manifest: &[HistoryEntry]) -> String {
    let next = manifest.iter().filter_map(|entry| entry.id.parse::<u64>().ok()).max().unwrap_or(0) + 1;
    next.to_string()
}

fn validate_document(document: &Value) -> Result<(), Error> {
    let raw = serde_json::to_string(document)?;
    mqttsuite_mapping::parse_document(&raw)
        .map(|_| ())
        .map_err(|err| Error::new(ErrorKind::SchemaInvalid, err.to_string()))
}

fn write_atomic_json(path: &Path, value: &Value) -> Result<(), Error> {
    write_atomic_raw(path, &serde_json::to_string_pretty(value)?)
}

fn write_atomic_raw(path: &Path, content: &str) -> Result<(), Error> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn sibling_dir(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{suffix}"));
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mqttsuite-admin-test-{name}-{}.json", std::process::id()));
        path
    }

    fn no_reload() -> ReloadCallback {
        Arc::new(|| {})
    }

    #[tokio::test]
    async fn read_falls_back_to_active_when_no_draft_exists() {
        let active = temp_path("active");
        fs::write(&active, r#"{"topic_level": {"name": "a"}}"#).unwrap();
        let store = ConfigStore::new(&active, 50, no_reload());
        let document = store.read_draft_or_active().await.unwrap();
        assert_eq!(document["topic_level"]["name"], "a");
        let _ = fs::remove_file(&active);
    }

    #[tokio::test]
    async fn deploy_renames_draft_over_active_and_records_history() {
        let active = temp_path("deploy");
        fs::write(&active, r#"{"topic_level": {"name": "a"}}"#).unwrap();
        let store = ConfigStore::new(&active, 50, no_reload());

        let patch: json_patch::Patch = serde_json::from_value(serde_json::json!([
            {"op": "replace", "path": "/topic_level/name", "value": "b"}
        ]))
        .unwrap();
        store.apply_patch(&patch).await.unwrap();
        store.deploy().await.unwrap();

        let document = store.read_draft_or_active().await.unwrap();
        assert_eq!(document["topic_level"]["name"], "b");
        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].comment, "deploy");

        let _ = fs::remove_file(&active);
        let _ = fs::remove_dir_all(sibling_dir(&active, "history"));
    }

    #[tokio::test]
    async fn deploy_and_rollback_invoke_the_reload_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let active = temp_path("reload");
        fs::write(&active, r#"{"topic_level": {"name": "a"}}"#).unwrap();
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reloads);
        let store = ConfigStore::new(&active, 50, Arc::new(move || { counter.fetch_add(1, Ordering::SeqCst); }));

        let patch: json_patch::Patch = serde_json::from_value(serde_json::json!([
            {"op": "replace", "path": "/topic_level/name", "value": "b"}
        ]))
        .unwrap();
        store.apply_patch(&patch).await.unwrap();
        store.deploy().await.unwrap();
        assert_eq!(reloads.load(Ordering::SeqCst), 1);

        let history = store.history().await.unwrap();
        store.rollback(&history[0].id).await.unwrap();
        assert_eq!(reloads.load(Ordering::SeqCst), 2);

        let _ = fs::remove_file(&active);
        let _ = fs::remove_dir_all(sibling_dir(&active, "history"));
    }

    #[tokio::test]
    async fn history_eviction_respects_the_cap() {
        let active = temp_path("cap");
        fs::write(&active, r#"{"topic_level": {"name": "a"}}"#).unwrap();
        let store = ConfigStore::new(&active, 2, no_reload());

        for i in 0..4 {
            let patch: json_patch::Patch = serde_json::from_value(serde_json::json!([
                {"op": "replace", "path": "/topic_level/name", "value": format!("v{i}")}
            ]))
            .unwrap();
            store.apply_patch(&patch).await.unwrap();
            store.deploy().await.unwrap();
        }

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 2);

        let _ = fs::remove_file(&active);
        let _ = fs::remove_dir_all(sibling_dir(&active, "history"));
    }
}
