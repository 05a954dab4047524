// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::config::LedgerConfig;
use crate::error::TaskStoreError;
use crate::model::{now_millis, ConversationEntry, HistorySummary, TaskId, UiMessage};

pub const API_HISTORY_FILE: &str = "api_conversation_history.json";
pub const UI_MESSAGES_FILE: &str = "ui_messages.json";
pub const HISTORY_INDEX_FILE: &str = "task_history.json";

/// Durable storage for a task's two logs and the shared history index.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
	async fn write_api_history(
		&self,
		task_id: &TaskId,
		entries: &[ConversationEntry],
	) -> Result<(), TaskStoreError>;

	async fn write_ui_messages(
		&self,
		task_id: &TaskId,
		messages: &[UiMessage],
	) -> Result<(), TaskStoreError>;

	/// Insert or replace the history row for `summary.id`.
	async fn write_summary(&self, summary: &HistorySummary) -> Result<(), TaskStoreError>;

	/// Best-effort size of everything stored for the task, in bytes.
	async fn measure_task_dir_size(&self, task_id: &TaskId) -> Result<u64, TaskStoreError>;

	async fn read_api_history(
		&self,
		task_id: &TaskId,
	) -> Result<Vec<ConversationEntry>, TaskStoreError>;

	async fn read_ui_messages(&self, task_id: &TaskId) -> Result<Vec<UiMessage>, TaskStoreError>;

	async fn read_history(&self) -> Result<Vec<HistorySummary>, TaskStoreError>;
}

/// JSON files under a data directory:
///
/// ```text
/// <root>/tasks/<task_id>/api_conversation_history.json
/// <root>/tasks/<task_id>/ui_messages.json
/// <root>/state/task_history.json
/// ```
pub struct LocalTaskStore {
	root: PathBuf,
	pretty: bool,
	/// Serializes read-modify-write of the history index across ledgers.
	history_lock: Mutex<()>,
}

impl LocalTaskStore {
	pub fn new(root: PathBuf) -> Self {
		Self {
			root,
			pretty: true,
			history_lock: Mutex::new(()),
		}
	}

	pub fn from_config(config: &LedgerConfig) -> Self {
		Self::new(config.data_dir.clone()).with_pretty_json(config.pretty_json)
	}

	pub fn with_pretty_json(mut self, pretty: bool) -> Self {
		self.pretty = pretty;
		self
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn task_dir(&self, task_id: &TaskId) -> PathBuf {
		self.root.join("tasks").join(task_id.as_str())
	}

	fn history_path(&self) -> PathBuf {
		self.root.join("state").join(HISTORY_INDEX_FILE)
	}

	pub async fn ensure_task_dir(&self, task_id: &TaskId) -> Result<PathBuf, TaskStoreError> {
		let dir = self.task_dir(task_id);
		tokio::fs::create_dir_all(&dir).await?;
		Ok(dir)
	}

	async fn write_json<T: Serialize + ?Sized>(
		&self,
		path: &Path,
		value: &T,
	) -> Result<(), TaskStoreError> {
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		let json = if self.pretty {
			serde_json::to_vec_pretty(value)?
		} else {
			serde_json::to_vec(value)?
		};

		let mut tmp_name = path.as_os_str().to_owned();
		tmp_name.push(".tmp");
		let tmp_path = PathBuf::from(tmp_name);

		tokio::fs::write(&tmp_path, &json).await?;
		tokio::fs::rename(&tmp_path, path).await?;

		debug!(path = %path.display(), bytes = json.len(), "wrote json file");

		Ok(())
	}

	async fn read_json_or_default<T: DeserializeOwned + Default>(
		&self,
		path: &Path,
	) -> Result<T, TaskStoreError> {
		match tokio::fs::read(path).await {
			Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(path = %path.display(), "json file not found, using default");
				Ok(T::default())
			}
			Err(e) => Err(e.into()),
		}
	}

	/// Remove a task's directory and its history row.
	pub async fn delete_task(&self, task_id: &TaskId) -> Result<(), TaskStoreError> {
		let dir = self.task_dir(task_id);

		let _guard = self.history_lock.lock().await;
		let mut history: Vec<HistorySummary> =
			self.read_json_or_default(&self.history_path()).await?;
		let before = history.len();
		history.retain(|h| &h.id != task_id);
		let had_row = history.len() != before;

		if !had_row && !tokio::fs::try_exists(&dir).await? {
			return Err(TaskStoreError::NotFound(task_id.to_string()));
		}

		if had_row {
			self.write_json(&self.history_path(), &history).await?;
		}
		if tokio::fs::try_exists(&dir).await? {
			tokio::fs::remove_dir_all(&dir).await?;
		}

		info!(task_id = %task_id, "deleted task");

		Ok(())
	}
}

/// Moves an unreadable file to `<name>.corrupt-<millis>` so its contents
/// survive the rewrite.
async fn set_aside(path: &Path) -> Result<PathBuf, TaskStoreError> {
	let mut name = path.as_os_str().to_owned();
	name.push(format!(".corrupt-{}", now_millis()));
	let kept = PathBuf::from(name);
	tokio::fs::rename(path, &kept).await?;
	Ok(kept)
}

/// Sum of file sizes below `root`, following no symlinks. Entries that
/// cannot be read are skipped.
pub async fn dir_size(root: &Path) -> Result<u64, std::io::Error> {
	let root = root.to_path_buf();
	tokio::task::spawn_blocking(move || {
		WalkDir::new(&root)
			.into_iter()
			.filter_map(|entry| match entry {
				Ok(entry) => Some(entry),
				Err(e) => {
					debug!(root = %root.display(), error = %e, "skipping unreadable entry");
					None
				}
			})
			.filter(|entry| entry.file_type().is_file())
			.filter_map(|entry| entry.metadata().ok())
			.map(|metadata| metadata.len())
			.sum::<u64>()
	})
	.await
	.map_err(std::io::Error::other)
}

#[async_trait]
impl PersistenceGateway for LocalTaskStore {
	async fn write_api_history(
		&self,
		task_id: &TaskId,
		entries: &[ConversationEntry],
	) -> Result<(), TaskStoreError> {
		let path = self.task_dir(task_id).join(API_HISTORY_FILE);
		self.write_json(&path, entries).await
	}

	async fn write_ui_messages(
		&self,
		task_id: &TaskId,
		messages: &[UiMessage],
	) -> Result<(), TaskStoreError> {
		let path = self.task_dir(task_id).join(UI_MESSAGES_FILE);
		self.write_json(&path, messages).await
	}

	async fn write_summary(&self, summary: &HistorySummary) -> Result<(), TaskStoreError> {
		let _guard = self.history_lock.lock().await;
		let path = self.history_path();

		let mut history: Vec<HistorySummary> = match self.read_json_or_default(&path).await {
			Ok(history) => history,
			Err(TaskStoreError::Serialization(e)) => {
				let kept = set_aside(&path).await?;
				error!(
						path = %path.display(),
						kept = %kept.display(),
						error = %e,
						"history index is unreadable, set it aside and started a new one"
				);
				Vec::new()
			}
			Err(e) => return Err(e),
		};

		match history.iter_mut().find(|h| h.id == summary.id) {
			Some(existing) => *existing = summary.clone(),
			None => history.push(summary.clone()),
		}
		history.sort_by(|a, b| b.ts.cmp(&a.ts));

		self.write_json(&path, &history).await?;

		debug!(
				task_id = %summary.id,
				ts = summary.ts,
				rows = history.len(),
				"updated task history"
		);

		Ok(())
	}

	async fn measure_task_dir_size(&self, task_id: &TaskId) -> Result<u64, TaskStoreError> {
		let dir = self.ensure_task_dir(task_id).await?;
		Ok(dir_size(&dir).await?)
	}

	async fn read_api_history(
		&self,
		task_id: &TaskId,
	) -> Result<Vec<ConversationEntry>, TaskStoreError> {
		let path = self.task_dir(task_id).join(API_HISTORY_FILE);
		self.read_json_or_default(&path).await
	}

	async fn read_ui_messages(&self, task_id: &TaskId) -> Result<Vec<UiMessage>, TaskStoreError> {
		let path = self.task_dir(task_id).join(UI_MESSAGES_FILE);
		self.read_json_or_default(&path).await
	}

	async fn read_history(&self) -> Result<Vec<HistorySummary>, TaskStoreError> {
		self.read_json_or_default(&self.history_path()).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::SayKind;
	use tempfile::TempDir;

	fn create_test_store() -> (LocalTaskStore, TempDir) {
		let tmp = TempDir::new().unwrap();
		let store = LocalTaskStore::new(tmp.path().to_path_buf());
		(store, tmp)
	}

	fn summary(id: &TaskId, ts: i64, task: &str) -> HistorySummary {
		HistorySummary {
			id: id.clone(),
			ulid: "01".to_string(),
			ts,
			task: task.to_string(),
			tokens_in: 0,
			tokens_out: 0,
			cache_writes: 0,
			cache_reads: 0,
			total_cost: 0.0,
			size: 0,
			shadow_git_config_work_tree: None,
			cwd_on_task_initialization: None,
			conversation_history_deleted_range: None,
			is_favorited: false,
			checkpoint_manager_error_message: None,
		}
	}

	#[tokio::test]
	async fn test_write_and_read_logs() {
		let (store, _tmp) = create_test_store();
		let id = TaskId::new();

		let entries = vec![
			ConversationEntry::user("hi"),
			ConversationEntry::assistant("hello"),
		];
		let messages = vec![UiMessage::say(SayKind::Task, "say hi")];

		store.write_api_history(&id, &entries).await.unwrap();
		store.write_ui_messages(&id, &messages).await.unwrap();

		assert_eq!(store.read_api_history(&id).await.unwrap(), entries);
		assert_eq!(store.read_ui_messages(&id).await.unwrap(), messages);
	}

	#[tokio::test]
	async fn test_missing_files_read_as_empty() {
		let (store, _tmp) = create_test_store();
		let id = TaskId::new();

		assert!(store.read_api_history(&id).await.unwrap().is_empty());
		assert!(store.read_ui_messages(&id).await.unwrap().is_empty());
		assert!(store.read_history().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_write_leaves_no_tmp_file() {
		let (store, _tmp) = create_test_store();
		let id = TaskId::new();

		store
			.write_ui_messages(&id, &[UiMessage::say(SayKind::Task, "t")])
			.await
			.unwrap();

		let mut names = Vec::new();
		let mut entries = tokio::fs::read_dir(store.task_dir(&id)).await.unwrap();
		while let Some(entry) = entries.next_entry().await.unwrap() {
			names.push(entry.file_name().to_string_lossy().to_string());
		}
		assert_eq!(names, vec![UI_MESSAGES_FILE.to_string()]);
	}

	#[tokio::test]
	async fn test_summary_upserts_by_task_id() {
		let (store, _tmp) = create_test_store();
		let first = TaskId::new();
		let second = TaskId::new();

		store.write_summary(&summary(&first, 1, "one")).await.unwrap();
		store.write_summary(&summary(&second, 2, "two")).await.unwrap();
		store
			.write_summary(&summary(&first, 3, "one, renamed"))
			.await
			.unwrap();

		let history = store.read_history().await.unwrap();
		assert_eq!(history.len(), 2);
		assert_eq!(history[0].id, first);
		assert_eq!(history[0].task, "one, renamed");
		assert_eq!(history[1].id, second);
	}

	async fn history_files(store: &LocalTaskStore) -> Vec<String> {
		let mut names = Vec::new();
		let mut entries = tokio::fs::read_dir(store.root().join("state")).await.unwrap();
		while let Some(entry) = entries.next_entry().await.unwrap() {
			names.push(entry.file_name().to_string_lossy().to_string());
		}
		names.sort();
		names
	}

	#[tokio::test]
	async fn test_corrupt_history_index_is_set_aside() {
		let (store, _tmp) = create_test_store();
		let id = TaskId::new();

		tokio::fs::create_dir_all(store.root().join("state"))
			.await
			.unwrap();
		tokio::fs::write(store.history_path(), b"{ not json")
			.await
			.unwrap();

		store.write_summary(&summary(&id, 1, "t")).await.unwrap();

		let history = store.read_history().await.unwrap();
		assert_eq!(history.len(), 1);
		assert_eq!(history[0].id, id);

		let names = history_files(&store).await;
		assert_eq!(names.len(), 2);
		let kept = names
			.iter()
			.find(|n| n.starts_with("task_history.json.corrupt-"))
			.expect("corrupt index kept");
		let raw = tokio::fs::read(store.root().join("state").join(kept))
			.await
			.unwrap();
		assert_eq!(raw, b"{ not json");
	}

	#[tokio::test]
	async fn test_rows_without_newer_fields_survive_upsert() {
		let (store, _tmp) = create_test_store();
		let id = TaskId::new();

		tokio::fs::create_dir_all(store.root().join("state"))
			.await
			.unwrap();
		tokio::fs::write(
			store.history_path(),
			br#"[{"id":"older-task","ts":1,"task":"old","tokensIn":5,"tokensOut":2,"totalCost":0.1}]"#,
		)
		.await
		.unwrap();

		store.write_summary(&summary(&id, 2, "new")).await.unwrap();

		let history = store.read_history().await.unwrap();
		assert_eq!(history.len(), 2);
		assert_eq!(history[0].id, id);
		assert_eq!(history[1].id.as_str(), "older-task");
		assert_eq!(history[1].tokens_in, 5);
		assert_eq!(history[1].ulid, "");
		assert_eq!(history_files(&store).await, vec![HISTORY_INDEX_FILE.to_string()]);
	}

	#[tokio::test]
	async fn test_measure_task_dir_size_counts_nested_files() {
		let (store, _tmp) = create_test_store();
		let id = TaskId::new();

		let dir = store.ensure_task_dir(&id).await.unwrap();
		tokio::fs::write(dir.join("a.bin"), vec![0u8; 100])
			.await
			.unwrap();
		tokio::fs::create_dir_all(dir.join("nested")).await.unwrap();
		tokio::fs::write(dir.join("nested").join("b.bin"), vec![0u8; 23])
			.await
			.unwrap();

		assert_eq!(store.measure_task_dir_size(&id).await.unwrap(), 123);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_measure_task_dir_size_skips_unreadable_entries() {
		use std::os::unix::fs::{symlink, PermissionsExt};

		let (store, _tmp) = create_test_store();
		let id = TaskId::new();

		let dir = store.ensure_task_dir(&id).await.unwrap();
		tokio::fs::write(dir.join("a.bin"), vec![0u8; 100])
			.await
			.unwrap();
		symlink(dir.join("missing"), dir.join("dangling")).unwrap();
		let locked = dir.join("locked");
		tokio::fs::create_dir_all(&locked).await.unwrap();
		tokio::fs::write(locked.join("b.bin"), vec![0u8; 23])
			.await
			.unwrap();
		std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

		let size = store.measure_task_dir_size(&id).await;

		std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
		// Privileged users can still read the locked directory.
		let size = size.unwrap();
		assert!(size == 100 || size == 123, "unexpected size {size}");
	}

	#[tokio::test]
	async fn test_delete_task_removes_dir_and_row() {
		let (store, _tmp) = create_test_store();
		let id = TaskId::new();

		store
			.write_ui_messages(&id, &[UiMessage::say(SayKind::Task, "t")])
			.await
			.unwrap();
		store.write_summary(&summary(&id, 1, "t")).await.unwrap();

		store.delete_task(&id).await.unwrap();

		assert!(!store.task_dir(&id).exists());
		assert!(store.read_history().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_delete_unknown_task_returns_not_found() {
		let (store, _tmp) = create_test_store();
		let result = store.delete_task(&TaskId::new()).await;
		assert!(matches!(result, Err(TaskStoreError::NotFound(_))));
	}

	#[tokio::test]
	async fn test_compact_json_when_pretty_disabled() {
		let (store, _tmp) = create_test_store();
		let store = store.with_pretty_json(false);
		let id = TaskId::new();

		store
			.write_api_history(&id, &[ConversationEntry::user("x")])
			.await
			.unwrap();

		let raw = tokio::fs::read_to_string(store.task_dir(&id).join(API_HISTORY_FILE))
			.await
			.unwrap();
		assert_eq!(raw, r#"[{"role":"user","content":"x"}]"#);
	}
}
