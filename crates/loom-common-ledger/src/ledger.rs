// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The per-task conversation state ledger.
//!
//! A [`StateLedger`] owns two independently indexed logs for one task: the
//! model-facing API history and the user-facing UI messages. Every mutation
//! takes the ledger's lock and holds it across all of its persistence
//! awaits, so mutations are applied and persisted one at a time in lock
//! acquisition order, and the history summary written at the end of a
//! mutation always reflects exactly that mutation's result.
//!
//! Reads do not take the lock. [`StateLedger::api_history`] and
//! [`StateLedger::ui_messages`] return an immutable snapshot of the current
//! in-memory log, which is published before the mutation's disk writes
//! complete. A reader may therefore see a message that is not yet (or, if
//! the write fails, never) on disk.
//!
//! Once a mutation has started it runs to completion on the runtime even if
//! the caller stops awaiting it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointCollaborator;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult, PersistOp, PersistenceError, TaskStoreError};
use crate::gateway::PersistenceGateway;
use crate::metrics::{CombinedApiMetrics, MetricsDeriver};
use crate::model::{
	ConversationEntry, HistorySummary, MessageSeq, SharedTaskState, TaskId, TaskState, UiMessage,
	UiMessagePatch,
};

/// State that only changes while the ledger lock is held.
struct Guarded {
	next_seq: u64,
	checkpoint: Option<Arc<dyn CheckpointCollaborator>>,
}

impl Guarded {
	fn new(checkpoint: Option<Arc<dyn CheckpointCollaborator>>) -> Self {
		Self {
			next_seq: 1,
			checkpoint,
		}
	}

	/// `None` once the sequence space is used up.
	fn allocate(&mut self) -> Option<MessageSeq> {
		let seq = self.next_seq;
		self.next_seq = seq.checked_add(1)?;
		Some(MessageSeq::new(seq))
	}

	/// Keep existing sequence numbers, number the rest after the highest one.
	/// If that would leave no room for later appends, the whole log is
	/// renumbered from 1.
	fn assign_seqs(&mut self, messages: &mut [UiMessage]) {
		let highest = messages.iter().map(|m| m.seq.get()).max().unwrap_or(0);
		let unassigned = messages.iter().filter(|m| m.seq.is_unassigned()).count() as u64;
		let start = self.next_seq.max(highest.saturating_add(1));

		match start.checked_add(unassigned) {
			Some(end) if end < u64::MAX => {
				// Every value in start..end fits, checked above.
				let mut next = start;
				for message in messages.iter_mut().filter(|m| m.seq.is_unassigned()) {
					message.seq = MessageSeq::new(next);
					next += 1;
				}
				self.next_seq = end;
			}
			_ => {
				warn!(highest = highest, "message sequence numbers exhausted, renumbering");
				let mut next = 1u64;
				for message in messages.iter_mut() {
					message.seq = MessageSeq::new(next);
					next += 1;
				}
				self.next_seq = next;
			}
		}
	}
}

type Locked<'a> = MutexGuard<'a, Guarded>;

struct LedgerInner {
	task_id: TaskId,
	ulid: String,
	cwd_on_task_initialization: Option<String>,
	measure_task_dir: bool,
	gateway: Arc<dyn PersistenceGateway>,
	metrics: Arc<dyn MetricsDeriver>,
	task_state: SharedTaskState,
	lock: Mutex<Guarded>,
	api_history: watch::Sender<Arc<Vec<ConversationEntry>>>,
	ui_messages: watch::Sender<Arc<Vec<UiMessage>>>,
}

/// Handle to one task's ledger. Clones share the same ledger.
#[derive(Clone)]
pub struct StateLedger {
	inner: Arc<LedgerInner>,
}

impl std::fmt::Debug for StateLedger {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StateLedger")
			.field("task_id", &self.inner.task_id)
			.field("api_history_len", &self.inner.api_history.borrow().len())
			.field("ui_messages_len", &self.inner.ui_messages.borrow().len())
			.finish()
	}
}

impl StateLedger {
	pub fn builder(task_id: TaskId, gateway: Arc<dyn PersistenceGateway>) -> LedgerBuilder {
		LedgerBuilder::new(task_id, gateway)
	}

	pub fn task_id(&self) -> &TaskId {
		&self.inner.task_id
	}

	pub fn task_state(&self) -> SharedTaskState {
		Arc::clone(&self.inner.task_state)
	}

	/// Current in-memory API history. Does not wait for in-flight mutations
	/// and may be ahead of what is on disk.
	pub fn api_history(&self) -> Arc<Vec<ConversationEntry>> {
		self.inner.api_history.borrow().clone()
	}

	/// Current in-memory UI messages. Same visibility rules as
	/// [`StateLedger::api_history`].
	pub fn ui_messages(&self) -> Arc<Vec<UiMessage>> {
		self.inner.ui_messages.borrow().clone()
	}

	/// Notified each time a mutation publishes a new API history.
	pub fn subscribe_api_history(&self) -> watch::Receiver<Arc<Vec<ConversationEntry>>> {
		self.inner.api_history.subscribe()
	}

	/// Notified each time a mutation publishes new UI messages.
	pub fn subscribe_ui_messages(&self) -> watch::Receiver<Arc<Vec<UiMessage>>> {
		self.inner.ui_messages.subscribe()
	}

	/// Current position of the message with `seq`, if it still exists.
	pub fn position_of(&self, seq: MessageSeq) -> Option<usize> {
		self
			.inner
			.ui_messages
			.borrow()
			.iter()
			.position(|m| m.seq == seq)
	}

	/// Run a mutation body on the runtime so that it completes once started.
	async fn detached<T, F, Fut>(&self, body: F) -> LedgerResult<T>
	where
		F: FnOnce(Arc<LedgerInner>) -> Fut,
		Fut: Future<Output = LedgerResult<T>> + Send + 'static,
		T: Send + 'static,
	{
		let inner = Arc::clone(&self.inner);
		tokio::spawn(body(inner)).await?
	}

	/// Append one API entry and persist the API history.
	pub async fn append_api_entry(&self, entry: ConversationEntry) -> LedgerResult<()> {
		self
			.detached(move |inner| async move { inner.append_api_entry(entry).await })
			.await
	}

	/// Replace the API history and persist it. Safe under concurrency, unlike
	/// [`LedgerBuilder::replace_api_history`].
	pub async fn overwrite_api_history(&self, entries: Vec<ConversationEntry>) -> LedgerResult<()> {
		self
			.detached(move |inner| async move { inner.overwrite_api_history(entries).await })
			.await
	}

	/// Replace all UI messages and refresh the summary.
	pub async fn replace_ui_messages(&self, messages: Vec<UiMessage>) -> LedgerResult<()> {
		self
			.detached(move |inner| async move { inner.replace_ui_messages(messages).await })
			.await
	}

	/// Append a UI message and refresh the summary.
	///
	/// The message is stamped with the position of the last API entry and the
	/// task's current truncation window, so the API turn that produced it
	/// must be appended first. Returns the message's stable sequence number.
	pub async fn append_ui_message(&self, message: UiMessage) -> LedgerResult<MessageSeq> {
		self
			.detached(move |inner| async move { inner.append_ui_message(message).await })
			.await
	}

	/// Merge `patch` into the message at `index`. Out-of-range indices are
	/// rejected without touching memory or disk.
	pub async fn update_ui_message(&self, index: usize, patch: UiMessagePatch) -> LedgerResult<()> {
		self
			.detached(move |inner| async move { inner.update_ui_message(Target::Index(index), patch).await })
			.await
	}

	pub async fn update_ui_message_by_seq(
		&self,
		seq: MessageSeq,
		patch: UiMessagePatch,
	) -> LedgerResult<()> {
		self
			.detached(move |inner| async move { inner.update_ui_message(Target::Seq(seq), patch).await })
			.await
	}

	/// Remove the message at `index`. Later messages shift down by one, so
	/// positions held by callers become stale; sequence numbers do not.
	pub async fn delete_ui_message(&self, index: usize) -> LedgerResult<()> {
		self
			.detached(move |inner| async move { inner.delete_ui_message(Target::Index(index)).await })
			.await
	}

	pub async fn delete_ui_message_by_seq(&self, seq: MessageSeq) -> LedgerResult<()> {
		self
			.detached(move |inner| async move { inner.delete_ui_message(Target::Seq(seq)).await })
			.await
	}

	/// Persist the UI messages and rewrite the history summary without
	/// changing anything else.
	pub async fn persist_and_summarize(&self) -> LedgerResult<()> {
		self
			.detached(|inner| async move {
				let guard = inner.lock.lock().await;
				inner.summarize(&guard).await
			})
			.await
	}

	/// Attach, replace or detach the checkpoint collaborator consulted by
	/// later summaries.
	pub async fn set_checkpoint(&self, checkpoint: Option<Arc<dyn CheckpointCollaborator>>) {
		let mut guard = self.inner.lock.lock().await;
		guard.checkpoint = checkpoint;
	}
}

#[derive(Clone, Copy, Debug)]
enum Target {
	Index(usize),
	Seq(MessageSeq),
}

impl LedgerInner {
	fn persistence_failure(&self, operation: PersistOp, source: TaskStoreError) -> LedgerError {
		error!(
				task_id = %self.task_id,
				operation = %operation,
				error = %source,
				"persistence failed, in-memory state kept"
		);
		LedgerError::Persistence(PersistenceError {
			task_id: self.task_id.clone(),
			operation,
			source,
		})
	}

	fn resolve(&self, target: Target) -> LedgerResult<usize> {
		let messages = self.ui_messages.borrow();
		match target {
			Target::Index(index) if index < messages.len() => Ok(index),
			Target::Index(index) => Err(LedgerError::Index {
				index,
				len: messages.len(),
			}),
			Target::Seq(seq) => messages
				.iter()
				.position(|m| m.seq == seq)
				.ok_or(LedgerError::UnknownMessage(seq)),
		}
	}

	async fn append_api_entry(&self, entry: ConversationEntry) -> LedgerResult<()> {
		let guard = self.lock.lock().await;
		self
			.api_history
			.send_modify(|history| Arc::make_mut(history).push(entry));
		self.persist_api_history(&guard).await
	}

	async fn overwrite_api_history(&self, entries: Vec<ConversationEntry>) -> LedgerResult<()> {
		let guard = self.lock.lock().await;
		self.api_history.send_replace(Arc::new(entries));
		self.persist_api_history(&guard).await
	}

	async fn replace_ui_messages(&self, mut messages: Vec<UiMessage>) -> LedgerResult<()> {
		let mut guard = self.lock.lock().await;
		guard.assign_seqs(&mut messages);
		self.ui_messages.send_replace(Arc::new(messages));
		self.summarize(&guard).await
	}

	async fn append_ui_message(&self, mut message: UiMessage) -> LedgerResult<MessageSeq> {
		let mut guard = self.lock.lock().await;

		// Both stamps are taken under the same lock as the append, so a
		// concurrent append_api_entry cannot slip in between.
		message.conversation_history_index = self.api_history.borrow().len().checked_sub(1);
		message.conversation_history_deleted_range = self
			.task_state
			.read()
			.await
			.conversation_history_deleted_range;
		let seq = guard.allocate().ok_or(LedgerError::SeqExhausted)?;
		message.seq = seq;

		self
			.ui_messages
			.send_modify(|messages| Arc::make_mut(messages).push(message));

		self.summarize(&guard).await?;
		Ok(seq)
	}

	async fn update_ui_message(&self, target: Target, patch: UiMessagePatch) -> LedgerResult<()> {
		let guard = self.lock.lock().await;
		let index = self.resolve(target)?;

		self
			.ui_messages
			.send_modify(|messages| patch.apply(&mut Arc::make_mut(messages)[index]));

		self.summarize(&guard).await
	}

	async fn delete_ui_message(&self, target: Target) -> LedgerResult<()> {
		let guard = self.lock.lock().await;
		let index = self.resolve(target)?;

		self.ui_messages.send_modify(|messages| {
			Arc::make_mut(messages).remove(index);
		});

		debug!(task_id = %self.task_id, index = index, "deleted ui message");

		self.summarize(&guard).await
	}

	async fn persist_api_history(&self, _guard: &Locked<'_>) -> LedgerResult<()> {
		let history = self.api_history.borrow().clone();
		self
			.gateway
			.write_api_history(&self.task_id, &history)
			.await
			.map_err(|e| self.persistence_failure(PersistOp::WriteApiHistory, e))?;

		debug!(
				task_id = %self.task_id,
				entries = history.len(),
				"persisted api history"
		);
		Ok(())
	}

	async fn task_dir_size(&self) -> u64 {
		if !self.measure_task_dir {
			return 0;
		}

		self
			.gateway
			.measure_task_dir_size(&self.task_id)
			.await
			.unwrap_or_else(|e| {
				warn!(
						task_id = %self.task_id,
						error = %e,
						"failed to measure task directory size"
				);
				0
			})
	}

	/// Persist the UI messages, then derive and persist the history summary.
	/// Requires the ledger lock.
	async fn summarize(&self, guard: &Locked<'_>) -> LedgerResult<()> {
		let messages = self.ui_messages.borrow().clone();

		self
			.gateway
			.write_ui_messages(&self.task_id, &messages)
			.await
			.map_err(|e| self.persistence_failure(PersistOp::WriteUiMessages, e))?;

		// The first message is always the task itself.
		let Some(task_message) = messages.first() else {
			debug!(task_id = %self.task_id, "no ui messages, skipping summary");
			return Ok(());
		};
		let Some(last_relevant) = messages.iter().rev().find(|m| !m.kind.is_resume()) else {
			debug!(task_id = %self.task_id, "only resume prompts, skipping summary");
			return Ok(());
		};

		let metrics = self.metrics.aggregate(&messages[1..]);
		let size = self.task_dir_size().await;

		let checkpoint = guard.checkpoint.clone();
		let shadow_git_config_work_tree = match checkpoint {
			Some(checkpoint) => checkpoint.working_tree_id().await,
			None => None,
		};

		let TaskState {
			conversation_history_deleted_range,
			checkpoint_manager_error_message,
			is_favorited,
		} = self.task_state.read().await.clone();

		let summary = HistorySummary {
			id: self.task_id.clone(),
			ulid: self.ulid.clone(),
			ts: last_relevant.ts,
			task: task_message.text.clone().unwrap_or_default(),
			tokens_in: metrics.tokens_in,
			tokens_out: metrics.tokens_out,
			cache_writes: metrics.cache_writes,
			cache_reads: metrics.cache_reads,
			total_cost: metrics.total_cost,
			size,
			shadow_git_config_work_tree,
			cwd_on_task_initialization: self.cwd_on_task_initialization.clone(),
			conversation_history_deleted_range,
			is_favorited,
			checkpoint_manager_error_message,
		};

		self
			.gateway
			.write_summary(&summary)
			.await
			.map_err(|e| self.persistence_failure(PersistOp::WriteSummary, e))?;

		debug!(
				task_id = %self.task_id,
				messages = messages.len(),
				ts = summary.ts,
				size = summary.size,
				"persisted ui messages and summary"
		);
		Ok(())
	}
}

/// Assembles a [`StateLedger`]. The unguarded seeding setters exist only
/// here, before the ledger can be shared.
pub struct LedgerBuilder {
	task_id: TaskId,
	gateway: Arc<dyn PersistenceGateway>,
	metrics: Arc<dyn MetricsDeriver>,
	task_state: Option<SharedTaskState>,
	checkpoint: Option<Arc<dyn CheckpointCollaborator>>,
	ulid: Option<String>,
	cwd_on_task_initialization: Option<String>,
	measure_task_dir: bool,
	api_history: Vec<ConversationEntry>,
	ui_messages: Vec<UiMessage>,
}

impl LedgerBuilder {
	pub fn new(task_id: TaskId, gateway: Arc<dyn PersistenceGateway>) -> Self {
		Self {
			task_id,
			gateway,
			metrics: Arc::new(CombinedApiMetrics),
			task_state: None,
			checkpoint: None,
			ulid: None,
			cwd_on_task_initialization: None,
			measure_task_dir: true,
			api_history: Vec::new(),
			ui_messages: Vec::new(),
		}
	}

	pub fn with_config(mut self, config: &LedgerConfig) -> Self {
		self.measure_task_dir = config.measure_task_dir;
		self
	}

	pub fn with_metrics(mut self, metrics: Arc<dyn MetricsDeriver>) -> Self {
		self.metrics = metrics;
		self
	}

	pub fn with_task_state(mut self, task_state: SharedTaskState) -> Self {
		self.task_state = Some(task_state);
		self
	}

	pub fn with_checkpoint(mut self, checkpoint: Arc<dyn CheckpointCollaborator>) -> Self {
		self.checkpoint = Some(checkpoint);
		self
	}

	pub fn with_ulid(mut self, ulid: impl Into<String>) -> Self {
		self.ulid = Some(ulid.into());
		self
	}

	pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
		self.cwd_on_task_initialization = Some(cwd.into());
		self
	}

	pub fn measure_task_dir(mut self, enabled: bool) -> Self {
		self.measure_task_dir = enabled;
		self
	}

	/// Seed the API history without locking or persisting.
	pub fn replace_api_history(mut self, entries: Vec<ConversationEntry>) -> Self {
		self.api_history = entries;
		self
	}

	/// Seed the UI messages without locking or persisting.
	pub fn replace_ui_messages(mut self, messages: Vec<UiMessage>) -> Self {
		self.ui_messages = messages;
		self
	}

	/// Seed both logs from the gateway's stored copies.
	pub async fn load_from_gateway(mut self) -> Result<Self, TaskStoreError> {
		self.api_history = self.gateway.read_api_history(&self.task_id).await?;
		self.ui_messages = self.gateway.read_ui_messages(&self.task_id).await?;
		info!(
				task_id = %self.task_id,
				api_entries = self.api_history.len(),
				ui_messages = self.ui_messages.len(),
				"loaded task logs"
		);
		Ok(self)
	}

	pub fn build(self) -> StateLedger {
		let mut guarded = Guarded::new(self.checkpoint);
		let mut ui_messages = self.ui_messages;
		guarded.assign_seqs(&mut ui_messages);

		let cwd_on_task_initialization = self.cwd_on_task_initialization.or_else(|| {
			std::env::current_dir()
				.ok()
				.map(|p| p.display().to_string())
		});

		let (api_history, _) = watch::channel(Arc::new(self.api_history));
		let (ui_messages, _) = watch::channel(Arc::new(ui_messages));

		debug!(task_id = %self.task_id, "built state ledger");

		StateLedger {
			inner: Arc::new(LedgerInner {
				task_id: self.task_id,
				ulid: self.ulid.unwrap_or_else(|| uuid7::uuid7().to_string()),
				cwd_on_task_initialization,
				measure_task_dir: self.measure_task_dir,
				gateway: self.gateway,
				metrics: self.metrics,
				task_state: self
					.task_state
					.unwrap_or_else(|| TaskState::default().shared()),
				lock: Mutex::new(guarded),
				api_history,
				ui_messages,
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gateway::LocalTaskStore;
	use crate::model::{AskKind, SayKind};
	use tempfile::TempDir;

	fn create_test_ledger() -> (StateLedger, Arc<LocalTaskStore>, TempDir) {
		let tmp = TempDir::new().unwrap();
		let store = Arc::new(LocalTaskStore::new(tmp.path().to_path_buf()));
		let ledger = StateLedger::builder(TaskId::new(), store.clone())
			.with_cwd("/work")
			.with_ulid("ulid-1")
			.build();
		(ledger, store, tmp)
	}

	#[test]
	fn test_assign_seqs_keeps_existing_numbers() {
		let mut guarded = Guarded::new(None);
		let mut messages = vec![
			UiMessage::say(SayKind::Task, "t"),
			UiMessage::say(SayKind::Text, "a"),
			UiMessage::say(SayKind::Text, "b"),
		];
		messages[1].seq = MessageSeq::new(10);

		guarded.assign_seqs(&mut messages);

		assert_eq!(messages[0].seq, MessageSeq::new(11));
		assert_eq!(messages[1].seq, MessageSeq::new(10));
		assert_eq!(messages[2].seq, MessageSeq::new(12));
		assert_eq!(guarded.allocate(), Some(MessageSeq::new(13)));
	}

	#[test]
	fn test_assign_seqs_renumbers_when_space_runs_out() {
		let mut guarded = Guarded::new(None);
		let mut messages = vec![
			UiMessage::say(SayKind::Task, "t"),
			UiMessage::say(SayKind::Text, "a"),
			UiMessage::say(SayKind::Text, "b"),
		];
		messages[0].seq = MessageSeq::new(u64::MAX);
		messages[1].seq = MessageSeq::new(7);

		guarded.assign_seqs(&mut messages);

		let seqs: Vec<u64> = messages.iter().map(|m| m.seq.get()).collect();
		assert_eq!(seqs, vec![1, 2, 3]);
		assert_eq!(guarded.allocate(), Some(MessageSeq::new(4)));
	}

	#[test]
	fn test_allocate_stops_at_end_of_sequence_space() {
		let mut guarded = Guarded::new(None);
		guarded.next_seq = u64::MAX - 1;

		assert_eq!(guarded.allocate(), Some(MessageSeq::new(u64::MAX - 1)));
		assert_eq!(guarded.allocate(), None);
		assert_eq!(guarded.allocate(), None);
	}

	#[tokio::test]
	async fn test_seeded_max_seq_does_not_break_appends() {
		let (ledger, store, _tmp) = create_test_ledger();
		let mut seeded = UiMessage::say(SayKind::Task, "t");
		seeded.seq = MessageSeq::new(u64::MAX);

		let reloaded = StateLedger::builder(ledger.task_id().clone(), store.clone())
			.replace_ui_messages(vec![seeded])
			.build();
		let appended = reloaded
			.append_ui_message(UiMessage::say(SayKind::Text, "a"))
			.await
			.unwrap();

		assert_eq!(reloaded.ui_messages()[0].seq, MessageSeq::new(1));
		assert_eq!(appended, MessageSeq::new(2));
	}

	#[tokio::test]
	async fn test_builder_seeds_logs_without_persisting() {
		let tmp = TempDir::new().unwrap();
		let store = Arc::new(LocalTaskStore::new(tmp.path().to_path_buf()));
		let id = TaskId::new();

		let ledger = StateLedger::builder(id.clone(), store.clone())
			.replace_api_history(vec![ConversationEntry::user("seed")])
			.replace_ui_messages(vec![UiMessage::say(SayKind::Task, "seeded task")])
			.build();

		assert_eq!(ledger.api_history().len(), 1);
		assert_eq!(ledger.ui_messages().len(), 1);
		assert!(!ledger.ui_messages()[0].seq.is_unassigned());
		assert!(store.read_api_history(&id).await.unwrap().is_empty());
		assert!(store.read_ui_messages(&id).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_summary_written_to_local_store() {
		let (ledger, store, _tmp) = create_test_ledger();

		ledger
			.append_ui_message(UiMessage::say(SayKind::Task, "refactor the parser").with_ts(100))
			.await
			.unwrap();
		ledger
			.append_api_entry(ConversationEntry::user("refactor the parser"))
			.await
			.unwrap();
		ledger
			.append_ui_message(
				UiMessage::say(
					SayKind::ApiReqStarted,
					r#"{"tokensIn":12,"tokensOut":3,"cost":0.02}"#,
				)
				.with_ts(200),
			)
			.await
			.unwrap();

		let history = store.read_history().await.unwrap();
		assert_eq!(history.len(), 1);
		let summary = &history[0];
		assert_eq!(&summary.id, ledger.task_id());
		assert_eq!(summary.ulid, "ulid-1");
		assert_eq!(summary.task, "refactor the parser");
		assert_eq!(summary.ts, 200);
		assert_eq!(summary.tokens_in, 12);
		assert_eq!(summary.tokens_out, 3);
		assert_eq!(summary.cwd_on_task_initialization.as_deref(), Some("/work"));
		assert!(summary.size > 0);

		let on_disk = store.read_ui_messages(ledger.task_id()).await.unwrap();
		assert_eq!(on_disk.len(), 2);
		assert_eq!(on_disk[1].conversation_history_index, Some(0));
	}

	#[tokio::test]
	async fn test_reload_from_store_continues_sequence() {
		let (ledger, store, _tmp) = create_test_ledger();
		ledger
			.append_ui_message(UiMessage::say(SayKind::Task, "t"))
			.await
			.unwrap();
		let second = ledger
			.append_ui_message(UiMessage::ask(AskKind::Followup, "q"))
			.await
			.unwrap();

		let reloaded = StateLedger::builder(ledger.task_id().clone(), store.clone())
			.load_from_gateway()
			.await
			.unwrap()
			.build();

		assert_eq!(reloaded.ui_messages().len(), 2);
		assert_eq!(reloaded.position_of(second), Some(1));

		let third = reloaded
			.append_ui_message(UiMessage::say(SayKind::Text, "a"))
			.await
			.unwrap();
		assert!(third > second);
	}

	#[tokio::test]
	async fn test_subscribers_see_each_mutation() {
		let (ledger, _store, _tmp) = create_test_ledger();
		let mut rx = ledger.subscribe_ui_messages();

		ledger
			.append_ui_message(UiMessage::say(SayKind::Task, "t"))
			.await
			.unwrap();

		assert!(rx.has_changed().unwrap());
		assert_eq!(rx.borrow_and_update().len(), 1);
	}
}
