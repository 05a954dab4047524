// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use loom_common_ledger::{
	ConversationEntry, HistorySummary, PersistenceGateway, StateLedger, TaskId, TaskStoreError,
	UiMessage,
};
use tokio::sync::Notify;

/// What the ledger asked the gateway to do, in call order.
#[derive(Clone, Debug)]
pub enum GatewayEvent {
	ApiHistory { len: usize },
	UiMessages(Vec<UiMessage>),
	Summary(HistorySummary),
}

/// In-memory gateway that records every write and can be told to fail.
#[derive(Default)]
pub struct RecordingGateway {
	events: Mutex<Vec<GatewayEvent>>,
	pub fail_api: AtomicBool,
	pub fail_ui_writes: AtomicBool,
	pub fail_summary: AtomicBool,
	pub fail_measure: AtomicBool,
	hold_ui_writes: AtomicBool,
	ui_write_entered: Notify,
	ui_write_release: Notify,
	pub dir_size: Mutex<u64>,
}

fn injected() -> TaskStoreError {
	TaskStoreError::Io(std::io::Error::other("injected failure"))
}

impl RecordingGateway {
	pub fn new() -> Arc<Self> {
		let gateway = Self::default();
		*gateway.dir_size.lock().unwrap() = 4096;
		Arc::new(gateway)
	}

	pub fn events(&self) -> Vec<GatewayEvent> {
		self.events.lock().unwrap().clone()
	}

	pub fn summaries(&self) -> Vec<HistorySummary> {
		self
			.events()
			.into_iter()
			.filter_map(|e| match e {
				GatewayEvent::Summary(s) => Some(s),
				_ => None,
			})
			.collect()
	}

	pub fn last_summary(&self) -> Option<HistorySummary> {
		self.summaries().pop()
	}

	pub fn ui_writes(&self) -> Vec<Vec<UiMessage>> {
		self
			.events()
			.into_iter()
			.filter_map(|e| match e {
				GatewayEvent::UiMessages(m) => Some(m),
				_ => None,
			})
			.collect()
	}

	pub fn fail(flag: &AtomicBool, on: bool) {
		flag.store(on, Ordering::SeqCst);
	}

	/// Make the next UI write park until [`RecordingGateway::release_ui_write`].
	pub fn hold_ui_writes(&self) {
		self.hold_ui_writes.store(true, Ordering::SeqCst);
	}

	pub async fn wait_for_ui_write(&self) {
		self.ui_write_entered.notified().await;
	}

	pub fn release_ui_write(&self) {
		self.hold_ui_writes.store(false, Ordering::SeqCst);
		self.ui_write_release.notify_one();
	}

	fn record(&self, event: GatewayEvent) {
		self.events.lock().unwrap().push(event);
	}
}

#[async_trait]
impl PersistenceGateway for RecordingGateway {
	async fn write_api_history(
		&self,
		_task_id: &TaskId,
		entries: &[ConversationEntry],
	) -> Result<(), TaskStoreError> {
		if self.fail_api.load(Ordering::SeqCst) {
			return Err(injected());
		}
		self.record(GatewayEvent::ApiHistory { len: entries.len() });
		Ok(())
	}

	async fn write_ui_messages(
		&self,
		_task_id: &TaskId,
		messages: &[UiMessage],
	) -> Result<(), TaskStoreError> {
		if self.hold_ui_writes.load(Ordering::SeqCst) {
			self.ui_write_entered.notify_one();
			self.ui_write_release.notified().await;
		}
		if self.fail_ui_writes.load(Ordering::SeqCst) {
			return Err(injected());
		}
		self.record(GatewayEvent::UiMessages(messages.to_vec()));
		Ok(())
	}

	async fn write_summary(&self, summary: &HistorySummary) -> Result<(), TaskStoreError> {
		if self.fail_summary.load(Ordering::SeqCst) {
			return Err(injected());
		}
		self.record(GatewayEvent::Summary(summary.clone()));
		Ok(())
	}

	async fn measure_task_dir_size(&self, _task_id: &TaskId) -> Result<u64, TaskStoreError> {
		if self.fail_measure.load(Ordering::SeqCst) {
			return Err(injected());
		}
		Ok(*self.dir_size.lock().unwrap())
	}

	async fn read_api_history(
		&self,
		_task_id: &TaskId,
	) -> Result<Vec<ConversationEntry>, TaskStoreError> {
		Ok(Vec::new())
	}

	async fn read_ui_messages(&self, _task_id: &TaskId) -> Result<Vec<UiMessage>, TaskStoreError> {
		Ok(Vec::new())
	}

	async fn read_history(&self) -> Result<Vec<HistorySummary>, TaskStoreError> {
		Ok(self.summaries())
	}
}

pub fn create_test_ledger() -> (StateLedger, Arc<RecordingGateway>) {
	let gateway = RecordingGateway::new();
	let ledger = StateLedger::builder(TaskId::new(), gateway.clone())
		.with_ulid("test-ulid")
		.with_cwd("/workspace")
		.build();
	(ledger, gateway)
}
