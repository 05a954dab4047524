// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

/// Source of the shadow working-tree identifier recorded in task summaries.
#[async_trait]
pub trait CheckpointCollaborator: Send + Sync {
	/// `None` when the tracker has no working tree (not initialized, disabled,
	/// or failed). Absence is never an error for the ledger.
	async fn working_tree_id(&self) -> Option<String>;
}

/// Collaborator with a fixed working tree, for trackers resolved up front.
#[derive(Clone, Debug)]
pub struct FixedWorkTree(pub String);

#[async_trait]
impl CheckpointCollaborator for FixedWorkTree {
	async fn working_tree_id(&self) -> Option<String> {
		Some(self.0.clone())
	}
}
