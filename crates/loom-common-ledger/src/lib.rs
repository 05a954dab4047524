// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod metrics;
pub mod model;

pub use checkpoint::{CheckpointCollaborator, FixedWorkTree};
pub use config::{ConfigError, LedgerConfig, LogFormat, LogLevel, LoggingConfig};
pub use error::*;
pub use gateway::{LocalTaskStore, PersistenceGateway};
pub use ledger::{LedgerBuilder, StateLedger};
pub use metrics::{ApiMetrics, CombinedApiMetrics, MetricsDeriver};
pub use model::*;
