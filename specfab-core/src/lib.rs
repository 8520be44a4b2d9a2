//! specfab-core library interface
//!
//! Evidence-gated product spec pipeline: rule tables, normalization, evidence
//! audit, consensus, cross-field validation and the round orchestrator that
//! drives them.

pub mod config;
pub mod consensus;
pub mod cross_validation;
pub mod error;
pub mod evidence;
pub mod normalize;
pub mod orchestrator;
pub mod record;
pub mod replay;
pub mod rules;
pub mod similarity;
pub mod types;

pub use crate::config::{OrchestratorSettings, RetryPolicy};
pub use crate::error::{CoreError, CoreResult};
pub use crate::orchestrator::{RoundOrchestrator, RunPool, RunRequest, RunState};
pub use crate::record::{FieldOutcome, ProductRecord};
pub use crate::rules::FieldRuleTable;
