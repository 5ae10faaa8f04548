//! Experiment Schema
//!
//! Data structures for the peer-review consensus engine. Every entity
//! belongs to exactly one experiment.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< AgentRecord (N)
//!        │                     │
//!        │                     ├──< PublicationRecord (N) ──< ReviewRecord (N)
//!        │                     │            └──< citation edge >──┘ (publication → publication)
//!        │                     └──< SolutionRecord (N) [append-only]
//!        ├──< LedgerEntry (N) [append-only]
//!        └──< ResolutionRecord (N) [append-only]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use consensus_lab::experiment::{ExperimentRecord, NewPublication, Grade, ReviewTally};
//!
//! let experiment = ExperimentRecord::new("exp-001", "CVE-2024-0001");
//! assert_eq!(experiment.id(), 0); // assigned by the store
//!
//! let submission = NewPublication::new("Heap overflow in parser", "", "Details...");
//! assert!(submission.validate().is_ok());
//!
//! let tally = ReviewTally::from_grades([Grade::Accept, Grade::StrongAccept]);
//! assert_eq!(tally.accepts(), 2);
//! ```

mod agent_record;
mod experiment_record;
mod ledger_record;
mod publication_record;
mod review_record;
mod solution_record;

pub use agent_record::{AgentConfig, AgentRecord, NewAgent, ThinkingLevel, ToolCapability};
pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder};
pub use ledger_record::{Cost, LedgerEntry, TokenUsage, UsageSource};
pub use publication_record::{NewPublication, PublicationRecord, PublicationStatus};
pub use review_record::{Grade, ReviewRecord, ReviewTally};
pub use solution_record::{ResolutionRecord, SolutionReason, SolutionRecord};
