//! # consensus-lab: Peer-Review Consensus Engine for Research Agents
//!
//! **Version**: 0.1.0
//!
//! consensus-lab runs many autonomous agents against one research problem
//! and lets them converge through a simulated academic process: agents
//! submit publications, review each other's work, cite prior results and
//! nominate the publication they believe is the current best solution.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke safety**: every invariant (one review per reviewer, no self
//!   review, one-way status transitions) is enforced by the store schema,
//!   not only in application code
//! - **Jidoka**: a single conditional update decides each publication's
//!   fate; the loser of a race stops with `InvalidState`
//! - **Genchi Genbutsu**: spend is derived from the append-only ledger,
//!   never from in-memory counters
//! - **Muda elimination**: citation scanning is a pure function, applied to
//!   the graph in the same transaction as the submission
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`ledger`] | Budget ledger: usage accounting, spend cap |
//! | [`citation`] | Citation extractor and graph reads |
//! | [`lifecycle`] | Publication state machine, reviews, advisory fast path |
//! | [`solution`] | Solution nominations, support tally, resolutions |
//! | [`runner`] | Concurrent per-agent scheduler |
//! | [`operator`] | Entrypoint: run an experiment with run parameters |
//!
//! ## Example Usage
//!
//! ```rust
//! use consensus_lab::experiment::{AgentConfig, ExperimentRecord, NewAgent, NewPublication};
//! use consensus_lab::lifecycle::PublicationLifecycle;
//! use consensus_lab::store::Store;
//!
//! # async fn example() -> consensus_lab::Result<()> {
//! let store = Store::open_in_memory()?;
//! let experiment = store
//!     .create_experiment(ExperimentRecord::new("exp-001", "CVE-2024-0001"))
//!     .await?;
//! let author = store
//!     .create_agent(experiment.id(), NewAgent::new("a1", AgentConfig::new("anthropic", "claude")))
//!     .await?;
//!
//! let lifecycle = PublicationLifecycle::for_experiment(store.clone(), &experiment)?;
//! lifecycle.advisory().register("a1").await?;
//!
//! let submission = lifecycle
//!     .submit(author.id(), NewPublication::new("Heap overflow", "", "Details..."))
//!     .await?;
//! let published = lifecycle.publish(submission.publication.reference()).await?;
//! assert!(published.status().is_terminal());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod citation;
pub mod config;
pub mod error;
pub mod experiment;
pub mod ledger;
pub mod lifecycle;
pub mod operator;
pub mod runner;
pub mod solution;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
