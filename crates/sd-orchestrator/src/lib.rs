//! sd-orchestrator: Gated two-node rollout for sentinel-deploy
//!
//! The sentinel node receives a release first and must pass the health and
//! regression gates before production is touched. Every component here is a
//! stateless operation parameterized by a [`Node`]; only the
//! [`Pipeline`] carries run state and decides transitions.

pub mod drift;
pub mod health;
pub mod history;
pub mod node;
pub mod pipeline;
pub mod preflight;
pub mod regression;
pub mod reload;
pub mod rollback;
pub mod state;
pub mod swap;
pub mod sync;

pub use history::{EntryStatus, History, HistoryEntry};
pub use node::{Connector, Node, SshConnector};
pub use pipeline::{DeployOptions, NodeStatus, Pipeline, StatusReport};
pub use preflight::{FixedCandidate, GitPreflight, Preflight, PythonCompileChecker, SyntaxChecker};
pub use state::{DeploymentRun, NodeResult};
