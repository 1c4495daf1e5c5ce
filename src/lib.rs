//! flowd - workflow-graph automation engine.
//!
//! flowd executes user-authored workflow graphs: directed graphs of
//! heterogeneous nodes (triggers, transforms, HTTP connectors, AI
//! composites) wired by typed channels. Workflows are stored as JSON,
//! parameterized per tenant with `{{UPPER_CASE}}` placeholders, and driven
//! either on demand or by per-(user, automation) polling loops that
//! survive process restarts.
//!
//! ## Anatomy of an invocation
//!
//! ```text
//! template --(prepare: params + developer keys)--> prepared workflow
//!          --(normalize + inject tokens)---------> injected workflow
//!          --(engine: pass-loop traversal)-------> RunReport
//! ```
//!
//! A scheduled tick additionally refreshes OAuth credentials up front and
//! persists the polling cursor and dedup set afterwards.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowd::engine::{Engine, ExecutionContext};
//! use flowd::nodes::NodeRegistry;
//! use flowd::workflow::parse_workflow;
//!
//! # async fn run() -> flowd::Result<()> {
//! let workflow = parse_workflow(r#"{
//!     "name": "hello",
//!     "nodes": [
//!         {"id": "1", "name": "Start", "type": "manualTrigger"},
//!         {"id": "2", "name": "Tag", "type": "set",
//!          "parameters": {"fields": {"greeting": "hi"}}}
//!     ],
//!     "connections": {"Start": {"main": [[{"node": "Tag", "index": 0}]]}}
//! }"#)?;
//!
//! let engine = Engine::new(Arc::new(NodeRegistry::new()));
//! let mut ctx = ExecutionContext::new(Arc::new(workflow))
//!     .with_initial_data(serde_json::json!({"x": 1}));
//! let report = engine.run(&mut ctx).await;
//! assert!(report.success);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod expression;
pub mod nodes;
pub mod polling;
pub mod storage;
pub mod template;
pub mod tokens;
pub mod workflow;

pub use config::Config;
pub use engine::{Engine, ExecutionContext, RunReport};
pub use error::{Error, Result};
pub use nodes::NodeRegistry;
pub use polling::PollSupervisor;
pub use storage::SqliteStore;
