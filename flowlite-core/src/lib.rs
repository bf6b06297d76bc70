//! flowlite: a token-based BPMN-style process orchestration core.
//!
//! # Architecture
//!
//! ```text
//!  YAML ──► authoring ──► ProcessDefinition ──► DefinitionStore
//!                                                     │
//!                                                     ▼
//!  API call ──► Engine ──► catalog ──► Mutex<InstanceState>
//!                                        │  tree           (tokens, forks, joins)
//!                                        │  scopes         (variables per execution)
//!                                        │  subscriptions  (signal / message / guard)
//!                                        ▼
//!                                   TaskEvents ──► TaskInbox
//! ```
//!
//! Each call runs against one instance under its own lock, on a clone that is
//! committed only if the call succeeds. Global signals thrown inside an
//! instance are delivered to other instances after the commit.

pub mod authoring;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod inbox;
pub mod instance;
pub mod model;
pub mod scope;
pub mod store;
pub mod subscriptions;
pub mod tree;
pub mod types;

pub use config::EngineConfig;
pub use engine::{Engine, ExecutionInfo, ExecutionQuery};
pub use error::{EngineError, Result};
pub use events::RuntimeEvent;
pub use inbox::{MemoryTaskInbox, TaskEvent, TaskInbox, TaskQuery};
pub use model::{CompareOp, Guard, ProcessDefinition, SignalScope};
pub use store::{DefinitionStore, MemoryDefinitionStore};
pub use types::*;
