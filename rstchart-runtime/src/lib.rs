//! # rstchart-runtime
//!
//! Async session host for rstchart.
//!
//! This crate provides:
//! - One tokio task per session, fed by a bounded or unbounded external queue
//! - Cooperative cancellation through `CancellationToken` trees
//! - A shared timer queue for delayed `<send>`
//! - In-process transport between sessions (`#_parent`, `#_scxml_<id>`, `#_<invokeid>`)
//! - `<invoke type="scxml">` as child sessions
//! - Checkpointing at macro-step boundaries
//! - YAML + environment configuration

pub mod config;
pub mod error;
pub mod invoker;
pub mod loader;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod timer;

pub use config::{CheckpointConfig, Config, ConfigError, InvokeConfig, SessionConfig};
pub use error::RuntimeError;
pub use invoker::ChartInvoker;
pub use loader::{chart_from_content, load_chart, parse_chart, ChartFormat, LoadError};
pub use queue::{QueueError, QueueReceiver, QueueSender, WeakQueueSender};
pub use registry::{ParentLink, Registration, SessionRegistry};
pub use runtime::{Runtime, RuntimeBuilder, SpawnOptions};
pub use session::{SessionHandle, SessionOutcome};
pub use timer::TimerQueue;
