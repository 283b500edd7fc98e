//! benchd - single-GPU inference server arbiter and benchmark job runner
//!
//! One GPU host runs at most one inference-serving framework at a time.
//! benchd owns that slot: it launches and supervises the server process,
//! runs benchmark jobs against it, keeps its status honest when the process
//! dies or someone else starts a server, and streams logs and GPU metrics
//! to any number of HTTP clients.
//!
//! # Architecture
//!
//! - **launcher**: spawning framework processes and probing their health
//! - **bench**: executing one benchmark trial with the client program
//! - **gpu**: sampling GPU utilization and memory
//! - **stream**: fan-out channel behind every log and metrics feed
//! - **engine**: supervisor, job orchestrator, reconciler, metrics sampler
//! - **server**: HTTP/SSE control surface
//!
//! # Example
//!
//! ```bash
//! # Start the daemon
//! benchd serve --config benchd.yaml --port 8080
//!
//! # Inspect configured frameworks
//! benchd frameworks --probe
//! ```

pub mod bench;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod launcher;
pub mod server;
pub mod stream;

// Re-export key types
pub use config::{BenchdConfig, FrameworkConfig, ServerConfig};
pub use engine::{Engine, JobOrchestrator, ProcessSupervisor};
pub use error::{Error, Result};
pub use stream::{Frame, StreamHub, Subscription};
