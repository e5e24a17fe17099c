//! Dataport Export Manager - background delivery of exports to destinations.
//!
//! An export request is accepted synchronously and delivered in the
//! background. The caller gets an export id straight away and polls the
//! export log for the terminal result.
//!
//! # Architecture
//!
//! ```text
//! POST /api/exports
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       ExportOrchestrator                 │
//! │  - Check ownership / soft delete         │
//! │  - Create InProgress export log          │
//! │  - Spawn task on the TaskSupervisor      │
//! └─────────────────────────────────────────┘
//!          ↓ (background)
//! ┌─────────────────────────────────────────┐
//! │  DatasetSource → render (CSV/JSON)       │
//! │  AdapterRegistry → ExportAdapter         │
//! │  one terminal write to the export log    │
//! └─────────────────────────────────────────┘
//!          ↓
//!   Drive / OneDrive / custom API / object transport
//! ```
//!
//! # Core Types
//!
//! - [`ExportAdapter`] - Trait every storage backend implements
//! - [`AdapterRegistry`] - Storage type → adapter, plus OAuth token lookup
//! - [`ExportOrchestrator`] - Request/poll/shutdown entry point
//! - [`TaskSupervisor`] - Owns the background tasks and drains them on shutdown

mod adapter;
pub mod adapters;
pub mod api;
pub mod orchestrator;
pub mod registry;
pub mod render;
pub mod supervisor;

pub use adapter::{ExportAdapter, ExportJob, ExportOutcome, Payload};
pub use orchestrator::{ExportOrchestrator, ExportRequested};
pub use registry::AdapterRegistry;
pub use supervisor::{ShutdownReport, TaskSupervisor};
