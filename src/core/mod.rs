// src/core/mod.rs

// The scanning engine. `main.rs` and `app.rs` only wire these pieces together.

/// Verdicts, check fields, partial updates and the persisted host record.
pub mod models;

/// SQLite-backed result store with versioned migrations.
pub mod store;

/// Semicolon-separated dump of the store.
pub mod export;

/// Host list and installer-remnant list parsing.
pub mod hosts;

/// Per-run state shared by the orchestrator and the grading scheduler.
pub mod context;

/// Free-text per-host report files.
pub mod report;

/// The individual checks and the DNS gate.
pub mod scanner;

/// External TLS grading: client, clock and scheduler.
pub mod grading;

/// The per-host scan state machine.
pub mod orchestrator;
