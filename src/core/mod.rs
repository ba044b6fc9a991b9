// src/core/mod.rs

// The analysis engine: everything between a raw target string and the final
// report. The transport in `server.rs` only ever talks to it through `app`.

/// Data structures shared by the probes, the scoring engine and the API.
pub mod models;

/// Normalization of user input into a probe target.
pub mod target;

/// The six layer probes and the orchestrator that runs them concurrently.
pub mod scanner;

/// Rule-based risk scoring over the merged layer results.
pub mod scoring;

/// Static explanations attached to the raw results.
pub mod knowledge_base;

/// The five-step request narrative.
pub mod journey;
