//! Purpose: Library crate behind the `topiclink` CLI and embedding applications.
//! Exports: `api` (stable session surface) and `core` (session building blocks).
//! Role: Topic-based publish/subscribe session core with active-publisher election.
//! Invariants: Applications should depend on `api`; `core` paths may move between releases.
//! Invariants: The only process-wide mutable state is the global logging registry and gauges.
pub mod api;
pub mod core;
