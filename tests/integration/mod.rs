//! Integration Tests Module
//!
//! End-to-end tests for Claude Recall against real database files.
//! Tests cover the memory store, the durable queue shared by several
//! connection pools, the bridge consumer loop, and the full capture →
//! classify → store → search flow.

// Memory store: dedupe, supersession, ranking, scope, retention
mod memory_store_test;

// Durable queue: ordering, retries, orphan recovery, multi-pool claims
mod queue_test;

// Bridge consumer loop and handlers
mod bridge_test;

// Full hook-to-search scenarios through AppState
mod end_to_end_test;
