//! Search-backend integration: C4 Index Schema Manager, C8 Retrieval
//! Strategies (query construction), and response mapping. A thin
//! `reqwest`-based JSON client talks to an OpenSearch-compatible HTTP API
//! (§A2 in SPEC_FULL.md) the same way the donor codebase's hand-rolled
//! client talked to its own document store: build request bodies as
//! `serde_json::Value`, log truncated error bodies, retry with backoff.

pub mod client;
pub mod index;
pub mod mapping;
pub mod query;

pub use client::BackendClient;
