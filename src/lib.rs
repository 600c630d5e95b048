//! Purpose: Library crate behind the `evedata` CLI: schema-driven access to Eve-style REST APIs.
//! Exports: `api` (controllers, items, transports), `core` (schemas, queries, errors), `notice`.
//! Role: Public SDK surface lives in `api`; `core` holds pure, network-free logic.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod notice;
