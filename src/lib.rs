//! taskdesk - shared task tracking library
//!
//! This library provides the core of the taskdesk CLI: a multi-tenant task
//! manager where every identity sees a role-scoped view of the tasks, follows
//! it live, and reads analytics computed over it.
//!
//! # Core Concepts
//!
//! - **Access filter**: maps an identity and a view mode to a query scope
//! - **Live feeds**: store subscriptions delivering normalized snapshots
//! - **Aggregation**: pure analytics over task and user snapshots
//! - **Mutation gateway**: validated, authorized create/update/delete
//! - **User directory**: uid to profile lookup for display and assignment
//!
//! # Module Organization
//!
//! - `access`: view modes, query scopes and per-task authorization
//! - `account`: sign-up, sign-in and the persisted session
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.taskdesk.toml`
//! - `dashboard`: live stats recomputed from feeds
//! - `directory`: user directory
//! - `error`: Error types and result aliases
//! - `events`: JSONL event output for integrations
//! - `feed`: store adapter, document normalization and live feeds
//! - `filter`: client-side search and status filters
//! - `gateway`: task mutation gateway
//! - `lock`: File locking and atomic writes
//! - `model`: tasks, users, roles and identities
//! - `output`: human and JSON output envelopes
//! - `stats`: task/user aggregation
//! - `storage`: on-disk layout
//! - `store`: document store with query subscriptions

pub mod access;
pub mod account;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod directory;
pub mod error;
pub mod events;
pub mod feed;
pub mod filter;
pub mod gateway;
pub mod lock;
pub mod model;
pub mod output;
pub mod stats;
pub mod storage;
pub mod store;

pub use error::{Error, Result};
