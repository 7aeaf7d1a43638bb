//! # Sombra - Embedded Multi-Model Database Engine
//!
//! Sombra stores documents, relational rows, typed graph edges, vector
//! embeddings, and time-series readings on top of a single ordered
//! key/value substrate, with snapshot-isolated MVCC transactions and a
//! change feed that streams every committed mutation in commit order.
//!
//! ## Quick Start
//!
//! ```rust
//! use sombra::{Engine, EngineOptions};
//!
//! let engine = Engine::open("my_data.db", EngineOptions::default())?;
//! let mut tx = engine.begin()?;
//! let mut alice = sombra::entity::Entity::new();
//! alice.set("name", sombra::entity::Value::String("Alice".into()));
//! tx.put(&sombra::key_schema::entity_key("users", "alice"), alice.encode())?;
//! tx.commit()?;
//! # Ok::<(), sombra::SombraError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Primitives**: page store, WAL, order-preserving byte codecs, single-writer locking
//! - **Storage**: generic B+Tree, MVCC version headers, catalog/dictionary, secondary+graph+vector+time-series indexes
//! - **Query**: AST, logical/physical planner, executor, semantic cache
//! - **Admin**: checkpoint, vacuum, integrity verification, stats
//!
//! The legacy single-graph `db`/`model`/`pager` modules remain for the CLI
//! and benches that still target the original page-slotted graph layout;
//! new code should build on `engine`, `entity`, `key_schema`, and `storage`.

pub mod admin;
pub mod crypto_audit;
pub mod db;
pub mod engine;
pub mod entity;
pub mod error;
pub mod index;
pub mod key_schema;
pub mod logging;
pub mod model;
pub mod pager;
pub mod primitives;
pub mod query;
pub mod storage;
pub mod types;

#[cfg(feature = "benchmarks")]
pub mod benchmark_suite;
#[cfg(feature = "napi")]
pub mod bindings;
#[cfg(feature = "benchmarks")]
pub mod data_generator;
#[cfg(feature = "benchmarks")]
pub mod performance_utils;
#[cfg(feature = "python")]
pub mod python;
#[cfg(feature = "benchmarks")]
pub mod sqlite_adapter;

// Re-export the legacy single-graph API for existing consumers.
pub use crate::db::{
    Config, GraphDB, IntegrityOptions, IntegrityReport, SyncMode, Transaction, TxId, TxState,
};
pub use crate::error::GraphError;
pub use crate::model::{Edge, EdgeId as LegacyEdgeId, Node, NodeId as LegacyNodeId, PropertyValue};

// Re-export the multi-model engine's public surface.
pub use crate::engine::{Engine, EngineOptions, EngineTransaction};
pub use crate::types::{Result, SombraError};
