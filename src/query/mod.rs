#![forbid(unsafe_code)]

//! Query planning and execution engine (Stage 8).
//!
//! This module provides the core infrastructure for query planning and execution,
//! including AST representation, logical planning, physical execution, and profiling.

/// Abstract syntax tree (AST) for graph queries.
///
/// Defines the high-level query structure with match clauses, edges, and predicates.
pub mod ast;

/// Query builder for programmatic query construction.
///
/// Provides a fluent API for building complex queries without writing raw AST.
pub mod builder;

/// Two-tier exact+fingerprint query result cache.
pub mod cache;

/// Query execution engine.
///
/// Executes physical plans and streams result rows back to clients.
pub mod executor;

/// Logical query plan representation.
///
/// Intermediate representation for query optimization and analysis.
pub mod logical;

/// Classifies a planned query into one of five observability mode tags.
pub mod observability;

/// Planner and executor for predicate queries over the entity model
/// (document/relational/vector rows), as opposed to the label/property
/// graph-match plan the rest of this module builds.
pub mod entity;

/// Query metadata and catalog information.
///
/// Manages schema information and metadata required for planning and execution.
pub mod metadata;

/// Physical query plan representation.
///
/// Executable plan containing specific operators and their configurations.
pub mod physical;

/// Query plan generation and optimization.
///
/// Converts AST to optimized physical plans for execution.
pub mod planner;

/// Performance profiling for query operations.
///
/// Collects timing and count statistics to identify performance bottlenecks.
pub mod profile;

/// Canonical scalar value representation shared across bindings, FFI,
/// and planner/executor layers.
pub mod value;

pub use builder::QueryBuilder;

/// Entity-model query planning and execution.
pub use entity::{
    hybrid_vector_geo_search, union_pages, DrivingLeg, EntityCursor, EntityExecutor, EntityPage,
    EntityPlanExplain, EntityPlanner, EntityPredicate, EntityQuery,
};

/// Execution plan output with explanation capabilities.
pub use planner::{PlanExplain, PlannerOutput};

/// The five query execution observability tags.
pub use observability::PlanMode;

pub use value::Value;
