//! Planner and executor for predicate queries over the entity model.
//!
//! Complements the label/property graph-match plan in [`crate::query::planner`]/
//! [`crate::query::executor`] with the counterpart for the `(table, col, pk)`
//! index families in [`crate::storage::index::secondary`]: each indexed
//! predicate contributes a candidate primary-key set, conjunctions
//! intersect those sets and disjunctions union them, and a page is
//! bounded by a cursor token carrying just the primary key and
//! collection name, so resuming a scan never depends on row numbers
//! that shift as rows are inserted or deleted between requests.

use crate::engine::EngineTransaction;
use crate::entity::{Entity, Value};
use crate::key_schema;
use crate::query::observability::PlanMode;
use crate::storage::index::secondary::{IndexFamily, SecondaryIndexCatalog, SecondaryIndexManager};
use crate::storage::vector::VectorIndex;
use crate::types::{Result, SombraError};
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

const DEFAULT_EQ_SELECTIVITY: f64 = 0.05;
const DEFAULT_RANGE_SELECTIVITY: f64 = 0.3;
const DEFAULT_GEO_SELECTIVITY: f64 = 0.1;
const CANDIDATE_CAP: usize = 10_000;

/// One column predicate against an entity field. Every predicate on an
/// [`EntityQuery`] is ANDed together; use [`union_pages`] to OR several
/// single-predicate queries.
#[derive(Clone, Debug)]
pub enum EntityPredicate {
    Eq {
        col: String,
        value: Value,
    },
    Range {
        col: String,
        lo: Option<Value>,
        hi: Option<Value>,
    },
    GeoBox {
        col: String,
        min_lat: f64,
        min_lon: f64,
        max_lat: f64,
        max_lon: f64,
        resolution_deg: f64,
    },
}

impl EntityPredicate {
    fn col(&self) -> &str {
        match self {
            EntityPredicate::Eq { col, .. }
            | EntityPredicate::Range { col, .. }
            | EntityPredicate::GeoBox { col, .. } => col,
        }
    }

    /// Evaluated against a loaded row when this predicate could not be
    /// resolved through an index and fell back to a residual in-memory
    /// filter.
    fn matches(&self, entity: &Entity) -> bool {
        match self {
            EntityPredicate::Eq { col, value } => entity.get(col) == Some(value),
            EntityPredicate::Range { col, lo, hi } => {
                let Some(actual) = entity.get(col) else { return false };
                lo.as_ref().map(|b| cmp_values(actual, b) != Some(Ordering::Less)).unwrap_or(true)
                    && hi.as_ref().map(|b| cmp_values(actual, b) != Some(Ordering::Greater)).unwrap_or(true)
            }
            EntityPredicate::GeoBox { col, min_lat, min_lon, max_lat, max_lon, .. } => {
                let Some(actual) = entity.get(col) else { return false };
                let Some((lat, lon)) = as_lat_lon(actual) else { return false };
                lat >= *min_lat && lat <= *max_lat && lon >= *min_lon && lon <= *max_lon
            }
        }
    }
}

fn as_lat_lon(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::FloatVector(v) if v.len() >= 2 => Some((v[0] as f64, v[1] as f64)),
        _ => None,
    }
}

/// Orders two field values the way the range index already orders them
/// on disk: numerics compare numerically, strings lexicographically,
/// everything else (bytes, vectors, mixed types) is incomparable.
fn cmp_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

/// A query against one table: every predicate ANDed, an optional
/// ascending ORDER BY column (ties broken by primary key), and a page
/// bound by `limit`/`cursor`.
#[derive(Clone, Debug, Default)]
pub struct EntityQuery {
    pub table: String,
    pub predicates: Vec<EntityPredicate>,
    pub order_by: Option<String>,
    pub limit: usize,
    pub cursor: Option<EntityCursor>,
}

impl EntityQuery {
    pub fn new(table: impl Into<String>, limit: usize) -> Self {
        Self { table: table.into(), predicates: Vec::new(), order_by: None, limit, cursor: None }
    }

    pub fn filter(mut self, predicate: EntityPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order_by(mut self, col: impl Into<String>) -> Self {
        self.order_by = Some(col.into());
        self
    }

    pub fn after(mut self, cursor: EntityCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// Resumption point for a page: the primary key the previous page
/// ended on, plus its collection. Opaque to callers — [`EntityCursor::encode`]
/// is the only supported wire form.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityCursor {
    pub pk: String,
    pub collection: String,
}

#[derive(Serialize, Deserialize)]
struct CursorPayload {
    pk: String,
    collection: String,
    version: u32,
}

const CURSOR_VERSION: u32 = 1;

impl EntityCursor {
    pub fn new(pk: impl Into<String>, collection: impl Into<String>) -> Self {
        Self { pk: pk.into(), collection: collection.into() }
    }

    /// Opaque base64 token a caller can hand back verbatim to resume a
    /// scan. Carries only identity, not a sort key, so no ordering
    /// assumption leaks into the wire form.
    pub fn encode(&self) -> String {
        let payload = CursorPayload { pk: self.pk.clone(), collection: self.collection.clone(), version: CURSOR_VERSION };
        let json = serde_json::to_vec(&payload).expect("cursor payload is always representable as JSON");
        BASE64_ENGINE.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = BASE64_ENGINE
            .decode(token)
            .map_err(|_| SombraError::Invalid("malformed cursor token"))?;
        let payload: CursorPayload =
            serde_json::from_slice(&bytes).map_err(|_| SombraError::Invalid("malformed cursor token"))?;
        if payload.version != CURSOR_VERSION {
            return Err(SombraError::Invalid("unsupported cursor version"));
        }
        Ok(Self { pk: payload.pk, collection: payload.collection })
    }
}

/// One indexed leg the planner chose to drive (or help narrow) the
/// scan, paired with the estimated fraction of rows it lets through.
#[derive(Clone, Debug)]
pub struct DrivingLeg {
    pub col: String,
    pub family: IndexFamily,
    pub estimated_selectivity: f64,
}

/// Explanation of how [`EntityPlanner`] intends to answer a query,
/// mirroring the five tags [`crate::query::observability::PlanMode`]
/// already classifies the graph-match planner's output into.
#[derive(Clone, Debug)]
pub struct EntityPlanExplain {
    pub mode: PlanMode,
    pub driving: Vec<DrivingLeg>,
    pub residual: Vec<String>,
}

/// Chooses which predicates resolve through an index and which fall
/// back to an in-memory residual filter, purely from the index catalog
/// — no data access, matching how the graph-match planner estimates
/// selectivity from catalog-carried statistics rather than sampling.
pub struct EntityPlanner<'c> {
    catalog: &'c SecondaryIndexCatalog,
}

impl<'c> EntityPlanner<'c> {
    pub fn new(catalog: &'c SecondaryIndexCatalog) -> Self {
        Self { catalog }
    }

    pub fn explain(&self, query: &EntityQuery) -> EntityPlanExplain {
        let mut driving = Vec::new();
        let mut residual = Vec::new();
        for pred in &query.predicates {
            let family = self.catalog.family(&query.table, pred.col());
            let leg = match (pred, family) {
                (EntityPredicate::Eq { col, .. }, Some(family @ (IndexFamily::Equality | IndexFamily::Sparse))) => {
                    Some(DrivingLeg { col: col.clone(), family, estimated_selectivity: DEFAULT_EQ_SELECTIVITY })
                }
                (EntityPredicate::Range { col, .. }, Some(family @ IndexFamily::Range)) => {
                    Some(DrivingLeg { col: col.clone(), family, estimated_selectivity: DEFAULT_RANGE_SELECTIVITY })
                }
                (EntityPredicate::GeoBox { col, .. }, Some(family @ IndexFamily::Geo { .. })) => {
                    Some(DrivingLeg { col: col.clone(), family, estimated_selectivity: DEFAULT_GEO_SELECTIVITY })
                }
                _ => None,
            };
            match leg {
                Some(leg) => driving.push(leg),
                None => residual.push(pred.col().to_string()),
            }
        }
        driving.sort_by(|a, b| {
            a.estimated_selectivity
                .partial_cmp(&b.estimated_selectivity)
                .unwrap_or(Ordering::Equal)
        });
        let mode = if driving.is_empty() {
            PlanMode::FullScan
        } else if driving.len() > 1 {
            PlanMode::IndexParallel
        } else if matches!(driving[0].family, IndexFamily::Range) {
            PlanMode::RangeAware
        } else {
            PlanMode::IndexOptimized
        };
        EntityPlanExplain { mode, driving, residual }
    }
}

/// One page of entity rows plus a resumable cursor.
#[derive(Clone, Debug)]
pub struct EntityPage {
    pub rows: Vec<(String, Entity)>,
    pub next_cursor: Option<EntityCursor>,
    pub has_more: bool,
}

/// Executes [`EntityQuery`]s by running each indexed leg the planner
/// chose, intersecting their candidate primary-key sets, loading the
/// survivors, applying any residual predicates in memory, sorting, and
/// slicing out the requested page.
pub struct EntityExecutor<'c> {
    catalog: &'c SecondaryIndexCatalog,
}

impl<'c> EntityExecutor<'c> {
    pub fn new(catalog: &'c SecondaryIndexCatalog) -> Self {
        Self { catalog }
    }

    pub fn execute(&self, query: &EntityQuery, txn: &EngineTransaction<'_>) -> Result<EntityPage> {
        let manager = SecondaryIndexManager::new(self.catalog);
        let planner = EntityPlanner::new(self.catalog);
        let plan = planner.explain(query);
        tracing::debug!(plan_mode = plan.mode.as_str(), table = %query.table, "entity query planned");

        let mut candidates: Option<HashSet<String>> = None;
        for leg in &plan.driving {
            let pred = query
                .predicates
                .iter()
                .find(|p| p.col() == leg.col)
                .expect("planned leg corresponds to one of the query's predicates");
            let pks = self.scan_leg(&query.table, pred, &manager, txn)?;
            let set: HashSet<String> = pks.into_iter().collect();
            candidates = Some(match candidates {
                None => set,
                Some(existing) => existing.intersection(&set).cloned().collect(),
            });
        }

        let pk_list = match candidates {
            Some(set) => set.into_iter().collect::<Vec<_>>(),
            None => self.full_scan(&query.table, txn)?,
        };

        let mut rows = Vec::with_capacity(pk_list.len());
        for pk in pk_list {
            let key = key_schema::entity_key(&query.table, &pk);
            let Some(bytes) = txn.get(&key)? else { continue };
            let entity = Entity::decode(&bytes)?;
            let passes_residual = plan.residual.iter().all(|col| {
                let pred = query.predicates.iter().find(|p| p.col() == col).expect("residual column has a predicate");
                pred.matches(&entity)
            });
            if passes_residual {
                rows.push((pk, entity));
            }
        }

        rows.sort_by(|(pk_a, a), (pk_b, b)| {
            let order = query.order_by.as_ref().and_then(|col| {
                let va = a.get(col);
                let vb = b.get(col);
                match (va, vb) {
                    (Some(va), Some(vb)) => cmp_values(va, vb),
                    (None, Some(_)) => Some(Ordering::Greater),
                    (Some(_), None) => Some(Ordering::Less),
                    (None, None) => None,
                }
            });
            order.unwrap_or(Ordering::Equal).then_with(|| pk_a.cmp(pk_b))
        });

        let start = match &query.cursor {
            None => 0,
            Some(cursor) => match rows.iter().position(|(pk, _)| pk == &cursor.pk) {
                Some(idx) => idx + 1,
                None => rows.len(),
            },
        };
        let remaining = &rows[start.min(rows.len())..];
        let limit = query.limit.max(1);
        let has_more = remaining.len() > limit;
        let page: Vec<(String, Entity)> = remaining.iter().take(limit).cloned().collect();
        let next_cursor = page.last().map(|(pk, _)| EntityCursor::new(pk.clone(), query.table.clone()));

        Ok(EntityPage { rows: page, next_cursor, has_more })
    }

    fn scan_leg(
        &self,
        table: &str,
        pred: &EntityPredicate,
        manager: &SecondaryIndexManager<'_>,
        txn: &EngineTransaction<'_>,
    ) -> Result<Vec<String>> {
        match pred {
            EntityPredicate::Eq { col, value } => manager.scan_equal(table, col, value, txn, CANDIDATE_CAP),
            EntityPredicate::Range { col, lo, hi } => {
                manager.scan_range(table, col, lo.as_ref(), hi.as_ref(), txn, CANDIDATE_CAP)
            }
            EntityPredicate::GeoBox { col, min_lat, min_lon, max_lat, max_lon, resolution_deg } => {
                manager.geo_in_box(table, col, *min_lat, *min_lon, *max_lat, *max_lon, *resolution_deg, txn, CANDIDATE_CAP)
            }
        }
    }

    fn full_scan(&self, table: &str, txn: &EngineTransaction<'_>) -> Result<Vec<String>> {
        let prefix = key_schema::entity_table_prefix(table);
        let entries = txn.scan_prefix(&prefix)?;
        Ok(entries
            .into_iter()
            .map(|(key, _)| String::from_utf8_lossy(&key[prefix.len()..]).into_owned())
            .collect())
    }
}

/// Disjunction ("OR") of several single-predicate queries against the
/// same table: executes each independently (so each still benefits
/// from its own index) and unions the resulting primary keys before
/// loading and paginating — the counterpart to [`EntityExecutor::execute`]'s
/// intersection for conjunctions.
pub fn union_pages(
    catalog: &SecondaryIndexCatalog,
    table: &str,
    predicates: &[EntityPredicate],
    order_by: Option<&str>,
    limit: usize,
    cursor: Option<EntityCursor>,
    txn: &EngineTransaction<'_>,
) -> Result<EntityPage> {
    let manager = SecondaryIndexManager::new(catalog);
    let executor = EntityExecutor::new(catalog);
    let mut union: HashSet<String> = HashSet::new();
    for pred in predicates {
        let pks = executor.scan_leg(table, pred, &manager, txn)?;
        union.extend(pks);
    }

    let mut rows = Vec::with_capacity(union.len());
    for pk in union {
        let key = key_schema::entity_key(table, &pk);
        if let Some(bytes) = txn.get(&key)? {
            rows.push((pk, Entity::decode(&bytes)?));
        }
    }

    rows.sort_by(|(pk_a, a), (pk_b, b)| {
        let order = order_by.and_then(|col| match (a.get(col), b.get(col)) {
            (Some(va), Some(vb)) => cmp_values(va, vb),
            (None, Some(_)) => Some(Ordering::Greater),
            (Some(_), None) => Some(Ordering::Less),
            (None, None) => None,
        });
        order.unwrap_or(Ordering::Equal).then_with(|| pk_a.cmp(pk_b))
    });

    let start = match &cursor {
        None => 0,
        Some(cursor) => match rows.iter().position(|(pk, _)| pk == &cursor.pk) {
            Some(idx) => idx + 1,
            None => rows.len(),
        },
    };
    let remaining = &rows[start.min(rows.len())..];
    let limit = limit.max(1);
    let has_more = remaining.len() > limit;
    let page: Vec<(String, Entity)> = remaining.iter().take(limit).cloned().collect();
    let next_cursor = page.last().map(|(pk, _)| EntityCursor::new(pk.clone(), table.to_string()));

    Ok(EntityPage { rows: page, next_cursor, has_more })
}

/// Hybrid vector+geo search: narrows by the geo predicate first (cheap,
/// grid-indexed), then brute-force reranks only that small candidate
/// set against the query vector using the index's own metric. Cheaper
/// than running the full ANN graph and intersecting afterward whenever
/// the geo predicate is selective, which is the common case (a bounding
/// box on a map, not "anywhere on Earth").
pub fn hybrid_vector_geo_search(
    catalog: &SecondaryIndexCatalog,
    table: &str,
    vector_col: &str,
    query_vector: &[f32],
    geo: &EntityPredicate,
    index: &VectorIndex,
    k: usize,
    txn: &EngineTransaction<'_>,
) -> Result<Vec<(String, f32)>> {
    let manager = SecondaryIndexManager::new(catalog);
    let executor = EntityExecutor::new(catalog);
    let candidates = executor.scan_leg(table, geo, &manager, txn)?;

    let mut scored = Vec::with_capacity(candidates.len());
    for pk in candidates {
        let key = key_schema::entity_key(table, &pk);
        let Some(bytes) = txn.get(&key)? else { continue };
        let entity = Entity::decode(&bytes)?;
        let Some(Value::FloatVector(vector)) = entity.get(vector_col) else { continue };
        let distance = index.metric().distance(query_vector, vector);
        scored.push((pk, distance));
    }
    scored.sort_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    Ok(scored)
}
