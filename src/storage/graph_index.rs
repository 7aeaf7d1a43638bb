//! Graph traversal over the generic entity model.
//!
//! Adapts the page-slotted `NodeId`/`EdgeId` adjacency scheme in
//! [`crate::storage::adjacency`] to entities addressed by `(table, pk)`
//! string keys. An edge is itself an entity carrying reserved
//! `_from`/`_to`/`_type` fields (and, for temporal graphs,
//! `valid_from`/`valid_to`); adjacency postings under `graph:out:*` and
//! `graph:in:*` point at the edge's primary key so a traversal never has
//! to deserialize edges it isn't visiting.

use crate::entity::{Entity, Value, FIELD_FROM, FIELD_TO, FIELD_TYPE, FIELD_VALID_FROM, FIELD_VALID_TO};
use crate::engine::EngineTransaction;
use crate::key_schema;
use crate::types::{Result, SombraError};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dir {
    Out,
    In,
    Both,
}

/// A single hop discovered during traversal.
#[derive(Clone, Debug)]
pub struct Neighbor {
    pub node_pk: String,
    pub edge_pk: String,
    pub edge_type: String,
}

/// An instant (epoch milliseconds) a temporal query is evaluated at;
/// `None` means "ignore validity windows".
pub type AsOf = Option<i64>;

fn edge_visible_at(edge: &Entity, as_of: AsOf) -> bool {
    let Some(t) = as_of else { return true };
    let valid_from = edge.get(FIELD_VALID_FROM).and_then(Value::as_f64).unwrap_or(i64::MIN as f64) as i64;
    let valid_to = edge.get(FIELD_VALID_TO).and_then(Value::as_f64).unwrap_or(i64::MAX as f64) as i64;
    valid_from <= t && t < valid_to
}

fn load_edge(graph_id: &str, edge_pk: &str, txn: &EngineTransaction<'_>) -> Result<Entity> {
    let key = key_schema::entity_key(graph_id, edge_pk);
    let bytes = txn
        .get(&key)?
        .ok_or_else(|| SombraError::NotFound)?;
    Entity::decode(&bytes)
}

/// Writes an edge entity and maintains its out/in adjacency postings
/// and type index. Stages a change-feed record for the edge mutation
/// alongside the primary and posting writes, published atomically with
/// them at commit.
pub fn create_edge(graph_id: &str, edge_pk: &str, edge: &Entity, txn: &mut EngineTransaction<'_>) -> Result<()> {
    let from = edge
        .get(FIELD_FROM)
        .and_then(Value::as_str)
        .ok_or_else(|| SombraError::Invalid("edge entity missing _from"))?
        .to_string();
    let to = edge
        .get(FIELD_TO)
        .and_then(Value::as_str)
        .ok_or_else(|| SombraError::Invalid("edge entity missing _to"))?
        .to_string();
    let edge_type = edge.get(FIELD_TYPE).and_then(Value::as_str).unwrap_or("").to_string();

    let key = key_schema::entity_key(graph_id, edge_pk);
    let encoded = edge.encode();
    txn.put(&key, encoded.clone())?;
    txn.put(&key_schema::graph_out_key(graph_id, &from, edge_pk), Vec::new())?;
    txn.put(&key_schema::graph_in_key(graph_id, &to, edge_pk), Vec::new())?;
    if !edge_type.is_empty() {
        txn.put(&key_schema::graph_type_key(graph_id, &edge_type, edge_pk), Vec::new())?;
    }
    txn.stage_change_event(key, Some(encoded));
    Ok(())
}

/// Removes an edge entity and every adjacency/type posting it owns,
/// staging a change-feed record for the removal.
pub fn delete_edge(graph_id: &str, edge_pk: &str, txn: &mut EngineTransaction<'_>) -> Result<()> {
    let key = key_schema::entity_key(graph_id, edge_pk);
    let Some(bytes) = txn.get(&key)? else {
        return Ok(());
    };
    let edge = Entity::decode(&bytes)?;
    let from = edge.get(FIELD_FROM).and_then(Value::as_str).unwrap_or_default().to_string();
    let to = edge.get(FIELD_TO).and_then(Value::as_str).unwrap_or_default().to_string();
    let edge_type = edge.get(FIELD_TYPE).and_then(Value::as_str).unwrap_or("").to_string();

    txn.delete(&key_schema::graph_out_key(graph_id, &from, edge_pk))?;
    txn.delete(&key_schema::graph_in_key(graph_id, &to, edge_pk))?;
    if !edge_type.is_empty() {
        txn.delete(&key_schema::graph_type_key(graph_id, &edge_type, edge_pk))?;
    }
    txn.delete(&key)?;
    txn.stage_change_event(key, None);
    Ok(())
}

/// Pulls the edge pk suffix out of a `graph:out:*`/`graph:in:*` posting
/// key, given the byte length of the fixed `graph:out:<graph_id>:<pk>:`
/// prefix it was scanned under.
fn edge_pk_suffix(key: &[u8], prefix_len: usize) -> String {
    String::from_utf8_lossy(&key[prefix_len..]).into_owned()
}

/// Traversal entry point for a single graph id. `out_edge_pks`/
/// `in_edge_pks` scan real adjacency postings; `bfs`/`dijkstra` accept
/// an arbitrary expansion closure so tests can substitute a plain map,
/// while `bfs_storage`/`dijkstra_storage` wire that closure to the
/// storage scan directly.
pub struct GraphIndexManager<'g> {
    graph_id: &'g str,
}

impl<'g> GraphIndexManager<'g> {
    pub fn new(graph_id: &'g str) -> Self {
        Self { graph_id }
    }

    /// Candidate out-edge pks posted under
    /// `graph:out:<graph_id>:<node_pk>:*`.
    pub fn out_edge_pks(&self, node_pk: &str, txn: &EngineTransaction<'_>) -> Result<Vec<String>> {
        let prefix = key_schema::graph_out_prefix(self.graph_id, node_pk);
        let entries = txn.scan_prefix(&prefix)?;
        Ok(entries
            .into_iter()
            .map(|(key, _)| edge_pk_suffix(&key, prefix.len()))
            .collect())
    }

    /// Candidate in-edge pks posted under
    /// `graph:in:<graph_id>:<node_pk>:*`.
    pub fn in_edge_pks(&self, node_pk: &str, txn: &EngineTransaction<'_>) -> Result<Vec<String>> {
        let prefix = key_schema::graph_in_prefix(self.graph_id, node_pk);
        let entries = txn.scan_prefix(&prefix)?;
        Ok(entries
            .into_iter()
            .map(|(key, _)| edge_pk_suffix(&key, prefix.len()))
            .collect())
    }

    /// Breadth-first search from `start`, expanding each node via a real
    /// `graph:out:*` prefix scan.
    pub fn bfs_storage(&self, start: &str, max_depth: u32, as_of: AsOf, txn: &EngineTransaction<'_>) -> Result<Vec<(String, u32)>> {
        self.bfs(start, max_depth, as_of, txn, |node| {
            self.out_edge_pks(node, txn).unwrap_or_default()
        })
    }

    /// Dijkstra shortest path from `start` to `goal`, expanding each
    /// node via a real `graph:out:*` prefix scan.
    pub fn dijkstra_storage(&self, start: &str, goal: &str, weight_field: &str, as_of: AsOf, txn: &EngineTransaction<'_>) -> Result<Option<(f64, Vec<String>)>> {
        self.dijkstra(start, goal, weight_field, as_of, txn, |node| {
            self.out_edge_pks(node, txn).unwrap_or_default()
        })
    }

    /// Out-neighbors of `node_pk`: `edge_pks` are the candidate postings
    /// under `graph:out:<graph_id>:<node_pk>:*` already gathered by the
    /// caller's scan.
    pub fn out_neighbors(&self, node_pk: &str, edge_pks: &[String], as_of: AsOf, txn: &EngineTransaction<'_>) -> Result<Vec<Neighbor>> {
        let _ = node_pk;
        let mut out = Vec::with_capacity(edge_pks.len());
        for edge_pk in edge_pks {
            let edge = load_edge(self.graph_id, edge_pk, txn)?;
            if !edge_visible_at(&edge, as_of) {
                continue;
            }
            let Some(to) = edge.get(FIELD_TO).and_then(Value::as_str) else {
                continue;
            };
            out.push(Neighbor {
                node_pk: to.to_string(),
                edge_pk: edge_pk.clone(),
                edge_type: edge.get(FIELD_TYPE).and_then(Value::as_str).unwrap_or("").to_string(),
            });
        }
        Ok(out)
    }

    /// In-neighbors of `node_pk`.
    pub fn in_neighbors(&self, node_pk: &str, edge_pks: &[String], as_of: AsOf, txn: &EngineTransaction<'_>) -> Result<Vec<Neighbor>> {
        let _ = node_pk;
        let mut out = Vec::with_capacity(edge_pks.len());
        for edge_pk in edge_pks {
            let edge = load_edge(self.graph_id, edge_pk, txn)?;
            if !edge_visible_at(&edge, as_of) {
                continue;
            }
            let Some(from) = edge.get(FIELD_FROM).and_then(Value::as_str) else {
                continue;
            };
            out.push(Neighbor {
                node_pk: from.to_string(),
                edge_pk: edge_pk.clone(),
                edge_type: edge.get(FIELD_TYPE).and_then(Value::as_str).unwrap_or("").to_string(),
            });
        }
        Ok(out)
    }

    /// Breadth-first search from `start`, expanding via `expand` (a
    /// caller-supplied closure that performs the adjacency scan for a
    /// given node and returns its out-neighbor edge pks; kept generic
    /// so this module stays free of any storage-scan assumptions).
    pub fn bfs<F>(&self, start: &str, max_depth: u32, as_of: AsOf, txn: &EngineTransaction<'_>, mut expand: F) -> Result<Vec<(String, u32)>>
    where
        F: FnMut(&str) -> Vec<String>,
    {
        let mut visited: HashMap<String, u32> = HashMap::new();
        visited.insert(start.to_string(), 0);
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        queue.push_back((start.to_string(), 0));
        let mut order = vec![(start.to_string(), 0)];

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let edge_pks = expand(&node);
            let neighbors = self.out_neighbors(&node, &edge_pks, as_of, txn)?;
            for n in neighbors {
                if visited.contains_key(&n.node_pk) {
                    continue;
                }
                visited.insert(n.node_pk.clone(), depth + 1);
                order.push((n.node_pk.clone(), depth + 1));
                queue.push_back((n.node_pk, depth + 1));
            }
        }
        Ok(order)
    }

    /// Dijkstra shortest path using a caller-supplied expansion closure
    /// and an edge-weight field name (defaulting to unit weight when the
    /// edge lacks the field).
    pub fn dijkstra<F>(
        &self,
        start: &str,
        goal: &str,
        weight_field: &str,
        as_of: AsOf,
        txn: &EngineTransaction<'_>,
        mut expand: F,
    ) -> Result<Option<(f64, Vec<String>)>>
    where
        F: FnMut(&str) -> Vec<String>,
    {
        #[derive(PartialEq)]
        struct HeapEntry {
            cost: f64,
            node: String,
        }
        impl Eq for HeapEntry {}
        impl Ord for HeapEntry {
            fn cmp(&self, other: &Self) -> Ordering {
                other.cost.partial_cmp(&self.cost).unwrap_or(Ordering::Equal)
            }
        }
        impl PartialOrd for HeapEntry {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        let mut dist: HashMap<String, f64> = HashMap::new();
        let mut prev: HashMap<String, String> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::new();
        dist.insert(start.to_string(), 0.0);
        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry { cost: 0.0, node: start.to_string() });

        while let Some(HeapEntry { cost, node }) = heap.pop() {
            if node == goal {
                let mut path = vec![node.clone()];
                let mut cur = node.clone();
                while let Some(p) = prev.get(&cur) {
                    path.push(p.clone());
                    cur = p.clone();
                }
                path.reverse();
                return Ok(Some((cost, path)));
            }
            if !visited.insert(node.clone()) {
                continue;
            }
            let edge_pks = expand(&node);
            for edge_pk in &edge_pks {
                let edge = load_edge(self.graph_id, edge_pk, txn)?;
                if !edge_visible_at(&edge, as_of) {
                    continue;
                }
                let Some(to) = edge.get(FIELD_TO).and_then(Value::as_str) else {
                    continue;
                };
                let w = edge.get(weight_field).and_then(Value::as_f64).unwrap_or(1.0);
                let next_cost = cost + w;
                if next_cost < *dist.get(to).unwrap_or(&f64::INFINITY) {
                    dist.insert(to.to_string(), next_cost);
                    prev.insert(to.to_string(), node.clone());
                    heap.push(HeapEntry { cost: next_cost, node: to.to_string() });
                }
            }
        }
        Ok(None)
    }
}
