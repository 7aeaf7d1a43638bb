//! Pure key-builder functions for every key family in the data model.
//!
//! Every function here is deterministic and allocation-only; none of them
//! touch storage. Numeric components use
//! [`crate::primitives::bytes::ord`] so ascending byte order equals
//! ascending numeric order, which is what range scans and cursor-anchored
//! pagination rely on. String components are raw UTF-8 followed by a
//! `\0` separator, which cannot occur inside a well-formed UTF-8 string,
//! so no encoded value can be mistaken for a separator.

use crate::primitives::bytes::ord;

const SEP: u8 = 0x00;

fn push_str_component(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(SEP);
}

/// `entity:<table>:<pk>`
pub fn entity_key(table: &str, pk: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(b"entity:".len() + table.len() + pk.len() + 2);
    out.extend_from_slice(b"entity:");
    push_str_component(&mut out, table);
    out.extend_from_slice(pk.as_bytes());
    out
}

/// `entity:<table>:`, the prefix scanned for a full table scan.
pub fn entity_table_prefix(table: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(b"entity:".len() + table.len() + 1);
    out.extend_from_slice(b"entity:");
    push_str_component(&mut out, table);
    out
}

/// Order-preserving encoding of a value used inside an index key.
///
/// Each variant is prefixed with a type discriminant so values of
/// different types never collide lexicographically even when their
/// payloads happen to share a prefix.
pub fn encode_indexed_value(value: &crate::entity::Value) -> Vec<u8> {
    use crate::entity::Value;
    let mut out = Vec::new();
    match value {
        Value::Null => out.push(0),
        Value::Bool(b) => {
            out.push(1);
            out.push(*b as u8);
        }
        Value::Int(v) => {
            out.push(2);
            let mut buf = [0u8; 8];
            ord::put_i64_be(&mut buf, *v);
            out.extend_from_slice(&buf);
        }
        Value::Float(v) => {
            out.push(3);
            let mut buf = [0u8; 8];
            ord::put_f64_be(&mut buf, *v);
            out.extend_from_slice(&buf);
        }
        Value::String(s) => {
            out.push(4);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(5);
            out.extend_from_slice(b);
        }
        Value::FloatVector(_) => {
            // Vectors are never indexed via the secondary index family;
            // they go through the Vector Index Manager instead.
            out.push(6);
        }
    }
    out
}

/// `idx:<table>:<col>:<encoded_value>:<pk>` (equality, range, and sparse
/// families share this layout; callers decide whether to skip null
/// values for sparse semantics before calling this).
pub fn secondary_index_key(table: &str, col: &str, value: &crate::entity::Value, pk: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"idx:");
    push_str_component(&mut out, table);
    push_str_component(&mut out, col);
    out.extend_from_slice(&encode_indexed_value(value));
    out.push(SEP);
    out.extend_from_slice(pk.as_bytes());
    out
}

/// Prefix of every secondary index entry for `(table, col)`, for prefix
/// iteration during full-index scans.
pub fn secondary_index_prefix(table: &str, col: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"idx:");
    push_str_component(&mut out, table);
    push_str_component(&mut out, col);
    out
}

/// Geo cell token for a fixed-resolution lat/lon grid cell.
///
/// Resolution is in degrees; callers pick a resolution matching their
/// configured geo precision (smaller = finer cells, more exact candidate
/// sets, more postings to maintain).
pub fn geo_cell_token(lat: f64, lon: f64, resolution_deg: f64) -> String {
    let cell_lat = (lat / resolution_deg).floor() as i64;
    let cell_lon = (lon / resolution_deg).floor() as i64;
    format!("{cell_lat}:{cell_lon}")
}

/// `idx:<table>:<col>:geo:<cell_token>:<pk>`
pub fn geo_index_key(table: &str, col: &str, cell_token: &str, pk: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"idx:");
    push_str_component(&mut out, table);
    push_str_component(&mut out, col);
    out.extend_from_slice(b"geo:");
    push_str_component(&mut out, cell_token);
    out.extend_from_slice(pk.as_bytes());
    out
}

pub fn geo_index_prefix(table: &str, col: &str) -> Vec<u8> {
    let mut out = secondary_index_prefix(table, col);
    out.extend_from_slice(b"geo:");
    out
}

/// `ttl:<epoch_ms>:<pk>`
pub fn ttl_key(epoch_ms: u64, pk: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 8 + 1 + pk.len());
    out.extend_from_slice(b"ttl:");
    let mut buf = [0u8; 8];
    ord::put_u64_be(&mut buf, epoch_ms);
    out.extend_from_slice(&buf);
    out.push(SEP);
    out.extend_from_slice(pk.as_bytes());
    out
}

/// `ft:<table>:<field>:<term>:<pk>`
pub fn fulltext_posting_key(table: &str, field: &str, term: &str, pk: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"ft:");
    push_str_component(&mut out, table);
    push_str_component(&mut out, field);
    push_str_component(&mut out, term);
    out.extend_from_slice(pk.as_bytes());
    out
}

pub fn fulltext_term_prefix(table: &str, field: &str, term: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"ft:");
    push_str_component(&mut out, table);
    push_str_component(&mut out, field);
    push_str_component(&mut out, term);
    out
}

pub fn fulltext_doclen_prefix(table: &str, field: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"ft:meta:");
    push_str_component(&mut out, table);
    push_str_component(&mut out, field);
    out
}

/// `ft:meta:<table>:<field>:<pk>` — per-document length for BM25.
pub fn fulltext_doclen_key(table: &str, field: &str, pk: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"ft:meta:");
    push_str_component(&mut out, table);
    push_str_component(&mut out, field);
    out.extend_from_slice(pk.as_bytes());
    out
}

/// `graph:out:<graph_id>:<from_pk>:<edge_id>`
pub fn graph_out_key(graph_id: &str, from_pk: &str, edge_id: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"graph:out:");
    push_str_component(&mut out, graph_id);
    push_str_component(&mut out, from_pk);
    out.extend_from_slice(edge_id.as_bytes());
    out
}

pub fn graph_out_prefix(graph_id: &str, from_pk: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"graph:out:");
    push_str_component(&mut out, graph_id);
    push_str_component(&mut out, from_pk);
    out
}

/// `graph:in:<graph_id>:<to_pk>:<edge_id>`
pub fn graph_in_key(graph_id: &str, to_pk: &str, edge_id: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"graph:in:");
    push_str_component(&mut out, graph_id);
    push_str_component(&mut out, to_pk);
    out.extend_from_slice(edge_id.as_bytes());
    out
}

pub fn graph_in_prefix(graph_id: &str, to_pk: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"graph:in:");
    push_str_component(&mut out, graph_id);
    push_str_component(&mut out, to_pk);
    out
}

/// `label:<graph_id>:<label>:<pk>`
pub fn graph_label_key(graph_id: &str, label: &str, pk: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"label:");
    push_str_component(&mut out, graph_id);
    push_str_component(&mut out, label);
    out.extend_from_slice(pk.as_bytes());
    out
}

pub fn graph_label_prefix(graph_id: &str, label: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"label:");
    push_str_component(&mut out, graph_id);
    push_str_component(&mut out, label);
    out
}

/// `type:<graph_id>:<type>:<edge_id>`
pub fn graph_type_key(graph_id: &str, edge_type: &str, edge_id: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"type:");
    push_str_component(&mut out, graph_id);
    push_str_component(&mut out, edge_type);
    out.extend_from_slice(edge_id.as_bytes());
    out
}

pub fn graph_type_prefix(graph_id: &str, edge_type: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"type:");
    push_str_component(&mut out, graph_id);
    push_str_component(&mut out, edge_type);
    out
}

/// `vec:<collection>:<id>` — raw (possibly quantized) vector payload.
pub fn vector_entry_key(collection: &str, id: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"vec:");
    push_str_component(&mut out, collection);
    let mut buf = [0u8; 8];
    ord::put_u64_be(&mut buf, id);
    out.extend_from_slice(&buf);
    out
}

pub fn vector_collection_prefix(collection: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"vec:");
    push_str_component(&mut out, collection);
    out
}

/// `vecidx:<collection>` — serialized HNSW graph (links per level, entry
/// point, max level) for the whole collection, rewritten wholesale on
/// `saveIndex`.
pub fn vector_index_key(collection: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"vecidx:");
    out.extend_from_slice(collection.as_bytes());
    out
}

/// `ts:<series>:<chunk_start>`
pub fn timeseries_chunk_key(series: &str, chunk_start_ms: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"ts:");
    push_str_component(&mut out, series);
    let mut buf = [0u8; 8];
    ord::put_u64_be(&mut buf, chunk_start_ms);
    out.extend_from_slice(&buf);
    out
}

pub fn timeseries_series_prefix(series: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"ts:");
    push_str_component(&mut out, series);
    out
}

/// `cdc:<seq>`
pub fn change_feed_key(seq: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 8);
    out.extend_from_slice(b"cdc:");
    let mut buf = [0u8; 8];
    ord::put_u64_be(&mut buf, seq);
    out.extend_from_slice(&buf);
    out
}

pub const CHANGE_FEED_PREFIX: &[u8] = b"cdc:";

/// `audit:<seq>`
pub fn audit_key(seq: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + 8);
    out.extend_from_slice(b"audit:");
    let mut buf = [0u8; 8];
    ord::put_u64_be(&mut buf, seq);
    out.extend_from_slice(&buf);
    out
}

/// Well-known key holding the change-feed monotonic sequence counter.
pub const CHANGE_FEED_SEQ_COUNTER_KEY: &[u8] = b"meta:cdc_seq";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Value;

    #[test]
    fn entity_key_includes_table_and_pk() {
        let key = entity_key("users", "u1");
        assert_eq!(key, b"entity:users\0u1");
    }

    #[test]
    fn secondary_index_key_orders_by_encoded_value_then_pk() {
        let lo = secondary_index_key("users", "age", &Value::Int(20), "u2");
        let hi = secondary_index_key("users", "age", &Value::Int(30), "u1");
        assert!(lo < hi, "age=20 must sort before age=30 regardless of pk");
    }

    #[test]
    fn negative_and_positive_ints_sort_correctly_inside_key() {
        let neg = secondary_index_key("t", "v", &Value::Int(-5), "p");
        let pos = secondary_index_key("t", "v", &Value::Int(5), "p");
        assert!(neg < pos);
    }

    #[test]
    fn prefix_matches_generated_keys() {
        let prefix = secondary_index_prefix("users", "city");
        let key = secondary_index_key("users", "city", &Value::String("Berlin".into()), "u1");
        assert!(key.starts_with(&prefix));
    }

    #[test]
    fn graph_out_and_in_keys_are_distinct_namespaces() {
        let out = graph_out_key("g1", "a", "e1");
        let inn = graph_in_key("g1", "a", "e1");
        assert_ne!(out, inn);
    }

    #[test]
    fn change_feed_keys_sort_by_sequence() {
        let a = change_feed_key(1);
        let b = change_feed_key(2);
        let c = change_feed_key(1000);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn geo_cell_token_groups_nearby_coordinates() {
        let a = geo_cell_token(52.52, 13.405, 0.5);
        let b = geo_cell_token(52.6, 13.45, 0.5);
        assert_eq!(a, b);
        let c = geo_cell_token(10.0, 10.0, 0.5);
        assert_ne!(a, c);
    }
}
