//! HNSW approximate nearest-neighbor index over float vectors.
//!
//! The in-memory graph always holds full-precision `f32` vectors, so
//! `search_knn` recall is never degraded by quantization; quantization
//! (when configured) only narrows the *on-disk* persisted form written
//! by [`VectorIndex::save_index`], which a cold [`VectorIndex::load_index`]
//! reconstructs as an approximate float buffer until the next
//! `rebuild_from_storage` walks the authoritative full-precision vectors
//! back out of entity storage.
//!
//! Parameter names (`m`, `m_max0`, `ef_construction`, `ef_search`) and
//! level-sampling scheme follow the conventional HNSW construction
//! described in the vector-index writers examined from the wider
//! example pack.

use crate::types::{Result, SombraError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BinaryHeap, HashMap, HashSet};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Metric {
    Cosine,
    L2,
    Dot,
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl Metric {
    /// Lower is closer, for every metric — cosine and dot are converted
    /// to a distance by negation so the same min-heap logic works
    /// everywhere.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => l2_sq(a, b),
            Metric::Dot => -dot(a, b),
            Metric::Cosine => {
                let denom = norm(a) * norm(b);
                if denom == 0.0 {
                    1.0
                } else {
                    1.0 - dot(a, b) / denom
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct HnswParams {
    pub m: usize,
    pub m_max0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub metric: Metric,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            m_max0: 32,
            ef_construction: 100,
            ef_search: 50,
            metric: Metric::Cosine,
        }
    }
}

#[derive(PartialEq)]
struct ScoredId {
    dist: f32,
    id: u64,
}
impl Eq for ScoredId {}
impl Ord for ScoredId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist.partial_cmp(&other.dist).unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// An in-memory HNSW graph plus the full-precision vectors it was built
/// from. One instance per vector collection.
pub struct VectorIndex {
    dimension: usize,
    params: HnswParams,
    vectors: HashMap<u64, Vec<f32>>,
    links: Vec<HashMap<u64, Vec<u64>>>,
    entry_point: Option<u64>,
    max_level: i32,
    rng: ChaCha8Rng,
}

impl VectorIndex {
    pub fn new(dimension: usize, params: HnswParams) -> Self {
        Self {
            dimension,
            params,
            vectors: HashMap::new(),
            links: vec![HashMap::new()],
            entry_point: None,
            max_level: -1,
            rng: ChaCha8Rng::seed_from_u64(0x736f6d627261),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Distance metric this index was built with, for callers that need
    /// to score candidate vectors pulled from outside the graph (e.g. a
    /// post-filter hybrid search) with the same metric.
    pub fn metric(&self) -> Metric {
        self.params.metric
    }

    fn sample_level(&mut self) -> i32 {
        let level_mult = 1.0 / (self.params.m as f64).ln();
        let r: f64 = self.rng.gen_range(1e-12..1.0);
        (-r.ln() * level_mult).floor() as i32
    }

    /// Inserts or replaces `id`'s vector, rewiring its neighbor links.
    pub fn add_entity(&mut self, id: u64, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(SombraError::Invalid("vector dimension mismatch"));
        }
        if self.vectors.contains_key(&id) {
            self.remove_entity(id);
        }
        let level = self.sample_level();
        self.vectors.insert(id, vector.clone());
        while (self.links.len() as i32) <= level {
            self.links.push(HashMap::new());
        }

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            for l in 0..=level {
                self.links[l as usize].entry(id).or_default();
            }
            return Ok(());
        };

        let mut curr = entry;
        let mut curr_dist = self.params.metric.distance(&vector, &self.vectors[&curr]);
        for l in (level + 1..=self.max_level).rev() {
            loop {
                let mut moved = false;
                if let Some(neighbors) = self.links.get(l as usize).and_then(|m| m.get(&curr)).cloned() {
                    for n in neighbors {
                        let d = self.params.metric.distance(&vector, &self.vectors[&n]);
                        if d < curr_dist {
                            curr = n;
                            curr_dist = d;
                            moved = true;
                        }
                    }
                }
                if !moved {
                    break;
                }
            }
        }

        for l in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(&vector, curr, self.params.ef_construction, l as usize);
            let m_limit = if l == 0 { self.params.m_max0 } else { self.params.m };
            let selected = select_neighbors(&candidates, m_limit);
            self.links[l as usize].entry(id).or_default().extend(selected.iter().copied());
            for &n in &selected {
                let back = self.links[l as usize].entry(n).or_default();
                back.push(id);
                if back.len() > m_limit {
                    let mut scored: Vec<(u64, f32)> = back
                        .iter()
                        .map(|&b| (b, self.params.metric.distance(&self.vectors[&n], &self.vectors[&b])))
                        .collect();
                    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                    scored.truncate(m_limit);
                    *back = scored.into_iter().map(|(b, _)| b).collect();
                }
            }
            if let Some((&best, _)) = candidates.first() {
                curr = best;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }
        Ok(())
    }

    pub fn remove_entity(&mut self, id: u64) {
        self.vectors.remove(&id);
        for level in &mut self.links {
            level.remove(&id);
            for neighbors in level.values_mut() {
                neighbors.retain(|n| *n != id);
            }
        }
        if self.entry_point == Some(id) {
            self.entry_point = self.vectors.keys().next().copied();
        }
    }

    fn search_layer(&self, query: &[f32], entry: u64, ef: usize, level: usize) -> Vec<(u64, f32)> {
        let mut visited = HashSet::new();
        visited.insert(entry);
        let entry_dist = self.params.metric.distance(query, &self.vectors[&entry]);
        let mut candidates = BinaryHeap::new();
        candidates.push(std::cmp::Reverse(ScoredId { dist: entry_dist, id: entry }));
        let mut found = vec![(entry, entry_dist)];

        while let Some(std::cmp::Reverse(ScoredId { dist, id })) = candidates.pop() {
            let worst = found.iter().map(|(_, d)| *d).fold(f32::MIN, f32::max);
            if dist > worst && found.len() >= ef {
                break;
            }
            if let Some(neighbors) = self.links.get(level).and_then(|m| m.get(&id)) {
                for &n in neighbors {
                    if !visited.insert(n) {
                        continue;
                    }
                    let d = self.params.metric.distance(query, &self.vectors[&n]);
                    found.push((n, d));
                    candidates.push(std::cmp::Reverse(ScoredId { dist: d, id: n }));
                }
            }
        }
        found.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        found.truncate(ef.max(1));
        found
    }

    /// Returns up to `k` nearest neighbors, full precision, `min(k, N)`
    /// results when fewer than `k` vectors are indexed.
    pub fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.dimension {
            return Err(SombraError::Invalid("query dimension mismatch"));
        }
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        let mut curr = entry;
        let mut curr_dist = self.params.metric.distance(query, &self.vectors[&curr]);
        for l in (1..=self.max_level).rev() {
            loop {
                let mut moved = false;
                if let Some(neighbors) = self.links.get(l as usize).and_then(|m| m.get(&curr)) {
                    for &n in neighbors {
                        let d = self.params.metric.distance(query, &self.vectors[&n]);
                        if d < curr_dist {
                            curr = n;
                            curr_dist = d;
                            moved = true;
                        }
                    }
                }
                if !moved {
                    break;
                }
            }
        }
        let ef = self.params.ef_search.max(k);
        let mut results = self.search_layer(query, curr, ef, 0);
        results.truncate(k);
        Ok(results)
    }

    /// Wholesale serialization: dimension, metric, entry point, max
    /// level, every vector (optionally int8-quantized), and every
    /// layer's adjacency lists.
    pub fn save_index(&self, quantize: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.dimension as u32).to_be_bytes());
        out.push(quantize as u8);
        out.push(self.params.metric as u8);
        out.extend_from_slice(&self.entry_point.unwrap_or(u64::MAX).to_be_bytes());
        out.extend_from_slice(&self.max_level.to_be_bytes());

        out.extend_from_slice(&(self.vectors.len() as u32).to_be_bytes());
        for (&id, v) in &self.vectors {
            out.extend_from_slice(&id.to_be_bytes());
            if quantize {
                let (scale, offset) = quantization_params(v);
                out.extend_from_slice(&scale.to_be_bytes());
                out.extend_from_slice(&offset.to_be_bytes());
                for &x in v {
                    out.push(quantize_one(x, scale, offset));
                }
            } else {
                for &x in v {
                    out.extend_from_slice(&x.to_be_bytes());
                }
            }
        }

        out.extend_from_slice(&(self.links.len() as u32).to_be_bytes());
        for level in &self.links {
            out.extend_from_slice(&(level.len() as u32).to_be_bytes());
            for (&id, neighbors) in level {
                out.extend_from_slice(&id.to_be_bytes());
                out.extend_from_slice(&(neighbors.len() as u32).to_be_bytes());
                for &n in neighbors {
                    out.extend_from_slice(&n.to_be_bytes());
                }
            }
        }
        out
    }

    pub fn load_index(bytes: &[u8], params: HnswParams) -> Result<Self> {
        let mut cursor = 0usize;
        let take = |cursor: &mut usize, n: usize| -> Result<&[u8]> {
            if *cursor + n > bytes.len() {
                return Err(SombraError::Corruption("truncated vector index"));
            }
            let s = &bytes[*cursor..*cursor + n];
            *cursor += n;
            Ok(s)
        };
        let dimension = u32::from_be_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
        let quantized = take(&mut cursor, 1)?[0] != 0;
        let _metric_byte = take(&mut cursor, 1)?[0];
        let entry_raw = u64::from_be_bytes(take(&mut cursor, 8)?.try_into().unwrap());
        let max_level = i32::from_be_bytes(take(&mut cursor, 4)?.try_into().unwrap());

        let n_vectors = u32::from_be_bytes(take(&mut cursor, 4)?.try_into().unwrap());
        let mut vectors = HashMap::with_capacity(n_vectors as usize);
        for _ in 0..n_vectors {
            let id = u64::from_be_bytes(take(&mut cursor, 8)?.try_into().unwrap());
            let v = if quantized {
                let scale = f32::from_be_bytes(take(&mut cursor, 4)?.try_into().unwrap());
                let offset = f32::from_be_bytes(take(&mut cursor, 4)?.try_into().unwrap());
                let raw = take(&mut cursor, dimension)?;
                raw.iter().map(|&b| dequantize_one(b, scale, offset)).collect()
            } else {
                let mut v = Vec::with_capacity(dimension);
                for _ in 0..dimension {
                    v.push(f32::from_be_bytes(take(&mut cursor, 4)?.try_into().unwrap()));
                }
                v
            };
            vectors.insert(id, v);
        }

        let n_levels = u32::from_be_bytes(take(&mut cursor, 4)?.try_into().unwrap());
        let mut links = Vec::with_capacity(n_levels as usize);
        for _ in 0..n_levels {
            let n_entries = u32::from_be_bytes(take(&mut cursor, 4)?.try_into().unwrap());
            let mut level = HashMap::with_capacity(n_entries as usize);
            for _ in 0..n_entries {
                let id = u64::from_be_bytes(take(&mut cursor, 8)?.try_into().unwrap());
                let n_neighbors = u32::from_be_bytes(take(&mut cursor, 4)?.try_into().unwrap());
                let mut neighbors = Vec::with_capacity(n_neighbors as usize);
                for _ in 0..n_neighbors {
                    neighbors.push(u64::from_be_bytes(take(&mut cursor, 8)?.try_into().unwrap()));
                }
                level.insert(id, neighbors);
            }
            links.push(level);
        }

        Ok(Self {
            dimension,
            params,
            vectors,
            links,
            entry_point: if entry_raw == u64::MAX { None } else { Some(entry_raw) },
            max_level,
            rng: ChaCha8Rng::seed_from_u64(0x736f6d627261),
        })
    }

    /// Rebuilds a fresh graph from the authoritative full-precision
    /// vectors (e.g. re-read from entity storage), discarding whatever
    /// graph was loaded from disk.
    pub fn rebuild_from_storage(dimension: usize, params: HnswParams, entries: impl IntoIterator<Item = (u64, Vec<f32>)>) -> Result<Self> {
        let mut index = Self::new(dimension, params);
        for (id, vector) in entries {
            index.add_entity(id, vector)?;
        }
        Ok(index)
    }
}

fn select_neighbors(candidates: &[(u64, f32)], m: usize) -> Vec<u64> {
    candidates.iter().take(m).map(|(id, _)| *id).collect()
}

fn quantization_params(v: &[f32]) -> (f32, f32) {
    let min = v.iter().cloned().fold(f32::MAX, f32::min);
    let max = v.iter().cloned().fold(f32::MIN, f32::max);
    let range = (max - min).max(1e-6);
    (range / 255.0, min)
}

fn quantize_one(x: f32, scale: f32, offset: f32) -> u8 {
    (((x - offset) / scale).round().clamp(0.0, 255.0)) as u8
}

fn dequantize_one(b: u8, scale: f32, offset: f32) -> f32 {
    b as f32 * scale + offset
}
