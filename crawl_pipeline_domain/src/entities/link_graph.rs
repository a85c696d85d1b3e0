// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Link Graph
//!
//! Directed link graph accumulated during discovery and finalized before
//! validation starts. Scoring runs once, at stage-1 end:
//!
//! - **PageRank**: damping 0.85, power iteration, convergence tolerance
//!   1e-6 or 100 iterations. Scores form a probability distribution
//!   (sum == 1.0), so each score already lies in [0,1].
//! - **HITS**: hub/authority with the same convergence policy, max-scaled
//!   into [0,1] after the final iteration.
//!
//! Self-loops are stored (they are real edges) but ignored by both scoring
//! algorithms. After finalization the graph is read-only; stage 2 consumes
//! the scores for priority ordering.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::value_objects::UrlHash;

const PAGERANK_DAMPING: f64 = 0.85;
const CONVERGENCE_TOLERANCE: f64 = 1e-6;
const MAX_ITERATIONS: usize = 100;

/// A scored node, as persisted to the link-graph store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGraphNode {
    pub url_hash: UrlHash,
    pub url: String,
    pub out_degree: u64,
    pub in_degree: u64,
    pub pagerank_score: f64,
    pub authority_score: f64,
    pub hub_score: f64,
}

/// A directed edge, as persisted to the link-graph store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGraphEdge {
    pub source_hash: UrlHash,
    pub target_hash: UrlHash,
    pub discovery_depth: u8,
}

/// Structural gauges exported by the metrics collector.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkGraphStats {
    pub node_count: u64,
    pub edge_count: u64,
    pub avg_degree: f64,
    pub max_degree: u64,
    pub top_pagerank: f64,
    pub top_authority: f64,
}

#[derive(Debug, Clone)]
struct NodeData {
    url: String,
    pagerank: f64,
    authority: f64,
    hub: f64,
}

/// In-memory directed graph with dense-index adjacency.
#[derive(Debug, Default)]
pub struct LinkGraph {
    index: HashMap<UrlHash, usize>,
    hashes: Vec<UrlHash>,
    nodes: Vec<NodeData>,
    /// (source, target, depth); may contain self-loops.
    edges: Vec<(usize, usize, u8)>,
    /// Dedup set: one edge per (source, target) pair.
    edge_set: HashSet<(usize, usize)>,
    out_adjacency: Vec<Vec<usize>>,
    in_adjacency: Vec<Vec<usize>>,
    scored: bool,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node if unseen; returns its dense index either way.
    pub fn add_node(&mut self, hash: UrlHash, url: &str) -> usize {
        if let Some(&idx) = self.index.get(&hash) {
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(hash.clone(), idx);
        self.hashes.push(hash);
        self.nodes.push(NodeData {
            url: url.to_string(),
            pagerank: 0.0,
            authority: 0.0,
            hub: 0.0,
        });
        self.out_adjacency.push(Vec::new());
        self.in_adjacency.push(Vec::new());
        idx
    }

    /// Adds a directed edge between existing or new nodes. Repeated
    /// sightings of the same (source, target) pair collapse to one edge.
    pub fn add_edge(&mut self, source: UrlHash, source_url: &str, target: UrlHash, target_url: &str, depth: u8) {
        let s = self.add_node(source, source_url);
        let t = self.add_node(target, target_url);
        if !self.edge_set.insert((s, t)) {
            return;
        }
        self.edges.push((s, t, depth));
        // Self-loops are kept out of the adjacency used by scoring.
        if s != t {
            self.out_adjacency[s].push(t);
            self.in_adjacency[t].push(s);
        }
        self.scored = false;
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, hash: &UrlHash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn in_degree(&self, hash: &UrlHash) -> u64 {
        self.index.get(hash).map_or(0, |&i| self.in_adjacency[i].len() as u64)
    }

    pub fn max_in_degree(&self) -> u64 {
        self.in_adjacency.iter().map(|a| a.len() as u64).max().unwrap_or(0)
    }

    /// Runs PageRank and HITS; idempotent until the graph changes again.
    pub fn compute_scores(&mut self) {
        if self.scored || self.nodes.is_empty() {
            self.scored = true;
            return;
        }
        self.compute_pagerank();
        self.compute_hits();
        self.scored = true;
    }

    fn compute_pagerank(&mut self) {
        let n = self.nodes.len();
        let uniform = 1.0 / n as f64;
        let mut ranks = vec![uniform; n];

        for _ in 0..MAX_ITERATIONS {
            let mut next = vec![(1.0 - PAGERANK_DAMPING) * uniform; n];

            // Dangling mass is spread uniformly so the distribution keeps
            // summing to 1.
            let dangling: f64 = (0..n)
                .filter(|&i| self.out_adjacency[i].is_empty())
                .map(|i| ranks[i])
                .sum();
            let dangling_share = PAGERANK_DAMPING * dangling * uniform;

            for (i, targets) in self.out_adjacency.iter().enumerate() {
                if targets.is_empty() {
                    continue;
                }
                let share = PAGERANK_DAMPING * ranks[i] / targets.len() as f64;
                for &t in targets {
                    next[t] += share;
                }
            }
            for value in next.iter_mut() {
                *value += dangling_share;
            }

            let delta: f64 = ranks.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
            ranks = next;
            if delta < CONVERGENCE_TOLERANCE {
                break;
            }
        }

        for (node, rank) in self.nodes.iter_mut().zip(&ranks) {
            node.pagerank = *rank;
        }
    }

    fn compute_hits(&mut self) {
        let n = self.nodes.len();
        let mut hubs = vec![1.0; n];
        let mut authorities = vec![1.0; n];

        for _ in 0..MAX_ITERATIONS {
            let mut next_auth = vec![0.0; n];
            for (t, sources) in self.in_adjacency.iter().enumerate() {
                next_auth[t] = sources.iter().map(|&s| hubs[s]).sum();
            }
            let mut next_hub = vec![0.0; n];
            for (s, targets) in self.out_adjacency.iter().enumerate() {
                next_hub[s] = targets.iter().map(|&t| next_auth[t]).sum();
            }

            // L2 normalization keeps the iteration from overflowing.
            normalize_l2(&mut next_auth);
            normalize_l2(&mut next_hub);

            let delta: f64 = authorities
                .iter()
                .zip(&next_auth)
                .chain(hubs.iter().zip(&next_hub))
                .map(|(a, b)| (a - b).abs())
                .sum();
            authorities = next_auth;
            hubs = next_hub;
            if delta < CONVERGENCE_TOLERANCE {
                break;
            }
        }

        // Max-scale into [0,1] for storage and priority math.
        let max_auth = authorities.iter().cloned().fold(0.0, f64::max);
        let max_hub = hubs.iter().cloned().fold(0.0, f64::max);
        for (i, node) in self.nodes.iter_mut().enumerate() {
            node.authority = if max_auth > 0.0 { authorities[i] / max_auth } else { 0.0 };
            node.hub = if max_hub > 0.0 { hubs[i] / max_hub } else { 0.0 };
        }
    }

    /// Looks up scores for one node.
    pub fn node(&self, hash: &UrlHash) -> Option<LinkGraphNode> {
        let &idx = self.index.get(hash)?;
        let data = &self.nodes[idx];
        Some(LinkGraphNode {
            url_hash: self.hashes[idx].clone(),
            url: data.url.clone(),
            out_degree: self.out_adjacency[idx].len() as u64,
            in_degree: self.in_adjacency[idx].len() as u64,
            pagerank_score: data.pagerank,
            authority_score: data.authority,
            hub_score: data.hub,
        })
    }

    /// Iterates all nodes with their scores (persistence path).
    pub fn nodes(&self) -> impl Iterator<Item = LinkGraphNode> + '_ {
        (0..self.nodes.len()).map(|idx| {
            let data = &self.nodes[idx];
            LinkGraphNode {
                url_hash: self.hashes[idx].clone(),
                url: data.url.clone(),
                out_degree: self.out_adjacency[idx].len() as u64,
                in_degree: self.in_adjacency[idx].len() as u64,
                pagerank_score: data.pagerank,
                authority_score: data.authority,
                hub_score: data.hub,
            }
        })
    }

    /// Iterates all edges (persistence path).
    pub fn edges(&self) -> impl Iterator<Item = LinkGraphEdge> + '_ {
        self.edges.iter().map(|&(s, t, depth)| LinkGraphEdge {
            source_hash: self.hashes[s].clone(),
            target_hash: self.hashes[t].clone(),
            discovery_depth: depth,
        })
    }

    pub fn stats(&self) -> LinkGraphStats {
        let node_count = self.nodes.len() as u64;
        let edge_count = self.edges.len() as u64;
        let max_degree = (0..self.nodes.len())
            .map(|i| (self.out_adjacency[i].len() + self.in_adjacency[i].len()) as u64)
            .max()
            .unwrap_or(0);
        LinkGraphStats {
            node_count,
            edge_count,
            avg_degree: if node_count > 0 {
                edge_count as f64 / node_count as f64
            } else {
                0.0
            },
            max_degree,
            top_pagerank: self.nodes.iter().map(|n| n.pagerank).fold(0.0, f64::max),
            top_authority: self.nodes.iter().map(|n| n.authority).fold(0.0, f64::max),
        }
    }
}

fn normalize_l2(values: &mut [f64]) {
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}
