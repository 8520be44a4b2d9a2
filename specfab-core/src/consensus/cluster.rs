//! Value clustering
//!
//! Single-linkage clustering over normalized values: two candidates share a
//! cluster when their values are equal (text case-folded) or, for numbers,
//! within the declared tolerance of each other, transitively. Adding a
//! candidate can only grow or merge clusters, never split one.

use crate::rules::ClusterTolerance;
use crate::types::{SourceTier, ValidatedCandidate};
use std::cmp::Ordering;

/// One cluster of candidate indexes into the conflict set
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub members: Vec<usize>,
    /// Σ tier_weight × confidence
    pub base_score: f64,
    /// Selection-policy bonus, between 0.0 and the policy bonus
    pub bonus: f64,
    /// Best-ranked member
    pub representative: usize,
    pub best_tier: SourceTier,
}

impl Cluster {
    pub fn score(&self) -> f64 {
        self.base_score + self.bonus
    }
}

/// Disjoint-set forest with path compression
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower index becomes the root so cluster order is stable
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[merge] = keep;
        }
    }
}

/// Rank two candidates: better tier first, then higher confidence, then input order
pub fn rank_candidates(candidates: &[ValidatedCandidate], a: usize, b: usize) -> Ordering {
    let (ca, cb) = (&candidates[a], &candidates[b]);
    ca.tier()
        .cmp(&cb.tier())
        .then_with(|| cb.confidence.total_cmp(&ca.confidence))
        .then_with(|| a.cmp(&b))
}

fn same_value(a: &ValidatedCandidate, b: &ValidatedCandidate, tolerance: ClusterTolerance) -> bool {
    match (a.normalized_value.as_f64(), b.normalized_value.as_f64()) {
        (Some(x), Some(y)) => tolerance.within(x, y),
        _ => a.normalized_value.cluster_key() == b.normalized_value.cluster_key(),
    }
}

/// Cluster candidates and compute base scores
///
/// Clusters are returned sorted by score (highest first), ties broken by best
/// tier and then by first member index.
pub fn cluster_candidates(candidates: &[ValidatedCandidate], tolerance: ClusterTolerance) -> Vec<Cluster> {
    let n = candidates.len();
    let mut forest = UnionFind::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            if same_value(&candidates[i], &candidates[j], tolerance) {
                forest.union(i, j);
            }
        }
    }

    let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
    for i in 0..n {
        let root = forest.find(i);
        match groups.iter_mut().find(|(r, _)| *r == root) {
            Some((_, members)) => members.push(i),
            None => groups.push((root, vec![i])),
        }
    }

    let mut clusters: Vec<Cluster> = groups
        .into_iter()
        .filter_map(|(_, members)| {
            let representative = members
                .iter()
                .copied()
                .min_by(|a, b| rank_candidates(candidates, *a, *b))?;
            let base_score = members.iter().map(|i| candidates[*i].support()).sum();
            Some(Cluster {
                best_tier: candidates[representative].tier(),
                members,
                base_score,
                bonus: 0.0,
                representative,
            })
        })
        .collect();

    sort_clusters(&mut clusters);
    clusters
}

pub fn sort_clusters(clusters: &mut [Cluster]) {
    clusters.sort_by(|a, b| {
        b.score()
            .total_cmp(&a.score())
            .then_with(|| a.best_tier.cmp(&b.best_tier))
            .then_with(|| a.members[0].cmp(&b.members[0]))
    });
}
