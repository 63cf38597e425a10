//! Similarity metrics and running top-k selection.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

/// Similarity metric for vector search. Both score "higher is closer":
/// L2 reports the negated squared distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    L2,
}

impl Metric {
    pub fn score(self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(query, candidate),
            Self::L2 => neg_l2_squared(query, candidate),
        }
    }
}

/// Cosine similarity; zero-norm inputs score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Negated squared Euclidean distance.
pub fn neg_l2_squared(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::NEG_INFINITY;
    }
    -a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
}

#[derive(Debug)]
struct Candidate {
    score: f32,
    seq: u64,
    id: String,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher score wins; on a tie the earlier scan position wins.
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounded selector keeping the best k candidates seen so far, without
/// sorting the whole stream. Push order is the scan order used for
/// tie-breaks.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    next_seq: u64,
    heap: BinaryHeap<Reverse<Candidate>>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            next_seq: 0,
            heap: BinaryHeap::with_capacity(k.saturating_add(1)),
        }
    }

    pub fn push(&mut self, id: String, score: f32) {
        let candidate = Candidate {
            score,
            seq: self.next_seq,
            id,
        };
        self.next_seq += 1;

        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Reverse(candidate));
            return;
        }
        // Replace the worst kept candidate only on a strict improvement,
        // so score ties keep the earlier arrival.
        if self
            .heap
            .peek()
            .is_some_and(|Reverse(worst)| candidate > *worst)
        {
            self.heap.pop();
            self.heap.push(Reverse(candidate));
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Lowest kept score, once the selector is full.
    pub fn threshold(&self) -> Option<f32> {
        if self.heap.len() < self.k {
            return None;
        }
        self.heap.peek().map(|Reverse(worst)| worst.score)
    }

    /// Drain into (id, score) ranked by descending score, scan order on
    /// ties.
    pub fn into_ranked(self) -> Vec<(String, f32)> {
        let mut out: Vec<Candidate> = self.heap.into_iter().map(|Reverse(c)| c).collect();
        out.sort_by(|a, b| b.cmp(a));
        out.into_iter().map(|c| (c.id, c.score)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        // Zero norm scores zero instead of NaN.
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        // Length mismatch scores zero.
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_neg_l2() {
        assert_eq!(neg_l2_squared(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
        assert_eq!(neg_l2_squared(&[0.0, 0.0], &[3.0, 4.0]), -25.0);
        assert!(neg_l2_squared(&[0.0], &[3.0, 4.0]).is_infinite());
    }

    #[test]
    fn test_topk_keeps_best() {
        let mut topk = TopK::new(2);
        topk.push("a".to_string(), 0.1);
        topk.push("b".to_string(), 0.9);
        topk.push("c".to_string(), 0.5);
        topk.push("d".to_string(), 0.8);

        let ranked = topk.into_ranked();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "b");
        assert_eq!(ranked[1].0, "d");
        assert!(ranked[0].1 >= ranked[1].1);
    }

    #[test]
    fn test_topk_tie_favors_earlier_push() {
        let mut topk = TopK::new(2);
        topk.push("first".to_string(), 0.5);
        topk.push("second".to_string(), 0.5);
        topk.push("third".to_string(), 0.5);

        let ranked = topk.into_ranked();
        assert_eq!(ranked[0].0, "first");
        assert_eq!(ranked[1].0, "second");
    }

    #[test]
    fn test_topk_threshold_and_sizes() {
        let mut topk = TopK::new(3);
        assert!(topk.is_empty());
        assert_eq!(topk.threshold(), None);
        for (i, score) in [0.2, 0.9, 0.4].into_iter().enumerate() {
            topk.push(format!("v{i}"), score);
        }
        assert_eq!(topk.len(), 3);
        assert_eq!(topk.threshold(), Some(0.2));
        topk.push("better".to_string(), 0.5);
        assert_eq!(topk.threshold(), Some(0.4));
    }

    #[test]
    fn test_topk_zero_k() {
        let mut topk = TopK::new(0);
        topk.push("a".to_string(), 1.0);
        assert!(topk.into_ranked().is_empty());
    }

    #[test]
    fn test_ranked_strictly_descending_with_stable_ties() {
        let mut topk = TopK::new(8);
        let scores = [0.3, 0.7, 0.7, 0.1, 0.9, 0.3];
        for (i, score) in scores.into_iter().enumerate() {
            topk.push(format!("v{i}"), score);
        }
        let ranked = topk.into_ranked();
        for pair in ranked.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
        assert_eq!(ranked[1].0, "v1");
        assert_eq!(ranked[2].0, "v2");
    }
}
