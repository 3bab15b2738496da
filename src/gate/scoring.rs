//! Scoring helpers for evaluation collaborators.
//!
//! Each function maps an observation of the agent's result against the human
//! reference to a score in [0, 1]. The gate itself only consumes the
//! resulting metrics vector.

use std::collections::{BTreeMap, HashSet};

/// Default gate thresholds for the standard metric set.
pub const DEFAULT_GATES: [(&str, f64); 5] = [
    ("file_correctness", 0.8),
    ("trajectory_similarity", 0.7),
    ("code_quality", 0.7),
    ("completeness", 0.9),
    ("efficiency", 0.6),
];

/// `correct / (correct + missed + extra)` over the sets of touched files;
/// 1.0 when both sets are empty.
pub fn file_correctness<S: AsRef<str>>(baseline: &[S], agent: &[S]) -> f64 {
    let baseline: HashSet<&str> = baseline.iter().map(AsRef::as_ref).collect();
    let agent: HashSet<&str> = agent.iter().map(AsRef::as_ref).collect();

    let correct = baseline.intersection(&agent).count();
    let missed = baseline.difference(&agent).count();
    let extra = agent.difference(&baseline).count();

    let total = correct + missed + extra;
    if total == 0 {
        return 1.0;
    }
    correct as f64 / total as f64
}

/// Sequence similarity `2M / T` between two decision sequences, where M is
/// the number of elements in matching blocks and T the combined length.
pub fn trajectory_similarity<S: AsRef<str>>(baseline: &[S], agent: &[S]) -> f64 {
    if baseline.is_empty() && agent.is_empty() {
        return 1.0;
    }
    if baseline.is_empty() || agent.is_empty() {
        return 0.0;
    }
    let a: Vec<&str> = baseline.iter().map(AsRef::as_ref).collect();
    let b: Vec<&str> = agent.iter().map(AsRef::as_ref).collect();
    let matched = matching_elements(&a, &b);
    2.0 * matched as f64 / (a.len() + b.len()) as f64
}

/// Elements covered by matching blocks: the longest common contiguous run,
/// then recursively the parts to its left and right.
fn matching_elements(a: &[&str], b: &[&str]) -> usize {
    let mut stack = vec![(0, a.len(), 0, b.len())];
    let mut matched = 0;
    while let Some((alo, ahi, blo, bhi)) = stack.pop() {
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            stack.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            stack.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest common block in `a[alo..ahi]` and `b[blo..bhi]`, earliest first.
fn longest_match(a: &[&str], b: &[&str], alo: usize, ahi: usize, blo: usize, bhi: usize) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    // run lengths ending at (i - 1, j) for the previous row
    let mut prev = vec![0usize; bhi - blo + 1];
    for i in alo..ahi {
        let mut row = vec![0usize; bhi - blo + 1];
        for j in blo..bhi {
            if a[i] == b[j] {
                let k = prev[j - blo] + 1;
                row[j - blo + 1] = k;
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            }
        }
        prev = row;
    }
    (best_i, best_j, best_k)
}

/// Quality indicators observed in the agent's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityIndicators {
    pub has_tests: bool,
    pub has_type_hints: bool,
    pub has_error_handling: bool,
    pub follows_conventions: bool,
}

impl Default for QualityIndicators {
    fn default() -> Self {
        Self {
            has_tests: false,
            has_type_hints: false,
            has_error_handling: false,
            follows_conventions: true,
        }
    }
}

/// Weighted sum: tests 0.3, type hints 0.2, error handling 0.2, conventions 0.3.
pub fn code_quality(indicators: QualityIndicators) -> f64 {
    [
        (indicators.has_tests, 0.3),
        (indicators.has_type_hints, 0.2),
        (indicators.has_error_handling, 0.2),
        (indicators.follows_conventions, 0.3),
    ]
    .iter()
    .filter(|(present, _)| *present)
    .map(|(_, weight)| weight)
    .sum()
}

/// 0.6 × fraction of requirements met + 0.2 if tests pass + 0.2 if nothing
/// blocks. No requirements scores 0.
pub fn completeness(requirements_met: &[bool], tests_pass: bool, no_blockers: bool) -> f64 {
    if requirements_met.is_empty() {
        return 0.0;
    }
    let met = requirements_met.iter().filter(|m| **m).count() as f64;
    let requirements = met / requirements_met.len() as f64 * 0.6;
    let tests = if tests_pass { 0.2 } else { 0.0 };
    let blockers = if no_blockers { 0.2 } else { 0.0 };
    requirements + tests + blockers
}

/// Average of tool-call and wall-time efficiency, each tiered by the ratio
/// against the baseline. A zero baseline scores 1.0 for that half.
pub fn efficiency(tool_calls: u64, baseline_tool_calls: u64, elapsed_ms: u64, baseline_elapsed_ms: u64) -> f64 {
    let tool = if baseline_tool_calls == 0 {
        1.0
    } else {
        match tool_calls as f64 / baseline_tool_calls as f64 {
            r if r <= 1.0 => 1.0,
            r if r <= 1.5 => 0.8,
            r if r <= 2.0 => 0.6,
            _ => 0.4,
        }
    };
    let time = if baseline_elapsed_ms == 0 {
        1.0
    } else {
        match elapsed_ms as f64 / baseline_elapsed_ms as f64 {
            r if r <= 1.5 => 1.0,
            r if r <= 2.0 => 0.8,
            r if r <= 3.0 => 0.6,
            _ => 0.4,
        }
    };
    tool * 0.5 + time * 0.5
}

/// Per-metric pass flags; a metric without a gate passes against 0.0.
pub fn evaluate_pass_gates(scores: &BTreeMap<String, f64>, gates: &BTreeMap<String, f64>) -> BTreeMap<String, bool> {
    scores
        .iter()
        .map(|(name, score)| {
            let gate = gates.get(name).copied().unwrap_or(0.0);
            (name.clone(), *score >= gate)
        })
        .collect()
}

/// True iff every metric passed.
pub fn overall_pass(results: &BTreeMap<String, bool>) -> bool {
    results.values().all(|passed| *passed)
}

/// `(current - previous) / previous`; from a zero baseline any positive
/// score counts as 1.0.
pub fn improvement_rate(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return if current > 0.0 { 1.0 } else { 0.0 };
    }
    (current - previous) / previous
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_file_correctness() {
        assert!(approx(file_correctness(&["a.rs", "b.rs"], &["a.rs", "b.rs"]), 1.0));
        // 1 correct, 1 missed, 1 extra
        assert!(approx(file_correctness(&["a.rs", "b.rs"], &["a.rs", "c.rs"]), 1.0 / 3.0));
        let empty: [&str; 0] = [];
        assert!(approx(file_correctness(&empty, &empty), 1.0));
    }

    #[test]
    fn test_trajectory_similarity() {
        let baseline = ["read", "plan", "edit", "test"];
        assert!(approx(trajectory_similarity(&baseline, &baseline), 1.0));
        // matching blocks: [read, plan] and [test] -> 2 * 3 / 8
        assert!(approx(
            trajectory_similarity(&baseline, &["read", "plan", "grep", "test"]),
            0.75
        ));
        let empty: [&str; 0] = [];
        assert!(approx(trajectory_similarity(&empty, &empty), 1.0));
        assert!(approx(trajectory_similarity(&baseline, &empty), 0.0));
    }

    #[test]
    fn test_trajectory_similarity_reordered() {
        // "abcd" vs "bcda": longest block "bcd" only
        let a = ["a", "b", "c", "d"];
        let b = ["b", "c", "d", "a"];
        assert!(approx(trajectory_similarity(&a, &b), 0.75));
    }

    #[test]
    fn test_code_quality_weights() {
        assert!(approx(code_quality(QualityIndicators::default()), 0.3));
        let all = QualityIndicators {
            has_tests: true,
            has_type_hints: true,
            has_error_handling: true,
            follows_conventions: true,
        };
        assert!(approx(code_quality(all), 1.0));
    }

    #[test]
    fn test_completeness() {
        assert!(approx(completeness(&[true, false], true, true), 0.7));
        assert!(approx(completeness(&[true, true], false, false), 0.6));
        assert!(approx(completeness(&[], true, true), 0.0));
    }

    #[test]
    fn test_efficiency_tiers() {
        assert!(approx(efficiency(10, 10, 100, 100), 1.0));
        assert!(approx(efficiency(14, 10, 250, 100), 0.8 * 0.5 + 0.6 * 0.5));
        assert!(approx(efficiency(30, 10, 1000, 100), 0.4));
        assert!(approx(efficiency(5, 0, 5, 0), 1.0));
    }

    #[test]
    fn test_pass_gates() {
        let scores: BTreeMap<String, f64> =
            [("completeness".to_string(), 0.85), ("custom".to_string(), 0.1)].into_iter().collect();
        let gates: BTreeMap<String, f64> = DEFAULT_GATES.iter().map(|(n, t)| (n.to_string(), *t)).collect();

        let results = evaluate_pass_gates(&scores, &gates);
        assert!(!results["completeness"]);
        assert!(results["custom"]);
        assert!(!overall_pass(&results));
    }

    #[test]
    fn test_improvement_rate() {
        assert!(approx(improvement_rate(0.75, 0.5), 0.5));
        assert!(approx(improvement_rate(0.4, 0.5), -0.2));
        assert!(approx(improvement_rate(0.3, 0.0), 1.0));
        assert!(approx(improvement_rate(0.0, 0.0), 0.0));
    }
}
