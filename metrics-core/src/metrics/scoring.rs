//! Classification scores and the rounding rules used for stored values.

use std::collections::BTreeSet;

/// Round `value` to `decimals` places, halves away from zero.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Round to the nearest whole number, halves to even.
pub fn round_whole(value: f64) -> f64 {
    value.round_ties_even()
}

/// Store a 0..1 score as 0..100: round to 2 decimals, then scale.
pub fn to_stored_score(score: f64) -> f64 {
    (round_to(score, 2) * 100.0).round()
}

/// Fraction of positions where `actual` and `predicted` agree.
pub fn accuracy(actual: &[String], predicted: &[String]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let hits = actual
        .iter()
        .zip(predicted)
        .filter(|(a, p)| a == p)
        .count();
    hits as f64 / n as f64
}

/// F1 averaged uniformly over every label present in either sequence.
///
/// A label that is never predicted, or never actual, scores 0.
pub fn macro_f1(actual: &[String], predicted: &[String]) -> f64 {
    let labels: BTreeSet<&str> = actual
        .iter()
        .chain(predicted)
        .map(String::as_str)
        .collect();
    if labels.is_empty() {
        return 0.0;
    }

    let total: f64 = labels
        .iter()
        .map(|label| {
            let mut tp = 0usize;
            let mut fp = 0usize;
            let mut fn_ = 0usize;
            for (a, p) in actual.iter().zip(predicted) {
                match (a == label, p == label) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }
            let denom = 2 * tp + fp + fn_;
            if denom == 0 {
                0.0
            } else {
                2.0 * tp as f64 / denom as f64
            }
        })
        .sum();
    total / labels.len() as f64
}
