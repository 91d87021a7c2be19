// =============================================================================
// Divergence Indicators
// =============================================================================
//
// Pure, elementwise functions over two aligned net-position slices
// (`a` = first participant, `b` = second).  Every point is an `Option<f64>`:
// `None` marks a date where the indicator has no value (zero denominator, no
// preceding point).  Non-finite results are mapped to `None` so NaN never
// reaches a caller.
// =============================================================================

/// Keep finite values only.
fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

fn pairs<'a>(a: &'a [i64], b: &'a [i64]) -> impl Iterator<Item = (f64, f64)> + 'a {
    a.iter().zip(b).map(|(&x, &y)| (x as f64, y as f64))
}

/// `|a - b|`
pub fn absolute_difference(a: &[i64], b: &[i64]) -> Vec<Option<f64>> {
    pairs(a, b).map(|(x, y)| finite((x - y).abs())).collect()
}

/// `|a - b| / (|a| + |b|)`, undefined where both are zero.
pub fn relative_difference(a: &[i64], b: &[i64]) -> Vec<Option<f64>> {
    pairs(a, b)
        .map(|(x, y)| {
            let denom = x.abs() + y.abs();
            if denom == 0.0 {
                None
            } else {
                finite((x - y).abs() / denom)
            }
        })
        .collect()
}

/// `|(a - b) / a_prev| * 100` where `a_prev` is the previous value of `a`.
/// Undefined on the first point and where `a_prev` is zero.
pub fn percent_delta(a: &[i64], b: &[i64]) -> Vec<Option<f64>> {
    pairs(a, b)
        .enumerate()
        .map(|(i, (x, y))| {
            let prev = *a.get(i.checked_sub(1)?)? as f64;
            if prev == 0.0 {
                None
            } else {
                finite(((x - y) / prev).abs() * 100.0)
            }
        })
        .collect()
}

/// `+1` when `a > b`, otherwise `-1` (ties resolve to `-1`).
pub fn crossover(a: &[i64], b: &[i64]) -> Vec<Option<f64>> {
    a.iter()
        .zip(b)
        .map(|(x, y)| Some(if x > y { 1.0 } else { -1.0 }))
        .collect()
}

/// `|a - b| / max(|a - b|) * 100` over the whole series. Undefined everywhere
/// when the two series never differ.
pub fn divergence_index(a: &[i64], b: &[i64]) -> Vec<Option<f64>> {
    let diffs: Vec<f64> = pairs(a, b).map(|(x, y)| (x - y).abs()).collect();
    let max = diffs.iter().copied().fold(0.0_f64, f64::max);
    if max == 0.0 || !max.is_finite() {
        return vec![None; diffs.len()];
    }
    diffs.into_iter().map(|d| finite(d / max * 100.0)).collect()
}

/// `|a - b| / ((a + b) / 2) * 100`, undefined where the mean is zero.
///
/// The mean is signed, so the result is negative when both participants are
/// net short on balance.
pub fn percentage_difference(a: &[i64], b: &[i64]) -> Vec<Option<f64>> {
    pairs(a, b)
        .map(|(x, y)| {
            let mean = (x + y) / 2.0;
            if mean == 0.0 {
                None
            } else {
                finite((x - y).abs() / mean * 100.0)
            }
        })
        .collect()
}
