use crate::models::{ParameterRange, ParameterSet};
use std::collections::{BTreeMap, HashSet};

/// Extract a parameter as usize with a default value
pub fn get_param_usize(params: &ParameterSet, key: &str, default: usize) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(0.0) as usize)
        .unwrap_or(default)
}

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &ParameterSet, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(
    params: &ParameterSet,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let raw = params.get(key).copied().unwrap_or(default);
    if !raw.is_finite() {
        return default;
    }
    raw.clamp(min, max)
}

/// Extract a boolean parameter; anything >= 0.5 counts as true
pub fn get_param_bool(params: &ParameterSet, key: &str, default: bool) -> bool {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v >= 0.5)
        .unwrap_or(default)
}

/// Extract a parameter as usize with a minimum value
pub fn get_param_usize_at_least(
    params: &ParameterSet,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(min as f64) as usize)
        .unwrap_or(default)
}

/// Clamp and snap every known parameter to its declared range
pub fn snap_to_ranges(params: &mut ParameterSet, ranges: &BTreeMap<String, ParameterRange>) {
    for (key, range) in ranges {
        if let Some(value) = params.get_mut(key) {
            *value = range.snap(*value);
        }
    }
}

/// Normalized (by range width) Euclidean distance between two parameter sets
/// over the declared ranges. Parameters absent from either set are skipped.
pub fn normalized_distance(
    a: &ParameterSet,
    b: &ParameterSet,
    ranges: &BTreeMap<String, ParameterRange>,
) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (key, range) in ranges {
        let (Some(left), Some(right)) = (a.get(key), b.get(key)) else {
            continue;
        };
        let delta = (left - right) / range.width();
        sum += delta * delta;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64).sqrt()
}

fn variation_key(params: &ParameterSet) -> String {
    format!("{:?}", params)
}

/// Candidate values around `current` at +/- step multiples, snapped and
/// deduplicated. Used by the grid search sweep.
pub fn candidate_values(range: &ParameterRange, current: f64, step_multipliers: &[f64]) -> Vec<f64> {
    let mut seen = Vec::new();
    for &multiplier in step_multipliers {
        let candidate = range.snap(current + multiplier * range.step);
        if (candidate - current).abs() < 1e-9 {
            continue;
        }
        if seen.iter().any(|v: &f64| (v - candidate).abs() < 1e-9) {
            continue;
        }
        seen.push(candidate);
    }
    seen
}

/// Add neighbor parameter variations by adjusting one parameter at a time
pub fn add_single_parameter_neighbor_variations(
    ranges: &BTreeMap<String, ParameterRange>,
    step_multipliers: &[f64],
    current_params: &ParameterSet,
    seen_variations: &mut HashSet<String>,
    neighbor_variations: &mut Vec<ParameterSet>,
) {
    for (param, range) in ranges {
        let current_value = match current_params.get(param) {
            Some(v) => *v,
            None => continue,
        };

        for candidate in candidate_values(range, current_value, step_multipliers) {
            let mut neighbor_params = current_params.clone();
            neighbor_params.insert(param.clone(), candidate);

            if seen_variations.insert(variation_key(&neighbor_params)) {
                neighbor_variations.push(neighbor_params);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParameterKind;

    fn ranges() -> BTreeMap<String, ParameterRange> {
        let mut map = BTreeMap::new();
        map.insert(
            "shortPeriod".to_string(),
            ParameterRange {
                min: 2.0,
                max: 20.0,
                step: 1.0,
                kind: ParameterKind::Integer,
            },
        );
        map.insert(
            "signalThreshold".to_string(),
            ParameterRange {
                min: 0.005,
                max: 0.05,
                step: 0.005,
                kind: ParameterKind::Percent,
            },
        );
        map
    }

    #[test]
    fn neighbor_variations_change_one_parameter_each() {
        let ranges = ranges();
        let mut current = ParameterSet::new();
        current.insert("shortPeriod".to_string(), 5.0);
        current.insert("signalThreshold".to_string(), 0.01);

        let mut seen = HashSet::new();
        let mut variations = Vec::new();
        add_single_parameter_neighbor_variations(
            &ranges,
            &[-2.0, -1.0, 1.0, 2.0],
            &current,
            &mut seen,
            &mut variations,
        );

        assert!(!variations.is_empty());
        for variation in &variations {
            let changed = variation
                .iter()
                .filter(|(k, v)| (current.get(*k).unwrap() - **v).abs() > 1e-9)
                .count();
            assert_eq!(changed, 1);
        }
    }

    #[test]
    fn neighbor_variations_respect_bounds() {
        let ranges = ranges();
        let mut current = ParameterSet::new();
        current.insert("shortPeriod".to_string(), 20.0);
        current.insert("signalThreshold".to_string(), 0.05);

        let mut seen = HashSet::new();
        let mut variations = Vec::new();
        add_single_parameter_neighbor_variations(
            &ranges,
            &[1.0, 2.0],
            &current,
            &mut seen,
            &mut variations,
        );

        // Both parameters already sit at their max; upward steps snap back.
        assert!(variations.is_empty());
    }

    #[test]
    fn normalized_distance_is_zero_for_identical_sets() {
        let ranges = ranges();
        let mut a = ParameterSet::new();
        a.insert("shortPeriod".to_string(), 5.0);
        a.insert("signalThreshold".to_string(), 0.01);
        assert_eq!(normalized_distance(&a, &a.clone(), &ranges), 0.0);

        let mut b = a.clone();
        b.insert("shortPeriod".to_string(), 14.0);
        assert!(normalized_distance(&a, &b, &ranges) > 0.0);
    }
}
