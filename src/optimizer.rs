use crate::config::OptimizerSettings;
use crate::error::EngineError;
use crate::models::{OptimizationRecord, ParameterRange, ParameterSet, PerformanceSummary};
use crate::param_utils::{candidate_values, normalized_distance, snap_to_ranges};
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use rand::Rng;
use std::collections::BTreeMap;
use std::str::FromStr;

const GRID_STEP_MULTIPLIERS: [f64; 4] = [-2.0, -1.0, 1.0, 2.0];
const GA_POPULATION_SIZE: usize = 20;
const GA_GENERATIONS: usize = 10;
const GA_TOURNAMENT_SIZE: usize = 3;
const GA_CROSSOVER_RATE: f64 = 0.8;
const GA_MUTATION_RATE: f64 = 0.1;
const GA_MUTATION_SPAN: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    GridSearch,
    Genetic,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::GridSearch => "grid",
            Algorithm::Genetic => "genetic",
        }
    }
}

impl FromStr for Algorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grid" | "grid-search" | "grid_search" => Ok(Algorithm::GridSearch),
            "genetic" | "ga" => Ok(Algorithm::Genetic),
            other => Err(anyhow!("Unknown optimization algorithm '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub new_params: ParameterSet,
    pub expected_improvement: f64,
    pub confidence: f64,
    pub applied: bool,
    pub reason: String,
}

impl OptimizationOutcome {
    fn unchanged(current: &ParameterSet, reason: impl Into<String>) -> Self {
        Self {
            new_params: current.clone(),
            expected_improvement: 0.0,
            confidence: 0.0,
            applied: false,
            reason: reason.into(),
        }
    }
}

/// Composite fitness over normalized metrics. Weights favor return and
/// risk-adjusted return, then drawdown, win rate and profit factor.
pub fn composite_score(metrics: &PerformanceSummary) -> f64 {
    let norm_return = metrics.total_return.clamp(-1.0, 1.0) * 0.5 + 0.5;
    let norm_sharpe = (metrics.sharpe_ratio / 3.0).clamp(-1.0, 1.0) * 0.5 + 0.5;
    let norm_drawdown = 1.0 - metrics.max_drawdown.clamp(0.0, 1.0);
    let norm_win_rate = metrics.win_rate.clamp(0.0, 1.0);
    let norm_profit_factor = if metrics.profit_factor.is_finite() {
        let pf = metrics.profit_factor.max(0.0);
        pf / (1.0 + pf)
    } else {
        1.0
    };

    0.30 * norm_return
        + 0.25 * norm_sharpe
        + 0.20 * norm_drawdown
        + 0.15 * norm_win_rate
        + 0.10 * norm_profit_factor
}

/// Similarity-weighted performance estimate: blends historical records'
/// composite scores, weighted by closeness in normalized parameter space.
/// This deliberately estimates instead of running a nested backtest per
/// candidate; the confidence reflects how much nearby history exists.
pub fn estimate_performance(
    params: &ParameterSet,
    ranges: &BTreeMap<String, ParameterRange>,
    history: &[OptimizationRecord],
) -> (f64, f64) {
    if history.is_empty() {
        return (0.0, 0.0);
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for record in history {
        let distance = normalized_distance(params, &record.parameters, ranges);
        let weight = 1.0 / (1.0 + distance);
        weighted_sum += weight * composite_score(&record.metrics);
        weight_total += weight;
    }

    let score = weighted_sum / weight_total;
    let confidence = weight_total / (weight_total + 1.0);
    (score, confidence)
}

/// Searches parameter space for a better configuration and decides whether
/// the move is safe to apply. Attempts are rate-limited independently of how
/// often `optimize` is called.
pub struct ParameterOptimizer {
    settings: OptimizerSettings,
    last_attempt: Option<DateTime<Utc>>,
}

impl ParameterOptimizer {
    pub fn new(settings: OptimizerSettings) -> Self {
        Self {
            settings,
            last_attempt: None,
        }
    }

    pub fn optimize(
        &mut self,
        current: &ParameterSet,
        ranges: &BTreeMap<String, ParameterRange>,
        history: &[OptimizationRecord],
        algorithm: Algorithm,
        now: DateTime<Utc>,
    ) -> Result<OptimizationOutcome, EngineError> {
        if !self.settings.enabled {
            return Err(EngineError::Optimization(
                "optimizer is disabled by configuration".to_string(),
            ));
        }

        if let Some(last) = self.last_attempt {
            let gap = Duration::hours(self.settings.adjustment_frequency_hours);
            if now - last < gap {
                debug!(
                    "Optimization throttled: last attempt at {}, frequency {}h",
                    last, self.settings.adjustment_frequency_hours
                );
                return Ok(OptimizationOutcome::unchanged(current, "throttled"));
            }
        }
        self.last_attempt = Some(now);

        if history.is_empty() {
            return Ok(OptimizationOutcome::unchanged(
                current,
                "no performance history to estimate against",
            ));
        }

        let mut current = current.clone();
        snap_to_ranges(&mut current, ranges);
        let (current_score, _) = estimate_performance(&current, ranges, history);

        let candidate = match algorithm {
            Algorithm::GridSearch => self.grid_search(&current, ranges, history),
            Algorithm::Genetic => self.genetic_search(&current, ranges, history),
        };
        let (candidate_score, confidence) = estimate_performance(&candidate, ranges, history);

        let expected_improvement = if current_score.abs() > 1e-9 {
            (candidate_score - current_score) / current_score.abs()
        } else {
            candidate_score - current_score
        };
        let change_magnitude = normalized_distance(&current, &candidate, ranges);

        let mut reason = format!(
            "{}: score {:.4} -> {:.4}",
            algorithm.as_str(),
            current_score,
            candidate_score
        );
        let applied = if expected_improvement < self.settings.min_expected_improvement {
            reason = format!(
                "expected improvement {:.2}% below the {:.0}% floor",
                expected_improvement * 100.0,
                self.settings.min_expected_improvement * 100.0
            );
            false
        } else if confidence < self.settings.min_confidence {
            reason = format!(
                "confidence {:.2} below the {:.2} floor",
                confidence, self.settings.min_confidence
            );
            false
        } else if change_magnitude > self.settings.adjustment_magnitude {
            reason = format!(
                "parameter change magnitude {:.3} exceeds the {:.3} cap",
                change_magnitude, self.settings.adjustment_magnitude
            );
            false
        } else {
            true
        };

        let outcome = OptimizationOutcome {
            new_params: if applied { candidate } else { current.clone() },
            expected_improvement,
            confidence,
            applied,
            reason,
        };
        info!(
            "Optimization ({}) applied={} improvement={:.2}% confidence={:.2}: {}",
            algorithm.as_str(),
            outcome.applied,
            outcome.expected_improvement * 100.0,
            outcome.confidence,
            outcome.reason
        );
        Ok(outcome)
    }

    /// One greedy sweep: for each parameter independently, try a small
    /// symmetric candidate set around the current value and keep the best
    /// single-parameter change.
    fn grid_search(
        &self,
        current: &ParameterSet,
        ranges: &BTreeMap<String, ParameterRange>,
        history: &[OptimizationRecord],
    ) -> ParameterSet {
        let (mut best_score, _) = estimate_performance(current, ranges, history);
        let mut best = current.clone();

        for (param, range) in ranges {
            let current_value = match current.get(param) {
                Some(value) => *value,
                None => continue,
            };
            for candidate in candidate_values(range, current_value, &GRID_STEP_MULTIPLIERS) {
                let mut variation = current.clone();
                variation.insert(param.clone(), candidate);
                let (score, _) = estimate_performance(&variation, ranges, history);
                if score > best_score {
                    best_score = score;
                    best = variation;
                }
            }
        }

        best
    }

    /// Standard generational GA over the declared ranges: tournament
    /// selection, uniform crossover, per-gene mutation at 10% of range
    /// width, elitist replacement from the parent+offspring pool.
    fn genetic_search(
        &self,
        current: &ParameterSet,
        ranges: &BTreeMap<String, ParameterRange>,
        history: &[OptimizationRecord],
    ) -> ParameterSet {
        let genes: Vec<(&String, &ParameterRange)> = ranges.iter().collect();
        if genes.is_empty() {
            return current.clone();
        }
        let mut rng = rand::thread_rng();

        let decode = |genome: &[f64]| -> ParameterSet {
            let mut params = current.clone();
            for ((name, range), value) in genes.iter().zip(genome.iter()) {
                params.insert((*name).clone(), range.snap(*value));
            }
            params
        };
        let fitness = |genome: &[f64]| -> f64 {
            estimate_performance(&decode(genome), ranges, history).0
        };

        // Seed the population with the current configuration plus random
        // individuals drawn uniformly from each range.
        let mut population: Vec<Vec<f64>> = Vec::with_capacity(GA_POPULATION_SIZE);
        population.push(
            genes
                .iter()
                .map(|(name, range)| current.get(*name).copied().unwrap_or(range.min))
                .collect(),
        );
        while population.len() < GA_POPULATION_SIZE {
            population.push(
                genes
                    .iter()
                    .map(|(_, range)| range.min + rng.gen::<f64>() * (range.max - range.min))
                    .collect(),
            );
        }

        for _generation in 0..GA_GENERATIONS {
            let mut scored: Vec<(f64, Vec<f64>)> = population
                .iter()
                .map(|genome| (fitness(genome), genome.clone()))
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

            let mut offspring: Vec<Vec<f64>> = Vec::with_capacity(GA_POPULATION_SIZE);
            while offspring.len() < GA_POPULATION_SIZE {
                let p1 = Self::tournament_select(&scored, &mut rng);
                let p2 = Self::tournament_select(&scored, &mut rng);
                let mut child = Self::crossover(p1, p2, &mut rng);
                Self::mutate(&mut child, &genes, &mut rng);
                offspring.push(child);
            }

            // Elitist replacement: best of the parent+offspring pool survive.
            let mut pool = scored;
            pool.extend(
                offspring
                    .into_iter()
                    .map(|genome| (fitness(&genome), genome)),
            );
            pool.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            pool.truncate(GA_POPULATION_SIZE);
            population = pool.into_iter().map(|(_, genome)| genome).collect();
        }

        let best = population
            .into_iter()
            .max_by(|a, b| {
                fitness(a)
                    .partial_cmp(&fitness(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or_else(|| genes.iter().map(|(_, range)| range.min).collect());
        decode(&best)
    }

    fn tournament_select<'a>(
        scored: &'a [(f64, Vec<f64>)],
        rng: &mut impl Rng,
    ) -> &'a [f64] {
        // `scored` is sorted best-first, so the lowest sampled index wins.
        let n = scored.len();
        let mut best_rank = rng.gen_range(0..n);
        for _ in 1..GA_TOURNAMENT_SIZE.min(n) {
            let rank = rng.gen_range(0..n);
            if rank < best_rank {
                best_rank = rank;
            }
        }
        &scored[best_rank].1
    }

    fn crossover(p1: &[f64], p2: &[f64], rng: &mut impl Rng) -> Vec<f64> {
        if rng.gen::<f64>() >= GA_CROSSOVER_RATE {
            return p1.to_vec();
        }
        p1.iter()
            .zip(p2.iter())
            .map(|(a, b)| if rng.gen::<bool>() { *a } else { *b })
            .collect()
    }

    fn mutate(genome: &mut [f64], genes: &[(&String, &ParameterRange)], rng: &mut impl Rng) {
        for (value, (_, range)) in genome.iter_mut().zip(genes.iter()) {
            if rng.gen::<f64>() < GA_MUTATION_RATE {
                let span = range.width() * GA_MUTATION_SPAN;
                *value = (*value + (rng.gen::<f64>() * 2.0 - 1.0) * span)
                    .clamp(range.min, range.max);
            }
        }
    }
}
