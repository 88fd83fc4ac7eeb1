use crate::models::{Bar, ParameterKind, ParameterRange, ParameterSet, Signal};
use anyhow::anyhow;
use std::collections::BTreeMap;
use std::str::FromStr;

/// A signal generator over a growing bar-history window. The window always
/// ends with the current bar. Implementations may keep per-symbol state
/// (high-water marks, cooldowns, level counters) but must clear it in
/// `reset` so one instance can serve consecutive runs.
pub trait Strategy: Send {
    fn name(&self) -> &str;
    fn min_history(&self) -> usize;
    fn generate_signal(&mut self, symbol: &str, bars: &[Bar]) -> Option<Signal>;
    fn reset(&mut self);
}

#[path = "strategies/moving_average.rs"]
pub mod moving_average;

pub use moving_average::MovingAverageStrategy;

#[path = "strategies/left_side_building.rs"]
pub mod left_side_building;

pub use left_side_building::LeftSideBuildingStrategy;

/// Closed set of strategy variants. The CLI parses into this enum; there is
/// no string-keyed registry behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    MovingAverage,
    LeftSideBuilding,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::MovingAverage => "moving-average",
            StrategyKind::LeftSideBuilding => "left-side-building",
        }
    }

    /// Optimizable parameters with their declared ranges.
    pub fn parameter_ranges(&self) -> BTreeMap<String, ParameterRange> {
        let mut ranges = BTreeMap::new();
        match self {
            StrategyKind::MovingAverage => {
                ranges.insert(
                    "shortPeriod".to_string(),
                    ParameterRange {
                        min: 2.0,
                        max: 20.0,
                        step: 1.0,
                        kind: ParameterKind::Integer,
                    },
                );
                ranges.insert(
                    "longPeriod".to_string(),
                    ParameterRange {
                        min: 10.0,
                        max: 100.0,
                        step: 5.0,
                        kind: ParameterKind::Integer,
                    },
                );
                ranges.insert(
                    "signalThreshold".to_string(),
                    ParameterRange {
                        min: 0.005,
                        max: 0.05,
                        step: 0.005,
                        kind: ParameterKind::Percent,
                    },
                );
                ranges.insert(
                    "volumeMultiplier".to_string(),
                    ParameterRange {
                        min: 1.0,
                        max: 3.0,
                        step: 0.25,
                        kind: ParameterKind::Float,
                    },
                );
            }
            StrategyKind::LeftSideBuilding => {
                ranges.insert(
                    "minDropPercent".to_string(),
                    ParameterRange {
                        min: 0.02,
                        max: 0.15,
                        step: 0.01,
                        kind: ParameterKind::Percent,
                    },
                );
                ranges.insert(
                    "addPositionDropInterval".to_string(),
                    ParameterRange {
                        min: 0.01,
                        max: 0.10,
                        step: 0.01,
                        kind: ParameterKind::Percent,
                    },
                );
                ranges.insert(
                    "maxBuildingTimes".to_string(),
                    ParameterRange {
                        min: 1.0,
                        max: 8.0,
                        step: 1.0,
                        kind: ParameterKind::Integer,
                    },
                );
                ranges.insert(
                    "positionMultiplier".to_string(),
                    ParameterRange {
                        min: 1.0,
                        max: 3.0,
                        step: 0.25,
                        kind: ParameterKind::Float,
                    },
                );
                ranges.insert(
                    "stopLossFromHigh".to_string(),
                    ParameterRange {
                        min: 0.10,
                        max: 0.40,
                        step: 0.05,
                        kind: ParameterKind::Percent,
                    },
                );
            }
        }
        ranges
    }

    pub fn default_parameters(&self) -> ParameterSet {
        let mut params = ParameterSet::new();
        match self {
            StrategyKind::MovingAverage => {
                params.insert("shortPeriod".to_string(), 5.0);
                params.insert("longPeriod".to_string(), 20.0);
                params.insert("signalThreshold".to_string(), 0.01);
                params.insert("volumeMultiplier".to_string(), 1.5);
            }
            StrategyKind::LeftSideBuilding => {
                params.insert("minDropPercent".to_string(), 0.05);
                params.insert("addPositionDropInterval".to_string(), 0.03);
                params.insert("maxBuildingTimes".to_string(), 5.0);
                params.insert("positionMultiplier".to_string(), 1.5);
                params.insert("stopLossFromHigh".to_string(), 0.25);
            }
        }
        params
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ma" | "moving-average" | "moving_average" => Ok(StrategyKind::MovingAverage),
            "left-side" | "left-side-building" | "left_side_building" => {
                Ok(StrategyKind::LeftSideBuilding)
            }
            other => Err(anyhow!("Unknown strategy '{}'", other)),
        }
    }
}

pub fn create_strategy(kind: StrategyKind, parameters: &ParameterSet) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::MovingAverage => Box::new(MovingAverageStrategy::new(parameters)),
        StrategyKind::LeftSideBuilding => Box::new(LeftSideBuildingStrategy::new(parameters)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [StrategyKind::MovingAverage, StrategyKind::LeftSideBuilding] {
            assert_eq!(kind.as_str().parse::<StrategyKind>().unwrap(), kind);
        }
        assert!("unknown".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn default_parameters_lie_within_declared_ranges() {
        for kind in [StrategyKind::MovingAverage, StrategyKind::LeftSideBuilding] {
            let defaults = kind.default_parameters();
            for (name, range) in kind.parameter_ranges() {
                let value = defaults
                    .get(&name)
                    .unwrap_or_else(|| panic!("missing default for {}", name));
                assert!(*value >= range.min && *value <= range.max, "{}", name);
            }
        }
    }
}
