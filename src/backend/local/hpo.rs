//! Random-search hyper-parameter optimiser.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::engines::{HyperParamOptimizer, OptimizationProblem, OptimizationResult, OptimizationStep};
use crate::error::EngineError;

const DEFAULT_ITERATIONS: u64 = 10;

/// Samples every range uniformly, `iterations` times, keeping the best.
pub struct RandomSearch;

impl RandomSearch {
    fn candidate(problem: &OptimizationProblem<'_>, rng: &mut StdRng) -> Result<Value, EngineError> {
        let mut config = match problem.base_config {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            _ => return Err(EngineError::InvalidInput("base config must be an object".into())),
        };
        for range in problem.ranges {
            let value = if range.integer {
                let (lo, hi) = (range.min.ceil() as i64, range.max.floor() as i64);
                if lo > hi {
                    return Err(EngineError::InvalidInput(format!(
                        "range `{}` holds no integer",
                        range.name
                    )));
                }
                Value::from(rng.gen_range(lo..=hi))
            } else {
                Value::from(rng.gen_range(range.min..=range.max))
            };
            config.insert(range.name.clone(), value);
        }
        Ok(Value::Object(config))
    }
}

impl HyperParamOptimizer for RandomSearch {
    fn name(&self) -> &str {
        "random_search"
    }

    fn optimize(
        &self,
        problem: &OptimizationProblem<'_>,
        evaluate: &mut dyn FnMut(&Value) -> Result<f64, EngineError>,
        progress: &mut dyn FnMut(&OptimizationStep),
    ) -> Result<OptimizationResult, EngineError> {
        if let Some(bad) = problem.ranges.iter().find(|r| !(r.min <= r.max)) {
            return Err(EngineError::InvalidInput(format!(
                "range `{}` has min > max",
                bad.name
            )));
        }
        let iterations = match problem.params.get("iterations") {
            None => DEFAULT_ITERATIONS,
            Some(v) => v
                .as_u64()
                .filter(|n| *n > 0)
                .ok_or_else(|| EngineError::InvalidInput("iterations must be a positive integer".into()))?,
        };
        let mut rng = match problem.params.get("seed").and_then(Value::as_u64) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut best: Option<OptimizationResult> = None;
        for iteration in 0..iterations as usize {
            let config = Self::candidate(problem, &mut rng)?;
            let score = evaluate(&config)?;
            if best.as_ref().is_none_or(|b| score > b.score) {
                best = Some(OptimizationResult {
                    config: config.clone(),
                    score,
                });
            }
            let best_score = best.as_ref().map_or(score, |b| b.score);
            progress(&OptimizationStep {
                iteration,
                config,
                score,
                best_score,
            });
        }

        best.ok_or_else(|| EngineError::Failed("no candidate evaluated".into()))
    }
}
