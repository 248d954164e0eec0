//! Benchmark tests and hyper-parameter optimisation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use super::mismatch;
use crate::cache::SharedResources;
use crate::channels::OutboundMessage;
use crate::engines::OptimizationProblem;
use crate::error::{EngineError, HandlerError};
use crate::task::{BenchmarkMode, TaskKind, TaskPayload, TaskRequest};
use crate::worker::{TaskHandler, WorkerId};

/// `base` with `parameter` set to `value`.
fn with_parameter(base: &Value, parameter: &str, value: f64) -> Result<Value, EngineError> {
    let mut config = match base {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        _ => return Err(EngineError::InvalidInput("engine config must be an object".into())),
    };
    config.insert(parameter.to_string(), Value::from(value));
    Ok(Value::Object(config))
}

/// Add the `avg` entry: the mean of every score, 0.0 when there is none.
fn with_average(mut scores: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let avg = if scores.is_empty() {
        0.0
    } else {
        scores.values().sum::<f64>() / scores.len() as f64
    };
    scores.insert("avg".to_string(), avg);
    scores
}

/// Weighted mean of the named benchmark scores. Zero total weight scores 0.0.
fn weighted_mean(scores: &BTreeMap<String, f64>, weights: &BTreeMap<String, f64>) -> Result<f64, EngineError> {
    let mut total = 0.0;
    let mut weight_sum = 0.0;
    for (name, weight) in weights {
        let score = scores
            .get(name)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown benchmark `{name}`")))?;
        total += weight * score;
        weight_sum += weight;
    }
    if weight_sum == 0.0 {
        return Ok(0.0);
    }
    Ok(total / weight_sum)
}

pub struct BenchmarkTestHandler {
    resources: Arc<SharedResources>,
}

impl BenchmarkTestHandler {
    pub fn new(resources: Arc<SharedResources>) -> Self {
        Self { resources }
    }
}

impl TaskHandler for BenchmarkTestHandler {
    fn handle(&self, worker: WorkerId, request: &TaskRequest) -> Result<(), HandlerError> {
        let TaskPayload::BenchmarkTest(test) = request.payload() else {
            return Err(mismatch(request, TaskKind::BenchmarkTest));
        };
        let runner = self.resources.backend().benchmark_runner();

        let message = match test.mode {
            BenchmarkMode::Single => {
                let scores = with_average(runner.run(&test.task, &test.engine_config, &self.resources)?);
                OutboundMessage::HpoSingleTestBenchmarkResults {
                    task: test.task.clone(),
                    scores,
                }
            }
            BenchmarkMode::Curve => {
                let curve = test.curve.as_ref().ok_or_else(|| {
                    EngineError::InvalidInput("curve mode needs curve parameters".into())
                })?;
                let mut results = BTreeMap::new();
                for (point, value) in &curve.points {
                    let config = with_parameter(&test.engine_config, &curve.parameter, *value)?;
                    let scores = with_average(runner.run(&test.task, &config, &self.resources)?);
                    debug!(worker = %worker, parameter = %curve.parameter, value, "Curve point scored");
                    results.insert(*point, scores);
                }
                OutboundMessage::HpoCurveTestBenchmarkResults {
                    task: test.task.clone(),
                    parameter: curve.parameter.clone(),
                    results,
                }
            }
        };

        info!(worker = %worker, task = %test.task, mode = ?test.mode, "Benchmark test done");
        request.client().send(message);
        Ok(())
    }
}

pub struct HyperParamHandler {
    resources: Arc<SharedResources>,
}

impl HyperParamHandler {
    pub fn new(resources: Arc<SharedResources>) -> Self {
        Self { resources }
    }
}

impl TaskHandler for HyperParamHandler {
    fn handle(&self, worker: WorkerId, request: &TaskRequest) -> Result<(), HandlerError> {
        let TaskPayload::HyperParamOptimization(hpo) = request.payload() else {
            return Err(mismatch(request, TaskKind::HyperParamOptimization));
        };
        if hpo.benchmarks.is_empty() {
            return Err(EngineError::InvalidInput("no benchmark to optimise".into()).into());
        }
        let backend = self.resources.backend();
        let optimizer = backend.optimizer(&hpo.algorithm)?;
        let runner = backend.benchmark_runner();
        let client = request.client();

        let problem = OptimizationProblem {
            base_config: &hpo.base_config,
            ranges: &hpo.ranges,
            params: &hpo.algorithm_params,
        };
        let mut evaluate = |config: &Value| -> Result<f64, EngineError> {
            let scores = runner.run(&hpo.task, config, &self.resources)?;
            weighted_mean(&scores, &hpo.benchmarks)
        };
        let mut progress = |step: &crate::engines::OptimizationStep| {
            client.send(OutboundMessage::HpoAlgoOptiUpdate {
                request_id: hpo.request_id,
                iteration: step.iteration,
                config: step.config.clone(),
                score: step.score,
                best_score: step.best_score,
            });
        };

        let best = optimizer.optimize(&problem, &mut evaluate, &mut progress)?;
        info!(
            worker = %worker,
            request_id = hpo.request_id,
            algorithm = %optimizer.name(),
            score = best.score,
            "Hyper-parameter optimisation done"
        );
        client.send(OutboundMessage::HpoAlgoOptiResult {
            request_id: hpo.request_id,
            config: best.config,
            score: best.score,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ClientHandle;
    use crate::handlers::testing::{drain, fixture};
    use crate::task::{BenchmarkTestRequest, CurveParameters, HyperParamRequest, ParameterRange};
    use serde_json::json;
    use std::path::Path;

    fn write_benchmark(root: &Path) {
        let dir = root.join("benchmarks/search");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("faq.json"),
            serde_json::to_string(&json!({
                "dataset": "demo",
                "user_id": "alice",
                "queries": [
                    { "query": "release date", "expected": ["m2"] },
                    { "query": "lunch tomorrow", "expected": ["m4"] }
                ]
            }))
            .unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn single_mode_scores_every_benchmark() {
        let (dir, resources) = fixture();
        write_benchmark(dir.path());
        let handler = BenchmarkTestHandler::new(resources);
        let (client, mut rx) = ClientHandle::new("c");
        let request = TaskRequest::new(
            client,
            BenchmarkTestRequest {
                task: "search".into(),
                engine_config: json!({ "top_k": 5 }),
                mode: BenchmarkMode::Single,
                curve: None,
            },
        );

        handler.handle(WorkerId(0), &request).unwrap();
        let messages = drain(&mut rx);
        let [OutboundMessage::HpoSingleTestBenchmarkResults { scores, .. }] = &messages[..] else {
            panic!("unexpected {messages:?}");
        };
        assert_eq!(scores.get("faq"), Some(&1.0));
        assert_eq!(scores.get("avg"), Some(&1.0));
    }

    #[test]
    fn average_covers_every_benchmark() {
        let scores = with_average(BTreeMap::from([("a".to_string(), 1.0), ("b".to_string(), 0.5)]));
        assert_eq!(scores.get("avg"), Some(&0.75));
        assert_eq!(with_average(BTreeMap::new()).get("avg"), Some(&0.0));
    }

    #[test]
    fn objective_is_a_weighted_mean() {
        let scores = BTreeMap::from([("faq".to_string(), 1.0), ("chat".to_string(), 0.0)]);
        let weights = BTreeMap::from([("faq".to_string(), 3.0), ("chat".to_string(), 1.0)]);
        assert_eq!(weighted_mean(&scores, &weights).unwrap(), 0.75);

        let zero = BTreeMap::from([("faq".to_string(), 0.0)]);
        assert_eq!(weighted_mean(&scores, &zero).unwrap(), 0.0);

        let unknown = BTreeMap::from([("nope".to_string(), 1.0)]);
        assert!(matches!(
            weighted_mean(&scores, &unknown),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn curve_mode_runs_once_per_point() {
        let (dir, resources) = fixture();
        write_benchmark(dir.path());
        let handler = BenchmarkTestHandler::new(resources);
        let (client, mut rx) = ClientHandle::new("c");
        let request = TaskRequest::new(
            client,
            BenchmarkTestRequest {
                task: "search".into(),
                engine_config: json!({}),
                mode: BenchmarkMode::Curve,
                curve: Some(CurveParameters {
                    parameter: "keyword_weight".into(),
                    points: BTreeMap::from([(0, 0.0), (1, 0.5), (2, 1.0)]),
                }),
            },
        );

        handler.handle(WorkerId(0), &request).unwrap();
        let messages = drain(&mut rx);
        let [OutboundMessage::HpoCurveTestBenchmarkResults { results, parameter, .. }] = &messages[..] else {
            panic!("unexpected {messages:?}");
        };
        assert_eq!(parameter, "keyword_weight");
        assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(results.values().all(|scores| scores.contains_key("avg")));
    }

    #[test]
    fn unsupported_task_is_a_handler_error() {
        let (_dir, resources) = fixture();
        let handler = BenchmarkTestHandler::new(resources);
        let (client, _rx) = ClientHandle::new("c");
        let request = TaskRequest::new(
            client,
            BenchmarkTestRequest {
                task: "ner".into(),
                engine_config: json!({}),
                mode: BenchmarkMode::Single,
                curve: None,
            },
        );
        let err = handler.handle(WorkerId(0), &request).unwrap_err();
        assert!(matches!(err, HandlerError::Engine(EngineError::Unsupported(_))));
    }

    #[test]
    fn optimisation_streams_updates_then_result() {
        let (dir, resources) = fixture();
        write_benchmark(dir.path());
        let handler = HyperParamHandler::new(resources);
        let (client, mut rx) = ClientHandle::new("c");
        let request = TaskRequest::new(
            client,
            HyperParamRequest {
                request_id: 9,
                task: "search".into(),
                base_config: json!({ "top_k": 5 }),
                ranges: vec![ParameterRange {
                    name: "keyword_weight".into(),
                    min: 0.2,
                    max: 0.8,
                    integer: false,
                }],
                benchmarks: BTreeMap::from([("faq".to_string(), 2.0)]),
                algorithm: "random_search".into(),
                algorithm_params: json!({ "iterations": 3, "seed": 1 })
                    .as_object()
                    .cloned()
                    .unwrap(),
            },
        );

        handler.handle(WorkerId(0), &request).unwrap();
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 4);
        assert!(
            messages[..3]
                .iter()
                .all(|m| matches!(m, OutboundMessage::HpoAlgoOptiUpdate { request_id: 9, .. }))
        );
        let OutboundMessage::HpoAlgoOptiResult { score, config, .. } = &messages[3] else {
            panic!("unexpected {:?}", messages[3]);
        };
        // Weighted mean of hit rates, so never above 1.0 whatever the weights.
        assert!((0.0..=1.0).contains(score));
        assert!(config.get("keyword_weight").is_some());
    }
}
