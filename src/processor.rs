//! Check execution engine.
//!
//! Orchestrates a full run: index the input files once, then for every
//! test resolve its parameters and evaluate each forecast type × lead time
//! combination. Combinations are evaluated on blocking worker threads and
//! their results merged back in combination order, so logs, counters and
//! reports do not depend on scheduling.

pub mod summary;

use crate::checks::Check;
use crate::config::{CheckConfig, RunOptions};
use crate::constants::MEMORY_PRESSURE_THRESHOLD;
use crate::decoder::Decoder;
use crate::error::{GridCheckError, Result};
use crate::index::{MessageIndex, MessageLocator};
use crate::models::{ForecastType, LeadTime, SampleSize, TestDefinition};
use crate::preprocess::Preprocessor;
use crate::reader::FieldReader;
use crate::resolver::{ParameterResolver, ParameterSet, inject};
use crate::sampler::{self, DeterministicRng, SampleOutcome};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use summary::{CheckRecord, RunSummary, TestReport};
use sysinfo::System;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, info};

/// Everything an evaluation task needs, shared across one test
struct TestContext {
    check: Check,
    preprocessor: Preprocessor,
    sample_size: SampleSize,
    reader: FieldReader,
    index: Arc<MessageIndex>,
    seed: u64,
}

/// One forecast type × lead time point with its resolved parameters
struct Combination {
    ordinal: u64,
    forecast_type: ForecastType,
    lead_time: LeadTime,
    parameters: ParameterSet,
}

/// Runs every configured test against a set of input files
pub struct CheckRunner {
    config: CheckConfig,
    decoder: Arc<dyn Decoder>,
    options: RunOptions,
    resolver: ParameterResolver,
    system_monitor: Arc<Mutex<System>>,
    memory_threshold: f64,
    /// Combinations handed out so far, used to derive per-task seeds
    dispatched: u64,
}

impl CheckRunner {
    pub fn new(config: CheckConfig, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            config,
            decoder,
            options: RunOptions::default(),
            resolver: ParameterResolver::new(),
            system_monitor: Arc::new(Mutex::new(System::new())),
            memory_threshold: MEMORY_PRESSURE_THRESHOLD,
            dispatched: 0,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Index the files and run every test
    pub async fn run(&mut self, files: &[PathBuf]) -> Result<RunSummary> {
        let index = MessageLocator::new(Arc::clone(&self.decoder))
            .with_concurrency(self.options.workers())
            .with_progress(self.options.show_progress)
            .build(files)
            .await?;

        self.run_with_index(Arc::new(index)).await
    }

    /// Run every test against an already built index
    pub async fn run_with_index(&mut self, index: Arc<MessageIndex>) -> Result<RunSummary> {
        let seed = self.options.run_seed();
        debug!("Sampling seed {}", seed);

        let mut summary = RunSummary::new();
        let tests = self.config.tests.clone();
        for test in &tests {
            let report = self.run_test(test, Arc::clone(&index), seed).await?;
            summary.absorb(report);
        }

        Ok(summary)
    }

    /// Evaluate one test over the full axis cross-product
    async fn run_test(
        &mut self,
        test: &TestDefinition,
        index: Arc<MessageIndex>,
        seed: u64,
    ) -> Result<TestReport> {
        info!("Running {} test '{}'", test.kind, test.name);

        let context = Arc::new(TestContext {
            check: Check::from_definition(test)?,
            preprocessor: Preprocessor::new(test.preprocess.as_ref())?,
            sample_size: test.sample,
            reader: FieldReader::new(Arc::clone(&self.decoder)),
            index,
            seed,
        });

        let parameters = self.resolver.tie(&test.parameters, &self.config.parameters)?;
        let combinations = self.combinations(&parameters);
        if combinations.is_empty() {
            return Ok(TestReport::default());
        }

        let mut concurrency = self.options.workers().min(combinations.len());
        if self.check_memory_pressure().await {
            concurrency = (concurrency / 2).max(1);
            debug!(
                "Memory pressure detected, reducing concurrency to {}",
                concurrency
            );
        }

        stream::iter(combinations)
            .map(|combination| {
                let context = Arc::clone(&context);
                async move {
                    task::spawn_blocking(move || evaluate(&context, combination))
                        .await
                        .map_err(|e| GridCheckError::TaskFailed {
                            reason: format!("evaluation task panicked: {e}"),
                        })?
                }
            })
            .buffered(concurrency)
            .try_fold(TestReport::default(), |mut report, part| async move {
                report.merge(part);
                Ok(report)
            })
            .await
    }

    /// Build every combination, injecting the forecast type into a fresh
    /// copy of the parameters and then threading each lead time forward
    fn combinations(&mut self, parameters: &ParameterSet) -> Vec<Combination> {
        let mut combinations = Vec::new();

        for forecast_type in &self.config.forecast_types {
            let mut current = parameters.clone();
            inject(&mut current, &forecast_type.conditions());

            for lead_time in &self.config.lead_times {
                inject(&mut current, &lead_time.conditions());
                combinations.push(Combination {
                    ordinal: self.dispatched,
                    forecast_type: *forecast_type,
                    lead_time: *lead_time,
                    parameters: current.clone(),
                });
                self.dispatched += 1;
            }
        }

        combinations
    }

    /// Check if system is under memory pressure
    async fn check_memory_pressure(&self) -> bool {
        let mut system = self.system_monitor.lock().await;
        system.refresh_memory();

        let used_memory = system.used_memory() as f64;
        let total_memory = system.total_memory() as f64;

        if total_memory == 0.0 {
            return false;
        }

        let memory_usage = used_memory / total_memory;
        let is_pressure = memory_usage > self.memory_threshold;

        if is_pressure {
            debug!(
                "Memory pressure detected: {:.1}% usage (threshold: {:.1}%)",
                memory_usage * 100.0,
                self.memory_threshold * 100.0
            );
        }

        is_pressure
    }
}

/// Read, derive, sample and check one combination
fn evaluate(context: &TestContext, combination: Combination) -> Result<TestReport> {
    let mut report = TestReport::default();
    let label = combination.forecast_type.label();
    let lead_time = combination.lead_time.to_string();

    let fields = context
        .reader
        .read_parameters(&context.index, combination.parameters.as_slice())?;
    let fields = context.preprocessor.apply(fields)?;

    if fields.is_empty() {
        debug!("No data for {} at {}", label, lead_time);
        report.skip_unevaluated();
        return Ok(report);
    }

    let mut rng = DeterministicRng::for_task(context.seed, combination.ordinal);
    let samples = sampler::sample(
        fields,
        context.sample_size,
        context.check.missing_policy(),
        &mut rng,
    );

    for outcome in samples {
        match outcome {
            SampleOutcome::Drawn(sample) => {
                let result = context.check.evaluate(&sample);
                report.record(CheckRecord {
                    test: context.check.name().to_string(),
                    forecast_type: label.clone(),
                    lead_time: lead_time.clone(),
                    parameter: sample.parameter,
                    outcome: result.outcome,
                    message: result.message,
                });
            }
            SampleOutcome::Refused { parameter, reason } => {
                debug!("Skipping {}: {}", parameter, reason);
                report.skip_unevaluated();
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{MessageStream, RawMessage};
    use crate::models::{Bound, Condition, Outcome, ParameterDefinition, ParameterRequest, TestKind};
    use std::collections::HashMap;
    use std::path::Path;

    /// Decoder backed by in-memory fields keyed by end step
    ///
    /// Every "file" is a single byte holding the end step; the decoder maps
    /// it back to a canned field.
    struct StepDecoder {
        fields: HashMap<u8, Vec<f64>>,
    }

    struct StepMessage {
        step: u8,
        values: Vec<f64>,
    }

    impl RawMessage for StepMessage {
        fn scalar(&self, key: &str) -> Option<i64> {
            match key {
                "typeOfProcessedData" => Some(1),
                "typeOfFirstFixedSurface" => Some(103),
                "level" => Some(0),
                "discipline" => Some(0),
                "parameterCategory" => Some(1),
                "parameterNumber" => Some(8),
                "endStep" => Some(i64::from(self.step)),
                "dataDate" => Some(20240601),
                "dataTime" => Some(0),
                _ => None,
            }
        }

        fn values(&self) -> Result<Vec<f64>> {
            Ok(self.values.clone())
        }

        fn total_length(&self) -> u64 {
            1
        }
    }

    impl Decoder for StepDecoder {
        fn open(&self, _path: &Path) -> Result<MessageStream> {
            unimplemented!()
        }

        fn parse(&self, bytes: Vec<u8>) -> Result<Box<dyn RawMessage>> {
            let step = bytes[0];
            let values = self.fields.get(&step).cloned().unwrap_or_default();
            Ok(Box::new(StepMessage { step, values }))
        }
    }

    fn setup(steps: &[u8]) -> (tempfile::NamedTempFile, Arc<dyn Decoder>, Arc<MessageIndex>) {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(steps).unwrap();

        let decoder = StepDecoder {
            fields: steps
                .iter()
                .map(|s| (*s, (0..50).map(|v| f64::from(v % 10)).collect()))
                .collect(),
        };

        let mut index = MessageIndex::new();
        for (i, step) in steps.iter().enumerate() {
            let message = decoder.parse(vec![*step]).unwrap();
            let mut slots = [None; crate::constants::INDEX_KEY_COUNT];
            for (slot, key) in slots.iter_mut().zip(crate::constants::INDEX_KEYS) {
                *slot = message.scalar(key);
            }
            index.insert(
                crate::models::IndexKey(slots),
                crate::models::MessageLocation {
                    file: file.path().to_path_buf(),
                    message_no: i,
                    offset: i as u64,
                    length: 1,
                },
            );
        }

        (file, Arc::new(decoder), Arc::new(index))
    }

    fn config(max: f64, lead_hours: &[i64]) -> CheckConfig {
        CheckConfig {
            tests: vec![TestDefinition {
                name: "rr range".to_string(),
                kind: TestKind::Envelope,
                min: Some(Bound::Absolute(0.0)),
                max: Some(Bound::Absolute(max)),
                min_variance: None,
                max_variance: None,
                month: None,
                sample: SampleSize::Absolute(20),
                preprocess: None,
                parameters: ParameterRequest {
                    names: vec!["rr".to_string()],
                    conditions: vec![],
                },
            }],
            parameters: vec![ParameterDefinition::new(
                "rr",
                vec![
                    Condition::new("discipline", Some(0)),
                    Condition::new("parameterCategory", Some(1)),
                    Condition::new("parameterNumber", Some(8)),
                ],
            )],
            forecast_types: vec![ForecastType {
                processing_type: Some(1),
                perturbation: None,
            }],
            lead_times: lead_hours.iter().map(|h| LeadTime::hours(*h)).collect(),
        }
    }

    fn options() -> RunOptions {
        RunOptions::default().with_seed(Some(11)).with_jobs(Some(2))
    }

    #[tokio::test]
    async fn test_all_combinations_pass() {
        let (_file, decoder, index) = setup(&[0, 1, 2]);
        let mut runner = CheckRunner::new(config(100.0, &[0, 1, 2]), decoder).with_options(options());

        let summary = runner.run_with_index(index).await.unwrap();
        assert_eq!((summary.success(), summary.fail(), summary.skip()), (3, 0, 0));
        assert_eq!(summary.exit_code(true), 0);

        let leads: Vec<&str> = summary.records().iter().map(|r| r.lead_time.as_str()).collect();
        assert_eq!(leads, vec!["0h", "1h", "2h"]);
        assert!(summary.records().iter().all(|r| r.forecast_type == "deterministic"));
    }

    #[tokio::test]
    async fn test_missing_lead_time_is_skipped() {
        let (_file, decoder, index) = setup(&[0, 1]);
        let mut runner = CheckRunner::new(config(100.0, &[0, 1, 2]), decoder).with_options(options());

        let summary = runner.run_with_index(index).await.unwrap();
        assert_eq!((summary.success(), summary.fail(), summary.skip()), (2, 0, 1));
        assert_eq!(summary.exit_code(false), 0);
        assert_eq!(summary.exit_code(true), 1);
    }

    #[tokio::test]
    async fn test_out_of_bounds_fails() {
        let (_file, decoder, index) = setup(&[0]);
        let mut runner = CheckRunner::new(config(5.0, &[0]), decoder).with_options(
            options().with_seed(Some(3)),
        );

        let summary = runner.run_with_index(index).await.unwrap();
        assert_eq!(summary.fail(), 1);
        assert_eq!(summary.records()[0].outcome, Outcome::Fail);
        assert_eq!(summary.exit_code(false), 1);
    }

    #[tokio::test]
    async fn test_results_are_reproducible_with_seed() {
        let (_file, decoder, index) = setup(&[0, 1, 2]);
        let run = |decoder: Arc<dyn Decoder>, index: Arc<MessageIndex>| async move {
            CheckRunner::new(config(100.0, &[0, 1, 2]), decoder)
                .with_options(options())
                .run_with_index(index)
                .await
                .unwrap()
        };

        let first = run(Arc::clone(&decoder), Arc::clone(&index)).await;
        let second = run(decoder, index).await;
        assert_eq!(first.records(), second.records());
    }

    #[tokio::test]
    async fn test_no_lead_times_records_nothing() {
        let (_file, decoder, index) = setup(&[0]);
        let mut runner = CheckRunner::new(config(100.0, &[]), decoder).with_options(options());

        let summary = runner.run_with_index(index).await.unwrap();
        assert!(summary.records().is_empty());
        assert_eq!(summary.exit_code(true), 0);
    }
}
