//! Integration tests for the training core.
//!
//! Tests the full pipeline: dataset -> processor -> scorer -> loss -> optimizer.

#![allow(clippy::unwrap_used)]

use lattix_train::{
    train, Dataset, EmbeddingModel, Error, Fact, KgeLoss, KgeModel, LpRegularizer,
    NegativeSampleSet, NegativeSampler, NegativeSamplingProcessor, NegativeSamplingScorer,
    Optimizer, Parameter, QueryType, Result, ScoringFunction, ScoringStrategy, Slot,
    StrategyChoice, Timings, TraceLevel, TrainConfig, TrainType, TrainingJob, TrainingObserver,
    UniformSampler,
};
use lattix_train::{BatchTrace, EpochTrace, JsonLinesTrace};
use ndarray::{array, Array1, Array2, ArrayView2};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Small family graph: two relations over eight people.
fn family() -> Dataset {
    let facts = [
        (0, 0, 1),
        (0, 0, 2),
        (1, 0, 3),
        (2, 0, 4),
        (3, 0, 5),
        (4, 0, 6),
        (5, 0, 7),
        (1, 1, 2),
        (2, 1, 1),
        (3, 1, 4),
        (4, 1, 3),
        (6, 1, 7),
        (7, 1, 6),
    ];
    let facts: Vec<Fact> = facts.iter().map(|&(s, p, o)| Fact::new(s, p, o)).collect();
    let mut dataset = Dataset::new(8, 2);
    dataset.add_split("train", &facts).unwrap();
    dataset
}

fn random_triples(n: usize, num_entities: usize, num_relations: usize, seed: u64) -> Array2<usize> {
    let mut rng = XorShiftRng::seed_from_u64(seed);
    Array2::from_shape_fn((n, 3), |(_, c)| {
        if c == 1 {
            rng.gen_range(0..num_relations)
        } else {
            rng.gen_range(0..num_entities)
        }
    })
}

fn assert_close(a: &Array2<f32>, b: &Array2<f32>, tol: f32) {
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() <= tol, "{} vs {} (tol {})", x, y, tol);
    }
}

// =============================================================================
// Scoring strategies
// =============================================================================

#[test]
fn strategies_produce_identical_score_matrices() {
    let model = EmbeddingModel::new(30, 4, 8, ScoringFunction::ComplEx, 1).unwrap();
    let triples = random_triples(12, 30, 4, 2);

    for shared in [false, true] {
        let mut sampler = UniformSampler::new([5, 2, 7], 30, 4, 3)
            .unwrap()
            .with_shared(shared);
        let negatives = NegativeSampleSet::draw(&mut sampler, triples.view());
        for slot in Slot::SPO {
            let reference = ScoringStrategy::Triple
                .score_chunk(&model, triples.view(), negatives.slot(slot), slot)
                .unwrap();
            for strategy in [ScoringStrategy::All, ScoringStrategy::Batch] {
                let m = strategy
                    .score_chunk(&model, triples.view(), negatives.slot(slot), slot)
                    .unwrap();
                assert_eq!(m.targets, reference.targets);
                assert_close(&m.scores, &reference.scores, 1e-5);
            }
        }
    }
}

#[test]
fn triple_expansion_puts_positive_first() {
    let model = EmbeddingModel::new(5, 1, 4, ScoringFunction::DistMult, 9).unwrap();
    let triples = array![[0, 0, 1]];
    let negatives = array![[3, 4]];

    let m = ScoringStrategy::Triple
        .score_chunk(&model, triples.view(), negatives.view(), Slot::Object)
        .unwrap();
    assert_eq!(m.targets, array![[1, 3, 4]]);

    let expected = model
        .score_triples(array![[0, 0, 1], [0, 0, 3], [0, 0, 4]].view())
        .unwrap();
    for j in 0..3 {
        assert!((m.scores[[0, j]] - expected[j]).abs() < 1e-7);
    }
}

#[test]
fn auto_resolution_cutoffs() {
    assert_eq!(StrategyChoice::Auto.resolve([2, 0, 2], true), ScoringStrategy::Batch);
    assert_eq!(StrategyChoice::Auto.resolve([30, 30, 30], false), ScoringStrategy::Triple);
    assert_eq!(StrategyChoice::Auto.resolve([31, 0, 0], false), ScoringStrategy::Batch);
}

// =============================================================================
// Chunking
// =============================================================================

#[test]
fn chunk_size_does_not_change_loss_or_gradients() {
    let base = EmbeddingModel::new(20, 3, 8, ScoringFunction::DistMult, 5).unwrap();
    let triples = random_triples(100, 20, 3, 6);
    let mut sampler = UniformSampler::new([4, 1, 4], 20, 3, 7).unwrap();
    let negatives = NegativeSampleSet::draw(&mut sampler, triples.view());

    let run = |chunk: usize| {
        let mut model = base.clone();
        model.zero_grad();
        let scorer = NegativeSamplingScorer::new(ScoringStrategy::Triple, chunk);
        let mut timings = Timings::default();
        let result = scorer
            .process(&mut model, &KgeLoss::Bce, triples.view(), &negatives, &mut timings)
            .unwrap();
        (
            result.avg_loss,
            model.entity_embeddings().grad.clone(),
            model.relation_embeddings().grad.clone(),
        )
    };

    let (loss, entity_grad, relation_grad) = run(100);
    for chunk in [50, 33, 1, 0] {
        let (l, e, r) = run(chunk);
        assert!((l - loss).abs() < 1e-4, "chunk {}: {} vs {}", chunk, l, loss);
        assert_close(&e, &entity_grad, 1e-5);
        assert_close(&r, &relation_grad, 1e-5);
    }
}

// =============================================================================
// End-to-end training
// =============================================================================

#[test]
fn kvsall_training_reduces_loss() {
    let dataset = family();
    let model = EmbeddingModel::new(8, 2, 8, ScoringFunction::ComplEx, 11).unwrap();
    let config = TrainConfig::default()
        .with_train_type(TrainType::KvsAll)
        .with_query_types(QueryType::ALL.to_vec())
        .with_batch_size(4)
        .with_max_epochs(30);

    let (_, traces) = train(config, &dataset, model, vec![]).unwrap();
    assert_eq!(traces.len(), 30);
    // sp_: 12 keys, s_o: 13 keys, _po: 13 keys
    assert_eq!(traces[0].size, 12 + 13 + 13);
    assert_eq!(traces[0].batches, 10);
    assert!(traces.last().unwrap().avg_loss < traces[0].avg_loss);
}

#[test]
fn negative_sampling_training_reduces_loss() {
    let dataset = family();
    let model = EmbeddingModel::new(8, 2, 8, ScoringFunction::DistMult, 12).unwrap();
    let config = TrainConfig::default()
        .with_train_type(TrainType::NegativeSampling)
        .with_num_samples([3, 0, 3])
        .with_chunk_size(2)
        .with_batch_size(5)
        .with_max_epochs(30);

    let (_, traces) = train(config, &dataset, model, vec![]).unwrap();
    assert_eq!(traces.len(), 30);
    assert_eq!(traces[0].job, "negative_sampling");
    assert!(traces.last().unwrap().avg_loss < traces[0].avg_loss);
}

#[test]
fn one_vs_all_training_reduces_loss() {
    let dataset = family();
    let model = EmbeddingModel::new(8, 2, 8, ScoringFunction::ComplEx, 13).unwrap();
    let config = TrainConfig::default()
        .with_train_type(TrainType::OneVsAll)
        .with_loss(KgeLoss::Kl)
        .with_batch_size(4)
        .with_max_epochs(30);

    let (_, traces) = train(config, &dataset, model, vec![]).unwrap();
    assert_eq!(traces[0].size, 13);
    assert!(traces.last().unwrap().avg_loss < traces[0].avg_loss);
}

#[test]
fn margin_ranking_with_shared_negatives() {
    let dataset = family();
    let model = EmbeddingModel::new(8, 2, 8, ScoringFunction::TransE, 14).unwrap();
    let config = TrainConfig::default()
        .with_loss(KgeLoss::MarginRanking { margin: 1.0 })
        .with_num_samples([2, 0, 2])
        .with_shared_negatives(true)
        .with_max_epochs(3);

    let (_, traces) = train(config, &dataset, model, vec![]).unwrap();
    assert!(traces.iter().all(|t| t.avg_loss.is_finite()));
}

#[test]
fn penalties_are_traced() {
    let dataset = family();
    let model = EmbeddingModel::new(8, 2, 4, ScoringFunction::DistMult, 15)
        .unwrap()
        .with_regularizer(LpRegularizer { weight: 0.1, p: 3, weighted: true });
    let config = TrainConfig::default().with_max_epochs(1);

    let (_, traces) = train(config, &dataset, model, vec![]).unwrap();
    let trace = &traces[0];
    assert!(trace.avg_penalty > 0.0);
    assert!(trace.avg_penalties.contains_key("entity_embeddings.L3_penalty"));
    assert!(trace.avg_penalties.contains_key("relation_embeddings.L3_penalty"));
    assert!((trace.avg_cost - (trace.avg_loss + trace.avg_penalty)).abs() < 1e-6);
}

// =============================================================================
// Failure modes
// =============================================================================

/// Scores everything as NaN.
#[derive(Debug)]
struct Broken {
    param: Parameter,
}

impl KgeModel for Broken {
    fn num_entities(&self) -> usize {
        8
    }
    fn num_relations(&self) -> usize {
        2
    }
    fn score_triples(&self, triples: ArrayView2<'_, usize>) -> Result<Array1<f32>> {
        Ok(Array1::from_elem(triples.nrows(), f32::NAN))
    }
    fn backward(
        &mut self,
        _: ArrayView2<'_, usize>,
        _: Slot,
        _: ArrayView2<'_, usize>,
        _: ArrayView2<'_, f32>,
    ) -> Result<()> {
        Ok(())
    }
    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.param]
    }
}

fn broken() -> Broken {
    Broken { param: Parameter::new("w", Array2::zeros((1, 1))) }
}

#[test]
fn nan_cost_aborts_job() {
    let dataset = family();
    let config = TrainConfig::default().with_max_epochs(2);
    let err = train(config, &dataset, broken(), vec![]).unwrap_err();
    assert!(matches!(err, Error::NumericalDivergence { epoch: 1, batch: 0, .. }));
}

#[test]
fn nan_cost_tolerated_without_abort() {
    let dataset = family();
    let config = TrainConfig::default().with_max_epochs(1).with_abort_on_nan(false);
    let (_, traces) = train(config, &dataset, broken(), vec![]).unwrap();
    assert!(traces[0].avg_loss.is_nan());
}

#[test]
fn unsupported_strategy_fails_at_construction() {
    let dataset = family();
    let config = TrainConfig::default().with_implementation(StrategyChoice::Batch);
    let err = train(config, &dataset, broken(), vec![]).unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation(_)));

    let config = TrainConfig::default().with_train_type(TrainType::KvsAll);
    let err = train(config, &dataset, broken(), vec![]).unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation(_)));
}

#[test]
fn missing_index_is_reported() {
    let dataset = family();
    let model = EmbeddingModel::new(8, 2, 4, ScoringFunction::DistMult, 0).unwrap();
    let mut config = TrainConfig::default().with_train_type(TrainType::KvsAll);
    config.split = "valid".to_string();
    let err = train(config, &dataset, model, vec![]).unwrap_err();
    assert!(matches!(err, Error::MissingIndex { ref split, .. } if split == "valid"));
}

#[test]
fn model_vocabulary_must_match_dataset() {
    let mut dataset = Dataset::new(8, 2);
    dataset
        .add_split("train", &[Fact::new(0, 0, 5), Fact::new(1, 1, 7)])
        .unwrap();

    for train_type in [TrainType::KvsAll, TrainType::OneVsAll, TrainType::NegativeSampling] {
        let config = TrainConfig::default().with_train_type(train_type).with_max_epochs(1);

        let small = EmbeddingModel::new(4, 2, 4, ScoringFunction::DistMult, 0).unwrap();
        let err = train(config.clone(), &dataset, small, vec![]).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{:?}: {}", train_type, err);

        let few_relations = EmbeddingModel::new(8, 1, 4, ScoringFunction::DistMult, 0).unwrap();
        let err = train(config, &dataset, few_relations, vec![]).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{:?}: {}", train_type, err);
    }
}

#[test]
fn label_smoothing_bounds_enforced() {
    let dataset = family();
    let model = EmbeddingModel::new(8, 2, 4, ScoringFunction::DistMult, 0).unwrap();
    let config = TrainConfig::default()
        .with_train_type(TrainType::KvsAll)
        .with_label_smoothing(0.5)
        .with_max_epochs(1);
    let err = train(config.clone(), &dataset, model.clone(), vec![]).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let (_, traces) = train(config.with_auto_correct(true), &dataset, model, vec![]).unwrap();
    assert_eq!(traces.len(), 1);
}

// =============================================================================
// Update schedule and observers
// =============================================================================

/// SGD that counts its steps.
struct CountingSgd {
    steps: Arc<AtomicUsize>,
}

impl Optimizer for CountingSgd {
    fn step(&mut self, params: Vec<&mut Parameter>) -> Result<()> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        for p in params {
            p.value.scaled_add(-0.01, &p.grad);
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        0.01
    }
}

type NsJob = TrainingJob<EmbeddingModel, NegativeSamplingProcessor<UniformSampler>>;

fn ns_job(config: TrainConfig) -> NsJob {
    let dataset = family();
    let model = EmbeddingModel::new(8, 2, 4, ScoringFunction::DistMult, 21).unwrap();
    let sampler =
        UniformSampler::new(config.negative_sampling.num_samples, 8, 2, 22).unwrap();
    let processor = NegativeSamplingProcessor::new(&config, &dataset, sampler, &model).unwrap();
    TrainingJob::new(config, model, processor).unwrap()
}

#[test]
fn update_freq_controls_optimizer_steps() {
    let steps = Arc::new(AtomicUsize::new(0));
    // 13 facts, batch size 2 => 7 batches; steps after batches 2, 5 (0-based)
    let config = TrainConfig::default().with_batch_size(2).with_update_freq(3);
    let optimizer = CountingSgd { steps: Arc::clone(&steps) };
    let mut job = ns_job(config).with_optimizer(Box::new(optimizer));

    job.run_epoch().unwrap();
    assert_eq!(steps.load(Ordering::SeqCst), 2);
    job.run_epoch().unwrap();
    assert_eq!(steps.load(Ordering::SeqCst), 4);
    assert_eq!(job.epoch(), 2);
}

/// Records hook calls into a shared log and rewrites the loss it sees.
struct Recorder {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl TrainingObserver for Recorder {
    fn pre_batch(&mut self, epoch: usize, batch_index: usize) -> Result<()> {
        self.log.lock().unwrap().push(format!("{}:pre:{}:{}", self.tag, epoch, batch_index));
        Ok(())
    }

    fn post_batch_trace(&mut self, trace: &mut BatchTrace) -> Result<()> {
        self.log.lock().unwrap().push(format!("{}:batch:{}", self.tag, trace.batch));
        Ok(())
    }

    fn post_epoch_trace(&mut self, trace: &mut EpochTrace) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:epoch_trace:{}", self.tag, trace.avg_loss));
        trace.avg_loss = -1.0;
        Ok(())
    }

    fn post_epoch(&mut self, trace: &EpochTrace) -> Result<()> {
        self.log.lock().unwrap().push(format!("{}:epoch:{}", self.tag, trace.avg_loss));
        Ok(())
    }
}

#[test]
fn observers_run_in_order_and_can_edit_traces() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let config = TrainConfig::default()
        .with_batch_size(13)
        .with_trace_level(TraceLevel::Batch);
    let mut job = ns_job(config)
        .with_observer(Box::new(Recorder { tag: "a", log: Arc::clone(&log) }))
        .with_observer(Box::new(Recorder { tag: "b", log: Arc::clone(&log) }));

    let trace = job.run_epoch().unwrap();
    assert_eq!(trace.avg_loss, -1.0);

    let log = log.lock().unwrap();
    assert_eq!(log[0], "a:pre:1:0");
    assert_eq!(log[1], "b:pre:1:0");
    assert_eq!(log[2], "a:batch:0");
    assert_eq!(log[3], "b:batch:0");
    assert!(log[4].starts_with("a:epoch_trace:"));
    // b sees the value a wrote
    assert_eq!(log[5], "b:epoch_trace:-1");
    assert_eq!(log[6], "a:epoch:-1");
    assert_eq!(log[7], "b:epoch:-1");
}

#[test]
fn json_lines_trace_writes_batches_and_epochs() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let dataset = family();
    let model = EmbeddingModel::new(8, 2, 4, ScoringFunction::DistMult, 31).unwrap();
    let config = TrainConfig::default()
        .with_batch_size(5)
        .with_max_epochs(2)
        .with_trace_level(TraceLevel::Batch);

    let observer: Box<dyn TrainingObserver> = Box::new(JsonLinesTrace::new(file.reopen().unwrap()));
    train(config, &dataset, model, vec![observer]).unwrap();

    let text = std::fs::read_to_string(file.path()).unwrap();
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    // 13 facts / 5 => 3 batches, plus one epoch record, for 2 epochs
    assert_eq!(records.len(), 8);
    assert_eq!(records[0]["type"], "batch");
    assert_eq!(records[3]["type"], "epoch");
    assert_eq!(records[3]["epoch"], 1);
    assert_eq!(records[7]["epoch"], 2);
    assert!(records[3]["other_time"].as_f64().unwrap() >= 0.0);
}

#[test]
fn sampler_trait_object_in_scorer() {
    // Negatives drawn through the trait object agree with the concrete sampler.
    let triples = random_triples(4, 8, 2, 40);
    let mut concrete = UniformSampler::new([2, 0, 2], 8, 2, 41).unwrap();
    let mut boxed: Box<dyn NegativeSampler> =
        Box::new(UniformSampler::new([2, 0, 2], 8, 2, 41).unwrap());
    assert_eq!(
        NegativeSampleSet::draw(&mut concrete, triples.view()),
        NegativeSampleSet::draw(boxed.as_mut(), triples.view())
    );
}
