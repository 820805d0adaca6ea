//! Integration tests for minibatch training, listeners and checkpoints.

use approx::assert_abs_diff_eq;
use samediff::data::{DataLoader, DataSource, InMemoryDataset, MultiDataSet, SingletonSource};
use samediff::init::WeightInit;
use samediff::losses::{log_loss, mse_loss, LOG_LOSS_EPSILON};
use samediff::metrics::Evaluation;
use samediff::optimizers::UpdaterConfig;
use samediff::serialization::{CheckpointListener, CheckpointManager};
use samediff::train::{EpochEnd, Listener, TrainingError};
use samediff::{DType, Error, SameDiff, TrainingConfig, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// `out = in . w` with `w` starting at zero; labels follow `y = 3x`.
fn slope_model(loss_name: &str, negate: bool) -> SameDiff {
    let sd = SameDiff::create();
    let input = sd.placeholder("in", DType::F64, &[-1, 1]).unwrap();
    let label = sd.placeholder("label", DType::F64, &[-1, 1]).unwrap();
    let w = sd.var("w", Value::from_f64(&[1, 1], vec![0.0]).unwrap()).unwrap();
    let out = input.mmul(&w).unwrap().rename("out").unwrap();
    let mse = mse_loss("mse", &out, &label).unwrap();
    let loss = if negate { mse.neg().unwrap().rename(loss_name).unwrap() } else { mse };
    loss.mark_as_loss().unwrap();
    sd
}

fn slope_data() -> MultiDataSet {
    let xs: Vec<f64> = (0..8).map(|i| i as f64 / 4.0).collect();
    let ys: Vec<f64> = xs.iter().map(|x| 3.0 * x).collect();
    MultiDataSet::single(
        Value::from_f64(&[8, 1], xs).unwrap(),
        Value::from_f64(&[8, 1], ys).unwrap(),
    )
}

fn slope_config() -> samediff::train::TrainingConfigBuilder {
    TrainingConfig::builder()
        .updater(UpdaterConfig::sgd(0.2))
        .feature_mapping(&["in"])
        .label_mapping(&["label"])
}

fn slope(sd: &SameDiff) -> f64 {
    sd.get_array("w").unwrap().scalar_value().unwrap()
}

#[test]
fn hidden_layer_classifier_separates_classes() {
    let sd = SameDiff::with_seed(5);
    let input = sd.placeholder("in", DType::F64, &[-1, 2]).unwrap();
    let label = sd.placeholder("label", DType::F64, &[-1, 1]).unwrap();
    let w0 = sd.var_init("w0", DType::F64, &[2, 4], WeightInit::XavierUniform).unwrap();
    let b0 = sd.var_init("b0", DType::F64, &[4], WeightInit::Zeros).unwrap();
    let w1 = sd.var_init("w1", DType::F64, &[4, 1], WeightInit::XavierUniform).unwrap();
    let b1 = sd.var_init("b1", DType::F64, &[1], WeightInit::Zeros).unwrap();
    let hidden = (&input.mmul(&w0).unwrap() + &b0).unwrap().tanh().unwrap();
    let probability = (&hidden.mmul(&w1).unwrap() + &b1)
        .unwrap()
        .sigmoid()
        .unwrap()
        .rename("probability")
        .unwrap();
    log_loss("loss", &probability, &label, LOG_LOSS_EPSILON)
        .unwrap()
        .mark_as_loss()
        .unwrap();

    let features = Value::from_f64(
        &[8, 2],
        vec![1.0, 1.0, 2.0, 0.5, 0.5, 1.5, 1.0, -0.5, -1.0, -1.0, -2.0, -0.5, -0.5, -1.5, -1.0, 0.5],
    )
    .unwrap();
    let labels = Value::from_f64(&[8, 1], vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
    let config = TrainingConfig::builder()
        .updater(UpdaterConfig::adam(0.05))
        .feature_mapping(&["in"])
        .label_mapping(&["label"])
        .train_evaluation("probability", 0, Evaluation::Accuracy)
        .build()
        .unwrap();
    sd.set_training_config(config).unwrap();

    let dataset = InMemoryDataset::new(vec![features], vec![labels]).unwrap();
    let mut loader = DataLoader::new(dataset, 4).shuffle(true).seed(9);
    let history = sd.fit(&mut loader, 300).unwrap();

    let curve = history.total_loss_curve();
    assert!(curve[299] < 0.5 * curve[0], "loss went from {} to {}", curve[0], curve[299]);
    assert_eq!(history.train_evaluation(299, "probability", Evaluation::Accuracy), Some(1.0));
    assert_eq!(sd.training_config().unwrap().iteration_count, 600);
}

#[test]
fn maximizing_a_negated_loss() {
    let sd = slope_model("negative_mse", true);
    sd.set_training_config(slope_config().maximize().build().unwrap()).unwrap();
    let mut source = SingletonSource::new(slope_data());
    let history = sd.fit(&mut source, 200).unwrap();

    assert_abs_diff_eq!(slope(&sd), 3.0, epsilon = 1e-3);
    let curve = history.loss_curve_for("negative_mse").unwrap();
    assert!(curve[199] > curve[0]);
}

#[test]
fn l2_pulls_weights_towards_zero() {
    let sd = slope_model("mse", false);
    sd.set_training_config(slope_config().l2(0.5).build().unwrap()).unwrap();
    let mut source = SingletonSource::new(slope_data());
    let history = sd.fit(&mut source, 300).unwrap();

    // 2 * mean(x^2) * (w - 3) + 0.5 * w = 0 with mean(x^2) = 1.09375
    let w = slope(&sd);
    assert_abs_diff_eq!(w, 6.5625 / 2.6875, epsilon = 1e-4);
    // The reported loss does not include the penalty.
    let expected = 1.09375 * (w - 3.0) * (w - 3.0);
    assert_abs_diff_eq!(history.final_loss().unwrap(), expected, epsilon = 1e-4);
    // It is reported on its own curve instead.
    assert_eq!(history.regularization_curve.len(), 300);
    assert_abs_diff_eq!(history.regularization_curve[299], 0.25 * w * w, epsilon = 1e-4);
    assert!(history.regularization_curve[0] == 0.0 && history.regularization_curve[1] > 0.0);
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    EpochStart(usize),
    Iteration(usize, usize),
    EpochEnd(usize, usize),
}

struct Recorder {
    events: Rc<RefCell<Vec<Event>>>,
}

impl Listener for Recorder {
    fn epoch_start(&mut self, epoch: usize) {
        self.events.borrow_mut().push(Event::EpochStart(epoch));
    }

    fn iteration_done(&mut self, epoch: usize, iteration: usize, loss: f64) {
        assert!(loss.is_finite());
        self.events.borrow_mut().push(Event::Iteration(epoch, iteration));
    }

    fn epoch_end(&mut self, state: &EpochEnd<'_>) -> samediff::Result<()> {
        assert_eq!(state.loss_variables, &["mse".to_string()][..]);
        assert_eq!(state.losses.len(), 1);
        assert!(state.updater.is_some());
        assert!(state.graph.has_variable("w"));
        self.events.borrow_mut().push(Event::EpochEnd(state.epoch, state.iteration));
        Ok(())
    }
}

#[test]
fn listeners_see_every_epoch_and_iteration() {
    let sd = slope_model("mse", false);
    sd.set_training_config(slope_config().build().unwrap()).unwrap();
    let events = Rc::new(RefCell::new(Vec::new()));
    sd.add_listener(Box::new(Recorder { events: events.clone() }));

    let data = slope_data();
    let dataset = InMemoryDataset::new(data.features, data.labels).unwrap();
    let mut loader = DataLoader::new(dataset, 3);
    sd.fit(&mut loader, 1).unwrap();
    sd.fit(&mut loader, 1).unwrap();

    use Event::*;
    assert_eq!(
        *events.borrow(),
        vec![
            EpochStart(0),
            Iteration(0, 0),
            Iteration(0, 1),
            Iteration(0, 2),
            EpochEnd(0, 3),
            EpochStart(1),
            Iteration(1, 3),
            Iteration(1, 4),
            Iteration(1, 5),
            EpochEnd(1, 6),
        ]
    );
}

#[test]
fn checkpoints_are_written_and_restorable() {
    let dir = tempfile::tempdir().unwrap();
    let sd = slope_model("mse", false);
    sd.set_training_config(
        TrainingConfig::builder()
            .updater(UpdaterConfig::adam(0.1))
            .feature_mapping(&["in"])
            .label_mapping(&["label"])
            .build()
            .unwrap(),
    )
    .unwrap();
    let manager = CheckpointManager::new(dir.path(), 2);
    sd.add_listener(Box::new(CheckpointListener::new(manager.clone(), 2)));

    let mut source = SingletonSource::new(slope_data());
    sd.fit(&mut source, 6).unwrap();

    assert_eq!(
        manager.checkpoints().unwrap(),
        vec![manager.path_for(3, 4), manager.path_for(5, 6)]
    );
    let archive = manager.load_latest(true).unwrap().unwrap();
    assert_eq!(archive.training_config.as_ref().unwrap().epoch_count, 6);
    assert_eq!(archive.loss_variables, vec!["mse".to_string()]);
    let state = archive.updater_state.clone().unwrap();
    assert!(state.contains_key("w/m"));

    let restored = SameDiff::from_archive(archive).unwrap();
    assert_eq!(restored.get_array("w"), sd.get_array("w"));
    assert_eq!(restored.updater_state().unwrap(), sd.updater_state().unwrap());

    sd.fit(&mut source, 1).unwrap();
    restored.fit(&mut source, 1).unwrap();
    assert_eq!(restored.get_array("w"), sd.get_array("w"));
}

struct EmptySource;

impl DataSource for EmptySource {
    fn next_batch(&mut self) -> Option<MultiDataSet> {
        None
    }

    fn reset(&mut self) {}
}

#[test]
fn empty_sources_and_bad_mappings_are_errors() {
    let sd = slope_model("mse", false);
    sd.set_training_config(slope_config().build().unwrap()).unwrap();
    let err = sd.fit(&mut EmptySource, 1).unwrap_err();
    assert!(matches!(err, Error::Training(TrainingError::EmptyDataSource)));

    let config = TrainingConfig::builder()
        .updater(UpdaterConfig::sgd(0.1))
        .feature_mapping(&["w"])
        .label_mapping(&["label"])
        .build()
        .unwrap();
    sd.set_training_config(config).unwrap();
    let err = sd.fit(&mut SingletonSource::new(slope_data()), 1).unwrap_err();
    assert!(matches!(err, Error::Training(TrainingError::UnknownPlaceholder(ref name)) if name == "w"));

    let err = TrainingConfig::builder()
        .updater(UpdaterConfig::sgd(0.1))
        .feature_mapping(&["in"])
        .build()
        .unwrap_err();
    assert_eq!(err, TrainingError::MissingLabelMapping);
}
