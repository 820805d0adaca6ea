//! Command line entry point: inspect graph archives and run a training demo.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ndarray::{Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use samediff::data::{DataLoader, InMemoryDataset, SingletonSource};
use samediff::init::WeightInit;
use samediff::losses::mse_loss;
use samediff::metrics::Evaluation;
use samediff::optimizers::UpdaterConfig;
use samediff::serialization::{Archive, CheckpointListener, CheckpointManager};
use samediff::train::{EvaluationSpec, ScoreListener};
use samediff::validation::{check_gradients, GradCheckConfig};
use samediff::{DType, SameDiff, TrainingConfig, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Symbolic computation graphs with automatic differentiation", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the variables, ops and training setup of a saved graph
    Summary {
        path: PathBuf,
    },
    /// Fit a linear regression graph on synthetic data
    Demo {
        #[arg(long, default_value_t = 50)]
        epochs: usize,
        #[arg(long, default_value_t = 16)]
        batch_size: usize,
        #[arg(long, default_value_t = 0.05)]
        learning_rate: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Save the trained graph to this archive
        #[arg(long)]
        output: Option<PathBuf>,
        /// Write a checkpoint every 10 epochs into this directory
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        /// Compare analytic and numeric gradients before training
        #[arg(long)]
        grad_check: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Args::parse().command {
        Command::Summary { path } => summary(path),
        Command::Demo {
            epochs,
            batch_size,
            learning_rate,
            seed,
            output,
            checkpoint_dir,
            grad_check,
        } => demo(DemoOptions {
            epochs,
            batch_size,
            learning_rate,
            seed,
            output,
            checkpoint_dir,
            grad_check,
        }),
    }
}

fn summary(path: PathBuf) -> anyhow::Result<()> {
    let archive = Archive::load(&path, true).with_context(|| format!("reading {}", path.display()))?;
    println!("{}", archive.graph.summary());
    println!("Loss variables: {:?}", archive.loss_variables);
    match &archive.training_config {
        Some(config) => println!("Training config:\n{}", serde_json::to_string_pretty(config)?),
        None => println!("Training config: none"),
    }
    if let Some(state) = &archive.updater_state {
        println!("Updater state entries: {}", state.len());
    }
    Ok(())
}

struct DemoOptions {
    epochs: usize,
    batch_size: usize,
    learning_rate: f64,
    seed: u64,
    output: Option<PathBuf>,
    checkpoint_dir: Option<PathBuf>,
    grad_check: bool,
}

const FEATURES: usize = 3;
const SAMPLES: usize = 128;

/// `y = x . [1.5, -2.0, 0.5] + 0.25` on uniform inputs.
fn synthetic_data(rng: &mut StdRng) -> (Value, Value) {
    let x = Array2::random_using((SAMPLES, FEATURES), Uniform::new(-1.0, 1.0), rng);
    let w = ndarray::arr1(&[1.5, -2.0, 0.5]);
    let y = (x.dot(&w) + 0.25).insert_axis(Axis(1));
    (Value::F64(x.into_dyn()), Value::F64(y.into_dyn()))
}

fn build_model(sd: &SameDiff) -> samediff::Result<()> {
    let input = sd.placeholder("input", DType::F64, &[-1, FEATURES as i64])?;
    let label = sd.placeholder("label", DType::F64, &[-1, 1])?;
    let w = sd.var_init("w", DType::F64, &[FEATURES, 1], WeightInit::XavierUniform)?;
    let b = sd.var_init("b", DType::F64, &[1], WeightInit::Zeros)?;
    let prediction = (&input.mmul(&w)? + &b)?.rename("prediction")?;
    mse_loss("loss", &prediction, &label)?.mark_as_loss()
}

fn demo(options: DemoOptions) -> anyhow::Result<()> {
    if options.batch_size == 0 {
        bail!("batch size must be positive");
    }
    let sd = SameDiff::with_seed(options.seed);
    build_model(&sd)?;
    println!("{}", sd.summary());

    let mut rng = StdRng::seed_from_u64(options.seed);
    let (features, labels) = synthetic_data(&mut rng);

    if options.grad_check {
        let mut feeds = HashMap::new();
        feeds.insert("input".to_string(), features.clone());
        feeds.insert("label".to_string(), labels.clone());
        let report = check_gradients(&sd, &feeds, &GradCheckConfig::default())?;
        println!(
            "Gradient check: {} elements, max relative error {:.3e}, {} failures",
            report.checked,
            report.max_relative_error,
            report.failures.len()
        );
        if !report.passed() {
            bail!("gradient check failed: {:?}", report.failures);
        }
    }

    let config = TrainingConfig::builder()
        .updater(UpdaterConfig::adam(options.learning_rate))
        .feature_mapping(&["input"])
        .label_mapping(&["label"])
        .train_evaluation("prediction", 0, Evaluation::Mse)
        .validation_evaluation("prediction", 0, Evaluation::RSquared)
        .build()?;
    sd.set_training_config(config)?;
    sd.add_listener(Box::new(ScoreListener::new(20)));
    if let Some(dir) = &options.checkpoint_dir {
        sd.add_listener(Box::new(CheckpointListener::new(CheckpointManager::new(dir, 3), 10)));
    }

    let dataset = InMemoryDataset::new(vec![features.clone()], vec![labels.clone()])?;
    let mut train = DataLoader::new(dataset, options.batch_size)
        .shuffle(true)
        .seed(options.seed);
    let mut validation = SingletonSource::new(samediff::data::MultiDataSet::single(features, labels));

    let start = Instant::now();
    let history = sd.fit_with_validation(&mut train, options.epochs, &mut validation)?;
    info!(elapsed = ?start.elapsed(), "training finished");

    for (epoch, loss) in history.total_loss_curve().iter().enumerate() {
        if epoch % 10 == 0 || epoch + 1 == history.epochs() {
            println!("epoch {epoch:>4}  loss {loss:.6}");
        }
    }
    let r2 = sd.evaluate(
        &mut validation,
        &[EvaluationSpec::new("prediction", 0, Evaluation::RSquared)],
    )?;
    println!("R^2 on training data: {:.4}", r2[0].value);
    println!("w = {}", sd.get_array("w").context("w has no array")?);
    println!("b = {}", sd.get_array("b").context("b has no array")?);

    if let Some(path) = &options.output {
        sd.save(path, true)?;
        println!("Saved graph to {}", path.display());
    }
    Ok(())
}
