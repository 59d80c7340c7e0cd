//! Command-line entry point: train and/or test a classifier.

use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use rand::SeedableRng;
use rand::rngs::StdRng;

use smallnet::backend::{self, Backend};
use smallnet::batch::Batcher;
use smallnet::dataset::{Channels, DatasetName, load_dataset};
use smallnet::model::{Activation, Architecture, Classifier, ModelConfig};
use smallnet::train;

const USAGE: &str = "\
usage: smallnet [options]

options:
  --dataset <name>       mnist, fashion_mnist, cifar        [mnist]
  --hidden-size <n>      hidden width, power of 2           [64]
  --activation <name>    relu, leaky, sigm, tanh            [leaky]
  --architecture <name>  fc, fc2, conv                      [conv]
  --lr <f>               learning rate                      [0.001]
  --epochs <n>           training epochs                    [10]
  --inputs <n>           cap each split to its first n samples (0 = all) [all]
  --batch-size <n>       mini-batch size                    [64]
  --model-idx <n>        replace dataset/hidden-size/activation/architecture/
                         epochs/lr with preset n
  --train <bool>         run the training loop              [true]
  --test <bool>          evaluate on the test split         [true]
  --device <name>        cpu, wgpu, cuda                    [cpu]
  --seed <n>             seed for init and shuffling        [0]
  --data-dir <path>      dataset root                       [data]
  --base-dir <path>      snapshot root                      [saved_models]
  -v, --verbose          more logging (repeatable)
  -h, --help             show this help
";

/// Known configurations with trained snapshots worth reproducing.
const PRESETS: [(DatasetName, usize, Activation, Architecture, usize, f64); 1] = [(
    DatasetName::Mnist,
    512,
    Activation::Leaky,
    Architecture::Conv,
    10,
    0.01,
)];

struct Args {
    dataset: DatasetName,
    hidden_size: usize,
    activation: Activation,
    architecture: Architecture,
    lr: f64,
    epochs: usize,
    inputs: Option<usize>,
    batch_size: usize,
    train: bool,
    test: bool,
    device: Backend,
    seed: u64,
    data_dir: PathBuf,
    base_dir: PathBuf,
    verbosity: usize,
}

impl Args {
    fn parse(mut argv: impl Iterator<Item = String>) -> Result<Self, Box<dyn Error>> {
        let mut args = Self {
            dataset: DatasetName::Mnist,
            hidden_size: 64,
            activation: Activation::Leaky,
            architecture: Architecture::Conv,
            lr: 0.001,
            epochs: 10,
            inputs: None,
            batch_size: 64,
            train: true,
            test: true,
            device: Backend::Cpu,
            seed: 0,
            data_dir: PathBuf::from("data"),
            base_dir: PathBuf::from("saved_models"),
            verbosity: 2,
        };
        let mut model_idx = None;

        while let Some(flag) = argv.next() {
            match flag.as_str() {
                "--dataset" => args.dataset = value(&flag, &mut argv)?.parse()?,
                "--hidden-size" => args.hidden_size = value(&flag, &mut argv)?.parse()?,
                "--activation" => args.activation = value(&flag, &mut argv)?.parse()?,
                "--architecture" => args.architecture = value(&flag, &mut argv)?.parse()?,
                "--lr" => args.lr = value(&flag, &mut argv)?.parse()?,
                "--epochs" => args.epochs = value(&flag, &mut argv)?.parse()?,
                "--inputs" => {
                    let n: usize = value(&flag, &mut argv)?.parse()?;
                    args.inputs = (n > 0).then_some(n);
                }
                "--batch-size" => args.batch_size = value(&flag, &mut argv)?.parse()?,
                "--model-idx" => model_idx = Some(value(&flag, &mut argv)?.parse::<usize>()?),
                "--train" => args.train = value(&flag, &mut argv)?.parse()?,
                "--test" => args.test = value(&flag, &mut argv)?.parse()?,
                "--device" => args.device = value(&flag, &mut argv)?.parse()?,
                "--seed" => args.seed = value(&flag, &mut argv)?.parse()?,
                "--data-dir" => args.data_dir = value(&flag, &mut argv)?.into(),
                "--base-dir" => args.base_dir = value(&flag, &mut argv)?.into(),
                "-v" | "--verbose" => args.verbosity += 1,
                "-h" | "--help" => {
                    print!("{USAGE}");
                    std::process::exit(0);
                }
                other => return Err(format!("unknown flag `{other}` (see --help)").into()),
            }
        }

        if let Some(idx) = model_idx {
            let Some(&(dataset, hidden, activation, architecture, epochs, lr)) = PRESETS.get(idx)
            else {
                return Err(
                    format!("no preset with index {idx} ({} available)", PRESETS.len()).into(),
                );
            };
            args.dataset = dataset;
            args.hidden_size = hidden;
            args.activation = activation;
            args.architecture = architecture;
            args.epochs = epochs;
            args.lr = lr;
        }

        Ok(args)
    }
}

fn value(flag: &str, argv: &mut impl Iterator<Item = String>) -> Result<String, Box<dyn Error>> {
    argv.next()
        .ok_or_else(|| format!("{flag} requires a value").into())
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    backend::set_backend(args.device);

    let data = load_dataset(args.dataset, Channels::First, args.inputs, &args.data_dir)?;

    let config = ModelConfig {
        dataset: args.dataset,
        input_shape: data.input_shape,
        output_size: data.num_classes,
        hidden_size: args.hidden_size,
        activation: args.activation,
        architecture: args.architecture,
        lr: args.lr,
        epochs: args.epochs,
    };
    log::info!("model {}", config.name());

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut model = Classifier::new(config, &mut rng);

    if args.train {
        let mut batches = Batcher::new(
            data.train_images,
            data.train_labels,
            args.batch_size,
            true,
            args.seed,
        );
        train::fit(&mut model, &mut batches, &args.base_dir)?;
    } else {
        model.load(&args.base_dir)?;
    }

    if args.test {
        let mut batches = Batcher::new(
            data.test_images,
            data.test_labels,
            args.batch_size,
            false,
            args.seed,
        );
        let accuracy = train::evaluate(&model, &mut batches);
        log::info!("test accuracy: {accuracy:.2}");
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = match Args::parse(env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = stderrlog::new()
        .verbosity(args.verbosity)
        .timestamp(stderrlog::Timestamp::Off)
        .init()
    {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
