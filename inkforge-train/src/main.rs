use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::Device;
use clap::{Parser, ValueEnum};
use inkforge_core::InkforgeConfig;
use inkforge_core::StrokeModel;
use inkforge_core::train::dataset::StrokeDataset;
use inkforge_core::train::trainer::Trainer;
use log::info;

/// Trains the stroke model on a preprocessed dataset.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(long, default_value = "inkforge.toml")]
    config: PathBuf,

    /// Checkpoint to continue from.
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Where to run (auto picks CUDA when available).
    #[arg(long, value_enum, default_value_t = DeviceChoice::Auto)]
    device: DeviceChoice,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DeviceChoice {
    Auto,
    Cpu,
    Cuda,
}

impl DeviceChoice {
    fn device(self) -> candle_core::Result<Device> {
        match self {
            DeviceChoice::Auto => Device::cuda_if_available(0),
            DeviceChoice::Cpu => Ok(Device::Cpu),
            DeviceChoice::Cuda => Device::new_cuda(0),
        }
    }
}

fn load_split(path: &Path, max_len: usize) -> anyhow::Result<StrokeDataset> {
    let mut dataset = StrokeDataset::load(path).with_context(|| format!("loading {}", path.display()))?;
    let shortened = dataset.truncate(max_len);
    if shortened > 0 {
        info!("{}: {shortened} samples truncated to {max_len} steps", path.display());
    }
    Ok(dataset)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = InkforgeConfig::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?;
    let device = args.device.device().context("selecting device")?;
    info!("training on {device:?}");

    let training = config.training.clone();
    let mut train = load_split(&training.dataset, training.max_seq_len)?;
    let mut validation = training
        .validation
        .as_ref()
        .map(|path| load_split(path, training.max_seq_len))
        .transpose()?;

    // Deltas are learned normalized; the statistics travel with the checkpoint
    let steps_per_char = config.generation.steps_per_char;
    let mut trainer = match &args.resume {
        Some(path) => {
            let trainer = Trainer::resume(path, training.clone(), steps_per_char, &device)?;
            train.normalize_with(trainer.model().delta_stats());
            trainer
        }
        None => {
            let stats = train.normalize();
            let model = StrokeModel::new(&config.model, &device, training.seed)?.with_delta_stats(stats);
            info!("new model: {} parameters", model.parameter_count());
            Trainer::new(model, training.clone(), steps_per_char)?
        }
    };
    let stats = *trainer.model().delta_stats();
    info!("delta mean {:?}, std {:?}", stats.mean, stats.std);
    if let Some(validation) = validation.as_mut() {
        validation.normalize_with(&stats);
    }

    let reports = trainer.fit(&train, validation.as_ref())?;
    let best = reports
        .iter()
        .map(|r| r.validation_loss.unwrap_or(r.train_loss))
        .fold(f32::INFINITY, f32::min);
    println!(
        "{} epochs, best loss {best:.4}, checkpoints in {}",
        reports.len(),
        training.checkpoint_dir.display()
    );

    Ok(())
}
