use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use candle_core::Device;
use inkforge_core::model::stroke::to_absolute;
use inkforge_core::text::style::PRESET_IDS;
use inkforge_core::{
    Cancellation, Engine, GenerationRequest, HumanizationParams, InkforgeConfig, LigatureTable, ModelSlot,
    StrokeModel, StyleBank, Vocabulary,
};
use log::{info, warn};

const CONFIG_PATH: &str = "./inkforge.toml";
const CHECKPOINT_PATH: &str = "./checkpoints/best.ckpt";
const OUTPUT_PATH: &str = "./output/strokes.json";

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Use the configuration file if there is one, defaults otherwise
    let config = if Path::new(CONFIG_PATH).exists() {
        InkforgeConfig::load(CONFIG_PATH)?
    } else {
        InkforgeConfig::default()
    };

    // The slot is filled once; every session shares the published model
    let slot = Arc::new(ModelSlot::new());
    if Path::new(CHECKPOINT_PATH).exists() {
        let bytes = std::fs::read(CHECKPOINT_PATH).with_context(|| format!("reading {CHECKPOINT_PATH}"))?;
        slot.load(&bytes, &Device::Cpu)?;
    } else {
        // Untrained weights: strokes are noise, but the whole pipeline runs
        warn!("no checkpoint at {CHECKPOINT_PATH}, using seeded weights");
        slot.publish(StrokeModel::new(&config.model, &Device::Cpu, 42)?)?;
    }

    // Printable ASCII, the five bundled styles and cursive ligatures
    let vocabulary = Vocabulary::default();
    let ligatures = Arc::new(LigatureTable::cursive(&vocabulary));
    let styles = StyleBank::presets(config.model.style_dim);
    let engine = Engine::new(slot, vocabulary, styles, ligatures, config.generation.clone());

    // Humanization controls are checked before anything runs
    let params = HumanizationParams { slant_angle: 45.0, ..Default::default() };
    match engine.generate(&GenerationRequest::new("Hello", "neat_cursive").with_params(params)) {
        Ok(_) => println!("Should not happen"),
        Err(e) => println!("Rejected: {e}"),
    }

    // So are style ids
    match engine.generate(&GenerationRequest::new("Hello", "gothic")) {
        Ok(_) => println!("Should not happen"),
        Err(e) => println!("Rejected: {e}"),
    }

    // A slight right slant, some drift, tired hand
    let params = HumanizationParams {
        slant_angle: 8.0,
        baseline_drift: 0.4,
        fatigue_enabled: true,
        ..Default::default()
    };
    let request = GenerationRequest::new("Hello world", "neat_cursive")
        .with_params(params)
        .with_temperature(0.4)
        .with_seed(7);

    // Give up after five seconds
    let cancel = Cancellation::with_timeout(Duration::from_secs(5));
    let generation = engine.generate_with(&request, &cancel)?;
    println!(
        "{} strokes, {:?}, {} repaired values",
        generation.strokes.len(),
        generation.status,
        generation.repaired
    );

    // Accumulate deltas, then apply slant and baseline drift for the renderer
    let mut points = to_absolute(&generation.strokes);
    generation.transform.apply(&mut points);

    let document = serde_json::json!({
        "text": request.text,
        "style": request.style_id,
        "status": generation.status,
        "transform": generation.transform,
        "strokes": generation.strokes,
        "points": points,
    });
    if let Some(parent) = Path::new(OUTPUT_PATH).parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(OUTPUT_PATH, serde_json::to_string_pretty(&document)?)?;
    info!("strokes written to {OUTPUT_PATH}");

    // One request per preset, run concurrently
    let requests: Vec<GenerationRequest> = PRESET_IDS
        .iter()
        .enumerate()
        .map(|(i, id)| GenerationRequest::new("ink", id).with_seed(i as u64))
        .collect();
    for (request, result) in requests.iter().zip(engine.generate_many(&requests)) {
        match result {
            Ok(g) => println!("{}: {} strokes ({:?})", request.style_id, g.strokes.len(), g.status),
            Err(e) => println!("{}: {e}", request.style_id),
        }
    }

    Ok(())
}
