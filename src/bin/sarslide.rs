use anyhow::{Context, Result};
use clap::Parser;
use sarslide::{CancellationToken, PipelineConfig, SiPipeline};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = "compute the Sentinel-1 change statistic (SI) for an area of interest")]
pub struct Args {
    /// Pipeline configuration (JSON)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override the scene catalog manifest
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Override the elevation dataset
    #[arg(long)]
    pub dem: Option<PathBuf>,

    /// Override the export folder
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = PipelineConfig::from_file(&args.config)
        .with_context(|| format!("failed to load configuration {}", args.config.display()))?;
    if let Some(catalog) = args.catalog {
        config.inputs.catalog = catalog;
    }
    if let Some(dem) = args.dem {
        config.inputs.dem = dem;
    }
    if let Some(dir) = args.output_dir {
        config.export.folder = dir;
    }
    config.validate().context("invalid configuration")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::warn!("Interrupt received, cancelling after the current stage");
            cancel.cancel();
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let report = SiPipeline::new(config)
        .with_cancellation(cancel)
        .run()
        .context("SI processing failed")?;

    if let Some(path) = &report.output_path {
        println!("SI written to {}", path.display());
    }
    println!(
        "scenes: {} selected, {} pre, {} post ({} contributing)",
        report.scenes_selected, report.pre_scenes, report.post_scenes, report.contributing_post
    );
    println!(
        "terrain mask: {} of {} pixels kept",
        report.terrain.valid_pixels, report.terrain.total_pixels
    );
    match report.si_mean {
        Some(mean) => println!("SI: {} valid pixels, mean {:.4}", report.si_valid_pixels, mean),
        None => println!("SI: no valid pixels"),
    }

    Ok(())
}
