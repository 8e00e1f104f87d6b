//! dwcompare CLI - Dynamic World vs Sentinel-2 split-view comparison

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use dwcompare::config::CompareConfig;
use dwcompare::core::export::{ExportSettings, ExportTarget};
use dwcompare::core::filter::Aoi;
use dwcompare::core::palette::Palette;
use dwcompare::pipeline::ComparisonPipeline;

#[derive(Parser)]
#[command(name = "dwcompare")]
#[command(author, version, about = "Compare Dynamic World land cover with Sentinel-2 imagery", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, link and render the comparison for an AOI
    Run {
        /// JSON configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// GeoJSON polygon of the area of interest
        #[arg(short, long)]
        aoi: Option<PathBuf>,
        /// Window start (YYYY-MM-DD)
        #[arg(short, long)]
        start: Option<String>,
        /// Window length in days
        #[arg(short, long)]
        days: Option<i64>,
        /// Output directory for preview and exports
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Wipe divider position in [0, 1]
        #[arg(long)]
        divider: Option<f64>,
        /// Skip writing the wipe preview
        #[arg(long)]
        no_preview: bool,
        /// Also export the shaded classification under this description
        #[arg(long)]
        export: Option<String>,
        /// Also export the raw labels under this description
        #[arg(long)]
        export_label: Option<String>,
    },
    /// Print the Dynamic World class palette
    Palette,
    /// Validate configured exports against an AOI without reading pixels
    CheckExport {
        /// GeoJSON polygon of the area of interest
        aoi: PathBuf,
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Check an ad-hoc export with this description
        #[arg(short, long)]
        description: Option<String>,
        /// Pixel size in meters for the ad-hoc export
        #[arg(long, default_value = "10")]
        scale: f64,
        /// Pixel ceiling for the ad-hoc export
        #[arg(long, default_value = "1e13")]
        max_pixels: f64,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<CompareConfig> {
    match path {
        Some(p) => CompareConfig::from_file(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(CompareConfig::default()),
    }
}

fn read_aoi(path: &PathBuf) -> Result<Aoi> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading AOI {}", path.display()))?;
    Ok(Aoi::from_geojson_str(&text)?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Run {
            config,
            aoi,
            start,
            days,
            output,
            divider,
            no_preview,
            export,
            export_label,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(aoi) = aoi {
                config.aoi_path = Some(aoi);
            }
            if let Some(start) = start {
                config.start = start;
            }
            if let Some(days) = days {
                config.days = days;
            }
            if let Some(output) = output {
                config.output_dir = Some(output);
            }
            if let Some(divider) = divider {
                config.display.divider = divider;
            }
            if no_preview {
                config.display.write_preview = false;
            }
            if let Some(description) = export {
                config.exports.push(ExportSettings::new(&description, ExportTarget::Visualization));
            }
            if let Some(description) = export_label {
                config.exports.push(ExportSettings::new(&description, ExportTarget::RawLabel));
            }

            let started = Instant::now();
            let result = ComparisonPipeline::from_config(config)?.run()?;

            println!("Classification: {}", result.linked.primary.id);
            println!(
                "Reference:      {} ({} s apart)",
                result.linked.secondary.id, result.linked.offset_seconds
            );
            println!(
                "Split view:     {} | {} at ({:.5}, {:.5}), zoom {}",
                result.view.left_layer,
                result.view.right_layer,
                result.view.center.0,
                result.view.center.1,
                result.view.zoom
            );
            if let Some(preview) = &result.preview {
                println!("Preview:        {}", preview.display());
            }
            for path in &result.exports {
                println!("Export:         {}", path.display());
            }
            println!("Done in {:.2?}", started.elapsed());
        }
        Commands::Palette => {
            for (i, entry) in Palette::dynamic_world()?.entries().iter().enumerate() {
                println!("{}  {:<20} #{}", i, entry.name, entry.color.to_hex());
            }
        }
        Commands::CheckExport {
            aoi,
            config,
            description,
            scale,
            max_pixels,
        } => {
            let config = load_config(config.as_ref())?;
            let region = read_aoi(&aoi)?;

            let mut exports = config.exports.clone();
            if let Some(description) = description {
                let mut settings = ExportSettings::new(&description, ExportTarget::Visualization);
                settings.scale = scale;
                settings.max_pixels = max_pixels;
                exports.push(settings);
            }
            if exports.is_empty() {
                bail!("no exports configured; pass --description or a config with exports");
            }

            let mut failed = 0;
            for settings in &exports {
                match settings.request(&region) {
                    Ok(request) => println!(
                        "OK    {:<40} {}x{} = {} pixels",
                        settings.description,
                        request.grid.width,
                        request.grid.height,
                        request.pixel_count()
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("FAIL  {:<40} {}", settings.description, e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} export(s) invalid", failed, exports.len());
            }
        }
    }

    Ok(())
}
