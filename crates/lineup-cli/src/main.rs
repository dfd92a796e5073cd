use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lineup_core::{CascadeLocator, DirectoryGallery, GalleryProvider, MatchEngine, MatchResult};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod annotate;
mod config;

use config::Config;

const OUTLINE_THICKNESS: u32 = 2;

#[derive(Parser)]
#[command(name = "lineup", about = "Match faces in photos against a gallery of reference images")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/lineup/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match every face in the probe images against the gallery
    Detect {
        #[arg(required = true)]
        probes: Vec<PathBuf>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Locate faces and report whether each is usable
    Screen {
        image: PathBuf,
        /// Write a copy with face outlines drawn (green accepted, red rejected)
        #[arg(long, value_name = "OUT")]
        annotate: Option<PathBuf>,
        /// Ring the terminal bell when an acceptable face is found
        #[arg(long)]
        alert: bool,
        #[arg(long)]
        json: bool,
    },
    /// Score the largest face of one image against the largest face of another
    Compare { a: PathBuf, b: PathBuf },
    /// List gallery records
    Gallery,
}

#[derive(Serialize)]
struct ProbeReport {
    probe: PathBuf,
    #[serde(flatten)]
    result: MatchResult,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?.with_env(),
        None => Config::load()?,
    };

    match cli.command {
        Commands::Detect { probes, json } => run_detect(build_engine(&config)?, probes, json).await,
        Commands::Screen {
            image,
            annotate,
            alert,
            json,
        } => {
            let engine = build_engine(&config)?;
            run_screen(&engine, image, annotate, alert, json)
        }
        Commands::Compare { a, b } => {
            let engine = build_engine(&config)?;
            run_compare(&engine, a, b)
        }
        Commands::Gallery => run_gallery(&config),
    }
}

fn build_engine(config: &Config) -> Result<Arc<MatchEngine>> {
    let locator = CascadeLocator::load(&config.cascade, config.locator)
        .with_context(|| format!("loading cascade {}", config.cascade.display()))?;
    let gallery = Arc::new(DirectoryGallery::new(&config.gallery_dir));
    Ok(Arc::new(MatchEngine::new(
        config.matching.clone(),
        Box::new(locator),
        gallery,
    )))
}

async fn run_detect(engine: Arc<MatchEngine>, probes: Vec<PathBuf>, json: bool) -> Result<()> {
    let tasks: Vec<_> = probes
        .into_iter()
        .map(|probe| {
            let engine = Arc::clone(&engine);
            tokio::task::spawn_blocking(move || {
                let result = engine.find_matches(&probe);
                (probe, result)
            })
        })
        .collect();

    let mut reports = Vec::new();
    let mut failures = 0usize;
    for task in tasks {
        let (probe, result) = task.await.context("match task panicked")?;
        match result {
            Ok(result) => reports.push(ProbeReport { probe, result }),
            Err(e) => {
                tracing::error!(probe = %probe.display(), error = %e, "probe failed");
                eprintln!("{}: {e}", probe.display());
                failures += 1;
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} probe(s) could not be processed");
    }
    Ok(())
}

fn print_report(report: &ProbeReport) {
    if report.result.is_empty() {
        println!("{}: no match", report.probe.display());
        return;
    }
    println!("{}: {} match(es)", report.probe.display(), report.result.len());
    for m in report.result.iter() {
        println!("  {:<24} {:.4}  {}", m.record.id, m.score, m.record.image.display());
    }
}

fn run_screen(
    engine: &MatchEngine,
    path: PathBuf,
    annotate: Option<PathBuf>,
    alert: bool,
    json: bool,
) -> Result<()> {
    let faces = engine.screen(&path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&faces)?);
    } else if faces.is_empty() {
        println!("{}: no faces", path.display());
    } else {
        for face in &faces {
            let r = face.rect;
            match &face.rejection {
                None => println!("{}x{} at ({}, {}): ok", r.width, r.height, r.x, r.y),
                Some(why) => println!("{}x{} at ({}, {}): {why}", r.width, r.height, r.x, r.y),
            }
        }
    }

    if let Some(out) = annotate {
        let mut image = image::open(&path)
            .with_context(|| format!("opening {}", path.display()))?
            .to_rgb8();
        annotate::outline_faces(&mut image, &faces, OUTLINE_THICKNESS);
        image
            .save(&out)
            .with_context(|| format!("writing {}", out.display()))?;
        tracing::info!(out = %out.display(), faces = faces.len(), "annotated image written");
    }

    if alert && faces.iter().any(|f| f.acceptable()) {
        let mut stdout = std::io::stdout();
        stdout.write_all(b"\x07")?;
        stdout.flush()?;
    }

    Ok(())
}

fn run_compare(engine: &MatchEngine, a: PathBuf, b: PathBuf) -> Result<()> {
    match engine.compare(&a, &b)? {
        Some(score) => {
            let verdict = if score > engine.config().threshold {
                "match"
            } else {
                "no match"
            };
            println!("{score:.4} ({verdict})");
        }
        None => println!("no face found in one of the images"),
    }
    Ok(())
}

fn run_gallery(config: &Config) -> Result<()> {
    let gallery = DirectoryGallery::new(&config.gallery_dir);
    let records = gallery.list_all();
    if records.is_empty() {
        println!("No records in {}", gallery.root().display());
        return Ok(());
    }
    for record in &records {
        println!("{:<24} {}", record.id, gallery.resolve_image_path(record).display());
    }
    println!("{} record(s)", records.len());
    Ok(())
}
