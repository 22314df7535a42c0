//! iapkit: the annotation core of a scientific image annotation workbench.
//!
//! A project holds 2-D and multi-dimensional images, a class registry, and
//! polygon and box annotations keyed by slice. The editing state machine,
//! predictor adapter and scene emitter sit on top of the store; projects
//! persist as `.iap` JSON and export to COCO, YOLO, Pascal VOC and raster
//! mask formats.
//!
//! # Modules
//!
//! - [`geometry`]: polygons, boxes, rasterization, union
//! - [`image_source`]: image decoding, dimension assignment, slice rendering
//! - [`store`]: class registry and annotation store
//! - [`editor`]: tool modes, pending buffers, input handling
//! - [`predictor`]: pluggable segmentation back-ends
//! - [`project`]: the open project and its on-disk form
//! - [`ir`] and [`conversion`]: interchange dataset, format readers/writers, exports
//! - [`scene`]: draw list for a renderer
//! - [`validation`]: store invariant checks

pub mod config;
pub mod conversion;
pub mod editor;
pub mod error;
pub mod geometry;
pub mod image_source;
pub mod ir;
pub mod predictor;
pub mod progress;
pub mod project;
pub mod prompt;
pub mod scene;
pub mod store;
pub mod validation;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

pub use config::Config;
pub use error::{ErrorKind, IapError};
pub use project::Project;

use conversion::{ExportFormat, ImportFormat};
use image_source::DimensionAssignment;
use progress::LogProgress;
use prompt::{FixedAnswers, MissingImagesChoice};
use store::Rgb;

/// The iapkit CLI application.
#[derive(Parser)]
#[command(name = "iapkit")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true, env = "IAPKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Drop missing images (and their annotations) instead of aborting.
    #[arg(long, global = true)]
    drop_missing: bool,

    /// Dimension assignment for N-D images, e.g. 'ZHW' or 'TZCHW'.
    #[arg(long, global = true, value_parser = parse_dims)]
    dims: Option<DimensionAssignment>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty project file.
    New(NewArgs),
    /// Copy images into a project.
    AddImage(AddImageArgs),
    /// Register an annotation class.
    AddClass(AddClassArgs),
    /// Summarize a project.
    Info(ProjectArg),
    /// Check a project's annotations for broken invariants.
    Validate(ValidateArgs),
    /// Export annotations to a dataset format.
    Export(ExportArgs),
    /// Import annotations from a dataset.
    Import(ImportArgs),
}

#[derive(clap::Args)]
struct ProjectArg {
    /// Project file (.iap).
    project: PathBuf,
}

#[derive(clap::Args)]
struct NewArgs {
    /// Project file to create; '.iap' is appended when missing.
    project: PathBuf,

    /// Free-form project notes.
    #[arg(long, default_value = "")]
    notes: String,
}

#[derive(clap::Args)]
struct AddImageArgs {
    project: PathBuf,

    /// Image files to add.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(clap::Args)]
struct AddClassArgs {
    project: PathBuf,

    name: String,

    /// Display color as 'R,G,B' or '#rrggbb'; defaults to the next palette color.
    #[arg(long, value_parser = parse_color)]
    color: Option<Rgb>,
}

#[derive(clap::Args)]
struct ValidateArgs {
    project: PathBuf,

    /// Treat warnings as errors (exit non-zero if any warnings).
    #[arg(long)]
    strict: bool,

    /// Output format for the report ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

#[derive(clap::Args)]
struct ExportArgs {
    project: PathBuf,

    /// coco, yolo, labeled, semantic, voc or voc-seg.
    #[arg(long)]
    format: ExportFormat,

    /// Output directory.
    #[arg(long, short)]
    output: PathBuf,
}

#[derive(clap::Args)]
struct ImportArgs {
    project: PathBuf,

    /// coco, yolo or voc.
    #[arg(long)]
    format: ImportFormat,

    /// COCO JSON file, or dataset directory for yolo and voc.
    input: PathBuf,
}

/// Run the iapkit CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), IapError> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::open(path)?,
        None => Config::default(),
    };
    let mut prompt = cli_prompt(&cli);

    match cli.command {
        Some(Commands::New(args)) => run_new(args, config),
        Some(Commands::AddImage(args)) => run_add_image(args, config, &mut prompt),
        Some(Commands::AddClass(args)) => run_add_class(args, config, &mut prompt),
        Some(Commands::Info(args)) => run_info(args, config, &mut prompt),
        Some(Commands::Validate(args)) => run_validate(args, config, &mut prompt),
        Some(Commands::Export(args)) => run_export(args, config, &mut prompt),
        Some(Commands::Import(args)) => run_import(args, config, &mut prompt),
        None => {
            println!("iapkit {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Annotation core for scientific image annotation projects.");
            println!();
            println!("Run 'iapkit --help' for usage information.");
            Ok(())
        }
    }
}

/// Answers every question the core may ask from command-line flags.
fn cli_prompt(cli: &Cli) -> FixedAnswers {
    let mut prompt = FixedAnswers::new().with_missing(if cli.drop_missing {
        MissingImagesChoice::Drop
    } else {
        MissingImagesChoice::Cancel
    });
    prompt.dims = cli.dims.clone();
    prompt.proceed_without_missing = cli.drop_missing;
    prompt
}

fn open_project(path: &Path, config: Config, prompt: &mut FixedAnswers) -> Result<Project, IapError> {
    let project = Project::open(path, config, prompt)?;
    let summary = project.load_summary();
    for name in &summary.dropped {
        eprintln!("dropped missing image {name}");
    }
    for name in &summary.rejected {
        eprintln!("rejected unreadable image {name}");
    }
    Ok(project)
}

fn run_new(args: NewArgs, config: Config) -> Result<(), IapError> {
    let mut project = Project::new(config);
    project.set_notes(args.notes);
    project.save_as(&args.project)?;
    if let Some(path) = project.path() {
        println!("created {}", path.display());
    }
    Ok(())
}

fn run_add_image(args: AddImageArgs, config: Config, prompt: &mut FixedAnswers) -> Result<(), IapError> {
    let mut project = open_project(&args.project, config, prompt)?;
    for image in &args.images {
        let descriptor = project.add_image(image, prompt)?;
        println!(
            "added {} ({}x{}, {} slice(s))",
            descriptor.file_name,
            descriptor.width,
            descriptor.height,
            descriptor.slice_keys().len()
        );
    }
    project.save()
}

fn run_add_class(args: AddClassArgs, config: Config, prompt: &mut FixedAnswers) -> Result<(), IapError> {
    let mut project = open_project(&args.project, config, prompt)?;
    let id = project.add_class(&args.name, args.color, prompt)?;
    project.save()?;
    println!("added class '{}' with id {}", args.name.trim(), id);
    Ok(())
}

fn run_info(args: ProjectArg, config: Config, prompt: &mut FixedAnswers) -> Result<(), IapError> {
    let project = open_project(&args.project, config, prompt)?;
    println!("project: {}", args.project.display());
    if let Some(created) = project.creation_date() {
        println!("created: {created}");
    }
    if let Some(modified) = project.last_modified() {
        println!("modified: {modified}");
    }
    if !project.notes().is_empty() {
        println!("notes: {}", project.notes());
    }

    println!("images ({}):", project.images().len());
    for image in project.images() {
        let dims = image
            .stack
            .as_ref()
            .map(|s| format!(" dims {} shape {:?}", s.dims, s.shape))
            .unwrap_or_default();
        println!(
            "  {}  {}x{}  {} slice(s){}",
            image.file_name,
            image.width,
            image.height,
            image.slice_keys().len(),
            dims
        );
    }

    let mut per_class: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, class, list) in project.store().iter() {
        *per_class.entry(class).or_default() += list.len();
    }
    let registry = project.store().registry();
    println!("classes ({}):", registry.len());
    for (id, entry) in registry.iter() {
        let Rgb(r, g, b) = entry.color;
        println!(
            "  {:>3} {:<20} #{:02x}{:02x}{:02x}  {} annotation(s)",
            id,
            entry.name,
            r,
            g,
            b,
            per_class.get(entry.name.as_str()).copied().unwrap_or(0)
        );
    }
    println!("annotations: {}", project.store().annotation_count());
    Ok(())
}

fn run_validate(args: ValidateArgs, config: Config, prompt: &mut FixedAnswers) -> Result<(), IapError> {
    let project = open_project(&args.project, config, prompt)?;
    let opts = validation::ValidateOptions {
        strict: args.strict,
    };
    let report = validation::validate_project(&project, &opts);

    match args.output.as_str() {
        "json" => {
            let issues: Vec<serde_json::Value> = report
                .issues
                .iter()
                .map(|issue| {
                    serde_json::json!({
                        "severity": format!("{:?}", issue.severity),
                        "code": format!("{:?}", issue.code),
                        "message": issue.message,
                        "context": issue.context.to_string(),
                    })
                })
                .collect();
            let document = serde_json::json!({
                "error_count": report.error_count(),
                "warning_count": report.warning_count(),
                "issues": issues,
            });
            let text = serde_json::to_string_pretty(&document).map_err(|e| IapError::invalid(e.to_string()))?;
            println!("{text}");
        }
        _ => print!("{}", report),
    }

    validation::check(report, &opts).map(|_| ())
}

fn run_export(args: ExportArgs, config: Config, prompt: &mut FixedAnswers) -> Result<(), IapError> {
    let mut project = open_project(&args.project, config, prompt)?;
    let mut progress = LogProgress::new(format!("export {}", args.format));
    let report = conversion::export_project(&mut project, args.format, &args.output, &mut progress)?;
    println!(
        "exported {} to {} ({:?})",
        args.format,
        args.output.display(),
        args.format.lossiness()
    );
    print!("{report}");
    Ok(())
}

fn run_import(args: ImportArgs, config: Config, prompt: &mut FixedAnswers) -> Result<(), IapError> {
    let mut project = open_project(&args.project, config, prompt)?;
    let report = conversion::import_annotations(&mut project, args.format, &args.input, prompt)?;
    project.save()?;
    print!("{report}");
    Ok(())
}

fn parse_dims(s: &str) -> Result<DimensionAssignment, String> {
    s.parse::<DimensionAssignment>().map_err(|e| e.to_string())
}

fn parse_color(s: &str) -> Result<Rgb, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('#') {
        let value = u32::from_str_radix(hex, 16)
            .ok()
            .filter(|_| hex.len() == 6)
            .ok_or_else(|| format!("'{s}' is not a #rrggbb color"))?;
        return Ok(Rgb((value >> 16) as u8, (value >> 8) as u8, value as u8));
    }
    let parts: Vec<u8> = s
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("'{s}' is not an R,G,B color: {e}"))?;
    match parts.as_slice() {
        [r, g, b] => Ok(Rgb(*r, *g, *b)),
        _ => Err(format!("'{s}' needs exactly three components")),
    }
}
