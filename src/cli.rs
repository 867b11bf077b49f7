// ============================================================================
// StageCanvas CLI: headless rendering of annotation guides
// ============================================================================
//
// Usage examples:
//   stagecanvas --input living.jpg --annotations living.json --output guide.png
//   stagecanvas -i a.jpg b.jpg --output-dir guides/        (reads a.annotations.json, ...)
//   stagecanvas -i room.png --annotations marks.json --layer-only -o marks.png
//
// No window is opened. Output is the same context composite the editor sends
// to the edit service: the photo at reduced opacity with the annotations on top.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use serde::Deserialize;

use crate::compositor;
use crate::model::{Annotation, Image, ImagePoint};

/// StageCanvas headless guide renderer.
#[derive(Parser, Debug)]
#[command(
    name = "stagecanvas",
    about = "Render StageCanvas annotation guides without opening the editor",
    long_about = "Rasterize an annotation file onto one or more photos and write the\n\
                  context composite the edit service receives.\n\n\
                  Annotation coordinates are in the photo's canvas grid: 320 px tall,\n\
                  width following the aspect ratio.\n\n\
                  Example:\n  \
                  stagecanvas --input living.jpg --annotations living.json --output guide.png"
)]
pub struct CliArgs {
    /// Input photo(s).
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<PathBuf>,

    /// Annotation JSON. Defaults to `<stem>.annotations.json` next to each input.
    #[arg(short, long, value_name = "FILE.json")]
    pub annotations: Option<PathBuf>,

    /// Output PNG path. Only valid for a single input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for several inputs.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Write only the annotation layer on a transparent background.
    #[arg(long)]
    pub layer_only: bool,

    /// Print per-file timing.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when any CLI-mode flag is present in the real process arguments.
    /// Used by `main()` to route before creating an eframe window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--input" || a == "-i")
    }
}

// ============================================================================
// Annotation file format
// ============================================================================

#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum AnnotationSpec {
    Stroke {
        points: Vec<[f32; 2]>,
        #[serde(default = "default_width")]
        width: f32,
        #[serde(default = "default_color")]
        color: [u8; 4],
        #[serde(default)]
        label: Option<String>,
    },
    Stamp {
        at: [f32; 2],
        #[serde(default)]
        icon: String,
        #[serde(default = "default_color")]
        color: [u8; 4],
        #[serde(default)]
        label: Option<String>,
    },
    Reference {
        at: [f32; 2],
        /// Relative paths resolve against the annotation file's directory.
        path: PathBuf,
        #[serde(default)]
        label: Option<String>,
    },
}

fn default_width() -> f32 {
    6.0
}

fn default_color() -> [u8; 4] {
    [255, 64, 64, 255]
}

fn point([x, y]: [f32; 2]) -> ImagePoint {
    ImagePoint::new(x, y)
}

/// Parse an annotation file. Empty strokes are skipped.
pub fn parse_annotations(json: &str, base_dir: &Path) -> Result<Vec<Annotation>, String> {
    let specs: Vec<AnnotationSpec> =
        serde_json::from_str(json).map_err(|e| format!("invalid annotation file: {}", e))?;

    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        let (annotation, label) = match spec {
            AnnotationSpec::Stroke {
                points,
                width,
                color,
                label,
            } => {
                let Some(a) = Annotation::stroke(points.into_iter().map(point).collect(), width, color) else {
                    continue;
                };
                (a, label)
            }
            AnnotationSpec::Stamp {
                at,
                icon,
                color,
                label,
            } => (Annotation::stamp(point(at), icon, color), label),
            AnnotationSpec::Reference { at, path, label } => {
                let full = if path.is_relative() {
                    base_dir.join(&path)
                } else {
                    path
                };
                let img = image::open(&full)
                    .map_err(|e| format!("reference '{}': {}", full.display(), e))?
                    .to_rgba8();
                (Annotation::reference(point(at), Arc::new(img)), label)
            }
        };
        out.push(match label {
            Some(l) => annotation.with_label(l),
            None => annotation,
        });
    }
    Ok(out)
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    if args.input.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory.",
            args.input.len()
        );
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let total = args.input.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input) in args.input.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input.display());
        }
        let started = Instant::now();

        let Some(output) = build_output_path(input, args.output.as_deref(), args.output_dir.as_deref()) else {
            eprintln!("  error: cannot determine output path for '{}'.", input.display());
            any_failure = true;
            continue;
        };
        let annotations = args
            .annotations
            .clone()
            .unwrap_or_else(|| sidecar_path(input));

        match run_one(input, &annotations, &output, args.layer_only) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output.display(),
                        started.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file pipeline
// ============================================================================

fn run_one(input: &Path, annotations: &Path, output: &Path, layer_only: bool) -> Result<(), String> {
    let pixels = image::open(input)
        .map_err(|e| format!("load failed: {}", e))?
        .to_rgba8();
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut img = Image::from_upload(name, pixels);

    let json = std::fs::read_to_string(annotations)
        .map_err(|e| format!("could not read '{}': {}", annotations.display(), e))?;
    let base_dir = annotations.parent().unwrap_or(Path::new("."));
    for a in parse_annotations(&json, base_dir)? {
        img.add_annotation(a);
    }

    let rendered = if layer_only {
        compositor::rasterize_annotations(img.width, img.height, &img.annotations)
    } else {
        img.pixels
            .as_ref()
            .and_then(|base| compositor::compose_context(base, img.width, img.height, &img.annotations))
    };
    let Some(rendered) = rendered else {
        return Err("no annotations: the edit would apply to the whole image".to_string());
    };

    let png = compositor::encode_png(&rendered).map_err(|e| format!("encode failed: {}", e))?;
    std::fs::write(output, png).map_err(|e| format!("save failed: {}", e))?;
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn sidecar_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{}.annotations.json", stem))
}

/// Priority: `--output`, then `--output-dir/<stem>_guide.png`, then
/// `<stem>_guide.png` next to the input.
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    let file = format!("{}_guide.png", stem);
    match output_dir {
        Some(dir) => Some(dir.join(file)),
        None => Some(input.parent().unwrap_or(Path::new(".")).join(file)),
    }
}
