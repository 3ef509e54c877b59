//! Thin CLI wrapper (spec.md §6, out of scope for the engine itself): flag
//! parsing and output formatting only. All actual decoding/diffing logic
//! lives in the library.

use clap::{Parser, Subcommand, ValueEnum};
use imgdiff::{compare, render_compare, render_summary, ImageSummary, Inspector, RenderMode};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "imgdiff", version, about = "Inspect and compare bootable OS disk images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect a single image and print its structure.
    Inspect {
        image: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        #[arg(long)]
        pretty: bool,
        #[arg(long)]
        hash_images: bool,
    },
    /// Compare two images and print their differences.
    Compare {
        image1: PathBuf,
        image2: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        #[arg(long, value_enum)]
        mode: Option<CliMode>,
        #[arg(long)]
        pretty: bool,
        #[arg(long)]
        hash_images: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    Diff,
    Summary,
    Full,
}

impl From<CliMode> for RenderMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Diff => RenderMode::Diff,
            CliMode::Summary => RenderMode::Summary,
            CliMode::Full => RenderMode::Full,
        }
    }
}

fn print_summary(summary: &ImageSummary, format: OutputFormat, pretty: bool) -> std::io::Result<()> {
    match format {
        OutputFormat::Text => render_summary(&mut std::io::stdout(), summary),
        OutputFormat::Json => {
            let json = if pretty {
                serde_json::to_string_pretty(summary)
            } else {
                serde_json::to_string(summary)
            }
            .expect("ImageSummary always serializes");
            println!("{json}");
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect {
            image,
            format,
            pretty,
            hash_images,
        } => {
            let inspector = Inspector::new(hash_images);
            match inspector.inspect(&image) {
                Ok(summary) => {
                    if print_summary(&summary, format, pretty).is_err() {
                        return ExitCode::from(1);
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::from(1)
                }
            }
        }
        Commands::Compare {
            image1,
            image2,
            format,
            mode,
            pretty,
            hash_images,
        } => {
            let inspector = Inspector::new(hash_images);
            let from = match inspector.inspect(&image1) {
                Ok(summary) => summary,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::from(1);
                }
            };
            let to = match inspector.inspect(&image2) {
                Ok(summary) => summary,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::from(1);
                }
            };

            let result = compare(&from, &to);
            match format {
                OutputFormat::Text => {
                    let render_mode: RenderMode = mode.map(RenderMode::from).unwrap_or(RenderMode::Diff);
                    if render_compare(&mut std::io::stdout(), &result, render_mode).is_err() {
                        return ExitCode::from(1);
                    }
                }
                OutputFormat::Json => {
                    let json = if pretty {
                        serde_json::to_string_pretty(&result)
                    } else {
                        serde_json::to_string(&result)
                    }
                    .expect("ImageCompareResult always serializes");
                    println!("{json}");
                }
            }
            ExitCode::SUCCESS
        }
    }
}
