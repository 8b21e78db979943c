//! veridock CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use veridock::{
    commands::{
        cmd_convert, cmd_daemon, cmd_export, cmd_extract, cmd_import, cmd_init, cmd_list, cmd_ocr,
        cmd_restart, cmd_scan, cmd_start_detached, cmd_status, cmd_stop, cmd_validate,
        print_conversion, print_export, print_extract, print_import, print_init, print_list,
        print_ocr_job, print_scan, print_start, print_status, print_stop, print_validation,
        ExportFormat,
    },
    config::Config,
    daemon::Scheduler,
    error::{Error, Result},
    export::ExportScope,
    progress::LogWriterFactory,
};

#[derive(Parser)]
#[command(name = "veridock")]
#[command(
    version,
    about = "Turns PDFs in watched folders into searchable SVG containers",
    long_about = None
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and watch list
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Run the watch daemon
    Daemon {
        /// Start in the background and return
        #[arg(short, long)]
        detach: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon state and container OCR status
    Status,

    /// Stop the running daemon, if any, and start a new one in the background
    Restart,

    /// Run one scan tick now
    Scan {
        /// Also run an OCR tick afterwards
        #[arg(long)]
        ocr: bool,
    },

    /// Convert one PDF into a container
    Convert {
        /// PDF to convert
        pdf: PathBuf,

        /// Leave the PDF in place after conversion
        #[arg(long)]
        keep_source: bool,
    },

    /// Run OCR on one container
    Ocr {
        /// Container to process
        svg: PathBuf,

        /// Run again even if OCR already completed
        #[arg(long)]
        force: bool,
    },

    /// Write the embedded original PDF back out
    Extract {
        /// Container to read
        svg: PathBuf,

        /// Output path (defaults to <name>_extracted.pdf)
        output: Option<PathBuf>,

        /// Overwrite an existing output file
        #[arg(long)]
        force: bool,
    },

    /// Check a container's structure and digests
    Validate {
        /// Container to check
        svg: PathBuf,
    },

    /// Export container data as JSON or text
    Export {
        /// Container to read
        svg: PathBuf,

        /// What to export: all, ocr, thumbnails or metadata
        #[arg(short, long, default_value = "all")]
        scope: ExportScope,

        /// Output format: json or text
        #[arg(short, long, default_value = "json")]
        format: ExportFormat,

        /// Output path, or - for stdout (defaults to <name>_export_<scope>.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge OCR data from an export file into a container
    Import {
        /// Container to update
        svg: PathBuf,

        /// Export JSON with an `ocr` array
        json: PathBuf,
    },

    /// List SVG files in a directory, newest first
    List {
        /// Directory to list
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (json_layer, text_layer) = if cli.log_json {
        (
            Some(fmt::layer().json().with_writer(LogWriterFactory)),
            None,
        )
    } else {
        (None, Some(fmt::layer().with_writer(LogWriterFactory)))
    };

    tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init { force } = cli.command {
        let report = cmd_init(init_base_dir(cli.config.as_deref()), force)?;
        return output(cli.json, &report, print_init);
    }

    // Handle completions command (doesn't need config)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "veridock", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let config_file = cli.config.as_deref();

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Daemon { detach: true } => {
            let report = cmd_start_detached(&config, config_file)?;
            output(cli.json, &report, print_start)?;
        }

        Commands::Daemon { detach: false } => {
            let state = cmd_daemon(Arc::new(Scheduler::from_config(config))).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            }
        }

        Commands::Stop => {
            let state = cmd_stop(&config).await?;
            output(cli.json, &state, print_stop)?;
        }

        Commands::Status => {
            let status = cmd_status(&config)?;
            output(cli.json, &status, print_status)?;
        }

        Commands::Restart => {
            let report = cmd_restart(&config, config_file).await?;
            output(cli.json, &report, print_start)?;
        }

        Commands::Scan { ocr } => {
            let scheduler = Scheduler::from_config(config);
            let report = cmd_scan(&scheduler, ocr, !cli.json).await?;
            output(cli.json, &report, print_scan)?;
        }

        Commands::Convert { pdf, keep_source } => {
            let scheduler = Scheduler::from_config(config);
            let conversion =
                cmd_convert(scheduler.config(), scheduler.renderer(), &pdf, keep_source).await?;
            output(cli.json, &conversion, print_conversion)?;
        }

        Commands::Ocr { svg, force } => {
            let scheduler = Scheduler::from_config(config);
            let job = cmd_ocr(
                scheduler.config(),
                scheduler.renderer(),
                scheduler.engine(),
                &svg,
                force,
            )
            .await?;
            output(cli.json, &job, print_ocr_job)?;
        }

        Commands::Extract { svg, output: out, force } => {
            let report = cmd_extract(&svg, out, force)?;
            output(cli.json, &report, print_extract)?;
        }

        Commands::Validate { svg } => {
            let result = cmd_validate(&svg)?;
            output(cli.json, &result, print_validation)?;
            if !result.report.ok {
                return Err(Error::InvalidContainer {
                    path: result.path,
                    problems: result.report.problems.len(),
                });
            }
        }

        Commands::Export {
            svg,
            scope,
            format,
            output: out,
        } => {
            let to_stdout = out.as_deref() == Some(Path::new("-"));
            let report = cmd_export(&svg, scope, format, out)?;
            // stdout already carries the export itself
            if !to_stdout {
                output(cli.json, &report, print_export)?;
            }
        }

        Commands::Import { svg, json } => {
            let report = cmd_import(&svg, &json)?;
            output(cli.json, &report, print_import)?;
        }

        Commands::List { dir } => {
            let listings = cmd_list(&dir)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&listings)?);
            } else {
                print_list(&dir, &listings);
            }
        }
    }

    Ok(())
}

/// Print `value` as JSON or through its human renderer
fn output<T: Serialize + ?Sized>(json: bool, value: &T, print: impl Fn(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

/// Base directory for `init`: the parent of a `.toml` path, a plain
/// directory as given, or the default
fn init_base_dir(path: Option<&Path>) -> Option<PathBuf> {
    let path = path?;
    if path.extension().map_or(false, |e| e == "toml") {
        Some(
            path.parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir),
        )
    } else {
        Some(path.to_path_buf())
    }
}

/// An explicit `--config` must exist; otherwise the default location is
/// used, falling back to built-in defaults
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::load_from(None),
    }
}
