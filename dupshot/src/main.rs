//! dupshot — entry point.
//!
//! ```text
//! dupshot                        Capture the primary output to screen.ppm
//! dupshot -o desk.bmp            Capture to a BMP file
//! dupshot --output-index 1       Capture the second output
//! dupshot --cursor hidden        Leave the cursor out
//! dupshot --config <path>        Load a custom config TOML
//! dupshot --gen-config           Write default config to stdout
//! dupshot --gen-config <path>    Write default config to a file
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dupshot::config::ShotConfig;
use dupshot_core::CursorMode;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "dupshot", about = "Capture one frame of a display output, with cursor")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "dupshot.toml")]
    config: PathBuf,

    /// Write the default configuration to PATH (stdout when omitted or "-") and exit.
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = "-")]
    gen_config: Option<PathBuf>,

    /// Destination file (overrides `output.path`).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output (monitor) index (overrides `capture.output_index`).
    #[arg(long)]
    output_index: Option<u32>,

    /// Per-attempt wait in milliseconds (overrides `capture.timeout_ms`).
    #[arg(long)]
    timeout_ms: Option<u32>,

    /// Cursor source (overrides `cursor.mode`).
    #[arg(long, value_enum)]
    cursor: Option<CursorArg>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CursorArg {
    Duplication,
    Gdi,
    Hidden,
}

impl From<CursorArg> for CursorMode {
    fn from(arg: CursorArg) -> Self {
        match arg {
            CursorArg::Duplication => CursorMode::Duplication,
            CursorArg::Gdi => CursorMode::Gdi,
            CursorArg::Hidden => CursorMode::Hidden,
        }
    }
}

impl Cli {
    fn apply(&self, config: &mut ShotConfig) {
        if let Some(path) = &self.output {
            config.output.path = path.clone();
        }
        if let Some(index) = self.output_index {
            config.capture.output_index = index;
        }
        if let Some(ms) = self.timeout_ms {
            config.capture.timeout_ms = ms;
        }
        if let Some(cursor) = self.cursor {
            config.cursor.mode = cursor.into();
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if let Some(target) = &cli.gen_config {
        let written = if target.as_os_str() == "-" {
            ShotConfig::default_toml().map(|text| println!("{text}"))
        } else {
            ShotConfig::write_default(target)
        };
        return match written {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("dupshot: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let mut config = match ShotConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dupshot: {e}");
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("dupshot v{}", env!("CARGO_PKG_VERSION"));

    let result = config
        .to_capture_config()
        .and_then(|capture| dupshot::shot::run(&capture));
    match result {
        Ok(path) => {
            info!("wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("dupshot: {e}");
            ExitCode::FAILURE
        }
    }
}
