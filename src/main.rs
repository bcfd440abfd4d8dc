//! `com2bindings`, generates Rust bindings from `com` device declarations.
//!
//! ```text
//! USAGE:
//!   com2bindings [OPTIONS] <CONFIGS>...
//!   com2bindings --check lcd_128x64.json    Validate only
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use com2bindings::{
    check_device_file, generate_device_files, Backend, GeneratorConfig,
    RustBackend,
};

#[derive(Parser)]
#[command(name = "com2bindings", about = "Device bindings generator", version)]
struct Cli {
    /// Device declarations, `.json` or `.toml`.
    #[arg(required = true)]
    configs: Vec<PathBuf>,

    /// Where the generated files go.
    #[arg(short, long, default_value = "bindings")]
    out_dir: PathBuf,

    /// Generator settings (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only build and validate the declarations.
    #[arg(long)]
    check: bool,

    /// Run `rustfmt` on the generated files.
    #[arg(long)]
    rustfmt: bool,

    /// More logging, repeat for trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::Error,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = SimpleLogger::new().with_level(cli.level()).init() {
        eprintln!("logger: {err}");
    }
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => GeneratorConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GeneratorConfig::default(),
    };
    let backend = RustBackend::new(&config);

    // devices share nothing, one thread each
    let results: Vec<Result<()>> = std::thread::scope(|scope| {
        let workers: Vec<_> = cli
            .configs
            .iter()
            .map(|path| {
                let (config, backend) = (&config, &backend);
                scope.spawn(move || process(cli, path, config, backend))
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| match worker.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("device worker panicked")),
            })
            .collect()
    });

    let mut failed = 0;
    for (path, result) in cli.configs.iter().zip(results) {
        if let Err(err) = result {
            error!("{}: {err:#}", path.display());
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} device(s) failed", cli.configs.len());
    }
    Ok(())
}

fn process(
    cli: &Cli,
    path: &Path,
    config: &GeneratorConfig,
    backend: &RustBackend,
) -> Result<()> {
    if cli.check {
        let device = check_device_file(path, config)?;
        info!(
            "{}: {} packets ok",
            device.full_name(),
            device.packets.len()
        );
        return Ok(());
    }
    let files = generate_device_files(path, &cli.out_dir, config, backend)?;
    if cli.rustfmt {
        for file in &files {
            rustfmt(file)?;
        }
    }
    info!("{}: {} file(s) from {}", backend.name(), files.len(), path.display());
    Ok(())
}

fn rustfmt(file: &Path) -> Result<()> {
    let status = std::process::Command::new("rustfmt")
        .arg("--edition")
        .arg("2021")
        .arg(file)
        .status()
        .context("running rustfmt")?;
    if !status.success() {
        bail!("rustfmt failed on {} ({status})", file.display());
    }
    Ok(())
}
