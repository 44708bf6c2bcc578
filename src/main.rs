use anyhow::Result;
use clap::Parser;
use regex::Regex;
use std::path::PathBuf;
use std::process::ExitCode;
use tessera_golden::config::{ConfigDiscovery, HarnessConfig};
use tessera_golden::internal::fixtures;
use tessera_golden::{
    BaselineStore, ConfigurationError, DiffReporter, Harness, HarnessError, HarnessOptions, Mode,
    ProcessRenderer,
};

/// Exit status for problems found before any fixture ran.
const EXIT_CONFIGURATION: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "tessera-golden",
    about = "Render golden fixtures headlessly and check them against stored baselines",
    version
)]
struct Cli {
    /// `verify` compares against baselines; `update` rewrites them
    #[arg(value_enum, default_value_t = Mode::Verify)]
    mode: Mode,

    /// Config file (default: golden.ron in the working directory or next to the binary)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding fixture case files and documents
    #[arg(long, value_name = "DIR")]
    fixtures: Option<PathBuf>,

    /// Directory holding accepted baselines
    #[arg(long, value_name = "DIR")]
    baselines: Option<PathBuf>,

    /// Directory receiving diff reports for failing fixtures
    #[arg(long, value_name = "DIR")]
    diffs: Option<PathBuf>,

    /// Parent directory for per-fixture scratch output
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Renderer executable
    #[arg(long, value_name = "PATH")]
    renderer: Option<PathBuf>,

    /// Argument passed to the renderer before `headless` (repeatable)
    #[arg(long = "renderer-arg", value_name = "ARG", allow_hyphen_values = true)]
    renderer_args: Vec<String>,

    /// Kill a renderer invocation after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Only run fixtures whose name matches this regex
    #[arg(long, value_name = "REGEX")]
    filter: Option<String>,

    /// Store a baseline for fixtures that have none instead of failing
    #[arg(long)]
    establish_missing: bool,
}

impl Cli {
    fn apply(self, config: &mut HarnessConfig) {
        if let Some(dir) = self.fixtures {
            config.fixture_dir = dir;
        }
        if let Some(dir) = self.baselines {
            config.baseline_dir = dir;
        }
        if let Some(dir) = self.diffs {
            config.diff_dir = dir;
        }
        if let Some(dir) = self.work_dir {
            config.work_dir = Some(dir);
        }
        if let Some(program) = self.renderer {
            config.renderer.program = program;
        }
        if !self.renderer_args.is_empty() {
            config.renderer.args = self.renderer_args;
        }
        if let Some(secs) = self.timeout {
            config.renderer.timeout_secs = Some(secs);
        }
        if let Some(filter) = self.filter {
            config.filter = Some(filter);
        }
        config.establish_missing |= self.establish_missing;
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let discovery = match &cli.config {
        Some(path) => match HarnessConfig::load_from(path) {
            Ok(config) => ConfigDiscovery {
                config,
                source: Some(path.clone()),
                errors: Vec::new(),
            },
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::from(EXIT_CONFIGURATION);
            }
        },
        None => HarnessConfig::discover(),
    };
    let mut config = discovery.config;

    // Held until exit so buffered file logs are flushed.
    let _guard = init_tracing(&config);
    for err in &discovery.errors {
        tracing::error!("{err}");
    }
    match &discovery.source {
        Some(path) => tracing::info!("Loaded config from {}", path.display()),
        None if discovery.errors.is_empty() => {
            tracing::info!("No config file found, using defaults")
        }
        None => tracing::warn!("Continuing with default config"),
    }

    let mode = cli.mode;
    cli.apply(&mut config);

    match run(mode, &config) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            let code = match err.downcast_ref::<HarnessError>() {
                Some(HarnessError::Configuration(_)) => EXIT_CONFIGURATION,
                _ => 1,
            };
            tracing::error!(error = %format!("{err:#}"), "golden run aborted");
            eprintln!("[tessera-golden] {err:#}");
            ExitCode::from(code)
        }
    }
}

fn run(mode: Mode, config: &HarnessConfig) -> Result<u8> {
    let filter = config
        .filter
        .as_deref()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| ConfigurationError::InvalidFilter {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
        .map_err(HarnessError::from)?;

    let fixtures = fixtures::discover(&config.fixture_dir, config.defaults, filter.as_ref())
        .map_err(HarnessError::from)?;

    let renderer = ProcessRenderer::new(&config.renderer.program)
        .with_prefix_args(config.renderer.args.clone())
        .with_timeout(config.renderer.timeout());
    let harness = Harness::new(
        renderer,
        BaselineStore::new(&config.baseline_dir),
        DiffReporter::new(&config.diff_dir),
        HarnessOptions {
            mode,
            establish_missing: config.establish_missing,
            work_dir: config.work_dir.clone(),
        },
    );

    let result = harness.run_with(&fixtures, |outcome| println!("{}", outcome.line()))?;

    println!();
    print!("{}", result.summary());
    Ok(result.exit_code())
}

fn init_tracing(config: &HarnessConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // If RUST_LOG is set, it takes precedence. Otherwise, build from config.
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::EnvFilter::from_default_env(),
        Err(_) => tracing_subscriber::EnvFilter::new(config.logging.filter_directives()),
    };

    match config.logging.log_directory.as_deref() {
        Some(log_dir) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "tessera-golden.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .compact()
                .init();
            Some(guard)
        }
        None => {
            // stdout carries the report, so logs go to stderr.
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .compact()
                .init();
            None
        }
    }
}
