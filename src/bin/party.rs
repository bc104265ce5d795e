//! Party CLI - Command-line interface for Motion Party
//!
//! Commands:
//! - serve: Run the WebSocket session server
//! - replay: Run recorded sensor samples through a detector
//! - simulate: Play a scripted game against the session logic
//! - validate: Check a recorded sample file
//! - config: Print the effective configuration
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use motion_party::config::PartyConfig;
use motion_party::detector::DetectorOutput;
use motion_party::pipeline::{check_samples, detect, parse_samples, simulate_game, SimulationPlan};
use motion_party::server::{serve, BaseUrl, Hub};
use motion_party::types::GameMode;
use motion_party::{PartyError, VERSION};

/// Party - motion-controlled party game server and tools
#[derive(Parser)]
#[command(name = "party")]
#[command(version = VERSION)]
#[command(about = "Motion-to-game-event pipeline and session server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket session server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,

        /// Base URL phones use to reach this server (join links)
        #[arg(long)]
        public_url: Option<String>,

        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Game mode
        #[arg(long)]
        mode: Option<Mode>,

        /// Game length in seconds
        #[arg(long)]
        game_secs: Option<u32>,

        /// Snapshot broadcasts per second while playing
        #[arg(long)]
        tick_hz: Option<u32>,
    },

    /// Run recorded sensor samples through a detector
    Replay {
        /// Input file path, newline-delimited samples (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Game mode selecting the detector
        #[arg(long, default_value = "cpr")]
        mode: Mode,

        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Also print calibration and rejection outputs
        #[arg(long)]
        verbose: bool,
    },

    /// Play a scripted game against the session logic
    Simulate {
        #[arg(long, default_value = "cpr")]
        mode: Mode,

        /// Events per minute
        #[arg(long, default_value = "110")]
        rate: f64,

        /// Amplitude reported per event (cm for compressions)
        #[arg(long, default_value = "5.5")]
        amplitude: f64,

        /// Form score reported per event (0-1)
        #[arg(long, default_value = "0.95")]
        form: f64,

        /// Stop after this many events
        #[arg(long)]
        events: Option<u32>,

        /// Disconnect the controller this many ms into the game
        #[arg(long)]
        disconnect_after_ms: Option<u64>,

        /// Game length in seconds
        #[arg(long)]
        game_secs: Option<u32>,

        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Check a recorded sample file
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file to load and validate
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        mode: Option<Mode>,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Chest compressions (accelerometer)
    Cpr,
    /// Push-ups (pose)
    Pushup,
    /// Squats to a beat (pose)
    Squat,
    /// Falling-block puzzle gestures (pose)
    Puzzle,
}

impl From<Mode> for GameMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Cpr => GameMode::Cpr,
            Mode::Pushup => GameMode::Pushup,
            Mode::Squat => GameMode::Squat,
            Mode::Puzzle => GameMode::Puzzle,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let report = serde_json::to_string(&CliError::from(e))
                .unwrap_or_else(|_| "Unknown error".to_string());
            eprintln!("{}", report);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), PartyCliError> {
    match cli.command {
        Commands::Serve {
            bind,
            public_url,
            config,
            mode,
            game_secs,
            tick_hz,
        } => {
            let mut config = load_config(config.as_deref(), mode)?;
            if let Some(secs) = game_secs {
                config.session.game_secs = secs;
            }
            if let Some(hz) = tick_hz {
                config.session.broadcast_hz = hz;
            }
            config.validate()?;
            cmd_serve(bind, public_url, config)
        }

        Commands::Replay {
            input,
            mode,
            config,
            verbose,
        } => {
            let config = load_config(config.as_deref(), Some(mode))?;
            cmd_replay(&input, &config, verbose)
        }

        Commands::Simulate {
            mode,
            rate,
            amplitude,
            form,
            events,
            disconnect_after_ms,
            game_secs,
            config,
        } => {
            let mut config = load_config(config.as_deref(), Some(mode))?;
            config.session.tutorial_secs = 0;
            if let Some(secs) = game_secs {
                config.session.game_secs = secs;
            }
            let plan = SimulationPlan {
                rate_per_min: rate,
                amplitude,
                form,
                events,
                disconnect_after_ms,
            };
            let summary = simulate_game(&config, &plan)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Config { config, mode } => {
            let config = load_config(config.as_deref(), mode)?;
            println!("{}", config.to_json()?);
            Ok(())
        }

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>, mode: Option<Mode>) -> Result<PartyConfig, PartyCliError> {
    let mut config = match path {
        Some(path) => PartyConfig::from_json(&fs::read_to_string(path)?)?,
        None => PartyConfig::default(),
    };
    if let Some(mode) = mode {
        config.session.mode = mode.into();
    }
    Ok(config)
}

fn read_input(input: &Path) -> Result<String, PartyCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(PartyCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_serve(
    bind: SocketAddr,
    public_url: Option<String>,
    config: PartyConfig,
) -> Result<(), PartyCliError> {
    let public_url = public_url.unwrap_or_else(|| format!("http://{}", bind));
    let hub = Hub::new(config, Arc::new(BaseUrl::new(public_url)));
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(bind, hub))?;
    Ok(())
}

fn cmd_replay(input: &Path, config: &PartyConfig, verbose: bool) -> Result<(), PartyCliError> {
    let samples = parse_samples(&read_input(input)?)?;
    if samples.is_empty() {
        return Err(PartyCliError::NoSamples);
    }

    let outputs = detect(config, config.session.mode, &samples);
    let mut report = ReplayReport {
        samples: samples.len(),
        ..ReplayReport::default()
    };
    for output in &outputs {
        let show = match output {
            DetectorOutput::Event { .. } => {
                report.events += 1;
                true
            }
            DetectorOutput::Rejected { .. } => {
                report.rejected += 1;
                verbose
            }
            DetectorOutput::Skipped => {
                report.skipped += 1;
                false
            }
            DetectorOutput::Calibration { .. } | DetectorOutput::SubjectLost => verbose,
            DetectorOutput::Idle | DetectorOutput::Direction { .. } => false,
        };
        if show {
            println!("{}", serde_json::to_string(output)?);
        }
    }
    eprintln!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), PartyCliError> {
    let (samples, issues) = check_samples(&read_input(input)?);
    let report = ValidationReport {
        total_samples: samples,
        problems: issues.len(),
        issues,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Samples:  {}", report.total_samples);
        println!("Problems: {}", report.problems);

        if !report.issues.is_empty() {
            println!("\nIssues:");
            for issue in &report.issues {
                println!("  - line {}: {}", issue.line, issue.problem);
            }
        }
    }

    if report.problems > 0 {
        Err(PartyCliError::ValidationFailed(report.problems))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), PartyCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Motion Party version {}", VERSION),
    });

    let config = match config_path {
        Some(path) if !path.exists() => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist, using defaults".to_string(),
            });
            PartyConfig::default()
        }
        Some(path) => match fs::read_to_string(path)
            .map_err(PartyError::from)
            .and_then(|s| PartyConfig::from_json(&s))
        {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Config valid (mode {})", config.session.mode.as_str()),
                });
                config
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                });
                PartyConfig::default()
            }
        },
        None => PartyConfig::default(),
    };

    let weights = config.scoring().weights.sum();
    checks.push(if (weights - 1.0).abs() < 1e-6 {
        DoctorCheck {
            name: "score_weights".to_string(),
            status: CheckStatus::Ok,
            message: "Score weights sum to 1".to_string(),
        }
    } else {
        DoctorCheck {
            name: "score_weights".to_string(),
            status: CheckStatus::Warning,
            message: format!(
                "Score weights sum to {:.3}; they are renormalized per event",
                weights
            ),
        }
    });

    let hz = config.session.broadcast_hz;
    checks.push(DoctorCheck {
        name: "broadcast_rate".to_string(),
        status: if (1..=30).contains(&hz) {
            CheckStatus::Ok
        } else {
            CheckStatus::Warning
        },
        message: format!("{} snapshots per second while playing", hz),
    });

    // Check stdin is available (for replay from a pipe)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input FILE to replay)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay --input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        version: VERSION.to_string(),
        mode: config.session.mode.as_str().to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Party Doctor Report");
        println!("===================");
        println!("Version: {}", report.version);
        println!("Mode:    {}", report.mode);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(PartyCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum PartyCliError {
    Io(io::Error),
    Party(PartyError),
    Json(serde_json::Error),
    NoInput,
    NoSamples,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for PartyCliError {
    fn from(e: io::Error) -> Self {
        PartyCliError::Io(e)
    }
}

impl From<PartyError> for PartyCliError {
    fn from(e: PartyError) -> Self {
        match e {
            PartyError::Io(e) => PartyCliError::Io(e),
            PartyError::JsonError(e) => PartyCliError::Json(e),
            other => PartyCliError::Party(other),
        }
    }
}

impl From<serde_json::Error> for PartyCliError {
    fn from(e: serde_json::Error) -> Self {
        PartyCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PartyCliError> for CliError {
    fn from(e: PartyCliError) -> Self {
        match e {
            PartyCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(
                    "Check file paths, permissions and that the bind address is free".to_string(),
                ),
            },
            PartyCliError::Party(e) => {
                let (code, hint) = match &e {
                    PartyError::InvalidConfig(_) => {
                        ("CONFIG_ERROR", "Run 'party doctor --config FILE' for details")
                    }
                    PartyError::ParseError(_) => {
                        ("PARSE_ERROR", "Each line must be one accel or pose sample")
                    }
                    _ => ("PARTY_ERROR", "Re-run with RUST_LOG=debug for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            PartyCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PartyCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "stdin is a terminal".to_string(),
                hint: Some("Pipe samples in or pass --input FILE".to_string()),
            },
            PartyCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No samples found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            PartyCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} problems found", count),
                hint: Some("Fix the listed lines and retry".to_string()),
            },
            PartyCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(Default, serde::Serialize)]
struct ReplayReport {
    samples: usize,
    events: usize,
    rejected: usize,
    skipped: usize,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    total_samples: usize,
    problems: usize,
    issues: Vec<motion_party::pipeline::SampleIssue>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    version: String,
    mode: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
