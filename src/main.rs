// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! QubitOS AWG compiler
//!
//! Compiles pulse programs into sequencer tables and dry-runs uploads against
//! a simulated instrument.
//!
//! # Usage
//!
//! ```bash
//! # Show the tables a program compiles to
//! qubit-os-awg compile program.yaml
//!
//! # Upload and arm on a simulated instrument, report memory usage
//! qubit-os-awg simulate program.yaml --pair CD --run
//!
//! # Show effective configuration
//! qubit-os-awg --config awg.yaml config
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use qubit_os_awg::clock::SampleClock;
use qubit_os_awg::config::{Config, DeviceConfig};
use qubit_os_awg::device::{MirroredDevice, SimulatedDevice};
use qubit_os_awg::program::{make_compatible, ProgramDescription};
use qubit_os_awg::tabor::{
    identity_transform, ProgramSummary, SlotInfo, TaborAwg, TaborProgram, WaveformMode,
};
use qubit_os_awg::validation::validate_channel_assignment;
use qubit_os_awg::{Error, Result, VERSION};

/// QubitOS AWG program compiler
#[derive(Parser)]
#[command(name = "qubit-os-awg")]
#[command(author = "QubitOS Contributors")]
#[command(version = VERSION)]
#[command(about = "Pulse program compiler and segment memory manager for Tabor AWGs")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a program description and print its tables
    Compile {
        /// Program description (YAML or JSON)
        program: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },

    /// Upload a program to a simulated instrument and arm it
    Simulate {
        /// Program description (YAML or JSON)
        program: PathBuf,

        /// Channel pair (AB or CD)
        #[arg(long, default_value = "AB")]
        pair: String,

        /// Program name
        #[arg(long, default_value = "program")]
        name: String,

        /// Sample rate override in samples per second
        #[arg(long, env = "QUBITOS_AWG_SAMPLE_RATE")]
        sample_rate: Option<f64>,

        /// Trigger the armed program
        #[arg(long)]
        run: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },

    /// Show effective configuration
    Config,

    /// Validate configuration file
    Validate,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

/// Result of a simulated upload.
#[derive(Serialize)]
struct SimulationReport {
    channel_pair: String,
    program: ProgramSummary,
    armed: Option<String>,
    triggered: bool,
    slots: Vec<SlotInfo>,
    free_points_in_total: u64,
    free_points_at_end: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);

    match cli.command {
        Commands::Compile { program, format } => {
            config.validate()?;

            let description = ProgramDescription::from_file(&program)?;
            validate_channel_assignment(&description.channels, &description.markers)?;
            let mut tree = description.to_loop()?;

            let clock = SampleClock::from_samples_per_second(config.device.sample_rate)
                .map_err(Error::Config)?;
            make_compatible(&mut tree, &config.sampling.constraints(), &clock)?;
            let compiled = TaborProgram::compile(
                tree,
                &config.device.properties,
                &description.channels,
                &description.markers,
            )?;

            info!(
                program = %program.display(),
                mode = %compiled.mode(),
                waveforms = compiled.waveforms().len(),
                "Compiled program"
            );
            print_output(&compiled.summary(), format)?;
        }

        Commands::Simulate {
            program,
            pair,
            name,
            sample_rate,
            run,
            format,
        } => {
            // Override config with CLI args
            if let Some(rate) = sample_rate {
                config.device.sample_rate = rate;
            }
            config.validate()?;

            let description = ProgramDescription::from_file(&program)?;
            validate_channel_assignment(&description.channels, &description.markers)?;
            let tree = description.to_loop()?;

            let device = simulated_device(&config.device);
            let mut awg = TaborAwg::connect(device, &config.instrument_options())?;
            let channel_pair = awg.channel_pair_mut(&pair)?;

            if let Err(e) = channel_pair.upload(
                &name,
                tree,
                &description.channels,
                &description.markers,
                &[identity_transform(), identity_transform()],
                false,
            ) {
                error!(program = %name, error = %e, "Upload failed");
                return Err(e);
            }
            channel_pair.arm(Some(&name))?;
            if run {
                channel_pair.run_current_program()?;
            }

            let compiled = channel_pair.program(&name)?;
            if compiled.mode() == WaveformMode::Advanced {
                info!(
                    sequencer_tables = compiled.sequencer_tables().len(),
                    "Program uses the advanced sequencer"
                );
            }
            let memory = channel_pair.memory();
            let report = SimulationReport {
                channel_pair: channel_pair.identifier().to_string(),
                program: compiled.summary(),
                armed: channel_pair.armed_program().map(str::to_string),
                triggered: run,
                slots: memory.slots(),
                free_points_in_total: memory.free_points_in_total(),
                free_points_at_end: memory.free_points_at_end(),
            };
            print_output(&report, format)?;
        }

        Commands::Config => {
            // Show effective configuration
            println!("{}", serde_yaml::to_string(&config)?);
        }

        Commands::Validate => {
            // Validate configuration
            match config.validate() {
                Ok(()) => {
                    println!("Configuration is valid");
                }
                Err(e) => {
                    eprintln!("Configuration error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Initialize logging with tracing.
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

/// Build the simulated instrument, mirrored as configured.
fn simulated_device(config: &DeviceConfig) -> MirroredDevice<SimulatedDevice> {
    let build = |name: String| {
        let mut device = SimulatedDevice::new(name, config.properties.clone())
            .with_sample_rate(config.sample_rate)
            .with_amplitude(config.amplitude)
            .with_coupling(config.coupled);
        for channel in 1..=4 {
            if let Some(settings) = device.channel_mut(channel) {
                settings.offset = config.offset;
            }
        }
        device
    };

    let primary = build(config.identifier.clone());
    let mirrors = (1..=config.mirrors)
        .map(|i| build(format!("{}_mirror{}", config.identifier, i)))
        .collect();
    MirroredDevice::new(primary, mirrors)
}

fn print_output<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
