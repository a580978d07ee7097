//! # vclamp CLI
//!
//! Inspect voltage-clamp protocols, variant registries and assembled model
//! sources without an engine attached.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use log::{info, Level, LevelFilter, Log, Metadata, Record};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use vclamp_core::TimeGrid;
use vclamp_diffsl::protocol::DEFAULT_STEEPNESS;
use vclamp_diffsl::variants::IDEAL_VC;
use vclamp_diffsl::{
    pack_inputs, registry, synthesize, ModelAssembler, ModelConfiguration, Protocol, ProtocolStep,
    SimulationRequest, Threshold,
};

#[derive(Parser)]
#[command(name = "vclamp")]
#[command(author = "Yatrogenesis")]
#[command(version)]
#[command(about = "Voltage-clamp model assembly toolkit", long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List model variants
    Variants,

    /// Print the default parameter set of a variant as JSON
    Params {
        /// Variant id
        variant: String,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the synthesized command voltage for a protocol
    Protocol {
        #[command(flatten)]
        protocol: ProtocolArgs,
        #[command(flatten)]
        threshold: ThresholdArgs,
        /// Tabulate the waveform at this many evenly spaced times
        #[arg(short, long)]
        samples: Option<usize>,
    },

    /// Assemble the model source for a variant and protocol
    Assemble {
        /// Variant id
        variant: String,
        #[command(flatten)]
        protocol: ProtocolArgs,
        #[command(flatten)]
        threshold: ThresholdArgs,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the time grid for a simulation length
    Grid {
        /// Simulation end time (ms)
        max_time: f64,
        /// Fixed grid point count; adaptive if omitted
        #[arg(short = 'n', long)]
        steps: Option<usize>,
    },

    /// Validate a request file up to model assembly
    Check {
        /// Request JSON file
        request: PathBuf,
        #[command(flatten)]
        threshold: ThresholdArgs,
    },
}

#[derive(Args)]
struct ProtocolArgs {
    /// Step voltages (mV), comma separated
    #[arg(
        long,
        value_delimiter = ',',
        allow_hyphen_values = true,
        required_unless_present = "file",
        conflicts_with = "file"
    )]
    voltage: Vec<f64>,

    /// Step durations (ms), comma separated
    #[arg(long, value_delimiter = ',', requires = "voltage")]
    duration: Vec<f64>,

    /// Indices of steps that ramp in from the previous voltage
    #[arg(long, value_delimiter = ',', requires = "voltage")]
    ramp: Vec<usize>,

    /// Protocol JSON file with `voltage`, `duration` and optional `is_ramp`
    #[arg(short = 'f', long = "protocol-file")]
    file: Option<PathBuf>,
}

impl ProtocolArgs {
    fn load(&self) -> anyhow::Result<Protocol> {
        if let Some(path) = &self.file {
            return read_json(path);
        }

        if let Some(&index) = self.ramp.iter().find(|&&i| i >= self.voltage.len()) {
            bail!("ramp index {} out of range for {} steps", index, self.voltage.len());
        }
        let is_ramp: Vec<bool> = (0..self.voltage.len())
            .map(|i| self.ramp.contains(&i))
            .collect();

        Ok(Protocol::from_arrays(&self.voltage, &self.duration, &is_ramp)?)
    }
}

#[derive(Args)]
struct ThresholdArgs {
    /// Use a hard step instead of the logistic gate
    #[arg(long)]
    heaviside: bool,

    /// Logistic gate steepness (1/ms)
    #[arg(long, default_value_t = DEFAULT_STEEPNESS, conflicts_with = "heaviside")]
    steepness: f64,
}

impl ThresholdArgs {
    fn threshold(&self) -> anyhow::Result<Threshold> {
        if self.heaviside {
            return Ok(Threshold::Heaviside);
        }
        Ok(Threshold::logistic(self.steepness)?)
    }
}

// =============================================================================
// LOGGING
// =============================================================================

struct CliLogger;

static LOGGER: CliLogger = CliLogger;

impl Log for CliLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "error".red().bold(),
            Level::Warn => "warn".yellow().bold(),
            Level::Info => "info".green(),
            Level::Debug => "debug".blue(),
            Level::Trace => "trace".dimmed(),
        };
        eprintln!("{:>5} {}", tag, record.args());
    }

    fn flush(&self) {}
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    log::set_logger(&LOGGER).map_err(|e| anyhow::anyhow!("logger: {}", e))?;
    log::set_max_level(level);
    Ok(())
}

// =============================================================================
// HELPERS
// =============================================================================

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn emit(text: &str, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            println!("{} {}", "Wrote".green().bold(), path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn describe_step(i: usize, step: &ProtocolStep, effective_ramp: bool) -> String {
    let kind = if effective_ramp {
        "ramp".yellow()
    } else {
        "hold".normal()
    };
    format!(
        "  {:>3}  {} {:>8} mV  {:>8} ms",
        i, kind, step.voltage, step.duration
    )
}

// =============================================================================
// COMMANDS
// =============================================================================

fn list_variants() {
    println!("{}", "Model variants:".green().bold());
    for config in registry() {
        println!();
        println!("  {} - {}", config.id.cyan().bold(), config.description);
        println!("      inputs:  {} parameters", config.parameter_count());
        println!("      outputs: {}", config.outputs.join(", "));
    }
}

fn show_protocol(protocol: &Protocol, threshold: Threshold, samples: Option<usize>) -> anyhow::Result<()> {
    println!("{}", "Protocol:".green().bold());
    for (i, step) in protocol.steps().iter().enumerate() {
        println!("{}", describe_step(i, step, protocol.is_effective_ramp(i)));
    }
    println!("  total: {} ms", protocol.total_duration());

    let wave = synthesize(protocol, IDEAL_VC, threshold);
    let breakpoints: Vec<String> = wave.breakpoints().iter().map(|t| t.to_string()).collect();
    println!();
    println!("{}", "Command voltage:".green().bold());
    println!("{}", wave);
    println!("  breakpoints: [{}]", breakpoints.join(", "));

    if let Some(count) = samples {
        let times = TimeGrid::Fixed { step_count: count }.times(protocol.total_duration())?;
        println!();
        println!("{:>12}  {:>12}", "t (ms)".cyan(), "V (mV)".cyan());
        for t in times {
            println!("{:>12.3}  {:>12.4}", t, wave.eval(t));
        }
    }
    Ok(())
}

fn check_request(path: &Path, threshold: Threshold) -> anyhow::Result<()> {
    let request: SimulationRequest = read_json(path)?;
    info!("Loaded request for variant {}", request.variant);

    let config = ModelConfiguration::get(&request.variant)?;
    let inputs = pack_inputs(config, &request.parameters)?;
    let max_time = request.protocol.total_duration();
    let times = request.time_grid.times(max_time)?;
    let source = ModelAssembler::new(threshold)?.assemble(config, &request.protocol)?;

    let ignored: Vec<&str> = request
        .parameters
        .keys()
        .filter(|name| config.parameter_map().all(|b| b.name != name.as_str()))
        .map(String::as_str)
        .collect();

    println!("{} {}", "Request OK:".green().bold(), path.display());
    println!("  variant:  {} ({})", config.id.cyan(), config.description);
    println!("  inputs:   {}", inputs.len());
    println!("  steps:    {}", request.protocol.len());
    let mode = if request.time_grid.is_fixed() { "fixed" } else { "adaptive" };
    println!("  grid:     {}, {} requested times over [0, {}]", mode, times.len(), max_time);
    println!("  outputs:  {}", config.outputs.join(", "));
    println!("  source:   {} lines", source.as_str().lines().count());
    if !ignored.is_empty() {
        println!("  {} {}", "ignored parameters:".yellow(), ignored.join(", "));
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Variants => list_variants(),

        Commands::Params { variant, output } => {
            let config = ModelConfiguration::get(&variant)?;
            let defaults: BTreeMap<String, f64> = config.default_parameters().into_iter().collect();
            emit(&serde_json::to_string_pretty(&defaults)?, output.as_deref())?;
        }

        Commands::Protocol {
            protocol,
            threshold,
            samples,
        } => {
            show_protocol(&protocol.load()?, threshold.threshold()?, samples)?;
        }

        Commands::Assemble {
            variant,
            protocol,
            threshold,
            output,
        } => {
            let config = ModelConfiguration::get(&variant)?;
            let protocol = protocol.load()?;
            info!("Assembling variant {} for {} steps", config.id, protocol.len());
            let source = ModelAssembler::new(threshold.threshold()?)?.assemble(config, &protocol)?;
            emit(source.as_str(), output.as_deref())?;
        }

        Commands::Grid { max_time, steps } => {
            if !(max_time.is_finite() && max_time > 0.0) {
                bail!("max time must be positive, got {}", max_time);
            }
            let grid = match steps {
                Some(step_count) => TimeGrid::Fixed { step_count },
                None => TimeGrid::Adaptive,
            };
            let times = grid.times(max_time)?;
            println!("{} {} points", "Grid:".green().bold(), times.len());
            for t in times {
                println!("{}", t);
            }
        }

        Commands::Check { request, threshold } => {
            check_request(&request, threshold.threshold()?)?;
        }
    }

    Ok(())
}
