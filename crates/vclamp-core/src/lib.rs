//! # vclamp Core
//!
//! Shared types and utilities for voltage-clamp model simulation.
//!
//! ## Contents
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`VclampError`] | Error taxonomy shared by every crate in the workspace |
//! | [`TimeGrid`] | Adaptive or fixed output time grid |
//! | [`SimulationResult`] | Named output channels against a shared time axis |
//! | [`deinterleave`] | Reshape a flat per-step, per-channel buffer into channels |
//!
//! ## Error kinds
//!
//! Callers recover differently depending on where a request failed, so every
//! failure is tagged with an [`ErrorKind`]:
//!
//! 1. `Validation` - fix the protocol or parameters and retry
//! 2. `Assembly` - the model template and its configuration disagree
//! 3. `Compile` - the engine rejected the generated model
//! 4. `Solve` - numerical failure, the compiled model is still usable

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Time point (ms)
pub type Time = f64;

/// Voltage (mV)
pub type Voltage = f64;

/// Current (pA or A/F depending on the output)
pub type Current = f64;

// =============================================================================
// ERRORS
// =============================================================================

/// Malformed request, raised before the engine is touched
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Protocol has no steps")]
    EmptyProtocol,

    #[error("Protocol arrays differ in length: {voltage} voltages, {duration} durations, {ramp} ramp flags")]
    LengthMismatch {
        voltage: usize,
        duration: usize,
        ramp: usize,
    },

    #[error("Step {step} has invalid duration {duration} (must be finite and > 0)")]
    InvalidDuration { step: usize, duration: f64 },

    #[error("Step {step} has non-finite voltage {voltage}")]
    InvalidVoltage { step: usize, voltage: f64 },

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Parameter {name} is not finite: {value}")]
    NonFiniteParameter { name: String, value: f64 },

    #[error("Fixed time grid needs at least 2 points, got {0}")]
    InvalidStepCount(usize),

    #[error("Unknown model variant: {0}")]
    UnknownVariant(String),

    #[error("Logistic threshold steepness must be finite and > 0, got {0}")]
    InvalidSteepness(f64),
}

/// Template and configuration disagree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("Template for variant {variant} has no {slot} marker `{marker}`")]
    MissingMarker {
        variant: String,
        slot: String,
        marker: String,
    },

    #[error("Template for variant {variant} has {count} {slot} markers `{marker}`, expected one")]
    DuplicateMarker {
        variant: String,
        slot: String,
        marker: String,
        count: usize,
    },

    #[error("Template for variant {variant} has overlapping markers for {first} and {second}")]
    OverlappingMarkers {
        variant: String,
        first: String,
        second: String,
    },
}

/// The engine rejected a model source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Model source rejected: {0}")]
    Rejected(String),

    #[error("Solver construction failed: {0}")]
    SolverSetup(String),
}

/// Numerical failure during a solve
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("Solver did not converge: {0}")]
    NonConvergence(String),

    #[error("Solver exceeded its step budget of {max_steps}")]
    StepBudgetExceeded { max_steps: usize },

    #[error("Output buffer of length {len} does not fit {channels} channels over {steps} time points")]
    OutputShape {
        len: usize,
        channels: usize,
        steps: usize,
    },

    #[error("No compiled model for variant {0}")]
    NotCompiled(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Which stage of a request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Assembly,
    Compile,
    Solve,
}

/// Common errors
#[derive(Debug, Error)]
pub enum VclampError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Solve error: {0}")]
    Solve(#[from] SolveError),
}

impl VclampError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Assembly(_) => ErrorKind::Assembly,
            Self::Compile(_) => ErrorKind::Compile,
            Self::Solve(_) => ErrorKind::Solve,
        }
    }
}

pub type Result<T> = std::result::Result<T, VclampError>;

// =============================================================================
// TIME GRID
// =============================================================================

/// Output time grid requested from the solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimeGrid {
    /// Two endpoints; the integrator picks its own output points
    #[default]
    Adaptive,
    /// `step_count` evenly spaced points from 0 to the end time inclusive.
    /// Spacing is `max_time / (step_count - 1)`.
    Fixed { step_count: usize },
}

impl TimeGrid {
    /// Whether the solver must report exactly the requested points
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed { .. })
    }

    /// Build the grid spanning `[0, max_time]`
    pub fn times(&self, max_time: Time) -> std::result::Result<Vec<Time>, ValidationError> {
        match *self {
            Self::Adaptive => Ok(vec![0.0, max_time]),
            Self::Fixed { step_count } if step_count < 2 => {
                Err(ValidationError::InvalidStepCount(step_count))
            }
            Self::Fixed { step_count } => Ok(Array1::linspace(0.0, max_time, step_count).to_vec()),
        }
    }
}

// =============================================================================
// OUTPUT CHANNELS
// =============================================================================

/// Split an interleaved buffer into `channels` sequences.
///
/// The engine writes all channels for time step 0, then all channels for
/// time step 1, and so on: channel `k` at step `j` is `flat[j * channels + k]`.
pub fn deinterleave(flat: &[f64], channels: usize) -> std::result::Result<Vec<Vec<f64>>, SolveError> {
    if channels == 0 || flat.len() % channels != 0 {
        return Err(SolveError::OutputShape {
            len: flat.len(),
            channels,
            steps: if channels == 0 { 0 } else { flat.len() / channels },
        });
    }

    let steps = flat.len() / channels;
    let matrix = Array2::from_shape_vec((steps, channels), flat.to_vec()).map_err(|_| {
        SolveError::OutputShape {
            len: flat.len(),
            channels,
            steps,
        }
    })?;

    Ok(matrix.columns().into_iter().map(|column| column.to_vec()).collect())
}

/// Inverse of [`deinterleave`]. All channels must have the same length.
pub fn interleave(channels: &[Vec<f64>]) -> Vec<f64> {
    let steps = channels.first().map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(steps * channels.len());
    for j in 0..steps {
        for channel in channels {
            flat.push(channel[j]);
        }
    }
    flat
}

/// One named output sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Output symbol name
    pub name: String,
    /// Value at each time point
    pub values: Vec<f64>,
}

/// Plotting range hint (reserved, currently never populated)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlotRange {
    pub min: f64,
    pub max: f64,
}

/// Simulation output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Times actually reported by the solver
    pub time: Vec<Time>,
    /// One channel per configured output, in configuration order
    pub channels: Vec<Channel>,
    /// Reserved plotting hint
    pub plot_range: Option<PlotRange>,
}

impl SimulationResult {
    /// Package an interleaved solver buffer.
    ///
    /// Fails unless `flat.len() == names.len() * time.len()`.
    pub fn from_interleaved<S: AsRef<str>>(
        names: &[S],
        flat: &[f64],
        time: Vec<Time>,
    ) -> std::result::Result<Self, SolveError> {
        let shape_error = || SolveError::OutputShape {
            len: flat.len(),
            channels: names.len(),
            steps: time.len(),
        };
        if flat.len() != names.len() * time.len() {
            return Err(shape_error());
        }

        let columns = deinterleave(flat, names.len()).map_err(|_| shape_error())?;
        let channels = names
            .iter()
            .zip(columns)
            .map(|(name, values)| Channel {
                name: name.as_ref().to_string(),
                values,
            })
            .collect();

        Ok(Self {
            time,
            channels,
            plot_range: None,
        })
    }

    /// Number of time points
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Values of a channel by output name
    pub fn channel(&self, name: &str) -> Option<&[f64]> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }

    /// Re-flatten in channel order (the engine's layout)
    pub fn to_interleaved(&self) -> Vec<f64> {
        let columns: Vec<Vec<f64>> = self.channels.iter().map(|c| c.values.clone()).collect();
        interleave(&columns)
    }
}
