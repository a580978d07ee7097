//! Simulation entry point.
//!
//! [`SimulationContext`] owns the engine and every compiled solver. A run
//! validates the request, assembles the variant's model, makes sure a solver
//! compiled from that exact source exists, solves over the requested grid
//! and splits the engine's interleaved output into named channels.

use crate::assembler::ModelAssembler;
use crate::engine::{DiffEqEngine, SolverOptions, DEFAULT_MAX_STEPS};
use crate::lifecycle::{SolverLifecycle, SolverStatus};
use crate::protocol::{Protocol, Threshold};
use crate::variants::ModelConfiguration;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::PoisonError;
use vclamp_core::{Result, SimulationResult, TimeGrid, ValidationError};

/// Context-wide solver settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Bound on internal solver steps
    pub max_steps: usize,
    /// Gate used when synthesizing command voltages
    pub threshold: Threshold,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            threshold: Threshold::default(),
        }
    }
}

/// One simulation to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    /// Model variant id
    pub variant: String,
    pub protocol: Protocol,
    /// Values keyed by external parameter name
    pub parameters: HashMap<String, f64>,
    #[serde(default)]
    pub time_grid: TimeGrid,
    /// Recompile even if the source is unchanged
    #[serde(default)]
    pub recompile: bool,
}

impl SimulationRequest {
    pub fn new(variant: &str, protocol: Protocol, parameters: HashMap<String, f64>) -> Self {
        Self {
            variant: variant.to_string(),
            protocol,
            parameters,
            time_grid: TimeGrid::Adaptive,
            recompile: false,
        }
    }

    pub fn with_time_grid(mut self, time_grid: TimeGrid) -> Self {
        self.time_grid = time_grid;
        self
    }

    pub fn with_recompile(mut self, recompile: bool) -> Self {
        self.recompile = recompile;
        self
    }
}

/// Read parameters in `parameter_map` order. Every mapped name must be
/// present and finite; extra names are ignored.
pub fn pack_inputs(
    config: &ModelConfiguration,
    parameters: &HashMap<String, f64>,
) -> std::result::Result<Vec<f64>, ValidationError> {
    config
        .parameter_map()
        .map(|binding| {
            let Some(&value) = parameters.get(binding.name) else {
                return Err(ValidationError::MissingParameter(binding.name.to_string()));
            };
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteParameter {
                    name: binding.name.to_string(),
                    value,
                });
            }
            Ok(value)
        })
        .collect()
}

/// Owns the engine, the per-variant solvers and the assembly settings
pub struct SimulationContext<E: DiffEqEngine> {
    lifecycle: SolverLifecycle<E>,
    assembler: ModelAssembler,
    config: SolverConfig,
}

impl<E: DiffEqEngine> SimulationContext<E> {
    pub fn new(engine: E) -> Self {
        let config = SolverConfig::default();
        Self {
            lifecycle: SolverLifecycle::new(engine),
            assembler: ModelAssembler::default(),
            config,
        }
    }

    /// Fails if the configured threshold is not a valid gate
    pub fn with_config(
        engine: E,
        config: SolverConfig,
    ) -> std::result::Result<Self, ValidationError> {
        Ok(Self {
            assembler: ModelAssembler::new(config.threshold)?,
            lifecycle: SolverLifecycle::new(engine),
            config,
        })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn assembler(&self) -> &ModelAssembler {
        &self.assembler
    }

    /// Run a simulation. Fails as a whole; no partial result is returned.
    pub fn run(&self, request: &SimulationRequest) -> Result<SimulationResult> {
        let config = ModelConfiguration::get(&request.variant)?;
        let inputs = pack_inputs(config, &request.parameters)?;

        let max_time = request.protocol.total_duration();
        let times = request.time_grid.times(max_time)?;
        debug!(
            "Variant {}: max time {}, {} grid points requested",
            config.id,
            max_time,
            times.len()
        );

        let source = self.assembler.assemble(config, &request.protocol)?;
        let options = SolverOptions {
            fixed_times: request.time_grid.is_fixed(),
            max_steps: self.config.max_steps,
        };

        let slot = self.lifecycle.slot(config.id);
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);

        // Compiles on first use, after a source or option change, or when
        // another variant has been loaded since
        info!("Solving variant {} over [0, {}]", config.id, max_time);
        let (flat, actual_times) = self.lifecycle.solve(
            &mut slot,
            source.as_str(),
            options,
            request.recompile,
            &times,
            &inputs,
        )?;
        let result = SimulationResult::from_interleaved(config.outputs, &flat, actual_times)?;
        debug!(
            "Variant {}: {} time points x {} channels",
            config.id,
            result.len(),
            result.channels.len()
        );

        slot.last_result = Some(result.clone());
        Ok(result)
    }

    /// Result of the last successful run for `variant` on its current solver
    pub fn last_result(&self, variant: &str) -> Option<SimulationResult> {
        let slot = self.lifecycle.slot(variant);
        let last = slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_result
            .clone();
        last
    }

    pub fn status(&self, variant: &str) -> SolverStatus {
        self.lifecycle.status(variant)
    }

    /// Variant whose model the engine currently has loaded
    pub fn loaded_variant(&self) -> Option<String> {
        self.lifecycle.loaded_variant()
    }

    /// Drop the compiled solver for `variant`; the next run recompiles
    pub fn release(&self, variant: &str) {
        self.lifecycle.release(variant);
    }

    pub fn with_engine<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        self.lifecycle.with_engine(f)
    }
}
