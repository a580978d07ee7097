//! # DIFFSL-RS
//!
//! Voltage-clamp model assembly and simulation driving for DiffSL engines.
//!
//! ## Pipeline
//!
//! 1. **Protocol synthesis**: a step list (voltage, duration, ramp flag)
//!    becomes one differentiable command-voltage expression
//! 2. **Model assembly**: the expression, the variant's input symbols and
//!    its output list are written into the variant's equation template
//! 3. **Solver lifecycle**: one compiled solver per variant, rebuilt only
//!    when the model source or solver options change
//! 4. **Simulation**: inputs are packed in parameter-map order, the engine
//!    solves over an adaptive or fixed grid, and the interleaved output is
//!    split into named channels
//!
//! The engine itself is external; implement [`DiffEqEngine`] to plug one in.
//!
//! ```ignore
//! use vclamp_diffsl::{Protocol, SimulationContext, SimulationRequest, ModelConfiguration};
//!
//! let context = SimulationContext::new(engine);
//! let protocol = Protocol::holds(&[-80.0, 40.0, -40.0], &[500.0, 500.0, 500.0])?;
//! let parameters = ModelConfiguration::get("2")?.default_parameters();
//! let result = context.run(&SimulationRequest::new("2", protocol, parameters))?;
//! let current = result.channel("voltageClampIOut");
//! ```

pub mod assembler;
pub mod engine;
pub mod lifecycle;
pub mod orchestrator;
pub mod protocol;
pub mod template;
pub mod variants;

pub use assembler::{ModelAssembler, ModelSource};
pub use engine::{CompiledModel, DiffEqEngine, EngineVector, ScopedVector, SolverOptions};
pub use lifecycle::{SolverLifecycle, SolverState, SolverStatus};
pub use orchestrator::{pack_inputs, SimulationContext, SimulationRequest, SolverConfig};
pub use protocol::{synthesize, CommandWaveform, Protocol, ProtocolStep, Threshold};
pub use variants::{registry, ModelConfiguration, ParameterBinding};
