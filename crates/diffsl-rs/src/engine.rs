//! Contract with the external differential-equation engine.
//!
//! The engine compiles a model source into a solver handle and solves it over
//! a time grid. Its vectors live in engine-owned memory and must be released
//! explicitly; [`ScopedVector`] releases them when dropped, on every exit
//! path.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use vclamp_core::{CompileError, SolveError};

/// Default bound on internal solver steps
pub const DEFAULT_MAX_STEPS: usize = 100_000;

/// Options passed to the solver at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Report exactly the requested times instead of the integrator's own
    pub fixed_times: bool,
    /// Bound on internal steps
    pub max_steps: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            fixed_times: false,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// Engine-owned buffer of `f64`
pub trait EngineVector: Sized {
    fn from_slice(values: &[f64]) -> Self;

    fn to_vec(&self) -> Vec<f64>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the engine memory. Called exactly once, by [`ScopedVector`].
    fn destroy(&mut self);
}

/// Releases the wrapped vector when dropped
#[derive(Debug)]
pub struct ScopedVector<V: EngineVector> {
    inner: V,
}

impl<V: EngineVector> ScopedVector<V> {
    pub fn new(values: &[f64]) -> Self {
        Self {
            inner: V::from_slice(values),
        }
    }
}

impl<V: EngineVector> Deref for ScopedVector<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.inner
    }
}

impl<V: EngineVector> DerefMut for ScopedVector<V> {
    fn deref_mut(&mut self) -> &mut V {
        &mut self.inner
    }
}

impl<V: EngineVector> Drop for ScopedVector<V> {
    fn drop(&mut self) {
        self.inner.destroy();
    }
}

/// A compiled model with its solver
pub trait CompiledModel {
    type Vector: EngineVector;

    /// Solve over `times`. Fills `outputs` with all outputs interleaved per
    /// time step and overwrites `times` with the times actually reported.
    fn solve(
        &mut self,
        times: &mut Self::Vector,
        inputs: &Self::Vector,
        outputs: &mut Self::Vector,
    ) -> Result<(), SolveError>;

    /// Free the handle. No further calls are made on it.
    fn release(self);
}

/// Compile entry point. Loading a model may replace whatever the engine had
/// loaded before, so callers serialize access.
pub trait DiffEqEngine {
    type Model: CompiledModel;

    fn compile_model(&mut self, source: &str, options: &SolverOptions) -> Result<Self::Model, CompileError>;
}

/// Run one solve with scoped vectors. Returns `(interleaved outputs, times)`.
pub fn solve_scoped<M: CompiledModel>(
    model: &mut M,
    times: &[f64],
    inputs: &[f64],
) -> Result<(Vec<f64>, Vec<f64>), SolveError> {
    let mut times = ScopedVector::<M::Vector>::new(times);
    let inputs = ScopedVector::<M::Vector>::new(inputs);
    let mut outputs = ScopedVector::<M::Vector>::new(&[]);

    model.solve(&mut times, &inputs, &mut outputs)?;

    Ok((outputs.to_vec(), times.to_vec()))
}
