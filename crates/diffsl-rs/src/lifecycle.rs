//! Compiled solver ownership per model variant.
//!
//! Each variant has one slot holding a [`SolverState`]. The engine keeps a
//! single loaded model for the whole process: compiling any variant replaces
//! whatever was loaded before. Every successful compile therefore starts a
//! new load generation, and a handle is only usable while its generation is
//! the loaded one. A variant whose model was displaced by another variant's
//! compile is recompiled on its next run.
//!
//! Lock order is slot, then engine. [`SolverLifecycle::solve`] holds both
//! across compile and solve, so no other compile can slip in between.

use crate::engine::{solve_scoped, CompiledModel, DiffEqEngine, SolverOptions};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use vclamp_core::{CompileError, SimulationResult, SolveError};

/// Handle plus what it was compiled from
#[derive(Debug)]
pub struct CompiledSolver<M> {
    pub model: M,
    pub source: String,
    pub options: SolverOptions,
    /// Load generation this handle belongs to
    pub generation: u64,
}

#[derive(Debug)]
pub enum SolverState<M> {
    Uninitialized,
    /// Compile in flight (or interrupted by a panic)
    Compiling,
    Compiled(CompiledSolver<M>),
    /// Last compile was rejected; no handle is held
    Failed(CompileError),
}

/// Payload-free view of [`SolverState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolverStatus {
    Uninitialized,
    Compiling,
    Compiled,
    Failed,
}

impl<M> SolverState<M> {
    pub fn status(&self) -> SolverStatus {
        match self {
            Self::Uninitialized => SolverStatus::Uninitialized,
            Self::Compiling => SolverStatus::Compiling,
            Self::Compiled(_) => SolverStatus::Compiled,
            Self::Failed(_) => SolverStatus::Failed,
        }
    }
}

/// Per-variant state
#[derive(Debug)]
pub struct VariantSlot<M> {
    variant: String,
    state: SolverState<M>,
    compilations: u64,
    /// Output of the last successful solve on the current handle
    pub last_result: Option<SimulationResult>,
}

impl<M: CompiledModel> VariantSlot<M> {
    fn new(variant: &str) -> Self {
        Self {
            variant: variant.to_string(),
            state: SolverState::Uninitialized,
            compilations: 0,
            last_result: None,
        }
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn state(&self) -> &SolverState<M> {
        &self.state
    }

    /// Number of successful compiles for this variant
    pub fn compilations(&self) -> u64 {
        self.compilations
    }

    fn is_current(&self, source: &str, options: &SolverOptions, loaded: u64) -> bool {
        matches!(
            &self.state,
            SolverState::Compiled(c)
                if c.generation == loaded && c.source == source && c.options == *options
        )
    }

    fn is_displaced(&self, loaded: u64) -> bool {
        matches!(&self.state, SolverState::Compiled(c) if c.generation != loaded)
    }

    /// Release the handle, if any, and return to `Uninitialized`
    fn release(&mut self) {
        let state = std::mem::replace(&mut self.state, SolverState::Uninitialized);
        if let SolverState::Compiled(previous) = state {
            debug!("Releasing solver for variant {}", self.variant);
            previous.model.release();
        }
        self.last_result = None;
    }
}

/// The engine plus what it currently has loaded
struct LoadedEngine<E> {
    engine: E,
    /// Generation of the loaded model; 0 before the first compile
    generation: u64,
    variant: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the engine and one slot per variant
pub struct SolverLifecycle<E: DiffEqEngine> {
    engine: Mutex<LoadedEngine<E>>,
    slots: Mutex<HashMap<String, Arc<Mutex<VariantSlot<E::Model>>>>>,
}

impl<E: DiffEqEngine> SolverLifecycle<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Mutex::new(LoadedEngine {
                engine,
                generation: 0,
                variant: None,
            }),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Slot for `variant`, created on first use
    pub fn slot(&self, variant: &str) -> Arc<Mutex<VariantSlot<E::Model>>> {
        let mut slots = lock(&self.slots);
        Arc::clone(
            slots
                .entry(variant.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VariantSlot::new(variant)))),
        )
    }

    /// Compile `source` into `slot` unless it already holds the loaded
    /// handle built from the same source and options and `force` is false.
    pub fn ensure_compiled(
        &self,
        slot: &mut VariantSlot<E::Model>,
        source: &str,
        options: SolverOptions,
        force: bool,
    ) -> Result<(), CompileError> {
        let mut loaded = lock(&self.engine);
        Self::compile_into(&mut loaded, slot, source, options, force)
    }

    /// Make sure `slot` holds the loaded model for `source`, then solve it.
    /// The engine stays locked from the compile check to the end of the
    /// solve. Returns `(interleaved outputs, times)`.
    pub fn solve(
        &self,
        slot: &mut VariantSlot<E::Model>,
        source: &str,
        options: SolverOptions,
        force: bool,
        times: &[f64],
        inputs: &[f64],
    ) -> vclamp_core::Result<(Vec<f64>, Vec<f64>)> {
        let mut loaded = lock(&self.engine);
        Self::compile_into(&mut loaded, slot, source, options, force)?;

        let SolverState::Compiled(compiled) = &mut slot.state else {
            return Err(SolveError::NotCompiled(slot.variant.clone()).into());
        };
        Ok(solve_scoped(&mut compiled.model, times, inputs)?)
    }

    fn compile_into(
        loaded: &mut LoadedEngine<E>,
        slot: &mut VariantSlot<E::Model>,
        source: &str,
        options: SolverOptions,
        force: bool,
    ) -> Result<(), CompileError> {
        if !force && slot.is_current(source, &options, loaded.generation) {
            debug!("Variant {} already loaded, skipping compile", slot.variant);
            return Ok(());
        }
        if slot.is_displaced(loaded.generation) {
            info!(
                "Variant {} was displaced by {}, reloading",
                slot.variant,
                loaded.variant.as_deref().unwrap_or("a failed compile")
            );
        }

        slot.release();
        slot.state = SolverState::Compiling;
        info!("Compiling model for variant {}", slot.variant);
        debug!("Model source for variant {}:\n{}", slot.variant, source);

        match loaded.engine.compile_model(source, &options) {
            Ok(model) => {
                loaded.generation += 1;
                loaded.variant = Some(slot.variant.clone());
                slot.state = SolverState::Compiled(CompiledSolver {
                    model,
                    source: source.to_string(),
                    options,
                    generation: loaded.generation,
                });
                slot.compilations += 1;
                Ok(())
            }
            Err(err) => {
                warn!("Compilation failed for variant {}: {}", slot.variant, err);
                // The engine may have unloaded its previous model
                loaded.generation += 1;
                loaded.variant = None;
                slot.state = SolverState::Failed(err.clone());
                Err(err)
            }
        }
    }

    pub fn status(&self, variant: &str) -> SolverStatus {
        let Some(slot) = lock(&self.slots).get(variant).cloned() else {
            return SolverStatus::Uninitialized;
        };
        let status = lock(&slot).state.status();
        status
    }

    /// Variant whose model the engine currently has loaded
    pub fn loaded_variant(&self) -> Option<String> {
        lock(&self.engine).variant.clone()
    }

    /// Release the handle for `variant`
    pub fn release(&self, variant: &str) {
        let slot = lock(&self.slots).get(variant).cloned();
        if let Some(slot) = slot {
            lock(&slot).release();
        }
    }

    /// Inspect the engine (e.g. for call counts)
    pub fn with_engine<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        f(&lock(&self.engine).engine)
    }
}

impl<E: DiffEqEngine> Drop for SolverLifecycle<E> {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, slot) in slots.drain() {
            lock(&slot).release();
        }
    }
}
