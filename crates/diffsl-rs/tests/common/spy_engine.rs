//! In-memory engine that records every call made to it.
//!
//! The spy reads the input and output counts from the assembled source, so a
//! malformed `in = [...]` or `out_i { ... }` block shows up as a solve error.
//! Output `k` at time index `j` is `expected_output(j, k)`.
//!
//! Like a real engine it holds one loaded model: each compile replaces the
//! previous one, and solving a handle that is no longer loaded fails.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use vclamp_core::{CompileError, SolveError};
use vclamp_diffsl::{CompiledModel, DiffEqEngine, EngineVector, SolverOptions};

thread_local! {
    static LIVE: Cell<isize> = const { Cell::new(0) };
    static CREATED: Cell<usize> = const { Cell::new(0) };
}

/// Vectors created on this thread and not yet destroyed
pub fn live_vectors() -> isize {
    LIVE.with(Cell::get)
}

pub fn vectors_created() -> usize {
    CREATED.with(Cell::get)
}

/// Points the spy reports on an adaptive solve
pub fn adaptive_points() -> usize {
    7
}

pub fn expected_output(step: usize, channel: usize) -> f64 {
    step as f64 + channel as f64 / 100.0
}

#[derive(Debug, Default, Clone)]
pub struct EngineLog {
    pub compiles: usize,
    pub releases: usize,
    pub solves: usize,
    pub sources: Vec<String>,
    pub options: Vec<SolverOptions>,
    pub inputs: Vec<Vec<f64>>,
    pub requested_times: Vec<Vec<f64>>,
}

#[derive(Debug, Default)]
pub struct SpyState {
    log: Mutex<EngineLog>,
    pub reject_compile: AtomicBool,
    pub fail_solve: AtomicBool,
    /// Milliseconds each solve sleeps for
    pub solve_delay_ms: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Generation of the loaded model; 0 when nothing is loaded
    loaded: AtomicUsize,
    generations: AtomicUsize,
}

impl SpyState {
    pub fn log(&self) -> EngineLog {
        self.log.lock().unwrap().clone()
    }

    pub fn compiles(&self) -> usize {
        self.log.lock().unwrap().compiles
    }

    pub fn releases(&self) -> usize {
        self.log.lock().unwrap().releases
    }

    pub fn solves(&self) -> usize {
        self.log.lock().unwrap().solves
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn loaded_generation(&self) -> usize {
        self.loaded.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct SpyEngine {
    state: Arc<SpyState>,
}

impl SpyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view that stays usable after the engine is moved into a context
    pub fn state(&self) -> Arc<SpyState> {
        Arc::clone(&self.state)
    }
}

#[derive(Debug)]
pub struct SpyVector(Vec<f64>);

impl EngineVector for SpyVector {
    fn from_slice(values: &[f64]) -> Self {
        LIVE.with(|live| live.set(live.get() + 1));
        CREATED.with(|created| created.set(created.get() + 1));
        Self(values.to_vec())
    }

    fn to_vec(&self) -> Vec<f64> {
        self.0.clone()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn destroy(&mut self) {
        LIVE.with(|live| live.set(live.get() - 1));
    }
}

#[derive(Debug)]
pub struct SpyModel {
    state: Arc<SpyState>,
    n_inputs: usize,
    n_outputs: usize,
    options: SolverOptions,
    generation: usize,
}

fn count_inputs(source: &str) -> Option<usize> {
    let line = source.lines().find(|l| l.starts_with("in = ["))?;
    let inner = line.strip_prefix("in = [")?.strip_suffix(']')?;
    Some(inner.split(',').filter(|s| !s.trim().is_empty()).count())
}

fn count_outputs(source: &str) -> Option<usize> {
    let start = source.find("out_i {")? + "out_i {".len();
    let end = start + source[start..].find('}')?;
    Some(
        source[start..end]
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .count(),
    )
}

impl DiffEqEngine for SpyEngine {
    type Model = SpyModel;

    fn compile_model(&mut self, source: &str, options: &SolverOptions) -> Result<SpyModel, CompileError> {
        let mut log = self.state.log.lock().unwrap();
        log.compiles += 1;
        log.sources.push(source.to_string());
        log.options.push(*options);

        // Loading replaces the previous model, even if the new one is rejected
        self.state.loaded.store(0, Ordering::SeqCst);
        if self.state.reject_compile.load(Ordering::SeqCst) {
            return Err(CompileError::Rejected("spy rejected source".into()));
        }
        let (Some(n_inputs), Some(n_outputs)) = (count_inputs(source), count_outputs(source)) else {
            return Err(CompileError::Rejected("missing in/out blocks".into()));
        };

        let generation = self.state.generations.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.loaded.store(generation, Ordering::SeqCst);
        Ok(SpyModel {
            state: Arc::clone(&self.state),
            n_inputs,
            n_outputs,
            options: *options,
            generation,
        })
    }
}

impl CompiledModel for SpyModel {
    type Vector = SpyVector;

    fn solve(
        &mut self,
        times: &mut SpyVector,
        inputs: &SpyVector,
        outputs: &mut SpyVector,
    ) -> Result<(), SolveError> {
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.state.solve_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay as u64));
        }

        let result = self.fill(times, inputs, outputs);
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn release(self) {
        self.state.log.lock().unwrap().releases += 1;
    }
}

impl SpyModel {
    fn fill(
        &mut self,
        times: &mut SpyVector,
        inputs: &SpyVector,
        outputs: &mut SpyVector,
    ) -> Result<(), SolveError> {
        {
            let mut log = self.state.log.lock().unwrap();
            log.solves += 1;
            log.inputs.push(inputs.0.clone());
            log.requested_times.push(times.0.clone());
        }

        let loaded = self.state.loaded.load(Ordering::SeqCst);
        if loaded != self.generation {
            return Err(SolveError::Engine(format!(
                "handle {} solved while model {} is loaded",
                self.generation, loaded
            )));
        }
        if self.state.fail_solve.load(Ordering::SeqCst) {
            return Err(SolveError::NonConvergence("spy failure".into()));
        }
        if inputs.len() != self.n_inputs {
            return Err(SolveError::Engine(format!(
                "expected {} inputs, got {}",
                self.n_inputs,
                inputs.len()
            )));
        }

        if !self.options.fixed_times {
            let (start, end) = (times.0[0], times.0[times.0.len() - 1]);
            let n = adaptive_points();
            times.0 = (0..n)
                .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
                .collect();
        }

        outputs.0 = (0..times.0.len())
            .flat_map(|j| (0..self.n_outputs).map(move |k| expected_output(j, k)))
            .collect();
        Ok(())
    }
}
