//! Compile reuse, recompilation and handle release

mod common;

use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use vclamp_core::{CompileError, ErrorKind, TimeGrid, ValidationError, VclampError};
use vclamp_diffsl::{
    ModelAssembler, ModelConfiguration, Protocol, SimulationContext, SimulationRequest,
    SolverConfig, SolverLifecycle, SolverOptions, SolverState, SolverStatus, Threshold,
};

fn request(variant: &str) -> SimulationRequest {
    SimulationRequest::new(variant, three_step_protocol(), defaults(variant))
}

#[test]
fn test_unchanged_source_compiles_once() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let context = SimulationContext::new(engine);

    assert_eq!(context.status("2"), SolverStatus::Uninitialized);
    for _ in 0..3 {
        context.run(&request("2")).unwrap();
    }

    assert_eq!(spy.compiles(), 1);
    assert_eq!(spy.solves(), 3);
    assert_eq!(spy.releases(), 0);
    assert_eq!(context.status("2"), SolverStatus::Compiled);
}

#[test]
fn test_forced_recompile() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let context = SimulationContext::new(engine);

    context.run(&request("2")).unwrap();
    context.run(&request("2").with_recompile(true)).unwrap();

    assert_eq!(spy.compiles(), 2);
    assert_eq!(spy.releases(), 1);
}

#[test]
fn test_changed_protocol_recompiles() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let context = SimulationContext::new(engine);

    context.run(&request("2")).unwrap();

    let protocol = Protocol::holds(&[-80.0, 0.0], &[200.0, 300.0]).unwrap();
    let result = context
        .run(&SimulationRequest::new("2", protocol, defaults("2")))
        .unwrap();

    assert_eq!(spy.compiles(), 2);
    assert_eq!(spy.releases(), 1);
    assert_eq!(*result.time.last().unwrap(), 500.0);
    let log = spy.log();
    assert_ne!(log.sources[0], log.sources[1]);
}

#[test]
fn test_changed_parameters_reuse_solver() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let context = SimulationContext::new(engine);

    context.run(&request("2")).unwrap();
    let mut parameters = defaults("2");
    parameters.insert("p5".into(), 0.1);
    context
        .run(&SimulationRequest::new("2", three_step_protocol(), parameters))
        .unwrap();

    assert_eq!(spy.compiles(), 1);
    assert_eq!(spy.log().inputs[1][4], 0.1);
}

#[test]
fn test_changed_grid_mode_recompiles() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let context = SimulationContext::new(engine);

    context.run(&request("2")).unwrap();
    context
        .run(&request("2").with_time_grid(TimeGrid::Fixed { step_count: 20 }))
        .unwrap();
    context
        .run(&request("2").with_time_grid(TimeGrid::Fixed { step_count: 40 }))
        .unwrap();

    assert_eq!(spy.compiles(), 2);
    let log = spy.log();
    assert!(!log.options[0].fixed_times);
    assert!(log.options[1].fixed_times);
}

#[test]
fn test_switching_variants_reloads_model() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let context = SimulationContext::new(engine);

    context.run(&request("2")).unwrap();
    context.run(&request("4")).unwrap();
    assert_eq!(context.loaded_variant().as_deref(), Some("4"));

    // Compiling "4" unloaded "2", so its handle is rebuilt
    context.run(&request("2")).unwrap();

    assert_eq!(spy.compiles(), 3);
    assert_eq!(spy.releases(), 1);
    assert_eq!(context.loaded_variant().as_deref(), Some("2"));
    assert_eq!(context.status("2"), SolverStatus::Compiled);
    assert_eq!(context.status("4"), SolverStatus::Compiled);
}

#[test]
fn test_alternating_variants_never_solve_a_stale_handle() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let context = SimulationContext::new(engine);

    for variant in ["2", "4", "2", "4", "4", "2"] {
        let result = context.run(&request(variant)).unwrap();
        assert_eq!(context.loaded_variant().as_deref(), Some(variant));
        assert!(!result.channels.is_empty());
    }

    // Only the repeated "4" reuses the loaded handle
    assert_eq!(spy.compiles(), 5);
    assert_eq!(spy.solves(), 6);
}

#[test]
fn test_rejected_compile_displaces_loaded_model() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let context = SimulationContext::new(engine);

    context.run(&request("2")).unwrap();
    spy.reject_compile.store(true, Ordering::SeqCst);
    assert!(context.run(&request("4")).is_err());
    assert_eq!(context.loaded_variant(), None);
    spy.reject_compile.store(false, Ordering::SeqCst);

    context.run(&request("2")).unwrap();
    assert_eq!(spy.compiles(), 3);
    assert_eq!(context.loaded_variant().as_deref(), Some("2"));
}

#[test]
fn test_ensure_compiled_tracks_loaded_generation() {
    let lifecycle = SolverLifecycle::new(SpyEngine::new());
    let assembler = ModelAssembler::default();
    let protocol = three_step_protocol();
    let source_2 = assembler
        .assemble(ModelConfiguration::get("2").unwrap(), &protocol)
        .unwrap();
    let source_4 = assembler
        .assemble(ModelConfiguration::get("4").unwrap(), &protocol)
        .unwrap();
    let options = SolverOptions::default();

    let slot_2 = lifecycle.slot("2");
    let slot_4 = lifecycle.slot("4");
    lifecycle
        .ensure_compiled(&mut slot_2.lock().unwrap(), source_2.as_str(), options, false)
        .unwrap();
    lifecycle
        .ensure_compiled(&mut slot_2.lock().unwrap(), source_2.as_str(), options, false)
        .unwrap();
    assert_eq!(slot_2.lock().unwrap().compilations(), 1);

    lifecycle
        .ensure_compiled(&mut slot_4.lock().unwrap(), source_4.as_str(), options, false)
        .unwrap();
    lifecycle
        .ensure_compiled(&mut slot_2.lock().unwrap(), source_2.as_str(), options, false)
        .unwrap();

    let slot_2 = slot_2.lock().unwrap();
    assert_eq!(slot_2.compilations(), 2);
    let SolverState::Compiled(compiled) = slot_2.state() else {
        panic!("variant 2 should hold a handle");
    };
    assert_eq!(compiled.generation, 3);
    assert_eq!(lifecycle.loaded_variant().as_deref(), Some("2"));
    assert_eq!(lifecycle.with_engine(|engine| engine.state().compiles()), 3);
}

#[test]
fn test_compile_failure_then_recovery() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let context = SimulationContext::new(engine);
    let created = vectors_created();

    spy.reject_compile.store(true, Ordering::SeqCst);
    let err = context.run(&request("2")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Compile);
    assert!(matches!(err, VclampError::Compile(CompileError::Rejected(_))));
    assert_eq!(context.status("2"), SolverStatus::Failed);
    assert_eq!(spy.solves(), 0);
    assert_eq!(vectors_created(), created);

    spy.reject_compile.store(false, Ordering::SeqCst);
    context.run(&request("2")).unwrap();

    assert_eq!(spy.compiles(), 2);
    assert_eq!(context.status("2"), SolverStatus::Compiled);
}

#[test]
fn test_solve_failure_keeps_solver() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let context = SimulationContext::new(engine);

    context.run(&request("2")).unwrap();
    spy.fail_solve.store(true, Ordering::SeqCst);
    let err = context.run(&request("2")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Solve);
    assert_eq!(context.status("2"), SolverStatus::Compiled);
    assert_eq!(live_vectors(), 0);

    spy.fail_solve.store(false, Ordering::SeqCst);
    context.run(&request("2")).unwrap();
    assert_eq!(spy.compiles(), 1);
}

#[test]
fn test_release_forces_recompile() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let context = SimulationContext::new(engine);

    context.run(&request("4")).unwrap();
    context.release("4");
    assert_eq!(context.status("4"), SolverStatus::Uninitialized);
    assert_eq!(spy.releases(), 1);

    context.run(&request("4")).unwrap();
    assert_eq!(spy.compiles(), 2);
}

#[test]
fn test_drop_releases_every_solver() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    {
        let context = SimulationContext::new(engine);
        context.run(&request("2")).unwrap();
        context.run(&request("4")).unwrap();
        assert_eq!(spy.releases(), 0);
    }
    assert_eq!(spy.releases(), 2);
}

#[test]
fn test_heaviside_config() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let config = SolverConfig {
        threshold: Threshold::Heaviside,
        ..SolverConfig::default()
    };
    let context = SimulationContext::with_config(engine, config).unwrap();

    context.run(&request("2")).unwrap();

    let log = spy.log();
    assert!(log.sources[0].contains("heaviside(t - 500)"));
    assert!(!log.sources[0].contains("exp(-50"));
}

#[test]
fn test_concurrent_runs_on_one_variant_are_serialized() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    spy.solve_delay_ms.store(5, Ordering::SeqCst);
    let context = Arc::new(SimulationContext::new(engine));

    thread::scope(|scope| {
        for _ in 0..4 {
            let context = Arc::clone(&context);
            scope.spawn(move || {
                context.run(&request("2")).unwrap();
                assert_eq!(live_vectors(), 0);
            });
        }
    });

    assert_eq!(spy.compiles(), 1);
    assert_eq!(spy.solves(), 4);
    assert_eq!(spy.max_in_flight(), 1);
}

#[test]
fn test_concurrent_runs_across_variants_share_one_engine() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    spy.solve_delay_ms.store(2, Ordering::SeqCst);
    let context = Arc::new(SimulationContext::new(engine));

    thread::scope(|scope| {
        for variant in ["2", "4", "2", "4"] {
            let context = Arc::clone(&context);
            scope.spawn(move || {
                for _ in 0..3 {
                    context.run(&request(variant)).unwrap();
                }
                assert_eq!(live_vectors(), 0);
            });
        }
    });

    assert_eq!(spy.solves(), 12);
    assert_eq!(spy.max_in_flight(), 1);
    assert!(spy.loaded_generation() > 0);
}

#[test]
fn test_invalid_steepness_config_is_rejected() {
    let engine = SpyEngine::new();
    let spy = engine.state();
    let config = SolverConfig {
        threshold: Threshold::Logistic { steepness: -5.0 },
        ..SolverConfig::default()
    };

    let context = SimulationContext::with_config(engine, config);
    assert!(matches!(
        context,
        Err(ValidationError::InvalidSteepness(s)) if s == -5.0
    ));
    assert_eq!(spy.compiles(), 0);
}
