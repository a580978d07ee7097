//! Common utilities for integration tests

#![allow(dead_code)]

pub mod spy_engine;

// Re-export commonly used items
pub use spy_engine::{
    adaptive_points, expected_output, live_vectors, vectors_created, EngineLog, SpyEngine, SpyState,
};

use std::collections::HashMap;
use vclamp_diffsl::{ModelConfiguration, Protocol};

/// -80 / +40 / -40 mV, 500 ms each
pub fn three_step_protocol() -> Protocol {
    Protocol::from_arrays(&[-80.0, 40.0, -40.0], &[500.0, 500.0, 500.0], &[false, false, false])
        .unwrap()
}

pub fn defaults(variant: &str) -> HashMap<String, f64> {
    ModelConfiguration::get(variant).unwrap().default_parameters()
}
