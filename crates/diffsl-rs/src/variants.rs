//! Static model variant registry.
//!
//! Each variant pairs an equation template with the parameters it takes as
//! inputs and the outputs it reports. Both variants share the voltage-clamp
//! artefact compartment (series resistance, prediction, compensation, leak)
//! and differ in their IKr kinetics.

use std::collections::HashMap;
use vclamp_core::ValidationError;

/// Command-voltage symbol used by every bundled template
pub const IDEAL_VC: &str = "idealVC";

/// External parameter name bound to a template input symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterBinding {
    /// Name used in requests and parameter files
    pub name: &'static str,
    /// Input symbol in the template
    pub symbol: &'static str,
    /// Value used when building a default parameter set
    pub default: f64,
}

const fn bind(name: &'static str, symbol: &'static str, default: f64) -> ParameterBinding {
    ParameterBinding { name, symbol, default }
}

/// IKr rate constants (ms^-1, mV^-1) and conductance (uS)
const IKR_PARAMETERS: [ParameterBinding; 9] = [
    bind("p1", "p1", 2.26e-4),
    bind("p2", "p2", 0.0699),
    bind("p3", "p3", 3.45e-5),
    bind("p4", "p4", 0.05462),
    bind("p5", "p5", 0.0873),
    bind("p6", "p6", 8.91e-3),
    bind("p7", "p7", 5.15e-3),
    bind("p8", "p8", 0.03158),
    bind("current_conductance", "p9", 0.1524),
];

/// Voltage-clamp amplifier, cell and solution parameters
const CLAMP_PARAMETERS: [ParameterBinding; 19] = [
    bind("leak_reversal_potential", "voltageClampELeak", 0.0),
    bind("estimated_leak_reversal_potential", "voltageClampELeakEst", 0.0),
    bind("seal_resistance", "voltageClampRSealMOhm", 5000.0),
    bind("estimated_seal_resistance", "voltageClampRSealEstMOhm", 5000.0),
    bind("pipette_capacitance", "voltageClampCPrs", 4.0),
    bind("estimated_pipette_capacitance", "voltageClampCPrsEst", 4.0),
    bind("series_resistance", "voltageClampRSeriesMOhm", 5.0),
    bind("estimated_series_resistance", "voltageClampRSeriesEstMOhm", 5.0),
    bind("estimated_membrane_capacitance", "voltageClampCmEst", 20.0),
    bind("prediction", "voltageClampAlphaPPercentage", 70.0),
    bind("series_resistance_compensation", "voltageClampAlphaRPercentage", 70.0),
    bind("tau_clamp", "voltageClampTauClamp", 8e-4),
    bind("tau_out", "voltageClampTauOut", 7.5e-3),
    bind("tau_rs", "voltageClampTauRs", 1e-3),
    bind("tau_sum", "voltageClampTauSum", 0.04),
    bind("effective_voltage_offset", "voltageClampVOffsetEff", 0.0),
    bind("membrane_capacitance", "cellCm", 20.0),
    bind("bath_solution", "extraKo", 4.0),
    bind("pipette_solution", "kiKi", 110.0),
];

/// Model variant definition
#[derive(Debug)]
pub struct ModelConfiguration {
    /// Variant id ("2", "4")
    pub id: &'static str,
    pub description: &'static str,
    pub(crate) kinetic_parameters: &'static [ParameterBinding],
    pub(crate) clamp_parameters: &'static [ParameterBinding],
    /// Output symbols, in the order the engine interleaves them
    pub outputs: &'static [&'static str],
    /// Equation template with `in = []`, `idealVC { 0 }` and `out_i { }` markers
    pub template_source: &'static str,
    /// Symbol the synthesized command voltage binds to
    pub protocol_variable: &'static str,
}

impl ModelConfiguration {
    /// Look up a variant by id
    pub fn get(id: &str) -> Result<&'static ModelConfiguration, ValidationError> {
        registry()
            .iter()
            .find(|v| v.id == id)
            .ok_or_else(|| ValidationError::UnknownVariant(id.to_string()))
    }

    /// Parameter bindings in input-vector order
    pub fn parameter_map(&self) -> impl Iterator<Item = &'static ParameterBinding> {
        self.kinetic_parameters.iter().chain(self.clamp_parameters.iter())
    }

    pub fn parameter_count(&self) -> usize {
        self.kinetic_parameters.len() + self.clamp_parameters.len()
    }

    /// Template input symbols in input-vector order
    pub fn input_symbols(&self) -> Vec<&'static str> {
        self.parameter_map().map(|b| b.symbol).collect()
    }

    pub fn default_parameters(&self) -> HashMap<String, f64> {
        self.parameter_map()
            .map(|b| (b.name.to_string(), b.default))
            .collect()
    }
}

static VARIANTS: [ModelConfiguration; 2] = [
    ModelConfiguration {
        id: "2",
        description: "Four-state Markov IKr with voltage-clamp artefacts",
        kinetic_parameters: &IKR_PARAMETERS,
        clamp_parameters: &CLAMP_PARAMETERS,
        outputs: &[
            "voltageClampIOut",
            "idealVC",
            "voltageClampIIn",
            "voltageClampIPostPA",
            "voltageClampIPost",
            "membraneV",
            "membraneIIdeal",
            "membraneIIon",
        ],
        template_source: include_str!("../templates/ikr_markov.ds"),
        protocol_variable: IDEAL_VC,
    },
    ModelConfiguration {
        id: "4",
        description: "Hodgkin-Huxley IKr (activation x inactivation) with voltage-clamp artefacts",
        kinetic_parameters: &IKR_PARAMETERS,
        clamp_parameters: &CLAMP_PARAMETERS,
        outputs: &[
            "voltageClampIOut",
            "idealVC",
            "voltageClampIIn",
            "voltageClampIPostPA",
            "membraneV",
            "membraneIIdeal",
            "membraneIIon",
        ],
        template_source: include_str!("../templates/ikr_hh.ds"),
        protocol_variable: IDEAL_VC,
    },
];

/// All bundled variants
pub fn registry() -> &'static [ModelConfiguration] {
    &VARIANTS
}
