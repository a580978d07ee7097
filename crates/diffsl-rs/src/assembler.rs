//! Model assembly: template + parameters + protocol + outputs -> model source.

use crate::protocol::{synthesize, Protocol, Threshold};
use crate::template::{ModelTemplate, SlotFill, SlotMarkers};
use crate::variants::ModelConfiguration;
use log::debug;
use std::fmt;
use vclamp_core::{AssemblyError, ValidationError};

/// Complete model text, ready for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    variant: &'static str,
    text: String,
}

impl ModelSource {
    pub fn variant(&self) -> &'static str {
        self.variant
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Builds model sources for a variant.
///
/// Values are not checked here; they reach the model as solver inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelAssembler {
    threshold: Threshold,
}

impl ModelAssembler {
    /// Fails if `threshold` would render an inverted or flat gate
    pub fn new(threshold: Threshold) -> Result<Self, ValidationError> {
        threshold.validate()?;
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    pub fn assemble(
        &self,
        config: &'static ModelConfiguration,
        protocol: &Protocol,
    ) -> Result<ModelSource, AssemblyError> {
        let markers = SlotMarkers::for_variable(config.protocol_variable);
        let template = ModelTemplate::parse(config.id, config.template_source, &markers)?;

        let waveform = synthesize(protocol, config.protocol_variable, self.threshold);
        let fill = SlotFill {
            inputs: format!("in = [{}]", config.input_symbols().join(", ")),
            protocol: waveform.to_string(),
            outputs: render_outputs(config.outputs),
        };

        let text = template.render(&fill);
        debug!(
            "Assembled variant {}: {} protocol terms, {} bytes",
            config.id,
            waveform.terms().len(),
            text.len()
        );

        Ok(ModelSource {
            variant: config.id,
            text,
        })
    }
}

fn render_outputs(outputs: &[&str]) -> String {
    let mut block = String::from("out_i {\n");
    for (i, name) in outputs.iter().enumerate() {
        block.push_str("    ");
        block.push_str(name);
        if i + 1 < outputs.len() {
            block.push(',');
        }
        block.push('\n');
    }
    block.push('}');
    block
}
