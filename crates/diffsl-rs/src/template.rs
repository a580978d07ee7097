//! Equation templates with named substitution slots.
//!
//! Template text is opaque except for one marker per [`Slot`]. Parsing
//! checks that every marker occurs exactly once, and rendering takes a
//! [`SlotFill`] with a value for every slot, so a template can never be
//! rendered with a marker left in place.

use std::fmt;
use vclamp_core::AssemblyError;

/// Substitution points in a model template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Input symbol list (`in = []`)
    Inputs,
    /// Command-voltage definition (`idealVC { 0 }`)
    Protocol,
    /// Output block (`out_i { }`)
    Outputs,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Inputs, Slot::Protocol, Slot::Outputs];

    pub fn name(&self) -> &'static str {
        match self {
            Slot::Inputs => "inputs",
            Slot::Protocol => "protocol",
            Slot::Outputs => "outputs",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Marker text recognised for each slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMarkers {
    pub inputs: String,
    pub protocol: String,
    pub outputs: String,
}

impl SlotMarkers {
    /// Standard markers for a template whose command voltage is `protocol_variable`
    pub fn for_variable(protocol_variable: &str) -> Self {
        Self {
            inputs: "in = []".to_string(),
            protocol: format!("{} {{ 0 }}", protocol_variable),
            outputs: "out_i { }".to_string(),
        }
    }

    pub fn get(&self, slot: Slot) -> &str {
        match slot {
            Slot::Inputs => &self.inputs,
            Slot::Protocol => &self.protocol,
            Slot::Outputs => &self.outputs,
        }
    }
}

/// Replacement text for every slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotFill {
    pub inputs: String,
    pub protocol: String,
    pub outputs: String,
}

impl SlotFill {
    fn get(&self, slot: Slot) -> &str {
        match slot {
            Slot::Inputs => &self.inputs,
            Slot::Protocol => &self.protocol,
            Slot::Outputs => &self.outputs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(Slot),
}

/// Parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTemplate {
    segments: Vec<Segment>,
}

impl ModelTemplate {
    /// Split `source` at the slot markers. `variant` is only used in errors.
    pub fn parse(variant: &str, source: &str, markers: &SlotMarkers) -> Result<Self, AssemblyError> {
        let mut found: Vec<(usize, usize, Slot)> = Vec::with_capacity(Slot::ALL.len());

        for slot in Slot::ALL {
            let marker = markers.get(slot);
            let positions: Vec<usize> = source.match_indices(marker).map(|(at, _)| at).collect();
            match positions.as_slice() {
                [] => {
                    return Err(AssemblyError::MissingMarker {
                        variant: variant.to_string(),
                        slot: slot.to_string(),
                        marker: marker.to_string(),
                    })
                }
                [at] => found.push((*at, marker.len(), slot)),
                _ => {
                    return Err(AssemblyError::DuplicateMarker {
                        variant: variant.to_string(),
                        slot: slot.to_string(),
                        marker: marker.to_string(),
                        count: positions.len(),
                    })
                }
            }
        }

        found.sort_by_key(|&(at, _, _)| at);
        for pair in found.windows(2) {
            let (at, len, first) = pair[0];
            let (next, _, second) = pair[1];
            if at + len > next {
                return Err(AssemblyError::OverlappingMarkers {
                    variant: variant.to_string(),
                    first: first.to_string(),
                    second: second.to_string(),
                });
            }
        }

        let mut segments = Vec::with_capacity(found.len() * 2 + 1);
        let mut cursor = 0;
        for (at, len, slot) in found {
            if at > cursor {
                segments.push(Segment::Text(source[cursor..at].to_string()));
            }
            segments.push(Segment::Slot(slot));
            cursor = at + len;
        }
        if cursor < source.len() {
            segments.push(Segment::Text(source[cursor..].to_string()));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, fill: &SlotFill) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot(slot) => out.push_str(fill.get(*slot)),
            }
        }
        out
    }
}
