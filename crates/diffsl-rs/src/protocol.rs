//! Voltage-clamp protocols and their command-voltage expressions.
//!
//! A protocol is a list of steps. Each step holds the clamp at a voltage for
//! a duration, or ramps linearly to that voltage from the previous one.
//! [`synthesize`] turns the step list into a single [`CommandWaveform`]: a sum
//! of gated terms that the engine can differentiate, rendered as DiffSL.

use serde::{Deserialize, Serialize};
use std::fmt;
use vclamp_core::{Time, ValidationError, Voltage};

/// Logistic steepness (per ms) used unless configured otherwise
pub const DEFAULT_STEEPNESS: f64 = 50.0;

/// One segment of the command waveform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStep {
    /// Target voltage (mV)
    pub voltage: Voltage,
    /// Duration (ms)
    pub duration: Time,
    /// Ramp from the previous voltage instead of jumping
    pub is_ramp: bool,
}

impl ProtocolStep {
    pub fn hold(voltage: Voltage, duration: Time) -> Self {
        Self { voltage, duration, is_ramp: false }
    }

    pub fn ramp(voltage: Voltage, duration: Time) -> Self {
        Self { voltage, duration, is_ramp: true }
    }
}

/// Parallel-array form, as protocols are stored in parameter files.
/// A file without `is_ramp` describes a protocol of holds only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolArrays {
    pub voltage: Vec<Voltage>,
    pub duration: Vec<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ramp: Option<Vec<bool>>,
}

/// Validated, non-empty step list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProtocolArrays", into = "ProtocolArrays")]
pub struct Protocol {
    steps: Vec<ProtocolStep>,
}

impl Protocol {
    /// Validate a step list: at least one step, finite voltages, finite
    /// positive durations.
    pub fn new(steps: Vec<ProtocolStep>) -> Result<Self, ValidationError> {
        if steps.is_empty() {
            return Err(ValidationError::EmptyProtocol);
        }
        for (step, s) in steps.iter().enumerate() {
            if !s.duration.is_finite() || s.duration <= 0.0 {
                return Err(ValidationError::InvalidDuration { step, duration: s.duration });
            }
            if !s.voltage.is_finite() {
                return Err(ValidationError::InvalidVoltage { step, voltage: s.voltage });
            }
        }
        Ok(Self { steps })
    }

    /// Build from parallel arrays of equal length
    pub fn from_arrays(
        voltage: &[Voltage],
        duration: &[Time],
        is_ramp: &[bool],
    ) -> Result<Self, ValidationError> {
        if voltage.len() != duration.len() || voltage.len() != is_ramp.len() {
            return Err(ValidationError::LengthMismatch {
                voltage: voltage.len(),
                duration: duration.len(),
                ramp: is_ramp.len(),
            });
        }

        let steps = voltage
            .iter()
            .zip(duration)
            .zip(is_ramp)
            .map(|((&voltage, &duration), &is_ramp)| ProtocolStep {
                voltage,
                duration,
                is_ramp,
            })
            .collect();
        Self::new(steps)
    }

    /// Holds only, no ramps
    pub fn holds(voltage: &[Voltage], duration: &[Time]) -> Result<Self, ValidationError> {
        if voltage.len() != duration.len() {
            return Err(ValidationError::LengthMismatch {
                voltage: voltage.len(),
                duration: duration.len(),
                ramp: voltage.len(),
            });
        }
        Self::new(
            voltage
                .iter()
                .zip(duration)
                .map(|(&v, &d)| ProtocolStep::hold(v, d))
                .collect(),
        )
    }

    pub fn steps(&self) -> &[ProtocolStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// End time of the protocol
    pub fn total_duration(&self) -> Time {
        self.steps.iter().map(|s| s.duration).sum()
    }

    /// Step boundaries, excluding 0 and the end time
    pub fn boundaries(&self) -> Vec<Time> {
        let mut t = 0.0;
        self.steps[..self.steps.len() - 1]
            .iter()
            .map(|s| {
                t += s.duration;
                t
            })
            .collect()
    }

    /// Whether step `i` is synthesized as a ramp. The first and last steps
    /// are always flat.
    pub fn is_effective_ramp(&self, i: usize) -> bool {
        i > 0 && i + 1 < self.steps.len() && self.steps[i].is_ramp
    }
}

impl TryFrom<ProtocolArrays> for Protocol {
    type Error = ValidationError;

    fn try_from(arrays: ProtocolArrays) -> Result<Self, Self::Error> {
        match &arrays.is_ramp {
            Some(is_ramp) => Self::from_arrays(&arrays.voltage, &arrays.duration, is_ramp),
            None => Self::holds(&arrays.voltage, &arrays.duration),
        }
    }
}

impl From<Protocol> for ProtocolArrays {
    fn from(protocol: Protocol) -> Self {
        Self {
            voltage: protocol.steps.iter().map(|s| s.voltage).collect(),
            duration: protocol.steps.iter().map(|s| s.duration).collect(),
            is_ramp: Some(protocol.steps.iter().map(|s| s.is_ramp).collect()),
        }
    }
}

// =============================================================================
// THRESHOLD FUNCTION
// =============================================================================

/// Smooth 0 -> 1 gate used to switch terms on and off
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Threshold {
    /// `1 / (1 + exp(-k x))`
    Logistic { steepness: f64 },
    /// Engine's built-in `heaviside(x)`
    Heaviside,
}

impl Default for Threshold {
    fn default() -> Self {
        Self::Logistic { steepness: DEFAULT_STEEPNESS }
    }
}

impl Threshold {
    /// Logistic gate; `steepness` must be finite and positive
    pub fn logistic(steepness: f64) -> Result<Self, ValidationError> {
        let threshold = Self::Logistic { steepness };
        threshold.validate()?;
        Ok(threshold)
    }

    /// A non-positive steepness inverts or flattens every gate
    pub fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            Self::Logistic { steepness } if !(steepness.is_finite() && steepness > 0.0) => {
                Err(ValidationError::InvalidSteepness(steepness))
            }
            _ => Ok(()),
        }
    }

    pub fn eval(&self, x: f64) -> f64 {
        match *self {
            Self::Logistic { steepness } => 1.0 / (1.0 + (-steepness * x).exp()),
            Self::Heaviside => {
                if x >= 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// DiffSL text for `φ(t - at)`
    fn render(&self, at: Time) -> String {
        match *self {
            Self::Logistic { steepness } => {
                format!("(1 / (1 + exp(-{} * (t - {}))))", steepness, at)
            }
            Self::Heaviside => format!("heaviside(t - {})", at),
        }
    }
}

// =============================================================================
// WAVEFORM
// =============================================================================

/// Value of a term inside its window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Amplitude {
    Constant(Voltage),
    /// Linear from `from` at `start` to `to` at `start + duration`
    Ramp {
        from: Voltage,
        to: Voltage,
        start: Time,
        duration: Time,
    },
}

impl Amplitude {
    pub fn eval(&self, t: Time) -> f64 {
        match *self {
            Self::Constant(v) => v,
            Self::Ramp { from, to, start, duration } => from + (to - from) * (t - start) / duration,
        }
    }
}

/// Time window of a term; `None` is unbounded on that side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: Option<Time>,
    pub end: Option<Time>,
}

/// One gated term of the command waveform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Term {
    pub amplitude: Amplitude,
    pub window: Window,
}

impl Term {
    fn gate(&self, threshold: &Threshold, t: Time) -> f64 {
        let on = self.window.start.map_or(1.0, |s| threshold.eval(t - s));
        let off = self.window.end.map_or(0.0, |e| threshold.eval(t - e));
        on - off
    }

    fn render_gate(&self, threshold: &Threshold) -> Option<String> {
        match (self.window.start, self.window.end) {
            (None, None) => None,
            (None, Some(e)) => Some(format!("(1 - {})", threshold.render(e))),
            (Some(s), None) => Some(threshold.render(s)),
            (Some(s), Some(e)) => Some(format!("({} - {})", threshold.render(s), threshold.render(e))),
        }
    }
}

/// Synthesized command voltage, bound to a model symbol
#[derive(Debug, Clone, PartialEq)]
pub struct CommandWaveform {
    variable: String,
    threshold: Threshold,
    terms: Vec<Term>,
}

impl CommandWaveform {
    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Command voltage at time `t`
    pub fn eval(&self, t: Time) -> Voltage {
        self.terms
            .iter()
            .map(|term| term.amplitude.eval(t) * term.gate(&self.threshold, t))
            .sum()
    }

    /// Window edges of all terms, ascending and deduplicated
    pub fn breakpoints(&self) -> Vec<Time> {
        let mut edges: Vec<Time> = self
            .terms
            .iter()
            .flat_map(|term| [term.window.start, term.window.end])
            .flatten()
            .collect();
        edges.sort_by(f64::total_cmp);
        edges.dedup();
        edges
    }

    /// Right-hand side only, without the `variable { }` binding
    pub fn expression(&self) -> String {
        let mut expr = String::new();
        for term in &self.terms {
            // A zero amplitude contributes nothing; its window only matters
            // for merging, which is already done.
            if term.amplitude == Amplitude::Constant(0.0) {
                continue;
            }

            let (negative, body) = match term.amplitude {
                Amplitude::Constant(v) => (v < 0.0, format!("{}", v.abs())),
                Amplitude::Ramp { from, to, start, duration } => {
                    let delta = to - from;
                    let op = if delta < 0.0 { '-' } else { '+' };
                    (
                        false,
                        format!("({} {} {} * (t - {}) / {})", from, op, delta.abs(), start, duration),
                    )
                }
            };
            let body = match term.render_gate(&self.threshold) {
                Some(gate) => format!("{} * {}", body, gate),
                None => body,
            };

            match (expr.is_empty(), negative) {
                (true, false) => expr.push_str(&body),
                (true, true) => {
                    expr.push('-');
                    expr.push_str(&body);
                }
                (false, false) => {
                    expr.push_str("\n  + ");
                    expr.push_str(&body);
                }
                (false, true) => {
                    expr.push_str("\n  - ");
                    expr.push_str(&body);
                }
            }
        }

        if expr.is_empty() {
            expr.push('0');
        }
        expr
    }
}

impl fmt::Display for CommandWaveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.len() > 1 {
            write!(f, "{} {{\n  {}\n}}", self.variable, self.expression())
        } else {
            write!(f, "{} {{ {} }}", self.variable, self.expression())
        }
    }
}

/// Build the command waveform for `protocol`, bound to `variable`.
///
/// Consecutive flat steps at the same voltage share one term whose window
/// spans all of them.
pub fn synthesize(protocol: &Protocol, variable: &str, threshold: Threshold) -> CommandWaveform {
    let steps = protocol.steps();
    let last = steps.len() - 1;
    let mut terms: Vec<Term> = Vec::with_capacity(steps.len());
    let mut t0 = 0.0;

    for (i, step) in steps.iter().enumerate() {
        let t1 = t0 + step.duration;
        let window = Window {
            start: (i > 0).then_some(t0),
            end: (i < last).then_some(t1),
        };

        if protocol.is_effective_ramp(i) {
            terms.push(Term {
                amplitude: Amplitude::Ramp {
                    from: steps[i - 1].voltage,
                    to: step.voltage,
                    start: t0,
                    duration: step.duration,
                },
                window,
            });
        } else {
            match terms.last_mut() {
                Some(prev) if prev.amplitude == Amplitude::Constant(step.voltage) => {
                    prev.window.end = window.end;
                }
                _ => terms.push(Term {
                    amplitude: Amplitude::Constant(step.voltage),
                    window,
                }),
            }
        }

        t0 = t1;
    }

    CommandWaveform {
        variable: variable.to_string(),
        threshold,
        terms,
    }
}
