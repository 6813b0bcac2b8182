use serde::Deserialize;
use thiserror::Error;

use crate::domain::models::LogRecord;

#[derive(Debug, Error, PartialEq)]
pub enum ScriptError {
    #[error("output script name must not be empty")]
    MissingName,
    #[error("output {name}: unknown units {units}")]
    UnknownUnits { name: String, units: String },
    #[error("output {name}: invalid script term {term:?}")]
    InvalidTerm { name: String, term: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Wh,
    Watts,
    Volts,
}

impl Units {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "wh" | "kwh" => Some(Self::Wh),
            "watts" | "w" => Some(Self::Watts),
            "volts" | "v" => Some(Self::Volts),
            _ => None,
        }
    }

    fn default_precision(self) -> u8 {
        match self {
            Self::Wh => 2,
            Self::Watts => 0,
            Self::Volts => 1,
        }
    }
}

/// How a script result is to be interpreted by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    /// Cumulative total of the newer record divided by the given scale.
    Total { scale: f64 },
    /// Average rate across the bracketing pair.
    Rate { elapsed_hours: f64 },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScriptSpec {
    pub name: String,
    #[serde(default = "default_units")]
    pub units: String,
    pub script: String,
    #[serde(default)]
    pub precision: Option<u8>,
}

fn default_units() -> String {
    "Watts".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Term {
    channel: usize,
    sign: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputScript {
    name: String,
    precision: u8,
    terms: Vec<Term>,
}

impl OutputScript {
    pub fn compile(spec: &ScriptSpec) -> Result<Self, ScriptError> {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(ScriptError::MissingName);
        }

        let units = Units::parse(&spec.units).ok_or_else(|| ScriptError::UnknownUnits {
            name: name.clone(),
            units: spec.units.clone(),
        })?;

        let terms = parse_terms(&name, &spec.script)?;

        Ok(Self {
            precision: spec.precision.unwrap_or_else(|| units.default_precision()),
            name,
            terms,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn run(&self, old: Option<&LogRecord>, new: &LogRecord, evaluation: Evaluation) -> f64 {
        let sum_of = |record: &LogRecord| -> f64 {
            self.terms
                .iter()
                .map(|term| term.sign * record.channel(term.channel))
                .sum()
        };

        match evaluation {
            Evaluation::Total { scale } => {
                if scale == 0.0 {
                    return 0.0;
                }
                sum_of(new) / scale
            }
            Evaluation::Rate { elapsed_hours } => {
                if elapsed_hours <= 0.0 {
                    return 0.0;
                }
                let base = old.map(sum_of).unwrap_or(0.0);
                (sum_of(new) - base) / elapsed_hours
            }
        }
    }
}

/// Output scripts in configuration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScriptSet {
    scripts: Vec<OutputScript>,
}

impl ScriptSet {
    pub fn compile(specs: &[ScriptSpec]) -> Result<Self, ScriptError> {
        let scripts = specs
            .iter()
            .map(OutputScript::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { scripts })
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputScript> {
        self.scripts.iter()
    }

    pub fn find(&self, name: &str) -> Option<&OutputScript> {
        self.scripts.iter().find(|script| script.name == name)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

// `@N` references are 1-based channel numbers joined by `+` or `-`.
fn parse_terms(name: &str, script: &str) -> Result<Vec<Term>, ScriptError> {
    let invalid = |term: &str| ScriptError::InvalidTerm {
        name: name.to_string(),
        term: term.to_string(),
    };

    let compact: String = script.chars().filter(|ch| !ch.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(invalid(""));
    }

    let mut terms = Vec::new();
    let mut rest = compact.as_str();
    let mut sign = 1.0;

    if let Some(stripped) = rest.strip_prefix('-') {
        sign = -1.0;
        rest = stripped;
    }

    loop {
        let end = rest.find(['+', '-']).unwrap_or(rest.len());
        let token = &rest[..end];
        let channel = token
            .strip_prefix('@')
            .and_then(|digits| digits.parse::<usize>().ok())
            .filter(|channel| *channel >= 1)
            .ok_or_else(|| invalid(token))?;

        terms.push(Term {
            channel: channel - 1,
            sign,
        });

        if end == rest.len() {
            break;
        }
        sign = if rest[end..].starts_with('-') { -1.0 } else { 1.0 };
        rest = &rest[end + 1..];
    }

    Ok(terms)
}
