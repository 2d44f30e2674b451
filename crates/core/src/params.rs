//! Job parameter resolution.
//!
//! Every job input is described by a [`ParamSpec`] row in [`PARAM_TABLE`]:
//! the environment variable it is read from, the fallback used when the
//! variable is absent or empty, and the [`Rule`] the value must satisfy.
//! [`resolve`] walks the table once and either produces a complete
//! [`ResolvedParams`] or reports every invalid row at once.

use std::collections::BTreeMap;

/// Sampler names accepted for both the image and the video KSampler.
pub const SAMPLER_NAMES: &[&str] = &[
    "euler",
    "euler_ancestral",
    "heun",
    "heunpp2",
    "dpm_2",
    "dpm_2_ancestral",
    "lms",
    "dpm_fast",
    "dpm_adaptive",
    "dpmpp_2s_ancestral",
    "dpmpp_sde",
    "dpmpp_sde_gpu",
    "dpmpp_2m",
    "dpmpp_2m_sde",
    "dpmpp_2m_sde_gpu",
    "dpmpp_3m_sde",
    "dpmpp_3m_sde_gpu",
    "ddpm",
    "lcm",
];

/// Scheduler names accepted for both the image and the video KSampler.
pub const SCHEDULER_NAMES: &[&str] = &[
    "normal",
    "karras",
    "exponential",
    "sgm_uniform",
    "simple",
    "ddim_uniform",
];

/// Square latent image edge lengths, in pixels.
pub const IMAGE_SIZES: &[u64] = &[512, 768, 1024, 2048];

/// Latent batch sizes.
pub const BATCH_SIZES: &[u64] = &[1, 2, 4, 8];

/// Constraint applied to a raw environment value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Any string is accepted as-is.
    FreeText,
    /// Any non-negative integer.
    Unsigned,
    /// Integer within `min..=max`.
    Range { min: u64, max: u64 },
    /// Integer drawn from a closed set.
    OneOf(&'static [u64]),
    /// String drawn from a closed set of names.
    Names(&'static [&'static str]),
}

/// A value that satisfied its [`Rule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(String),
    Number(u64),
}

impl ParamValue {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

impl Rule {
    /// Check `raw` against this rule.
    ///
    /// On failure returns a human-readable description of what would
    /// have been accepted.
    pub fn check(&self, raw: &str) -> Result<ParamValue, String> {
        match self {
            Self::FreeText => Ok(ParamValue::Text(raw.to_string())),
            Self::Names(names) => {
                if names.contains(&raw) {
                    Ok(ParamValue::Text(raw.to_string()))
                } else {
                    Err(self.describe())
                }
            }
            Self::Unsigned => parse_number(raw)
                .map(ParamValue::Number)
                .ok_or_else(|| self.describe()),
            Self::Range { min, max } => parse_number(raw)
                .filter(|n| (*min..=*max).contains(n))
                .map(ParamValue::Number)
                .ok_or_else(|| self.describe()),
            Self::OneOf(allowed) => parse_number(raw)
                .filter(|n| allowed.contains(n))
                .map(ParamValue::Number)
                .ok_or_else(|| self.describe()),
        }
    }

    /// Describe the accepted values, e.g. `between 5 and 200 inclusive`.
    pub fn describe(&self) -> String {
        match self {
            Self::FreeText => "any text".to_string(),
            Self::Unsigned => "a non-negative integer".to_string(),
            Self::Range { min, max } => format!("between {min} and {max} inclusive"),
            Self::OneOf(allowed) => {
                let list: Vec<String> = allowed.iter().map(u64::to_string).collect();
                format!("one of {}", list.join(", "))
            }
            Self::Names(names) => format!("one of {}", names.join(", ")),
        }
    }
}

fn parse_number(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()
}

/// One row of the parameter table.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Environment variable the value is read from.
    pub var: &'static str,
    /// Human-readable name used in diagnostics.
    pub label: &'static str,
    /// Value used when the variable is unset or empty.
    pub default: &'static str,
    pub rule: Rule,
}

pub const PROMPT: ParamSpec = ParamSpec {
    var: "PROMPT",
    label: "prompt",
    default: "question mark floating in space",
    rule: Rule::FreeText,
};

pub const SEED: ParamSpec = ParamSpec {
    var: "SEED",
    label: "seed",
    default: "42",
    rule: Rule::Unsigned,
};

pub const VIDEO_SEED: ParamSpec = ParamSpec {
    var: "VIDEOSEED",
    label: "video seed",
    default: "42",
    rule: Rule::Unsigned,
};

pub const FRAMERATE: ParamSpec = ParamSpec {
    var: "FRAMERATE",
    label: "framerate",
    default: "8",
    rule: Rule::Range { min: 1, max: 15 },
};

pub const SIZE: ParamSpec = ParamSpec {
    var: "SIZE",
    label: "size",
    default: "1024",
    rule: Rule::OneOf(IMAGE_SIZES),
};

pub const STEPS: ParamSpec = ParamSpec {
    var: "STEPS",
    label: "number of steps",
    default: "75",
    rule: Rule::Range { min: 5, max: 200 },
};

pub const VIDEO_STEPS: ParamSpec = ParamSpec {
    var: "VIDEOSTEPS",
    label: "number of video steps",
    default: "20",
    rule: Rule::Range { min: 5, max: 70 },
};

pub const BATCHING: ParamSpec = ParamSpec {
    var: "BATCHING",
    label: "batch size",
    default: "1",
    rule: Rule::OneOf(BATCH_SIZES),
};

pub const SAMPLER: ParamSpec = ParamSpec {
    var: "SAMPLER",
    label: "sampler",
    default: "euler_ancestral",
    rule: Rule::Names(SAMPLER_NAMES),
};

pub const VIDEO_SAMPLER: ParamSpec = ParamSpec {
    var: "VIDEOSAMPLER",
    label: "video sampler",
    default: "euler_ancestral",
    rule: Rule::Names(SAMPLER_NAMES),
};

pub const SCHEDULER: ParamSpec = ParamSpec {
    var: "SCHEDULER",
    label: "scheduler",
    default: "normal",
    rule: Rule::Names(SCHEDULER_NAMES),
};

pub const VIDEO_SCHEDULER: ParamSpec = ParamSpec {
    var: "VIDEOSCHEDULER",
    label: "video scheduler",
    default: "normal",
    rule: Rule::Names(SCHEDULER_NAMES),
};

/// All job parameters, in validation order.
pub const PARAM_TABLE: [ParamSpec; 12] = [
    PROMPT,
    SEED,
    VIDEO_SEED,
    FRAMERATE,
    SIZE,
    STEPS,
    VIDEO_STEPS,
    BATCHING,
    SAMPLER,
    VIDEO_SAMPLER,
    SCHEDULER,
    VIDEO_SCHEDULER,
];

/// Fully validated job parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParams {
    pub prompt: String,
    pub seed: u64,
    pub video_seed: u64,
    pub framerate: u64,
    /// Width and height of the square latent image.
    pub size: u64,
    pub steps: u64,
    pub video_steps: u64,
    pub batch_size: u64,
    pub sampler: String,
    pub video_sampler: String,
    pub scheduler: String,
    pub video_scheduler: String,
}

/// A single parameter that failed its rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {label} '{value}' ({var}). Must be {expected}.")]
pub struct ParamError {
    pub var: &'static str,
    pub label: &'static str,
    pub value: String,
    /// Description of the accepted values.
    pub expected: String,
}

/// Every parameter that failed validation, in table order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join_messages(.0))]
pub struct ParamErrors(pub Vec<ParamError>);

impl ParamErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ParamError> {
        self.0.iter()
    }

    /// Names of the offending environment variables.
    pub fn vars(&self) -> Vec<&'static str> {
        self.0.iter().map(|e| e.var).collect()
    }
}

fn join_messages(errors: &[ParamError]) -> String {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    messages.join(" ")
}

/// Resolve every row of [`PARAM_TABLE`] through `lookup`.
///
/// `lookup` returns the raw value for an environment variable name; pass
/// `|name| std::env::var(name).ok()` for the real process environment.
/// Empty values fall back to the row default.
pub fn resolve<F>(lookup: F) -> Result<ResolvedParams, ParamErrors>
where
    F: Fn(&str) -> Option<String>,
{
    let mut values: BTreeMap<&'static str, ParamValue> = BTreeMap::new();
    let mut errors = Vec::new();

    for row in &PARAM_TABLE {
        let raw = lookup(row.var)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| row.default.to_string());

        match row.rule.check(&raw) {
            Ok(value) => {
                values.insert(row.var, value);
            }
            Err(expected) => errors.push(ParamError {
                var: row.var,
                label: row.label,
                value: raw,
                expected,
            }),
        }
    }

    if !errors.is_empty() {
        return Err(ParamErrors(errors));
    }

    let number = |row: &ParamSpec| {
        values
            .get(row.var)
            .and_then(ParamValue::as_number)
            .unwrap_or_default()
    };
    let text = |row: &ParamSpec| {
        values
            .get(row.var)
            .and_then(ParamValue::as_text)
            .unwrap_or_default()
            .to_string()
    };

    Ok(ResolvedParams {
        prompt: text(&PROMPT),
        seed: number(&SEED),
        video_seed: number(&VIDEO_SEED),
        framerate: number(&FRAMERATE),
        size: number(&SIZE),
        steps: number(&STEPS),
        video_steps: number(&VIDEO_STEPS),
        batch_size: number(&BATCHING),
        sampler: text(&SAMPLER),
        video_sampler: text(&VIDEO_SAMPLER),
        scheduler: text(&SCHEDULER),
        video_scheduler: text(&VIDEO_SCHEDULER),
    })
}
