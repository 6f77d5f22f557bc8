use crate::ranks::{RankError, RankSelection};
use std::{fmt, num::NonZeroU32, str::FromStr};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    #[error("Bad value for --{name}: '{value}' ({reason})")]
    InvalidOption {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    InvalidRanks(#[from] RankError),
}

/// Sampling frequency, `Disabled` turns profiling off for the whole step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Frequency {
    #[default]
    Disabled,
    Hz(NonZeroU32),
}

impl Frequency {
    pub fn hz(&self) -> Option<NonZeroU32> {
        match self {
            Self::Disabled => None,
            Self::Hz(hz) => Some(*hz),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.hz().is_some()
    }
}

impl FromStr for Frequency {
    type Err = OptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();

        match value.to_lowercase().as_str() {
            "off" | "disabled" | "none" => return Ok(Self::Disabled),
            "" => {
                return Err(OptionError::InvalidOption {
                    name: "frequency",
                    value: s.to_owned(),
                    reason: "a frequency in Hz is required".to_owned(),
                })
            }
            _ => {}
        }

        match value.parse::<i64>() {
            Ok(hz) if hz > 0 => u32::try_from(hz)
                .ok()
                .and_then(NonZeroU32::new)
                .map(Self::Hz)
                .ok_or_else(|| OptionError::InvalidOption {
                    name: "frequency",
                    value: s.to_owned(),
                    reason: "frequency is out of range".to_owned(),
                }),
            Ok(_) => Err(OptionError::InvalidOption {
                name: "frequency",
                value: s.to_owned(),
                reason: "frequency must be a positive number of Hz".to_owned(),
            }),
            Err(error) => Err(OptionError::InvalidOption {
                name: "frequency",
                value: s.to_owned(),
                reason: error.to_string(),
            }),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "off"),
            Self::Hz(hz) => write!(f, "{hz}"),
        }
    }
}

/// Options as handed over by the job launcher, validated once and immutable afterwards
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilingOptions {
    pub frequency: Frequency,
    pub ranks: RankSelection,
}

impl ProfilingOptions {
    /// validate raw option values, `None` keeps the default for that option
    pub fn parse(frequency: Option<&str>, ranks: Option<&str>) -> Result<Self, OptionError> {
        Ok(Self {
            frequency: frequency.map(str::parse).transpose()?.unwrap_or_default(),
            ranks: RankSelection::from_option(ranks)?,
        })
    }
}
