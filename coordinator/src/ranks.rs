use itertools::Itertools;
use std::{fmt, ops::RangeInclusive, str::FromStr};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RankError {
    #[error("Invalid rank range expression '{expression}': {reason}")]
    InvalidRangeExpression { expression: String, reason: String },
}

impl RankError {
    fn invalid(expression: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRangeExpression {
            expression: expression.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Set of task ranks selected for profiling
///
/// `All` is used when no expression was supplied, otherwise the expression is kept verbatim (it is
/// forwarded to the profiler) next to a normalized list of disjoint, ascending ranges.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RankSelection {
    #[default]
    All,
    Explicit {
        expression: String,
        ranges: Vec<RangeInclusive<u32>>,
    },
}

impl RankSelection {
    /// parse a range list like `0,3-7,9`
    ///
    /// A descending token such as `7-3` selects only its lower bound (`7`). Overlapping tokens are
    /// merged, so every rank is counted once.
    pub fn parse(expression: &str) -> Result<Self, RankError> {
        let trimmed = expression.trim();

        if trimmed.is_empty() {
            return Err(RankError::invalid(expression, "expression is empty"));
        }

        let mut ranges = Vec::new();

        for token in trimmed.split(',').map(str::trim) {
            if token.is_empty() {
                return Err(RankError::invalid(expression, "empty element in list"));
            }

            let mut bounds = token.split('-');
            let low = parse_rank(expression, bounds.next())?;
            let high = match bounds.next() {
                Some(high) => parse_rank(expression, Some(high))?,
                None => low,
            };

            if bounds.next().is_some() {
                return Err(RankError::invalid(
                    expression,
                    format!("'{token}' has more than one '-'"),
                ));
            }

            // descending ranges contribute their lower bound only
            ranges.push(low..=high.max(low));
        }

        Ok(Self::Explicit {
            expression: trimmed.to_owned(),
            ranges: merge(ranges),
        })
    }

    /// parse an optional expression, `None` selects every rank
    pub fn from_option(expression: Option<&str>) -> Result<Self, RankError> {
        expression.map_or(Ok(Self::All), Self::parse)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// the original expression, if any, to be forwarded to the profiler
    pub fn expression(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Explicit { expression, .. } => Some(expression),
        }
    }

    pub fn contains(&self, rank: u32) -> bool {
        match self {
            Self::All => true,
            Self::Explicit { ranges, .. } => ranges
                .binary_search_by(|range| {
                    if *range.end() < rank {
                        std::cmp::Ordering::Less
                    } else if *range.start() > rank {
                        std::cmp::Ordering::Greater
                    } else {
                        std::cmp::Ordering::Equal
                    }
                })
                .is_ok(),
        }
    }

    /// number of distinct ranks described, `All` resolves to `total_tasks`
    pub fn count(&self, total_tasks: u32) -> u64 {
        match self {
            Self::All => u64::from(total_tasks),
            Self::Explicit { ranges, .. } => ranges.iter().map(range_len).sum(),
        }
    }

    /// number of selected ranks that actually exist in a step of `total_tasks` tasks
    pub fn count_within(&self, total_tasks: u32) -> u64 {
        match self {
            Self::All => u64::from(total_tasks),
            Self::Explicit { ranges, .. } => ranges
                .iter()
                .filter(|range| *range.start() < total_tasks)
                .map(|range| range_len(&(*range.start()..=(*range.end()).min(total_tasks - 1))))
                .sum(),
        }
    }

    /// lowest selected rank below `total_tasks`
    pub fn first_within(&self, total_tasks: u32) -> Option<u32> {
        let first = match self {
            Self::All => 0,
            Self::Explicit { ranges, .. } => *ranges.first()?.start(),
        };

        (first < total_tasks).then_some(first)
    }
}

impl FromStr for RankSelection {
    type Err = RankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RankSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Explicit { expression, .. } => write!(f, "{expression}"),
        }
    }
}

fn parse_rank(expression: &str, token: Option<&str>) -> Result<u32, RankError> {
    let token = token.map(str::trim).unwrap_or_default();

    token.parse::<u32>().map_err(|error| {
        RankError::invalid(expression, format!("'{token}' is not a rank: {error}"))
    })
}

fn range_len(range: &RangeInclusive<u32>) -> u64 {
    u64::from(*range.end()) - u64::from(*range.start()) + 1
}

/// sort ranges and merge the ones that overlap or touch
fn merge(ranges: Vec<RangeInclusive<u32>>) -> Vec<RangeInclusive<u32>> {
    ranges
        .into_iter()
        .sorted_by_key(|range| *range.start())
        .coalesce(|previous, next| {
            if u64::from(*next.start()) <= u64::from(*previous.end()) + 1 {
                Ok(*previous.start()..=*previous.end().max(next.end()))
            } else {
                Err((previous, next))
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "ranks_test.rs"]
mod ranks_test;
