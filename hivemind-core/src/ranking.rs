//! Preference rankings and their resolution against an option set.
//!
//! A fixed ranking is an explicit ordering of option CIDs. Auto rankings are
//! computed at resolve time: available options are ordered by the distance
//! of their numeric value to a preferred option, with ties going to the
//! higher (`auto_high`) or lower (`auto_low`) value.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::cid;
use crate::error::{HivemindError, Result};
use crate::option::HivemindOption;

/// A voter's preference expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ranking {
    Fixed(Vec<String>),
    AutoHigh(String),
    AutoLow(String),
}

impl Ranking {
    pub fn is_auto(&self) -> bool {
        !matches!(self, Ranking::Fixed(_))
    }

    /// Materialize an ordered list of option CIDs.
    ///
    /// `options` are the admitted options in admission order, keyed by
    /// normalized CID.
    pub fn resolve(&self, options: &[(String, HivemindOption)]) -> Result<Vec<String>> {
        match self {
            Ranking::Fixed(cids) => {
                let mut seen = HashSet::with_capacity(cids.len());
                let mut resolved = Vec::with_capacity(cids.len());
                for cid in cids {
                    let cid = cid::normalize(cid);
                    if !seen.insert(cid.clone()) {
                        return Err(HivemindError::InvalidOpinion(format!(
                            "option {} ranked twice",
                            cid
                        )));
                    }
                    resolved.push(cid);
                }
                Ok(resolved)
            }
            Ranking::AutoHigh(preferred) => resolve_auto(preferred, options, true),
            Ranking::AutoLow(preferred) => resolve_auto(preferred, options, false),
        }
    }
}

fn resolve_auto(
    preferred: &str,
    options: &[(String, HivemindOption)],
    prefer_high: bool,
) -> Result<Vec<String>> {
    if options.is_empty() {
        return Err(HivemindError::AutoRankingUnavailable(
            "no options to rank".to_string(),
        ));
    }

    let mut values = Vec::with_capacity(options.len());
    for (cid, option) in options {
        let value = option.numeric_value().ok_or_else(|| {
            HivemindError::AutoRankingUnavailable(format!("option {} is not numeric", cid))
        })?;
        values.push((cid.as_str(), value));
    }

    let preferred = cid::normalize(preferred);
    let target = values
        .iter()
        .find(|(cid, _)| *cid == preferred)
        .map(|(_, value)| *value)
        .ok_or_else(|| {
            HivemindError::InvalidOpinion(format!("preferred option {} is not available", preferred))
        })?;

    // Stable sort: equal values keep admission order
    values.sort_by(|(_, a), (_, b)| {
        let by_distance = (a - target).abs().total_cmp(&(b - target).abs());
        let by_value = if prefer_high {
            b.total_cmp(a)
        } else {
            a.total_cmp(b)
        };
        match by_distance {
            Ordering::Equal => by_value,
            other => other,
        }
    });

    Ok(values.into_iter().map(|(cid, _)| cid.to_string()).collect())
}
