//! Condorcet pairwise tally and contribution scoring.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::HivemindState;
use crate::error::{HivemindError, Result};
use crate::issue::OnSelection;

/// Weighted pairwise outcomes of one option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OptionScore {
    pub win: f64,
    pub loss: f64,
    pub unknown: f64,
    pub score: f64,
}

/// Tally of one question, in admission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TallyResults {
    entries: Vec<(String, OptionScore)>,
}

impl TallyResults {
    pub fn get(&self, option_cid: &str) -> Option<&OptionScore> {
        self.entries
            .iter()
            .find(|(cid, _)| cid == option_cid)
            .map(|(_, score)| score)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionScore)> {
        self.entries.iter().map(|(cid, score)| (cid.as_str(), score))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Options by descending score. Equal scores keep admission order.
    pub fn ranked(&self) -> Vec<(&str, &OptionScore)> {
        let mut ranked: Vec<_> = self.iter().collect();
        ranked.sort_by(|(_, a), (_, b)| b.score.total_cmp(&a.score));
        ranked
    }

    /// Highest scoring option, ties going to the earliest admitted.
    pub fn winner(&self) -> Option<&str> {
        self.ranked().first().map(|(cid, _)| *cid)
    }

    /// Winner only when it is unambiguous: at least two options and no tie
    /// at the top.
    pub fn consensus(&self) -> Option<&str> {
        match self.ranked().as_slice() {
            [(first, a), (_, b), ..] if a.score != b.score => Some(*first),
            _ => None,
        }
    }

    /// Sum of all win, loss and unknown weights.
    pub fn total_weight(&self) -> f64 {
        self.entries
            .iter()
            .map(|(_, s)| s.win + s.loss + s.unknown)
            .sum()
    }
}

enum Preference {
    First,
    Second,
    Neither,
}

fn prefer(ranking: &[String], a: &str, b: &str) -> Preference {
    let position_a = ranking.iter().position(|cid| cid == a);
    let position_b = ranking.iter().position(|cid| cid == b);
    match (position_a, position_b) {
        (Some(x), Some(y)) if x < y => Preference::First,
        (Some(_), Some(_)) => Preference::Second,
        (Some(_), None) => Preference::First,
        (None, Some(_)) => Preference::Second,
        (None, None) => Preference::Neither,
    }
}

impl HivemindState {
    /// Voting weight of an address under the issue's restrictions.
    pub fn weight(&self, address: &str) -> f64 {
        self.restrictions().map_or(1.0, |r| r.weight(address))
    }

    /// Options competing on a question. Under `Exclude`, earlier winners
    /// of that question drop out.
    pub fn available_options(&self, question_index: usize) -> Vec<&str> {
        let exclude = self
            .issue
            .as_ref()
            .is_some_and(|i| i.on_selection == Some(OnSelection::Exclude));
        let excluded: Vec<&str> = if exclude {
            self.data.selected_for(question_index).collect()
        } else {
            Vec::new()
        };

        self.data
            .option_cids
            .iter()
            .map(String::as_str)
            .filter(|cid| !excluded.contains(cid))
            .collect()
    }

    fn check_question(&self, question_index: usize) -> Result<()> {
        if question_index >= self.issue()?.questions.len() {
            return Err(HivemindError::InvalidQuestion(question_index));
        }
        Ok(())
    }

    /// Run the pairwise tally for a question.
    pub fn calculate_results(&self, question_index: usize) -> Result<TallyResults> {
        self.check_question(question_index)?;
        let available = self.available_options(question_index);
        let mut scores = vec![OptionScore::default(); available.len()];

        // Materialize once per voter
        let voters: Vec<(f64, &[String])> = self
            .opinion_entries(question_index)
            .into_iter()
            .flatten()
            .map(|(address, entry)| {
                let ranking = self
                    .ranking(question_index, &entry.opinion_cid)
                    .unwrap_or_default();
                (self.weight(address), ranking)
            })
            .collect();

        for i in 0..available.len() {
            for j in (i + 1)..available.len() {
                for (weight, ranking) in &voters {
                    match prefer(ranking, available[i], available[j]) {
                        Preference::First => {
                            scores[i].win += weight;
                            scores[j].loss += weight;
                        }
                        Preference::Second => {
                            scores[j].win += weight;
                            scores[i].loss += weight;
                        }
                        Preference::Neither => {
                            scores[i].unknown += weight;
                            scores[j].unknown += weight;
                        }
                    }
                }
            }
        }

        for score in &mut scores {
            let total = score.win + score.loss + score.unknown;
            score.score = if total > 0.0 { score.win / total } else { 0.0 };
        }

        Ok(TallyResults {
            entries: available
                .into_iter()
                .map(str::to_string)
                .zip(scores)
                .collect(),
        })
    }

    /// Value of the unambiguous winner of a question.
    pub fn consensus(&self, question_index: usize) -> Result<Option<Value>> {
        let results = self.calculate_results(question_index)?;
        Ok(results
            .consensus()
            .and_then(|cid| self.option(cid))
            .map(|option| option.value.clone()))
    }

    /// Option values of a question by descending score.
    pub fn ranked_consensus(&self, question_index: usize) -> Result<Vec<Value>> {
        let results = self.calculate_results(question_index)?;
        Ok(results
            .ranked()
            .into_iter()
            .filter_map(|(cid, _)| self.option(cid))
            .map(|option| option.value.clone())
            .collect())
    }

    /// Credit each voter of a question for agreeing with the outcome and
    /// for voting early.
    pub fn contributions(&self, question_index: usize) -> Result<BTreeMap<String, f64>> {
        let results = self.calculate_results(question_index)?;
        let option_order: Vec<&str> = results.ranked().into_iter().map(|(cid, _)| cid).collect();

        let mut voters: Vec<_> = self
            .opinion_entries(question_index)
            .into_iter()
            .flatten()
            .collect();
        voters.sort_by_key(|(_, entry)| entry.timestamp);

        let n = voters.len() as f64;
        let mut scored = Vec::with_capacity(voters.len());
        for (i, (address, entry)) in voters.into_iter().enumerate() {
            let ranking = self
                .ranking(question_index, &entry.opinion_cid)
                .unwrap_or_default();
            let multiplier = if ranking.is_empty() {
                0.0
            } else {
                1.0 - i as f64 / n
            };
            let deviance: f64 = option_order
                .iter()
                .enumerate()
                .map(|(j, option)| match ranking.iter().position(|cid| cid.as_str() == *option) {
                    Some(k) => j.abs_diff(k) as f64,
                    None => (option_order.len() - j) as f64,
                })
                .sum();
            scored.push((address.clone(), multiplier, deviance));
        }

        let total_deviance: f64 = scored.iter().map(|(_, _, d)| d).sum();
        Ok(scored
            .into_iter()
            .map(|(address, multiplier, deviance)| {
                let contribution = if total_deviance > 0.0 {
                    (1.0 - deviance / total_deviance) * multiplier
                } else {
                    multiplier
                };
                (address, contribution)
            })
            .collect())
    }
}
