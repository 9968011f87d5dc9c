//! Voter opinions.

use serde::{Deserialize, Serialize};

use crate::cas::Cas;
use crate::cid;
use crate::error::Result;
use crate::ranking::Ranking;

/// A voter's ranked preference for one question of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HivemindOpinion {
    pub hivemind_id: String,
    pub question_index: usize,
    pub ranking: Ranking,
}

impl HivemindOpinion {
    pub fn new(hivemind_id: impl Into<String>, question_index: usize, ranking: Ranking) -> Self {
        Self {
            hivemind_id: cid::normalize(&hivemind_id.into()),
            question_index,
            ranking,
        }
    }

    pub async fn save(&self, cas: &Cas) -> Result<String> {
        cas.put_json(self).await
    }

    pub async fn load(cas: &Cas, cid: &str) -> Result<Self> {
        cas.get_json(cid).await
    }
}
