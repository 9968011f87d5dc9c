//! The serialized state snapshot.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::{HivemindError, Result};

/// Latest opinion of one address on one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpinionEntry {
    pub opinion_cid: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
}

/// address -> message -> signature -> timestamp
pub type Signatures = BTreeMap<String, BTreeMap<String, BTreeMap<String, u64>>>;

/// One question's opinions, keyed by address.
pub type QuestionOpinions = BTreeMap<String, OpinionEntry>;

/// A State object as it is stored in the CAS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateData {
    pub hivemind_id: Option<String>,
    #[serde(default)]
    pub option_cids: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_opinion_cids")]
    pub opinion_cids: Vec<QuestionOpinions>,
    #[serde(default)]
    pub signatures: Signatures,
    #[serde(default)]
    pub participants: BTreeMap<String, Participant>,
    #[serde(default)]
    pub selected: Vec<Vec<String>>,
    #[serde(rename = "final", default)]
    pub finalized: bool,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub previous_cid: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OpinionCidsRepr {
    PerQuestion(Vec<QuestionOpinions>),
    Legacy(QuestionOpinions),
}

/// Older snapshots store a single question's map instead of a list.
fn deserialize_opinion_cids<'de, D>(deserializer: D) -> std::result::Result<Vec<QuestionOpinions>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OpinionCidsRepr>::deserialize(deserializer)? {
        Some(OpinionCidsRepr::PerQuestion(list)) => list,
        Some(OpinionCidsRepr::Legacy(map)) => vec![map],
        None => Vec::new(),
    })
}

impl StateData {
    /// Latest timestamp recorded for an (address, message) pair.
    pub fn last_signed(&self, address: &str, message: &str) -> Option<u64> {
        self.signatures
            .get(address)
            .and_then(|messages| messages.get(message))
            .and_then(|signatures| signatures.values().copied().max())
    }

    /// Reject a timestamp that does not move past every earlier signature
    /// of the same message by the same address.
    pub fn check_signature_timestamp(
        &self,
        address: &str,
        message: &str,
        timestamp: u64,
    ) -> Result<()> {
        match self.last_signed(address, message) {
            Some(last) if timestamp <= last => Err(HivemindError::StaleTimestamp {
                address: address.to_string(),
                message: message.to_string(),
                timestamp,
            }),
            _ => Ok(()),
        }
    }

    /// Record a verified signature.
    pub fn add_signature(
        &mut self,
        address: &str,
        timestamp: u64,
        message: &str,
        signature: &str,
    ) -> Result<()> {
        self.check_signature_timestamp(address, message, timestamp)?;
        self.signatures
            .entry(address.to_string())
            .or_default()
            .entry(message.to_string())
            .or_default()
            .insert(signature.to_string(), timestamp);
        Ok(())
    }

    /// Number of admitted options whose CID was signed by `address`.
    pub fn options_signed_by(&self, address: &str) -> usize {
        self.signatures.get(address).map_or(0, |messages| {
            self.option_cids
                .iter()
                .filter(|cid| messages.contains_key(cid.as_str()))
                .count()
        })
    }

    /// Options already chosen for a question in earlier selection rounds.
    pub fn selected_for(&self, question_index: usize) -> impl Iterator<Item = &str> {
        self.selected
            .iter()
            .filter_map(move |round| round.get(question_index).map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names() {
        let data = StateData {
            hivemind_id: Some("bafyissue".to_string()),
            opinion_cids: vec![BTreeMap::new()],
            finalized: true,
            ..Default::default()
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["final"], json!(true));
        assert_eq!(value["opinion_cids"], json!([{}]));
        assert_eq!(value["previous_cid"], json!(null));
        assert!(value.get("finalized").is_none());
    }

    #[test]
    fn test_legacy_opinion_map_is_upgraded() {
        let data: StateData = serde_json::from_value(json!({
            "hivemind_id": "bafyissue",
            "option_cids": ["a"],
            "opinion_cids": {"1Addr": {"opinion_cid": "op", "timestamp": 5}},
            "final": false
        }))
        .unwrap();
        assert_eq!(data.opinion_cids.len(), 1);
        assert_eq!(data.opinion_cids[0]["1Addr"].opinion_cid, "op");

        let empty: StateData =
            serde_json::from_value(json!({"hivemind_id": null, "opinion_cids": null})).unwrap();
        assert!(empty.opinion_cids.is_empty());
    }

    #[test]
    fn test_signature_timestamps_are_monotonic() {
        let mut data = StateData::default();
        data.add_signature("addr", 1000, "msg", "sig1").unwrap();

        let err = data.add_signature("addr", 999, "msg", "sig2").unwrap_err();
        assert!(matches!(err, HivemindError::StaleTimestamp { timestamp: 999, .. }));
        assert!(data.add_signature("addr", 1000, "msg", "sig3").is_err());

        data.add_signature("addr", 1001, "msg", "sig4").unwrap();
        data.add_signature("addr", 1, "other", "sig5").unwrap();
        data.add_signature("someone", 1, "msg", "sig6").unwrap();

        assert_eq!(data.last_signed("addr", "msg"), Some(1001));
        assert_eq!(data.signatures["addr"]["msg"].len(), 2);
    }

    #[test]
    fn test_options_signed_by() {
        let mut data = StateData::default();
        data.option_cids = vec!["a".to_string(), "b".to_string()];
        data.add_signature("x", 1, "a", "s1").unwrap();
        data.add_signature("x", 1, "b", "s2").unwrap();
        data.add_signature("x", 1, "a name", "s3").unwrap();
        data.add_signature("y", 1, "b", "s4").unwrap();

        assert_eq!(data.options_signed_by("x"), 2);
        assert_eq!(data.options_signed_by("y"), 1);
        assert_eq!(data.options_signed_by("z"), 0);
    }
}
