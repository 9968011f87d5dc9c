//! Candidate answers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::cas::Cas;
use crate::cid;
use crate::crypto::is_valid_address;
use crate::error::{HivemindError, Result};
use crate::issue::{AnswerType, Constraints, HivemindIssue};

/// Kind of externally resolved address set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressListKind {
    /// Simplified inheritance list
    Sil,
    /// Linked address list (derived from an xpub)
    Lal,
}

/// Resolves the address sets named by `SIL`/`LAL` constraints.
///
/// The lists live outside the CAS (they are derived from chain data), so
/// the engine only sees them through this interface.
#[async_trait]
pub trait AddressListSource: Send + Sync {
    async fn addresses(
        &self,
        kind: AddressListKind,
        source_address: &str,
        xpub: Option<&str>,
        block_height: Option<u64>,
    ) -> Result<Vec<String>>;
}

/// Fixed address lists keyed by kind and source address.
#[derive(Debug, Clone, Default)]
pub struct StaticAddressLists {
    lists: HashMap<(AddressListKind, String), Vec<String>>,
}

impl StaticAddressLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        kind: AddressListKind,
        source_address: impl Into<String>,
        addresses: Vec<String>,
    ) {
        self.lists.insert((kind, source_address.into()), addresses);
    }
}

#[async_trait]
impl AddressListSource for StaticAddressLists {
    async fn addresses(
        &self,
        kind: AddressListKind,
        source_address: &str,
        _xpub: Option<&str>,
        _block_height: Option<u64>,
    ) -> Result<Vec<String>> {
        Ok(self
            .lists
            .get(&(kind, source_address.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

/// A candidate answer bound to an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HivemindOption {
    pub hivemind_id: String,
    pub value: Value,
    #[serde(default)]
    pub text: String,
}

fn invalid(reason: impl Into<String>) -> HivemindError {
    HivemindError::InvalidOption(reason.into())
}

impl HivemindOption {
    pub fn new(hivemind_id: impl Into<String>, value: Value, text: impl Into<String>) -> Self {
        Self {
            hivemind_id: cid::normalize(&hivemind_id.into()),
            value,
            text: text.into(),
        }
    }

    /// Numeric value, if the option holds a number.
    pub fn numeric_value(&self) -> Option<f64> {
        match &self.value {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Check the value against the issue's answer type and constraints.
    pub async fn validate(
        &self,
        issue: &HivemindIssue,
        cas: &Cas,
        address_lists: Option<&dyn AddressListSource>,
    ) -> Result<()> {
        let default_constraints = Constraints::default();
        let constraints = issue.constraints.as_ref().unwrap_or(&default_constraints);

        match issue.answer_type {
            AnswerType::String => self.check_string(constraints)?,
            AnswerType::Integer => {
                if !(self.value.is_i64() || self.value.is_u64()) {
                    return Err(invalid(format!("{} is not an integer", self.value)));
                }
                self.check_range(constraints)?;
            }
            AnswerType::Float => self.check_float(constraints)?,
            AnswerType::Bool => {
                if !self.value.is_boolean() {
                    return Err(invalid(format!("{} is not a boolean", self.value)));
                }
            }
            AnswerType::Image | AnswerType::Video => match self.value.as_str() {
                Some(value) if cid::is_valid(value) => {}
                _ => return Err(invalid(format!("{} is not a valid CID", self.value))),
            },
            AnswerType::Complex => self.check_complex(constraints)?,
            AnswerType::Address => self.check_address(constraints, address_lists).await?,
            AnswerType::Hivemind => {
                let Some(issue_cid) = self.value.as_str() else {
                    return Err(invalid(format!("{} is not an issue CID", self.value)));
                };
                HivemindIssue::load(cas, issue_cid)
                    .await
                    .map_err(|e| invalid(format!("could not load issue {}: {}", issue_cid, e)))?;
            }
        }

        if let Some(choices) = &constraints.choices {
            if !choices.iter().any(|choice| choice.value == self.value) {
                return Err(invalid(format!("{} is not one of the choices", self.value)));
            }
        }

        debug!(value = %self.value, answer_type = ?issue.answer_type, "Option is valid");
        Ok(())
    }

    fn check_string(&self, constraints: &Constraints) -> Result<()> {
        let Some(value) = self.value.as_str() else {
            return Err(invalid(format!("{} is not a string", self.value)));
        };

        let length = value.chars().count();
        if let Some(min) = constraints.min_length {
            if length < min {
                return Err(invalid(format!("shorter than {} characters", min)));
            }
        }
        if let Some(max) = constraints.max_length {
            if length > max {
                return Err(invalid(format!("longer than {} characters", max)));
            }
        }
        if let Some(pattern) = &constraints.regex {
            let re = regex::Regex::new(pattern)
                .map_err(|e| HivemindError::InvalidConstraint(format!("regex: {}", e)))?;
            if !re.is_match(value) {
                return Err(invalid(format!("{:?} does not match {}", value, pattern)));
            }
        }
        Ok(())
    }

    fn check_range(&self, constraints: &Constraints) -> Result<()> {
        let Some(value) = self.numeric_value() else {
            return Err(invalid(format!("{} is not a number", self.value)));
        };
        if let Some(min) = constraints.min_value {
            if value < min {
                return Err(invalid(format!("{} is below the minimum {}", value, min)));
            }
        }
        if let Some(max) = constraints.max_value {
            if value > max {
                return Err(invalid(format!("{} is above the maximum {}", value, max)));
            }
        }
        Ok(())
    }

    fn check_float(&self, constraints: &Constraints) -> Result<()> {
        if !self.value.is_f64() {
            return Err(invalid(format!("{} is not a float", self.value)));
        }
        self.check_range(constraints)?;

        if let (Some(decimals), Some(value)) = (constraints.decimals, self.numeric_value()) {
            let formatted = format!("{:.*}", decimals as usize, value);
            if formatted.parse::<f64>().ok() != Some(value) {
                return Err(invalid(format!(
                    "{} has more than {} decimals",
                    value, decimals
                )));
            }
        }
        Ok(())
    }

    fn check_complex(&self, constraints: &Constraints) -> Result<()> {
        let Some(fields) = self.value.as_object() else {
            return Err(invalid(format!("{} is not a mapping", self.value)));
        };

        if let Some(specs) = &constraints.specs {
            if fields.len() != specs.len() || !specs.keys().all(|key| fields.contains_key(key)) {
                return Err(invalid("fields do not match the specs"));
            }
            for (key, spec) in specs {
                if !spec.matches(&fields[key]) {
                    return Err(invalid(format!("field {} is not a {:?}", key, spec)));
                }
            }
        }
        Ok(())
    }

    async fn check_address(
        &self,
        constraints: &Constraints,
        address_lists: Option<&dyn AddressListSource>,
    ) -> Result<()> {
        let Some(address) = self.value.as_str() else {
            return Err(invalid(format!("{} is not an address", self.value)));
        };
        if is_valid_address(address) {
            return Ok(());
        }

        if let Some(source) = address_lists {
            let lists = [
                (AddressListKind::Sil, &constraints.sil),
                (AddressListKind::Lal, &constraints.lal),
            ];
            for (kind, list_address) in lists {
                let Some(list_address) = list_address else {
                    continue;
                };
                let members = source
                    .addresses(
                        kind,
                        list_address,
                        constraints.xpub.as_deref(),
                        constraints.block_height,
                    )
                    .await?;
                if members.iter().any(|member| member == address) {
                    return Ok(());
                }
            }
        }

        Err(invalid(format!("{} is not a valid address", address)))
    }

    pub async fn save(&self, cas: &Cas) -> Result<String> {
        cas.put_json(self).await
    }

    pub async fn load(cas: &Cas, cid: &str) -> Result<Self> {
        cas.get_json(cid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ADDRESS: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";

    fn issue_of(answer_type: AnswerType, constraints: Option<Value>) -> HivemindIssue {
        let mut issue = HivemindIssue::new("test").with_answer_type(answer_type);
        issue.add_question("q?").unwrap();
        if let Some(constraints) = constraints {
            issue.set_constraints(constraints).unwrap();
        }
        issue
    }

    async fn check(issue: &HivemindIssue, value: Value) -> Result<()> {
        HivemindOption::new("bafyissue", value, "")
            .validate(issue, &Cas::memory(), None)
            .await
    }

    #[tokio::test]
    async fn test_string_constraints() {
        let issue = issue_of(
            AnswerType::String,
            Some(json!({"min_length": 2, "max_length": 5, "regex": "^[a-z]+$"})),
        );
        assert!(check(&issue, json!("blue")).await.is_ok());
        assert!(check(&issue, json!("b")).await.is_err());
        assert!(check(&issue, json!("purple")).await.is_err());
        assert!(check(&issue, json!("Blue")).await.is_err());
        assert!(check(&issue, json!(42)).await.is_err());
    }

    #[tokio::test]
    async fn test_integer_is_strict() {
        let issue = issue_of(AnswerType::Integer, Some(json!({"min_value": 0, "max_value": 100})));
        assert!(check(&issue, json!(42)).await.is_ok());
        assert!(check(&issue, json!(42.0)).await.is_err());
        assert!(check(&issue, json!(true)).await.is_err());
        assert!(check(&issue, json!("42")).await.is_err());
        assert!(check(&issue, json!(101)).await.is_err());
        assert!(check(&issue, json!(-1)).await.is_err());
    }

    #[tokio::test]
    async fn test_float_decimals() {
        let issue = issue_of(AnswerType::Float, Some(json!({"decimals": 1})));
        assert!(check(&issue, json!(20.2)).await.is_ok());
        assert!(check(&issue, json!(20.25)).await.is_err());
        assert!(check(&issue, json!(20)).await.is_err());
    }

    #[tokio::test]
    async fn test_bool_is_strict() {
        let issue = issue_of(AnswerType::Bool, None);
        assert!(check(&issue, json!(true)).await.is_ok());
        assert!(check(&issue, json!(false)).await.is_ok());
        assert!(check(&issue, json!(1)).await.is_err());
        assert!(check(&issue, json!(0)).await.is_err());
        assert!(check(&issue, json!("true")).await.is_err());
    }

    #[tokio::test]
    async fn test_image_requires_cid() {
        let issue = issue_of(AnswerType::Image, None);
        let image_cid = crate::cid::compute(b"png bytes");
        assert!(check(&issue, json!(image_cid)).await.is_ok());
        assert!(check(&issue, json!(format!("/ipfs/{}", image_cid))).await.is_ok());
        assert!(check(&issue, json!("not-a-cid")).await.is_err());
    }

    #[tokio::test]
    async fn test_complex_specs() {
        let issue = issue_of(
            AnswerType::Complex,
            Some(json!({"specs": {"street": "String", "number": "Integer", "lat": "Float"}})),
        );
        assert!(check(&issue, json!({"street": "Main", "number": 5, "lat": 51.2}))
            .await
            .is_ok());
        // Missing field
        assert!(check(&issue, json!({"street": "Main", "number": 5})).await.is_err());
        // Extra field
        assert!(check(&issue, json!({"street": "Main", "number": 5, "lat": 1.5, "x": 1}))
            .await
            .is_err());
        // Wrong primitive type
        assert!(check(&issue, json!({"street": "Main", "number": "5", "lat": 51.2}))
            .await
            .is_err());
        assert!(check(&issue, json!("Main 5")).await.is_err());
    }

    #[tokio::test]
    async fn test_choices() {
        let issue = issue_of(
            AnswerType::String,
            Some(json!({"choices": [{"value": "red", "text": "Red"}, {"value": "blue", "text": "Blue"}]})),
        );
        assert!(check(&issue, json!("red")).await.is_ok());
        assert!(check(&issue, json!("green")).await.is_err());
    }

    #[tokio::test]
    async fn test_address_and_address_lists() {
        let heir = "heir-without-valid-format";
        let issue = issue_of(AnswerType::Address, Some(json!({"SIL": ADDRESS})));
        assert!(check(&issue, json!(ADDRESS)).await.is_ok());
        assert!(check(&issue, json!(heir)).await.is_err());

        let mut lists = StaticAddressLists::new();
        lists.insert(AddressListKind::Sil, ADDRESS, vec![heir.to_string()]);

        let option = HivemindOption::new("bafyissue", json!(heir), "");
        assert!(option
            .validate(&issue, &Cas::memory(), Some(&lists))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_hivemind_type_loads_issue() {
        let cas = Cas::memory();
        let nested = issue_of(AnswerType::String, None);
        let nested_cid = nested.save(&cas).await.unwrap();

        let issue = issue_of(AnswerType::Hivemind, None);
        let good = HivemindOption::new("bafyissue", json!(nested_cid), "nested");
        assert!(good.validate(&issue, &cas, None).await.is_ok());

        let missing = HivemindOption::new("bafyissue", json!(crate::cid::compute(b"nothing")), "");
        assert!(matches!(
            missing.validate(&issue, &cas, None).await,
            Err(HivemindError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_numeric_value() {
        assert_eq!(HivemindOption::new("i", json!(3), "").numeric_value(), Some(3.0));
        assert_eq!(HivemindOption::new("i", json!(2.5), "").numeric_value(), Some(2.5));
        assert_eq!(HivemindOption::new("i", json!(true), "").numeric_value(), None);
        assert_eq!(HivemindOption::new("i", json!("3"), "").numeric_value(), None);
    }
}
