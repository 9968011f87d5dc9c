//! Voting issue descriptors.
//!
//! An issue is the immutable contest specification every option, opinion
//! and state refers to by CID. It is validated when saved; once published
//! it never changes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

use crate::cas::Cas;
use crate::crypto::is_valid_address;
use crate::error::{HivemindError, Result};

pub const MAX_NAME_LENGTH: usize = 50;
pub const MAX_DESCRIPTION_LENGTH: usize = 255;
pub const MAX_TAG_LENGTH: usize = 20;
pub const MAX_QUESTION_LENGTH: usize = 255;

/// Type every option value of an issue must have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnswerType {
    #[default]
    String,
    Bool,
    Integer,
    Float,
    Hivemind,
    Image,
    Video,
    Complex,
    Address,
}

impl AnswerType {
    /// Whether auto rankings can be used with this answer type.
    pub fn is_numeric(self) -> bool {
        matches!(self, AnswerType::Integer | AnswerType::Float)
    }
}

/// What happens to the state when a consensus is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnSelection {
    /// Freeze the state
    Finalize,
    /// Leave selected options out of later tallies
    Exclude,
    /// Clear all opinions
    Reset,
}

/// Primitive field type of a Complex answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecType {
    String,
    Integer,
    Float,
}

impl SpecType {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            SpecType::String => value.is_string(),
            SpecType::Integer => value.is_i64() || value.is_u64(),
            SpecType::Float => value.is_f64(),
        }
    }
}

/// A predefined answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub value: Value,
    #[serde(default)]
    pub text: String,
}

/// Constraints on option values.
///
/// Keys outside the recognized set are kept so foreign issues still load,
/// but they make the issue invalid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specs: Option<BTreeMap<String, SpecType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Choice>>,
    /// Source address of a simplified inheritance list
    #[serde(rename = "SIL", default, skip_serializing_if = "Option::is_none")]
    pub sil: Option<String>,
    /// Source address of a linked address list
    #[serde(rename = "LAL", default, skip_serializing_if = "Option::is_none")]
    pub lal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl Constraints {
    pub fn validate(&self) -> Result<()> {
        if let Some(key) = self.unknown.keys().next() {
            return Err(HivemindError::InvalidConstraint(format!(
                "unrecognized key: {}",
                key
            )));
        }

        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(HivemindError::InvalidConstraint(format!(
                    "min_length {} exceeds max_length {}",
                    min, max
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(HivemindError::InvalidConstraint(format!(
                    "min_value {} exceeds max_value {}",
                    min, max
                )));
            }
        }

        if let Some(pattern) = &self.regex {
            regex::Regex::new(pattern)
                .map_err(|e| HivemindError::InvalidConstraint(format!("regex: {}", e)))?;
        }

        if self.lal.is_some() && self.xpub.is_none() {
            return Err(HivemindError::InvalidConstraint(
                "LAL requires an xpub".to_string(),
            ));
        }
        for (key, address) in [("SIL", &self.sil), ("LAL", &self.lal)] {
            if let Some(address) = address {
                if !is_valid_address(address) {
                    return Err(HivemindError::InvalidConstraint(format!(
                        "{} is not a valid address: {}",
                        key, address
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Split a restriction entry into its address and optional weight suffix.
pub fn split_restriction_entry(entry: &str) -> (&str, Option<&str>) {
    match entry.split_once('@') {
        Some((address, weight)) => (address, Some(weight)),
        None => (entry, None),
    }
}

fn parse_weight(weight: &str) -> Option<f64> {
    weight
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|w| w.is_finite() && *w >= 0.0)
}

/// Who may participate, and how much.
///
/// Like [`Constraints`], unrecognized keys survive decoding but fail
/// validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Restrictions {
    /// Entries are `address` or `address@weight`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_per_address: Option<u32>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl Restrictions {
    /// The restriction entry matching an address, if any.
    pub fn entry_for(&self, address: &str) -> Option<&str> {
        self.addresses.as_ref().and_then(|entries| {
            entries
                .iter()
                .map(String::as_str)
                .find(|entry| split_restriction_entry(entry).0 == address)
        })
    }

    /// Whether an address may participate. Unrestricted issues permit everyone.
    pub fn permits(&self, address: &str) -> bool {
        self.addresses.is_none() || self.entry_for(address).is_some()
    }

    /// Voting weight of an address.
    ///
    /// Unlisted addresses weigh 0 when a list exists. A missing, malformed
    /// or negative weight suffix counts as 1.
    pub fn weight(&self, address: &str) -> f64 {
        if self.addresses.is_none() {
            return 1.0;
        }
        match self.entry_for(address) {
            None => 0.0,
            Some(entry) => split_restriction_entry(entry)
                .1
                .and_then(parse_weight)
                .unwrap_or(1.0),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(key) = self.unknown.keys().next() {
            return Err(HivemindError::InvalidIssue(format!(
                "unrecognized restriction: {}",
                key
            )));
        }
        if let Some(entries) = &self.addresses {
            for entry in entries {
                let (address, weight) = split_restriction_entry(entry);
                if !is_valid_address(address) {
                    return Err(HivemindError::InvalidIssue(format!(
                        "restricted address is not valid: {}",
                        address
                    )));
                }
                if let Some(weight) = weight {
                    if parse_weight(weight).is_none() {
                        return Err(HivemindError::InvalidIssue(format!(
                            "weight must be a non-negative number: {}",
                            entry
                        )));
                    }
                }
            }
        }

        if self.options_per_address == Some(0) {
            return Err(HivemindError::InvalidIssue(
                "options_per_address must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// The contest specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HivemindIssue {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub questions: Vec<String>,
    #[serde(default)]
    pub answer_type: AnswerType,
    #[serde(default)]
    pub constraints: Option<Constraints>,
    #[serde(default)]
    pub restrictions: Option<Restrictions>,
    #[serde(default)]
    pub on_selection: Option<OnSelection>,
    #[serde(default)]
    pub author: Option<String>,
}

impl HivemindIssue {
    /// Create an issue with a name and no questions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            questions: Vec::new(),
            answer_type: AnswerType::default(),
            constraints: None,
            restrictions: None,
            on_selection: None,
            author: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_answer_type(mut self, answer_type: AnswerType) -> Self {
        self.answer_type = answer_type;
        self
    }

    pub fn with_on_selection(mut self, on_selection: Option<OnSelection>) -> Self {
        self.on_selection = on_selection;
        self
    }

    /// Append a question. Duplicates and bad lengths are rejected.
    pub fn add_question(&mut self, question: impl Into<String>) -> Result<()> {
        let question = question.into();
        let length = question.chars().count();
        if length == 0 || length > MAX_QUESTION_LENGTH {
            return Err(HivemindError::InvalidIssue(format!(
                "question must be 1-{} characters",
                MAX_QUESTION_LENGTH
            )));
        }
        if self.questions.contains(&question) {
            return Err(HivemindError::InvalidIssue(format!(
                "duplicate question: {}",
                question
            )));
        }
        self.questions.push(question);
        Ok(())
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) -> Result<()> {
        let tag = tag.into();
        check_tag(&tag)?;
        if self.tags.contains(&tag) {
            return Err(HivemindError::InvalidIssue(format!("duplicate tag: {}", tag)));
        }
        self.tags.push(tag);
        Ok(())
    }

    /// Replace the constraints from a JSON mapping.
    pub fn set_constraints(&mut self, constraints: Value) -> Result<()> {
        let constraints: Constraints = serde_json::from_value(constraints)
            .map_err(|e| HivemindError::InvalidConstraint(e.to_string()))?;
        constraints.validate()?;
        self.constraints = Some(constraints);
        Ok(())
    }

    /// Replace the restrictions from a JSON mapping.
    pub fn set_restrictions(&mut self, restrictions: Value) -> Result<()> {
        let restrictions: Restrictions = serde_json::from_value(restrictions)
            .map_err(|e| HivemindError::InvalidIssue(format!("restrictions: {}", e)))?;
        restrictions.validate()?;
        self.restrictions = Some(restrictions);
        Ok(())
    }

    pub fn set_author(&mut self, author: impl Into<String>) -> Result<()> {
        let author = author.into();
        if !is_valid_address(&author) {
            return Err(HivemindError::InvalidIssue(format!(
                "author is not a valid address: {}",
                author
            )));
        }
        self.author = Some(author);
        Ok(())
    }

    /// Check every field against the issue rules.
    pub fn validate(&self) -> Result<()> {
        let name_length = self.name.chars().count();
        if name_length == 0 || name_length > MAX_NAME_LENGTH {
            return Err(HivemindError::InvalidIssue(format!(
                "name must be 1-{} characters",
                MAX_NAME_LENGTH
            )));
        }
        if self.description.chars().count() > MAX_DESCRIPTION_LENGTH {
            return Err(HivemindError::InvalidIssue(format!(
                "description must be at most {} characters",
                MAX_DESCRIPTION_LENGTH
            )));
        }

        let mut seen = HashSet::new();
        for tag in &self.tags {
            check_tag(tag)?;
            if !seen.insert(tag.as_str()) {
                return Err(HivemindError::InvalidIssue(format!("duplicate tag: {}", tag)));
            }
        }

        if self.questions.is_empty() {
            return Err(HivemindError::InvalidIssue(
                "at least one question is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for question in &self.questions {
            let length = question.chars().count();
            if length == 0 || length > MAX_QUESTION_LENGTH {
                return Err(HivemindError::InvalidIssue(format!(
                    "question must be 1-{} characters",
                    MAX_QUESTION_LENGTH
                )));
            }
            if !seen.insert(question.as_str()) {
                return Err(HivemindError::InvalidIssue(format!(
                    "duplicate question: {}",
                    question
                )));
            }
        }

        if let Some(constraints) = &self.constraints {
            constraints.validate()?;
        }
        if let Some(restrictions) = &self.restrictions {
            restrictions.validate()?;
        }
        if let Some(author) = &self.author {
            if !is_valid_address(author) {
                return Err(HivemindError::InvalidIssue(format!(
                    "author is not a valid address: {}",
                    author
                )));
            }
        }

        Ok(())
    }

    /// Validate and publish, returning the issue CID.
    pub async fn save(&self, cas: &Cas) -> Result<String> {
        self.validate()?;
        let cid = cas.put_json(self).await?;
        info!(cid = %cid, name = %self.name, "Saved issue");
        Ok(cid)
    }

    pub async fn load(cas: &Cas, cid: &str) -> Result<Self> {
        cas.get_json(cid).await
    }
}

fn check_tag(tag: &str) -> Result<()> {
    let length = tag.chars().count();
    if length == 0 || length > MAX_TAG_LENGTH || tag.chars().any(char::is_whitespace) {
        return Err(HivemindError::InvalidIssue(format!(
            "tag must be 1-{} characters without spaces: {:?}",
            MAX_TAG_LENGTH, tag
        )));
    }
    Ok(())
}
