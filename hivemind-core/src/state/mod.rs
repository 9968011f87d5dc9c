//! The protocol engine.
//!
//! A [`HivemindState`] owns one snapshot of a state chain together with
//! the issue it votes on and caches derived from the CAS (loaded options,
//! loaded opinions, materialized rankings). Every mutation builds the next
//! snapshot on a copy, publishes it with `previous_cid` pointing at the
//! current one and only then swaps it in, so a failed admission leaves the
//! engine exactly as it was.

mod data;
mod tally;

pub use data::{OpinionEntry, Participant, QuestionOpinions, Signatures, StateData};
pub use tally::{OptionScore, TallyResults};

use futures::future::try_join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cas::Cas;
use crate::cid;
use crate::crypto::{is_valid_address, verify_message};
use crate::error::{HivemindError, Result};
use crate::issue::{HivemindIssue, OnSelection, Restrictions};
use crate::opinion::HivemindOpinion;
use crate::option::{AddressListSource, HivemindOption};

/// Message signed by the author to select consensus.
pub const SELECT_CONSENSUS_MESSAGE: &str = "select_consensus";

/// Opinions of one question keyed by opinion CID.
type OpinionCache = HashMap<String, HivemindOpinion>;
/// Materialized rankings of one question keyed by opinion CID.
type RankingCache = HashMap<String, Vec<String>>;

pub struct HivemindState {
    cas: Cas,
    data: StateData,
    cid: Option<String>,
    issue: Option<HivemindIssue>,
    /// Admitted options in admission order
    options: Vec<(String, HivemindOption)>,
    opinions: Vec<OpinionCache>,
    rankings: Vec<RankingCache>,
    address_lists: Option<Arc<dyn AddressListSource>>,
}

impl HivemindState {
    /// An empty state not yet bound to an issue.
    pub fn new(cas: Cas) -> Self {
        Self {
            cas,
            data: StateData::default(),
            cid: None,
            issue: None,
            options: Vec::new(),
            opinions: Vec::new(),
            rankings: Vec::new(),
            address_lists: None,
        }
    }

    /// Resolver for `SIL`/`LAL` address constraints.
    pub fn with_address_lists(mut self, address_lists: Arc<dyn AddressListSource>) -> Self {
        self.address_lists = Some(address_lists);
        self
    }

    /// Author to record on the genesis snapshot when the issue names none.
    pub fn with_author(mut self, author: impl Into<String>) -> Result<Self> {
        let author = author.into();
        if !is_valid_address(&author) {
            return Err(HivemindError::InvalidIssue(format!(
                "author is not a valid address: {}",
                author
            )));
        }
        if self.data.hivemind_id.is_some() {
            return Err(HivemindError::InvalidStateChain(
                "author can only be set before binding an issue".to_string(),
            ));
        }
        self.data.author = Some(author);
        Ok(self)
    }

    /// CID of the current snapshot, if it has been published.
    pub fn cid(&self) -> Option<&str> {
        self.cid.as_deref()
    }

    pub fn data(&self) -> &StateData {
        &self.data
    }

    pub fn hivemind_id(&self) -> Option<&str> {
        self.data.hivemind_id.as_deref()
    }

    pub fn issue(&self) -> Result<&HivemindIssue> {
        self.issue.as_ref().ok_or(HivemindError::IssueNotSet)
    }

    /// Admitted options in admission order, keyed by CID.
    pub fn options(&self) -> &[(String, HivemindOption)] {
        &self.options
    }

    pub fn option(&self, option_cid: &str) -> Option<&HivemindOption> {
        let option_cid = cid::normalize(option_cid);
        self.options
            .iter()
            .find(|(cid, _)| *cid == option_cid)
            .map(|(_, option)| option)
    }

    /// Materialized ranking of an admitted opinion.
    pub fn ranking(&self, question_index: usize, opinion_cid: &str) -> Option<&[String]> {
        self.rankings
            .get(question_index)
            .and_then(|rankings| rankings.get(opinion_cid))
            .map(Vec::as_slice)
    }

    pub fn is_final(&self) -> bool {
        self.data.finalized
    }

    /// Bind this state to an issue and publish the genesis snapshot.
    pub async fn set_hivemind_issue(&mut self, issue_cid: &str) -> Result<String> {
        if let Some(current) = &self.data.hivemind_id {
            return Err(HivemindError::InvalidStateChain(format!(
                "state is already bound to issue {}",
                current
            )));
        }

        let issue_cid = cid::normalize(issue_cid);
        let issue = HivemindIssue::load(&self.cas, &issue_cid).await?;
        issue.validate()?;

        let questions = issue.questions.len();
        let mut next = self.data.clone();
        next.hivemind_id = Some(issue_cid.clone());
        next.opinion_cids = vec![BTreeMap::new(); questions];
        next.author = issue.author.clone().or_else(|| self.data.author.clone());

        // Genesis never links back to an unbound snapshot
        let unbound = self.cid.take();
        let state_cid = match self.commit(next).await {
            Ok(state_cid) => state_cid,
            Err(e) => {
                self.cid = unbound;
                return Err(e);
            }
        };
        self.issue = Some(issue);
        self.options.clear();
        self.opinions = vec![HashMap::new(); questions];
        self.rankings = vec![HashMap::new(); questions];

        info!(state_cid = %state_cid, hivemind_id = %issue_cid, questions, "Initialized state");
        Ok(state_cid)
    }

    /// Load a snapshot and rebuild the caches from the CAS.
    pub async fn load(cas: Cas, state_cid: &str) -> Result<Self> {
        let state_cid = cid::normalize(state_cid);
        let mut data: StateData = cas.get_json(&state_cid).await?;
        let mut state = Self::new(cas);

        if let Some(hivemind_id) = data.hivemind_id.clone() {
            let issue = HivemindIssue::load(&state.cas, &hivemind_id).await?;
            let questions = issue.questions.len();
            if data.opinion_cids.len() < questions {
                data.opinion_cids.resize(questions, BTreeMap::new());
            }

            let cas = &state.cas;
            let options =
                try_join_all(data.option_cids.iter().map(|c| HivemindOption::load(cas, c))).await?;
            state.options = data.option_cids.iter().cloned().zip(options).collect();

            let mut opinions = Vec::with_capacity(data.opinion_cids.len());
            for entries in &data.opinion_cids {
                let cids: Vec<&String> = entries.values().map(|e| &e.opinion_cid).collect();
                let loaded =
                    try_join_all(cids.iter().map(|c| HivemindOpinion::load(cas, c))).await?;
                opinions.push(cids.into_iter().cloned().zip(loaded).collect::<OpinionCache>());
            }
            state.opinions = opinions;
            state.issue = Some(issue);
        }

        state.data = data;
        state.cid = Some(state_cid.clone());
        state.rebuild_rankings();

        debug!(
            state_cid = %state_cid,
            options = state.options.len(),
            "Loaded state"
        );
        Ok(state)
    }

    /// CID of the current snapshot.
    ///
    /// Every mutation commits on its own, so this only returns the head. A
    /// state that is not bound to an issue has nothing to publish.
    pub async fn save(&mut self) -> Result<String> {
        if self.data.hivemind_id.is_none() {
            return Err(HivemindError::IssueNotSet);
        }
        if let Some(cid) = &self.cid {
            return Ok(cid.clone());
        }
        let next = self.data.clone();
        self.commit(next).await
    }

    /// Admit an option.
    ///
    /// Credentials are optional unless the issue restricts addresses or
    /// limits options per address. When given, the signature must cover
    /// `timestamp || option_cid`.
    pub async fn add_option(
        &mut self,
        timestamp: u64,
        option_cid: &str,
        address: Option<&str>,
        signature: Option<&str>,
    ) -> Result<String> {
        if self.data.finalized {
            return Err(HivemindError::Finalized);
        }
        let option_cid = cid::normalize(option_cid);
        let issue = self.issue()?.clone();
        let hivemind_id = self.hivemind_id().unwrap_or_default().to_string();
        let restrictions = issue.restrictions.clone().unwrap_or_default();

        let credentials = address.zip(signature);
        if restrictions.addresses.is_some() || restrictions.options_per_address.is_some() {
            let (address, _) = credentials.ok_or(HivemindError::MissingCredentials)?;
            if !restrictions.permits(address) {
                return Err(HivemindError::AddressNotPermitted(address.to_string()));
            }
        }

        if let Some((address, signature)) = credentials {
            let message = format!("{}{}", timestamp, option_cid);
            if !verify_message(address, &message, signature) {
                return Err(HivemindError::SignatureInvalid(address.to_string()));
            }
            self.data
                .check_signature_timestamp(address, &option_cid, timestamp)?;

            if let Some(limit) = restrictions.options_per_address {
                if self.data.options_signed_by(address) >= limit as usize {
                    return Err(HivemindError::OptionsPerAddressExceeded {
                        address: address.to_string(),
                        limit,
                    });
                }
            }
        }

        let option = HivemindOption::load(&self.cas, &option_cid).await?;
        if cid::normalize(&option.hivemind_id) != hivemind_id {
            return Err(HivemindError::InvalidOption(format!(
                "option belongs to issue {}, not {}",
                option.hivemind_id, hivemind_id
            )));
        }
        option
            .validate(&issue, &self.cas, self.address_lists.as_deref())
            .await?;

        if self.data.option_cids.contains(&option_cid) {
            return Err(HivemindError::DuplicateOption(option_cid));
        }

        let mut next = self.data.clone();
        if let Some((address, signature)) = credentials {
            next.add_signature(address, timestamp, &option_cid, signature)?;
        }
        next.option_cids.push(option_cid.clone());

        let state_cid = self.commit(next).await?;
        self.options.push((option_cid.clone(), option));
        self.refresh_auto_rankings();

        info!(
            state_cid = %state_cid,
            option_cid = %option_cid,
            address = address.unwrap_or("-"),
            "Added option"
        );
        Ok(state_cid)
    }

    /// Record an address's opinion on one question, replacing any earlier
    /// one from the same address.
    ///
    /// Returns `None` without touching the state once it is final.
    pub async fn add_opinion(
        &mut self,
        timestamp: u64,
        opinion_cid: &str,
        signature: &str,
        address: &str,
    ) -> Result<Option<String>> {
        if self.data.finalized {
            debug!(opinion_cid = %opinion_cid, "Ignoring opinion on finalized state");
            return Ok(None);
        }
        let opinion_cid = cid::normalize(opinion_cid);
        let issue = self.issue()?;
        let hivemind_id = self.hivemind_id().unwrap_or_default().to_string();

        let opinion = HivemindOpinion::load(&self.cas, &opinion_cid).await?;
        let message = format!("{}{}", timestamp, opinion_cid);
        if !verify_message(address, &message, signature) {
            return Err(HivemindError::SignatureInvalid(address.to_string()));
        }
        self.data
            .check_signature_timestamp(address, &opinion_cid, timestamp)?;

        if let Some(restrictions) = &issue.restrictions {
            if !restrictions.permits(address) {
                return Err(HivemindError::AddressNotPermitted(address.to_string()));
            }
        }

        if cid::normalize(&opinion.hivemind_id) != hivemind_id {
            return Err(HivemindError::InvalidOpinion(format!(
                "opinion belongs to issue {}, not {}",
                opinion.hivemind_id, hivemind_id
            )));
        }
        let question_index = opinion.question_index;
        if question_index >= issue.questions.len() {
            return Err(HivemindError::InvalidQuestion(question_index));
        }

        let ranking = opinion.ranking.resolve(&self.options)?;
        if let Some(unknown) = ranking
            .iter()
            .find(|cid| !self.data.option_cids.contains(cid))
        {
            return Err(HivemindError::InvalidOpinion(format!(
                "ranked option {} has not been added",
                unknown
            )));
        }

        let mut next = self.data.clone();
        next.add_signature(address, timestamp, &opinion_cid, signature)?;
        if next.opinion_cids.len() <= question_index {
            next.opinion_cids.resize(question_index + 1, BTreeMap::new());
        }
        let replaced = next.opinion_cids[question_index].insert(
            address.to_string(),
            OpinionEntry {
                opinion_cid: opinion_cid.clone(),
                timestamp,
            },
        );

        let state_cid = self.commit(next).await?;
        if self.opinions.len() <= question_index {
            self.opinions.resize(question_index + 1, HashMap::new());
            self.rankings.resize(question_index + 1, HashMap::new());
        }
        if let Some(replaced) = replaced {
            self.forget_opinion(question_index, &replaced.opinion_cid);
        }
        self.opinions[question_index].insert(opinion_cid.clone(), opinion);
        self.rankings[question_index].insert(opinion_cid.clone(), ranking);

        info!(
            state_cid = %state_cid,
            opinion_cid = %opinion_cid,
            address = %address,
            question_index,
            "Added opinion"
        );
        Ok(Some(state_cid))
    }

    /// Set the display name of a participant. The signature covers the
    /// name alone.
    ///
    /// Returns `None` when the name is already current.
    pub async fn update_participant_name(
        &mut self,
        timestamp: u64,
        name: &str,
        address: &str,
        signature: &str,
    ) -> Result<Option<String>> {
        if self.data.finalized {
            return Err(HivemindError::Finalized);
        }
        if self
            .data
            .participants
            .get(address)
            .is_some_and(|p| p.name == name)
        {
            return Ok(None);
        }
        if !verify_message(address, name, signature) {
            return Err(HivemindError::SignatureInvalid(address.to_string()));
        }

        let mut next = self.data.clone();
        next.add_signature(address, timestamp, name, signature)?;
        next.participants.insert(
            address.to_string(),
            Participant {
                name: name.to_string(),
            },
        );

        let state_cid = self.commit(next).await?;
        info!(state_cid = %state_cid, address = %address, name = %name, "Updated participant name");
        Ok(Some(state_cid))
    }

    /// Commit the current consensus of every question as a selection round
    /// and apply the issue's selection policy.
    ///
    /// When the state has an author, only the author may select, signing
    /// `timestamp || "select_consensus"`.
    pub async fn select_consensus(
        &mut self,
        timestamp: Option<u64>,
        address: Option<&str>,
        signature: Option<&str>,
    ) -> Result<String> {
        if self.data.finalized {
            return Err(HivemindError::Finalized);
        }

        let mut credentials = None;
        if let Some(author) = &self.data.author {
            let (Some(timestamp), Some(address), Some(signature)) = (timestamp, address, signature)
            else {
                return Err(HivemindError::MissingCredentials);
            };
            if address != author.as_str() {
                return Err(HivemindError::NotAuthorized(address.to_string()));
            }
            let message = format!("{}{}", timestamp, SELECT_CONSENSUS_MESSAGE);
            if !verify_message(address, &message, signature) {
                return Err(HivemindError::SignatureInvalid(address.to_string()));
            }
            credentials = Some((timestamp, address, signature));
        }

        let issue = self.issue()?;
        let questions = issue.questions.len();
        let on_selection = issue.on_selection;

        let mut selection = Vec::with_capacity(questions);
        for question_index in 0..questions {
            let results = self.calculate_results(question_index)?;
            let winner = results
                .winner()
                .ok_or(HivemindError::NoOptions(question_index))?;
            selection.push(winner.to_string());
        }

        let mut next = self.data.clone();
        if let Some((timestamp, address, signature)) = credentials {
            next.add_signature(address, timestamp, SELECT_CONSENSUS_MESSAGE, signature)?;
        }
        next.selected.push(selection.clone());
        match on_selection {
            Some(OnSelection::Finalize) => next.finalized = true,
            Some(OnSelection::Reset) => next.opinion_cids = vec![BTreeMap::new(); questions],
            Some(OnSelection::Exclude) | None => {}
        }

        let state_cid = self.commit(next).await?;
        if on_selection == Some(OnSelection::Reset) {
            self.opinions = vec![HashMap::new(); questions];
            self.rankings = vec![HashMap::new(); questions];
        }

        info!(
            state_cid = %state_cid,
            selection = ?selection,
            on_selection = ?on_selection,
            "Selected consensus"
        );
        Ok(state_cid)
    }

    /// Walk the chain from `state_cid` back to its genesis snapshot.
    ///
    /// Newest first.
    pub async fn history(cas: &Cas, state_cid: &str) -> Result<Vec<(String, StateData)>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(cid::normalize(state_cid));
        let mut hivemind_id: Option<Option<String>> = None;

        while let Some(current) = next {
            if !seen.insert(current.clone()) {
                return Err(HivemindError::InvalidStateChain(format!(
                    "cycle at {}",
                    current
                )));
            }
            let data: StateData = cas.get_json(&current).await?;
            match &hivemind_id {
                None => hivemind_id = Some(data.hivemind_id.clone()),
                Some(expected) if *expected != data.hivemind_id => {
                    return Err(HivemindError::InvalidStateChain(format!(
                        "{} belongs to a different issue",
                        current
                    )));
                }
                Some(_) => {}
            }
            next = data.previous_cid.as_deref().map(cid::normalize);
            chain.push((current, data));
        }

        Ok(chain)
    }

    pub(crate) fn restrictions(&self) -> Option<&Restrictions> {
        self.issue.as_ref().and_then(|i| i.restrictions.as_ref())
    }

    pub(crate) fn opinion_entries(&self, question_index: usize) -> Option<&QuestionOpinions> {
        self.data.opinion_cids.get(question_index)
    }

    async fn commit(&mut self, mut next: StateData) -> Result<String> {
        next.previous_cid = self.cid.clone();
        let state_cid = self.cas.put_json(&next).await?;
        self.data = next;
        self.cid = Some(state_cid.clone());
        Ok(state_cid)
    }

    fn forget_opinion(&mut self, question_index: usize, opinion_cid: &str) {
        let still_used = self.data.opinion_cids[question_index]
            .values()
            .any(|entry| entry.opinion_cid == opinion_cid);
        if !still_used {
            self.opinions[question_index].remove(opinion_cid);
            self.rankings[question_index].remove(opinion_cid);
        }
    }

    fn rebuild_rankings(&mut self) {
        self.rankings = self
            .opinions
            .iter()
            .map(|opinions| {
                opinions
                    .iter()
                    .map(|(opinion_cid, opinion)| {
                        let ranking = opinion.ranking.resolve(&self.options).unwrap_or_else(|e| {
                            warn!(opinion_cid = %opinion_cid, error = %e, "Could not resolve ranking");
                            Vec::new()
                        });
                        (opinion_cid.clone(), ranking)
                    })
                    .collect()
            })
            .collect();
    }

    /// Auto rankings depend on the option set.
    fn refresh_auto_rankings(&mut self) {
        for (question_index, opinions) in self.opinions.iter().enumerate() {
            for (opinion_cid, opinion) in opinions.iter().filter(|(_, o)| o.ranking.is_auto()) {
                match opinion.ranking.resolve(&self.options) {
                    Ok(ranking) => {
                        self.rankings[question_index].insert(opinion_cid.clone(), ranking);
                    }
                    Err(e) => {
                        warn!(opinion_cid = %opinion_cid, error = %e, "Could not refresh ranking")
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for HivemindState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HivemindState")
            .field("cid", &self.cid)
            .field("data", &self.data)
            .field("options", &self.options.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, Network};
    use crate::ranking::Ranking;
    use serde_json::json;

    fn keypair(n: u8) -> (KeyPair, String) {
        let keys = KeyPair::from_secret_bytes(&[n; 32]).unwrap();
        let address = keys.address(Network::Mainnet);
        (keys, address)
    }

    async fn color_state(cas: &Cas) -> (HivemindState, String) {
        let mut issue = HivemindIssue::new("Colors");
        issue.add_question("Which color?").unwrap();
        let issue_cid = issue.save(cas).await.unwrap();

        let mut state = HivemindState::new(cas.clone());
        state.set_hivemind_issue(&issue_cid).await.unwrap();
        (state, issue_cid)
    }

    async fn publish_option(cas: &Cas, issue_cid: &str, value: serde_json::Value) -> String {
        HivemindOption::new(issue_cid, value, "")
            .save(cas)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_genesis() {
        let cas = Cas::memory();
        let (state, issue_cid) = color_state(&cas).await;

        assert_eq!(state.hivemind_id(), Some(issue_cid.as_str()));
        assert_eq!(state.data().opinion_cids.len(), 1);
        assert!(state.data().previous_cid.is_none());
        assert!(state.cid().is_some());
    }

    #[tokio::test]
    async fn test_state_cannot_be_rebound() {
        let cas = Cas::memory();
        let (mut state, issue_cid) = color_state(&cas).await;
        assert!(matches!(
            state.set_hivemind_issue(&issue_cid).await,
            Err(HivemindError::InvalidStateChain(_))
        ));
    }

    #[tokio::test]
    async fn test_unbound_state_is_not_published() {
        let cas = Cas::memory();
        let mut issue = HivemindIssue::new("Colors");
        issue.add_question("Which color?").unwrap();
        let issue_cid = issue.save(&cas).await.unwrap();

        let mut state = HivemindState::new(cas.clone());
        assert!(matches!(state.save().await, Err(HivemindError::IssueNotSet)));
        assert!(state.cid().is_none());

        let genesis = state.set_hivemind_issue(&issue_cid).await.unwrap();
        assert_eq!(state.save().await.unwrap(), genesis);
        let chain = HivemindState::history(&cas, &genesis).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert!(chain[0].1.previous_cid.is_none());
    }

    #[tokio::test]
    async fn test_genesis_does_not_link_unbound_snapshot() {
        let cas = Cas::memory();
        let mut issue = HivemindIssue::new("Colors");
        issue.add_question("Which color?").unwrap();
        let issue_cid = issue.save(&cas).await.unwrap();

        let unbound = cas.put_json(&StateData::default()).await.unwrap();
        let mut state = HivemindState::load(cas.clone(), &unbound).await.unwrap();
        let genesis = state.set_hivemind_issue(&issue_cid).await.unwrap();

        assert!(state.data().previous_cid.is_none());
        let chain = HivemindState::history(&cas, &genesis).await.unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn test_author_set_at_init() {
        let cas = Cas::memory();
        let (author_keys, author) = keypair(1);
        let (_, other) = keypair(2);
        let mut issue = HivemindIssue::new("Colors");
        issue.add_question("Which color?").unwrap();
        let issue_cid = issue.save(&cas).await.unwrap();

        assert!(HivemindState::new(cas.clone()).with_author("garbage").is_err());

        let mut state = HivemindState::new(cas.clone()).with_author(author.clone()).unwrap();
        state.set_hivemind_issue(&issue_cid).await.unwrap();
        assert_eq!(state.data().author.as_deref(), Some(author.as_str()));

        let option = publish_option(&cas, &issue_cid, json!("Blue")).await;
        state.add_option(1, &option, None, None).await.unwrap();
        assert!(matches!(
            state.select_consensus(None, None, None).await,
            Err(HivemindError::MissingCredentials)
        ));
        let signature = author_keys.sign("4select_consensus");
        assert!(matches!(
            state.select_consensus(Some(4), Some(&other), Some(&signature)).await,
            Err(HivemindError::NotAuthorized(_))
        ));
        state
            .select_consensus(Some(4), Some(&author), Some(&signature))
            .await
            .unwrap();

        // The issue's own author wins over the one given at init
        let mut authored = HivemindIssue::new("Authored");
        authored.add_question("q?").unwrap();
        authored.set_author(other.clone()).unwrap();
        let authored_cid = authored.save(&cas).await.unwrap();
        let mut state = HivemindState::new(cas.clone()).with_author(author).unwrap();
        state.set_hivemind_issue(&authored_cid).await.unwrap();
        assert_eq!(state.data().author.as_deref(), Some(other.as_str()));
    }

    #[tokio::test]
    async fn test_add_option_chains_snapshots() {
        let cas = Cas::memory();
        let (mut state, issue_cid) = color_state(&cas).await;
        let genesis = state.cid().unwrap().to_string();

        let blue = publish_option(&cas, &issue_cid, json!("Blue")).await;
        let next = state
            .add_option(1, &format!("/ipfs/{}", blue), None, None)
            .await
            .unwrap();

        assert_eq!(state.data().option_cids, vec![blue.clone()]);
        assert_eq!(state.data().previous_cid.as_deref(), Some(genesis.as_str()));
        assert_eq!(state.cid(), Some(next.as_str()));
        assert!(state.option(&blue).is_some());
    }

    #[tokio::test]
    async fn test_failed_admission_leaves_state_untouched() {
        let cas = Cas::memory();
        let (mut state, issue_cid) = color_state(&cas).await;
        let blue = publish_option(&cas, &issue_cid, json!("Blue")).await;
        state.add_option(1, &blue, None, None).await.unwrap();
        let before = state.data().clone();
        let before_cid = state.cid().map(str::to_string);

        assert!(matches!(
            state.add_option(2, &blue, None, None).await,
            Err(HivemindError::DuplicateOption(_))
        ));
        let foreign = publish_option(&cas, "bafyother", json!("Red")).await;
        assert!(matches!(
            state.add_option(3, &foreign, None, None).await,
            Err(HivemindError::InvalidOption(_))
        ));

        assert_eq!(state.data(), &before);
        assert_eq!(state.cid().map(str::to_string), before_cid);
    }

    #[tokio::test]
    async fn test_opinion_replaces_earlier_one() {
        let cas = Cas::memory();
        let (mut state, issue_cid) = color_state(&cas).await;
        let blue = publish_option(&cas, &issue_cid, json!("Blue")).await;
        let red = publish_option(&cas, &issue_cid, json!("Red")).await;
        state.add_option(1, &blue, None, None).await.unwrap();
        state.add_option(1, &red, None, None).await.unwrap();

        let (keys, address) = keypair(7);
        let first = HivemindOpinion::new(&issue_cid, 0, Ranking::Fixed(vec![blue.clone(), red.clone()]))
            .save(&cas)
            .await
            .unwrap();
        let signature = keys.sign(&format!("10{}", first));
        state.add_opinion(10, &first, &signature, &address).await.unwrap();

        let second = HivemindOpinion::new(&issue_cid, 0, Ranking::Fixed(vec![red.clone()]))
            .save(&cas)
            .await
            .unwrap();
        let signature = keys.sign(&format!("11{}", second));
        state.add_opinion(11, &second, &signature, &address).await.unwrap();

        let entry = &state.data().opinion_cids[0][&address];
        assert_eq!(entry.opinion_cid, second);
        assert_eq!(entry.timestamp, 11);
        assert!(state.ranking(0, &first).is_none());
        assert_eq!(state.ranking(0, &second), Some(&[red][..]));
    }

    #[tokio::test]
    async fn test_opinion_with_unknown_option_is_rejected() {
        let cas = Cas::memory();
        let (mut state, issue_cid) = color_state(&cas).await;
        let (keys, address) = keypair(3);

        let opinion = HivemindOpinion::new(&issue_cid, 0, Ranking::Fixed(vec!["bafynope".to_string()]))
            .save(&cas)
            .await
            .unwrap();
        let signature = keys.sign(&format!("5{}", opinion));
        assert!(matches!(
            state.add_opinion(5, &opinion, &signature, &address).await,
            Err(HivemindError::InvalidOpinion(_))
        ));

        let bad_signature = keys.sign("something else");
        assert!(matches!(
            state.add_opinion(5, &opinion, &bad_signature, &address).await,
            Err(HivemindError::SignatureInvalid(_))
        ));

        let out_of_range = HivemindOpinion::new(&issue_cid, 4, Ranking::Fixed(vec![]))
            .save(&cas)
            .await
            .unwrap();
        let signature = keys.sign(&format!("6{}", out_of_range));
        assert!(matches!(
            state.add_opinion(6, &out_of_range, &signature, &address).await,
            Err(HivemindError::InvalidQuestion(4))
        ));
    }

    #[tokio::test]
    async fn test_participant_name() {
        let cas = Cas::memory();
        let (mut state, _) = color_state(&cas).await;
        let (keys, address) = keypair(9);

        let signature = keys.sign("alice");
        assert!(state
            .update_participant_name(100, "alice", &address, &signature)
            .await
            .unwrap()
            .is_some());
        assert_eq!(state.data().participants[&address].name, "alice");

        // Same name again is a no-op
        let cid = state.cid().map(str::to_string);
        assert!(state
            .update_participant_name(101, "alice", &address, &signature)
            .await
            .unwrap()
            .is_none());
        assert_eq!(state.cid().map(str::to_string), cid);

        let forged = keys.sign("bob");
        assert!(matches!(
            state.update_participant_name(102, "mallory", &address, &forged).await,
            Err(HivemindError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_select_requires_author() {
        let cas = Cas::memory();
        let (author_keys, author) = keypair(1);
        let (other_keys, other) = keypair(2);

        let mut issue = HivemindIssue::new("Authored");
        issue.add_question("q?").unwrap();
        issue.set_author(author.clone()).unwrap();
        let issue_cid = issue.save(&cas).await.unwrap();

        let mut state = HivemindState::new(cas.clone());
        state.set_hivemind_issue(&issue_cid).await.unwrap();
        assert_eq!(state.data().author.as_deref(), Some(author.as_str()));
        let option = publish_option(&cas, &issue_cid, json!("only")).await;
        state.add_option(1, &option, None, None).await.unwrap();

        assert!(matches!(
            state.select_consensus(None, None, None).await,
            Err(HivemindError::MissingCredentials)
        ));
        let signature = other_keys.sign("5select_consensus");
        assert!(matches!(
            state.select_consensus(Some(5), Some(&other), Some(&signature)).await,
            Err(HivemindError::NotAuthorized(_))
        ));
        let signature = author_keys.sign("6select_consensus");
        assert!(matches!(
            state.select_consensus(Some(5), Some(&author), Some(&signature)).await,
            Err(HivemindError::SignatureInvalid(_))
        ));

        state
            .select_consensus(Some(6), Some(&author), Some(&signature))
            .await
            .unwrap();
        assert_eq!(state.data().selected, vec![vec![option]]);
        assert_eq!(state.data().last_signed(&author, SELECT_CONSENSUS_MESSAGE), Some(6));
    }

    #[tokio::test]
    async fn test_select_without_options() {
        let cas = Cas::memory();
        let (mut state, _) = color_state(&cas).await;
        assert!(matches!(
            state.select_consensus(None, None, None).await,
            Err(HivemindError::NoOptions(0))
        ));
    }

    #[tokio::test]
    async fn test_load_rebuilds_caches() {
        let cas = Cas::memory();
        let (mut state, issue_cid) = color_state(&cas).await;
        let blue = publish_option(&cas, &issue_cid, json!("Blue")).await;
        let red = publish_option(&cas, &issue_cid, json!("Red")).await;
        state.add_option(1, &blue, None, None).await.unwrap();
        state.add_option(2, &red, None, None).await.unwrap();

        let (keys, address) = keypair(4);
        let opinion = HivemindOpinion::new(&issue_cid, 0, Ranking::Fixed(vec![red.clone(), blue.clone()]))
            .save(&cas)
            .await
            .unwrap();
        let signature = keys.sign(&format!("3{}", opinion));
        let state_cid = state
            .add_opinion(3, &opinion, &signature, &address)
            .await
            .unwrap()
            .unwrap();

        let loaded = HivemindState::load(cas.clone(), &format!("/ipfs/{}", state_cid))
            .await
            .unwrap();
        assert_eq!(loaded.cid(), Some(state_cid.as_str()));
        assert_eq!(loaded.data(), state.data());
        assert_eq!(loaded.options().len(), 2);
        assert_eq!(loaded.ranking(0, &opinion), Some(&[red, blue][..]));
        assert_eq!(loaded.issue().unwrap().name, "Colors");
    }

    #[tokio::test]
    async fn test_history_walks_to_genesis() {
        let cas = Cas::memory();
        let (mut state, issue_cid) = color_state(&cas).await;
        let genesis = state.cid().unwrap().to_string();
        let blue = publish_option(&cas, &issue_cid, json!("Blue")).await;
        let head = state.add_option(1, &blue, None, None).await.unwrap();

        let chain = HivemindState::history(&cas, &head).await.unwrap();
        let cids: Vec<&str> = chain.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(cids, vec![head.as_str(), genesis.as_str()]);
    }

    #[tokio::test]
    async fn test_history_rejects_foreign_issue() {
        let cas = Cas::memory();
        let foreign = StateData {
            hivemind_id: Some("bafyother".to_string()),
            ..Default::default()
        };
        let foreign_cid = cas.put_json(&foreign).await.unwrap();
        let head = StateData {
            hivemind_id: Some("bafyissue".to_string()),
            previous_cid: Some(foreign_cid),
            ..Default::default()
        };
        let head_cid = cas.put_json(&head).await.unwrap();

        assert!(matches!(
            HivemindState::history(&cas, &head_cid).await,
            Err(HivemindError::InvalidStateChain(_))
        ));
    }
}
