//! Subcommands of the `hivemind` client.
//!
//! Every command prints a JSON document on stdout.

use anyhow::{anyhow, bail, Context};
use clap::{Args, Subcommand};
use rand::RngCore;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

use hivemind_core::crypto::{verify_message, AddressKind, KeyPair, Network};
use hivemind_core::state::SELECT_CONSENSUS_MESSAGE;
use hivemind_core::{Cas, HivemindIssue, HivemindOpinion, HivemindOption, HivemindState, Ranking};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a new secp256k1 key
    Keygen {
        #[command(flatten)]
        signer: AddressFormat,
    },

    /// Show the address of a secret key
    Address {
        #[arg(long, env = "HIVEMIND_SECRET", hide_env_values = true)]
        secret: String,
        #[command(flatten)]
        signer: AddressFormat,
    },

    /// Sign a message
    Sign {
        #[arg(long, env = "HIVEMIND_SECRET", hide_env_values = true)]
        secret: String,
        #[arg(short, long)]
        message: String,
        #[command(flatten)]
        signer: AddressFormat,
    },

    /// Verify a signed message
    Verify {
        #[arg(short, long)]
        address: String,
        #[arg(short, long)]
        message: String,
        #[arg(short, long)]
        signature: String,
    },

    /// Issue operations
    #[command(subcommand)]
    Issue(IssueCommand),

    /// State operations
    #[command(subcommand)]
    State(StateCommand),

    /// Option operations
    #[command(subcommand, name = "option")]
    Candidate(OptionCommand),

    /// Opinion operations
    #[command(subcommand)]
    Opinion(OpinionCommand),

    /// Tally one question of a state
    Results {
        #[arg(long)]
        state: String,
        #[arg(short, long, default_value = "0")]
        question: usize,
    },

    /// Select the current consensus
    Select {
        #[arg(long)]
        state: String,
        #[arg(long, env = "HIVEMIND_SECRET", hide_env_values = true)]
        secret: Option<String>,
        #[arg(long)]
        timestamp: Option<u64>,
        #[command(flatten)]
        signer: AddressFormat,
    },

    /// List the snapshots of a state chain, newest first
    History { cid: String },

    /// Set your participant name
    Name {
        #[arg(long)]
        state: String,
        #[arg(short, long)]
        name: String,
        #[arg(long, env = "HIVEMIND_SECRET", hide_env_values = true)]
        secret: String,
        #[arg(long)]
        timestamp: Option<u64>,
        #[command(flatten)]
        signer: AddressFormat,
    },
}

#[derive(Debug, Subcommand)]
pub enum IssueCommand {
    /// Validate and publish an issue from a JSON file
    Publish { file: PathBuf },
}

#[derive(Debug, Subcommand)]
pub enum StateCommand {
    /// Create the genesis state of an issue
    Init {
        #[arg(long)]
        issue: String,
        /// Author allowed to select consensus when the issue names none
        #[arg(long)]
        author: Option<String>,
    },
    /// Print a state snapshot
    Show { cid: String },
}

#[derive(Debug, Subcommand)]
pub enum OptionCommand {
    /// Publish an option and add it to a state
    Add {
        #[arg(long)]
        state: String,
        /// Option value as JSON, e.g. '"Blue"' or 42
        value: String,
        #[arg(long, default_value = "")]
        text: String,
        #[arg(long, env = "HIVEMIND_SECRET", hide_env_values = true)]
        secret: Option<String>,
        #[arg(long)]
        timestamp: Option<u64>,
        #[command(flatten)]
        signer: AddressFormat,
    },
}

#[derive(Debug, Subcommand)]
pub enum OpinionCommand {
    /// Publish an opinion and add it to a state
    Add {
        #[arg(long)]
        state: String,
        /// Ranking as JSON, e.g. '{"fixed": ["bafy..."]}'
        ranking: String,
        #[arg(short, long, default_value = "0")]
        question: usize,
        #[arg(long, env = "HIVEMIND_SECRET", hide_env_values = true)]
        secret: String,
        #[arg(long)]
        timestamp: Option<u64>,
        #[command(flatten)]
        signer: AddressFormat,
    },
}

/// Network and script type of the address a key signs as.
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct AddressFormat {
    #[arg(long)]
    testnet: bool,
    /// Use a native segwit (bech32) address
    #[arg(long)]
    segwit: bool,
}

impl AddressFormat {
    fn address(&self, keys: &KeyPair) -> String {
        let kind = if self.segwit {
            AddressKind::P2wpkh
        } else {
            AddressKind::P2pkh
        };
        keys.address_of_kind(kind, network(self.testnet))
    }
}

fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn network(testnet: bool) -> Network {
    if testnet {
        Network::Testnet
    } else {
        Network::Mainnet
    }
}

fn keypair(secret: &str) -> anyhow::Result<KeyPair> {
    KeyPair::from_secret_hex(secret).ok_or_else(|| anyhow!("secret must be 32 bytes of hex"))
}

fn bound_issue(state: &HivemindState) -> anyhow::Result<String> {
    state
        .hivemind_id()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("state is not bound to an issue"))
}

pub async fn execute(command: Command, cas: &Cas) -> anyhow::Result<Value> {
    match command {
        Command::Keygen { signer } => {
            let mut rng = rand::thread_rng();
            let keys = loop {
                let mut secret = [0u8; 32];
                rng.fill_bytes(&mut secret);
                if let Some(keys) = KeyPair::from_secret_bytes(&secret) {
                    break keys;
                }
            };
            Ok(json!({
                "secret": keys.secret_hex(),
                "address": signer.address(&keys),
            }))
        }

        Command::Address { secret, signer } => {
            let keys = keypair(&secret)?;
            Ok(json!({ "address": signer.address(&keys) }))
        }

        Command::Sign {
            secret,
            message,
            signer,
        } => {
            let keys = keypair(&secret)?;
            Ok(json!({
                "address": signer.address(&keys),
                "message": message,
                "signature": keys.sign(&message),
            }))
        }

        Command::Verify {
            address,
            message,
            signature,
        } => Ok(json!({ "valid": verify_message(&address, &message, &signature) })),

        Command::Issue(IssueCommand::Publish { file }) => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let issue: HivemindIssue = serde_json::from_str(&content)?;
            let cid = issue.save(cas).await?;
            Ok(json!({ "cid": cid }))
        }

        Command::State(StateCommand::Init { issue, author }) => {
            let mut state = HivemindState::new(cas.clone());
            if let Some(author) = author {
                state = state.with_author(author)?;
            }
            let cid = state.set_hivemind_issue(&issue).await?;
            Ok(json!({ "cid": cid }))
        }

        Command::State(StateCommand::Show { cid }) => {
            let state = HivemindState::load(cas.clone(), &cid).await?;
            Ok(serde_json::to_value(state.data())?)
        }

        Command::Candidate(OptionCommand::Add {
            state,
            value,
            text,
            secret,
            timestamp,
            signer,
        }) => {
            let mut state = HivemindState::load(cas.clone(), &state).await?;
            let value: Value = serde_json::from_str(&value).context("option value is not JSON")?;
            let option_cid = HivemindOption::new(bound_issue(&state)?, value, text)
                .save(cas)
                .await?;

            let timestamp = timestamp.unwrap_or_else(now);
            let credentials = match secret {
                Some(secret) => {
                    let keys = keypair(&secret)?;
                    let signature = keys.sign(&format!("{}{}", timestamp, option_cid));
                    Some((signer.address(&keys), signature))
                }
                None => None,
            };
            let state_cid = state
                .add_option(
                    timestamp,
                    &option_cid,
                    credentials.as_ref().map(|(a, _)| a.as_str()),
                    credentials.as_ref().map(|(_, s)| s.as_str()),
                )
                .await?;
            Ok(json!({ "option_cid": option_cid, "state_cid": state_cid }))
        }

        Command::Opinion(OpinionCommand::Add {
            state,
            ranking,
            question,
            secret,
            timestamp,
            signer,
        }) => {
            let mut state = HivemindState::load(cas.clone(), &state).await?;
            let ranking: Ranking = serde_json::from_str(&ranking).context("ranking is not valid")?;
            let opinion_cid = HivemindOpinion::new(bound_issue(&state)?, question, ranking)
                .save(cas)
                .await?;

            let keys = keypair(&secret)?;
            let address = signer.address(&keys);
            let timestamp = timestamp.unwrap_or_else(now);
            let signature = keys.sign(&format!("{}{}", timestamp, opinion_cid));
            let state_cid = state
                .add_opinion(timestamp, &opinion_cid, &signature, &address)
                .await?;
            if state_cid.is_none() {
                info!("State is final, opinion ignored");
            }
            Ok(json!({ "opinion_cid": opinion_cid, "state_cid": state_cid }))
        }

        Command::Results { state, question } => {
            let state = HivemindState::load(cas.clone(), &state).await?;
            let results = state.calculate_results(question)?;
            let scores: Vec<Value> = results
                .ranked()
                .into_iter()
                .map(|(cid, score)| {
                    json!({
                        "option_cid": cid,
                        "value": state.option(cid).map(|o| o.value.clone()),
                        "win": score.win,
                        "loss": score.loss,
                        "unknown": score.unknown,
                        "score": score.score,
                    })
                })
                .collect();
            Ok(json!({
                "question": state.issue()?.questions.get(question),
                "results": scores,
                "consensus": state.consensus(question)?,
                "contributions": state.contributions(question)?,
            }))
        }

        Command::Select {
            state,
            secret,
            timestamp,
            signer,
        } => {
            let mut state = HivemindState::load(cas.clone(), &state).await?;
            let state_cid = match secret {
                Some(secret) => {
                    let keys = keypair(&secret)?;
                    let timestamp = timestamp.unwrap_or_else(now);
                    let signature =
                        keys.sign(&format!("{}{}", timestamp, SELECT_CONSENSUS_MESSAGE));
                    let address = signer.address(&keys);
                    state
                        .select_consensus(Some(timestamp), Some(&address), Some(&signature))
                        .await?
                }
                None => state.select_consensus(None, None, None).await?,
            };
            Ok(json!({
                "state_cid": state_cid,
                "selected": state.data().selected.last(),
                "final": state.is_final(),
            }))
        }

        Command::History { cid } => {
            let chain = HivemindState::history(cas, &cid).await?;
            let snapshots: Vec<Value> = chain
                .iter()
                .map(|(cid, data)| {
                    json!({
                        "cid": cid,
                        "options": data.option_cids.len(),
                        "opinions": data.opinion_cids.iter().map(|q| q.len()).sum::<usize>(),
                        "selections": data.selected.len(),
                        "final": data.finalized,
                    })
                })
                .collect();
            Ok(Value::Array(snapshots))
        }

        Command::Name {
            state,
            name,
            secret,
            timestamp,
            signer,
        } => {
            if name.trim().is_empty() {
                bail!("name must not be empty");
            }
            let mut state = HivemindState::load(cas.clone(), &state).await?;
            let keys = keypair(&secret)?;
            let address = signer.address(&keys);
            let signature = keys.sign(&name);
            let state_cid = state
                .update_participant_name(timestamp.unwrap_or_else(now), &name, &address, &signature)
                .await?;
            Ok(json!({ "address": address, "state_cid": state_cid }))
        }
    }
}
