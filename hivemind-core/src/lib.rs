//! Hivemind Core
//!
//! A content-addressed Condorcet voting protocol. Issues, options, opinions
//! and state snapshots are JSON objects in a content-addressed store; each
//! state snapshot links to its predecessor, forming an append-only chain.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                HivemindState                │
//! │  admission │ tally │ contributions │ select │
//! └──────┬──────────────┬───────────────┬───────┘
//!        │              │               │
//!   ┌────▼────┐   ┌─────▼─────┐   ┌─────▼─────┐
//!   │  Issue  │   │  Option   │   │  Opinion  │
//!   │         │   │ validation│   │  Ranking  │
//!   └────┬────┘   └─────┬─────┘   └─────┬─────┘
//!        └──────────────┼───────────────┘
//!                 ┌─────▼─────┐   ┌───────────┐
//!                 │    Cas    │   │  crypto   │
//!                 │ mem / file│   │ secp256k1 │
//!                 └───────────┘   └───────────┘
//! ```
//!
//! Participants authenticate with Bitcoin message signatures; every signed
//! message carries a timestamp that must increase per address and message.

pub mod cas;
pub mod cid;
pub mod config;
pub mod crypto;
pub mod error;
pub mod issue;
pub mod opinion;
pub mod option;
pub mod ranking;
pub mod state;

pub use cas::{Cas, ContentStore};
pub use config::HivemindConfig;
pub use error::{HivemindError, Result};
pub use issue::{AnswerType, HivemindIssue, OnSelection, Restrictions};
pub use opinion::HivemindOpinion;
pub use option::{AddressListKind, AddressListSource, HivemindOption, StaticAddressLists};
pub use ranking::Ranking;
pub use state::{HivemindState, OptionScore, StateData, TallyResults};
