mod rest;

pub use rest::{NoSigner, RestGateway, RestGatewayConfig, TransactionSigner};

use std::fmt::Display;

use crate::*;

/// Name of the ledger module holding the poll contract.
pub const LEDGER_MODULE: &str = "voting";

/// Abort codes raised by the poll contract. The REST gateway recovers
/// these from the node's `vm_status` string; see [AbortReason::from_code].
pub mod abort {
    pub const NOT_INITIALIZED: u64 = 1;
    pub const ALREADY_INITIALIZED: u64 = 2;
    pub const POLL_NOT_FOUND: u64 = 3;
    pub const POLL_CLOSED: u64 = 4;
    pub const ALREADY_VOTED: u64 = 5;
    pub const INVALID_OPTION: u64 = 6;
    pub const NOT_CREATOR: u64 = 7;
    pub const ALREADY_CLAIMED: u64 = 8;
    pub const BAD_TIME_RANGE: u64 = 9;
}

/// A contract rejection, classified from its abort code at the gateway
/// boundary so callers never pattern-match on free-text node messages.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AbortReason {
    NotInitialized,
    AlreadyInitialized,
    PollNotFound,
    PollClosed,
    AlreadyVoted,
    InvalidOption,
    NotCreator,
    AlreadyClaimed,
    BadTimeRange,
    Other(u64),
}

impl AbortReason {
    pub fn from_code(code: u64) -> Self {
        match code {
            abort::NOT_INITIALIZED => Self::NotInitialized,
            abort::ALREADY_INITIALIZED => Self::AlreadyInitialized,
            abort::POLL_NOT_FOUND => Self::PollNotFound,
            abort::POLL_CLOSED => Self::PollClosed,
            abort::ALREADY_VOTED => Self::AlreadyVoted,
            abort::INVALID_OPTION => Self::InvalidOption,
            abort::NOT_CREATOR => Self::NotCreator,
            abort::ALREADY_CLAIMED => Self::AlreadyClaimed,
            abort::BAD_TIME_RANGE => Self::BadTimeRange,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u64 {
        match self {
            Self::NotInitialized => abort::NOT_INITIALIZED,
            Self::AlreadyInitialized => abort::ALREADY_INITIALIZED,
            Self::PollNotFound => abort::POLL_NOT_FOUND,
            Self::PollClosed => abort::POLL_CLOSED,
            Self::AlreadyVoted => abort::ALREADY_VOTED,
            Self::InvalidOption => abort::INVALID_OPTION,
            Self::NotCreator => abort::NOT_CREATOR,
            Self::AlreadyClaimed => abort::ALREADY_CLAIMED,
            Self::BadTimeRange => abort::BAD_TIME_RANGE,
            Self::Other(code) => *code,
        }
    }
}

impl Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "poll store not initialized"),
            Self::AlreadyInitialized => write!(f, "poll store already initialized"),
            Self::PollNotFound => write!(f, "poll not found"),
            Self::PollClosed => write!(f, "poll is closed"),
            Self::AlreadyVoted => write!(f, "account already voted"),
            Self::InvalidOption => write!(f, "option index out of range"),
            Self::NotCreator => write!(f, "caller is not the poll creator"),
            Self::AlreadyClaimed => write!(f, "certificate already claimed"),
            Self::BadTimeRange => write!(f, "invalid time range"),
            Self::Other(code) => write!(f, "abort code {code}"),
        }
    }
}

/// Failures at the gateway boundary.
///
/// [GatewayError::ConfirmationTimeout] means "outcome unknown": the call
/// may or may not have applied, and the only safe recovery is re-reading
/// ledger state. It is never produced for a definite rejection.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("ledger rejected the call: {0}")]
    Rejected(AbortReason),
    #[error("submission failed: {message}")]
    Submission { message: String },
    #[error("timed out waiting for confirmation")]
    ConfirmationTimeout,
    #[error("transport failure: {message}")]
    Transport { message: String },
}

impl GatewayError {
    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Handle for a submitted transaction, opaque to the core.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TxHandle(pub String);

impl Display for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A state-changing entry function of the poll contract.
///
/// Integer arguments are rendered as JSON strings, matching the node's
/// wire convention for 64-bit values.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EntryCall {
    Init,
    CreatePoll {
        title: String,
        description: String,
        options: Vec<String>,
        start_secs: u64,
        end_secs: u64,
    },
    CastVote {
        owner: Address,
        poll_id: PollId,
        option_index: u16,
    },
    ClosePoll {
        poll_id: PollId,
    },
    ExtendPoll {
        poll_id: PollId,
        new_end_secs: u64,
    },
    SubmitFeedback {
        owner: Address,
        poll_id: PollId,
        text: String,
    },
    IssueNftCertificate {
        owner: Address,
        poll_id: PollId,
    },
}

impl EntryCall {
    pub fn function(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::CreatePoll { .. } => "create_poll",
            Self::CastVote { .. } => "cast_vote",
            Self::ClosePoll { .. } => "close_poll",
            Self::ExtendPoll { .. } => "extend_poll",
            Self::SubmitFeedback { .. } => "submit_feedback",
            Self::IssueNftCertificate { .. } => "issue_nft_certificate",
        }
    }

    pub fn arguments(&self) -> Vec<serde_json::Value> {
        match self {
            Self::Init => vec![],
            Self::CreatePoll {
                title,
                description,
                options,
                start_secs,
                end_secs,
            } => vec![
                title.as_str().into(),
                description.as_str().into(),
                options.as_slice().into(),
                start_secs.to_string().into(),
                end_secs.to_string().into(),
            ],
            Self::CastVote {
                owner,
                poll_id,
                option_index,
            } => vec![
                owner.as_str().into(),
                poll_id.to_string().into(),
                option_index.to_string().into(),
            ],
            Self::ClosePoll { poll_id } => vec![poll_id.to_string().into()],
            Self::ExtendPoll {
                poll_id,
                new_end_secs,
            } => vec![poll_id.to_string().into(), new_end_secs.to_string().into()],
            Self::SubmitFeedback {
                owner,
                poll_id,
                text,
            } => vec![
                owner.as_str().into(),
                poll_id.to_string().into(),
                text.as_str().into(),
            ],
            Self::IssueNftCertificate { owner, poll_id } => {
                vec![owner.as_str().into(), poll_id.to_string().into()]
            }
        }
    }
}

/// A read-only view function of the poll contract.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ViewQuery {
    PollInfo {
        owner: Address,
        poll_id: PollId,
    },
    Results {
        owner: Address,
        poll_id: PollId,
    },
    HasVoted {
        owner: Address,
        poll_id: PollId,
        voter: Address,
    },
    VoterChoice {
        owner: Address,
        poll_id: PollId,
        voter: Address,
    },
    PollCount {
        owner: Address,
    },
    PollIds {
        owner: Address,
    },
    Feedbacks {
        owner: Address,
        poll_id: PollId,
    },
}

impl ViewQuery {
    pub fn function(&self) -> &'static str {
        match self {
            Self::PollInfo { .. } => "get_poll_info",
            Self::Results { .. } => "get_results",
            Self::HasVoted { .. } => "has_voted",
            Self::VoterChoice { .. } => "get_vote",
            Self::PollCount { .. } => "get_all_polls_count",
            Self::PollIds { .. } => "get_poll_ids",
            Self::Feedbacks { .. } => "get_feedbacks",
        }
    }

    pub fn arguments(&self) -> Vec<serde_json::Value> {
        match self {
            Self::PollInfo { owner, poll_id }
            | Self::Results { owner, poll_id }
            | Self::Feedbacks { owner, poll_id } => {
                vec![owner.as_str().into(), poll_id.to_string().into()]
            }
            Self::HasVoted {
                owner,
                poll_id,
                voter,
            }
            | Self::VoterChoice {
                owner,
                poll_id,
                voter,
            } => vec![
                owner.as_str().into(),
                poll_id.to_string().into(),
                voter.as_str().into(),
            ],
            Self::PollCount { owner } | Self::PollIds { owner } => {
                vec![owner.as_str().into()]
            }
        }
    }
}

/// Selects a slice of a creator's `poll_created` event stream.
///
/// Events are returned in sequence order. With `start: None` the gateway
/// returns the latest `limit` events, which is how the coordinator
/// recovers a freshly assigned poll id after confirmation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EventRange {
    pub start: Option<u64>,
    pub limit: u64,
}

impl EventRange {
    pub fn latest(limit: u64) -> Self {
        EventRange { start: None, limit }
    }

    pub fn starting_at(start: u64, limit: u64) -> Self {
        EventRange {
            start: Some(start),
            limit,
        }
    }
}

/// Event emitted by the contract when a poll is created.
#[derive(serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PollCreatedEvent {
    pub creator: Address,
    pub poll_id: PollId,
}

/// The four primitives the ledger exposes to this layer.
///
/// `await_confirmation` is the sole suspension point relied on for
/// read-after-write consistency: once it returns `Ok`, the call's effect
/// is durable and visible to `view`. Retry policy for transient transport
/// faults belongs to implementations, not to callers.
pub trait Ledger: Send + Sync {
    #[allow(async_fn_in_trait)]
    async fn submit(&self, call: &EntryCall) -> std::result::Result<TxHandle, GatewayError>;

    #[allow(async_fn_in_trait)]
    async fn await_confirmation(&self, tx: &TxHandle) -> std::result::Result<(), GatewayError>;

    /// Execute a view function, returning its array of return values.
    #[allow(async_fn_in_trait)]
    async fn view(&self, query: &ViewQuery) -> std::result::Result<serde_json::Value, GatewayError>;

    #[allow(async_fn_in_trait)]
    async fn poll_created_events(
        &self,
        creator: &Address,
        range: EventRange,
    ) -> std::result::Result<Vec<PollCreatedEvent>, GatewayError>;
}

/// Decode a numeric JSON value that nodes may render either as a number
/// or as a decimal string (the convention for 64-bit integers).
pub(crate) fn json_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_codes_round_trip() {
        for code in 1..=9 {
            assert_eq!(AbortReason::from_code(code).code(), code);
        }
        assert_eq!(AbortReason::from_code(42), AbortReason::Other(42));
    }

    #[test]
    fn entry_call_wire_shape() {
        let call = EntryCall::CastVote {
            owner: "0xa11ce".parse().unwrap(),
            poll_id: PollId(3),
            option_index: 1,
        };
        assert_eq!(call.function(), "cast_vote");
        assert_eq!(
            call.arguments(),
            vec![
                serde_json::json!("0xa11ce"),
                serde_json::json!("3"),
                serde_json::json!("1"),
            ]
        );
    }

    #[test]
    fn create_poll_renders_seconds_as_strings() {
        let call = EntryCall::CreatePoll {
            title: "Pets".to_owned(),
            description: "Cats or dogs?".to_owned(),
            options: vec!["Cats".to_owned(), "Dogs".to_owned()],
            start_secs: 100,
            end_secs: 200,
        };
        let args = call.arguments();
        assert_eq!(args.len(), 5);
        assert_eq!(args[3], serde_json::json!("100"));
        assert_eq!(args[4], serde_json::json!("200"));
    }

    #[test]
    fn view_query_wire_shape() {
        let owner: Address = "0xa11ce".parse().unwrap();
        let query = ViewQuery::HasVoted {
            owner: owner.clone(),
            poll_id: PollId(0),
            voter: "0xb0b".parse().unwrap(),
        };
        assert_eq!(query.function(), "has_voted");
        assert_eq!(query.arguments().len(), 3);

        let query = ViewQuery::PollIds { owner };
        assert_eq!(query.function(), "get_poll_ids");
        assert_eq!(query.arguments().len(), 1);
    }

    #[test]
    fn json_u64_accepts_both_renderings() {
        assert_eq!(json_u64(&serde_json::json!(7)), Some(7));
        assert_eq!(json_u64(&serde_json::json!("7")), Some(7));
        assert_eq!(json_u64(&serde_json::json!("x")), None);
        assert_eq!(json_u64(&serde_json::json!(null)), None);
    }
}
