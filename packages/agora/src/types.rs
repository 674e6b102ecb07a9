use std::{fmt::Display, str::FromStr};

use crate::*;

/// Ledger account address, normalized to lowercase `0x…` hex.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| AgoraError::validation("account address must start with 0x"))?;
        if hex.is_empty() || hex.len() > 64 {
            return Err(AgoraError::validation(format!(
                "account address has invalid length: {s}"
            )));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AgoraError::validation(format!(
                "account address contains non-hex characters: {s}"
            )));
        }
        Ok(Address(format!("0x{}", hex.to_ascii_lowercase())))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl serde::Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Poll identifier, assigned by the ledger.
///
/// Monotonically increasing per creator account, never reused. Only the
/// composite [PollKey] addresses a poll globally.
#[derive(
    serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Copy, Hash, Debug,
)]
pub struct PollId(pub u64);

impl PollId {
    pub fn start() -> Self {
        PollId(0)
    }

    pub fn next(self) -> PollId {
        PollId(self.0 + 1)
    }
}

impl Display for PollId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Composite key addressing a poll: creator account plus per-creator id.
#[derive(serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PollKey {
    pub owner: Address,
    pub id: PollId,
}

impl PollKey {
    pub fn new(owner: Address, id: PollId) -> Self {
        PollKey { owner, id }
    }
}

impl Display for PollKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}#{}", self.owner, self.id)
    }
}

/// Derived lifecycle state of a poll. Informational only: voting
/// eligibility is enforced by the ledger, not gated on [PollState].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PollState {
    Scheduled,
    Active,
    Closed,
}

/// Poll metadata as read from the ledger.
#[derive(serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct Poll {
    pub id: PollId,
    pub creator: Address,
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// Explicitly closed by the creator. Time-based closure is derived,
    /// see [Poll::is_closed_at].
    pub closed: bool,
    pub total_votes: u64,
}

impl Poll {
    pub fn key(&self) -> PollKey {
        PollKey::new(self.creator.clone(), self.id)
    }

    /// A poll is closed once its end time is reached (inclusive) or the
    /// creator closed it explicitly. The ledger clock is authoritative;
    /// this is the client-side approximation used for best-effort gating.
    pub fn is_closed_at(&self, now: Timestamp) -> bool {
        self.closed || now >= self.end_time
    }

    pub fn state_at(&self, now: Timestamp) -> PollState {
        if self.is_closed_at(now) {
            PollState::Closed
        } else if now < self.start_time {
            PollState::Scheduled
        } else {
            PollState::Active
        }
    }
}

/// Per-option tallies for a poll, ordered like [Poll::options].
#[derive(serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PollResults {
    pub key: PollKey,
    pub counts: Vec<u64>,
    pub total_votes: u64,
}

impl PollResults {
    /// Build a result set, enforcing the tally invariants: one count per
    /// option, and a total matching the sum of the counts. A violation
    /// means the ledger handed us inconsistent reads and is fatal to this
    /// read, never silently tolerated.
    pub fn try_new(
        key: PollKey,
        counts: Vec<u64>,
        option_count: usize,
        reported_total: u64,
    ) -> Result<Self> {
        if counts.len() != option_count {
            return Err(AgoraError::CorruptResultSet {
                key,
                message: format!("{} counts for {} options", counts.len(), option_count),
            });
        }
        let sum: u64 = counts.iter().sum();
        if sum != reported_total {
            return Err(AgoraError::CorruptResultSet {
                key,
                message: format!("counts sum to {sum} but the ledger reports {reported_total}"),
            });
        }
        Ok(PollResults {
            key,
            counts,
            total_votes: reported_total,
        })
    }
}

/// A poll with its live tallies, the aggregator's display object.
#[derive(serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PollSummary {
    pub poll: Poll,
    pub counts: Vec<u64>,
}

impl PollSummary {
    pub fn key(&self) -> PollKey {
        self.poll.key()
    }
}

/// Input for poll creation, validated locally before anything is submitted.
#[derive(serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct CreatePollRequest {
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
}

impl CreatePollRequest {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(AgoraError::validation("poll title must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(AgoraError::validation("poll description must not be empty"));
        }
        if self.options.len() < 2 {
            return Err(AgoraError::validation(format!(
                "a poll needs at least 2 options, got {}",
                self.options.len()
            )));
        }
        if self.options.iter().any(|o| o.trim().is_empty()) {
            return Err(AgoraError::validation("poll options must not be empty"));
        }
        if self.end_time <= self.start_time {
            return Err(AgoraError::validation(format!(
                "end time {} must be after start time {}",
                self.end_time, self.start_time
            )));
        }
        unix_seconds(self.start_time)?;
        unix_seconds(self.end_time)?;
        Ok(())
    }
}

/// Convert a timestamp to the ledger's wire format, UTC seconds.
pub(crate) fn unix_seconds(ts: Timestamp) -> Result<u64> {
    u64::try_from(ts.as_second())
        .map_err(|_| AgoraError::validation(format!("timestamp {ts} predates the unix epoch")))
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_second(secs).unwrap()
    }

    fn sample_poll(start: i64, end: i64, closed: bool) -> Poll {
        Poll {
            id: PollId(3),
            creator: "0xA11CE".parse().unwrap(),
            title: "Pets".to_owned(),
            description: "Cats or dogs?".to_owned(),
            options: vec!["Cats".to_owned(), "Dogs".to_owned()],
            start_time: ts(start),
            end_time: ts(end),
            closed,
            total_votes: 0,
        }
    }

    fn sample_key() -> PollKey {
        PollKey::new("0xa11ce".parse().unwrap(), PollId(3))
    }

    #[test]
    fn address_normalizes_case() {
        let addr: Address = "0xAbCdEf0123".parse().unwrap();
        assert_eq!(addr.as_str(), "0xabcdef0123");
        assert_eq!(addr, "0xABCDEF0123".parse().unwrap());
    }

    #[test]
    fn address_rejects_garbage() {
        assert!("abc".parse::<Address>().is_err());
        assert!("0x".parse::<Address>().is_err());
        assert!("0xzz".parse::<Address>().is_err());
        assert!(format!("0x{}", "a".repeat(65)).parse::<Address>().is_err());
    }

    #[test]
    fn closed_boundary_is_inclusive() {
        let poll = sample_poll(100, 200, false);
        assert!(!poll.is_closed_at(ts(199)));
        assert!(poll.is_closed_at(ts(200)));
        assert!(poll.is_closed_at(ts(201)));
    }

    #[test]
    fn explicit_close_wins_over_time() {
        let poll = sample_poll(100, 200, true);
        assert!(poll.is_closed_at(ts(150)));
    }

    #[test]
    fn state_transitions() {
        let poll = sample_poll(100, 200, false);
        assert_eq!(poll.state_at(ts(50)), PollState::Scheduled);
        assert_eq!(poll.state_at(ts(100)), PollState::Active);
        assert_eq!(poll.state_at(ts(200)), PollState::Closed);
    }

    #[test]
    fn create_request_validation() {
        let good = CreatePollRequest {
            title: "Pets".to_owned(),
            description: "Cats or dogs?".to_owned(),
            options: vec!["Cats".to_owned(), "Dogs".to_owned()],
            start_time: ts(100),
            end_time: ts(200),
        };
        good.validate().unwrap();

        let mut bad = good.clone();
        bad.title = "  ".to_owned();
        bad.validate().unwrap_err();

        let mut bad = good.clone();
        bad.options.truncate(1);
        bad.validate().unwrap_err();

        let mut bad = good.clone();
        bad.options[1] = String::new();
        bad.validate().unwrap_err();

        let mut bad = good.clone();
        bad.end_time = bad.start_time;
        bad.validate().unwrap_err();

        let mut bad = good;
        bad.start_time = ts(-5);
        bad.validate().unwrap_err();
    }

    #[test]
    fn result_set_guards() {
        let ok = PollResults::try_new(sample_key(), vec![1, 0], 2, 1).unwrap();
        assert_eq!(ok.total_votes, 1);

        let err = PollResults::try_new(sample_key(), vec![1, 0, 0], 2, 1).unwrap_err();
        assert!(matches!(err, AgoraError::CorruptResultSet { .. }));

        let err = PollResults::try_new(sample_key(), vec![1, 0], 2, 2).unwrap_err();
        assert!(matches!(err, AgoraError::CorruptResultSet { .. }));
    }

    quickcheck! {
        fn consistent_tallies_pass(raw: Vec<u32>) -> bool {
            let counts: Vec<u64> = raw.iter().map(|c| u64::from(*c)).collect();
            let total: u64 = counts.iter().sum();
            let len = counts.len();
            PollResults::try_new(sample_key(), counts, len, total).is_ok()
        }

        fn inflated_totals_fail(raw: Vec<u32>) -> bool {
            let counts: Vec<u64> = raw.iter().map(|c| u64::from(*c)).collect();
            let total: u64 = counts.iter().sum();
            let len = counts.len();
            PollResults::try_new(sample_key(), counts, len, total + 1).is_err()
        }
    }

    #[test]
    fn poll_id_ordering() {
        assert!(PollId::start() < PollId::start().next());
        assert_eq!(PollId(7).to_string(), "7");
    }

    #[test]
    fn poll_key_display() {
        assert_eq!(sample_key().to_string(), "0xa11ce#3");
    }
}
