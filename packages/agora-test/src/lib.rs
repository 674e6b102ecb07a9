//! Deterministic in-memory ledger for exercising the coordination layer.
//!
//! [MockLedger] implements the poll contract's full semantics: per-creator
//! stores, vote uniqueness, creator-only close/extend, one-shot
//! certificate claims, and the matching abort codes. A controllable clock
//! and per-call fault scripting cover the failure paths the real network
//! produces.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
};

use agora::*;
use parking_lot::Mutex;

pub fn addr(s: &str) -> Address {
    s.parse().expect("valid test address")
}

/// Build a coordinator/aggregator pair acting as `who`, sharing one cache,
/// the way a real session wires them up.
pub fn session(
    ledger: &Arc<MockLedger>,
    who: &str,
) -> (
    Coordinator<MockAccount>,
    Aggregator<MockAccount>,
    Arc<PollCache>,
) {
    let cache = Arc::new(PollCache::new());
    let coordinator = Coordinator::new(ledger.account(who), addr(who), cache.clone());
    let aggregator = Aggregator::new(ledger.account(who), cache.clone());
    (coordinator, aggregator, cache)
}

struct PollRec {
    title: String,
    description: String,
    options: Vec<String>,
    start_secs: u64,
    end_secs: u64,
    closed: bool,
    votes: HashMap<Address, u16>,
    feedbacks: Vec<String>,
    claims: HashSet<Address>,
}

impl PollRec {
    fn is_closed_at(&self, now_secs: u64) -> bool {
        self.closed || now_secs >= self.end_secs
    }

    fn counts(&self) -> Vec<u64> {
        (0..self.options.len())
            .map(|idx| {
                self.votes
                    .values()
                    .filter(|choice| usize::from(**choice) == idx)
                    .count() as u64
            })
            .collect()
    }
}

#[derive(Default)]
struct Store {
    next_id: u64,
    polls: BTreeMap<u64, PollRec>,
    events: Vec<PollCreatedEvent>,
}

#[derive(Default)]
struct Contract {
    initialized: HashSet<Address>,
    stores: HashMap<Address, Store>,
}

pub struct MockLedger {
    contract: Mutex<Contract>,
    pending: Mutex<HashMap<String, (Address, EntryCall)>>,
    submit_faults: Mutex<VecDeque<String>>,
    view_faults: Mutex<VecDeque<String>>,
    event_faults: Mutex<VecDeque<String>>,
    confirm_timeouts: Mutex<u64>,
    corrupted_tallies: Mutex<HashSet<(Address, u64)>>,
    now_secs: AtomicU64,
    next_tx: AtomicU64,
    submissions: AtomicU64,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        let now = u64::try_from(jiff::Timestamp::now().as_second()).expect("current time");
        Arc::new(MockLedger {
            contract: Mutex::default(),
            pending: Mutex::default(),
            submit_faults: Mutex::default(),
            view_faults: Mutex::default(),
            event_faults: Mutex::default(),
            confirm_timeouts: Mutex::new(0),
            corrupted_tallies: Mutex::default(),
            now_secs: AtomicU64::new(now),
            next_tx: AtomicU64::new(1),
            submissions: AtomicU64::new(0),
        })
    }

    pub fn account(self: &Arc<Self>, address: &str) -> MockAccount {
        MockAccount {
            ledger: self.clone(),
            sender: addr(address),
        }
    }

    pub fn now_secs(&self) -> u64 {
        self.now_secs.load(Ordering::Relaxed)
    }

    pub fn set_now_secs(&self, secs: u64) {
        self.now_secs.store(secs, Ordering::Relaxed);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.now_secs.fetch_add(secs, Ordering::Relaxed);
    }

    /// Number of calls that reached submission, scripted faults included.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    pub fn fail_next_submit(&self, message: &str) {
        self.submit_faults.lock().push_back(message.to_owned());
    }

    pub fn fail_next_view(&self, message: &str) {
        self.view_faults.lock().push_back(message.to_owned());
    }

    pub fn fail_next_events(&self, message: &str) {
        self.event_faults.lock().push_back(message.to_owned());
    }

    /// The next confirmation wait times out. The submitted call still
    /// applies: the caller's outcome is unknown, not "did not happen".
    pub fn timeout_next_confirmation(&self) {
        *self.confirm_timeouts.lock() += 1;
    }

    /// Serve a tally for this poll with one count too many, simulating an
    /// inconsistent read.
    pub fn corrupt_results(&self, owner: &str, poll_id: u64) {
        self.corrupted_tallies.lock().insert((addr(owner), poll_id));
    }

    fn rejected(reason: AbortReason) -> GatewayError {
        GatewayError::Rejected(reason)
    }

    fn apply(&self, sender: &Address, call: &EntryCall) -> Result<(), GatewayError> {
        let now = self.now_secs();
        let mut contract = self.contract.lock();
        match call {
            EntryCall::Init => {
                if !contract.initialized.insert(sender.clone()) {
                    return Err(Self::rejected(AbortReason::AlreadyInitialized));
                }
                Ok(())
            }
            EntryCall::CreatePoll {
                title,
                description,
                options,
                start_secs,
                end_secs,
            } => {
                if !contract.initialized.contains(sender) {
                    return Err(Self::rejected(AbortReason::NotInitialized));
                }
                if end_secs <= start_secs {
                    return Err(Self::rejected(AbortReason::BadTimeRange));
                }
                if options.len() < 2 {
                    return Err(Self::rejected(AbortReason::InvalidOption));
                }
                let store = contract.stores.entry(sender.clone()).or_default();
                let id = store.next_id;
                store.next_id += 1;
                store.polls.insert(
                    id,
                    PollRec {
                        title: title.clone(),
                        description: description.clone(),
                        options: options.clone(),
                        start_secs: *start_secs,
                        end_secs: *end_secs,
                        closed: false,
                        votes: HashMap::new(),
                        feedbacks: Vec::new(),
                        claims: HashSet::new(),
                    },
                );
                store.events.push(PollCreatedEvent {
                    creator: sender.clone(),
                    poll_id: PollId(id),
                });
                Ok(())
            }
            EntryCall::CastVote {
                owner,
                poll_id,
                option_index,
            } => {
                let rec = contract
                    .stores
                    .get_mut(owner)
                    .and_then(|store| store.polls.get_mut(&poll_id.0))
                    .ok_or(Self::rejected(AbortReason::PollNotFound))?;
                if rec.is_closed_at(now) {
                    return Err(Self::rejected(AbortReason::PollClosed));
                }
                if usize::from(*option_index) >= rec.options.len() {
                    return Err(Self::rejected(AbortReason::InvalidOption));
                }
                if rec.votes.contains_key(sender) {
                    return Err(Self::rejected(AbortReason::AlreadyVoted));
                }
                rec.votes.insert(sender.clone(), *option_index);
                Ok(())
            }
            EntryCall::ClosePoll { poll_id } => {
                // Close and extend address the signer's own store; a poll
                // that is not there means the signer is not its creator.
                let rec = contract
                    .stores
                    .get_mut(sender)
                    .and_then(|store| store.polls.get_mut(&poll_id.0))
                    .ok_or(Self::rejected(AbortReason::NotCreator))?;
                rec.closed = true;
                Ok(())
            }
            EntryCall::ExtendPoll {
                poll_id,
                new_end_secs,
            } => {
                let rec = contract
                    .stores
                    .get_mut(sender)
                    .and_then(|store| store.polls.get_mut(&poll_id.0))
                    .ok_or(Self::rejected(AbortReason::NotCreator))?;
                if rec.closed {
                    return Err(Self::rejected(AbortReason::PollClosed));
                }
                if *new_end_secs <= now {
                    return Err(Self::rejected(AbortReason::BadTimeRange));
                }
                rec.end_secs = *new_end_secs;
                Ok(())
            }
            EntryCall::SubmitFeedback {
                owner,
                poll_id,
                text,
            } => {
                let rec = contract
                    .stores
                    .get_mut(owner)
                    .and_then(|store| store.polls.get_mut(&poll_id.0))
                    .ok_or(Self::rejected(AbortReason::PollNotFound))?;
                rec.feedbacks.push(text.clone());
                Ok(())
            }
            EntryCall::IssueNftCertificate { owner, poll_id } => {
                let rec = contract
                    .stores
                    .get_mut(owner)
                    .and_then(|store| store.polls.get_mut(&poll_id.0))
                    .ok_or(Self::rejected(AbortReason::PollNotFound))?;
                if !rec.claims.insert(sender.clone()) {
                    return Err(Self::rejected(AbortReason::AlreadyClaimed));
                }
                Ok(())
            }
        }
    }

    fn view(&self, query: &ViewQuery) -> Result<serde_json::Value, GatewayError> {
        let now = self.now_secs();
        let contract = self.contract.lock();
        let poll = |owner: &Address, poll_id: &PollId| {
            contract
                .stores
                .get(owner)
                .and_then(|store| store.polls.get(&poll_id.0))
                .ok_or(Self::rejected(AbortReason::PollNotFound))
        };
        match query {
            ViewQuery::PollInfo { owner, poll_id } => {
                let rec = poll(owner, poll_id)?;
                Ok(serde_json::json!([
                    owner.as_str(),
                    rec.title,
                    rec.description,
                    rec.options,
                    rec.start_secs.to_string(),
                    rec.end_secs.to_string(),
                    rec.is_closed_at(now),
                    (rec.votes.len() as u64).to_string(),
                ]))
            }
            ViewQuery::Results { owner, poll_id } => {
                let rec = poll(owner, poll_id)?;
                let mut counts: Vec<String> =
                    rec.counts().iter().map(|count| count.to_string()).collect();
                if self
                    .corrupted_tallies
                    .lock()
                    .contains(&(owner.clone(), poll_id.0))
                {
                    counts.push("0".to_owned());
                }
                Ok(serde_json::json!([counts]))
            }
            ViewQuery::HasVoted {
                owner,
                poll_id,
                voter,
            } => {
                let rec = poll(owner, poll_id)?;
                Ok(serde_json::json!([rec.votes.contains_key(voter)]))
            }
            ViewQuery::VoterChoice {
                owner,
                poll_id,
                voter,
            } => {
                let rec = poll(owner, poll_id)?;
                let slot: Vec<String> = rec
                    .votes
                    .get(voter)
                    .map(|choice| vec![choice.to_string()])
                    .unwrap_or_default();
                Ok(serde_json::json!([{ "vec": slot }]))
            }
            ViewQuery::PollCount { owner } => {
                let count = contract
                    .stores
                    .get(owner)
                    .map_or(0, |store| store.polls.len());
                Ok(serde_json::json!([count.to_string()]))
            }
            ViewQuery::PollIds { owner } => {
                let ids: Vec<String> = contract
                    .stores
                    .get(owner)
                    .map(|store| store.polls.keys().map(|id| id.to_string()).collect())
                    .unwrap_or_default();
                Ok(serde_json::json!([ids]))
            }
            ViewQuery::Feedbacks { owner, poll_id } => {
                let rec = poll(owner, poll_id)?;
                Ok(serde_json::json!([rec.feedbacks]))
            }
        }
    }

    fn events(
        &self,
        creator: &Address,
        range: EventRange,
    ) -> Result<Vec<PollCreatedEvent>, GatewayError> {
        let contract = self.contract.lock();
        let events = contract
            .stores
            .get(creator)
            .map(|store| store.events.as_slice())
            .unwrap_or_default();
        let limit = usize::try_from(range.limit).unwrap_or(usize::MAX);
        let slice = match range.start {
            Some(start) => {
                let start = usize::try_from(start).unwrap_or(usize::MAX).min(events.len());
                &events[start..start.saturating_add(limit).min(events.len())]
            }
            None => &events[events.len().saturating_sub(limit)..],
        };
        Ok(slice.to_vec())
    }
}

/// A [MockLedger] bound to a signing identity, the unit the coordinator
/// and aggregator talk to.
#[derive(Clone)]
pub struct MockAccount {
    ledger: Arc<MockLedger>,
    sender: Address,
}

impl Ledger for MockAccount {
    async fn submit(&self, call: &EntryCall) -> Result<TxHandle, GatewayError> {
        self.ledger.submissions.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = self.ledger.submit_faults.lock().pop_front() {
            return Err(GatewayError::submission(message));
        }
        let seq = self.ledger.next_tx.fetch_add(1, Ordering::Relaxed);
        let handle = TxHandle(format!("0x{seq:016x}"));
        self.ledger
            .pending
            .lock()
            .insert(handle.0.clone(), (self.sender.clone(), call.clone()));
        Ok(handle)
    }

    async fn await_confirmation(&self, tx: &TxHandle) -> Result<(), GatewayError> {
        let (sender, call) = self
            .ledger
            .pending
            .lock()
            .remove(&tx.0)
            .ok_or_else(|| GatewayError::transport(format!("unknown transaction {tx}")))?;
        let timed_out = {
            let mut timeouts = self.ledger.confirm_timeouts.lock();
            if *timeouts > 0 {
                *timeouts -= 1;
                true
            } else {
                false
            }
        };
        let outcome = self.ledger.apply(&sender, &call);
        if timed_out {
            // The effect (if any) landed, but the caller never learns.
            return Err(GatewayError::ConfirmationTimeout);
        }
        outcome
    }

    async fn view(&self, query: &ViewQuery) -> Result<serde_json::Value, GatewayError> {
        if let Some(message) = self.ledger.view_faults.lock().pop_front() {
            return Err(GatewayError::transport(message));
        }
        self.ledger.view(query)
    }

    async fn poll_created_events(
        &self,
        creator: &Address,
        range: EventRange,
    ) -> Result<Vec<PollCreatedEvent>, GatewayError> {
        if let Some(message) = self.ledger.event_faults.lock().pop_front() {
            return Err(GatewayError::transport(message));
        }
        self.ledger.events(creator, range)
    }
}
