use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use backon::{ExponentialBuilder, Retryable};

use crate::*;

/// Orchestrates every state-changing poll operation: create, vote, close,
/// extend, feedback, certificate claim.
///
/// One coordinator per session, constructed with the gateway and the
/// signing identity it acts as. Mutations are all-or-nothing from the
/// caller's perspective, but a confirmed effect is never revocable: a
/// caller that abandons an in-flight operation must re-read ledger state
/// instead of assuming the call was lost.
pub struct Coordinator<G> {
    gateway: G,
    sender: Address,
    cache: Arc<PollCache>,
    /// Whether the one-time contract initialization is known to be
    /// satisfied for this signer. Without this we would re-submit `init`
    /// ahead of every creation and burn a round trip on the expected
    /// rejection.
    init_done: AtomicBool,
}

impl<G: Ledger> Coordinator<G> {
    pub fn new(gateway: G, sender: Address, cache: Arc<PollCache>) -> Self {
        Coordinator {
            gateway,
            sender,
            cache,
            init_done: AtomicBool::new(false),
        }
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    /// Create a poll and recover its ledger-assigned id.
    ///
    /// Runs the idempotent initialization step first, then submits the
    /// creation call, waits for confirmation, and reads the creator's
    /// latest `poll_created` event. If the event cannot be found the
    /// creation may still have landed, so this fails with
    /// [AgoraError::PollIdUnresolved] rather than a submission error.
    pub async fn create_poll(&self, request: CreatePollRequest) -> Result<PollId> {
        request.validate()?;
        self.ensure_initialized().await?;

        let call = EntryCall::CreatePoll {
            title: request.title,
            description: request.description,
            options: request.options,
            start_secs: unix_seconds(request.start_time)?,
            end_secs: unix_seconds(request.end_time)?,
        };
        let tx = self.submit_and_confirm(&call, None).await?;

        let poll_id = self.resolve_pending_id().await?;
        tracing::info!("Created poll {poll_id} for {} in tx {tx}", self.sender);
        Ok(poll_id)
    }

    /// Cast this account's vote on a poll.
    ///
    /// The cached end time gates the call best-effort; the ledger stays
    /// authoritative and its rejection is surfaced as [AgoraError::PollClosed]
    /// or [AgoraError::AlreadyVoted], never dropped. On success the cache
    /// records the vote optimistically until the next refresh.
    pub async fn cast_vote(&self, key: &PollKey, option_index: u16) -> Result<()> {
        if let Some(cached) = self.cache.poll(key) {
            if cached.is_closed_at(Timestamp::now()) {
                return Err(AgoraError::PollClosed { key: key.clone() });
            }
            if usize::from(option_index) >= cached.options.len() {
                return Err(AgoraError::validation(format!(
                    "option index {option_index} is out of range for {} options",
                    cached.options.len()
                )));
            }
        }

        let call = EntryCall::CastVote {
            owner: key.owner.clone(),
            poll_id: key.id,
            option_index,
        };
        let tx = self.submit_and_confirm(&call, Some(key)).await?;
        self.cache.note_vote(key);
        tracing::info!(
            "Vote for option {option_index} on {key} confirmed in tx {tx}"
        );
        Ok(())
    }

    /// Close a poll early. Restricted to the creator; terminal.
    pub async fn close_poll(&self, key: &PollKey) -> Result<()> {
        self.require_ownership(key)?;
        let call = EntryCall::ClosePoll { poll_id: key.id };
        let tx = self.submit_and_confirm(&call, Some(key)).await?;
        // Locally derived `closed` is stale from here; force a re-read.
        self.cache.invalidate(key);
        tracing::info!("Closed poll {key} in tx {tx}");
        Ok(())
    }

    /// Push a poll's end time back. Restricted to the creator.
    ///
    /// A poll that merely looks closed locally (its end time passed but no
    /// explicit close was recorded) can still be extended; only the ledger
    /// knows whether closure was recorded, so no local `closed` gate here.
    pub async fn extend_poll(&self, key: &PollKey, new_end_time: Timestamp) -> Result<()> {
        self.require_ownership(key)?;
        if new_end_time <= Timestamp::now() {
            return Err(AgoraError::validation(format!(
                "new end time {new_end_time} is not in the future"
            )));
        }

        let call = EntryCall::ExtendPoll {
            poll_id: key.id,
            new_end_secs: unix_seconds(new_end_time)?,
        };
        let tx = self.submit_and_confirm(&call, Some(key)).await?;
        self.cache.invalidate(key);
        tracing::info!("Extended poll {key} to {new_end_time} in tx {tx}");
        Ok(())
    }

    /// Append a feedback entry to a poll. No uniqueness constraint.
    pub async fn submit_feedback(&self, key: &PollKey, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(AgoraError::validation("feedback text must not be empty"));
        }

        let call = EntryCall::SubmitFeedback {
            owner: key.owner.clone(),
            poll_id: key.id,
            text: text.to_owned(),
        };
        let tx = self.submit_and_confirm(&call, Some(key)).await?;
        tracing::info!("Feedback on {key} confirmed in tx {tx}");
        Ok(())
    }

    /// Claim the participation certificate for a poll. One-shot: a second
    /// claim is rejected by the ledger as [AgoraError::AlreadyClaimed] and
    /// must not be retried.
    pub async fn claim_certificate(&self, key: &PollKey) -> Result<()> {
        let call = EntryCall::IssueNftCertificate {
            owner: key.owner.clone(),
            poll_id: key.id,
        };
        let tx = self.submit_and_confirm(&call, Some(key)).await?;
        tracing::info!("Certificate for {key} issued in tx {tx}");
        Ok(())
    }

    /// The close/extend entry calls carry only the poll id and are applied
    /// to the signer's own store, so a mismatched owner could never reach
    /// the intended poll. Rejecting locally also covers the ledger-side
    /// creator check for well-formed keys.
    fn require_ownership(&self, key: &PollKey) -> Result<()> {
        if key.owner != self.sender {
            return Err(AgoraError::Unauthorized { key: key.clone() });
        }
        Ok(())
    }

    /// One-time contract initialization, idempotent from the caller's
    /// perspective: an "already initialized" rejection is logged and
    /// treated as satisfied, anything else aborts the surrounding
    /// operation.
    async fn ensure_initialized(&self) -> Result<()> {
        if self.init_done.load(Ordering::Relaxed) {
            return Ok(());
        }

        let outcome = self.submit_and_confirm_raw(&EntryCall::Init).await;
        match outcome {
            Ok(tx) => tracing::info!("Initialized poll store for {} in tx {tx}", self.sender),
            Err(GatewayError::Rejected(AbortReason::AlreadyInitialized)) => {
                tracing::debug!("Poll store for {} already initialized", self.sender);
            }
            Err(err) => return Err(AgoraError::classify(None, err)),
        }
        self.init_done.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Recover the id the ledger assigned to the poll we just confirmed,
    /// from the creator's latest `poll_created` event. Event visibility
    /// can lag confirmation, so this retries with backoff for a bounded
    /// number of attempts before giving up with
    /// [AgoraError::PollIdUnresolved].
    async fn resolve_pending_id(&self) -> Result<PollId> {
        let fetch = || async {
            let events = self
                .gateway
                .poll_created_events(&self.sender, EventRange::latest(1))
                .await
                .map_err(ResolveError::Gateway)?;
            events
                .last()
                .map(|event| event.poll_id)
                .ok_or(ResolveError::Missing)
        };

        fetch
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(100))
                    .with_max_times(5),
            )
            .notify(|err: &ResolveError, dur: Duration| {
                tracing::debug!("Poll id not resolved yet ({err}), retrying in {dur:?}");
            })
            .await
            .map_err(|err| {
                tracing::warn!("Giving up on poll id recovery: {err}");
                AgoraError::PollIdUnresolved
            })
    }

    async fn submit_and_confirm(
        &self,
        call: &EntryCall,
        key: Option<&PollKey>,
    ) -> Result<TxHandle> {
        self.submit_and_confirm_raw(call)
            .await
            .map_err(|err| AgoraError::classify(key, err))
    }

    async fn submit_and_confirm_raw(
        &self,
        call: &EntryCall,
    ) -> std::result::Result<TxHandle, GatewayError> {
        let tx = self.gateway.submit(call).await?;
        tracing::debug!("Submitted {} as {tx}, awaiting confirmation", call.function());
        self.gateway.await_confirmation(&tx).await?;
        Ok(tx)
    }
}

#[derive(thiserror::Error, Debug)]
enum ResolveError {
    #[error(transparent)]
    Gateway(GatewayError),
    #[error("no poll_created event visible yet")]
    Missing,
}
