use crate::*;

/// Result type for coordinator and aggregator operations.
pub type Result<T, E = AgoraError> = std::result::Result<T, E>;

/// Error taxonomy for the poll coordination layer.
///
/// Callers branch on the kind: [AgoraError::is_retryable] covers failures
/// where re-querying the ledger is safe, [AgoraError::is_permanent_rejection]
/// covers calls that will never succeed as submitted. The two sets are
/// disjoint; a [AgoraError::ConfirmationTimeout] means the outcome is
/// unknown and must be resolved by re-reading ledger state, never by
/// blindly resubmitting the mutation.
#[derive(thiserror::Error, Debug)]
pub enum AgoraError {
    #[error("invalid request: {message}")]
    Validation { message: String },
    #[error("caller is not the creator of poll {key}")]
    Unauthorized { key: PollKey },
    #[error("poll {key} is closed")]
    PollClosed { key: PollKey },
    #[error("this account already cast a vote on poll {key}")]
    AlreadyVoted { key: PollKey },
    #[error("this account already claimed the certificate for poll {key}")]
    AlreadyClaimed { key: PollKey },
    #[error("poll {key} does not exist on the ledger")]
    PollNotFound { key: PollKey },
    #[error("could not submit ledger call: {message}")]
    SubmissionFailed { message: String },
    #[error("timed out waiting for confirmation, outcome unknown")]
    ConfirmationTimeout,
    #[error("poll creation confirmed, but the assigned poll id could not be recovered")]
    PollIdUnresolved,
    #[error("inconsistent results for poll {key}: {message}")]
    CorruptResultSet { key: PollKey, message: String },
    #[error("ledger gateway failure: {message}")]
    Gateway { message: String },
}

impl AgoraError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn gateway(message: impl Into<String>) -> Self {
        Self::Gateway {
            message: message.into(),
        }
    }

    /// The call may succeed on retry, or its outcome can be recovered by
    /// re-querying ledger state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SubmissionFailed { .. }
                | Self::ConfirmationTimeout
                | Self::PollIdUnresolved
                | Self::Gateway { .. }
        )
    }

    /// The ledger (or local validation) rejected the call as such; it will
    /// never succeed as submitted.
    pub fn is_permanent_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::Unauthorized { .. }
                | Self::PollClosed { .. }
                | Self::AlreadyVoted { .. }
                | Self::AlreadyClaimed { .. }
        )
    }

    /// Error kind for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Unauthorized { .. } => "unauthorized",
            Self::PollClosed { .. } => "poll_closed",
            Self::AlreadyVoted { .. } => "already_voted",
            Self::AlreadyClaimed { .. } => "already_claimed",
            Self::PollNotFound { .. } => "poll_not_found",
            Self::SubmissionFailed { .. } => "submission_failed",
            Self::ConfirmationTimeout => "confirmation_timeout",
            Self::PollIdUnresolved => "poll_id_unresolved",
            Self::CorruptResultSet { .. } => "corrupt_result_set",
            Self::Gateway { .. } => "gateway",
        }
    }

    /// Lift a gateway-classified failure into the domain taxonomy.
    ///
    /// `key` is the poll the call addressed, when there is one; keyed
    /// rejections without a key cannot occur on the paths that use this
    /// (creation aborts carry no poll yet) and degrade to [Self::Gateway].
    pub(crate) fn classify(key: Option<&PollKey>, err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected(reason) => match (reason, key) {
                (AbortReason::NotCreator, Some(key)) => Self::Unauthorized { key: key.clone() },
                (AbortReason::PollClosed, Some(key)) => Self::PollClosed { key: key.clone() },
                (AbortReason::AlreadyVoted, Some(key)) => Self::AlreadyVoted { key: key.clone() },
                (AbortReason::AlreadyClaimed, Some(key)) => {
                    Self::AlreadyClaimed { key: key.clone() }
                }
                (AbortReason::PollNotFound, Some(key)) => Self::PollNotFound { key: key.clone() },
                (AbortReason::InvalidOption, _) => {
                    Self::validation("option index is out of range for this poll")
                }
                (AbortReason::BadTimeRange, _) => {
                    Self::validation("the ledger rejected the requested time range")
                }
                (reason, _) => Self::gateway(format!("unexpected ledger rejection: {reason}")),
            },
            GatewayError::Submission { message } => Self::SubmissionFailed { message },
            GatewayError::ConfirmationTimeout => Self::ConfirmationTimeout,
            GatewayError::Transport { message } => Self::Gateway { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PollKey {
        PollKey::new("0xa11ce".parse().unwrap(), PollId(1))
    }

    #[test]
    fn keyed_rejections_classify() {
        let err = AgoraError::classify(
            Some(&key()),
            GatewayError::Rejected(AbortReason::AlreadyVoted),
        );
        assert!(matches!(err, AgoraError::AlreadyVoted { .. }));
        assert!(err.is_permanent_rejection());
        assert!(!err.is_retryable());

        let err =
            AgoraError::classify(Some(&key()), GatewayError::Rejected(AbortReason::NotCreator));
        assert!(matches!(err, AgoraError::Unauthorized { .. }));

        let err =
            AgoraError::classify(Some(&key()), GatewayError::Rejected(AbortReason::PollClosed));
        assert!(matches!(err, AgoraError::PollClosed { .. }));
    }

    #[test]
    fn timeout_is_retryable_not_rejected() {
        let err = AgoraError::classify(None, GatewayError::ConfirmationTimeout);
        assert!(matches!(err, AgoraError::ConfirmationTimeout));
        assert!(err.is_retryable());
        assert!(!err.is_permanent_rejection());
    }

    #[test]
    fn submission_failure_keeps_message() {
        let err = AgoraError::classify(None, GatewayError::submission("connection refused"));
        match &err {
            AgoraError::SubmissionFailed { message } => {
                assert_eq!(message, "connection refused")
            }
            other => panic!("unexpected: {other}"),
        }
        assert!(err.is_retryable());
    }

    #[test]
    fn abort_without_key_degrades_to_gateway() {
        let err = AgoraError::classify(None, GatewayError::Rejected(AbortReason::NotCreator));
        assert!(matches!(err, AgoraError::Gateway { .. }));
    }

    #[test]
    fn categories_are_stable() {
        assert_eq!(AgoraError::ConfirmationTimeout.category(), "confirmation_timeout");
        assert_eq!(AgoraError::validation("x").category(), "validation");
        assert_eq!(AgoraError::PollIdUnresolved.category(), "poll_id_unresolved");
    }
}
