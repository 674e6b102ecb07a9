use serde_json::Value;

use crate::*;

/// Read-only materialization of poll views: metadata, tallies, and the
/// full poll set of a creator account. Never mutates ledger state.
pub struct Aggregator<G> {
    gateway: G,
    cache: Arc<PollCache>,
}

impl<G: Ledger> Aggregator<G> {
    pub fn new(gateway: G, cache: Arc<PollCache>) -> Self {
        Aggregator { gateway, cache }
    }

    /// Fetch a poll's metadata. Refreshes the cached copy on the way out.
    pub async fn poll_info(&self, key: &PollKey) -> Result<Poll> {
        let value = self.view(key, ViewQuery::PollInfo {
            owner: key.owner.clone(),
            poll_id: key.id,
        })
        .await?;
        let poll = decode_poll_info(key, &value)?;
        self.cache.store(poll.clone());
        Ok(poll)
    }

    /// Fetch a poll's tallies together with its metadata.
    ///
    /// The option list is immutable after creation, so a count/option
    /// length mismatch (or a total that is not the sum of the counts) can
    /// only mean an inconsistent read; that fails the whole call with
    /// [AgoraError::CorruptResultSet].
    pub async fn poll_results(&self, key: &PollKey) -> Result<PollResults> {
        let counts = self.fetch_counts(key).await?;
        let poll = self.poll_info(key).await?;
        PollResults::try_new(key.clone(), counts, poll.options.len(), poll.total_votes)
    }

    /// Materialize every poll owned by an account, newest first.
    ///
    /// Per-poll fetch failures are logged and the poll omitted; a partial
    /// listing is more useful than none. Ordering is restored by a final
    /// sort on the id, so fetch order never leaks into the output.
    pub async fn all_polls(&self, owner: &Address) -> Result<Vec<PollSummary>> {
        let ids = self.poll_ids(owner).await?;
        let mut polls = Vec::with_capacity(ids.len());
        for id in ids {
            let key = PollKey::new(owner.clone(), id);
            match self.fetch_summary(&key).await {
                Ok(summary) => polls.push(summary),
                Err(err) => tracing::warn!("Skipping poll {key}: {err}"),
            }
        }
        polls.sort_by(|a, b| b.poll.id.cmp(&a.poll.id));
        self.cache.refresh_owner(owner, &polls);
        Ok(polls)
    }

    /// Whether `voter` has already cast a vote on the poll.
    pub async fn has_voted(&self, key: &PollKey, voter: &Address) -> Result<bool> {
        let value = self.view(key, ViewQuery::HasVoted {
            owner: key.owner.clone(),
            poll_id: key.id,
            voter: voter.clone(),
        })
        .await?;
        first_value(&value)?
            .as_bool()
            .ok_or_else(|| malformed(key, "has_voted"))
    }

    /// The option index `voter` chose, if they voted.
    pub async fn voter_choice(&self, key: &PollKey, voter: &Address) -> Result<Option<u16>> {
        let value = self.view(key, ViewQuery::VoterChoice {
            owner: key.owner.clone(),
            poll_id: key.id,
            voter: voter.clone(),
        })
        .await?;
        let slot = first_value(&value)?;
        // An optional return value arrives as a zero-or-one element
        // vector, either bare or wrapped in a `vec` field.
        let entries = match slot {
            Value::Array(entries) => entries.as_slice(),
            Value::Object(map) => match map.get("vec") {
                Some(Value::Array(entries)) => entries.as_slice(),
                _ => return Err(malformed(key, "get_vote")),
            },
            _ => return Err(malformed(key, "get_vote")),
        };
        match entries {
            [] => Ok(None),
            [entry] => {
                let index = json_u64(entry)
                    .and_then(|i| u16::try_from(i).ok())
                    .ok_or_else(|| malformed(key, "get_vote"))?;
                Ok(Some(index))
            }
            _ => Err(malformed(key, "get_vote")),
        }
    }

    /// Number of polls the account has created.
    pub async fn poll_count(&self, owner: &Address) -> Result<u64> {
        let query = ViewQuery::PollCount {
            owner: owner.clone(),
        };
        let value = self.view_unkeyed(query).await?;
        json_u64(first_value(&value)?)
            .ok_or_else(|| AgoraError::gateway("malformed get_all_polls_count response"))
    }

    /// All poll ids the account has created, in assignment order.
    pub async fn poll_ids(&self, owner: &Address) -> Result<Vec<PollId>> {
        let query = ViewQuery::PollIds {
            owner: owner.clone(),
        };
        let value = self.view_unkeyed(query).await?;
        let raw = first_value(&value)?
            .as_array()
            .ok_or_else(|| AgoraError::gateway("malformed get_poll_ids response"))?;
        raw.iter()
            .map(|id| {
                json_u64(id)
                    .map(PollId)
                    .ok_or_else(|| AgoraError::gateway("malformed poll id in get_poll_ids"))
            })
            .collect()
    }

    /// All feedback entries for a poll. Unordered for display purposes.
    pub async fn feedbacks(&self, key: &PollKey) -> Result<Vec<String>> {
        let value = self.view(key, ViewQuery::Feedbacks {
            owner: key.owner.clone(),
            poll_id: key.id,
        })
        .await?;
        let raw = first_value(&value)?
            .as_array()
            .ok_or_else(|| malformed(key, "get_feedbacks"))?;
        raw.iter()
            .map(|entry| {
                entry
                    .as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| malformed(key, "get_feedbacks"))
            })
            .collect()
    }

    async fn fetch_summary(&self, key: &PollKey) -> Result<PollSummary> {
        let counts = self.fetch_counts(key).await?;
        let poll = self.poll_info(key).await?;
        PollResults::try_new(key.clone(), counts.clone(), poll.options.len(), poll.total_votes)?;
        Ok(PollSummary { poll, counts })
    }

    async fn fetch_counts(&self, key: &PollKey) -> Result<Vec<u64>> {
        let value = self.view(key, ViewQuery::Results {
            owner: key.owner.clone(),
            poll_id: key.id,
        })
        .await?;
        let raw = first_value(&value)?
            .as_array()
            .ok_or_else(|| malformed(key, "get_results"))?;
        raw.iter()
            .map(|count| json_u64(count).ok_or_else(|| malformed(key, "get_results")))
            .collect()
    }

    async fn view(&self, key: &PollKey, query: ViewQuery) -> Result<Value> {
        self.gateway
            .view(&query)
            .await
            .map_err(|err| AgoraError::classify(Some(key), err))
    }

    async fn view_unkeyed(&self, query: ViewQuery) -> Result<Value> {
        self.gateway
            .view(&query)
            .await
            .map_err(|err| AgoraError::classify(None, err))
    }
}

fn malformed(key: &PollKey, function: &str) -> AgoraError {
    AgoraError::gateway(format!("malformed {function} response for {key}"))
}

fn first_value(value: &Value) -> Result<&Value> {
    value
        .as_array()
        .and_then(|row| row.first())
        .ok_or_else(|| AgoraError::gateway("empty view response"))
}

/// Decode the `get_poll_info` row:
/// `(creator, title, description, options, start, end, closed, total_votes)`.
fn decode_poll_info(key: &PollKey, value: &Value) -> Result<Poll> {
    let row = value
        .as_array()
        .filter(|row| row.len() == 8)
        .ok_or_else(|| malformed(key, "get_poll_info"))?;

    let creator: Address = row[0]
        .as_str()
        .ok_or_else(|| malformed(key, "get_poll_info"))?
        .parse()?;
    let title = row[1]
        .as_str()
        .ok_or_else(|| malformed(key, "get_poll_info"))?
        .to_owned();
    let description = row[2]
        .as_str()
        .ok_or_else(|| malformed(key, "get_poll_info"))?
        .to_owned();
    let options = row[3]
        .as_array()
        .ok_or_else(|| malformed(key, "get_poll_info"))?
        .iter()
        .map(|option| {
            option
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| malformed(key, "get_poll_info"))
        })
        .collect::<Result<Vec<_>>>()?;
    let start_secs = json_u64(&row[4]).ok_or_else(|| malformed(key, "get_poll_info"))?;
    let end_secs = json_u64(&row[5]).ok_or_else(|| malformed(key, "get_poll_info"))?;
    let closed = row[6]
        .as_bool()
        .ok_or_else(|| malformed(key, "get_poll_info"))?;
    let total_votes = json_u64(&row[7]).ok_or_else(|| malformed(key, "get_poll_info"))?;

    Ok(Poll {
        id: key.id,
        creator,
        title,
        description,
        options,
        start_time: timestamp_from_secs(key, start_secs)?,
        end_time: timestamp_from_secs(key, end_secs)?,
        closed,
        total_votes,
    })
}

fn timestamp_from_secs(key: &PollKey, secs: u64) -> Result<Timestamp> {
    let secs = i64::try_from(secs).map_err(|_| malformed(key, "get_poll_info"))?;
    Timestamp::from_second(secs).map_err(|_| malformed(key, "get_poll_info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PollKey {
        PollKey::new("0xa11ce".parse().unwrap(), PollId(0))
    }

    #[test]
    fn decodes_string_rendered_numbers() {
        let value = serde_json::json!([
            "0xa11ce",
            "Pets",
            "Cats or dogs?",
            ["Cats", "Dogs"],
            "100",
            "200",
            false,
            "1",
        ]);
        let poll = decode_poll_info(&key(), &value).unwrap();
        assert_eq!(poll.title, "Pets");
        assert_eq!(poll.options.len(), 2);
        assert_eq!(poll.start_time.as_second(), 100);
        assert_eq!(poll.end_time.as_second(), 200);
        assert_eq!(poll.total_votes, 1);
        assert!(!poll.closed);
    }

    #[test]
    fn decodes_plain_numbers() {
        let value = serde_json::json!([
            "0xa11ce",
            "Pets",
            "Cats or dogs?",
            ["Cats", "Dogs"],
            100,
            200,
            true,
            0,
        ]);
        let poll = decode_poll_info(&key(), &value).unwrap();
        assert!(poll.closed);
        assert_eq!(poll.total_votes, 0);
    }

    #[test]
    fn rejects_short_rows() {
        let value = serde_json::json!(["0xa11ce", "Pets"]);
        let err = decode_poll_info(&key(), &value).unwrap_err();
        assert!(matches!(err, AgoraError::Gateway { .. }));
    }

    #[test]
    fn rejects_malformed_options() {
        let value = serde_json::json!([
            "0xa11ce",
            "Pets",
            "Cats or dogs?",
            ["Cats", 7],
            100,
            200,
            false,
            0,
        ]);
        decode_poll_info(&key(), &value).unwrap_err();
    }
}
