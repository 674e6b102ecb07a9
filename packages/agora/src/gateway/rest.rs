use std::time::Duration;

use reqwest::{Client, ClientBuilder, Response};
use url::Url;

use crate::*;

type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Signing collaborator for the REST gateway.
///
/// Key management and transaction signing live outside this layer; the
/// gateway only needs signed transaction bytes it can put on the wire,
/// and the sender identity for event lookups.
pub trait TransactionSigner: Send + Sync {
    fn sender(&self) -> Address;

    /// Produce the signed BCS transaction bytes for an entry call against
    /// the given module address.
    #[allow(async_fn_in_trait)]
    async fn sign_entry_call(
        &self,
        module_address: &Address,
        call: &EntryCall,
    ) -> GatewayResult<Vec<u8>>;
}

/// Signer for read-only gateways. Any attempt to submit fails before
/// reaching the network.
#[derive(Clone, Copy, Debug)]
pub struct NoSigner;

impl TransactionSigner for NoSigner {
    fn sender(&self) -> Address {
        "0x0".parse().expect("static address")
    }

    async fn sign_entry_call(
        &self,
        _module_address: &Address,
        _call: &EntryCall,
    ) -> GatewayResult<Vec<u8>> {
        Err(GatewayError::submission(
            "no signing context configured for this gateway",
        ))
    }
}

/// Configuration for [RestGateway].
#[derive(Clone, Debug)]
pub struct RestGatewayConfig {
    /// Root of the node's REST API including the version segment,
    /// e.g. `https://fullnode.devnet.aptoslabs.com/v1/`.
    pub node_url: Url,
    /// Account the poll module is published under.
    pub module_address: Address,
    /// Per-request timeout for submissions and reads.
    pub request_timeout: Duration,
    /// Upper bound on a single confirmation wait. On expiry the outcome
    /// of the submitted call is unknown.
    pub confirmation_timeout: Duration,
}

impl RestGatewayConfig {
    pub fn new(node_url: Url, module_address: Address) -> Self {
        RestGatewayConfig {
            node_url,
            module_address,
            request_timeout: Duration::from_secs(10),
            confirmation_timeout: Duration::from_secs(30),
        }
    }
}

/// [Ledger] implementation over a fullnode REST API.
pub struct RestGateway<S> {
    http: Client,
    config: RestGatewayConfig,
    signer: S,
}

impl<S: TransactionSigner> RestGateway<S> {
    pub fn new(mut config: RestGatewayConfig, signer: S) -> GatewayResult<Self> {
        // Url::join drops the last path segment unless the base ends in a
        // slash, which would silently strip the version segment.
        if !config.node_url.path().ends_with('/') {
            let path = format!("{}/", config.node_url.path());
            config.node_url.set_path(&path);
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let http = ClientBuilder::new()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        Ok(RestGateway {
            http,
            config,
            signer,
        })
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    fn url(&self, path: &str) -> GatewayResult<Url> {
        self.config
            .node_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| GatewayError::transport(format!("invalid url path {path}: {e}")))
    }

    fn qualified(&self, function: &str) -> String {
        format!(
            "{}::{}::{}",
            self.config.module_address, LEDGER_MODULE, function
        )
    }

    async fn check_status(&self, response: Response) -> GatewayResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::transport(format!(
            "node returned {status}: {body}"
        )))
    }
}

impl RestGateway<NoSigner> {
    /// Build a gateway that can only read. Queries and event lookups work;
    /// submissions fail locally.
    pub fn read_only(config: RestGatewayConfig) -> GatewayResult<Self> {
        Self::new(config, NoSigner)
    }
}

#[derive(serde::Deserialize)]
struct SubmittedTx {
    hash: String,
}

#[derive(serde::Deserialize)]
struct ConfirmedTx {
    success: bool,
    vm_status: String,
}

#[derive(serde::Deserialize)]
struct RawEvent {
    data: RawEventData,
}

#[derive(serde::Deserialize)]
struct RawEventData {
    creator: Address,
    poll_id: serde_json::Value,
}

impl<S: TransactionSigner> Ledger for RestGateway<S> {
    async fn submit(&self, call: &EntryCall) -> GatewayResult<TxHandle> {
        let bytes = self
            .signer
            .sign_entry_call(&self.config.module_address, call)
            .await?;

        let url = self.url("transactions")?;
        tracing::debug!("Submitting {} to {url}", call.function());

        let response = self
            .http
            .post(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x.aptos.signed_transaction+bcs",
            )
            .body(bytes)
            .send()
            .await
            .map_err(|e| GatewayError::submission(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::submission(format!(
                "node rejected submission with {status}: {body}"
            )));
        }

        let submitted: SubmittedTx = response
            .json()
            .await
            .map_err(|e| GatewayError::submission(format!("malformed submission response: {e}")))?;
        Ok(TxHandle(submitted.hash))
    }

    async fn await_confirmation(&self, tx: &TxHandle) -> GatewayResult<()> {
        let url = self.url(&format!("transactions/wait_by_hash/{tx}"))?;
        let response = self
            .http
            .get(url)
            .timeout(self.config.confirmation_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::ConfirmationTimeout
                } else {
                    GatewayError::transport(e.to_string())
                }
            })?;

        // The node long-polls; 404 after the wait window means it never
        // saw the transaction land, which is still an unknown outcome.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::ConfirmationTimeout);
        }
        let response = self.check_status(response).await?;

        let confirmed: ConfirmedTx = response
            .json()
            .await
            .map_err(|e| GatewayError::transport(format!("malformed transaction record: {e}")))?;
        if confirmed.success {
            return Ok(());
        }
        match abort_code_from_vm_status(&confirmed.vm_status) {
            Some(code) => Err(GatewayError::Rejected(AbortReason::from_code(code))),
            None => Err(GatewayError::transport(format!(
                "transaction failed without an abort code: {}",
                confirmed.vm_status
            ))),
        }
    }

    async fn view(&self, query: &ViewQuery) -> GatewayResult<serde_json::Value> {
        let url = self.url("view")?;
        let body = serde_json::json!({
            "function": self.qualified(query.function()),
            "type_arguments": [],
            "arguments": query.arguments(),
        });

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        let response = self.check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::transport(format!("malformed view response: {e}")))
    }

    async fn poll_created_events(
        &self,
        creator: &Address,
        range: EventRange,
    ) -> GatewayResult<Vec<PollCreatedEvent>> {
        let handle = format!("{}::{}::VotingEvents", self.config.module_address, LEDGER_MODULE);
        let url = self.url(&format!(
            "accounts/{creator}/events/{handle}/poll_created_events"
        ))?;

        let mut request = self.http.get(url).query(&[("limit", range.limit)]);
        if let Some(start) = range.start {
            request = request.query(&[("start", start)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        let response = self.check_status(response).await?;
        let raw: Vec<RawEvent> = response
            .json()
            .await
            .map_err(|e| GatewayError::transport(format!("malformed event response: {e}")))?;

        raw.into_iter()
            .map(|event| {
                let poll_id = json_u64(&event.data.poll_id).ok_or_else(|| {
                    GatewayError::transport(format!(
                        "event carries a malformed poll id: {}",
                        event.data.poll_id
                    ))
                })?;
                Ok(PollCreatedEvent {
                    creator: event.data.creator,
                    poll_id: PollId(poll_id),
                })
            })
            .collect()
    }
}

/// Extract a Move abort code from a `vm_status` string such as
/// `"Move abort in 0xcafe::voting: 0x5"` or `"ABORTED with code 7 in …"`.
fn abort_code_from_vm_status(vm_status: &str) -> Option<u64> {
    fn parse_num(token: &str) -> Option<u64> {
        match token.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => token.parse().ok(),
        }
    }

    if vm_status.contains("Move abort") {
        return parse_num(vm_status.rsplit(':').next()?.trim());
    }
    if let Some(idx) = vm_status.find("code ") {
        return parse_num(vm_status[idx + "code ".len()..].split_whitespace().next()?);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_abort_codes() {
        assert_eq!(
            abort_code_from_vm_status("Move abort in 0xcafe::voting: 0x5"),
            Some(5)
        );
        assert_eq!(
            abort_code_from_vm_status("Move abort in 0xcafe::voting: 0x10"),
            Some(16)
        );
    }

    #[test]
    fn parses_decimal_abort_codes() {
        assert_eq!(
            abort_code_from_vm_status("ABORTED with code 7 in 0xcafe::voting"),
            Some(7)
        );
    }

    #[test]
    fn ignores_non_abort_statuses() {
        assert_eq!(abort_code_from_vm_status("Executed successfully"), None);
        assert_eq!(
            abort_code_from_vm_status("Out of gas at instruction 99"),
            None
        );
    }

    #[test]
    fn malformed_abort_yields_none() {
        assert_eq!(abort_code_from_vm_status("Move abort in x: garbage"), None);
    }
}
