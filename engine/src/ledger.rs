//! Boundary to the external ledger: payment resolution, reserve balance
//! queries, and payout submission. The engine never constructs or signs
//! transactions itself; it only asks the ledger service to do so and treats
//! every timeout as a retryable failure, never as success.

use burnflip_types::LedgerError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// One transfer inside a resolved payment.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TransferRecord {
    pub destination: String,
    pub amount: u64,
}

/// A payment resolved from its external reference.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ResolvedPayment {
    /// The contributing party, as parsed from the transaction.
    pub sender: String,
    /// Whether the payment settled without an on-ledger error.
    pub succeeded: bool,
    pub transfers: Vec<TransferRecord>,
}

/// Trait for interacting with the ledger service.
pub trait LedgerClient: Send + Sync + 'static {
    /// Resolve a payment by its external reference. `Ok(None)` means the
    /// payment is not yet visible; the caller may retry later.
    fn resolve_payment(
        &self,
        reference: &str,
    ) -> impl Future<Output = Result<Option<ResolvedPayment>, LedgerError>> + Send;

    /// Spendable balance of `address` in the ledger's smallest unit.
    fn balance(&self, address: &str) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Submit a payout transfer. Returns the external transaction reference.
    /// This is the single point where value leaves custody.
    fn submit_payout(
        &self,
        destination: &str,
        amount: u64,
    ) -> impl Future<Output = Result<String, LedgerError>> + Send;
}

#[derive(Deserialize)]
struct BalanceResponse {
    lamports: u64,
}

#[derive(Serialize)]
struct PayoutRequest<'a> {
    destination: &'a str,
    amount: u64,
}

#[derive(Deserialize)]
struct PayoutResponse {
    reference: String,
}

/// Ledger client speaking JSON over HTTP to the ledger service.
#[derive(Clone)]
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LedgerError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn map_transport(err: reqwest::Error) -> LedgerError {
    if err.is_timeout() {
        LedgerError::Timeout
    } else {
        LedgerError::Unavailable(err.to_string())
    }
}

impl LedgerClient for HttpLedgerClient {
    async fn resolve_payment(
        &self,
        reference: &str,
    ) -> Result<Option<ResolvedPayment>, LedgerError> {
        let url = format!("{}/payments/{}", self.base_url, reference);
        let response = self.client.get(url).send().await.map_err(map_transport)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LedgerError::Unavailable(format!(
                "payment lookup returned {}",
                response.status()
            )));
        }
        let payment = response
            .json::<ResolvedPayment>()
            .await
            .map_err(|err| LedgerError::Malformed(err.to_string()))?;
        Ok(Some(payment))
    }

    async fn balance(&self, address: &str) -> Result<u64, LedgerError> {
        let url = format!("{}/balance/{}", self.base_url, address);
        let response = self.client.get(url).send().await.map_err(map_transport)?;
        if !response.status().is_success() {
            return Err(LedgerError::Unavailable(format!(
                "balance lookup returned {}",
                response.status()
            )));
        }
        let balance = response
            .json::<BalanceResponse>()
            .await
            .map_err(|err| LedgerError::Malformed(err.to_string()))?;
        Ok(balance.lamports)
    }

    async fn submit_payout(&self, destination: &str, amount: u64) -> Result<String, LedgerError> {
        let url = format!("{}/transfers", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&PayoutRequest {
                destination,
                amount,
            })
            .send()
            .await
            .map_err(map_transport)?;
        if !response.status().is_success() {
            return Err(LedgerError::Unavailable(format!(
                "payout submission returned {}",
                response.status()
            )));
        }
        let payout = response
            .json::<PayoutResponse>()
            .await
            .map_err(|err| LedgerError::Malformed(err.to_string()))?;
        Ok(payout.reference)
    }
}
