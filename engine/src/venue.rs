//! Boundary to the swap/burn venue: quote a native-to-token conversion and
//! deliver the output to the burn-receiving account.

use burnflip_types::{BuybackError, LedgerError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// A conversion quote for a fixed input amount.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Quote {
    pub quote_id: String,
    pub amount_in: u64,
    pub expected_out: u64,
}

/// Outcome of an executed swap.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SwapReceipt {
    /// External reference of the swap transaction.
    pub reference: String,
    /// Token amount actually delivered to the destination.
    pub output_amount: u64,
}

/// Trait for interacting with the swap/burn venue.
pub trait SwapVenue: Send + Sync + 'static {
    /// Resolve the burn-receiving account for `token`, creating it on the
    /// ledger if it does not yet exist.
    fn ensure_burn_account(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<String, BuybackError>> + Send;

    /// Request a conversion quote with the given slippage tolerance.
    fn quote(
        &self,
        amount: u64,
        token: &str,
        slippage_bps: u64,
    ) -> impl Future<Output = Result<Quote, BuybackError>> + Send;

    /// Execute a quoted swap with `destination` as the output account.
    fn execute_swap(
        &self,
        quote: &Quote,
        destination: &str,
    ) -> impl Future<Output = Result<SwapReceipt, BuybackError>> + Send;
}

#[derive(Serialize)]
struct EnsureAccountRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct EnsureAccountResponse {
    address: String,
}

#[derive(Serialize)]
struct QuoteRequest<'a> {
    amount: u64,
    token: &'a str,
    slippage_bps: u64,
}

#[derive(Serialize)]
struct SwapRequest<'a> {
    quote_id: &'a str,
    destination: &'a str,
}

/// Swap venue speaking JSON over HTTP.
#[derive(Clone)]
pub struct HttpSwapVenue {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSwapVenue {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BuybackError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BuybackError::Ledger(LedgerError::Unavailable(err.to_string())))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn map_transport(err: reqwest::Error) -> BuybackError {
    if err.is_timeout() {
        BuybackError::Ledger(LedgerError::Timeout)
    } else {
        BuybackError::Ledger(LedgerError::Unavailable(err.to_string()))
    }
}

impl SwapVenue for HttpSwapVenue {
    async fn ensure_burn_account(&self, token: &str) -> Result<String, BuybackError> {
        let url = format!("{}/accounts/ensure", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EnsureAccountRequest { token })
            .send()
            .await
            .map_err(map_transport)?;
        if !response.status().is_success() {
            return Err(BuybackError::AccountSetup(format!(
                "account setup returned {}",
                response.status()
            )));
        }
        let account = response
            .json::<EnsureAccountResponse>()
            .await
            .map_err(|err| BuybackError::AccountSetup(err.to_string()))?;
        Ok(account.address)
    }

    async fn quote(
        &self,
        amount: u64,
        token: &str,
        slippage_bps: u64,
    ) -> Result<Quote, BuybackError> {
        let url = format!("{}/quote", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&QuoteRequest {
                amount,
                token,
                slippage_bps,
            })
            .send()
            .await
            .map_err(map_transport)?;
        if !response.status().is_success() {
            return Err(BuybackError::QuoteUnavailable);
        }
        response
            .json::<Quote>()
            .await
            .map_err(|_| BuybackError::QuoteUnavailable)
    }

    async fn execute_swap(&self, quote: &Quote, destination: &str) -> Result<SwapReceipt, BuybackError> {
        let url = format!("{}/swap", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&SwapRequest {
                quote_id: &quote.quote_id,
                destination,
            })
            .send()
            .await
            .map_err(map_transport)?;
        if !response.status().is_success() {
            return Err(BuybackError::SwapFailed(format!(
                "swap submission returned {}",
                response.status()
            )));
        }
        response
            .json::<SwapReceipt>()
            .await
            .map_err(|err| BuybackError::SwapFailed(err.to_string()))
    }
}
