// Ledger client - YNAB REST API v1
//
// Thin async HTTPS adapter: bearer-token auth, `{"data": ...}` response
// envelopes, no internal retries. Every failure is surfaced to the caller
// with context; the presentation layer decides what to do with it.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::models::{
    Account, Budget, Milliunits, SaveTransactionsResult, TransactionDraft, YnabTransaction,
};

pub const DEFAULT_BASE_URL: &str = "https://api.ynab.com/v1";

pub struct YnabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl YnabClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL.to_string())
    }

    /// Alternate base URL, for tests and self-hosted proxies.
    pub fn with_base_url(token: String, base_url: String) -> Self {
        YnabClient {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(path);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("GET {} returned a non-JSON body", url))?;

        if !status.is_success() {
            return Err(anyhow!(
                "ledger api error on GET {}: status={} detail={}",
                url,
                status.as_u16(),
                error_detail(&body).unwrap_or_else(|| "unknown".to_string())
            ));
        }
        Ok(body)
    }

    /// Retrieve the list of budgets.
    pub async fn get_budgets(&self) -> Result<Vec<Budget>> {
        let body = self.get("/budgets", &[]).await?;
        let envelope: BudgetsEnvelope =
            serde_json::from_value(body).context("budgets response decode failed")?;
        debug!(count = envelope.data.budgets.len(), "fetched budgets");
        Ok(envelope.data.budgets)
    }

    /// Retrieve the accounts of a budget.
    pub async fn get_accounts(&self, budget_id: &str) -> Result<Vec<Account>> {
        let body = self
            .get(&format!("/budgets/{}/accounts", budget_id), &[])
            .await?;
        let envelope: AccountsEnvelope =
            serde_json::from_value(body).context("accounts response decode failed")?;
        debug!(count = envelope.data.accounts.len(), "fetched accounts");
        Ok(envelope.data.accounts)
    }

    /// Retrieve the current balance of one account, in milliunits.
    pub async fn get_balance(&self, budget_id: &str, account_id: &str) -> Result<Milliunits> {
        let body = self
            .get(
                &format!("/budgets/{}/accounts/{}", budget_id, account_id),
                &[],
            )
            .await?;
        let envelope: AccountEnvelope =
            serde_json::from_value(body).context("account response decode failed")?;
        Ok(envelope.data.account.balance)
    }

    /// Retrieve the transactions of one account, optionally only those on or
    /// after `since_date`.
    pub async fn get_transactions(
        &self,
        budget_id: &str,
        account_id: &str,
        since_date: Option<NaiveDate>,
    ) -> Result<Vec<YnabTransaction>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(since) = since_date {
            query.push(("since_date", since.format("%Y-%m-%d").to_string()));
        }

        let body = self
            .get(
                &format!("/budgets/{}/accounts/{}/transactions", budget_id, account_id),
                &query,
            )
            .await?;
        let envelope: TransactionsEnvelope =
            serde_json::from_value(body).context("transactions response decode failed")?;
        debug!(
            count = envelope.data.transactions.len(),
            "fetched ledger transactions"
        );
        Ok(envelope.data.transactions)
    }

    /// Submit new transactions to the ledger. API-side rejection is reported
    /// through the result, not as an `Err` - only transport and decoding
    /// failures are hard errors.
    pub async fn add_transactions(
        &self,
        budget_id: &str,
        drafts: &[TransactionDraft],
    ) -> Result<SaveTransactionsResult> {
        let url = self.url(&format!("/budgets/{}/transactions", budget_id));
        let payload = SaveTransactionsPayload {
            transactions: drafts,
        };

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("POST {} returned a non-JSON body", url))?;

        let result = interpret_save_response(&body);
        info!(
            is_success = result.is_success,
            created = ?result.number_of_transactions,
            "submitted transactions"
        );
        Ok(result)
    }
}

/// Map the save-transactions response body onto a result: a `data` object
/// means the ledger accepted the batch, anything else is a rejection whose
/// detail lives under `error.detail`.
fn interpret_save_response(body: &Value) -> SaveTransactionsResult {
    if let Some(data) = body.get("data") {
        let transaction_ids: Vec<String> = data
            .get("transaction_ids")
            .and_then(|v| v.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        return SaveTransactionsResult {
            is_success: true,
            number_of_transactions: Some(transaction_ids.len()),
            transaction_ids: Some(transaction_ids),
            error_msg: None,
        };
    }

    SaveTransactionsResult {
        is_success: false,
        number_of_transactions: None,
        transaction_ids: None,
        error_msg: error_detail(body),
    }
}

fn error_detail(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.get("detail"))
        .and_then(|d| d.as_str())
        .map(|s| s.to_string())
}

// ============================================================================
// WIRE ENVELOPES
// ============================================================================

#[derive(Serialize)]
struct SaveTransactionsPayload<'a> {
    transactions: &'a [TransactionDraft],
}

#[derive(Deserialize)]
struct BudgetsEnvelope {
    data: BudgetsData,
}

#[derive(Deserialize)]
struct BudgetsData {
    budgets: Vec<Budget>,
}

#[derive(Deserialize)]
struct AccountsEnvelope {
    data: AccountsData,
}

#[derive(Deserialize)]
struct AccountsData {
    accounts: Vec<Account>,
}

#[derive(Deserialize)]
struct AccountEnvelope {
    data: AccountData,
}

#[derive(Deserialize)]
struct AccountData {
    account: Account,
}

#[derive(Deserialize)]
struct TransactionsEnvelope {
    data: TransactionsData,
}

#[derive(Deserialize)]
struct TransactionsData {
    transactions: Vec<YnabTransaction>,
}

// ============================================================================
// TESTS (no network - envelope decoding and response interpretation only)
// ============================================================================
