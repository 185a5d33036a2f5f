// Domain models shared by the importer, the reconciler and the YNAB client.
//
// Every monetary amount in the system is an integer number of milliunits
// (1000 milliunits = 1.00 currency unit). Decimal strings are converted at
// the importer/UI boundary only; past that boundary no floats exist.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Integer currency amount: 1000 milliunits = 1.00 unit.
pub type Milliunits = i64;

/// Render milliunits as a human-readable decimal string ("-45.67").
///
/// Presentation only. Statement exports carry two decimal places, so the
/// third milliunit digit is dropped here.
pub fn format_milliunits(amount: Milliunits) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.abs();
    format!("{}{}.{:02}", sign, abs / 1000, (abs % 1000) / 10)
}

// ============================================================================
// CLEARED STATE
// ============================================================================

/// Ledger transaction status. `Reconciled` entries are locked and
/// bank-confirmed; the reconciler never reclassifies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearedState {
    Uncleared,
    Cleared,
    Reconciled,
}

impl ClearedState {
    pub fn is_reconciled(&self) -> bool {
        matches!(self, ClearedState::Reconciled)
    }
}

// ============================================================================
// LEDGER CATALOG (budgets and accounts, as served by the YNAB API)
// ============================================================================

/// YNAB account type, tagged with the API's camelCase wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountType {
    Checking,
    Savings,
    CreditCard,
    Cash,
    LineOfCredit,
    OtherAsset,
    OtherLiability,
    Mortgage,
    InvestmentAccount,
    StudentLoan,
    CarLoan,
    PersonalLoan,
    MedicalDebt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: String,
    pub name: String,
    pub first_month: NaiveDate,
    pub last_month: NaiveDate,
    pub last_modified_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub balance: Milliunits,
    pub cleared_balance: Milliunits,
    pub uncleared_balance: Milliunits,
    pub on_budget: bool,
    pub closed: bool,
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// One row of a parsed bank statement.
///
/// Identity for matching purposes is the (date, amount) pair; the
/// description is informational only and never compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub date: NaiveDate,
    pub amount: Milliunits,
    pub description: String,
}

impl BankTransaction {
    pub fn new(date: NaiveDate, amount: Milliunits, description: String) -> Self {
        BankTransaction {
            date,
            amount,
            description,
        }
    }

    /// The pair the reconciler matches on.
    pub fn matching_key(&self) -> (NaiveDate, Milliunits) {
        (self.date, self.amount)
    }
}

/// A transaction as recorded in the ledger. Fetched read-only; the
/// reconciler classifies these but never mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YnabTransaction {
    pub id: String,
    pub date: NaiveDate,
    pub amount: Milliunits,
    pub memo: Option<String>,
    pub cleared: ClearedState,
    pub approved: bool,
    pub payee_name: Option<String>,
    pub category_name: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl YnabTransaction {
    pub fn matching_key(&self) -> (NaiveDate, Milliunits) {
        (self.date, self.amount)
    }
}

/// A transaction to be created in the ledger. Built by the reconciler from
/// an unmatched bank transaction, submitted by the client. Optional fields
/// are left off the wire entirely when unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub account_id: String,
    pub date: NaiveDate,
    pub amount: Milliunits,
    pub cleared: ClearedState,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_id: Option<String>,
}

impl TransactionDraft {
    /// Draft a ledger entry for a bank transaction with no ledger-side
    /// match. The bank description becomes the payee name; the entry starts
    /// uncleared and unapproved so the user reviews it in the ledger.
    pub fn from_bank(account_id: &str, bank: &BankTransaction) -> Self {
        TransactionDraft {
            account_id: account_id.to_string(),
            date: bank.date,
            amount: bank.amount,
            cleared: ClearedState::Uncleared,
            approved: false,
            payee_id: None,
            payee_name: Some(bank.description.clone()),
            category_id: None,
            memo: None,
            import_id: None,
        }
    }
}

/// Outcome of submitting drafts to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveTransactionsResult {
    pub is_success: bool,
    pub number_of_transactions: Option<usize>,
    pub transaction_ids: Option<Vec<String>>,
    pub error_msg: Option<String>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_state_wire_names_are_lowercase() {
        let parsed: ClearedState = serde_json::from_str("\"reconciled\"").unwrap();
        assert_eq!(parsed, ClearedState::Reconciled);
        assert_eq!(
            serde_json::to_string(&ClearedState::Uncleared).unwrap(),
            "\"uncleared\""
        );
    }

    #[test]
    fn account_type_uses_camel_case_wire_names() {
        let parsed: AccountType = serde_json::from_str("\"creditCard\"").unwrap();
        assert_eq!(parsed, AccountType::CreditCard);
        let parsed: AccountType = serde_json::from_str("\"otherLiability\"").unwrap();
        assert_eq!(parsed, AccountType::OtherLiability);
    }

    #[test]
    fn draft_serialization_omits_unset_fields() {
        let bank = BankTransaction::new(
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            -45670,
            "BIEDRONKA 123".to_string(),
        );
        let draft = TransactionDraft::from_bank("acct-1", &bank);

        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["account_id"], "acct-1");
        assert_eq!(json["date"], "2025-03-14");
        assert_eq!(json["amount"], -45670);
        assert_eq!(json["cleared"], "uncleared");
        assert_eq!(json["approved"], false);
        assert_eq!(json["payee_name"], "BIEDRONKA 123");
        // None fields must not appear at all
        assert!(json.get("payee_id").is_none());
        assert!(json.get("category_id").is_none());
        assert!(json.get("memo").is_none());
        assert!(json.get("import_id").is_none());
    }

    #[test]
    fn format_milliunits_handles_signs_and_zero_padding() {
        assert_eq!(format_milliunits(1_234_560), "1234.56");
        assert_eq!(format_milliunits(-2_000), "-2.00");
        assert_eq!(format_milliunits(50), "0.05");
        assert_eq!(format_milliunits(0), "0.00");
    }
}
