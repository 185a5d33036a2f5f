// Reconciliation core - compare a bank statement against ledger state
//
// Given both transaction lists and both balances, produce a plan:
//   - which ledger entries still have bank-side support (keep)
//   - which lost it (delete - classification only, deletion happens in the
//     ledger UI by hand)
//   - which bank transactions are missing from the ledger (add)
//   - whether the projected balances can be made consistent
//
// Pure in-memory computation: no I/O, no shared state, safe to run
// concurrently for independent accounts.

use std::collections::HashSet;

use chrono::{Duration, Local, NaiveDate};
use tracing::debug;

use crate::models::{BankTransaction, Milliunits, TransactionDraft, YnabTransaction};

/// Trailing window, in days, before the oldest open ledger entry from which
/// newly-discovered bank transactions are still considered.
pub const DEFAULT_CUTOFF_DAYS: i64 = 3;

// ============================================================================
// RECONCILIATION PLAN
// ============================================================================

/// The single-shot output of one [`reconcile`] call.
///
/// `to_keep` and `to_delete` partition exactly the non-reconciled subset of
/// the input ledger transactions; reconciled entries are never classified.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReconciliationPlan {
    pub to_keep: Vec<YnabTransaction>,
    pub to_delete: Vec<YnabTransaction>,
    pub to_add: Vec<TransactionDraft>,
    pub reconciliation_possible: bool,
    pub balance_delta: Milliunits,
}

impl ReconciliationPlan {
    /// Deletion is not supported by the ledger API; callers must warn the
    /// user whenever this returns true.
    pub fn has_deletions(&self) -> bool {
        !self.to_delete.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "keep {}, delete {}, add {}, delta {} milliunits, reconciliation {}",
            self.to_keep.len(),
            self.to_delete.len(),
            self.to_add.len(),
            self.balance_delta,
            if self.reconciliation_possible {
                "possible"
            } else {
                "NOT possible"
            }
        )
    }
}

// ============================================================================
// RECONCILE
// ============================================================================

/// Reconcile using today's date as the cutoff anchor of last resort.
///
/// See [`reconcile_as_of`] for the algorithm; this wrapper only supplies the
/// system clock, keeping the inner function deterministic.
pub fn reconcile(
    bank_transactions: &[BankTransaction],
    ledger_transactions: &[YnabTransaction],
    current_bank_balance: Milliunits,
    current_ledger_balance: Milliunits,
    account_id: &str,
    cutoff_days: i64,
) -> ReconciliationPlan {
    reconcile_as_of(
        bank_transactions,
        ledger_transactions,
        current_bank_balance,
        current_ledger_balance,
        account_id,
        cutoff_days,
        Local::now().date_naive(),
    )
}

/// Deterministic reconciliation:
///
/// 1. Partition ledger entries into reconciled / non-reconciled.
/// 2. Anchor the cutoff at the oldest non-reconciled date (falling back to
///    the newest reconciled date, then `today`) minus `cutoff_days`, so bank
///    rows predating all open ledger activity are not reconsidered.
/// 3. Keep every non-reconciled entry with a (date, amount)-equal bank row;
///    mark the rest for deletion.
/// 4. Draft an addition for every bank row on or after the cutoff whose
///    (date, amount) pair is not already recorded (reconciled or kept).
/// 5. Project the ledger balance after applying the plan and compare against
///    the bank balance, truncated to the nearest 10 milliunits.
#[allow(clippy::too_many_arguments)]
pub fn reconcile_as_of(
    bank_transactions: &[BankTransaction],
    ledger_transactions: &[YnabTransaction],
    current_bank_balance: Milliunits,
    current_ledger_balance: Milliunits,
    account_id: &str,
    cutoff_days: i64,
    today: NaiveDate,
) -> ReconciliationPlan {
    // 1. Split ledger transactions by cleared state
    let (reconciled, non_reconciled): (Vec<&YnabTransaction>, Vec<&YnabTransaction>) =
        ledger_transactions
            .iter()
            .partition(|t| t.cleared.is_reconciled());

    debug!(
        non_reconciled = non_reconciled.len(),
        total = ledger_transactions.len(),
        "partitioned ledger transactions"
    );

    // 2. Cutoff date, anchored to the oldest still-open ledger entry
    let anchor = non_reconciled
        .iter()
        .map(|t| t.date)
        .min()
        .or_else(|| reconciled.iter().map(|t| t.date).max())
        .unwrap_or(today);
    let cutoff_date = anchor - Duration::days(cutoff_days);

    debug!(%anchor, %cutoff_date, "cutoff window determined");

    // 3. Classify non-reconciled ledger entries by bank-side support
    let mut to_keep: Vec<YnabTransaction> = Vec::new();
    let mut to_delete: Vec<YnabTransaction> = Vec::new();
    for yt in &non_reconciled {
        let matched = bank_transactions
            .iter()
            .any(|bt| bt.date == yt.date && bt.amount == yt.amount);
        if matched {
            to_keep.push((*yt).clone());
        } else {
            to_delete.push((*yt).clone());
        }
    }

    // 4. Everything already faithfully reflected in the ledger
    let mut already_recorded: HashSet<(NaiveDate, Milliunits)> =
        reconciled.iter().map(|t| t.matching_key()).collect();
    already_recorded.extend(to_keep.iter().map(|t| t.matching_key()));

    // 5. Recent bank rows with no recorded counterpart become drafts
    let to_add: Vec<TransactionDraft> = bank_transactions
        .iter()
        .filter(|bt| bt.date >= cutoff_date)
        .filter(|bt| !already_recorded.contains(&bt.matching_key()))
        .map(|bt| TransactionDraft::from_bank(account_id, bt))
        .collect();

    // 6. Balance projection: what the ledger would hold after the plan
    let deleted_sum: Milliunits = to_delete.iter().map(|t| t.amount).sum();
    let added_sum: Milliunits = to_add.iter().map(|t| t.amount).sum();
    let adjusted_balance = current_ledger_balance - deleted_sum + added_sum;

    // 7. Verdict. The bank export rounds sub-cent amounts, so equality is
    // checked after truncating the projection to the nearest 10 milliunits
    // (floor semantics, also for negative balances).
    let balance_delta = adjusted_balance - current_bank_balance;
    let reconciliation_possible =
        adjusted_balance.div_euclid(10) * 10 == current_bank_balance;

    debug!(
        adjusted_balance,
        deleted_sum, added_sum, balance_delta, "balance projection"
    );

    ReconciliationPlan {
        to_keep,
        to_delete,
        to_add,
        reconciliation_possible,
        balance_delta,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClearedState;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn bank_tx(date: &str, amount: Milliunits) -> BankTransaction {
        BankTransaction::new(d(date), amount, format!("bank row {}", amount))
    }

    fn ledger_tx(
        id: &str,
        date: &str,
        amount: Milliunits,
        cleared: ClearedState,
    ) -> YnabTransaction {
        YnabTransaction {
            id: id.to_string(),
            date: d(date),
            amount,
            memo: None,
            cleared,
            approved: true,
            payee_name: Some("Payee".to_string()),
            category_name: None,
            deleted: false,
        }
    }

    fn run(
        bank: &[BankTransaction],
        ledger: &[YnabTransaction],
        bank_balance: Milliunits,
        ledger_balance: Milliunits,
    ) -> ReconciliationPlan {
        reconcile_as_of(
            bank,
            ledger,
            bank_balance,
            ledger_balance,
            "acct-1",
            DEFAULT_CUTOFF_DAYS,
            d("2025-06-15"),
        )
    }

    #[test]
    fn empty_ledger_single_bank_transaction_becomes_draft() {
        // Scenario: nothing in the ledger, one bank row dated "today"
        let bank = vec![BankTransaction::new(
            d("2025-06-15"),
            5000,
            "COFFEE".to_string(),
        )];
        let plan = run(&bank, &[], 5000, 0);

        assert!(plan.to_keep.is_empty());
        assert!(plan.to_delete.is_empty());
        assert_eq!(plan.to_add.len(), 1);
        assert_eq!(plan.to_add[0].date, d("2025-06-15"));
        assert_eq!(plan.to_add[0].amount, 5000);
        assert_eq!(plan.to_add[0].account_id, "acct-1");
        assert_eq!(plan.to_add[0].cleared, ClearedState::Uncleared);
        assert!(!plan.to_add[0].approved);
        assert_eq!(plan.to_add[0].payee_name.as_deref(), Some("COFFEE"));
    }

    #[test]
    fn matching_ledger_transaction_is_kept() {
        let bank = vec![bank_tx("2025-06-10", -2000)];
        let ledger = vec![ledger_tx("y1", "2025-06-10", -2000, ClearedState::Cleared)];
        let plan = run(&bank, &ledger, -2000, -2000);

        assert_eq!(plan.to_keep.len(), 1);
        assert_eq!(plan.to_keep[0].id, "y1");
        assert!(plan.to_delete.is_empty());
        assert!(plan.to_add.is_empty());
    }

    #[test]
    fn unmatched_ledger_transaction_is_marked_for_deletion() {
        let ledger = vec![ledger_tx("y1", "2025-06-10", -7500, ClearedState::Uncleared)];
        let plan = run(&[], &ledger, 0, 2500);

        assert!(plan.to_keep.is_empty());
        assert_eq!(plan.to_delete.len(), 1);
        assert_eq!(plan.to_delete[0].id, "y1");
        assert!(plan.has_deletions());
        // adjusted = 2500 - (-7500) = 10000; delta against bank 0
        assert_eq!(plan.balance_delta, 10000);
    }

    #[test]
    fn keep_and_delete_partition_the_non_reconciled_set() {
        let bank = vec![bank_tx("2025-06-10", -2000), bank_tx("2025-06-11", 3000)];
        let ledger = vec![
            ledger_tx("y1", "2025-06-10", -2000, ClearedState::Cleared),
            ledger_tx("y2", "2025-06-11", 3000, ClearedState::Uncleared),
            ledger_tx("y3", "2025-06-12", -999, ClearedState::Uncleared),
            ledger_tx("y4", "2025-06-01", -500, ClearedState::Reconciled),
        ];
        let plan = run(&bank, &ledger, 0, 0);

        let mut classified: Vec<&str> = plan
            .to_keep
            .iter()
            .chain(plan.to_delete.iter())
            .map(|t| t.id.as_str())
            .collect();
        classified.sort();
        // exactly the non-reconciled ids, each exactly once
        assert_eq!(classified, vec!["y1", "y2", "y3"]);
        for kept in &plan.to_keep {
            assert!(!plan.to_delete.contains(kept));
        }
    }

    #[test]
    fn reconciled_transactions_are_never_classified_but_block_additions() {
        let bank = vec![bank_tx("2025-06-10", -2000)];
        let ledger = vec![ledger_tx("y1", "2025-06-10", -2000, ClearedState::Reconciled)];
        let plan = run(&bank, &ledger, 0, 0);

        // never in keep/delete...
        assert!(plan.to_keep.is_empty());
        assert!(plan.to_delete.is_empty());
        // ...but its (date, amount) pair keeps the bank row out of to_add
        assert!(plan.to_add.is_empty());
    }

    #[test]
    fn bank_transaction_on_cutoff_date_is_considered() {
        // oldest open ledger entry 2025-06-10 => cutoff 2025-06-07
        let ledger = vec![ledger_tx("y1", "2025-06-10", -2000, ClearedState::Cleared)];
        let bank = vec![bank_tx("2025-06-10", -2000), bank_tx("2025-06-07", 1500)];
        let plan = run(&bank, &ledger, 0, 0);

        assert_eq!(plan.to_add.len(), 1);
        assert_eq!(plan.to_add[0].date, d("2025-06-07"));
    }

    #[test]
    fn bank_transaction_one_day_before_cutoff_is_ignored() {
        let ledger = vec![ledger_tx("y1", "2025-06-10", -2000, ClearedState::Cleared)];
        let bank = vec![bank_tx("2025-06-10", -2000), bank_tx("2025-06-06", 1500)];
        let plan = run(&bank, &ledger, 0, 0);

        assert!(plan.to_add.is_empty());
    }

    #[test]
    fn cutoff_falls_back_to_newest_reconciled_date() {
        // no open entries: anchor = max reconciled date 2025-06-04, cutoff 06-01
        let ledger = vec![
            ledger_tx("y1", "2025-06-01", -100, ClearedState::Reconciled),
            ledger_tx("y2", "2025-06-04", -200, ClearedState::Reconciled),
        ];
        let bank = vec![bank_tx("2025-06-01", 900), bank_tx("2025-05-31", 800)];
        let plan = run(&bank, &ledger, 0, 0);

        assert_eq!(plan.to_add.len(), 1);
        assert_eq!(plan.to_add[0].date, d("2025-06-01"));
    }

    #[test]
    fn cutoff_falls_back_to_today_when_ledger_is_empty() {
        // today = 2025-06-15 => cutoff 2025-06-12
        let bank = vec![bank_tx("2025-06-12", 900), bank_tx("2025-06-11", 800)];
        let plan = run(&bank, &[], 0, 0);

        assert_eq!(plan.to_add.len(), 1);
        assert_eq!(plan.to_add[0].date, d("2025-06-12"));
    }

    #[test]
    fn balance_delta_matches_projection_exactly() {
        // keep y1, delete y2 (-3000), add bank row (+1000)
        let bank = vec![bank_tx("2025-06-10", -2000), bank_tx("2025-06-11", 1000)];
        let ledger = vec![
            ledger_tx("y1", "2025-06-10", -2000, ClearedState::Cleared),
            ledger_tx("y2", "2025-06-12", -3000, ClearedState::Uncleared),
        ];
        let plan = run(&bank, &ledger, 4000, 5000);

        // adjusted = 5000 - (-3000) + 1000 = 9000
        assert_eq!(plan.balance_delta, 9000 - 4000);
        assert!(!plan.reconciliation_possible);
    }

    #[test]
    fn truncation_rule_follows_the_literal_formula() {
        // adjusted 10000 vs bank 10003: floor(10000/10)*10 = 10000 != 10003
        let plan = run(&[], &[], 10003, 10000);
        assert!(!plan.reconciliation_possible);
        assert_eq!(plan.balance_delta, -3);

        // the tolerance runs the other way: adjusted 10003 truncates onto 10000
        let plan = run(&[], &[], 10000, 10003);
        assert!(plan.reconciliation_possible);
        assert_eq!(plan.balance_delta, 3);

        // exact equality also passes
        let plan = run(&[], &[], 10000, 10000);
        assert!(plan.reconciliation_possible);
        assert_eq!(plan.balance_delta, 0);
    }

    #[test]
    fn truncation_floors_negative_balances() {
        // -5 truncates to -10 (floor division), not to 0
        let plan = run(&[], &[], -10, -5);
        assert!(plan.reconciliation_possible);

        let plan = run(&[], &[], 0, -5);
        assert!(!plan.reconciliation_possible);
    }

    #[test]
    fn reconcile_is_idempotent_for_identical_inputs() {
        let bank = vec![bank_tx("2025-06-10", -2000), bank_tx("2025-06-14", 1250)];
        let ledger = vec![
            ledger_tx("y1", "2025-06-10", -2000, ClearedState::Cleared),
            ledger_tx("y2", "2025-06-12", -3000, ClearedState::Uncleared),
            ledger_tx("y3", "2025-06-01", -500, ClearedState::Reconciled),
        ];
        let first = run(&bank, &ledger, 4000, 5000);
        let second = run(&bank, &ledger, 4000, 5000);
        assert_eq!(first, second);
    }

    #[test]
    fn plan_summary_mentions_counts_and_verdict() {
        let ledger = vec![ledger_tx("y1", "2025-06-10", -7500, ClearedState::Uncleared)];
        let plan = run(&[], &ledger, 0, 2500);
        let summary = plan.summary();
        assert!(summary.contains("delete 1"));
        assert!(summary.contains("NOT possible"));
    }
}
