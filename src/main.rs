use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use ynab_reconcile::{
    format_milliunits, parse_money_cell, parse_statement, reconcile, Milliunits,
    ReconciliationPlan, YnabClient, DEFAULT_BASE_URL, DEFAULT_CUTOFF_DAYS,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("budgets") => run_list_budgets().await,
        Some("accounts") => {
            let budget_id = args
                .get(2)
                .context("usage: ynab-reconcile accounts <budget-id>")?;
            run_list_accounts(budget_id).await
        }
        Some("reconcile") => {
            let options = ReconcileOptions::parse(&args[2..])?;
            run_reconcile(options).await
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("ynab-reconcile {}", ynab_reconcile::VERSION);
    println!();
    println!("Usage:");
    println!("  ynab-reconcile budgets");
    println!("  ynab-reconcile accounts <budget-id>");
    println!("  ynab-reconcile reconcile <statement.csv> <budget-id> <account-id>");
    println!("      [--cutoff-days N] [--bank-balance AMOUNT] [--submit]");
    println!();
    println!("The YNAB personal access token is read from YNAB_TOKEN.");
    println!("--bank-balance is only needed when the statement has no final-saldo row.");
}

fn make_client() -> Result<YnabClient> {
    let token = env::var("YNAB_TOKEN").context("YNAB_TOKEN is not set")?;
    let base_url = env::var("YNAB_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    Ok(YnabClient::with_base_url(token, base_url))
}

struct ReconcileOptions {
    statement_path: String,
    budget_id: String,
    account_id: String,
    cutoff_days: i64,
    bank_balance: Option<Milliunits>,
    submit: bool,
}

impl ReconcileOptions {
    fn parse(args: &[String]) -> Result<Self> {
        let mut positional = Vec::new();
        let mut cutoff_days = DEFAULT_CUTOFF_DAYS;
        let mut bank_balance = None;
        let mut submit = false;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--cutoff-days" => {
                    let value = iter.next().context("--cutoff-days needs a value")?;
                    cutoff_days = value
                        .parse()
                        .with_context(|| format!("bad --cutoff-days value {:?}", value))?;
                }
                "--bank-balance" => {
                    let value = iter.next().context("--bank-balance needs a value")?;
                    bank_balance = Some(
                        parse_money_cell(value)
                            .with_context(|| format!("bad --bank-balance value {:?}", value))?,
                    );
                }
                "--submit" => submit = true,
                other if other.starts_with("--") => bail!("unknown option {}", other),
                other => positional.push(other.to_string()),
            }
        }

        if positional.len() != 3 {
            bail!("usage: ynab-reconcile reconcile <statement.csv> <budget-id> <account-id>");
        }
        let mut positional = positional.into_iter();
        Ok(ReconcileOptions {
            statement_path: positional.next().unwrap(),
            budget_id: positional.next().unwrap(),
            account_id: positional.next().unwrap(),
            cutoff_days,
            bank_balance,
            submit,
        })
    }
}

async fn run_list_budgets() -> Result<()> {
    let client = make_client()?;
    let budgets = client.get_budgets().await?;

    println!("Budgets ({}):", budgets.len());
    for budget in budgets {
        println!(
            "  {}  {}  ({} .. {})",
            budget.id, budget.name, budget.first_month, budget.last_month
        );
    }
    Ok(())
}

async fn run_list_accounts(budget_id: &str) -> Result<()> {
    let client = make_client()?;
    let accounts = client.get_accounts(budget_id).await?;

    println!("Accounts ({}):", accounts.len());
    for account in accounts {
        let flags = if account.closed { " [closed]" } else { "" };
        println!(
            "  {}  {}  balance {}{}",
            account.id,
            account.name,
            format_milliunits(account.balance),
            flags
        );
    }
    Ok(())
}

async fn run_reconcile(options: ReconcileOptions) -> Result<()> {
    println!("Reconciliation: statement vs. YNAB account");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Parse the bank statement
    let raw = std::fs::read(Path::new(&options.statement_path))
        .with_context(|| format!("failed to read {}", options.statement_path))?;
    let statement = parse_statement(&raw)?;
    println!(
        "\nStatement: {} transactions from the {}",
        statement.transactions.len(),
        statement.source.name()
    );

    let bank_balance = match statement.final_balance.or(options.bank_balance) {
        Some(balance) => balance,
        None => bail!(
            "statement has no final-saldo row; pass the current bank balance with --bank-balance"
        ),
    };
    println!("Bank balance: {}", format_milliunits(bank_balance));

    // 2. Fetch ledger state
    let client = make_client()?;
    let ledger_balance = client
        .get_balance(&options.budget_id, &options.account_id)
        .await?;
    let ledger_transactions = client
        .get_transactions(&options.budget_id, &options.account_id, None)
        .await?;
    println!(
        "Ledger: {} transactions, balance {}",
        ledger_transactions.len(),
        format_milliunits(ledger_balance)
    );

    // 3. Reconcile
    let plan = reconcile(
        &statement.transactions,
        &ledger_transactions,
        bank_balance,
        ledger_balance,
        &options.account_id,
        options.cutoff_days,
    );
    print_plan(&plan, bank_balance);

    // 4. Optionally submit the additions
    if options.submit {
        submit_plan(&client, &options.budget_id, &plan).await?;
    } else if !plan.to_add.is_empty() {
        println!("\nRe-run with --submit to create the {} missing transactions.", plan.to_add.len());
    }

    Ok(())
}

fn print_plan(plan: &ReconciliationPlan, bank_balance: Milliunits) {
    println!("\nPlan: {}", plan.summary());

    if !plan.to_add.is_empty() {
        println!("\nMissing from the ledger (to add):");
        for draft in &plan.to_add {
            println!(
                "  {}  {:>12}  {}",
                draft.date,
                format_milliunits(draft.amount),
                draft.payee_name.as_deref().unwrap_or("")
            );
        }
    }

    if !plan.to_delete.is_empty() {
        println!("\nNo longer backed by the bank (to delete):");
        for tx in &plan.to_delete {
            println!(
                "  {}  {:>12}  {}",
                tx.date,
                format_milliunits(tx.amount),
                tx.payee_name.as_deref().unwrap_or("")
            );
        }
        println!("\n⚠ Deleting ledger transactions is not supported here.");
        println!("  Remove the entries above manually in YNAB before reconciling there.");
    }

    let adjusted = bank_balance + plan.balance_delta;
    println!("\nProjected ledger balance after the plan: {}", format_milliunits(adjusted));
    println!("Difference vs. bank balance: {}", format_milliunits(plan.balance_delta));
    if plan.reconciliation_possible {
        println!("✓ Balances line up - reconciliation is possible.");
    } else {
        println!("✗ Balances do not line up - review the plan before trusting it.");
    }
}

async fn submit_plan(
    client: &YnabClient,
    budget_id: &str,
    plan: &ReconciliationPlan,
) -> Result<()> {
    if plan.to_add.is_empty() {
        println!("\nNothing to submit.");
        return Ok(());
    }

    println!("\nSubmitting {} transactions...", plan.to_add.len());
    let result = client.add_transactions(budget_id, &plan.to_add).await?;

    if result.is_success {
        println!(
            "✓ Created {} transactions.",
            result.number_of_transactions.unwrap_or(0)
        );
    } else {
        bail!(
            "ledger rejected the submission: {}",
            result.error_msg.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}
