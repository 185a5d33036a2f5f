// ynab-reconcile - Web Server
// Web-form presentation: upload a statement, review the plan, submit additions

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::env;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use ynab_reconcile::{
    format_milliunits, parse_money_cell, parse_statement, reconcile, Milliunits,
    ReconciliationPlan, TransactionDraft, YnabClient, YnabTransaction, DEFAULT_BASE_URL,
    DEFAULT_CUTOFF_DAYS,
};

/// One successfully reconciled upload. Acts as the cache between the
/// reconcile and submit steps; replaced wholesale by the next reconcile.
struct Session {
    token: String,
    budget_id: String,
    plan: ReconciliationPlan,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    session: Arc<Mutex<Option<Session>>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// One plan row, pre-formatted for the page
#[derive(Serialize)]
struct EntryResponse {
    date: String,
    amount: Milliunits,
    amount_display: String,
    payee: String,
}

impl From<&YnabTransaction> for EntryResponse {
    fn from(tx: &YnabTransaction) -> Self {
        Self {
            date: tx.date.to_string(),
            amount: tx.amount,
            amount_display: format_milliunits(tx.amount),
            payee: tx.payee_name.clone().unwrap_or_default(),
        }
    }
}

impl From<&TransactionDraft> for EntryResponse {
    fn from(draft: &TransactionDraft) -> Self {
        Self {
            date: draft.date.to_string(),
            amount: draft.amount,
            amount_display: format_milliunits(draft.amount),
            payee: draft.payee_name.clone().unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct PlanResponse {
    to_keep: Vec<EntryResponse>,
    to_delete: Vec<EntryResponse>,
    to_add: Vec<EntryResponse>,
    reconciliation_possible: bool,
    balance_delta: Milliunits,
    balance_delta_display: String,
    bank_balance_display: String,
    projected_balance_display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

impl PlanResponse {
    fn new(plan: &ReconciliationPlan, bank_balance: Milliunits) -> Self {
        let warning = if plan.has_deletions() {
            Some(format!(
                "{} ledger transactions lost bank-side support. Deleting is not \
                 supported here - remove them manually in YNAB.",
                plan.to_delete.len()
            ))
        } else {
            None
        };

        Self {
            to_keep: plan.to_keep.iter().map(EntryResponse::from).collect(),
            to_delete: plan.to_delete.iter().map(EntryResponse::from).collect(),
            to_add: plan.to_add.iter().map(EntryResponse::from).collect(),
            reconciliation_possible: plan.reconciliation_possible,
            balance_delta: plan.balance_delta,
            balance_delta_display: format_milliunits(plan.balance_delta),
            bank_balance_display: format_milliunits(bank_balance),
            projected_balance_display: format_milliunits(bank_balance + plan.balance_delta),
            warning,
        }
    }
}

#[derive(Serialize)]
struct SubmitResponse {
    created: usize,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// Collected fields of one reconcile form upload
#[derive(Default)]
struct ReconcileForm {
    token: String,
    budget_id: String,
    account_id: String,
    cutoff_days: Option<i64>,
    bank_balance: Option<String>,
    statement: Vec<u8>,
}

async fn read_form(mut multipart: Multipart) -> anyhow::Result<ReconcileForm> {
    use anyhow::Context;

    let mut form = ReconcileForm::default();
    while let Some(field) = multipart.next_field().await.context("broken form upload")? {
        match field.name().unwrap_or("") {
            "token" => form.token = field.text().await?,
            "budget_id" => form.budget_id = field.text().await?,
            "account_id" => form.account_id = field.text().await?,
            "cutoff_days" => {
                let text = field.text().await?;
                if !text.trim().is_empty() {
                    form.cutoff_days =
                        Some(text.trim().parse().context("cutoff days must be a number")?);
                }
            }
            "bank_balance" => {
                let text = field.text().await?;
                if !text.trim().is_empty() {
                    form.bank_balance = Some(text);
                }
            }
            "statement" => form.statement = field.bytes().await?.to_vec(),
            _ => {}
        }
    }

    if form.token.is_empty() || form.budget_id.is_empty() || form.account_id.is_empty() {
        anyhow::bail!("token, budget id and account id are all required");
    }
    if form.statement.is_empty() {
        anyhow::bail!("no statement file uploaded");
    }
    Ok(form)
}

fn make_client(token: String) -> YnabClient {
    let base_url = env::var("YNAB_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    YnabClient::with_base_url(token, base_url)
}

/// POST /api/reconcile - run the fetch → parse → reconcile pipeline.
///
/// Session state is only replaced after every step succeeded; any failure
/// leaves the previous reconcile available for retry.
async fn reconcile_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> impl IntoResponse {
    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<PlanResponse>::err(e.to_string())),
            );
        }
    };

    match run_pipeline(&form).await {
        Ok((plan, bank_balance)) => {
            let response = PlanResponse::new(&plan, bank_balance);
            let mut session = state.session.lock().unwrap();
            *session = Some(Session {
                token: form.token,
                budget_id: form.budget_id,
                plan,
            });
            (StatusCode::OK, Json(ApiResponse::ok(response)))
        }
        Err(e) => {
            eprintln!("Error reconciling upload: {:#}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ApiResponse::err(format!("{:#}", e))),
            )
        }
    }
}

async fn run_pipeline(form: &ReconcileForm) -> anyhow::Result<(ReconciliationPlan, Milliunits)> {
    use anyhow::Context;

    let statement = parse_statement(&form.statement)?;

    let bank_balance = match &form.bank_balance {
        Some(text) => Some(parse_money_cell(text).context("bad bank balance value")?),
        None => None,
    };
    let bank_balance = statement
        .final_balance
        .or(bank_balance)
        .context("statement has no final-saldo row; enter the bank balance in the form")?;

    let client = make_client(form.token.clone());
    let ledger_balance = client
        .get_balance(&form.budget_id, &form.account_id)
        .await?;
    let ledger_transactions = client
        .get_transactions(&form.budget_id, &form.account_id, None)
        .await?;

    let plan = reconcile(
        &statement.transactions,
        &ledger_transactions,
        bank_balance,
        ledger_balance,
        &form.account_id,
        form.cutoff_days.unwrap_or(DEFAULT_CUTOFF_DAYS),
    );

    Ok((plan, bank_balance))
}

/// POST /api/submit - create the additions from the cached plan
async fn submit_plan(State(state): State<AppState>) -> impl IntoResponse {
    // Clone what we need out of the session; the lock must not be held
    // across the network call.
    let (token, budget_id, drafts) = {
        let session = state.session.lock().unwrap();
        match session.as_ref() {
            Some(session) => (
                session.token.clone(),
                session.budget_id.clone(),
                session.plan.to_add.clone(),
            ),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::<SubmitResponse>::err(
                        "no reconciliation plan yet - upload a statement first".to_string(),
                    )),
                );
            }
        }
    };

    if drafts.is_empty() {
        return (
            StatusCode::OK,
            Json(ApiResponse::ok(SubmitResponse { created: 0 })),
        );
    }

    let client = make_client(token);
    match client.add_transactions(&budget_id, &drafts).await {
        Ok(result) if result.is_success => (
            StatusCode::OK,
            Json(ApiResponse::ok(SubmitResponse {
                created: result.number_of_transactions.unwrap_or(0),
            })),
        ),
        Ok(result) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse::err(
                result
                    .error_msg
                    .unwrap_or_else(|| "ledger rejected the submission".to_string()),
            )),
        ),
        Err(e) => {
            eprintln!("Error submitting transactions: {:#}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ApiResponse::err(format!("{:#}", e))),
            )
        }
    }
}

/// GET / - Serve the reconciliation form
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let state = AppState {
        session: Arc::new(Mutex::new(None)),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/reconcile", post(reconcile_upload))
        .route("/submit", post(submit_plan))
        .with_state(state);

    let app = Router::new()
        .route("/", get(serve_index))
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("Reconciliation server running on http://{}", addr);
    println!("Press Ctrl+C to stop");

    axum::serve(listener, app).await?;
    Ok(())
}
