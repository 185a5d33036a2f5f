// Statement importer - MBank transaction-history CSV exports
//
// Two export flavours reach this code:
//   * the web-application export, UTF-8 encoded
//   * the mobile-application export, Windows-1250 encoded
// Both wrap the semicolon-delimited transaction table in a preamble of
// metadata lines; the table starts at the `#Data operacji` header and may be
// terminated by a `#Saldo końcowe` row carrying the bank-reported final
// balance.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use encoding_rs::WINDOWS_1250;
use tracing::{debug, info};

use crate::models::{BankTransaction, Milliunits};

const HEADER_MARKER: &str = "#Data operacji";
const FINAL_BALANCE_MARKER: &str = "#Saldo końcowe";

const DATE_COLUMN: &str = "#Data operacji";
const DESCRIPTION_COLUMN: &str = "#Opis operacji";
const AMOUNT_COLUMN: &str = "#Kwota";

const CURRENCY_SUFFIX: &str = "PLN";

/// Which application produced the export, deduced from the encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementSource {
    WebApp,
    MobileApp,
}

impl StatementSource {
    pub fn name(&self) -> &str {
        match self {
            StatementSource::WebApp => "web application (UTF-8)",
            StatementSource::MobileApp => "mobile application (Windows-1250)",
        }
    }
}

/// Result of parsing one statement file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    pub transactions: Vec<BankTransaction>,
    /// Bank-reported balance after the last listed transaction, when the
    /// export carries a final-saldo row.
    pub final_balance: Option<Milliunits>,
    pub source: StatementSource,
}

/// Parse a raw statement file into bank transactions plus the optional
/// bank-reported final balance.
pub fn parse_statement(raw: &[u8]) -> Result<ParsedStatement> {
    let (text, source) = decode_statement(raw)?;
    let (table_lines, saldo_line, skipped) = extract_table(&text);

    if table_lines.is_empty() {
        bail!(
            "no transaction table found in statement (missing `{}` header line)",
            HEADER_MARKER
        );
    }
    debug!(
        loaded = table_lines.len(),
        skipped,
        source = source.name(),
        has_saldo = saldo_line.is_some(),
        "located transaction table"
    );

    let table = table_lines.join("\n");
    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .has_headers(true)
        .from_reader(table.as_bytes());

    let headers = reader.headers().context("statement header row unreadable")?.clone();
    let date_idx = column_index(&headers, DATE_COLUMN)?;
    let description_idx = column_index(&headers, DESCRIPTION_COLUMN)?;
    let amount_idx = column_index(&headers, AMOUNT_COLUMN)?;

    let mut transactions = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("malformed statement row {}", row + 1))?;

        let amount_cell = record.get(amount_idx).unwrap_or("").trim();
        if amount_cell.is_empty() {
            // Pending card operations export without an amount; they are not
            // part of the booked history yet.
            debug!(row = row + 1, "skipping row with blank amount cell");
            continue;
        }

        let date_cell = record.get(date_idx).unwrap_or("").trim();
        let date = NaiveDate::parse_from_str(date_cell, "%Y-%m-%d")
            .with_context(|| format!("bad operation date {:?} in row {}", date_cell, row + 1))?;

        let amount = parse_money_cell(amount_cell)
            .with_context(|| format!("bad amount {:?} in row {}", amount_cell, row + 1))?;

        let description = clean_description(record.get(description_idx).unwrap_or(""));

        transactions.push(BankTransaction::new(date, amount, description));
    }

    let final_balance = saldo_line.map(parse_saldo_line).transpose()?;

    info!(
        count = transactions.len(),
        source = source.name(),
        final_balance = ?final_balance,
        "parsed bank statement"
    );

    Ok(ParsedStatement {
        transactions,
        final_balance,
        source,
    })
}

/// Trial decode: strict UTF-8 first (web export), Windows-1250 second
/// (mobile export).
fn decode_statement(raw: &[u8]) -> Result<(String, StatementSource)> {
    match std::str::from_utf8(raw) {
        Ok(text) => Ok((text.to_string(), StatementSource::WebApp)),
        Err(_) => {
            info!("statement is not valid UTF-8, retrying with Windows-1250");
            let (decoded, _, had_errors) = WINDOWS_1250.decode(raw);
            if had_errors {
                bail!("statement is neither valid UTF-8 nor valid Windows-1250");
            }
            Ok((decoded.into_owned(), StatementSource::MobileApp))
        }
    }
}

/// Slice the decoded text into the transaction table: everything from the
/// header line up to (not including) the final-saldo row. Preamble lines
/// before the header are dropped.
fn extract_table(text: &str) -> (Vec<&str>, Option<&str>, usize) {
    let mut table_lines = Vec::new();
    let mut saldo_line = None;
    let mut header_seen = false;
    let mut skipped = 0usize;

    for line in text.lines() {
        if line.contains(HEADER_MARKER) && !header_seen {
            table_lines.push(line);
            header_seen = true;
            continue;
        }
        if line.contains(FINAL_BALANCE_MARKER) {
            saldo_line = Some(line);
            break;
        }
        if header_seen {
            table_lines.push(line);
        } else {
            skipped += 1;
        }
    }

    (table_lines, saldo_line, skipped)
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .with_context(|| format!("statement table has no `{}` column", name))
}

/// MBank pads the operation description with alignment spaces; everything
/// from the first double-space run on is layout, not content.
fn clean_description(raw: &str) -> String {
    let cell = raw.trim();
    match cell.find("  ") {
        Some(pos) => cell[..pos].trim().to_string(),
        None => cell.to_string(),
    }
}

/// Parse a statement money cell ("1 234,56 PLN", "-45,67") into milliunits.
///
/// Strips the trailing currency suffix, drops grouping spaces (regular and
/// non-breaking), accepts both comma and dot decimal separators, and scales
/// with integer arithmetic only.
pub fn parse_money_cell(cell: &str) -> Result<Milliunits> {
    let mut value = cell.trim();
    if let Some(stripped) = value.strip_suffix(CURRENCY_SUFFIX) {
        value = stripped.trim_end();
    }

    let cleaned: String = value
        .chars()
        .filter(|c| *c != ' ' && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    if digits.is_empty() {
        bail!("empty amount");
    }

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        bail!("empty amount");
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        bail!("non-numeric amount");
    }
    if frac_part.len() > 3 {
        bail!("more than milliunit precision");
    }

    let units: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().context("integer part out of range")?
    };
    let mut frac: i64 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().context("fractional part out of range")?
    };
    for _ in frac_part.len()..3 {
        frac *= 10;
    }

    let magnitude = units
        .checked_mul(1000)
        .and_then(|m| m.checked_add(frac))
        .context("amount out of range")?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// The final-saldo row keeps its amount in the second-to-last field
/// (the line ends with a trailing delimiter).
fn parse_saldo_line(line: &str) -> Result<Milliunits> {
    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() < 2 {
        bail!("final balance row has no amount field: {:?}", line);
    }
    let cell = fields[fields.len() - 2];
    parse_money_cell(cell).with_context(|| format!("bad final balance cell {:?}", cell))
}

// ============================================================================
// TESTS
// ============================================================================
