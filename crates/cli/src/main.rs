// cashplan CLI - headless journal runs over workspace snapshots

mod exit_codes;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use cashplan_engine::expand::{self, ValidationReport};
use cashplan_engine::model::{Cents, JournalRow, RowStatus};
use cashplan_engine::monthly::{self, MonthBucket};
use cashplan_engine::{build_journal, JournalQuery, Scope, Settings, Snapshot};

use exit_codes::{
    EXIT_IO, EXIT_SETTINGS_PARSE, EXIT_SNAPSHOT_PARSE, EXIT_SUCCESS, EXIT_USAGE, EXIT_VALIDATION,
};

#[derive(Parser)]
#[command(name = "cashplan")]
#[command(about = "Purchase-order cash-flow planning (journal runs, headless)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand orders, reconcile payments, and print the journal
    #[command(after_help = "\
Examples:
  cashplan run workspace.json
  cashplan run workspace.json --settings settings.toml --json
  cashplan run workspace.json --scope open --month 2025-06 --csv
  cashplan run workspace.json --monthly --csv -o rollup.csv")]
    Run {
        /// Workspace snapshot JSON (orders, payments, lookups)
        snapshot: PathBuf,

        /// Settings TOML; wins over settings embedded in the snapshot
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Row scope
        #[arg(long, value_enum, default_value = "both")]
        scope: ScopeArg,

        /// Only rows whose effective month matches (YYYY-MM)
        #[arg(long, value_name = "YYYY-MM")]
        month: Option<String>,

        /// JSON to stdout instead of the human summary
        #[arg(long)]
        json: bool,

        /// CSV to stdout instead of the human summary
        #[arg(long)]
        csv: bool,

        /// Print the monthly rollup instead of journal rows
        #[arg(long)]
        monthly: bool,

        /// Write machine output to a file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Check settings and milestone invariants without printing a journal
    #[command(after_help = "\
Examples:
  cashplan validate workspace.json
  cashplan validate workspace.json --settings settings.toml")]
    Validate {
        /// Workspace snapshot JSON
        snapshot: PathBuf,

        /// Settings TOML; wins over settings embedded in the snapshot
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Paid,
    Open,
    Both,
}

impl From<ScopeArg> for Scope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Paid => Scope::Paid,
            ScopeArg::Open => Scope::Open,
            ScopeArg::Both => Scope::Both,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { snapshot, settings, scope, month, json, csv, monthly, output } => {
            cmd_run(snapshot, settings, scope, month, json, csv, monthly, output)
        }
        Commands::Validate { snapshot, settings } => cmd_validate(snapshot, settings),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }
}

// =============================================================================
// Input loading
// =============================================================================

/// Load the snapshot and resolve settings. A `--settings` file wins
/// over settings embedded in the snapshot; with neither, defaults.
fn load_inputs(
    snapshot_path: &Path,
    settings_path: Option<&Path>,
) -> Result<(Snapshot, Settings), CliError> {
    let raw = std::fs::read_to_string(snapshot_path)
        .map_err(|e| CliError::io(format!("cannot read {}: {e}", snapshot_path.display())))?;
    let snapshot = Snapshot::from_json_str(&raw).map_err(|e| CliError {
        code: EXIT_SNAPSHOT_PARSE,
        message: e.to_string(),
        hint: None,
    })?;

    let settings = match settings_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| CliError::io(format!("cannot read {}: {e}", path.display())))?;
            Settings::from_toml(&raw).map_err(|e| CliError {
                code: EXIT_SETTINGS_PARSE,
                message: e.to_string(),
                hint: None,
            })?
        }
        None => snapshot.settings().map_err(|e| CliError {
            code: EXIT_SETTINGS_PARSE,
            message: e.to_string(),
            hint: Some("snapshot-embedded settings are malformed; pass --settings".into()),
        })?,
    };

    Ok((snapshot, settings))
}

// =============================================================================
// run
// =============================================================================

#[derive(serde::Serialize)]
struct RunReport<'a> {
    engine_version: &'a str,
    rows: &'a [JournalRow],
    validations: &'a [ValidationReport],
    #[serde(skip_serializing_if = "Option::is_none")]
    monthly: Option<&'a [MonthBucket]>,
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    snapshot_path: PathBuf,
    settings_path: Option<PathBuf>,
    scope: ScopeArg,
    month: Option<String>,
    json_output: bool,
    csv_output: bool,
    monthly_output: bool,
    output_file: Option<PathBuf>,
) -> Result<(), CliError> {
    if json_output && csv_output {
        return Err(CliError::usage("--json and --csv are mutually exclusive"));
    }
    if let Some(month) = &month {
        if !is_month(month) {
            return Err(CliError::usage(format!("--month must be YYYY-MM, got \"{month}\"")));
        }
    }

    let (snapshot, settings) = load_inputs(&snapshot_path, settings_path.as_deref())?;
    let orders: Vec<_> = snapshot.all_orders().into_iter().cloned().collect();
    let query = JournalQuery { scope: scope.into(), month };
    let journal = build_journal(
        &orders,
        &snapshot.payments,
        &snapshot.supplier_names(),
        &settings,
        &query,
    );

    let buckets = monthly_output.then(|| monthly::rollup(&journal.rows));

    let machine = if csv_output || (output_file.is_some() && !json_output) {
        Some(match &buckets {
            Some(buckets) => monthly_csv(buckets)?,
            None => journal_csv(&journal.rows)?,
        })
    } else if json_output || output_file.is_some() {
        let report = RunReport {
            engine_version: env!("CARGO_PKG_VERSION"),
            rows: &journal.rows,
            validations: &journal.validations,
            monthly: buckets.as_deref(),
        };
        Some(
            serde_json::to_string_pretty(&report)
                .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?,
        )
    } else {
        None
    };

    if let Some(machine) = machine {
        match &output_file {
            Some(path) => {
                std::fs::write(path, &machine)
                    .map_err(|e| CliError::io(format!("cannot write {}: {e}", path.display())))?;
                eprintln!("wrote {}", path.display());
            }
            None => println!("{machine}"),
        }
    }

    // Human summary to stderr
    for validation in &journal.validations {
        for message in &validation.messages {
            eprintln!("warning: {message}");
        }
    }
    let paid = journal.rows.iter().filter(|r| r.status == RowStatus::Paid).count();
    let planned: Cents = journal.rows.iter().map(|r| r.planned_cents).sum();
    let actual: Cents = journal.rows.iter().filter_map(|r| r.actual_cents).sum();
    eprintln!(
        "journal: {} row(s) — {} paid, {} open; planned {} EUR, actual {} EUR",
        journal.rows.len(),
        paid,
        journal.rows.len() - paid,
        eur(planned),
        eur(actual),
    );

    Ok(())
}

// =============================================================================
// validate
// =============================================================================

fn cmd_validate(
    snapshot_path: PathBuf,
    settings_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let (snapshot, settings) = load_inputs(&snapshot_path, settings_path.as_deref())?;

    let mut findings = 0usize;
    for order in snapshot.all_orders() {
        let expansion = expand::expand(order, &settings);
        for message in &expansion.validation.messages {
            eprintln!("finding: {message}");
            findings += 1;
        }
    }

    if findings > 0 {
        return Err(CliError {
            code: EXIT_VALIDATION,
            message: format!("{findings} validation finding(s)"),
            hint: None,
        });
    }

    eprintln!(
        "valid: {} order(s), {} payment(s), fx rate {}, EUSt {}%",
        snapshot.all_orders().len(),
        snapshot.payments.len(),
        settings.fx_rate,
        settings.eust_rate_percent,
    );
    Ok(())
}

// =============================================================================
// Output rendering
// =============================================================================

fn is_month(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return false;
    }
    if !bytes.iter().enumerate().all(|(i, b)| i == 4 || b.is_ascii_digit()) {
        return false;
    }
    matches!(value[5..7].parse::<u8>(), Ok(1..=12))
}

/// Cents to a plain decimal string, sign preserved.
fn eur(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn opt_date(date: Option<chrono::NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_default()
}

fn journal_csv(rows: &[JournalRow]) -> Result<String, CliError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "month", "entity", "number", "supplier", "sku", "position", "label", "status",
            "due_date", "paid_date", "planned_eur", "actual_eur", "payment_id", "issues",
        ])
        .map_err(|e| CliError::io(e.to_string()))?;
    for row in rows {
        let issues: Vec<String> = row.issues.iter().map(ToString::to_string).collect();
        let record = vec![
            row.month.clone(),
            row.entity.to_string(),
            row.number.clone(),
            row.supplier.clone(),
            row.sku.clone(),
            row.position.to_string(),
            row.position_label.clone(),
            row.status.to_string(),
            opt_date(row.due_date),
            opt_date(row.paid_date),
            eur(row.planned_cents),
            row.actual_cents.map(eur).unwrap_or_default(),
            row.payment_id.clone().unwrap_or_default(),
            issues.join("|"),
        ];
        writer
            .write_record(&record)
            .map_err(|e| CliError::io(e.to_string()))?;
    }
    finish_csv(writer)
}

fn monthly_csv(buckets: &[MonthBucket]) -> Result<String, CliError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "month", "planned_in", "planned_out", "planned_net", "actual_in", "actual_out",
            "actual_net", "rows",
        ])
        .map_err(|e| CliError::io(e.to_string()))?;
    for bucket in buckets {
        let record = vec![
            bucket.month.clone(),
            eur(bucket.planned_in_cents),
            eur(bucket.planned_out_cents),
            eur(bucket.planned_net_cents),
            eur(bucket.actual_in_cents),
            eur(bucket.actual_out_cents),
            eur(bucket.actual_net_cents),
            bucket.row_count.to_string(),
        ];
        writer
            .write_record(&record)
            .map_err(|e| CliError::io(e.to_string()))?;
    }
    finish_csv(writer)
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<String, CliError> {
    let bytes = writer
        .into_inner()
        .map_err(|e| CliError::io(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CliError::io(e.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
