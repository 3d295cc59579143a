use std::collections::BTreeMap;

use serde::Deserialize;

use crate::expand::{self, ValidationReport};
use crate::model::{JournalRow, OrderRecord, Payment, RowStatus};
use crate::payments::PaymentIndex;
use crate::reconcile::{self, ExpandedOrder};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Paid,
    Open,
    Both,
}

impl Default for Scope {
    fn default() -> Self {
        Self::Both
    }
}

/// Filter applied after reconciliation. The month filter compares
/// against the row's effective month (`YYYY-MM`).
#[derive(Debug, Clone, Default)]
pub struct JournalQuery {
    pub scope: Scope,
    pub month: Option<String>,
}

/// The reconciled ledger plus validation findings gathered during
/// expansion.
#[derive(Debug)]
pub struct Journal {
    pub rows: Vec<JournalRow>,
    pub validations: Vec<ValidationReport>,
}

/// Run the full pipeline: anchors → expansion → reconciliation →
/// dedup/filter/sort. Pure; every call rebuilds all derived state from
/// the inputs, so identical inputs give an identical ordered ledger.
pub fn build_journal(
    orders: &[OrderRecord],
    payments: &[Payment],
    supplier_names: &BTreeMap<String, String>,
    settings: &Settings,
    query: &JournalQuery,
) -> Journal {
    let mut expanded = Vec::new();
    let mut validations = Vec::new();

    for order in orders {
        let body = order.body();
        // A record with no identity cannot be reconciled or displayed.
        if body.id.is_empty() {
            continue;
        }
        let expansion = expand::expand(order, settings);
        if !expansion.validation.is_clean() {
            validations.push(expansion.validation.clone());
        }
        let supplier_name = supplier_names
            .get(&body.supplier)
            .cloned()
            .unwrap_or_else(|| body.supplier.clone());
        expanded.push(ExpandedOrder {
            order,
            events: expansion.events,
            supplier_name,
        });
    }

    let index = PaymentIndex::build(payments);
    let rows = reconcile::reconcile(&expanded, &index, settings);

    Journal {
        rows: finalize(rows, query),
        validations,
    }
}

/// Dedup by row identity, apply scope/month filters, impose the total
/// order `(effectiveDate, entityType:number:positionLabel:rowId)`.
pub fn finalize(rows: Vec<JournalRow>, query: &JournalQuery) -> Vec<JournalRow> {
    let mut seen: BTreeMap<String, JournalRow> = BTreeMap::new();
    for row in rows {
        seen.entry(row.row_id.clone()).or_insert(row);
    }

    let mut out: Vec<JournalRow> = seen
        .into_values()
        .filter(|row| match query.scope {
            Scope::Paid => row.status == RowStatus::Paid,
            Scope::Open => row.status == RowStatus::Open,
            Scope::Both => true,
        })
        .filter(|row| match &query.month {
            Some(month) => &row.month == month,
            None => true,
        })
        .collect();

    // Undated rows sort after all dated ones; the string key breaks
    // every remaining tie so the order is total regardless of input
    // ordering.
    out.sort_by(|a, b| {
        let ka = (a.effective_date().is_none(), a.effective_date(), tie_key(a));
        let kb = (b.effective_date().is_none(), b.effective_date(), tie_key(b));
        ka.cmp(&kb)
    });
    out
}

fn tie_key(row: &JournalRow) -> String {
    format!(
        "{}:{}:{}:{}",
        row.entity, row.number, row.position_label, row.row_id
    )
}
