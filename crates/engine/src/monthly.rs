//! Calendar-month rollup over reconciled journal rows.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{Cents, JournalRow, RowStatus};

/// Planned and actual totals for one calendar month, split by flow
/// direction. Inflow and outflow are magnitudes; net is signed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonthBucket {
    pub month: String,
    pub planned_in_cents: Cents,
    pub planned_out_cents: Cents,
    pub planned_net_cents: Cents,
    pub actual_in_cents: Cents,
    pub actual_out_cents: Cents,
    pub actual_net_cents: Cents,
    pub row_count: usize,
}

/// Group rows by effective month and total them. Rows without an
/// effective date have no month and are left out. Paid rows without a
/// recorded actual contribute their planned amount to the actual
/// column, matching the row-level substitute.
pub fn rollup(rows: &[JournalRow]) -> Vec<MonthBucket> {
    let mut buckets: BTreeMap<String, MonthBucket> = BTreeMap::new();

    for row in rows {
        if row.month.is_empty() {
            continue;
        }
        let bucket = buckets
            .entry(row.month.clone())
            .or_insert_with(|| MonthBucket {
                month: row.month.clone(),
                ..MonthBucket::default()
            });
        bucket.row_count += 1;
        add(row.planned_cents, &mut bucket.planned_in_cents, &mut bucket.planned_out_cents);
        if row.status == RowStatus::Paid {
            let actual = row.actual_cents.unwrap_or(row.planned_cents);
            add(actual, &mut bucket.actual_in_cents, &mut bucket.actual_out_cents);
        }
    }

    let mut out: Vec<MonthBucket> = buckets.into_values().collect();
    for bucket in &mut out {
        bucket.planned_net_cents = bucket.planned_in_cents - bucket.planned_out_cents;
        bucket.actual_net_cents = bucket.actual_in_cents - bucket.actual_out_cents;
    }
    out
}

fn add(amount: Cents, inflow: &mut Cents, outflow: &mut Cents) {
    if amount >= 0 {
        *inflow += amount;
    } else {
        *outflow += -amount;
    }
}
