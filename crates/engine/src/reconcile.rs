use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::{
    round_cents, CashEvent, CashEventType, Cents, Issue, JournalRow, OrderRecord, Payment,
    PaymentLogEntry, Position, RowStatus,
};
use crate::payments::PaymentIndex;
use crate::settings::Settings;

/// One order together with its expanded events and resolved display
/// fields, ready for reconciliation.
#[derive(Debug)]
pub struct ExpandedOrder<'a> {
    pub order: &'a OrderRecord,
    pub events: Vec<CashEvent>,
    /// Supplier display name after alias resolution.
    pub supplier_name: String,
}

/// Classify an expected event into a bookkeeper-facing position.
/// `Fx` positions never enter the reconciliation surface.
pub fn classify_position(kind: CashEventType, label: &str) -> Position {
    match kind {
        CashEventType::Fx => Position::Fx,
        CashEventType::Freight => Position::Shipping,
        CashEventType::Duty => Position::Zoll,
        CashEventType::Eust => Position::Eust,
        CashEventType::VatRefund => Position::EustErstattung,
        CashEventType::Po | CashEventType::Fo => {
            let label = label.to_lowercase();
            if label.contains("deposit") || label.contains("anzahlung") {
                Position::Deposit
            } else if label.contains("balance 2") || label.contains("balance2")
                || label.contains("rest 2")
            {
                Position::Balance2
            } else if label.contains("balance") || label.contains("rest")
                || label.contains("schluss")
            {
                Position::Balance
            } else {
                Position::Other
            }
        }
    }
}

/// Reconcile expected events against recorded payments.
///
/// Every non-FX event yields exactly one row; rows sharing a payment
/// are then merged into grouped rows. Ambiguities surface as issue
/// codes, never as errors.
pub fn reconcile(
    orders: &[ExpandedOrder<'_>],
    index: &PaymentIndex<'_>,
    settings: &Settings,
) -> Vec<JournalRow> {
    let logs = LogLookup::build(orders);
    let planned_by_event = planned_map(orders);
    let groups = PaymentGroups::build(orders, &logs, index, settings);

    let mut rows = Vec::new();
    for expanded in orders {
        for event in &expanded.events {
            let position = classify_position(event.kind, &event.label);
            if position == Position::Fx {
                continue;
            }
            rows.push(build_row(
                expanded, event, position, &logs, index, &groups, &planned_by_event, settings,
            ));
        }
    }

    merge_grouped(rows, index, settings)
}

// ---------------------------------------------------------------------------
// Lookups built per invocation
// ---------------------------------------------------------------------------

struct LogLookup<'a> {
    /// Keyed by global event id.
    entries: BTreeMap<String, &'a PaymentLogEntry>,
}

impl<'a> LogLookup<'a> {
    fn build(orders: &[ExpandedOrder<'a>]) -> Self {
        let mut entries = BTreeMap::new();
        for expanded in orders {
            let body = expanded.order.body();
            for entry in &body.payment_log {
                // Log entries use local event ids; tolerate global ones.
                let key = if entry.event_id.contains(':') {
                    entry.event_id.clone()
                } else {
                    CashEvent::make_event_id(&body.id, &entry.event_id)
                };
                entries.entry(key).or_insert(entry);
            }
        }
        Self { entries }
    }

    fn get(&self, event_id: &str) -> Option<&'a PaymentLogEntry> {
        self.entries.get(event_id).copied()
    }
}

fn planned_map(orders: &[ExpandedOrder<'_>]) -> BTreeMap<String, Cents> {
    let mut planned = BTreeMap::new();
    for expanded in orders {
        for event in &expanded.events {
            planned.insert(event.event_id.clone(), event.amount_cents);
        }
    }
    planned
}

/// Events grouped by the payment id their log entry names, with the
/// pro-rata split precomputed for multi-event groups.
struct PaymentGroups {
    /// event id → (allocated cents magnitude, group size).
    allocations: BTreeMap<String, (Cents, usize)>,
}

impl PaymentGroups {
    fn build(
        orders: &[ExpandedOrder<'_>],
        logs: &LogLookup<'_>,
        index: &PaymentIndex<'_>,
        settings: &Settings,
    ) -> Self {
        let mut members: BTreeMap<&str, Vec<(String, Cents)>> = BTreeMap::new();
        for expanded in orders {
            for event in &expanded.events {
                let Some(entry) = logs.get(&event.event_id) else {
                    continue;
                };
                let Some(payment_id) = entry.payment_id.as_deref() else {
                    continue;
                };
                members
                    .entry(payment_id)
                    .or_default()
                    .push((event.event_id.clone(), event.amount_cents.abs()));
            }
        }

        let mut allocations = BTreeMap::new();
        for (payment_id, group) in members {
            let Some(payment) = index.by_id(payment_id) else {
                continue;
            };
            let Some(total) = payment.total_eur_cents(settings.fx_rate) else {
                continue;
            };
            let planned: Vec<Cents> = group.iter().map(|(_, p)| *p).collect();
            let split = allocate_pro_rata(total.abs(), &planned);
            for ((event_id, _), share) in group.iter().zip(split) {
                allocations.insert(event_id.clone(), (share, planned.len()));
            }
        }
        Self { allocations }
    }

    fn share_for(&self, event_id: &str) -> Option<(Cents, usize)> {
        self.allocations.get(event_id).copied()
    }
}

/// Split a payment total across events proportionally to their planned
/// amounts, rounded to the cent, with the rounding remainder corrected
/// onto the largest-planned event so the shares sum exactly to the
/// total. On a tie for largest the last event in expansion order takes
/// the correction.
pub fn allocate_pro_rata(total: Cents, planned: &[Cents]) -> Vec<Cents> {
    if planned.is_empty() {
        return Vec::new();
    }
    let sum: Cents = planned.iter().map(|p| p.abs()).sum();
    if sum == 0 {
        let mut shares = vec![0; planned.len()];
        shares[planned.len() - 1] = total;
        return shares;
    }

    let mut shares: Vec<Cents> = planned
        .iter()
        .map(|p| round_cents(total as f64 * p.abs() as f64 / sum as f64))
        .collect();

    let remainder: Cents = total - shares.iter().sum::<Cents>();
    if remainder != 0 {
        let mut target = 0;
        for (i, p) in planned.iter().enumerate() {
            if p.abs() >= planned[target].abs() {
                target = i;
            }
        }
        shares[target] += remainder;
    }
    shares
}

// ---------------------------------------------------------------------------
// Row construction
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn build_row(
    expanded: &ExpandedOrder<'_>,
    event: &CashEvent,
    position: Position,
    logs: &LogLookup<'_>,
    index: &PaymentIndex<'_>,
    groups: &PaymentGroups,
    planned_by_event: &BTreeMap<String, Cents>,
    settings: &Settings,
) -> JournalRow {
    let body = expanded.order.body();
    let mut issues = Vec::new();
    if event.auto_generated {
        issues.push(Issue::AutoGenerated);
    }

    let log = logs.get(&event.event_id);
    let log_payment = log
        .and_then(|l| l.payment_id.as_deref())
        .and_then(|id| index.by_id(id));
    let allocation = index.allocation_for(&event.event_id);
    let covering = index.covering(&event.event_id);

    let paid = log.map(|l| l.paid).unwrap_or(false)
        || log_payment.is_some()
        || allocation.is_some()
        || covering.is_some();
    let status = if paid { RowStatus::Paid } else { RowStatus::Open };

    let planned = event.amount_cents;
    let sign = if planned < 0 { -1 } else { 1 };

    let actual = if paid {
        resolve_actual(
            event, planned, log, allocation, covering, groups, planned_by_event, settings,
            &mut issues,
        )
        .map(|magnitude| sign * magnitude)
    } else {
        None
    };

    let due_date = Some(event.date);
    let mut paid_date = log
        .and_then(|l| l.paid_date)
        .or_else(|| log_payment.and_then(|p| p.paid_date))
        .or_else(|| allocation.and_then(|(p, _)| p.paid_date))
        .or_else(|| covering.and_then(|p| p.paid_date));

    if paid && paid_date.is_none() {
        if due_date.is_some() {
            issues.push(Issue::DateUncertain);
        } else {
            issues.push(Issue::PaidWithoutDate);
        }
        paid_date = None;
    }

    let payment_id = log
        .and_then(|l| l.payment_id.clone())
        .or_else(|| allocation.map(|(p, _)| p.id.clone()))
        .or_else(|| covering.map(|p| p.id.clone()));

    let mut row = JournalRow {
        row_id: format!("{}#{}", payment_id.as_deref().unwrap_or("-"), event.event_id),
        month: String::new(),
        entity: event.entity,
        number: body.number.clone(),
        supplier: expanded.supplier_name.clone(),
        sku: body.sku.clone(),
        position,
        position_label: event.label.clone(),
        status,
        due_date,
        paid_date,
        planned_cents: planned,
        actual_cents: actual,
        payment_id,
        issues,
    };
    row.month = month_of(row.effective_date());
    row
}

/// Ordered actual-amount strategies; returns a magnitude in cents.
#[allow(clippy::too_many_arguments)]
fn resolve_actual(
    event: &CashEvent,
    planned: Cents,
    log: Option<&PaymentLogEntry>,
    allocation: Option<(&Payment, &crate::model::Allocation)>,
    covering: Option<&Payment>,
    groups: &PaymentGroups,
    planned_by_event: &BTreeMap<String, Cents>,
    settings: &Settings,
    issues: &mut Vec<Issue>,
) -> Option<Cents> {
    // (a) a directly recorded actual amount, when usable.
    if let Some(actual) = log.and_then(|l| l.actual_cents) {
        if actual > 0 || (actual == 0 && planned == 0) {
            return Some(actual.abs());
        }
    }

    // (b) an explicit allocation entry keyed by this event.
    if let Some((_, alloc)) = allocation {
        return Some(alloc.amount_cents.abs());
    }

    // (c)/(d) the payment group this event's log entry points at:
    // full total when alone, pro-rata share otherwise.
    if let Some((share, group_size)) = groups.share_for(&event.event_id) {
        if group_size > 1 {
            issues.push(Issue::ProRataAllocation);
        }
        return Some(share);
    }

    // (e) a payment that declares this event covered.
    if let Some(payment) = covering {
        if let Some(total) = payment.total_eur_cents(settings.fx_rate) {
            let covered = &payment.covered_event_ids;
            if covered.len() <= 1 {
                return Some(total.abs());
            }
            let planned_list: Vec<Cents> = covered
                .iter()
                .map(|id| planned_by_event.get(id).copied().unwrap_or(0).abs())
                .collect();
            let shares = allocate_pro_rata(total.abs(), &planned_list);
            let position = covered.iter().position(|id| id == &event.event_id)?;
            issues.push(Issue::ProRataAllocation);
            return Some(shares[position]);
        }
    }

    // Nothing usable. Substitute the planned amount so the row stays
    // numerically usable downstream, clearly flagged.
    issues.push(Issue::MissingActualAmount);
    if planned != 0 {
        issues.push(Issue::IstFehlt);
        return Some(planned.abs());
    }
    None
}

// ---------------------------------------------------------------------------
// Grouped payments
// ---------------------------------------------------------------------------

/// Merge rows sharing one payment id into a single grouped row.
fn merge_grouped(
    rows: Vec<JournalRow>,
    index: &PaymentIndex<'_>,
    settings: &Settings,
) -> Vec<JournalRow> {
    let mut by_payment: BTreeMap<String, Vec<JournalRow>> = BTreeMap::new();
    let mut singles = Vec::new();

    for row in rows {
        match &row.payment_id {
            Some(id) => by_payment.entry(id.clone()).or_default().push(row),
            None => singles.push(row),
        }
    }

    let mut merged = Vec::new();
    for (payment_id, group) in by_payment {
        if group.len() == 1 {
            merged.extend(group);
            continue;
        }
        merged.push(merge_group(&payment_id, group, index, settings));
    }

    singles.extend(merged);
    singles
}

fn merge_group(
    payment_id: &str,
    group: Vec<JournalRow>,
    index: &PaymentIndex<'_>,
    settings: &Settings,
) -> JournalRow {
    let planned: Cents = group.iter().map(|r| r.planned_cents).sum();
    let sign = if planned < 0 { -1 } else { 1 };

    // The payment's own recorded total wins over summed per-row actuals.
    let actual = index
        .by_id(payment_id)
        .and_then(|p| p.total_eur_cents(settings.fx_rate))
        .map(|total| sign * total.abs())
        .or_else(|| {
            let summed: Option<Vec<Cents>> =
                group.iter().map(|r| r.actual_cents).collect();
            summed.map(|v| v.iter().sum())
        });

    let paid_date = group.iter().filter_map(|r| r.paid_date).min();
    let due_date = group.iter().filter_map(|r| r.due_date).min();
    let status = if group.iter().any(|r| r.status == RowStatus::Paid) {
        RowStatus::Paid
    } else {
        RowStatus::Open
    };

    let mut issues: Vec<Issue> = Vec::new();
    for row in &group {
        for issue in &row.issues {
            if !issues.contains(issue) {
                issues.push(*issue);
            }
        }
    }
    issues.push(Issue::GroupedPayment);

    let position = if group.iter().all(|r| r.position == group[0].position) {
        group[0].position
    } else {
        Position::Other
    };

    let mut row = JournalRow {
        row_id: format!("{payment_id}#*"),
        month: String::new(),
        entity: group[0].entity,
        number: join_first(group.iter().map(|r| r.number.as_str())),
        supplier: join_first(group.iter().map(|r| r.supplier.as_str())),
        sku: join_first(group.iter().map(|r| r.sku.as_str())),
        position,
        position_label: join_first(group.iter().map(|r| r.position_label.as_str())),
        status,
        due_date,
        paid_date,
        planned_cents: planned,
        actual_cents: actual,
        payment_id: Some(payment_id.to_string()),
        issues,
    };
    row.month = month_of(row.effective_date());
    row
}

/// "first value, …" when the field diverges across grouped rows.
fn join_first<'a>(mut values: impl Iterator<Item = &'a str>) -> String {
    let Some(first) = values.next() else {
        return String::new();
    };
    if values.any(|v| v != first) {
        format!("{first}, …")
    } else {
        first.to_string()
    }
}

pub(crate) fn month_of(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m").to_string()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
