//! End-to-end run over a realistic workspace snapshot: decode, expand,
//! reconcile, filter, roll up.

use cashplan_engine::journal::Scope;
use cashplan_engine::model::{Issue, OrderRecord, Position, RowStatus};
use cashplan_engine::{build_journal, monthly, Journal, JournalQuery, Snapshot};

const SNAPSHOT: &str = include_str!("fixtures/snapshot.json");

fn run(query: &JournalQuery) -> Journal {
    let snap = Snapshot::from_json_str(SNAPSHOT).unwrap();
    let settings = snap.settings().unwrap();
    let orders: Vec<OrderRecord> = snap.all_orders().into_iter().cloned().collect();
    build_journal(
        &orders,
        &snap.payments,
        &snap.supplier_names(),
        &settings,
        query,
    )
}

#[test]
fn full_journal_from_snapshot() {
    let journal = run(&JournalQuery::default());
    assert!(journal.validations.is_empty(), "fixture milestones sum to 100");

    // PO 2025-014 contributes 6 reconcilable rows (deposit, balance,
    // duty, EUSt, freight, refund; FX fees stay internal), the
    // forecast order one more.
    assert_eq!(journal.rows.len(), 7);

    let deposit = &journal.rows[0];
    assert_eq!(deposit.row_id, "pay_1#po_1:m1");
    assert_eq!(deposit.position, Position::Deposit);
    assert_eq!(deposit.status, RowStatus::Paid);
    assert_eq!(deposit.planned_cents, -105_522);
    assert_eq!(deposit.actual_cents, Some(-105_522));
    assert_eq!(deposit.paid_date.map(|d| d.to_string()), Some("2025-02-24".into()));
    assert_eq!(deposit.month, "2025-02");
    assert_eq!(deposit.supplier, "Shenzhen Electronics Co.");
    assert!(deposit.issues.is_empty());

    // Remaining rows are open, in effective-date order.
    let dates: Vec<String> = journal.rows[1..]
        .iter()
        .map(|r| r.effective_date().unwrap().to_string())
        .collect();
    assert_eq!(
        dates,
        vec!["2025-03-10", "2025-04-22", "2025-06-21", "2025-06-21", "2025-07-05", "2025-08-31"]
    );
    assert!(journal.rows[1..].iter().all(|r| r.status == RowStatus::Open));

    // Forecast order: direct EUR goods value, unknown supplier id kept as-is.
    let fo = &journal.rows[1];
    assert_eq!(fo.planned_cents, -50_000);
    assert_eq!(fo.supplier, "sup_2");

    let refund = journal.rows.last().unwrap();
    assert_eq!(refund.position, Position::EustErstattung);
    assert_eq!(refund.planned_cents, 78_176);
    assert!(refund.issues.contains(&Issue::AutoGenerated));
}

#[test]
fn scope_and_month_filters() {
    let paid = run(&JournalQuery { scope: Scope::Paid, month: None });
    assert_eq!(paid.rows.len(), 1);

    let open = run(&JournalQuery { scope: Scope::Open, month: None });
    assert_eq!(open.rows.len(), 6);

    // The deposit was paid in February; its due month (February too)
    // plays no role once PAID.
    let feb = run(&JournalQuery { scope: Scope::Both, month: Some("2025-02".into()) });
    assert_eq!(feb.rows.len(), 1);
    assert_eq!(feb.rows[0].row_id, "pay_1#po_1:m1");

    let june = run(&JournalQuery { scope: Scope::Both, month: Some("2025-06".into()) });
    assert_eq!(june.rows.len(), 2);
}

#[test]
fn repeated_runs_are_identical() {
    let key = |j: &Journal| -> Vec<(String, i64, Option<i64>, String)> {
        j.rows
            .iter()
            .map(|r| (r.row_id.clone(), r.planned_cents, r.actual_cents, r.month.clone()))
            .collect()
    };
    assert_eq!(key(&run(&JournalQuery::default())), key(&run(&JournalQuery::default())));
}

#[test]
fn monthly_rollup_over_the_journal() {
    let journal = run(&JournalQuery::default());
    let buckets = monthly::rollup(&journal.rows);
    assert_eq!(buckets.len(), 6);

    for bucket in &buckets {
        assert_eq!(bucket.planned_net_cents, bucket.planned_in_cents - bucket.planned_out_cents);
        assert_eq!(bucket.actual_net_cents, bucket.actual_in_cents - bucket.actual_out_cents);
    }

    let feb = buckets.iter().find(|b| b.month == "2025-02").unwrap();
    assert_eq!(feb.actual_out_cents, 105_522);

    let aug = buckets.iter().find(|b| b.month == "2025-08").unwrap();
    assert_eq!(aug.planned_in_cents, 78_176);
    assert_eq!(aug.actual_in_cents, 0, "refund not yet received");
}
