use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::model::{Anchor, OrderRecord};
use crate::settings::{BlackoutWindow, Settings};

/// The four temporal anchors of an order. Any of them may be absent
/// (malformed order date, zero information); events anchored on an
/// absent anchor are skipped, never fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anchors {
    pub order_date: Option<NaiveDate>,
    pub prod_done: Option<NaiveDate>,
    pub etd: Option<NaiveDate>,
    pub eta: Option<NaiveDate>,
}

impl Anchors {
    pub fn get(&self, anchor: Anchor) -> Option<NaiveDate> {
        match anchor {
            Anchor::OrderDate => self.order_date,
            Anchor::ProdDone => self.prod_done,
            Anchor::Etd => self.etd,
            Anchor::Eta => self.eta,
        }
    }
}

/// Resolve all anchors for one order.
///
/// `prod_done` walks forward one day at a time from the order date;
/// days inside a configured blackout window extend the walk instead of
/// consuming production budget. Manual ETD/ETA always win over the
/// computed values.
pub fn resolve(order: &OrderRecord, settings: &Settings) -> Anchors {
    let body = order.body();

    let order_date = body.order_date;
    let prod_done =
        order_date.and_then(|d| walk_production(d, body.prod_days, &settings.blackouts));

    // Each anchor resolves independently: a manual ETD still anchors
    // events even when the order date itself is malformed.
    let etd = body.manual_etd.or(prod_done);
    let eta = body.manual_eta.or_else(|| {
        etd.and_then(|d| d.checked_add_days(chrono::Days::new(body.transit_days.max(0) as u64)))
    });

    Anchors {
        order_date,
        prod_done,
        etd,
        eta,
    }
}

/// Walk `prod_days` working days forward from `start`, day by day.
/// Blackout days (inclusive window ends, looked up per current year)
/// are stepped over without decrementing the remaining budget, so an
/// overlap of N days pushes completion out by exactly N days. The walk
/// crosses year boundaries.
fn walk_production(
    start: NaiveDate,
    prod_days: i64,
    blackouts: &BTreeMap<i32, BlackoutWindow>,
) -> Option<NaiveDate> {
    let mut day = start;
    let mut remaining = prod_days.max(0);

    while remaining > 0 {
        day = day.succ_opt()?;
        let blackout = blackouts
            .get(&day.year())
            .map(|w| w.contains(day))
            .unwrap_or(false);
        if !blackout {
            remaining -= 1;
        }
    }
    Some(day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderBody, OrderRecord};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn order(order_date: Option<&str>, prod_days: i64, transit_days: i64) -> OrderRecord {
        OrderRecord::Po(OrderBody {
            id: "po_1".into(),
            number: "2025-001".into(),
            supplier: String::new(),
            sku: String::new(),
            order_date: order_date.map(date),
            goods_value_cents: 409000,
            goods_value_eur_cents: None,
            currency: "USD".into(),
            fx_rate: None,
            prod_days,
            transport_mode: Default::default(),
            transit_days,
            manual_etd: None,
            manual_eta: None,
            ddp: false,
            freight_cents: 0,
            duty_rate_override: None,
            eust_rate_override: None,
            milestones: vec![],
            auto_events: vec![],
            payment_log: vec![],
        })
    }

    fn blackout(year: i32, start: &str, end: &str) -> BTreeMap<i32, BlackoutWindow> {
        BTreeMap::from([(year, BlackoutWindow { start: date(start), end: date(end) })])
    }

    #[test]
    fn plain_walk_without_blackout() {
        let anchors = resolve(&order(Some("2025-02-21"), 60, 60), &Settings::default());
        assert_eq!(anchors.prod_done, Some(date("2025-04-22")));
        assert_eq!(anchors.etd, Some(date("2025-04-22")));
        assert_eq!(anchors.eta, Some(date("2025-06-21")));
    }

    #[test]
    fn blackout_extends_completion_by_overlap() {
        let mut settings = Settings::default();
        settings.blackouts = blackout(2025, "2025-01-05", "2025-01-07");
        let anchors = resolve(&order(Some("2025-01-01"), 10, 0), &settings);
        // 10 production days + 3 blackout days stepped over.
        assert_eq!(anchors.prod_done, Some(date("2025-01-14")));
    }

    #[test]
    fn blackout_outside_window_is_ignored() {
        let mut settings = Settings::default();
        settings.blackouts = blackout(2025, "2025-06-01", "2025-06-10");
        let anchors = resolve(&order(Some("2025-01-01"), 10, 0), &settings);
        assert_eq!(anchors.prod_done, Some(date("2025-01-11")));
    }

    #[test]
    fn blackout_walk_crosses_year_boundary() {
        let mut settings = Settings::default();
        settings.blackouts = BTreeMap::from([
            (2026, BlackoutWindow { start: date("2026-01-01"), end: date("2026-01-03") }),
        ]);
        // 5 days from Dec 29: Dec 30, Dec 31, then Jan 1-3 skipped, Jan 4-6 count.
        let anchors = resolve(&order(Some("2025-12-29"), 5, 0), &settings);
        assert_eq!(anchors.prod_done, Some(date("2026-01-06")));
    }

    #[test]
    fn manual_overrides_always_win() {
        let mut rec = order(Some("2025-02-21"), 60, 60);
        if let OrderRecord::Po(body) = &mut rec {
            body.manual_etd = Some(date("2025-05-01"));
            body.manual_eta = Some(date("2025-07-15"));
        }
        let anchors = resolve(&rec, &Settings::default());
        assert_eq!(anchors.etd, Some(date("2025-05-01")));
        assert_eq!(anchors.eta, Some(date("2025-07-15")));
        // prod_done stays computed.
        assert_eq!(anchors.prod_done, Some(date("2025-04-22")));
    }

    #[test]
    fn manual_etd_feeds_computed_eta() {
        let mut rec = order(Some("2025-02-21"), 60, 10);
        if let OrderRecord::Po(body) = &mut rec {
            body.manual_etd = Some(date("2025-05-01"));
        }
        let anchors = resolve(&rec, &Settings::default());
        assert_eq!(anchors.eta, Some(date("2025-05-11")));
    }

    #[test]
    fn missing_order_date_yields_null_anchors() {
        let anchors = resolve(&order(None, 60, 60), &Settings::default());
        assert!(anchors.order_date.is_none());
        assert!(anchors.prod_done.is_none());
        assert!(anchors.etd.is_none());
        assert!(anchors.eta.is_none());
    }
}
