use chrono::{Datelike, Days, Months, NaiveDate};
use serde::Serialize;

use crate::anchors::{self, Anchors};
use crate::model::{
    round_cents, Anchor, AutoEventKind, CashEvent, CashEventType, Cents, EntityKind, OrderBody,
    OrderRecord,
};
use crate::settings::Settings;

/// Tolerance for the milestone-percent sum invariant.
const PERCENT_TOLERANCE: f64 = 1e-6;

/// Validation findings produced alongside expansion. Violations are
/// reportable, never fatal: events for well-formed milestones are still
/// returned.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub order_id: String,
    pub milestone_percent_sum: f64,
    pub messages: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Expansion {
    pub events: Vec<CashEvent>,
    pub validation: ValidationReport,
}

/// Expand one order into dated, signed EUR cash events.
///
/// Pure: the caller's record is never touched, and two calls on
/// identical input yield an identical ordered event list. Events whose
/// anchor cannot be resolved are skipped.
pub fn expand(order: &OrderRecord, settings: &Settings) -> Expansion {
    let body = order.body();
    let anchors = anchors::resolve(order, settings);
    let entity = order.entity();

    let mut events = Vec::new();
    expand_milestones(body, entity, &anchors, settings, &mut events);
    expand_auto_events(body, entity, &anchors, settings, &mut events);

    events.sort_by(|a, b| (a.date, &a.key).cmp(&(b.date, &b.key)));

    Expansion {
        events,
        validation: validate_milestones(body),
    }
}

fn validate_milestones(body: &OrderBody) -> ValidationReport {
    let sum: f64 = body.milestones.iter().map(|m| m.percent).sum();
    let mut messages = Vec::new();

    if !body.milestones.is_empty() && (sum - 100.0).abs() > PERCENT_TOLERANCE {
        messages.push(format!(
            "order '{}': milestone percentages sum to {sum} (expected 100)",
            body.id
        ));
    }
    for m in &body.milestones {
        if !(0.0..=100.0).contains(&m.percent) {
            messages.push(format!(
                "order '{}': milestone '{}' percent {} out of range",
                body.id, m.id, m.percent
            ));
        }
    }

    ValidationReport {
        order_id: body.id.clone(),
        milestone_percent_sum: sum,
        messages,
    }
}

// ---------------------------------------------------------------------------
// Milestones
// ---------------------------------------------------------------------------

fn expand_milestones(
    body: &OrderBody,
    entity: EntityKind,
    anchors: &Anchors,
    settings: &Settings,
    events: &mut Vec<CashEvent>,
) {
    let kind = match entity {
        EntityKind::Po => CashEventType::Po,
        EntityKind::Fo => CashEventType::Fo,
    };
    let fx = body.fx_rate.unwrap_or(settings.fx_rate);

    for m in &body.milestones {
        let Some(date) = anchor_plus_lag(anchors, m.anchor, m.lag_days) else {
            continue;
        };
        let pct = m.percent / 100.0;

        // A direct EUR goods value or an EUR-denominated milestone needs
        // no conversion and carries no FX fee.
        let (amount_cents, source_amount_cents) = if let Some(eur) = body.goods_value_eur_cents {
            (-round_cents(eur as f64 * pct), None)
        } else if m.eur_denominated {
            (-round_cents(body.goods_value_cents as f64 * pct), None)
        } else {
            let source = round_cents(body.goods_value_cents as f64 * pct);
            let eur = round_cents(body.goods_value_cents as f64 * pct * fx);
            (-eur, Some(-source))
        };

        let label = if m.label.is_empty() {
            format!("{}%", m.percent)
        } else {
            m.label.clone()
        };

        events.push(CashEvent {
            key: CashEvent::make_key(date, kind, &body.id, &m.id),
            event_id: CashEvent::make_event_id(&body.id, &m.id),
            order_id: body.id.clone(),
            entity,
            date,
            kind,
            label,
            amount_cents,
            source_amount_cents,
            auto_generated: false,
        });

        // The fee on the conversion is its own signed event at the same
        // date, never folded into the milestone amount.
        if source_amount_cents.is_some() && settings.fx_fee_percent > 0.0 {
            let fee = round_cents(amount_cents.abs() as f64 * settings.fx_fee_percent / 100.0);
            if fee != 0 {
                let local_id = format!("fx-{}", m.id);
                events.push(CashEvent {
                    key: CashEvent::make_key(date, CashEventType::Fx, &body.id, &local_id),
                    event_id: CashEvent::make_event_id(&body.id, &local_id),
                    order_id: body.id.clone(),
                    entity,
                    date,
                    kind: CashEventType::Fx,
                    label: format!("FX-Gebühr {}", m.label),
                    amount_cents: -fee,
                    source_amount_cents: None,
                    auto_generated: true,
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Auto events
// ---------------------------------------------------------------------------

/// Fixed evaluation order. EUSt depends on the duty amount and the VAT
/// refund depends on the EUSt event, so the order is load-bearing.
const AUTO_ORDER: [AutoEventKind; 5] = [
    AutoEventKind::Freight,
    AutoEventKind::Duty,
    AutoEventKind::Eust,
    AutoEventKind::VatRefund,
    AutoEventKind::FxFee,
];

fn expand_auto_events(
    body: &OrderBody,
    entity: EntityKind,
    anchors: &Anchors,
    settings: &Settings,
    events: &mut Vec<CashEvent>,
) {
    let fx = body.fx_rate.unwrap_or(settings.fx_rate);
    let goods_eur: Cents = body
        .goods_value_eur_cents
        .unwrap_or_else(|| round_cents(body.goods_value_cents as f64 * fx));

    let mut duty_cents: Cents = 0;
    let mut duty_date: Option<NaiveDate> = None;
    let mut eust_cents: Cents = 0;
    let mut eust_date: Option<NaiveDate> = None;

    for kind in AUTO_ORDER {
        let Some(ev) = body.auto_events.iter().find(|e| e.kind == kind) else {
            continue;
        };
        if !ev.is_active(body.ddp) {
            continue;
        }

        match kind {
            AutoEventKind::Freight => {
                // Under DDP the supplier carries the freight.
                if body.ddp || body.freight_cents == 0 {
                    continue;
                }
                let anchor = ev.anchor.unwrap_or(Anchor::Eta);
                let Some(date) = anchor_plus_lag(anchors, anchor, settings.freight_lag_days)
                else {
                    continue;
                };
                push_auto(events, body, entity, date, CashEventType::Freight, "freight", "Fracht",
                          -body.freight_cents);
            }
            AutoEventKind::Duty => {
                if body.ddp {
                    continue;
                }
                let anchor = ev.anchor.unwrap_or(Anchor::Eta);
                let Some(date) = anchor_plus_lag(anchors, anchor, ev.lag_days) else {
                    continue;
                };
                let rate = body
                    .duty_rate_override
                    .or(ev.percent)
                    .unwrap_or(settings.duty_rate_percent);
                let mut base = goods_eur;
                if settings.duty_base_includes_freight {
                    base += body.freight_cents;
                }
                let amount = -round_cents(base as f64 * rate / 100.0);
                if amount == 0 {
                    continue;
                }
                duty_cents = amount;
                duty_date = Some(date);
                push_auto(events, body, entity, date, CashEventType::Duty, "duty", "Zoll", amount);
            }
            AutoEventKind::Eust => {
                if body.ddp {
                    continue;
                }
                // Due alongside duty unless the toggle overrides anchor/lag.
                let date = if ev.anchor.is_some() || ev.lag_days != 0 {
                    anchor_plus_lag(anchors, ev.anchor.unwrap_or(Anchor::Eta), ev.lag_days)
                } else {
                    duty_date.or_else(|| anchor_plus_lag(anchors, Anchor::Eta, 0))
                };
                let Some(date) = date else {
                    continue;
                };
                let rate = body
                    .eust_rate_override
                    .or(ev.percent)
                    .unwrap_or(settings.eust_rate_percent);
                // Import VAT base: customs value incl. freight plus duty,
                // unconditionally. The duty_base_includes_freight flag only
                // shapes the duty base, not this one.
                let base = goods_eur + body.freight_cents + duty_cents.abs();
                let amount = -round_cents(base as f64 * rate / 100.0);
                if amount == 0 {
                    continue;
                }
                eust_cents = amount;
                eust_date = Some(date);
                push_auto(events, body, entity, date, CashEventType::Eust, "eust", "EUSt", amount);
            }
            AutoEventKind::VatRefund => {
                if body.ddp || !settings.vat_refund_enabled || eust_cents == 0 {
                    continue;
                }
                let Some(base_date) = eust_date else {
                    continue;
                };
                let Some(date) = end_of_month_after(base_date, settings.vat_refund_lag_months)
                else {
                    continue;
                };
                push_auto(events, body, entity, date, CashEventType::VatRefund, "vat_refund",
                          "EUSt-Erstattung", eust_cents.abs());
            }
            AutoEventKind::FxFee => {
                // Standing FX fee on the converted goods value; applies
                // even under DDP.
                let anchor = ev.anchor.unwrap_or(Anchor::OrderDate);
                let Some(date) = anchor_plus_lag(anchors, anchor, ev.lag_days) else {
                    continue;
                };
                let rate = ev.percent.unwrap_or(settings.fx_fee_percent);
                let amount = -round_cents(goods_eur as f64 * rate / 100.0);
                if amount == 0 {
                    continue;
                }
                push_auto(events, body, entity, date, CashEventType::Fx, "fx_fee", "FX-Gebühr", amount);
            }
        }
    }
}

fn push_auto(
    events: &mut Vec<CashEvent>,
    body: &OrderBody,
    entity: EntityKind,
    date: NaiveDate,
    kind: CashEventType,
    local_id: &str,
    label: &str,
    amount_cents: Cents,
) {
    events.push(CashEvent {
        key: CashEvent::make_key(date, kind, &body.id, local_id),
        event_id: CashEvent::make_event_id(&body.id, local_id),
        order_id: body.id.clone(),
        entity,
        date,
        kind,
        label: label.to_string(),
        amount_cents,
        source_amount_cents: None,
        auto_generated: true,
    });
}

// ---------------------------------------------------------------------------
// Date helpers
// ---------------------------------------------------------------------------

fn anchor_plus_lag(anchors: &Anchors, anchor: Anchor, lag_days: i64) -> Option<NaiveDate> {
    let base = anchors.get(anchor)?;
    if lag_days >= 0 {
        base.checked_add_days(Days::new(lag_days as u64))
    } else {
        base.checked_sub_days(Days::new(lag_days.unsigned_abs()))
    }
}

/// Last calendar day of the month `months` after `date`.
fn end_of_month_after(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    let shifted = date.checked_add_months(Months::new(months))?;
    let (year, month) = if shifted.month() == 12 {
        (shifted.year() + 1, 1)
    } else {
        (shifted.year(), shifted.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.pred_opt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AutoEvent, Milestone, OrderRecord};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn milestone(id: &str, label: &str, percent: f64, anchor: Anchor) -> Milestone {
        Milestone {
            id: id.into(),
            label: label.into(),
            percent,
            anchor,
            lag_days: 0,
            eur_denominated: false,
        }
    }

    fn auto(kind: AutoEventKind) -> AutoEvent {
        AutoEvent {
            kind,
            percent: None,
            lag_days: 0,
            anchor: None,
            enabled: true,
            ddp_disabled: false,
        }
    }

    fn sample_settings() -> Settings {
        let mut s = Settings::default();
        s.fx_rate = 0.86;
        s.fx_fee_percent = 0.5;
        s.duty_rate_percent = 6.5;
        s.duty_base_includes_freight = false;
        s.eust_rate_percent = 19.0;
        s.vat_refund_enabled = true;
        s.vat_refund_lag_months = 2;
        s.freight_lag_days = 14;
        s
    }

    /// Order date 2025-02-21, goods 4090.00 source, 60 prod days,
    /// 60 transit days, freight 368.50 EUR. The worked reference case.
    fn sample_order() -> OrderRecord {
        OrderRecord::Po(OrderBody {
            id: "po_1".into(),
            number: "2025-001".into(),
            supplier: "Shenzhen Electronics".into(),
            sku: "WIDGET-A".into(),
            order_date: Some(date("2025-02-21")),
            goods_value_cents: 409000,
            goods_value_eur_cents: None,
            currency: "USD".into(),
            fx_rate: None,
            prod_days: 60,
            transport_mode: Default::default(),
            transit_days: 60,
            manual_etd: None,
            manual_eta: None,
            ddp: false,
            freight_cents: 36850,
            duty_rate_override: None,
            eust_rate_override: None,
            milestones: vec![
                milestone("m1", "Deposit", 30.0, Anchor::OrderDate),
                milestone("m2", "Balance", 70.0, Anchor::Etd),
            ],
            auto_events: vec![
                auto(AutoEventKind::Freight),
                auto(AutoEventKind::Duty),
                auto(AutoEventKind::Eust),
                auto(AutoEventKind::VatRefund),
            ],
            payment_log: vec![],
        })
    }

    #[test]
    fn reference_order_expands_to_eight_dated_events() {
        let expansion = expand(&sample_order(), &sample_settings());
        assert!(expansion.validation.is_clean());

        let got: Vec<(String, String)> = expansion
            .events
            .iter()
            .map(|e| (e.kind.to_string(), e.date.to_string()))
            .collect();
        let expected = vec![
            ("FX".to_string(), "2025-02-21".to_string()),
            ("PO".to_string(), "2025-02-21".to_string()),
            ("FX".to_string(), "2025-04-22".to_string()),
            ("PO".to_string(), "2025-04-22".to_string()),
            ("DUTY".to_string(), "2025-06-21".to_string()),
            ("EUST".to_string(), "2025-06-21".to_string()),
            ("FREIGHT".to_string(), "2025-07-05".to_string()),
            ("VAT_REFUND".to_string(), "2025-08-31".to_string()),
        ];
        assert_eq!(got, expected);
    }

    #[test]
    fn reference_order_amounts() {
        let expansion = expand(&sample_order(), &sample_settings());
        let by_id: std::collections::HashMap<&str, Cents> = expansion
            .events
            .iter()
            .map(|e| (e.event_id.as_str(), e.amount_cents))
            .collect();

        // 4090.00 × 30% × 0.86 = 1055.22; fee 0.5% = 5.28
        assert_eq!(by_id["po_1:m1"], -105522);
        assert_eq!(by_id["po_1:fx-m1"], -528);
        // 4090.00 × 70% × 0.86 = 2462.18
        assert_eq!(by_id["po_1:m2"], -246218);
        // goods EUR 3517.40 × 6.5% = 228.63 (freight excluded from duty base)
        assert_eq!(by_id["po_1:duty"], -22863);
        // (3517.40 + 368.50 + 228.63) × 19% = 781.76
        assert_eq!(by_id["po_1:eust"], -78176);
        assert_eq!(by_id["po_1:freight"], -36850);
        assert_eq!(by_id["po_1:vat_refund"], 78176);

        // Milestone source amounts retained.
        let m1 = expansion.events.iter().find(|e| e.event_id == "po_1:m1").unwrap();
        assert_eq!(m1.source_amount_cents, Some(-122700));
    }

    #[test]
    fn expansion_is_idempotent() {
        let order = sample_order();
        let settings = sample_settings();
        let a = expand(&order, &settings);
        let b = expand(&order, &settings);
        let keys_a: Vec<&str> = a.events.iter().map(|e| e.key.as_str()).collect();
        let keys_b: Vec<&str> = b.events.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys_a, keys_b);
        let amounts_a: Vec<Cents> = a.events.iter().map(|e| e.amount_cents).collect();
        let amounts_b: Vec<Cents> = b.events.iter().map(|e| e.amount_cents).collect();
        assert_eq!(amounts_a, amounts_b);
    }

    #[test]
    fn ddp_suppresses_taxes_and_freight() {
        let mut order = sample_order();
        if let OrderRecord::Po(body) = &mut order {
            body.ddp = true;
        }
        let expansion = expand(&order, &sample_settings());
        assert!(expansion.events.iter().all(|e| !matches!(
            e.kind,
            CashEventType::Duty | CashEventType::Eust | CashEventType::VatRefund
                | CashEventType::Freight
        )));
        // Milestones and their FX fees survive.
        assert_eq!(expansion.events.len(), 4);
    }

    #[test]
    fn percent_violation_reported_but_events_still_produced() {
        let mut order = sample_order();
        if let OrderRecord::Po(body) = &mut order {
            body.milestones[1].percent = 60.0; // 30 + 60 ≠ 100
        }
        let expansion = expand(&order, &sample_settings());
        assert!(!expansion.validation.is_clean());
        assert!((expansion.validation.milestone_percent_sum - 90.0).abs() < 1e-9);
        assert!(expansion.events.iter().any(|e| e.event_id == "po_1:m1"));
        assert!(expansion.events.iter().any(|e| e.event_id == "po_1:m2"));
    }

    #[test]
    fn eur_override_skips_conversion_and_fee() {
        let mut order = sample_order();
        if let OrderRecord::Po(body) = &mut order {
            body.goods_value_eur_cents = Some(351740);
        }
        let expansion = expand(&order, &sample_settings());
        let m1 = expansion.events.iter().find(|e| e.event_id == "po_1:m1").unwrap();
        assert_eq!(m1.amount_cents, -105522);
        assert_eq!(m1.source_amount_cents, None);
        assert!(!expansion.events.iter().any(|e| e.event_id == "po_1:fx-m1"));
    }

    #[test]
    fn per_order_fx_override_beats_settings_rate() {
        let mut order = sample_order();
        if let OrderRecord::Po(body) = &mut order {
            body.fx_rate = Some(0.90);
        }
        let expansion = expand(&order, &sample_settings());
        let m1 = expansion.events.iter().find(|e| e.event_id == "po_1:m1").unwrap();
        // 4090.00 × 30% × 0.90 = 1104.30
        assert_eq!(m1.amount_cents, -110430);
    }

    #[test]
    fn vat_refund_requires_eust() {
        let mut order = sample_order();
        if let OrderRecord::Po(body) = &mut order {
            body.eust_rate_override = Some(0.0);
        }
        let expansion = expand(&order, &sample_settings());
        assert!(!expansion.events.iter().any(|e| e.kind == CashEventType::Eust));
        assert!(!expansion.events.iter().any(|e| e.kind == CashEventType::VatRefund));
    }

    #[test]
    fn milestone_on_dead_anchor_is_skipped() {
        let mut order = sample_order();
        if let OrderRecord::Po(body) = &mut order {
            body.order_date = None;
            body.manual_etd = Some(date("2025-05-01"));
        }
        let expansion = expand(&order, &sample_settings());
        // ORDER_DATE milestone gone, ETD milestone survives via manual ETD.
        assert!(!expansion.events.iter().any(|e| e.event_id == "po_1:m1"));
        assert!(expansion.events.iter().any(|e| e.event_id == "po_1:m2"));
    }

    #[test]
    fn end_of_month_arithmetic() {
        assert_eq!(end_of_month_after(date("2025-06-21"), 2), Some(date("2025-08-31")));
        assert_eq!(end_of_month_after(date("2025-11-15"), 1), Some(date("2025-12-31")));
        assert_eq!(end_of_month_after(date("2025-12-31"), 2), Some(date("2026-02-28")));
        assert_eq!(end_of_month_after(date("2024-01-30"), 1), Some(date("2024-02-29")));
    }
}
