use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// EUR (or source-currency) amounts in minor units.
pub type Cents = i64;

/// Round a fractional cent amount half-away-from-zero.
pub fn round_cents(value: f64) -> Cents {
    if value >= 0.0 {
        (value + 0.5).floor() as Cents
    } else {
        (value - 0.5).ceil() as Cents
    }
}

/// Tolerant date decoding: a missing, null, or unparseable date becomes
/// `None` instead of failing the whole snapshot, per the degradation
/// rules for external records.
pub(crate) mod lenient_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Other(serde::de::IgnoredAny),
        }

        let raw: Option<Raw> = Option::deserialize(deserializer)?;
        Ok(match raw {
            Some(Raw::Text(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Anchors
// ---------------------------------------------------------------------------

/// Reference date a milestone or auto event is offset from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Anchor {
    OrderDate,
    ProdDone,
    Etd,
    Eta,
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderDate => write!(f, "ORDER_DATE"),
            Self::ProdDone => write!(f, "PROD_DONE"),
            Self::Etd => write!(f, "ETD"),
            Self::Eta => write!(f, "ETA"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Po,
    Fo,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Po => write!(f, "PO"),
            Self::Fo => write!(f, "FO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Sea,
    Air,
    Rail,
    Truck,
}

impl Default for TransportMode {
    fn default() -> Self {
        Self::Sea
    }
}

/// A confirmed purchase order or a forecast order.
///
/// Both variants carry the same body; the tag is what the journal
/// reports as entity type. Records are created by the order-entry UI
/// and are read-only to this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum OrderRecord {
    #[serde(rename = "PO")]
    Po(OrderBody),
    #[serde(rename = "FO")]
    Fo(OrderBody),
}

impl OrderRecord {
    pub fn entity(&self) -> EntityKind {
        match self {
            Self::Po(_) => EntityKind::Po,
            Self::Fo(_) => EntityKind::Fo,
        }
    }

    pub fn body(&self) -> &OrderBody {
        match self {
            Self::Po(body) | Self::Fo(body) => body,
        }
    }
}

/// The fields the engine reads from either order variant.
///
/// External snapshots historically used several names for the same
/// field; the serde aliases below are the single place that mapping
/// lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBody {
    pub id: String,
    #[serde(default, alias = "order_number", alias = "po_number")]
    pub number: String,
    #[serde(default)]
    pub supplier: String,
    #[serde(default, alias = "skus", alias = "sku_summary")]
    pub sku: String,
    /// Malformed dates decode to `None`; anything anchored on them is skipped.
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub order_date: Option<NaiveDate>,
    /// Goods value in the source currency, minor units.
    #[serde(default, alias = "goods_value", alias = "unit_cost_total")]
    pub goods_value_cents: Cents,
    /// Direct EUR override; when present no FX conversion happens.
    #[serde(default, alias = "goods_value_eur")]
    pub goods_value_eur_cents: Option<Cents>,
    #[serde(default, alias = "unit_currency", alias = "cost_currency")]
    pub currency: String,
    /// Per-order FX override; takes precedence over the settings rate.
    #[serde(default)]
    pub fx_rate: Option<f64>,
    #[serde(default, alias = "production_days")]
    pub prod_days: i64,
    #[serde(default)]
    pub transport_mode: TransportMode,
    #[serde(default)]
    pub transit_days: i64,
    /// Manual overrides always win over computed anchors.
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub manual_etd: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub manual_eta: Option<NaiveDate>,
    #[serde(default)]
    pub ddp: bool,
    /// Flat freight amount in EUR minor units.
    #[serde(default, alias = "freight_eur")]
    pub freight_cents: Cents,
    #[serde(default)]
    pub duty_rate_override: Option<f64>,
    #[serde(default)]
    pub eust_rate_override: Option<f64>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    #[serde(default)]
    pub auto_events: Vec<AutoEvent>,
    /// Per-event payment bookkeeping recorded against this order.
    #[serde(default)]
    pub payment_log: Vec<PaymentLogEntry>,
}

// ---------------------------------------------------------------------------
// Milestones + auto events
// ---------------------------------------------------------------------------

/// A percent-of-goods-value installment due at an anchor plus lag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    #[serde(default)]
    pub label: String,
    /// Percent of goods value, 0..=100. Sums should hit 100 across a record.
    pub percent: f64,
    pub anchor: Anchor,
    #[serde(default)]
    pub lag_days: i64,
    /// When set the milestone amount is already EUR; no conversion, no FX fee.
    #[serde(default)]
    pub eur_denominated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoEventKind {
    Freight,
    Duty,
    Eust,
    VatRefund,
    FxFee,
}

impl AutoEventKind {
    /// DDP bundles duty and import VAT into the goods price, so these
    /// kinds get force-disabled (with a memo) while DDP is set.
    pub fn suppressed_by_ddp(&self) -> bool {
        matches!(self, Self::Duty | Self::Eust | Self::VatRefund)
    }
}

/// A derived event toggle carried on the order record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoEvent {
    pub kind: AutoEventKind,
    /// Rate override in percent; `None` falls back to settings.
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(default)]
    pub lag_days: i64,
    #[serde(default)]
    pub anchor: Option<Anchor>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Set when DDP forced `enabled` off, so clearing DDP restores it.
    #[serde(default)]
    pub ddp_disabled: bool,
}

fn default_true() -> bool {
    true
}

impl AutoEvent {
    /// Effective enabled state under the order's DDP flag.
    ///
    /// DDP wins over everything for the suppressed kinds. When DDP is
    /// clear and the event carries the DDP memo, the pre-DDP enabled
    /// state (it was on, or there would be no memo) is restored.
    pub fn is_active(&self, ddp: bool) -> bool {
        if ddp && self.kind.suppressed_by_ddp() {
            return false;
        }
        if !ddp && self.ddp_disabled {
            return true;
        }
        self.enabled
    }
}

// ---------------------------------------------------------------------------
// Cash events (derived, transient)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashEventType {
    Po,
    Fo,
    Fx,
    Freight,
    Duty,
    Eust,
    VatRefund,
}

impl fmt::Display for CashEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Po => write!(f, "PO"),
            Self::Fo => write!(f, "FO"),
            Self::Fx => write!(f, "FX"),
            Self::Freight => write!(f, "FREIGHT"),
            Self::Duty => write!(f, "DUTY"),
            Self::Eust => write!(f, "EUST"),
            Self::VatRefund => write!(f, "VAT_REFUND"),
        }
    }
}

/// A dated, signed EUR cash event. Never persisted; recomputed from an
/// `OrderRecord` + `Settings` on every call.
#[derive(Debug, Clone, Serialize)]
pub struct CashEvent {
    /// Stable sort key: `date|TYPE|order id|event id`.
    pub key: String,
    /// Globally unique event id: `order id:local id`. Payment
    /// allocations and covered-event lists reference this.
    pub event_id: String,
    pub order_id: String,
    pub entity: EntityKind,
    pub date: NaiveDate,
    pub kind: CashEventType,
    pub label: String,
    /// Signed EUR minor units; outflows negative.
    pub amount_cents: Cents,
    /// Signed source-currency minor units, when a conversion happened.
    pub source_amount_cents: Option<Cents>,
    /// True for events derived from auto-event toggles.
    pub auto_generated: bool,
}

impl CashEvent {
    pub fn make_key(date: NaiveDate, kind: CashEventType, order_id: &str, local_id: &str) -> String {
        format!("{date}|{kind}|{order_id}|{local_id}")
    }

    pub fn make_event_id(order_id: &str, local_id: &str) -> String {
        format!("{order_id}:{local_id}")
    }
}

// ---------------------------------------------------------------------------
// Payments (persisted, external)
// ---------------------------------------------------------------------------

/// A recorded outgoing (or incoming) payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub paid_date: Option<NaiveDate>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub payer: String,
    #[serde(default)]
    pub currency: String,
    /// Actual total in EUR minor units, if recorded.
    #[serde(default, alias = "amount_eur")]
    pub amount_eur_cents: Option<Cents>,
    /// Actual total in the source currency (typically USD), minor units.
    #[serde(default, alias = "amount_usd")]
    pub amount_usd_cents: Option<Cents>,
    /// Explicit per-event split of this payment, if the bookkeeper entered one.
    #[serde(default)]
    pub allocations: Vec<Allocation>,
    /// Event ids this payment is declared to cover (no amounts given).
    #[serde(default, alias = "covers")]
    pub covered_event_ids: Vec<String>,
}

impl Payment {
    /// Recorded total in EUR minor units. A source-currency total is
    /// converted through the given rate when no EUR total exists.
    pub fn total_eur_cents(&self, fx_rate: f64) -> Option<Cents> {
        if let Some(eur) = self.amount_eur_cents {
            return Some(eur);
        }
        self.amount_usd_cents
            .map(|src| round_cents(src as f64 * fx_rate))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub event_id: String,
    pub amount_cents: Cents,
}

/// Per-event bookkeeping recorded on the order itself: paid flag,
/// directly entered actual amount, paid date, owning payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentLogEntry {
    /// Local event id within the order (milestone id or auto kind tag).
    pub event_id: String,
    #[serde(default)]
    pub paid: bool,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub paid_date: Option<NaiveDate>,
    #[serde(default, alias = "actual_eur")]
    pub actual_cents: Option<Cents>,
    #[serde(default)]
    pub payment_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Positions + issues
// ---------------------------------------------------------------------------

/// Bookkeeper-facing classification of an expected event.
///
/// `Fx` rows are internal adjustments and never enter the
/// reconciliation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Deposit,
    Balance,
    Balance2,
    Shipping,
    Eust,
    Zoll,
    EustErstattung,
    Other,
    Fx,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit => write!(f, "Deposit"),
            Self::Balance => write!(f, "Balance"),
            Self::Balance2 => write!(f, "Balance2"),
            Self::Shipping => write!(f, "Shipping"),
            Self::Eust => write!(f, "EUSt"),
            Self::Zoll => write!(f, "Zoll"),
            Self::EustErstattung => write!(f, "EUSt-Erstattung"),
            Self::Other => write!(f, "Other"),
            Self::Fx => write!(f, "FX"),
        }
    }
}

/// Stable issue codes surfaced per journal row. Exporters and the UI
/// match on the string form, so the spellings are frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Issue {
    MissingActualAmount,
    IstFehlt,
    ProRataAllocation,
    GroupedPayment,
    DateUncertain,
    PaidWithoutDate,
    AutoGenerated,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingActualAmount => write!(f, "MISSING_ACTUAL_AMOUNT"),
            Self::IstFehlt => write!(f, "IST_FEHLT"),
            Self::ProRataAllocation => write!(f, "PRO_RATA_ALLOCATION"),
            Self::GroupedPayment => write!(f, "GROUPED_PAYMENT"),
            Self::DateUncertain => write!(f, "DATE_UNCERTAIN"),
            Self::PaidWithoutDate => write!(f, "PAID_WITHOUT_DATE"),
            Self::AutoGenerated => write!(f, "AUTO_GENERATED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Journal rows (derived output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    Paid,
    Open,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paid => write!(f, "PAID"),
            Self::Open => write!(f, "OPEN"),
        }
    }
}

/// One reconciled, dated, classified cash-flow line.
///
/// Built fresh per query, never mutated in place. Rows referencing the
/// same payment may be merged into one grouped row.
#[derive(Debug, Clone, Serialize)]
pub struct JournalRow {
    /// Payment/event composite identity used for dedup.
    pub row_id: String,
    /// Effective month `YYYY-MM` (paid month if PAID, else due month).
    pub month: String,
    pub entity: EntityKind,
    pub number: String,
    pub supplier: String,
    pub sku: String,
    pub position: Position,
    pub position_label: String,
    pub status: RowStatus,
    pub due_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,
    pub planned_cents: Cents,
    pub actual_cents: Option<Cents>,
    pub payment_id: Option<String>,
    pub issues: Vec<Issue>,
}

impl JournalRow {
    /// Paid date when PAID, due date otherwise. Drives month bucketing
    /// and the final sort.
    pub fn effective_date(&self) -> Option<NaiveDate> {
        match self.status {
            RowStatus::Paid => self.paid_date.or(self.due_date),
            RowStatus::Open => self.due_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_cents_half_away_from_zero() {
        assert_eq!(round_cents(527.61), 528);
        assert_eq!(round_cents(527.49), 527);
        assert_eq!(round_cents(-527.61), -528);
        assert_eq!(round_cents(-527.5), -528);
        assert_eq!(round_cents(0.0), 0);
    }

    #[test]
    fn stable_key_orders_fx_before_milestone() {
        let d = NaiveDate::from_ymd_opt(2025, 2, 21).unwrap();
        let fx = CashEvent::make_key(d, CashEventType::Fx, "po_1", "m1");
        let po = CashEvent::make_key(d, CashEventType::Po, "po_1", "m1");
        assert!(fx < po);
    }

    #[test]
    fn ddp_disables_taxes_and_memo_restores() {
        let ev = AutoEvent {
            kind: AutoEventKind::Eust,
            percent: None,
            lag_days: 0,
            anchor: None,
            enabled: false,
            ddp_disabled: true,
        };
        assert!(!ev.is_active(true));
        assert!(ev.is_active(false), "memo restores pre-DDP state");

        let freight = AutoEvent {
            kind: AutoEventKind::Freight,
            percent: None,
            lag_days: 0,
            anchor: None,
            enabled: true,
            ddp_disabled: false,
        };
        // Freight is gated at expansion time, not via the memo.
        assert!(freight.is_active(true));
    }

    #[test]
    fn issue_codes_are_frozen_strings() {
        assert_eq!(Issue::MissingActualAmount.to_string(), "MISSING_ACTUAL_AMOUNT");
        assert_eq!(Issue::IstFehlt.to_string(), "IST_FEHLT");
        assert_eq!(Issue::ProRataAllocation.to_string(), "PRO_RATA_ALLOCATION");
        assert_eq!(Issue::GroupedPayment.to_string(), "GROUPED_PAYMENT");
        assert_eq!(Issue::DateUncertain.to_string(), "DATE_UNCERTAIN");
        assert_eq!(Issue::PaidWithoutDate.to_string(), "PAID_WITHOUT_DATE");
        assert_eq!(Issue::AutoGenerated.to_string(), "AUTO_GENERATED");
    }

    #[test]
    fn order_record_tag_roundtrip() {
        let json = r#"{
            "kind": "PO",
            "id": "po_1",
            "order_number": "2025-001",
            "order_date": "2025-02-21",
            "goods_value": 409000,
            "currency": "USD",
            "prod_days": 60,
            "transit_days": 60
        }"#;
        let rec: OrderRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.entity(), EntityKind::Po);
        assert_eq!(rec.body().number, "2025-001");
        assert_eq!(rec.body().goods_value_cents, 409000);
        assert!(rec.body().milestones.is_empty());
    }
}
