use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::PlanError;

// ---------------------------------------------------------------------------
// Typed settings
// ---------------------------------------------------------------------------

/// Normalized planning settings.
///
/// Rates and fees are percentages (6.5 = 6.5%), the FX rate is
/// source-currency → EUR. Defaults match the business's standing
/// configuration: German import VAT at 19%, two-month refund lag,
/// fourteen days from arrival to the freight invoice.
#[derive(Debug, Clone)]
pub struct Settings {
    pub fx_rate: f64,
    pub fx_fee_percent: f64,
    pub duty_rate_percent: f64,
    pub duty_base_includes_freight: bool,
    pub eust_rate_percent: f64,
    pub vat_refund_enabled: bool,
    pub vat_refund_lag_months: u32,
    pub freight_lag_days: i64,
    /// Production blackout window (Chinese New Year) per calendar year.
    pub blackouts: BTreeMap<i32, BlackoutWindow>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fx_rate: 1.0,
            fx_fee_percent: 0.0,
            duty_rate_percent: 0.0,
            duty_base_includes_freight: false,
            eust_rate_percent: 19.0,
            vat_refund_enabled: true,
            vat_refund_lag_months: 2,
            freight_lag_days: 14,
            blackouts: BTreeMap::new(),
        }
    }
}

/// Inclusive date window during which production does not progress.
#[derive(Debug, Clone, Copy)]
pub struct BlackoutWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BlackoutWindow {
    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }
}

impl Settings {
    /// Parse a TOML settings document.
    pub fn from_toml(input: &str) -> Result<Self, PlanError> {
        let raw: RawSettings =
            toml::from_str(input).map_err(|e| PlanError::SettingsParse(e.to_string()))?;
        Ok(raw.normalize())
    }

    /// Parse the loosely-typed settings object embedded in a snapshot.
    pub fn from_json_value(value: &serde_json::Value) -> Result<Self, PlanError> {
        let raw: RawSettings = serde_json::from_value(value.clone())
            .map_err(|e| PlanError::SettingsParse(e.to_string()))?;
        Ok(raw.normalize())
    }
}

// ---------------------------------------------------------------------------
// Raw (loosely typed) form
// ---------------------------------------------------------------------------

/// Settings as they arrive from persisted form state: numbers may be
/// locale-formatted strings, booleans may be 0/1 or "ja"/"nein",
/// anything may be absent. Normalization coerces field-by-field;
/// uninterpretable values fall back to the default rather than failing.
#[derive(Debug, Default, Deserialize)]
pub struct RawSettings {
    #[serde(default)]
    fx_rate: Option<LooseNumber>,
    #[serde(default, alias = "fx_fee")]
    fx_fee_percent: Option<LooseNumber>,
    #[serde(default, alias = "duty_rate")]
    duty_rate_percent: Option<LooseNumber>,
    #[serde(default, alias = "duty_includes_freight")]
    duty_base_includes_freight: Option<LooseBool>,
    #[serde(default, alias = "eust_rate")]
    eust_rate_percent: Option<LooseNumber>,
    #[serde(default)]
    vat_refund_enabled: Option<LooseBool>,
    #[serde(default)]
    vat_refund_lag_months: Option<LooseNumber>,
    #[serde(default)]
    freight_lag_days: Option<LooseNumber>,
    #[serde(default)]
    blackouts: BTreeMap<String, RawBlackout>,
}

#[derive(Debug, Deserialize)]
struct RawBlackout {
    start: String,
    end: String,
}

impl RawSettings {
    pub fn normalize(self) -> Settings {
        let d = Settings::default();

        let mut blackouts = BTreeMap::new();
        for (year, raw) in &self.blackouts {
            let Ok(year) = year.trim().parse::<i32>() else {
                continue;
            };
            let start = NaiveDate::parse_from_str(raw.start.trim(), "%Y-%m-%d");
            let end = NaiveDate::parse_from_str(raw.end.trim(), "%Y-%m-%d");
            // Inverted or unparseable windows are dropped, not fatal.
            if let (Ok(start), Ok(end)) = (start, end) {
                if start <= end {
                    blackouts.insert(year, BlackoutWindow { start, end });
                }
            }
        }

        Settings {
            fx_rate: num_or(&self.fx_rate, d.fx_rate),
            fx_fee_percent: num_or(&self.fx_fee_percent, d.fx_fee_percent),
            duty_rate_percent: num_or(&self.duty_rate_percent, d.duty_rate_percent),
            duty_base_includes_freight: bool_or(
                &self.duty_base_includes_freight,
                d.duty_base_includes_freight,
            ),
            eust_rate_percent: num_or(&self.eust_rate_percent, d.eust_rate_percent),
            vat_refund_enabled: bool_or(&self.vat_refund_enabled, d.vat_refund_enabled),
            vat_refund_lag_months: num_or(
                &self.vat_refund_lag_months,
                d.vat_refund_lag_months as f64,
            )
            .max(0.0) as u32,
            freight_lag_days: num_or(&self.freight_lag_days, d.freight_lag_days as f64) as i64,
            blackouts,
        }
    }
}

fn num_or(value: &Option<LooseNumber>, default: f64) -> f64 {
    value.as_ref().and_then(LooseNumber::as_f64).unwrap_or(default)
}

fn bool_or(value: &Option<LooseBool>, default: bool) -> bool {
    value.as_ref().and_then(LooseBool::as_bool).unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Loose scalars
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Float(f64),
    Int(i64),
    Text(String),
}

impl LooseNumber {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Text(s) => parse_locale_number(s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LooseBool {
    Flag(bool),
    Int(i64),
    Text(String),
}

impl LooseBool {
    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Flag(v) => Some(*v),
            Self::Int(v) => Some(*v != 0),
            Self::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "ja" | "1" | "x" => Some(true),
                "false" | "no" | "nein" | "0" | "" => Some(false),
                _ => None,
            },
        }
    }
}

/// Parse a number that may carry German or English locale formatting.
///
/// When both separators appear, the rightmost one is the decimal mark
/// and the other is grouping. A lone comma is treated as a decimal mark
/// (German forms are the primary input locale); repeated separators of
/// one kind are grouping. Percent and euro signs are ignored.
pub fn parse_locale_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '%' && *c != '€')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let commas = cleaned.matches(',').count();
    let dots = cleaned.matches('.').count();

    let normalized = if commas > 0 && dots > 0 {
        let decimal_is_comma =
            cleaned.rfind(',').unwrap_or(0) > cleaned.rfind('.').unwrap_or(0);
        if decimal_is_comma {
            cleaned.replace('.', "").replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else if commas > 1 {
        cleaned.replace(',', "")
    } else if dots > 1 {
        cleaned.replace('.', "")
    } else if commas == 1 {
        cleaned.replace(',', ".")
    } else {
        cleaned
    };

    normalized.parse::<f64>().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
