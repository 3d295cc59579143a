//! Decoding of the external workspace snapshot.
//!
//! The snapshot is a single JSON document produced by the order-entry
//! application. Decoding is tolerant: unknown fields are ignored and
//! malformed optional fields fall back to their defaults, so one bad
//! record never takes the whole planning run down.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::PlanError;
use crate::model::{OrderRecord, Payment};
use crate::settings::Settings;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Supplier {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub name: String,
}

/// Everything the engine reads from one workspace export.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default, alias = "orders")]
    pub purchase_orders: Vec<OrderRecord>,
    #[serde(default)]
    pub forecast_orders: Vec<OrderRecord>,
    #[serde(default)]
    pub payments: Vec<Payment>,
    #[serde(default)]
    pub suppliers: Vec<Supplier>,
    #[serde(default)]
    pub products: Vec<Product>,
    /// Settings as stored in the snapshot; used via
    /// [`Settings::from_json_value`] unless the caller supplies a
    /// settings file of its own.
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

impl Snapshot {
    pub fn from_json_str(input: &str) -> Result<Self, PlanError> {
        serde_json::from_str(input).map_err(|e| PlanError::SnapshotParse(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, PlanError> {
        serde_json::from_value(value).map_err(|e| PlanError::SnapshotParse(e.to_string()))
    }

    /// Both order collections in snapshot order, POs first.
    pub fn all_orders(&self) -> Vec<&OrderRecord> {
        self.purchase_orders
            .iter()
            .chain(self.forecast_orders.iter())
            .collect()
    }

    /// Supplier id → display name, for journal rows. An alias maps to
    /// the same name as its owner; the first definition of an id wins.
    pub fn supplier_names(&self) -> BTreeMap<String, String> {
        let mut names = BTreeMap::new();
        for supplier in &self.suppliers {
            if supplier.name.is_empty() {
                continue;
            }
            names
                .entry(supplier.id.clone())
                .or_insert_with(|| supplier.name.clone());
            for alias in &supplier.aliases {
                names
                    .entry(alias.clone())
                    .or_insert_with(|| supplier.name.clone());
            }
        }
        names
    }

    /// Embedded settings when present, defaults otherwise.
    pub fn settings(&self) -> Result<Settings, PlanError> {
        match &self.settings {
            Some(value) => Settings::from_json_value(value),
            None => Ok(Settings::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_snapshot() {
        let snap = Snapshot::from_json_str(r#"{"purchase_orders": []}"#).unwrap();
        assert!(snap.purchase_orders.is_empty());
        assert!(snap.payments.is_empty());
        assert!(snap.settings.is_none());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let snap = Snapshot::from_json_str(
            r#"{"purchase_orders": [], "ui_state": {"tab": 3}, "schema_version": 7}"#,
        )
        .unwrap();
        assert!(snap.purchase_orders.is_empty());
    }

    #[test]
    fn orders_decode_with_kind_tag() {
        let snap = Snapshot::from_json_str(
            r#"{
                "purchase_orders": [
                    {"kind": "PO", "id": "po_1", "order_number": "2025-001"}
                ],
                "forecast_orders": [
                    {"kind": "FO", "id": "fo_1", "number": "F-17"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(snap.purchase_orders.len(), 1);
        assert_eq!(snap.purchase_orders[0].body().number, "2025-001");
        assert_eq!(snap.all_orders().len(), 2);
    }

    #[test]
    fn malformed_order_date_degrades_to_none() {
        let snap = Snapshot::from_json_str(
            r#"{
                "purchase_orders": [
                    {"kind": "PO", "id": "po_1", "order_date": "21.02.2025"}
                ]
            }"#,
        )
        .unwrap();
        assert!(snap.purchase_orders[0].body().order_date.is_none());
    }

    #[test]
    fn supplier_names_cover_aliases() {
        let snap = Snapshot::from_json_str(
            r#"{
                "suppliers": [
                    {"id": "sup_1", "name": "Ningbo Tools Ltd.", "aliases": ["ningbo"]},
                    {"id": "sup_2", "name": ""}
                ]
            }"#,
        )
        .unwrap();
        let names = snap.supplier_names();
        assert_eq!(names.get("sup_1").map(String::as_str), Some("Ningbo Tools Ltd."));
        assert_eq!(names.get("ningbo").map(String::as_str), Some("Ningbo Tools Ltd."));
        assert!(!names.contains_key("sup_2"));
    }

    #[test]
    fn embedded_settings_override_defaults() {
        let snap = Snapshot::from_json_str(
            r#"{"settings": {"fx_rate": "0,86", "eust_rate": 19}}"#,
        )
        .unwrap();
        let settings = snap.settings().unwrap();
        assert!((settings.fx_rate - 0.86).abs() < 1e-9);
    }

    #[test]
    fn garbage_input_is_an_error() {
        let err = Snapshot::from_json_str("not json").unwrap_err();
        assert!(err.to_string().contains("snapshot"));
    }
}
