use std::collections::BTreeMap;

use crate::model::{Allocation, Payment};

/// Lookup structures over the payment collection.
///
/// Rebuilt from the snapshot on every invocation; nothing is cached
/// across calls because callers may mutate the snapshot between them.
#[derive(Debug, Default)]
pub struct PaymentIndex<'a> {
    by_id: BTreeMap<&'a str, &'a Payment>,
    /// Explicit allocation entries keyed by the event they cover.
    by_allocation: BTreeMap<&'a str, (&'a Payment, &'a Allocation)>,
    /// Payments whose covered-event list names the event.
    by_covered: BTreeMap<&'a str, &'a Payment>,
}

impl<'a> PaymentIndex<'a> {
    pub fn build(payments: &'a [Payment]) -> Self {
        let mut index = Self::default();
        for payment in payments {
            index.by_id.insert(payment.id.as_str(), payment);
            for alloc in &payment.allocations {
                index
                    .by_allocation
                    .entry(alloc.event_id.as_str())
                    .or_insert((payment, alloc));
            }
            for event_id in &payment.covered_event_ids {
                index.by_covered.entry(event_id.as_str()).or_insert(payment);
            }
        }
        index
    }

    pub fn by_id(&self, payment_id: &str) -> Option<&'a Payment> {
        self.by_id.get(payment_id).copied()
    }

    pub fn allocation_for(&self, event_id: &str) -> Option<(&'a Payment, &'a Allocation)> {
        self.by_allocation.get(event_id).copied()
    }

    pub fn covering(&self, event_id: &str) -> Option<&'a Payment> {
        self.by_covered.get(event_id).copied()
    }
}
