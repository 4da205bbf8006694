//! In-process ledger and order store. Used when no database is configured
//! and by the test suite.

use {
    crate::domain::{
        error::{FulfillmentError, PipelineError},
        fulfillment::{Applied, FulfillmentEffect, FulfillmentStore},
        id::{EventId, OrderRef},
        ledger::{BoxFuture, IdempotencyLedger, Outcome, ProcessedEventRecord, Reservation},
        order::{Entitlement, Order, OrderStatus, Transition},
    },
    chrono::{DateTime, Duration, Utc},
    std::{
        collections::HashMap,
        sync::{Mutex, MutexGuard, PoisonError},
    },
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MemoryLedger {
    records: Mutex<HashMap<EventId, ProcessedEventRecord>>,
    lease: Duration,
}

impl MemoryLedger {
    pub fn new(lease: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            lease,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reserve_at(&self, event_id: &EventId, event_kind: &str, now: DateTime<Utc>) -> Reservation {
        let mut records = lock(&self.records);
        match records.get_mut(event_id) {
            None => {
                records.insert(
                    event_id.clone(),
                    ProcessedEventRecord::reserved(event_id.clone(), event_kind, now),
                );
                Reservation::Reserved
            }
            Some(record) if record.is_reclaimable(now, self.lease) => {
                record.reclaim(now);
                Reservation::Reserved
            }
            Some(_) => Reservation::AlreadyProcessed,
        }
    }
}

impl IdempotencyLedger for MemoryLedger {
    fn check_and_reserve<'a>(
        &'a self,
        event_id: &'a EventId,
        event_kind: &'a str,
    ) -> BoxFuture<'a, Result<Reservation, PipelineError>> {
        Box::pin(async move { Ok(self.reserve_at(event_id, event_kind, Utc::now())) })
    }

    fn mark_outcome<'a>(
        &'a self,
        event_id: &'a EventId,
        outcome: Outcome,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let mut records = lock(&self.records);
            let record = records.get_mut(event_id).ok_or_else(|| {
                PipelineError::Validation(format!("no reservation for {event_id}"))
            })?;
            if !record.settle(outcome, Utc::now()) {
                tracing::warn!(event_id = %event_id, outcome = outcome.as_str(), "event already succeeded, late outcome dropped");
            }
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        event_id: &'a EventId,
    ) -> BoxFuture<'a, Result<Option<ProcessedEventRecord>, PipelineError>> {
        Box::pin(async move { Ok(lock(&self.records).get(event_id).cloned()) })
    }

    fn purge_expired(&self, older_than: DateTime<Utc>) -> BoxFuture<'_, Result<u64, PipelineError>> {
        Box::pin(async move {
            let mut records = lock(&self.records);
            let before = records.len();
            records.retain(|_, r| !r.is_expired(older_than));
            Ok((before - records.len()) as u64)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryHold {
    pub product_id: String,
    pub quantity: u32,
    pub released: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFailureNotice {
    pub order_ref: OrderRef,
    pub user_id: String,
    pub event_id: EventId,
}

#[derive(Default)]
struct Shelf {
    orders: HashMap<OrderRef, Order>,
    holds: HashMap<OrderRef, Vec<InventoryHold>>,
    entitlements: HashMap<(String, String), Entitlement>,
    notices: Vec<PaymentFailureNotice>,
}

#[derive(Default)]
pub struct MemoryOrderStore {
    shelf: Mutex<Shelf>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pending order and hold inventory for each of its lines.
    pub fn insert_order(&self, order: Order) {
        let mut shelf = lock(&self.shelf);
        let holds = order
            .lines
            .iter()
            .map(|line| InventoryHold {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                released: false,
            })
            .collect();
        shelf.holds.insert(order.order_ref.clone(), holds);
        shelf.orders.insert(order.order_ref.clone(), order);
    }

    pub fn order_status(&self, order: &OrderRef) -> Option<OrderStatus> {
        lock(&self.shelf).orders.get(order).map(|o| o.status)
    }

    pub fn entitlements_for(&self, user_id: &str) -> Vec<Entitlement> {
        let mut found: Vec<_> = lock(&self.shelf)
            .entitlements
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        found
    }

    pub fn held_quantity(&self, order: &OrderRef) -> u32 {
        lock(&self.shelf)
            .holds
            .get(order)
            .map(|holds| holds.iter().filter(|h| !h.released).map(|h| h.quantity).sum())
            .unwrap_or(0)
    }

    pub fn notices(&self) -> Vec<PaymentFailureNotice> {
        lock(&self.shelf).notices.clone()
    }

    fn apply_now(
        &self,
        order_ref: &OrderRef,
        effect: FulfillmentEffect,
        event_id: &EventId,
    ) -> Result<Applied, FulfillmentError> {
        let mut guard = lock(&self.shelf);
        let Shelf {
            orders,
            holds,
            entitlements,
            notices,
        } = &mut *guard;

        let order = orders
            .get_mut(order_ref)
            .ok_or_else(|| FulfillmentError::InvalidState(format!("unknown order {order_ref}")))?;

        let (from, to) = match order.status.decide(effect.target_status())? {
            Transition::Unchanged => return Ok(Applied::Unchanged(order.status)),
            Transition::Advance { from, to } => (from, to),
        };
        order.status = to;

        match effect {
            FulfillmentEffect::Complete => {
                for line in &order.lines {
                    entitlements
                        .entry((order.user_id.clone(), line.product_id.clone()))
                        .and_modify(|e| e.active = true)
                        .or_insert_with(|| Entitlement {
                            user_id: order.user_id.clone(),
                            product_id: line.product_id.clone(),
                            order_ref: order_ref.clone(),
                            active: true,
                        });
                }
                release_holds(holds, order_ref);
            }
            FulfillmentEffect::Expire => release_holds(holds, order_ref),
            FulfillmentEffect::FlagPaymentFailed => {
                if !notices.iter().any(|n| &n.event_id == event_id) {
                    notices.push(PaymentFailureNotice {
                        order_ref: order_ref.clone(),
                        user_id: order.user_id.clone(),
                        event_id: event_id.clone(),
                    });
                }
            }
        }

        Ok(Applied::Changed { from, to })
    }
}

fn release_holds(holds: &mut HashMap<OrderRef, Vec<InventoryHold>>, order_ref: &OrderRef) {
    if let Some(order_holds) = holds.get_mut(order_ref) {
        for hold in order_holds.iter_mut() {
            hold.released = true;
        }
    }
}

impl FulfillmentStore for MemoryOrderStore {
    fn apply<'a>(
        &'a self,
        order: &'a OrderRef,
        effect: FulfillmentEffect,
        event_id: &'a EventId,
    ) -> BoxFuture<'a, Result<Applied, FulfillmentError>> {
        Box::pin(async move { self.apply_now(order, effect, event_id) })
    }
}
