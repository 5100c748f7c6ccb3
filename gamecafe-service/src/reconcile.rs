//! Reconciliation engine: owns the Payment row for each booking/order and
//! applies provider callbacks exactly once. The dedup under at-least-once
//! delivery is the conditional pending-to-terminal update itself, not a
//! read-then-write; duplicate deliveries fall out as no-ops.

use std::sync::Arc;

use chrono::Utc;
use shared::{
    BookingStatus, Error, OrderStatus, PaymentEvent, PaymentOutcome, PaymentStatus, PaymentTarget,
    Requester,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::{normalize_msisdn, PaymentGateway};
use crate::inventory::KeyAssignor;
use crate::models::{NewPayment, Payment};
use crate::store::Store;

/// What happens after repeated payment failures on the same target: the
/// n-th failed attempt cancels it. Pending targets that never hear back at
/// all are closed by the expiry sweeper instead.
#[derive(Debug, Clone, Copy)]
pub struct FailurePolicy {
    pub max_attempts: i32,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

pub struct InitiatedPayment {
    pub payment: Payment,
    pub external_reference: String,
    pub customer_message: String,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    assignor: KeyAssignor,
    policy: FailurePolicy,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        policy: FailurePolicy,
    ) -> Self {
        let assignor = KeyAssignor::new(store.clone());
        Self {
            store,
            gateway,
            assignor,
            policy,
        }
    }

    pub async fn initiate_booking_payment(
        &self,
        requester: Requester,
        booking_id: Uuid,
        phone: &str,
    ) -> Result<InitiatedPayment, Error> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or(Error::NotFound("booking"))?;
        if !requester.may_act_for(booking.user_id) {
            return Err(Error::Forbidden);
        }
        if booking.status() != BookingStatus::Pending {
            return Err(Error::invalid_transition(booking.status.clone()));
        }
        if let Some(existing) = self.store.payment_for_booking(booking_id).await? {
            if existing.status() == PaymentStatus::Completed {
                return Err(Error::Conflict("booking is already paid".into()));
            }
        }

        let msisdn = normalize_msisdn(phone)?;
        let handle = self
            .gateway
            .initiate(&msisdn, &booking.amount, &booking.id.to_string())
            .await?;

        let payment = self
            .store
            .put_pending_payment(NewPayment {
                id: Uuid::new_v4(),
                booking_id: Some(booking.id),
                order_id: None,
                user_id: booking.user_id,
                amount: booking.amount.clone(),
                currency: "KES".to_string(),
                phone_number: msisdn,
                external_reference: Some(handle.external_reference.clone()),
                status: PaymentStatus::Pending.as_str().to_string(),
            })
            .await?;

        info!(
            "payment {} initiated for booking {} (ref {})",
            payment.id, booking.id, handle.external_reference
        );
        Ok(InitiatedPayment {
            payment,
            external_reference: handle.external_reference,
            customer_message: handle.customer_message,
        })
    }

    pub async fn initiate_order_payment(
        &self,
        requester: Requester,
        order_id: Uuid,
        phone: &str,
    ) -> Result<InitiatedPayment, Error> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(Error::NotFound("order"))?;
        if !requester.may_act_for(order.user_id) {
            return Err(Error::Forbidden);
        }
        if order.status() != OrderStatus::Pending {
            return Err(Error::invalid_transition(order.status.clone()));
        }
        if let Some(existing) = self.store.payment_for_order(order_id).await? {
            if existing.status() == PaymentStatus::Completed {
                return Err(Error::Conflict("order is already paid".into()));
            }
        }

        let msisdn = normalize_msisdn(phone)?;
        let handle = self
            .gateway
            .initiate(&msisdn, &order.amount, &order.id.to_string())
            .await?;

        let payment = self
            .store
            .put_pending_payment(NewPayment {
                id: Uuid::new_v4(),
                booking_id: None,
                order_id: Some(order.id),
                user_id: order.user_id,
                amount: order.amount.clone(),
                currency: "KES".to_string(),
                phone_number: msisdn,
                external_reference: Some(handle.external_reference.clone()),
                status: PaymentStatus::Pending.as_str().to_string(),
            })
            .await?;

        info!(
            "payment {} initiated for order {} (ref {})",
            payment.id, order.id, handle.external_reference
        );
        Ok(InitiatedPayment {
            payment,
            external_reference: handle.external_reference,
            customer_message: handle.customer_message,
        })
    }

    /// Applies one callback delivery. The provider redelivers, so a payment
    /// already in a terminal state is acknowledged without effect. A
    /// callback never creates a payment.
    pub async fn handle(&self, event: PaymentEvent) -> Result<(), Error> {
        let payment = self
            .store
            .payment_by_external_ref(&event.external_reference)
            .await?
            .ok_or_else(|| Error::UnknownReference(event.external_reference.clone()))?;

        if payment.status().is_terminal() {
            info!(
                "duplicate callback for payment {} ignored (already {})",
                payment.id, payment.status
            );
            return Ok(());
        }

        match event.outcome {
            PaymentOutcome::Success => self.apply_success(payment, &event).await,
            PaymentOutcome::Failure => self.apply_failure(payment, &event).await,
        }
    }

    async fn apply_success(&self, payment: Payment, event: &PaymentEvent) -> Result<(), Error> {
        let completed = self
            .store
            .complete_payment(payment.id, event.provider_txn_id.as_deref(), Utc::now())
            .await?;
        if !completed {
            info!(
                "duplicate callback for payment {} ignored (raced to terminal)",
                payment.id
            );
            return Ok(());
        }
        info!(
            "payment {} completed (ref {})",
            payment.id, event.external_reference
        );

        match payment.target() {
            Some(PaymentTarget::Booking(booking_id)) => {
                let confirmed = self
                    .store
                    .compare_and_set_booking_status(
                        booking_id,
                        &[BookingStatus::Pending],
                        BookingStatus::Confirmed,
                        Utc::now(),
                    )
                    .await?;
                if confirmed {
                    info!("booking {} confirmed", booking_id);
                } else {
                    // Funds were captured; reversal is an out-of-band admin
                    // action, so this is flagged rather than raised.
                    warn!(
                        "payment {} completed but booking {} was not pending; needs manual review",
                        payment.id, booking_id
                    );
                }
            }
            Some(PaymentTarget::Order(order_id)) => {
                let paid = self
                    .store
                    .compare_and_set_order_status(
                        order_id,
                        &[OrderStatus::Pending],
                        OrderStatus::Paid,
                        Utc::now(),
                    )
                    .await?;
                if paid {
                    info!("order {} paid", order_id);
                    self.assignor.fulfill_order(order_id).await?;
                } else {
                    warn!(
                        "payment {} completed but order {} was not pending; needs manual review",
                        payment.id, order_id
                    );
                }
            }
            None => {
                warn!("payment {} has no booking or order attached", payment.id);
            }
        }
        Ok(())
    }

    async fn apply_failure(&self, payment: Payment, event: &PaymentEvent) -> Result<(), Error> {
        let attempts = match self.store.fail_payment(payment.id, &event.description).await? {
            Some(attempts) => attempts,
            None => {
                info!(
                    "duplicate callback for payment {} ignored (raced to terminal)",
                    payment.id
                );
                return Ok(());
            }
        };
        warn!(
            "payment {} failed (attempt {}): {}",
            payment.id, attempts, event.description
        );

        if attempts < self.policy.max_attempts {
            return Ok(());
        }

        match payment.target() {
            Some(PaymentTarget::Booking(booking_id)) => {
                let cancelled = self
                    .store
                    .compare_and_set_booking_status(
                        booking_id,
                        &[BookingStatus::Pending],
                        BookingStatus::Cancelled,
                        Utc::now(),
                    )
                    .await?;
                if cancelled {
                    info!(
                        "booking {} cancelled after {} failed payment attempts",
                        booking_id, attempts
                    );
                }
            }
            Some(PaymentTarget::Order(order_id)) => {
                let cancelled = self
                    .store
                    .compare_and_set_order_status(
                        order_id,
                        &[OrderStatus::Pending],
                        OrderStatus::Cancelled,
                        Utc::now(),
                    )
                    .await?;
                if cancelled {
                    info!(
                        "order {} cancelled after {} failed payment attempts",
                        order_id, attempts
                    );
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Client polling convenience; the callback remains the source of truth.
    pub async fn payment_for_booking(
        &self,
        requester: Requester,
        booking_id: Uuid,
    ) -> Result<Payment, Error> {
        let payment = self
            .store
            .payment_for_booking(booking_id)
            .await?
            .ok_or(Error::NotFound("payment"))?;
        if !requester.may_act_for(payment.user_id) {
            return Err(Error::Forbidden);
        }
        Ok(payment)
    }

    pub async fn history(&self, requester: Requester) -> Result<Vec<Payment>, Error> {
        self.store.payments_for_user(requester.user_id).await
    }
}
