//! Game-key inventory and the shop's order flow. A key claim is one atomic
//! store operation, so concurrent fulfillments for the same product can
//! never hand out the same key or exceed the pool.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use shared::{Error, OrderStatus, Requester};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{GameKey, NewOrder, Order, OrderLine};
use crate::store::Store;

#[derive(Clone)]
pub struct KeyAssignor {
    store: Arc<dyn Store>,
}

impl KeyAssignor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn assign_key(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        order_line_id: Uuid,
    ) -> Result<GameKey, Error> {
        match self
            .store
            .claim_game_key(product_id, user_id, order_line_id, Utc::now())
            .await?
        {
            Some(key) => Ok(key),
            None => {
                let name = self
                    .store
                    .get_product(product_id)
                    .await?
                    .map(|p| p.name)
                    .unwrap_or_else(|| product_id.to_string());
                Err(Error::OutOfStock(name))
            }
        }
    }

    /// Claims one key per unit across the order's lines. An exhausted pool
    /// is recorded on the order and stops fulfillment; the order stays
    /// `paid` for manual resolution since the funds were already captured.
    pub async fn fulfill_order(&self, order_id: Uuid) -> Result<(), Error> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(Error::NotFound("order"))?;
        let lines = self.store.order_lines(order_id).await?;

        for line in &lines {
            for _ in 0..line.quantity {
                match self.assign_key(line.product_id, order.user_id, line.id).await {
                    Ok(key) => {
                        info!("key {} assigned to order {}", key.id, order_id);
                    }
                    Err(Error::OutOfStock(product)) => {
                        let message = format!("product '{product}' ran out of keys");
                        warn!("order {} fulfillment halted: {}", order_id, message);
                        self.store.record_fulfillment_error(order_id, &message).await?;
                        return Ok(());
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        let completed = self
            .store
            .compare_and_set_order_status(
                order_id,
                &[OrderStatus::Paid],
                OrderStatus::Completed,
                Utc::now(),
            )
            .await?;
        if completed {
            info!("order {} completed, all keys assigned", order_id);
        }
        Ok(())
    }
}

pub struct OrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Clone)]
pub struct Shop {
    store: Arc<dyn Store>,
}

impl Shop {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Creates a pending order priced from the product table. Payment is
    /// initiated separately and the order only advances through
    /// reconciliation.
    pub async fn place_order(
        &self,
        requester: Requester,
        items: Vec<OrderItem>,
    ) -> Result<Order, Error> {
        if items.is_empty() {
            return Err(Error::Validation("order must contain at least one item".into()));
        }

        let order_id = Uuid::new_v4();
        let mut amount = BigDecimal::from(0);
        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            if item.quantity < 1 {
                return Err(Error::Validation("quantity must be at least 1".into()));
            }
            let product = self
                .store
                .get_product(item.product_id)
                .await?
                .ok_or(Error::NotFound("product"))?;
            amount = amount + product.price.clone() * BigDecimal::from(item.quantity);
            lines.push(OrderLine {
                id: Uuid::new_v4(),
                order_id,
                product_id: product.id,
                quantity: item.quantity,
                unit_price: product.price,
            });
        }

        let order = self
            .store
            .insert_order(
                NewOrder {
                    id: order_id,
                    user_id: requester.user_id,
                    amount,
                    status: OrderStatus::Pending.as_str().to_string(),
                },
                lines,
            )
            .await?;

        info!("order {} created for {}", order.id, order.user_id);
        Ok(order)
    }

    pub async fn order_detail(
        &self,
        requester: Requester,
        id: Uuid,
    ) -> Result<(Order, Vec<OrderLine>, Vec<GameKey>), Error> {
        let order = self
            .store
            .get_order(id)
            .await?
            .ok_or(Error::NotFound("order"))?;
        if !requester.may_act_for(order.user_id) {
            return Err(Error::Forbidden);
        }
        let lines = self.store.order_lines(id).await?;
        let keys = self.store.keys_for_order(id).await?;
        Ok((order, lines, keys))
    }

    pub async fn orders_for(&self, requester: Requester) -> Result<Vec<Order>, Error> {
        self.store.orders_for_user(requester.user_id).await
    }
}
