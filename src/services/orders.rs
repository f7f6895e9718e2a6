//! Order lookups and the admin status workflow.

use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::auth::{require_admin, Principal};
use crate::domain::aggregates::{Order, OrderStatus, PaymentStatus};
use crate::error::{EcommerceError, Result};
use crate::services::events::{publish_all, EventPublisher};
use crate::store::{OrderFilter, OrderPage, OrderStore};

/// Upper bound on the orders returned to a customer for their own history.
pub const MY_ORDERS_LIMIT: u32 = 100;

const MAX_PAGE_SIZE: u32 = 100;

/// Raw admin listing parameters, as they arrive on the query string.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OrderQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl OrderQuery {
    fn into_filter(self) -> Result<OrderFilter> {
        let status = self
            .status
            .as_deref()
            .map(str::trim)
            .filter(|status| !status.is_empty())
            .map(str::parse::<OrderStatus>)
            .transpose()?;
        Ok(OrderFilter {
            status,
            page: self.page.unwrap_or(1).max(1),
            limit: self.limit.unwrap_or(20).clamp(1, MAX_PAGE_SIZE),
        })
    }
}

#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    events: Arc<dyn EventPublisher>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderStore>, events: Arc<dyn EventPublisher>) -> Self { Self { orders, events } }

    /// Guest orders are readable by whoever knows the id or number. Orders
    /// placed by a user are readable by that user and by admins.
    pub async fn get_order(&self, principal: Option<&Principal>, id_or_number: &str) -> Result<Order> {
        let order = self.find(id_or_number).await?;
        match (order.user_id(), principal) {
            (None, _) => Ok(order),
            (Some(_), None) => Err(EcommerceError::Unauthorized),
            (Some(owner), Some(p)) if p.is_admin() || p.user_id == owner => Ok(order),
            (Some(_), Some(_)) => Err(EcommerceError::Forbidden),
        }
    }

    pub async fn my_orders(&self, principal: Option<&Principal>) -> Result<Vec<Order>> {
        let principal = principal.ok_or(EcommerceError::Unauthorized)?;
        Ok(self.orders.list_orders_for_user(&principal.user_id, MY_ORDERS_LIMIT).await?)
    }

    /// Admin only. The query is parsed after the caller is authorized.
    pub async fn list_orders(&self, principal: Option<&Principal>, query: OrderQuery) -> Result<OrderPage> {
        require_admin(principal)?;
        let filter = query.into_filter()?;
        Ok(self.orders.list_orders(&filter).await?)
    }

    #[tracing::instrument(skip(self, principal))]
    pub async fn update_status(
        &self,
        principal: Option<&Principal>,
        id: &str,
        status: &str,
        tracking_number: Option<String>,
    ) -> Result<Order> {
        require_admin(principal)?;
        let next: OrderStatus = status.parse()?;
        let tracking_number = tracking_number.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());

        let mut order = self.find(id).await?;
        let current = order.status();
        order.transition_to(next, tracking_number.clone())?;

        if !self.orders.update_status(order.id(), current, next, tracking_number.as_deref()).await? {
            return Err(EcommerceError::Conflict(order.id().to_string()));
        }

        info!(order_number = %order.order_number(), from = %current, to = %next, "order status updated");
        publish_all(self.events.as_ref(), order.take_events()).await;
        Ok(order)
    }

    #[tracing::instrument(skip(self, principal))]
    pub async fn update_payment_status(&self, principal: Option<&Principal>, id: &str, status: &str) -> Result<Order> {
        require_admin(principal)?;
        let next: PaymentStatus = status.parse()?;

        let mut order = self.find(id).await?;
        let current = order.payment_status();
        order.set_payment_status(next)?;

        if !self.orders.update_payment_status(order.id(), current, next).await? {
            return Err(EcommerceError::Conflict(order.id().to_string()));
        }

        info!(order_number = %order.order_number(), from = %current, to = %next, "payment status updated");
        publish_all(self.events.as_ref(), order.take_events()).await;
        Ok(order)
    }

    async fn find(&self, id_or_number: &str) -> Result<Order> {
        self.orders
            .find_order(id_or_number)
            .await?
            .ok_or_else(|| EcommerceError::not_found("order", id_or_number))
    }
}
