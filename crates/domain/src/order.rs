//! Order value object and its status machine.

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId};
use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// Lifecycle status of an order.
///
/// Transitions form a DAG:
///
/// ```text
/// created ──► paid ──► shipped
///    │          │
///    └──────────┴────► cancelled
/// ```
///
/// `shipped` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Paid,
    Cancelled,
    Shipped,
}

impl Status {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Paid => "paid",
            Status::Cancelled => "cancelled",
            Status::Shipped => "shipped",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Status::Created),
            "paid" => Ok(Status::Paid),
            "cancelled" => Ok(Status::Cancelled),
            "shipped" => Ok(Status::Shipped),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

/// A single order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub sku: String,
    pub quantity: u32,
    /// Unit price in integer minor units (cents).
    pub price_minor: i64,
}

/// An order as persisted and exposed over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub status: Status,
    pub currency: String,
    /// Sum of `quantity * price_minor` over all items.
    pub total_amount: i64,
    pub items: Vec<Item>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Validates the inputs and builds a new order in `created` status.
    pub fn new(
        customer_id: CustomerId,
        currency: &str,
        items: Vec<Item>,
    ) -> Result<Self, OrderError> {
        if customer_id.as_uuid().is_nil() {
            return Err(OrderError::CustomerIdRequired);
        }
        if !is_currency_code(currency) {
            return Err(OrderError::InvalidCurrency);
        }
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        let mut total: i64 = 0;
        for item in &items {
            if item.sku.is_empty() || item.quantity == 0 || item.price_minor < 0 {
                return Err(OrderError::InvalidItem {
                    sku: item.sku.clone(),
                });
            }
            total += i64::from(item.quantity) * item.price_minor;
        }
        let now = Utc::now();

        Ok(Self {
            id: OrderId::new(),
            customer_id,
            status: Status::Created,
            currency: currency.to_string(),
            total_amount: total,
            items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Marks the order paid. Only created orders can be paid.
    pub fn mark_paid(&mut self) -> Result<(), OrderError> {
        if self.status != Status::Created {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: Status::Paid,
            });
        }
        self.status = Status::Paid;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Cancels the order. Cancelling twice is a no-op; shipped orders
    /// cannot be cancelled.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        if self.status == Status::Shipped {
            return Err(OrderError::CannotCancelShipped);
        }
        if self.status == Status::Cancelled {
            return Ok(());
        }
        self.status = Status::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Marks the order shipped. Only paid orders can be shipped.
    pub fn mark_shipped(&mut self) -> Result<(), OrderError> {
        if self.status != Status::Paid {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: Status::Shipped,
            });
        }
        self.status = Status::Shipped;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Applies the transition that leads to `target`.
    pub fn transition(&mut self, target: Status) -> Result<(), OrderError> {
        match target {
            Status::Paid => self.mark_paid(),
            Status::Cancelled => self.cancel(),
            Status::Shipped => self.mark_shipped(),
            Status::Created => Err(OrderError::InvalidTransition {
                from: self.status,
                to: Status::Created,
            }),
        }
    }
}

fn is_currency_code(s: &str) -> bool {
    s.len() == 3 && s.bytes().all(|b| b.is_ascii_uppercase())
}
