//! Order execution - broker seam and the paper-trading fill simulator

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::BrokerError;
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    /// Reference price (last quote for market orders, limit for limit orders)
    pub price: Decimal,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
            price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub fill_price: Decimal,
    pub filled_quantity: Decimal,
    /// Quote-currency commission charged on the fill
    pub commission: Decimal,
}

impl OrderResult {
    pub fn is_filled(&self) -> bool {
        matches!(self.status, OrderStatus::Filled | OrderStatus::PartiallyFilled)
            && self.filled_quantity > Decimal::ZERO
    }
}

/// Broker collaborator: paper simulator or a live exchange adapter
#[async_trait]
pub trait Broker: Send + Sync {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderResult, BrokerError>;

    /// True for brokers that never touch real funds
    fn is_paper(&self) -> bool;
}

/// Simulated fills at the reference price, optionally with random adverse slippage
#[derive(Debug, Clone)]
pub struct PaperBroker {
    commission_bps: u32,
    max_slippage_bps: u32,
}

impl PaperBroker {
    pub fn new(commission_bps: u32, max_slippage_bps: u32) -> Self {
        Self {
            commission_bps,
            max_slippage_bps,
        }
    }

    fn fill_price(&self, side: Side, price: Decimal) -> Decimal {
        if self.max_slippage_bps == 0 {
            return price;
        }
        let slippage_bps = rand::thread_rng().gen_range(0..=self.max_slippage_bps);
        let slippage = Decimal::from(slippage_bps) / Decimal::from(10_000);
        // Slippage always works against the order
        price * (Decimal::ONE + side.sign() * slippage)
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new(10, 0)
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderResult, BrokerError> {
        if order.quantity <= Decimal::ZERO {
            return Err(BrokerError::Rejected(format!("Invalid quantity {}", order.quantity)));
        }
        if order.price <= Decimal::ZERO {
            return Err(BrokerError::Rejected(format!("Invalid price {}", order.price)));
        }

        let fill_price = self.fill_price(order.side, order.price);
        let notional = fill_price * order.quantity;
        let commission = notional * Decimal::from(self.commission_bps) / Decimal::from(10_000);

        info!(
            "PAPER {} {} {} @ {} (commission {})",
            order.side, order.quantity, order.symbol, fill_price, commission
        );

        Ok(OrderResult {
            order_id: Uuid::new_v4(),
            status: OrderStatus::Filled,
            fill_price,
            filled_quantity: order.quantity,
            commission,
        })
    }

    fn is_paper(&self) -> bool {
        true
    }
}
