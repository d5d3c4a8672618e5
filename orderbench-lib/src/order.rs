use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Path of the order-entry endpoint, relative to the API base.
pub const ORDERS_PATH: &str = "/api/v1/trade/orders";

/// Instrument submitted by the smoke iteration.
pub const SMOKE_SYMBOL: &str = "BTCUSDT";
/// Limit price submitted by the smoke iteration.
pub const SMOKE_PRICE: f64 = 50_000.;
/// Quantity submitted by the smoke iteration.
pub const SMOKE_QTY: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    #[serde(alias = "BUY")]
    Buy,
    #[serde(alias = "SELL")]
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order submission payload as sent to `POST /api/v1/trade/orders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(serialize_with = "serialize_number")]
    pub price: f64,
    #[serde(serialize_with = "serialize_number")]
    pub qty: f64,
}

impl OrderRequest {
    /// The fixed order submitted on every smoke iteration.
    pub fn smoke() -> Self {
        Self {
            symbol: SMOKE_SYMBOL.to_owned(),
            side: OrderSide::Buy,
            price: SMOKE_PRICE,
            qty: SMOKE_QTY,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidOrder> {
        if self.symbol.trim().is_empty() {
            return Err(InvalidOrder::EmptySymbol);
        }
        if !(self.price.is_finite() && self.price > 0.) {
            return Err(InvalidOrder::Price(self.price));
        }
        if !(self.qty.is_finite() && self.qty > 0.) {
            return Err(InvalidOrder::Qty(self.qty));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvalidOrder {
    EmptySymbol,
    Price(f64),
    Qty(f64),
}

impl fmt::Display for InvalidOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidOrder::EmptySymbol => f.write_str("invalid order: empty symbol"),
            InvalidOrder::Price(price) => {
                write!(f, "invalid order: price must be positive (got {price})")
            }
            InvalidOrder::Qty(qty) => {
                write!(f, "invalid order: qty must be positive (got {qty})")
            }
        }
    }
}

impl std::error::Error for InvalidOrder {}

// Integral values are written as JSON integers so that `50000`
// is not sent as `50000.0`.
fn serialize_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.; // 2^53

    if value.is_finite() && value.fract() == 0. && value.abs() <= MAX_EXACT_INT {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}
