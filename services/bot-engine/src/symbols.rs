//! Symbol and quantity utilities
//!
//! Trading pairs arrive as `BTC/USDT`, `BTC-USDT` or exchange-style `BTCUSDT`.

use rust_decimal::{Decimal, RoundingStrategy};

/// Quantities are stored with this many decimal places
pub const QUANTITY_DP: u32 = 8;

/// Quote currencies recognised when a symbol has no separator, longest first
const KNOWN_QUOTES: &[&str] = &["FDUSD", "USDT", "USDC", "BUSD", "TUSD", "USD", "EUR", "BTC", "ETH", "BNB"];

/// A parsed trading pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolParts {
    pub base: String,
    pub quote: String,
}

impl SymbolParts {
    /// Canonical `BASE/QUOTE` form
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

/// Split a symbol into base and quote currency
pub fn parse_symbol(symbol: &str) -> Option<SymbolParts> {
    let upper = symbol.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }

    if let Some((base, quote)) = upper.split_once(|c: char| matches!(c, '/' | '-' | '_')) {
        if base.is_empty() || quote.is_empty() {
            return None;
        }
        return Some(SymbolParts {
            base: base.to_string(),
            quote: quote.to_string(),
        });
    }

    KNOWN_QUOTES.iter().find_map(|quote| {
        upper
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| SymbolParts {
                base: base.to_string(),
                quote: quote.to_string(),
            })
    })
}

/// Truncate a quantity to `QUANTITY_DP` places. Never rounds up, so a
/// truncated quantity can never cost more than the untruncated one.
pub fn truncate_quantity(quantity: Decimal) -> Decimal {
    if quantity <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    quantity
        .round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero)
        .normalize()
}
