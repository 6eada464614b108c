// Utilitários para manipulação de valores monetários

use crate::error::{GatewayError, Result};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Casas decimais aceitas no wire
pub const AMOUNT_SCALE: u32 = 2;

/// Rejects zero, negative and sub-cent amounts.
///
/// The returned value is normalized to two decimals, so what gets stored is
/// exactly what [`format_amount`] sends.
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(GatewayError::InvalidInput(format!(
            "amount must be greater than 0, got {}",
            amount
        )));
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(GatewayError::InvalidInput(format!(
            "amount {} has more than {} decimal places",
            amount, AMOUNT_SCALE
        )));
    }

    let mut value = amount.normalize();
    value.rescale(AMOUNT_SCALE);
    Ok(value)
}

/// Wire form of an amount: always two decimals, `.` separator, no grouping.
///
/// Expects an amount that already went through [`validate_amount`].
pub fn format_amount(amount: Decimal) -> String {
    let mut value = amount;
    value.rescale(AMOUNT_SCALE);
    value.to_string()
}

pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let cleaned = raw.trim().replace(',', "");
    let value = Decimal::from_str(&cleaned)
        .map_err(|_| GatewayError::InvalidInput(format!("not a decimal amount: {}", raw)))?;
    validate_amount(value)
}
