//! Fixed-point arithmetic for order valuation.
//!
//! Values in the common (USD) unit are carried as WAD integers (18 decimals)
//! so profit comparisons are exact. `f64` never enters the decision path; it
//! is only produced for log output.

use alloy::primitives::{I256, U256};
use rust_decimal::Decimal;

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Decimals of a WAD value.
pub const WAD_DECIMALS: u32 = 18;

/// 10^exp as U256. `None` past 10^77, which no longer fits.
#[inline]
pub fn pow10(exp: u32) -> Option<U256> {
    U256::from(10u64).checked_pow(U256::from(exp))
}

/// Convert a non-negative decimal to WAD, truncating digits beyond 18 places.
pub fn decimal_to_wad(value: Decimal) -> Option<U256> {
    if value.is_sign_negative() && !value.is_zero() {
        return None;
    }
    let mantissa = U256::from(value.mantissa().unsigned_abs());
    let scale = value.scale();
    if scale <= WAD_DECIMALS {
        mantissa.checked_mul(pow10(WAD_DECIMALS - scale)?)
    } else {
        Some(mantissa / pow10(scale - WAD_DECIMALS)?)
    }
}

/// Value of `amount` base units of a token with `decimals` at `price_wad` per whole token.
///
/// Formula: amount * price_wad / 10^decimals. `None` on overflow.
pub fn value_wad(amount: U256, price_wad: U256, decimals: u8) -> Option<U256> {
    if amount.is_zero() || price_wad.is_zero() {
        return Some(U256::ZERO);
    }
    let scaled = amount.checked_mul(price_wad)?;
    Some(scaled / pow10(decimals as u32)?)
}

/// Cost of `gas_units` at `gas_price_wei`, valued at `native_price_wad` per whole native token.
pub fn gas_cost_wad(gas_units: u64, gas_price_wei: u128, native_price_wad: U256) -> Option<U256> {
    let wei = U256::from(gas_units).checked_mul(U256::from(gas_price_wei))?;
    value_wad(wei, native_price_wad, 18)
}

/// Signed difference `a - b` of two WAD values.
pub fn signed_sub(a: U256, b: U256) -> Option<I256> {
    let a = I256::try_from(a).ok()?;
    let b = I256::try_from(b).ok()?;
    a.checked_sub(b)
}

/// Render a signed WAD as a decimal string with up to 6 fractional digits.
/// Display only.
pub fn format_wad(value: I256) -> String {
    let sign = if value.is_negative() { "-" } else { "" };
    let abs = value.unsigned_abs();
    let whole = abs / WAD;
    let frac: u64 = (abs % WAD).to::<u64>() / 1_000_000_000_000;
    if frac == 0 {
        format!("{sign}{whole}")
    } else {
        let frac = format!("{frac:06}");
        format!("{sign}{whole}.{}", frac.trim_end_matches('0'))
    }
}
