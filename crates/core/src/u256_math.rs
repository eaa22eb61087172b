//! Fixed-point U256 arithmetic for the scenario's independent cross-checks.
//!
//! All functions truncate toward zero, like the protocol's integer math.
//! Amounts are scaled by each asset's own decimals; prices are in the
//! quote currency's smallest unit per whole token.

use alloy::primitives::U256;

/// WAD constant: 1e18, the health factor scale (1 WAD = parity)
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Basis points denominator (10000 = 100%)
pub const BPS_DENOMINATOR: U256 = U256::from_limbs([10_000u64, 0, 0, 0]);

/// Pre-computed powers of 10 for decimal scaling
const POW10: [u128; 39] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
    10_000_000_000_000_000_000,
    100_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000_000,
];

/// Power of 10 lookup (table up to 10^38)
#[inline(always)]
pub fn pow10(exp: u8) -> U256 {
    if exp < 39 {
        U256::from(POW10[exp as usize])
    } else {
        U256::from(10u64).pow(U256::from(exp))
    }
}

/// `value * bps / 10000`
#[inline(always)]
pub fn mul_bps(value: U256, bps: u64) -> U256 {
    value * U256::from(bps) / BPS_DENOMINATOR
}

/// Value of `amount` token units in the quote currency's smallest unit.
#[inline(always)]
pub fn asset_value(amount: U256, price: U256, decimals: u8) -> U256 {
    if amount.is_zero() || price.is_zero() {
        return U256::ZERO;
    }
    amount * price / pow10(decimals)
}

/// Token units worth `value` at `price`. Zero when the price is zero.
#[inline(always)]
pub fn value_to_amount(value: U256, price: U256, decimals: u8) -> U256 {
    if price.is_zero() {
        return U256::ZERO;
    }
    value * pow10(decimals) / price
}

/// Health factor in WAD from a threshold-adjusted collateral value.
/// HF = collateral_adjusted * 10^18 / debt
///
/// Returns U256::MAX if debt is zero.
#[inline(always)]
pub fn calculate_hf_wad(collateral_adjusted: U256, debt: U256) -> U256 {
    if debt.is_zero() {
        return U256::MAX;
    }
    (collateral_adjusted * WAD) / debt
}

/// Check if health factor indicates liquidatable position (HF < 1.0).
#[inline(always)]
pub fn is_liquidatable_wad(hf_wad: U256) -> bool {
    hf_wad < WAD
}

/// Collateral a liquidator receives for repaying `debt_to_cover`.
///
/// `seized = debtPrice × debtToCover × bonus × 10^collDec / (collPrice × 10^debtDec × 10000)`
///
/// `bonus_bps` is the protocol's liquidation bonus as a share of the
/// repaid value (10500 = 100% + 5% bonus). Returns zero when the
/// collateral price is zero.
pub fn expected_seized_collateral(
    debt_price: U256,
    debt_to_cover: U256,
    debt_decimals: u8,
    collateral_price: U256,
    collateral_decimals: u8,
    bonus_bps: u64,
) -> U256 {
    if collateral_price.is_zero() {
        return U256::ZERO;
    }
    debt_price * debt_to_cover * pow10(collateral_decimals) * U256::from(bonus_bps)
        / (collateral_price * pow10(debt_decimals) * BPS_DENOMINATOR)
}

/// Amount of an asset that uses `utilization_bps` of a borrow capacity
/// expressed in quote-currency units.
///
/// `amount = capacity × 10^decimals / price × utilization / 10000`
pub fn borrow_amount_for_capacity(
    capacity: U256,
    price: U256,
    decimals: u8,
    utilization_bps: u64,
) -> U256 {
    mul_bps(value_to_amount(capacity, price, decimals), utilization_bps)
}

/// Absolute difference.
#[inline(always)]
pub fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// Parse a decimal string ("10", "0.5", "1000.25") into token units.
///
/// Fractional digits beyond `decimals` are rejected rather than truncated.
pub fn parse_units(value: &str, decimals: u8) -> anyhow::Result<U256> {
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        anyhow::bail!("empty amount");
    }
    if fraction.len() > decimals as usize {
        anyhow::bail!("amount {} has more than {} decimals", value, decimals);
    }

    let whole = if whole.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(whole, 10)?
    };
    let fraction_units = if fraction.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(fraction, 10)? * pow10(decimals - fraction.len() as u8)
    };

    Ok(whole * pow10(decimals) + fraction_units)
}

/// Format token units with the asset's decimals, trimming trailing zeros.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let unit = pow10(decimals);
    let whole = amount / unit;
    let fraction = amount % unit;
    if fraction.is_zero() {
        return whole.to_string();
    }
    let digits = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Convert WAD (18 decimals) to f64.
/// Use only for display/logging, not for computation.
#[inline(always)]
pub fn wad_to_f64(wad: U256) -> f64 {
    if wad == U256::MAX {
        return f64::INFINITY;
    }
    if wad <= U256::from(u128::MAX) {
        let value: u128 = wad.to();
        value as f64 / 1e18
    } else {
        let limbs = wad.as_limbs();
        let high = limbs[1] as f64 * (u64::MAX as f64 + 1.0);
        let low = limbs[0] as f64;
        (high + low) / 1e18
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow10_lookup() {
        assert_eq!(pow10(0), U256::from(1u64));
        assert_eq!(pow10(6), U256::from(1_000_000u64));
        assert_eq!(pow10(18), U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(pow10(40), U256::from(10u64).pow(U256::from(40u64)));
    }

    #[test]
    fn test_mul_bps() {
        assert_eq!(mul_bps(U256::from(1000u64), 11_200), U256::from(1120u64));
        assert_eq!(mul_bps(U256::from(999u64), 5_000), U256::from(499u64));
    }

    #[test]
    fn test_asset_value_scales_by_decimals() {
        // 10 USDC at 0.0005 ETH each
        let value = asset_value(U256::from(10_000_000u64), U256::from(500_000_000_000_000u64), 6);
        assert_eq!(value, U256::from(5_000_000_000_000_000u64));
    }

    #[test]
    fn test_calculate_hf_wad() {
        let collateral = U256::from(1000u64) * WAD;
        let debt = U256::from(500u64) * WAD;

        assert_eq!(calculate_hf_wad(collateral, debt), U256::from(2u64) * WAD);
        assert_eq!(calculate_hf_wad(collateral, U256::ZERO), U256::MAX);
    }

    #[test]
    fn test_is_liquidatable() {
        let hf_low = (WAD * U256::from(9u64)) / U256::from(10u64);
        assert!(is_liquidatable_wad(hf_low));

        let hf_high = (WAD * U256::from(11u64)) / U256::from(10u64);
        assert!(!is_liquidatable_wad(hf_high));

        // HF = 1.0 is the boundary and stays safe
        assert!(!is_liquidatable_wad(WAD));
    }

    #[test]
    fn test_expected_seized_collateral_reference_case() {
        // debt price 1, collateral price 2000, 250 units of a 6-decimal
        // debt, 5% bonus, 18-decimal collateral
        let seized = expected_seized_collateral(
            U256::from(1u64),
            U256::from(250_000_000u64),
            6,
            U256::from(2000u64),
            18,
            10_500,
        );
        assert_eq!(seized, U256::from(131_250_000_000_000_000u64));
    }

    #[test]
    fn test_expected_seized_collateral_truncates() {
        // 1 unit at price 1 vs collateral price 3: 1 * 10500 / (3 * 10000)
        let seized = expected_seized_collateral(U256::from(1u64), U256::from(1u64), 0, U256::from(3u64), 0, 10_500);
        assert_eq!(seized, U256::ZERO);
    }

    #[test]
    fn test_borrow_amount_for_capacity() {
        // 0.8 ETH of capacity at 0.0005 ETH per USDC, full utilization
        let amount = borrow_amount_for_capacity(
            U256::from(800_000_000_000_000_000u64),
            U256::from(500_000_000_000_000u64),
            6,
            10_000,
        );
        assert_eq!(amount, U256::from(1_600_000_000u64));
    }

    #[test]
    fn test_parse_and_format_units() {
        assert_eq!(parse_units("10", 6).unwrap(), U256::from(10_000_000u64));
        assert_eq!(parse_units("0.5", 18).unwrap(), U256::from(500_000_000_000_000_000u64));
        assert_eq!(parse_units(".25", 2).unwrap(), U256::from(25u64));
        assert!(parse_units("1.0000001", 6).is_err());
        assert!(parse_units("abc", 6).is_err());

        assert_eq!(format_units(U256::from(10_000_000u64), 6), "10");
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(5u64), 6), "0.000005");
    }

    #[test]
    fn test_wad_to_f64() {
        let wad = U256::from(1000u64) * WAD;
        assert!((wad_to_f64(wad) - 1000.0).abs() < 0.001);
        assert!(wad_to_f64(U256::MAX).is_infinite());
    }
}
