//! Conversions between user-entered gwei strings and wei

use crate::error::{DeployerError, DeployerResult};

use ethers::types::U256;
use ethers::utils::{format_units, parse_units};

/// One gwei in wei
pub const GWEI: U256 = U256([1_000_000_000, 0, 0, 0]);

/// Any decimal of at most this many digits fits a U256 (10^77 < 2^256)
const MAX_U256_DIGITS: usize = 77;

/// Check that a plain decimal string scales by `10^decimals` into a U256
/// without overflowing or dropping fractional digits
pub(crate) fn check_scalable(value: &str, decimals: u32) -> Result<(), String> {
    let (integer, fraction) = value.split_once('.').unwrap_or((value, ""));
    if fraction.len() > decimals as usize {
        return Err(format!(
            "'{}' has more than {} fractional digits",
            value, decimals
        ));
    }

    let significant = integer.trim_start_matches('0').len();
    if significant + decimals as usize > MAX_U256_DIGITS {
        return Err(format!("'{}' is too large", value));
    }
    Ok(())
}

/// Parse a decimal gwei amount (e.g. `"1.5"`) into wei
pub fn gwei_to_wei(value: &str) -> DeployerResult<U256> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DeployerError::InvalidGasConfig(
            "empty gwei amount".to_string(),
        ));
    }
    if trimmed.starts_with('-') {
        return Err(DeployerError::InvalidGasConfig(format!(
            "negative gwei amount '{}'",
            trimmed
        )));
    }

    check_scalable(trimmed, 9).map_err(DeployerError::InvalidGasConfig)?;

    parse_units(trimmed, "gwei")
        .map(Into::into)
        .map_err(|e| DeployerError::InvalidGasConfig(format!("'{}': {}", trimmed, e)))
}

/// Format wei as a gwei string without trailing zeros (`1500000000` -> `"1.5"`)
pub fn wei_to_gwei(wei: U256) -> String {
    match format_units(wei, "gwei") {
        Ok(formatted) => trim_decimal(&formatted),
        Err(_) => wei.to_string(),
    }
}

/// Treat blank form fields as absent
pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn trim_decimal(value: &str) -> String {
    if !value.contains('.') {
        return value.to_string();
    }
    value.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_gwei() {
        assert_eq!(gwei_to_wei("1.5").unwrap(), U256::from(1_500_000_000u64));
        assert_eq!(gwei_to_wei(" 30 ").unwrap(), U256::from(30) * GWEI);
        assert_eq!(gwei_to_wei("0.000000001").unwrap(), U256::one());
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert!(gwei_to_wei("").is_err());
        assert!(gwei_to_wei("-2").is_err());
        assert!(gwei_to_wei("abc").is_err());
    }

    #[test]
    fn rejects_amounts_that_cannot_be_exact() {
        // Below one wei
        assert!(matches!(
            gwei_to_wei("0.0000000001"),
            Err(DeployerError::InvalidGasConfig(_))
        ));
        assert!(matches!(
            gwei_to_wei("1.0000000009"),
            Err(DeployerError::InvalidGasConfig(_))
        ));

        // Would overflow 256 bits once scaled to wei
        let huge = format!("1{}", "0".repeat(70));
        assert!(matches!(
            gwei_to_wei(&huge),
            Err(DeployerError::InvalidGasConfig(_))
        ));

        let largest = "9".repeat(68);
        assert!(gwei_to_wei(&largest).is_ok());
        assert!(gwei_to_wei(&format!("000{}", largest)).is_ok());
    }

    #[test]
    fn scalable_checks_both_ends() {
        assert!(check_scalable("10.5", 2).is_ok());
        assert!(check_scalable("10.125", 2).is_err());
        assert!(check_scalable(&"9".repeat(59), 18).is_ok());
        assert!(check_scalable(&"9".repeat(60), 18).is_err());
    }

    #[test]
    fn formats_without_trailing_zeros() {
        assert_eq!(wei_to_gwei(U256::from(1_500_000_000u64)), "1.5");
        assert_eq!(wei_to_gwei(U256::from(2) * GWEI), "2");
        assert_eq!(wei_to_gwei(U256::zero()), "0");
    }

    #[test]
    fn blank_fields_are_absent() {
        assert_eq!(non_blank(&Some("  ".to_string())), None);
        assert_eq!(non_blank(&Some(" 3 ".to_string())), Some("3"));
        assert_eq!(non_blank(&None), None);
    }
}
