//! Storage quantity parsing
//!
//! Accepts the Kubernetes quantity grammar for non-negative values:
//! a decimal number followed by an optional binary-SI suffix (`Ki`..`Ei`),
//! decimal-SI suffix (`n`, `u`, `m`, `k`, `M`, `G`, `T`, `P`, `E`) or
//! decimal exponent (`e3`, `E-2`).

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const BINARY_SI_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SI_SUFFIXES: [&str; 9] = ["n", "u", "m", "k", "M", "G", "T", "P", "E"];

/// Parse a storage size such as "128Mi" or "1.5Gi" into a [`Quantity`].
///
/// The original string is kept as-is; the API server canonicalizes it.
pub fn parse_storage_quantity(value: &str) -> Result<Quantity, String> {
    if value.is_empty() {
        return Err("quantity is empty".to_string());
    }

    let unsigned = match value.as_bytes()[0] {
        b'-' => return Err(format!("quantity '{}' must not be negative", value)),
        b'+' => &value[1..],
        _ => value,
    };

    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);

    if !is_valid_number(number) {
        return Err(format!(
            "invalid quantity '{}' (expected e.g. '128Mi', '1Gi', '500M')",
            value
        ));
    }

    if !is_valid_suffix(suffix) {
        return Err(format!(
            "invalid quantity '{}': unknown suffix '{}'",
            value, suffix
        ));
    }

    Ok(Quantity(value.to_string()))
}

fn is_valid_number(number: &str) -> bool {
    let mut parts = number.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();
    !fraction.contains('.') && (!whole.is_empty() || !fraction.is_empty())
}

fn is_valid_suffix(suffix: &str) -> bool {
    if suffix.is_empty()
        || BINARY_SI_SUFFIXES.contains(&suffix)
        || DECIMAL_SI_SUFFIXES.contains(&suffix)
    {
        return true;
    }

    // Decimal exponent: e|E followed by an optionally signed integer
    let Some(exponent) = suffix.strip_prefix(['e', 'E']) else {
        return false;
    };
    let digits = exponent
        .strip_prefix(['+', '-'])
        .unwrap_or(exponent);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_binary_and_decimal_suffixes() {
        for qty in ["128Mi", "1Gi", "2Ti", "500M", "10G", "1k", "1E", "100"] {
            let parsed = parse_storage_quantity(qty).unwrap();
            assert_eq!(parsed.0, qty);
        }
    }

    #[test]
    fn accepts_decimals_and_exponents() {
        for qty in ["1.5Gi", ".5Gi", "1.", "1e3", "2E6", "1e-2", "+64Mi"] {
            assert!(parse_storage_quantity(qty).is_ok(), "{qty} should parse");
        }
    }

    #[test]
    fn rejects_words() {
        let err = parse_storage_quantity("notasize").unwrap_err();
        assert!(err.contains("notasize"));
    }

    #[test]
    fn rejects_malformed_values() {
        for qty in ["", "Mi", "1.2.3Gi", "12 Mi", "1Gb", "1MiB", "1e", "1e+", "."] {
            assert!(parse_storage_quantity(qty).is_err(), "{qty:?} should fail");
        }
    }

    #[test]
    fn rejects_negative_sizes() {
        let err = parse_storage_quantity("-1Gi").unwrap_err();
        assert!(err.contains("negative"));
    }
}
