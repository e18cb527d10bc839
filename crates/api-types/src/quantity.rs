//! Value comparison for resource quantities.
//!
//! The API server canonicalizes quantities when it persists an object, so the
//! `16000000000` written by the agent comes back as `16G`. Comparing the raw
//! strings would report a change on every cycle.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const NANO_EXP: i32 = 9;

/// Parses a quantity string into an integer count of nano-units.
///
/// Returns `None` for malformed input or values that do not fit in `i128`.
pub fn parse_nano(raw: &str) -> Option<i128> {
    let raw = raw.trim();
    let (negative, body) = match raw.as_bytes().first()? {
        b'-' => (true, &raw[1..]),
        b'+' => (false, &raw[1..]),
        _ => (false, raw),
    };

    let number_end = body
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(body.len());
    let (number, suffix) = body.split_at(number_end);
    if number.is_empty() || number == "." {
        return None;
    }

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if frac_part.contains('.') {
        return None;
    }

    let mut mantissa: i128 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        mantissa = mantissa
            .checked_mul(10)?
            .checked_add(i128::from(c.to_digit(10)?))?;
    }

    let (exp10, binary_multiplier) = suffix_scale(suffix)?;
    let exp10 = exp10
        .checked_add(NANO_EXP)?
        .checked_sub(i32::try_from(frac_part.len()).ok()?)?;

    let mut value = mantissa.checked_mul(binary_multiplier)?;
    if exp10 >= 0 {
        value = value.checked_mul(10i128.checked_pow(exp10 as u32)?)?;
    } else {
        value /= 10i128.checked_pow(exp10.unsigned_abs())?;
    }

    Some(if negative { -value } else { value })
}

// (power of ten, binary multiplier)
fn suffix_scale(suffix: &str) -> Option<(i32, i128)> {
    let scale = match suffix {
        "" => (0, 1),
        "n" => (-9, 1),
        "u" => (-6, 1),
        "m" => (-3, 1),
        "k" => (3, 1),
        "M" => (6, 1),
        "G" => (9, 1),
        "T" => (12, 1),
        "P" => (15, 1),
        "E" => (18, 1),
        "Ki" => (0, 1 << 10),
        "Mi" => (0, 1 << 20),
        "Gi" => (0, 1 << 30),
        "Ti" => (0, 1 << 40),
        "Pi" => (0, 1 << 50),
        "Ei" => (0, 1 << 60),
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            (exponent.parse::<i32>().ok()?, 1)
        }
    };
    Some(scale)
}

/// Compares two quantities by value, falling back to string equality when
/// either side does not parse.
pub fn quantities_equal(a: &Quantity, b: &Quantity) -> bool {
    match (parse_nano(&a.0), parse_nano(&b.0)) {
        (Some(x), Some(y)) => x == y,
        _ => a.0 == b.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn test_parse_plain_integer() {
        assert_eq!(parse_nano("100"), Some(100_000_000_000));
        assert_eq!(parse_nano("0"), Some(0));
    }

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_nano("16G"), parse_nano("16000000000"));
        assert_eq!(parse_nano("1Ki"), parse_nano("1024"));
        assert_eq!(parse_nano("500m"), Some(500_000_000));
        assert_eq!(parse_nano("1.5Gi"), parse_nano("1610612736"));
        assert_eq!(parse_nano("16e9"), parse_nano("16G"));
        assert_eq!(parse_nano("1E"), parse_nano("1e18"));
    }

    #[test]
    fn test_parse_sign() {
        assert_eq!(parse_nano("-1k"), Some(-1_000_000_000_000));
        assert_eq!(parse_nano("+2"), parse_nano("2"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_nano(""), None);
        assert_eq!(parse_nano("abc"), None);
        assert_eq!(parse_nano("1.2.3"), None);
        assert_eq!(parse_nano("10Zi"), None);
        assert_eq!(parse_nano("."), None);
        assert_eq!(parse_nano("1e2147483647"), None);
        assert_eq!(parse_nano("1.5e-2147483648"), None);
    }

    #[test]
    fn test_quantities_equal() {
        assert!(quantities_equal(&q("16G"), &q("16000000000")));
        assert!(quantities_equal(&q("100"), &q("100")));
        assert!(!quantities_equal(&q("100"), &q("99")));
        assert!(!quantities_equal(&q("bogus"), &q("100")));
        assert!(quantities_equal(&q("bogus"), &q("bogus")));
        assert!(!quantities_equal(&q("1e2147483640"), &q("1")));
    }
}
