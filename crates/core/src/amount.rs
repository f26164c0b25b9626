use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

use crate::text::fold_width;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("No digits in amount: '{0}'")]
    NoDigits(String),
    #[error("Invalid amount: '{0}'")]
    Invalid(String),
}

/// Parse recognized amount text into a signed decimal.
///
/// Accepts an optional leading sign (`+`, `-`, full-width or typographic
/// minus), currency markers (`¥`, `￥`, `元`), and either `,` or `.` as the
/// decimal separator. When both appear the right-most one is the decimal
/// separator; a lone comma is decimal only when followed by one or two
/// digits (`12,50`), otherwise it groups thousands (`1,234`).
pub fn parse_amount(text: &str) -> Result<Decimal, AmountError> {
    let folded = fold_width(text);
    let mut negative = false;
    let mut body = String::with_capacity(folded.len());

    for c in folded.chars() {
        match c {
            '-' if body.is_empty() => negative = true,
            '+' if body.is_empty() => {}
            '0'..='9' | '.' | ',' => body.push(c),
            '¥' | '￥' | '元' | '\'' | '_' => {}
            c if c.is_whitespace() => {}
            _ => return Err(AmountError::Invalid(text.to_string())),
        }
    }

    if !body.chars().any(|c| c.is_ascii_digit()) {
        return Err(AmountError::NoDigits(text.to_string()));
    }

    let canonical =
        canonical_number(&body).ok_or_else(|| AmountError::Invalid(text.to_string()))?;
    let value =
        Decimal::from_str(&canonical).map_err(|_| AmountError::Invalid(text.to_string()))?;

    Ok(if negative { -value } else { value })
}

/// Format an amount with at least two decimal places, keeping any extra
/// precision so that `parse_amount(format_amount(x)) == x`.
pub fn format_amount(value: Decimal) -> String {
    let places = value.scale().max(2) as usize;
    format!("{value:.places$}")
}

/// Rewrite digits-and-separators into `Decimal::from_str` form.
fn canonical_number(body: &str) -> Option<String> {
    let dots = body.matches('.').count();
    let commas = body.matches(',').count();

    let decimal_sep = match (body.rfind('.'), body.rfind(',')) {
        (Some(d), Some(c)) => Some(if d > c { '.' } else { ',' }),
        (Some(_), None) => (dots == 1).then_some('.'),
        (None, Some(c)) => {
            let tail = body.len() - c - 1;
            (commas == 1 && (1..=2).contains(&tail)).then_some(',')
        }
        (None, None) => None,
    };

    if let Some(sep) = decimal_sep {
        if body.matches(sep).count() != 1 {
            return None;
        }
    }

    let mut out = String::with_capacity(body.len() + 1);
    for c in body.chars() {
        if Some(c) == decimal_sep {
            if out.is_empty() {
                out.push('0');
            }
            out.push('.');
        } else if c.is_ascii_digit() {
            out.push(c);
        }
    }

    if out.ends_with('.') {
        out.pop();
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn parses_plain_and_signed() {
        assert_eq!(parse_amount("35.00").unwrap(), dec("35.00"));
        assert_eq!(parse_amount("-35.00").unwrap(), dec("-35.00"));
        assert_eq!(parse_amount("+100").unwrap(), dec("100"));
    }

    #[test]
    fn parses_thousands_grouping() {
        assert_eq!(parse_amount("1,234.56").unwrap(), dec("1234.56"));
        assert_eq!(parse_amount("1,234").unwrap(), dec("1234"));
        assert_eq!(parse_amount("12,345,678.9").unwrap(), dec("12345678.9"));
    }

    #[test]
    fn parses_comma_decimal_locales() {
        assert_eq!(parse_amount("12,50").unwrap(), dec("12.50"));
        assert_eq!(parse_amount("1.234,56").unwrap(), dec("1234.56"));
        assert_eq!(parse_amount("1 234,56").unwrap(), dec("1234.56"));
    }

    #[test]
    fn parses_currency_markers_and_full_width() {
        assert_eq!(parse_amount("¥128.50").unwrap(), dec("128.50"));
        assert_eq!(parse_amount("30.07元").unwrap(), dec("30.07"));
        assert_eq!(parse_amount("－３０．０７").unwrap(), dec("-30.07"));
        assert_eq!(parse_amount("-￥ 5").unwrap(), dec("-5"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_amount("abc"), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_amount("¥"), Err(AmountError::NoDigits(_))));
        assert!(matches!(parse_amount("1.2.3,4,5"), Err(AmountError::Invalid(_))));
        assert!(parse_amount("12-5").is_err());
    }

    #[test]
    fn format_keeps_two_places_minimum() {
        assert_eq!(format_amount(dec("-35")), "-35.00");
        assert_eq!(format_amount(dec("128.5")), "128.50");
        assert_eq!(format_amount(dec("0.125")), "0.125");
    }

    #[test]
    fn parse_format_round_trip() {
        let inputs = [
            "-35.00", "128.50", "1,234.56", "12,50", "1.234,56", "¥0.01", "+7", "－３０．０７",
            "999,999,999.99", "0.125",
        ];
        for input in inputs {
            let parsed = parse_amount(input).unwrap();
            let again = parse_amount(&format_amount(parsed)).unwrap();
            assert_eq!(parsed, again, "round trip failed for {input}");
        }
    }
}
