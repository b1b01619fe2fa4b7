//! Display formatting for section titles and values.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::value::{display_string, number_to_string};

lazy_static! {
    static ref UPPERCASE: Regex = Regex::new(r"([A-Z])").unwrap();
    static ref NON_ALPHANUMERIC: Regex = Regex::new(r"[^a-zA-Z0-9]").unwrap();
}

/// Turn a camelCase or snake_case key into a title: `industryBreakdown`
/// becomes `Industry Breakdown`, `top_accounts` becomes `Top accounts`.
pub fn format_title(key: &str) -> String {
    let spaced = UPPERCASE.replace_all(key, " $1");
    let mut chars = spaced.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    capitalized.replace('_', " ").trim().to_string()
}

/// Replace every character that is not an ASCII letter or digit with `_`.
pub fn sanitize_identifier(s: &str) -> String {
    NON_ALPHANUMERIC.replace_all(s, "_").into_owned()
}

/// Format a number with thousands separators and at most three fractional
/// digits, e.g. `1234567.891` → `1,234,567.891`.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return number_to_string(value);
    }
    let rounded = (value * 1000.0).round() / 1000.0;
    let sign = if rounded < 0.0 { "-" } else { "" };
    let abs = rounded.abs();
    let int_part = abs.trunc();
    let frac = format!("{:.3}", abs - int_part);
    let frac = frac.trim_end_matches('0').trim_end_matches('.');
    // `frac` is now "0" or "0.xyz"
    let frac = frac.strip_prefix('0').unwrap_or("");
    format!("{}{}{}", sign, group_thousands(&format!("{:.0}", int_part)), frac)
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Compact currency formatting: `$1.2B`, `$3.4M`, `$12K`, or the plain
/// amount below a thousand.
pub fn format_currency(value: f64) -> String {
    if value >= 1_000_000_000.0 {
        format!("${:.1}B", value / 1_000_000_000.0)
    } else if value >= 1_000_000.0 {
        format!("${:.1}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("${:.0}K", value / 1_000.0)
    } else {
        format!("${}", format_number(value))
    }
}

/// Whether numbers in the named column read as money.
fn is_money_column(column: &str) -> bool {
    let lower = column.to_lowercase();
    lower.contains("revenue") || lower.contains("amount") || lower.contains("value")
}

/// Format a table cell. Numbers in money columns use compact currency
/// formatting, other numbers get thousands separators and everything else is
/// shown as-is.
pub fn format_cell(value: &JsonValue, column: &str) -> String {
    match value {
        JsonValue::Number(n) => match n.as_f64() {
            Some(f) if is_money_column(column) => format_currency(f),
            Some(f) => format_number(f),
            None => n.to_string(),
        },
        other => display_string(other),
    }
}

/// Format a metric value: numbers get thousands separators.
pub fn format_metric(value: &JsonValue) -> String {
    match value.as_f64() {
        Some(f) => format_number(f),
        None => display_string(value),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn titles() {
        assert_eq!(format_title("industryBreakdown"), "Industry Breakdown");
        assert_eq!(format_title("summary"), "Summary");
        assert_eq!(format_title("top_accounts"), "Top accounts");
        assert_eq!(format_title("Total Revenue"), "Total  Revenue");
        assert_eq!(format_title(""), "");
    }

    #[test]
    fn identifiers() {
        assert_eq!(sanitize_identifier("Revenue (K)"), "Revenue__K_");
        assert_eq!(sanitize_identifier("top-accounts"), "top_accounts");
    }

    #[test]
    fn numbers() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(999.0), "999");
        assert_eq!(format_number(1000.0), "1,000");
        assert_eq!(format_number(1234567.891), "1,234,567.891");
        assert_eq!(format_number(-4200.5), "-4,200.5");
        assert_eq!(format_number(0.12345), "0.123");
    }

    #[test]
    fn currency() {
        assert_eq!(format_currency(2_500_000_000.0), "$2.5B");
        assert_eq!(format_currency(1_000_000.0), "$1.0M");
        assert_eq!(format_currency(12_345.0), "$12K");
        assert_eq!(format_currency(950.0), "$950");
        assert_eq!(format_currency(0.0), "$0");
    }

    #[test]
    fn cells_follow_column_names() {
        assert_eq!(format_cell(&json!(1_000_000), "AnnualRevenue"), "$1.0M");
        assert_eq!(format_cell(&json!(1500), "Deal Amount"), "$2K");
        assert_eq!(format_cell(&json!(1500), "Employees"), "1,500");
        assert_eq!(format_cell(&json!("Acme"), "Name"), "Acme");
        assert_eq!(format_cell(&json!(null), "Name"), "");
    }

    #[test]
    fn metrics() {
        assert_eq!(format_metric(&json!(12500)), "12,500");
        assert_eq!(format_metric(&json!("$120K")), "$120K");
        assert_eq!(format_metric(&json!(true)), "true");
    }
}
