use arrow::datatypes::DataType;
use once_cell::sync::Lazy;
use regex::Regex;

static NON_NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^-.0-9]").expect("numeric filter regex should compile"));

/// 1) Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// 2) Infer Arrow dtype from a cleaned string
pub fn infer_arrow_dtype_from_str(s: &str) -> DataType {
    if parse_number(s).is_some() {
        DataType::Float64
    } else {
        DataType::Utf8
    }
}

/// Strict-ish float parse: tolerates surrounding whitespace and thousands separators.
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains(',') {
        s.replace(',', "").parse().ok()
    } else {
        s.parse().ok()
    }
}

/// Lenient float parse for scraped display values ("$1,234.5", "12.5%"):
/// everything except digits, '-' and '.' is dropped first.
pub fn to_numeric(s: &str) -> Option<f64> {
    let stripped = NON_NUMERIC.replace_all(s, "");
    if stripped.is_empty() {
        return None;
    }
    stripped.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_strips_quotes() {
        assert_eq!(clean_str("  \"ABC\" "), "ABC");
        assert_eq!(clean_str("\""), "\"");
        assert_eq!(clean_str(" x "), "x");
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number(" 1,234.5 "), Some(1234.5));
        assert_eq!(parse_number("-0.25"), Some(-0.25));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(to_numeric("$1,234.5"), Some(1234.5));
        assert_eq!(to_numeric("N/A"), None);
        assert_eq!(infer_arrow_dtype_from_str("12"), DataType::Float64);
        assert_eq!(infer_arrow_dtype_from_str("AAPL"), DataType::Utf8);
    }
}
