use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};

// `%y` before `%Y`: the latter accepts "24" as year 24.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y%m%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d %b %Y",
    "%b %d, %Y",
    "%d-%b-%Y",
    "%d %B %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// Best-effort date parse over the layouts the scraped sources use.
pub fn parse_flexible_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Days since the Unix epoch, as stored in Arrow `Date32`.
pub fn date32(d: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch is a valid date");
    (d - epoch).num_days() as i32
}

/// Zero-based `k`-th `weekday` of the month: `k = 2` is the third Wednesday (the IMM date).
pub fn kth_weekday_of_month(year: i32, month: u32, k: u8, weekday: Weekday) -> Option<NaiveDate> {
    let d = NaiveDate::from_weekday_of_month_opt(year, month, weekday, k.checked_add(1)?)?;
    debug_assert_eq!(d.weekday(), weekday);
    Some(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flexible_dates() {
        let d = NaiveDate::from_ymd_opt(2024, 6, 13).unwrap();
        assert_eq!(parse_flexible_date("2024-06-13"), Some(d));
        assert_eq!(parse_flexible_date("20240613"), Some(d));
        assert_eq!(parse_flexible_date("06/13/2024"), Some(d));
        assert_eq!(parse_flexible_date("13 Jun 2024"), Some(d));
        assert_eq!(parse_flexible_date("Jun 13, 2024"), Some(d));
        assert_eq!(parse_flexible_date("2024-06-13T08:00:00"), Some(d));
        assert_eq!(parse_flexible_date("soon"), None);
    }

    #[test]
    fn epoch_days() {
        assert_eq!(date32(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap()), 1);
        assert_eq!(date32(NaiveDate::from_ymd_opt(1969, 12, 31).unwrap()), -1);
    }

    #[test]
    fn imm_dates() {
        assert_eq!(
            kth_weekday_of_month(2022, 4, 2, Weekday::Wed),
            NaiveDate::from_ymd_opt(2022, 4, 20)
        );
        assert_eq!(
            kth_weekday_of_month(2024, 3, 2, Weekday::Wed),
            NaiveDate::from_ymd_opt(2024, 3, 20)
        );
        assert_eq!(kth_weekday_of_month(2024, 2, 4, Weekday::Wed), None);
    }
}
