use chrono::{DateTime, Timelike, Utc};

/// Military (HHMM) representation of a wall-clock time, e.g. 800 or 1700.
///
/// Schedule windows store their bounds in this form, so 07:59 → 759 and
/// 17:00 → 1700. Comparison on the raw integer matches chronological order
/// because the hour occupies the high digits.
pub fn military_time(now: DateTime<Utc>) -> u32 {
    now.hour() * 100 + now.minute()
}

/// Inclusive window check on HHMM bounds.
///
/// A window with fewer than two bounds never restricts; a lone start or
/// stop bound is treated as "no restriction".
pub fn within_window(now: DateTime<Utc>, start: Option<u32>, stop: Option<u32>) -> bool {
    match (start, stop) {
        (Some(start), Some(stop)) => {
            let mil = military_time(now);
            start <= mil && mil <= stop
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap()
    }

    #[test]
    fn military_conversion() {
        assert_eq!(military_time(at(7, 59)), 759);
        assert_eq!(military_time(at(8, 0)), 800);
        assert_eq!(military_time(at(17, 0)), 1700);
        assert_eq!(military_time(at(0, 0)), 0);
        assert_eq!(military_time(at(23, 59)), 2359);
    }

    #[test]
    fn window_is_inclusive_on_both_ends() {
        assert!(!within_window(at(7, 59), Some(800), Some(1700)));
        assert!(within_window(at(8, 0), Some(800), Some(1700)));
        assert!(within_window(at(12, 30), Some(800), Some(1700)));
        assert!(within_window(at(17, 0), Some(800), Some(1700)));
        assert!(!within_window(at(17, 1), Some(800), Some(1700)));
    }

    #[test]
    fn partial_window_never_restricts() {
        assert!(within_window(at(3, 0), Some(800), None));
        assert!(within_window(at(3, 0), None, Some(200)));
        assert!(within_window(at(3, 0), None, None));
    }
}
