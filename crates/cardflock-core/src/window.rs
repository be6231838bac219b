use chrono::NaiveDate;

use crate::CoreError;

/// Parse a date in `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYYMMDD`, `YYYY-MM` or
/// `YYYYMM` form. The day component is `None` for the month-only forms.
pub fn parse_ymd(input: &str) -> Result<(i32, u32, Option<u32>), CoreError> {
    let cleaned: String = input.chars().filter(|ch| !ch.is_whitespace()).collect();
    let invalid = |reason: &str| CoreError::InvalidDate(format!("'{input}': {reason}"));

    let (year, month, day) = if cleaned.contains('-') || cleaned.contains('/') {
        let parts: Vec<&str> = cleaned.split(['-', '/']).collect();
        match parts.as_slice() {
            [y, m, d, ..] => (
                parse_component(y).ok_or_else(|| invalid("bad year"))?,
                parse_component(m).ok_or_else(|| invalid("bad month"))? as u32,
                Some(parse_component(d).ok_or_else(|| invalid("bad day"))? as u32),
            ),
            [y, m] => (
                parse_component(y).ok_or_else(|| invalid("bad year"))?,
                parse_component(m).ok_or_else(|| invalid("bad month"))? as u32,
                None,
            ),
            _ => return Err(invalid("expected YYYY-MM-DD or YYYY-MM")),
        }
    } else if cleaned.chars().all(|ch| ch.is_ascii_digit()) && cleaned.len() == 8 {
        (
            parse_component(&cleaned[..4]).ok_or_else(|| invalid("bad year"))?,
            parse_component(&cleaned[4..6]).ok_or_else(|| invalid("bad month"))? as u32,
            Some(parse_component(&cleaned[6..]).ok_or_else(|| invalid("bad day"))? as u32),
        )
    } else if cleaned.chars().all(|ch| ch.is_ascii_digit()) && cleaned.len() == 6 {
        (
            parse_component(&cleaned[..4]).ok_or_else(|| invalid("bad year"))?,
            parse_component(&cleaned[4..]).ok_or_else(|| invalid("bad month"))? as u32,
            None,
        )
    } else {
        return Err(invalid("expected YYYY-MM-DD, YYYYMMDD, YYYY-MM or YYYYMM"));
    };

    if year <= 0 {
        return Err(invalid("year must be positive"));
    }
    if !(1..=12).contains(&month) {
        return Err(invalid("month must be in 1..=12"));
    }
    if let Some(day) = day
        && !(1..=last_day_of_month(year, month)).contains(&day)
    {
        return Err(invalid("day outside month range"));
    }

    Ok((year, month, day))
}

pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 {
                29
            } else {
                28
            }
        }
    }
}

/// Sliding month windows over a date range. The first window starts at the
/// start date (day 1 when the form omits it); each window ends on the last
/// day of `window_size - 1` months later, clamped to the end date; successive
/// windows advance by `step_size` months with the day reset to 1. Emission
/// stops after a clamped window or once the next start would reach the end.
pub fn time_windows(
    start: &str,
    end: &str,
    window_size: u32,
    step_size: u32,
) -> Result<Vec<(NaiveDate, NaiveDate)>, CoreError> {
    let window_size = window_size.max(1);
    let step_size = step_size.max(1);

    let (start_year, start_month, start_day) = parse_ymd(start)?;
    let (end_year, end_month, end_day) = parse_ymd(end)?;
    let start_day = start_day.unwrap_or(1);
    let end_day = end_day.unwrap_or_else(|| last_day_of_month(end_year, end_month));
    let end_date = make_date(end_year, end_month, end_day)?;

    let mut windows = Vec::new();
    let mut year = start_year;
    let mut month = start_month;
    let mut day = start_day;
    loop {
        let begin = make_date(year, month, day)?;
        let (close_year, close_month) = add_months(year, month, window_size - 1);
        let mut close = make_date(close_year, close_month, last_day_of_month(close_year, close_month))?;
        let clamped = close > end_date;
        if clamped {
            close = end_date;
        }
        windows.push((begin, close));
        if clamped {
            break;
        }

        let (next_year, next_month) = add_months(year, month, step_size);
        year = next_year;
        month = next_month;
        day = 1;
        if make_date(year, month, day)? >= end_date {
            break;
        }
    }

    Ok(windows)
}

fn parse_component(raw: &str) -> Option<i32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<i32>().ok()
}

fn add_months(year: i32, month: u32, delta: u32) -> (i32, u32) {
    let zero_based = year * 12 + month as i32 - 1 + delta as i32;
    (zero_based.div_euclid(12), zero_based.rem_euclid(12) as u32 + 1)
}

fn make_date(year: i32, month: u32, day: u32) -> Result<NaiveDate, CoreError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| CoreError::InvalidDate(format!("'{year:04}-{month:02}-{day:02}'")))
}

#[cfg(test)]
mod tests {
    use chrono::Datelike;

    use super::*;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("date literal")
    }

    #[test]
    fn parse_ymd_accepts_all_supported_forms() {
        assert_eq!(parse_ymd("2023-01-05").expect("dashed"), (2023, 1, Some(5)));
        assert_eq!(parse_ymd("2023/01/05").expect("slashed"), (2023, 1, Some(5)));
        assert_eq!(parse_ymd("20230105").expect("compact"), (2023, 1, Some(5)));
        assert_eq!(parse_ymd("2023-01").expect("month dashed"), (2023, 1, None));
        assert_eq!(parse_ymd("202301").expect("month compact"), (2023, 1, None));
        assert_eq!(parse_ymd(" 2023-01-05 ").expect("whitespace"), (2023, 1, Some(5)));
    }

    #[test]
    fn parse_ymd_rejects_bad_month_and_day() {
        assert!(parse_ymd("2023-13-01").is_err());
        assert!(parse_ymd("2023-00-01").is_err());
        assert!(parse_ymd("2023-02-29").is_err());
        assert!(parse_ymd("2024-02-30").is_err());
        assert!(parse_ymd("garbage").is_err());
        assert!(parse_ymd("2023").is_err());
    }

    #[test]
    fn parse_ymd_accepts_leap_day() {
        assert_eq!(parse_ymd("2024-02-29").expect("leap day"), (2024, 2, Some(29)));
    }

    #[test]
    fn quarter_windows_tile_half_year() {
        let windows = time_windows("2023-01-01", "2023-06-30", 3, 3).expect("windows");
        assert_eq!(
            windows,
            vec![
                (date("2023-01-01"), date("2023-03-31")),
                (date("2023-04-01"), date("2023-06-30")),
            ]
        );
    }

    #[test]
    fn step_equal_to_window_tiles_range_disjointly() {
        let windows = time_windows("2022-11", "2023-10", 2, 2).expect("windows");
        for pair in windows.windows(2) {
            let gap = pair[1].0 - pair[0].1;
            assert_eq!(gap.num_days(), 1, "windows must be adjacent and disjoint");
        }
        assert_eq!(windows.first().expect("first").0, date("2022-11-01"));
        assert_eq!(windows.last().expect("last").1, date("2023-10-31"));
    }

    #[test]
    fn final_window_is_clamped_to_end_date() {
        let windows = time_windows("2023-01-01", "2023-05-15", 3, 3).expect("windows");
        assert_eq!(
            windows,
            vec![
                (date("2023-01-01"), date("2023-03-31")),
                (date("2023-04-01"), date("2023-05-15")),
            ]
        );
    }

    #[test]
    fn start_day_is_preserved_for_first_window_only() {
        let windows = time_windows("2023-01-15", "2023-04-30", 2, 1).expect("windows");
        assert_eq!(windows[0].0, date("2023-01-15"));
        assert!(windows.iter().skip(1).all(|(begin, _)| begin.day0() == 0));
    }

    #[test]
    fn windows_carry_across_year_boundary() {
        let windows = time_windows("2023-11-01", "2024-02-29", 2, 2).expect("windows");
        assert_eq!(
            windows,
            vec![
                (date("2023-11-01"), date("2023-12-31")),
                (date("2024-01-01"), date("2024-02-29")),
            ]
        );
    }

    #[test]
    fn oversized_window_clamps_to_single_emission() {
        let windows = time_windows("2023-01", "2023-03", 12, 1).expect("windows");
        assert_eq!(windows, vec![(date("2023-01-01"), date("2023-03-31"))]);
    }
}
