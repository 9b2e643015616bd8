//! Parsers for the schedule grammar
//!
//! Day-of-week specifications are a single digit ("3"), a comma list
//! ("0,2,4"), or a closed range ("1-5"), with Sunday = 0. Times of day
//! are 24-hour "HH:MM".

use std::collections::BTreeSet;

use chrono::NaiveTime;

use crate::error::{Error, Result};

/// Parse a day-of-week specification into a set of weekday indices 0..=6.
pub fn parse_days(spec: &str) -> Result<BTreeSet<u8>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(Error::ConfigError("empty day-of-week specification".into()));
    }

    if let Some((start, end)) = spec.split_once('-') {
        let start = parse_day(start)?;
        let end = parse_day(end)?;
        if start > end {
            return Err(Error::ConfigError(format!(
                "day range start {} is after end {}",
                start, end
            )));
        }
        return Ok((start..=end).collect());
    }

    spec.split(',').map(parse_day).collect()
}

fn parse_day(token: &str) -> Result<u8> {
    let token = token.trim();
    let day: u8 = token
        .parse()
        .map_err(|_| Error::ConfigError(format!("invalid day-of-week '{}'", token)))?;
    if day > 6 {
        return Err(Error::ConfigError(format!(
            "day-of-week {} out of range 0..=6",
            day
        )));
    }
    Ok(day)
}

/// Parse a 24-hour "HH:MM" time of day.
pub fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| Error::ConfigError(format!("invalid time of day '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_day() {
        assert_eq!(parse_days("3").unwrap(), BTreeSet::from([3]));
    }

    #[test]
    fn comma_list() {
        assert_eq!(parse_days("0,2,4").unwrap(), BTreeSet::from([0, 2, 4]));
    }

    #[test]
    fn closed_range() {
        assert_eq!(parse_days("1-5").unwrap(), BTreeSet::from([1, 2, 3, 4, 5]));
    }

    #[test]
    fn list_with_spaces() {
        assert_eq!(parse_days(" 1, 3 ,5 ").unwrap(), BTreeSet::from([1, 3, 5]));
    }

    #[test]
    fn rejects_out_of_range_day() {
        assert!(parse_days("7").is_err());
        assert!(parse_days("0,9").is_err());
    }

    #[test]
    fn rejects_reversed_range() {
        assert!(parse_days("5-1").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_days("").is_err());
        assert!(parse_days("mon").is_err());
        assert!(parse_days("1,,2").is_err());
        assert!(parse_days("-3").is_err());
    }

    #[test]
    fn parses_time_of_day() {
        assert_eq!(
            parse_time("14:30").unwrap(),
            NaiveTime::from_hms_opt(14, 30, 0).unwrap()
        );
        assert_eq!(
            parse_time("00:00").unwrap(),
            NaiveTime::from_hms_opt(0, 0, 0).unwrap()
        );
    }

    #[test]
    fn rejects_bad_times() {
        assert!(parse_time("24:00").is_err());
        assert!(parse_time("12:60").is_err());
        assert!(parse_time("noon").is_err());
        assert!(parse_time("9").is_err());
    }
}
