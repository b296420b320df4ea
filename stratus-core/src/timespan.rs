//! Timespan strings as used by backend options and schedule repeats
//!
//! Accepted forms: a bare number of seconds (`"90"`) or a run of `<number><unit>` pairs
//! (`"1D12h"`, `"30s"`). Units: `s`, `m` (minutes), `h`, `D`/`d`, `W`/`w`, `M` (30 days),
//! `Y`/`y` (365 days).

use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

pub fn parse_timespan(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty timespan".to_string());
    }

    if let Ok(seconds) = input.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let unit = match c {
            's' => 1,
            'm' => MINUTE,
            'h' | 'H' => HOUR,
            'D' | 'd' => DAY,
            'W' | 'w' => 7 * DAY,
            'M' => 30 * DAY,
            'Y' | 'y' => 365 * DAY,
            other => return Err(format!("invalid timespan unit '{}' in \"{}\"", other, input)),
        };

        if digits.is_empty() {
            return Err(format!("missing number before '{}' in \"{}\"", c, input));
        }
        let amount: u64 = digits
            .parse()
            .map_err(|_| format!("number too large in \"{}\"", input))?;
        total = amount
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| format!("timespan overflow in \"{}\"", input))?;
        digits.clear();
    }

    if !digits.is_empty() {
        return Err(format!("trailing number without unit in \"{}\"", input));
    }

    Ok(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("90", 90 ; "bare seconds")]
    #[test_case("30s", 30 ; "seconds")]
    #[test_case("5m", 300 ; "minutes")]
    #[test_case("1D", 86_400 ; "day")]
    #[test_case("1D12h", 129_600 ; "compound")]
    #[test_case("2W", 1_209_600 ; "weeks")]
    #[test_case("1M", 2_592_000 ; "month")]
    fn test_parse_valid(input: &str, seconds: u64) {
        assert_eq!(parse_timespan(input).unwrap(), Duration::from_secs(seconds));
    }

    #[test_case("" ; "empty")]
    #[test_case("abc" ; "no digits")]
    #[test_case("5x" ; "unknown unit")]
    #[test_case("1h30" ; "trailing number")]
    fn test_parse_invalid(input: &str) {
        assert!(parse_timespan(input).is_err());
    }
}
