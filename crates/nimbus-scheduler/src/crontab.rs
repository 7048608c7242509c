//! Crontab field-list parser.
//!
//! Each of the five crontab fields is an independent expression over a
//! bounded integer range: `*`, `*/N`, `N`, `A-B`, `A-B/N`, and comma lists
//! of any of those. Parsing happens at schedule-save time so a bad
//! expression is rejected before it is ever persisted.

use nimbus_core::{NimbusError, Result};

/// Bounds per crontab position.
pub const MINUTE: (u32, u32) = (0, 59);
pub const HOUR: (u32, u32) = (0, 23);
pub const DAY_OF_WEEK: (u32, u32) = (0, 6);
pub const DAY_OF_MONTH: (u32, u32) = (1, 31);
pub const MONTH_OF_YEAR: (u32, u32) = (1, 12);

/// Expand one crontab field into its sorted, deduplicated value list.
pub fn parse_field(spec: &str, min: u32, max: u32) -> Result<Vec<u32>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(NimbusError::MalformedTrigger("empty crontab field".into()));
    }

    let mut values = Vec::new();
    for part in spec.split(',') {
        values.extend(parse_part(part.trim(), min, max)?);
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn parse_part(part: &str, min: u32, max: u32) -> Result<Vec<u32>> {
    let bad = |msg: String| NimbusError::MalformedTrigger(msg);

    // Split off an optional "/N" step suffix.
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let n: u32 = step
                .parse()
                .map_err(|_| bad(format!("invalid step '{step}' in '{part}'")))?;
            if n == 0 {
                return Err(bad(format!("step must be positive in '{part}'")));
            }
            (range, n)
        }
        None => (part, 1),
    };

    let (lo, hi) = if range == "*" {
        (min, max)
    } else if let Some((a, b)) = range.split_once('-') {
        let lo: u32 = a
            .parse()
            .map_err(|_| bad(format!("invalid range start '{a}' in '{part}'")))?;
        let hi: u32 = b
            .parse()
            .map_err(|_| bad(format!("invalid range end '{b}' in '{part}'")))?;
        if lo > hi {
            return Err(bad(format!("descending range '{part}'")));
        }
        (lo, hi)
    } else {
        let n: u32 = range
            .parse()
            .map_err(|_| bad(format!("invalid crontab value '{part}'")))?;
        (n, n)
    };

    if lo < min || hi > max {
        return Err(bad(format!(
            "'{part}' out of range {min}-{max}"
        )));
    }
    Ok((lo..=hi).step_by(step as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard() {
        assert_eq!(parse_field("*", 0, 5).unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_wildcard_step() {
        assert_eq!(parse_field("*/15", 0, 59).unwrap(), vec![0, 15, 30, 45]);
    }

    #[test]
    fn test_single_value() {
        assert_eq!(parse_field("30", 0, 59).unwrap(), vec![30]);
    }

    #[test]
    fn test_range() {
        assert_eq!(parse_field("9-17", 0, 23).unwrap(), (9..=17).collect::<Vec<_>>());
    }

    #[test]
    fn test_range_with_step() {
        assert_eq!(parse_field("0-30/10", 0, 59).unwrap(), vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_comma_list_sorted_deduped() {
        assert_eq!(parse_field("45,0,15,0", 0, 59).unwrap(), vec![0, 15, 45]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            parse_field("61", MINUTE.0, MINUTE.1),
            Err(NimbusError::MalformedTrigger(_))
        ));
        assert!(parse_field("24", HOUR.0, HOUR.1).is_err());
        assert!(parse_field("7", DAY_OF_WEEK.0, DAY_OF_WEEK.1).is_err());
        assert!(parse_field("0", DAY_OF_MONTH.0, DAY_OF_MONTH.1).is_err());
        assert!(parse_field("13", MONTH_OF_YEAR.0, MONTH_OF_YEAR.1).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_field("", 0, 59).is_err());
        assert!(parse_field("abc", 0, 59).is_err());
        assert!(parse_field("*/0", 0, 59).is_err());
        assert!(parse_field("30-10", 0, 59).is_err());
        assert!(parse_field("1,2,x", 0, 59).is_err());
    }
}
