use crate::domain::errors::CaseError;
use chrono::Duration;
use super::{compiled, PatternCell};

const ISO_DURATION: &str =
    r"^P(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:\.(\d{1,3}))?S)?)?$";

/// Parses the subset of ISO-8601 durations used by timer triggers:
/// weeks, days, hours, minutes and (fractional) seconds.
pub fn parse_iso_duration(text: &str) -> Result<Duration, CaseError> {
    let text = text.trim();
    static PATTERN: PatternCell = PatternCell::new();
    let re = compiled(&PATTERN, ISO_DURATION)?;
    let invalid = || CaseError::expression(format!("invalid ISO-8601 duration '{}'", text));
    let caps = re.captures(text).ok_or_else(invalid)?;
    if text == "P" || text.ends_with('T') {
        return Err(invalid());
    }

    let field = |index: usize| -> Result<i64, CaseError> {
        match caps.get(index) {
            Some(m) => m.as_str().parse::<i64>().map_err(|_| invalid()),
            None => Ok(0),
        }
    };
    let millis_fraction = match caps.get(6) {
        Some(m) => {
            let digits = m.as_str();
            let value = digits.parse::<i64>().map_err(|_| invalid())?;
            value * 10_i64.pow(3 - digits.len() as u32)
        }
        None => 0,
    };

    let seconds = field(1)?
        .checked_mul(7 * 86_400)
        .and_then(|s| s.checked_add(field(2).ok()?.checked_mul(86_400)?))
        .and_then(|s| s.checked_add(field(3).ok()?.checked_mul(3_600)?))
        .and_then(|s| s.checked_add(field(4).ok()?.checked_mul(60)?))
        .and_then(|s| s.checked_add(field(5).ok()?))
        .ok_or_else(invalid)?;
    let millis = seconds
        .checked_mul(1_000)
        .and_then(|ms| ms.checked_add(millis_fraction))
        .ok_or_else(invalid)?;
    Duration::try_milliseconds(millis).ok_or_else(invalid)
}
