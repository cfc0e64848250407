use crate::model::tick::Tick;

/// Precision floor so whole-number quotes are still read at two places.
pub const MIN_DECIMAL_PLACES: usize = 2;

/// Fractional part of the canonical (shortest round-trip) rendering of `value`.
fn fraction_of(rendered: &str) -> &str {
    rendered.split_once('.').map(|(_, f)| f).unwrap_or("")
}

/// Number of digits after the decimal separator in the canonical rendering.
pub fn fractional_digits(value: f64) -> usize {
    fraction_of(&value.to_string()).len()
}

/// Widest fractional precision seen across `ticks`, never below [`MIN_DECIMAL_PLACES`].
pub fn decimal_places(ticks: &[Tick]) -> usize {
    ticks
        .iter()
        .map(|t| fractional_digits(t.quote))
        .fold(MIN_DECIMAL_PLACES, usize::max)
}

/// Final decimal digit of `value` once right-padded with zeros to `decimal_places`.
///
/// The canonical rendering drops trailing zeros (`1.200` renders as `1.2`), so a
/// fraction shorter than the precision context always ends in a padded zero.
/// A fraction longer than the context is not truncated.
pub fn last_digit(value: f64, decimal_places: usize) -> u8 {
    let rendered = value.to_string();
    let fraction = fraction_of(&rendered);
    if fraction.len() < decimal_places {
        return 0;
    }
    fraction
        .bytes()
        .last()
        .filter(u8::is_ascii_digit)
        .map(|b| b - b'0')
        .unwrap_or(0)
}
