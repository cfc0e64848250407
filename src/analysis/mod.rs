pub mod precision;
pub mod stats;

pub use precision::{decimal_places, last_digit, MIN_DECIMAL_PLACES};
pub use stats::{
    current_digit, digit_comparison, digit_distribution, even_odd_split, rise_fall_split,
    DigitComparison, DigitStats, EvenOddSplit, RiseFallSplit,
};
