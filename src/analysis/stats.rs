use crate::model::tick::Tick;

use super::precision::last_digit;

pub fn ratio_pct(numer: usize, denom: usize) -> f64 {
    if denom == 0 {
        return 0.0;
    }
    (numer as f64) * 100.0 / (denom as f64)
}

/// Occurrences of each last digit 0..=9 across the window.
pub fn digit_counts(ticks: &[Tick], decimal_places: usize) -> [usize; 10] {
    let mut counts = [0usize; 10];
    for tick in ticks {
        counts[last_digit(tick.quote, decimal_places) as usize] += 1;
    }
    counts
}

pub fn distribution_from_counts(counts: &[usize; 10]) -> [f64; 10] {
    let total: usize = counts.iter().sum();
    let mut pct = [0.0; 10];
    for (slot, &count) in pct.iter_mut().zip(counts.iter()) {
        *slot = ratio_pct(count, total);
    }
    pct
}

/// Percentage of ticks ending in each digit. All zeros for an empty window.
pub fn digit_distribution(ticks: &[Tick], decimal_places: usize) -> [f64; 10] {
    distribution_from_counts(&digit_counts(ticks, decimal_places))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvenOddSplit {
    pub even: f64,
    pub odd: f64,
}

pub fn even_odd_from_counts(counts: &[usize; 10]) -> EvenOddSplit {
    let even: usize = counts.iter().step_by(2).sum();
    let odd: usize = counts.iter().skip(1).step_by(2).sum();
    let total = even + odd;
    EvenOddSplit {
        even: ratio_pct(even, total),
        odd: ratio_pct(odd, total),
    }
}

pub fn even_odd_split(ticks: &[Tick], decimal_places: usize) -> EvenOddSplit {
    even_odd_from_counts(&digit_counts(ticks, decimal_places))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RiseFallSplit {
    pub rise: f64,
    pub fall: f64,
}

/// Share of rising vs falling consecutive moves. Unchanged pairs count toward neither side.
pub fn rise_fall_split(ticks: &[Tick]) -> RiseFallSplit {
    let mut rise = 0usize;
    let mut fall = 0usize;
    for pair in ticks.windows(2) {
        if pair[1].quote > pair[0].quote {
            rise += 1;
        } else if pair[1].quote < pair[0].quote {
            fall += 1;
        }
    }
    let total = rise + fall;
    RiseFallSplit {
        rise: ratio_pct(rise, total),
        fall: ratio_pct(fall, total),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DigitComparison {
    pub reference: u8,
    pub over: f64,
    pub under: f64,
    pub equal: f64,
}

/// Classify each last digit against `reference`, as percentages of the window length.
pub fn digit_comparison(ticks: &[Tick], decimal_places: usize, reference: u8) -> DigitComparison {
    let mut over = 0usize;
    let mut under = 0usize;
    let mut equal = 0usize;
    for tick in ticks {
        let digit = last_digit(tick.quote, decimal_places);
        match digit.cmp(&reference) {
            std::cmp::Ordering::Greater => over += 1,
            std::cmp::Ordering::Less => under += 1,
            std::cmp::Ordering::Equal => equal += 1,
        }
    }
    let total = ticks.len();
    DigitComparison {
        reference,
        over: ratio_pct(over, total),
        under: ratio_pct(under, total),
        equal: ratio_pct(equal, total),
    }
}

pub fn current_digit(ticks: &[Tick], decimal_places: usize) -> Option<u8> {
    ticks
        .last()
        .map(|tick| last_digit(tick.quote, decimal_places))
}

/// Last digits of the newest `n` ticks, oldest first.
pub fn recent_digits(ticks: &[Tick], decimal_places: usize, n: usize) -> Vec<u8> {
    let start = ticks.len().saturating_sub(n);
    ticks[start..]
        .iter()
        .map(|tick| last_digit(tick.quote, decimal_places))
        .collect()
}

/// Digits tied for the highest and for the lowest count, ascending. Only digits
/// that occurred at least once qualify, so both are empty for an empty window.
pub fn digit_extremes(counts: &[usize; 10]) -> (Vec<u8>, Vec<u8>) {
    let seen = || counts.iter().copied().filter(|&c| c > 0);
    let (Some(max), Some(min)) = (seen().max(), seen().min()) else {
        return (Vec::new(), Vec::new());
    };
    let digits_with = |target: usize| -> Vec<u8> {
        (0u8..10)
            .filter(|&d| counts[d as usize] == target)
            .collect()
    };
    (digits_with(max), digits_with(min))
}

/// Every statistic derived from one window snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitStats {
    pub tick_count: usize,
    pub decimal_places: usize,
    pub distribution: [f64; 10],
    pub even_odd: EvenOddSplit,
    pub rise_fall: RiseFallSplit,
    pub comparison: Option<DigitComparison>,
    pub current_digit: Option<u8>,
    /// Every digit tied for the highest share.
    pub most_frequent: Vec<u8>,
    /// Every digit tied for the lowest non-zero share.
    pub least_frequent: Vec<u8>,
    pub recent_digits: Vec<u8>,
}

impl DigitStats {
    pub fn compute(
        ticks: &[Tick],
        decimal_places: usize,
        reference_digit: Option<u8>,
        recent_len: usize,
    ) -> Self {
        let counts = digit_counts(ticks, decimal_places);
        let (most_frequent, least_frequent) = digit_extremes(&counts);
        Self {
            tick_count: ticks.len(),
            decimal_places,
            distribution: distribution_from_counts(&counts),
            even_odd: even_odd_from_counts(&counts),
            rise_fall: rise_fall_split(ticks),
            comparison: reference_digit.map(|d| digit_comparison(ticks, decimal_places, d)),
            current_digit: current_digit(ticks, decimal_places),
            most_frequent,
            least_frequent,
            recent_digits: recent_digits(ticks, decimal_places, recent_len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_pct_handles_zero_denom() {
        assert!((ratio_pct(0, 0) - 0.0).abs() < f64::EPSILON);
        assert!((ratio_pct(1, 4) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn extremes_skip_absent_digits() {
        let mut counts = [0usize; 10];
        counts[3] = 4;
        counts[7] = 1;
        counts[8] = 4;
        assert_eq!(digit_extremes(&counts), (vec![3, 8], vec![7]));
        assert_eq!(digit_extremes(&[0; 10]), (vec![], vec![]));
    }
}
