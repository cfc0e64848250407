/// One timestamped price observation from the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    /// Epoch seconds reported by the upstream.
    pub epoch: u64,
    pub quote: f64,
}

impl Tick {
    pub fn new(epoch: u64, quote: f64) -> Self {
        Self { epoch, quote }
    }

    /// Build ticks from the parallel `prices`/`times` arrays of a history snapshot.
    /// Extra entries on either side are ignored.
    pub fn from_history(prices: &[f64], times: &[u64]) -> Vec<Self> {
        if prices.len() != times.len() {
            tracing::warn!(
                prices = prices.len(),
                times = times.len(),
                "History arrays differ in length, truncating to the shorter one"
            );
        }
        prices
            .iter()
            .zip(times.iter())
            .map(|(&quote, &epoch)| Self { epoch, quote })
            .collect()
    }
}
