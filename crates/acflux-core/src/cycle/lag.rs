use crate::constants::{
    LAG_SEARCH_LEN, LAG_SHIFT_STEP, LAG_SUSPECT_AFTER, LAG_SUSPECT_SHIFTS, LAG_ZERO_SHIFTS,
};
use crate::data_formats::gasdata::GasData;
use crate::gastype::GasType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagConfig {
    /// seconds after the nominal open searched for the peak
    pub search_len: i64,
    pub shift_step: i64,
    /// a peak this many seconds after the nominal open is not trusted
    pub suspect_after: i64,
    pub zero_shifts: usize,
    pub suspect_shifts: usize,
}

impl Default for LagConfig {
    fn default() -> Self {
        Self {
            search_len: LAG_SEARCH_LEN,
            shift_step: LAG_SHIFT_STEP,
            suspect_after: LAG_SUSPECT_AFTER,
            zero_shifts: LAG_ZERO_SHIFTS,
            suspect_shifts: LAG_SUSPECT_SHIFTS,
        }
    }
}

/// Finds the delay between the scheduled chamber opening and the concentration peak of
/// the lag gas.
#[derive(Debug, Clone, Copy, Default)]
pub struct LagDetector {
    pub config: LagConfig,
}

impl LagDetector {
    pub fn new(config: LagConfig) -> Self {
        Self { config }
    }

    /// Lag in seconds relative to `og_open`, 0 when there is nothing to find.
    pub fn detect(&self, data: &GasData, gas: GasType, og_open: i64) -> i64 {
        let Some(mut peak) = self.peak_in(data, gas, og_open) else {
            tracing::debug!("no {} data for finding lag", gas);
            return 0;
        };

        if peak - og_open == 0 {
            peak = self.shift_back(data, gas, og_open, peak, self.config.zero_shifts);
        }
        if peak - og_open >= self.config.suspect_after {
            tracing::debug!("peak {}s after open, looking further back", peak - og_open);
            peak = self.shift_back(data, gas, og_open, peak, self.config.suspect_shifts);
        }
        peak - og_open
    }

    /// Moves the search window back one step at a time, each window with data replaces
    /// the estimate.
    fn shift_back(&self, data: &GasData, gas: GasType, og_open: i64, peak: i64, times: usize) -> i64 {
        let mut peak = peak;
        let mut window_start = og_open;
        for _ in 0..times {
            window_start -= self.config.shift_step;
            if let Some(p) = self.peak_in(data, gas, window_start) {
                peak = p;
            }
        }
        peak
    }

    /// Timestamp of the first maximum in `[start, start + search_len)`.
    fn peak_in(&self, data: &GasData, gas: GasType, start: i64) -> Option<i64> {
        let values = data.column(gas)?;
        let mut best: Option<(i64, f64)> = None;
        for i in data.index_range(start, start + self.config.search_len) {
            let Some(v) = values[i].filter(|v| v.is_finite()) else {
                continue;
            };
            if best.map_or(true, |(_, b)| v > b) {
                best = Some((data.datetime()[i], v));
            }
        }
        best.map(|(t, _)| t)
    }
}
