use crate::constants::{
    FALLBACK_WINDOW_LEN, LOW_R_LIMIT, MAX_MISSING_FRACTION, MIN_WINDOW_LEN, SECOND_PASS_BELOW_R,
    SECOND_PASS_FRACTION, WINDOW_STEP,
};
use crate::data_formats::gasdata::GasData;
use crate::gastype::GasType;
use crate::types::FastSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerConfig {
    /// seconds between tried starts and durations
    pub step: i64,
    /// shortest window of the first pass, seconds
    pub min_interval: i64,
    /// a first pass best below this triggers the second pass
    pub second_pass_below_r: f64,
    /// second pass minimum as a share of the closed period
    pub second_pass_fraction: f64,
    pub max_missing_fraction: f64,
    /// best r below this is reported as 1
    pub low_r_limit: f64,
    pub fallback_len: i64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            step: WINDOW_STEP,
            min_interval: MIN_WINDOW_LEN,
            second_pass_below_r: SECOND_PASS_BELOW_R,
            second_pass_fraction: SECOND_PASS_FRACTION,
            max_missing_fraction: MAX_MISSING_FRACTION,
            low_r_limit: LOW_R_LIMIT,
            fallback_len: FALLBACK_WINDOW_LEN,
        }
    }
}

/// Regression window chosen for one gas. `start` and `end` are epoch seconds of the
/// first and last sample of the window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowFit {
    pub r: f64,
    pub start: i64,
    pub end: i64,
    /// no window qualified, `start..end` is the fixed fallback
    pub fallback: bool,
    /// every r evaluated during the search
    pub candidate_rs: Vec<f64>,
}

impl WindowFit {
    pub fn offsets(&self, start_time: i64) -> (i64, i64) {
        (self.start - start_time, self.end - start_time)
    }
}

/// Running sums over the non-null samples of one gas, indexed like the data rows.
/// x is seconds from the first row, y is shifted by the first valid value.
struct PrefixSums {
    count: Vec<usize>,
    sx: Vec<f64>,
    sy: Vec<f64>,
    sxx: Vec<f64>,
    syy: Vec<f64>,
    sxy: Vec<f64>,
}

impl PrefixSums {
    fn new(datetime: &[i64], values: &[Option<f64>]) -> Self {
        let n = datetime.len();
        let mut sums = Self {
            count: Vec::with_capacity(n + 1),
            sx: Vec::with_capacity(n + 1),
            sy: Vec::with_capacity(n + 1),
            sxx: Vec::with_capacity(n + 1),
            syy: Vec::with_capacity(n + 1),
            sxy: Vec::with_capacity(n + 1),
        };
        sums.count.push(0);
        sums.sx.push(0.);
        sums.sy.push(0.);
        sums.sxx.push(0.);
        sums.syy.push(0.);
        sums.sxy.push(0.);

        let t0 = datetime.first().copied().unwrap_or(0);
        let y0 = values.iter().flatten().copied().find(|v| v.is_finite()).unwrap_or(0.0);

        for (t, v) in datetime.iter().zip(values) {
            let i = sums.count.len() - 1;
            let (c, x, y) = match v.filter(|v| v.is_finite()) {
                Some(v) => (1, (t - t0) as f64, v - y0),
                None => (0, 0., 0.),
            };
            sums.count.push(sums.count[i] + c);
            sums.sx.push(sums.sx[i] + x);
            sums.sy.push(sums.sy[i] + y);
            sums.sxx.push(sums.sxx[i] + x * x);
            sums.syy.push(sums.syy[i] + y * y);
            sums.sxy.push(sums.sxy[i] + x * y);
        }
        sums
    }

    fn count(&self, lo: usize, hi: usize) -> usize {
        self.count[hi] - self.count[lo]
    }

    /// Absolute Pearson r of rows `lo..hi`, None below 5 points or with zero variance.
    fn pearson(&self, lo: usize, hi: usize) -> Option<f64> {
        let n = self.count(lo, hi);
        if n < 5 {
            return None;
        }
        let n = n as f64;
        let sx = self.sx[hi] - self.sx[lo];
        let sy = self.sy[hi] - self.sy[lo];
        let sxx = self.sxx[hi] - self.sxx[lo];
        let syy = self.syy[hi] - self.syy[lo];
        let sxy = self.sxy[hi] - self.sxy[lo];

        let cov = sxy - sx * sy / n;
        let var_x = sxx - sx * sx / n;
        let var_y = syy - sy * sy / n;
        if var_x <= 0.0 || var_y <= 0.0 {
            return None;
        }
        let r = (cov / (var_x * var_y).sqrt()).abs();
        r.is_finite().then(|| r.min(1.0))
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    r: f64,
    start: i64,
    end: i64,
}

/// Searches the closed period for the sub window with the strongest linear trend.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowOptimizer {
    pub config: OptimizerConfig,
}

impl WindowOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Best regression window of `gas` inside `[close, open)`. Falls back to
    /// `[start_time, start_time + 180]` when nothing qualifies.
    pub fn optimize(
        &self,
        data: &GasData,
        gas: GasType,
        close: i64,
        open: i64,
        start_time: i64,
    ) -> WindowFit {
        let calc = data.slice(close, open);
        let mut candidate_rs = Vec::new();

        let datetime = calc.datetime();
        let best = match (datetime.first(), datetime.last(), calc.column(gas)) {
            (Some(&first_t), Some(&last_t), Some(values)) => {
                let sums = PrefixSums::new(datetime, values);
                let search = Search {
                    datetime,
                    sums: &sums,
                    first_t,
                    end_time: last_t.min(open),
                    max_interval: open - close,
                };
                self.two_pass(&search, &mut candidate_rs)
            },
            _ => None,
        };

        match best {
            Some(c) => {
                let r = if c.r.is_nan() || c.r < self.config.low_r_limit { 1.0 } else { c.r };
                WindowFit { r, start: c.start, end: c.end, fallback: false, candidate_rs }
            },
            None => {
                tracing::debug!("no valid window for {} at {}", gas, start_time);
                WindowFit {
                    r: 1.0,
                    start: start_time,
                    end: start_time + self.config.fallback_len,
                    fallback: true,
                    candidate_rs,
                }
            },
        }
    }

    fn two_pass(&self, search: &Search, candidate_rs: &mut Vec<f64>) -> Option<Candidate> {
        let first = self.sweep(search, self.config.min_interval, candidate_rs)?;
        if first.r >= self.config.second_pass_below_r {
            return Some(first);
        }

        // noisy series rarely reach a good r over two minutes, try longer windows
        let min_interval = (search.max_interval as f64 * self.config.second_pass_fraction) as i64;
        tracing::debug!("best r {:.3} is low, second pass with {}s windows", first.r, min_interval);
        Some(self.sweep(search, min_interval, candidate_rs).unwrap_or(first))
    }

    /// One search over every staggered start offset in `[0, min_interval)`.
    fn sweep(
        &self,
        search: &Search,
        min_interval: i64,
        candidate_rs: &mut Vec<f64>,
    ) -> Option<Candidate> {
        let step = self.config.step.max(1);
        let mut processed: FastSet<(i64, i64)> = FastSet::default();
        let mut best: Option<Candidate> = None;

        for offset in (0..min_interval.max(0)).step_by(step as usize) {
            let mut s = search.first_t + offset;
            while s + min_interval <= search.end_time {
                let mut duration = min_interval;
                while duration < search.max_interval {
                    let e = (s + duration).min(search.end_time);
                    duration += step;
                    if !processed.insert((s, e)) {
                        continue;
                    }
                    let lo = search.datetime.partition_point(|&t| t < s);
                    let hi = search.datetime.partition_point(|&t| t < e);
                    if lo >= hi {
                        continue;
                    }
                    let count = search.sums.count(lo, hi);
                    if count == 0 {
                        continue;
                    }
                    if (count as f64) < (e - s) as f64 * (1.0 - self.config.max_missing_fraction) {
                        continue;
                    }
                    let Some(r) = search.sums.pearson(lo, hi) else {
                        continue;
                    };
                    candidate_rs.push(r);

                    if count as i64 >= min_interval && best.map_or(true, |b| r > b.r) {
                        best = Some(Candidate {
                            r,
                            start: search.datetime[lo],
                            end: search.datetime[hi - 1],
                        });
                    }
                }
                s += step;
            }
        }
        best
    }
}

struct Search<'a> {
    datetime: &'a [i64],
    sums: &'a PrefixSums,
    first_t: i64,
    end_time: i64,
    max_interval: i64,
}
