//! Iterative sigma-clipped averaging.
//!
//! Used for the true-uncertainty estimate, the per-epoch statistics of the
//! control light curves and the averaging of measurements into MJD bins.

/// One value entering the average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Caller's row index, reported back in [`ClipStats::ix_good`] and
    /// [`ClipStats::ix_clip`].
    pub index: usize,
    pub value: f64,
    pub noise: Option<f64>,
    pub masked: bool,
}

impl Sample {
    pub fn new(index: usize, value: f64) -> Self {
        Self {
            index,
            value,
            noise: None,
            masked: false,
        }
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = Some(noise);
        self
    }

    pub fn masked(mut self, masked: bool) -> Self {
        self.masked = masked;
        self
    }

    fn is_usable(&self) -> bool {
        self.value.is_finite() && self.noise.map_or(true, |n| n.is_finite() && n > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipOptions {
    /// `None` disables clipping.
    pub nsigma: Option<f64>,
    pub median_first_iteration: bool,
    pub max_iterations: usize,
}

impl ClipOptions {
    pub fn sigma(nsigma: f64) -> Self {
        Self {
            nsigma: Some(nsigma),
            ..Self::default()
        }
    }

    pub fn no_clipping() -> Self {
        Self {
            nsigma: None,
            median_first_iteration: false,
            max_iterations: 1,
        }
    }
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self {
            nsigma: Some(3.0),
            median_first_iteration: true,
            max_iterations: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipStats {
    pub mean: Option<f64>,
    pub mean_err: Option<f64>,
    pub stdev: Option<f64>,
    pub stdev_err: Option<f64>,
    pub x2norm: Option<f64>,
    pub ngood: usize,
    pub nclip: usize,
    pub nmask: usize,
    pub nnan: usize,
    pub converged: bool,
    pub iterations: usize,
    pub ix_good: Vec<usize>,
    pub ix_clip: Vec<usize>,
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    })
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation (ddof = 1).
pub fn stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Sigma-clipped average of `samples`.
///
/// Masked samples are excluded and counted in `nmask`, non-finite ones in
/// `nnan`. When every usable sample carries noise the mean is inverse-variance
/// weighted and `x2norm` is reported.
pub fn sigma_clip(samples: &[Sample], options: &ClipOptions) -> ClipStats {
    let nmask = samples.iter().filter(|s| s.masked).count();
    let unmasked: Vec<&Sample> = samples.iter().filter(|s| !s.masked).collect();
    let usable: Vec<&Sample> = unmasked.iter().copied().filter(|s| s.is_usable()).collect();
    let nnan = unmasked.len() - usable.len();

    let mut result = ClipStats {
        nmask,
        nnan,
        ..ClipStats::default()
    };
    if usable.is_empty() {
        return result;
    }

    let values: Vec<f64> = usable.iter().map(|s| s.value).collect();
    let mut center = if options.median_first_iteration {
        median(&values)
    } else {
        mean(&values)
    };
    let mut spread = stdev(&values);
    let mut kept: Vec<&Sample> = usable.clone();
    let mut previous: Option<Vec<usize>> = None;

    for iteration in 0..options.max_iterations.max(1) {
        result.iterations = iteration + 1;

        kept = match (options.nsigma, center, spread) {
            (Some(nsigma), Some(c), Some(s)) if nsigma > 0.0 => usable
                .iter()
                .copied()
                .filter(|sample| (sample.value - c).abs() <= nsigma * s)
                .collect(),
            _ => usable.clone(),
        };

        let kept_ix: Vec<usize> = kept.iter().map(|s| s.index).collect();
        let moments = summarize(&kept);
        let done = previous.as_ref() == Some(&kept_ix) || options.nsigma.is_none();
        result.mean = moments.mean;
        result.mean_err = moments.mean_err;
        result.stdev = moments.stdev;
        result.stdev_err = moments.stdev_err;
        result.x2norm = moments.x2norm;

        if done {
            result.converged = true;
            break;
        }
        if kept.is_empty() {
            break;
        }
        center = moments.mean;
        spread = moments.stdev;
        previous = Some(kept_ix);
    }

    result.ngood = kept.len();
    result.nclip = usable.len() - kept.len();
    result.ix_good = kept.iter().map(|s| s.index).collect();
    result.ix_clip = usable
        .iter()
        .filter(|s| !result.ix_good.contains(&s.index))
        .map(|s| s.index)
        .collect();
    result
}

#[derive(Debug, Default)]
struct Moments {
    mean: Option<f64>,
    mean_err: Option<f64>,
    stdev: Option<f64>,
    stdev_err: Option<f64>,
    x2norm: Option<f64>,
}

fn summarize(samples: &[&Sample]) -> Moments {
    if samples.is_empty() {
        return Moments::default();
    }
    let n = samples.len() as f64;
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let sd = stdev(&values);
    let weighted = samples.iter().all(|s| s.noise.is_some());

    let (avg, avg_err) = if weighted {
        let weights: Vec<f64> = samples
            .iter()
            .map(|s| 1.0 / s.noise.unwrap_or(1.0).powi(2))
            .collect();
        let wsum: f64 = weights.iter().sum();
        let avg = samples
            .iter()
            .zip(&weights)
            .map(|(s, w)| s.value * w)
            .sum::<f64>()
            / wsum;
        (avg, Some((1.0 / wsum).sqrt()))
    } else {
        let avg = values.iter().sum::<f64>() / n;
        (avg, sd.map(|s| s / (n - 1.0).sqrt()))
    };

    let x2norm = if weighted && samples.len() > 1 {
        let chi2: f64 = samples
            .iter()
            .map(|s| ((s.value - avg) / s.noise.unwrap_or(1.0)).powi(2))
            .sum();
        Some(chi2 / (n - 1.0))
    } else {
        None
    };

    Moments {
        mean: Some(avg),
        mean_err: avg_err,
        stdev: sd,
        stdev_err: sd.map(|s| s / (2.0 * n).sqrt()),
        x2norm,
    }
}
