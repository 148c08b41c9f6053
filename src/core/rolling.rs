//! Gaussian-weighted rolling sum of the SNR over an averaged light curve,
//! used to look for faint pre-explosion bumps. A Gaussian bump or a model
//! eruption can be injected to check whether it would have been detected.

use crate::core::average::mag_to_flux;
use crate::domain::model::AveragedLightCurve;
use crate::utils::error::{AtCleanError, Result};
use serde::{Deserialize, Serialize};

/// Kernel width in bins and the resulting window half-width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kernel {
    pub sigma_bins: f64,
    pub half_window: usize,
}

impl Kernel {
    pub fn new(sigma_kern_days: f64, mjd_bin_size: f64) -> Result<Self> {
        let sigma_bins = (sigma_kern_days / mjd_bin_size).round();
        if !sigma_bins.is_finite() || sigma_bins < 1.0 {
            return Err(AtCleanError::InvalidConfigValueError {
                field: "sigma_kern".to_string(),
                value: sigma_kern_days.to_string(),
                reason: format!("Kernel must span at least one {} day bin", mjd_bin_size),
            });
        }
        let window = (6.0 * sigma_bins) as usize;
        Ok(Self {
            sigma_bins,
            half_window: window / 2,
        })
    }

    fn weight(&self, offset: isize) -> f64 {
        let d = offset as f64 / self.sigma_bins;
        (-0.5 * d * d).exp()
    }

    /// Weighted sum around every position; values outside the series are zero.
    pub fn rolling_sum(&self, values: &[f64]) -> Vec<f64> {
        let n = values.len() as isize;
        let half = self.half_window as isize;
        (0..n)
            .map(|i| {
                (-half..=half)
                    .filter(|d| (0..n).contains(&(i + d)))
                    .map(|d| self.weight(d) * values[(i + d) as usize])
                    .sum()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollingSum {
    pub mjd_bin: Vec<f64>,
    pub snr: Vec<f64>,
    pub snr_sum: Vec<f64>,
    pub snr_sum_norm: Vec<f64>,
}

impl RollingSum {
    /// Maximum of `snr_sum_norm` and the MJD bin where it occurs.
    pub fn max_fom(&self) -> Option<(f64, f64)> {
        max_with_mjd(&self.mjd_bin, &self.snr_sum_norm)
    }
}

fn max_with_mjd(mjds: &[f64], values: &[f64]) -> Option<(f64, f64)> {
    mjds.iter()
        .zip(values)
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(mjd, v)| (*mjd, *v))
}

/// SNR of bins not flagged with `flag`, 0 for flagged or non-finite bins.
fn good_snr(lc: &AveragedLightCurve, fluxes: &[f64], flag: u32) -> Vec<f64> {
    lc.bins
        .iter()
        .zip(fluxes)
        .map(|(bin, flux)| {
            let snr = flux / bin.dflux;
            if bin.is_masked(flag) || !snr.is_finite() {
                0.0
            } else {
                snr
            }
        })
        .collect()
}

pub fn apply_rolling_sum(lc: &AveragedLightCurve, kernel: &Kernel, flag: u32) -> Result<RollingSum> {
    if lc.is_empty() {
        return Err(AtCleanError::processing(
            "Not enough measurements to apply a rolling sum",
        ));
    }
    let fluxes: Vec<f64> = lc.bins.iter().map(|b| b.flux).collect();
    let snr = good_snr(lc, &fluxes, flag);
    let snr_sum = kernel.rolling_sum(&snr);

    let norm = kernel.rolling_sum(&vec![1.0; snr.len()]);
    let max_norm = norm.iter().copied().fold(0.0, f64::max);
    let snr_sum_norm = snr_sum
        .iter()
        .zip(&norm)
        .map(|(sum, n)| sum / n * max_norm)
        .collect();

    Ok(RollingSum {
        mjd_bin: lc.bins.iter().map(|b| b.mjd_bin).collect(),
        snr,
        snr_sum,
        snr_sum_norm,
    })
}

/// Gaussian bump with a given peak apparent magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GaussianSimulation {
    pub peak_appmag: f64,
    pub peak_mjd: f64,
    pub sigma_days: f64,
}

impl GaussianSimulation {
    pub fn peak_flux(&self) -> f64 {
        mag_to_flux(self.peak_appmag)
    }

    pub fn flux_at(&self, mjd: f64) -> f64 {
        let d = (mjd - self.peak_mjd) / self.sigma_days;
        self.peak_flux() * (-0.5 * d * d).exp()
    }
}

/// Eruption light curve shape: days relative to the brightest point and
/// flux relative to the peak flux.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EruptionModel {
    pub days: Vec<f64>,
    pub relative_flux: Vec<f64>,
}

impl EruptionModel {
    /// Builds the model from `(MJD, apparent magnitude)` points.
    pub fn from_points(points: &[(f64, f64)]) -> Result<Self> {
        let mut points: Vec<(f64, f64)> = points
            .iter()
            .copied()
            .filter(|(mjd, mag)| mjd.is_finite() && mag.is_finite())
            .collect();
        if points.len() < 2 {
            return Err(AtCleanError::processing(
                "An eruption model needs at least two finite points",
            ));
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let (peak_mjd, peak_mag) = points
            .iter()
            .copied()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| AtCleanError::processing("Eruption model is empty"))?;
        let peak_flux = mag_to_flux(peak_mag);
        Ok(Self {
            days: points.iter().map(|(mjd, _)| mjd - peak_mjd).collect(),
            relative_flux: points.iter().map(|(_, mag)| mag_to_flux(*mag) / peak_flux).collect(),
        })
    }

    /// Linear interpolation; zero outside the model.
    pub fn relative_flux_at(&self, day: f64) -> f64 {
        let (Some(&first), Some(&last)) = (self.days.first(), self.days.last()) else {
            return 0.0;
        };
        if !day.is_finite() || day < first || day > last {
            return 0.0;
        }
        let upper = self.days.partition_point(|d| *d < day);
        if upper == 0 {
            return self.relative_flux[0];
        }
        let (d0, d1) = (self.days[upper - 1], self.days[upper]);
        let (f0, f1) = (self.relative_flux[upper - 1], self.relative_flux[upper]);
        if d1 == d0 {
            return f1;
        }
        f0 + (f1 - f0) * (day - d0) / (d1 - d0)
    }
}

/// Model eruption shifted to `peak_mjd` and scaled to `peak_appmag`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EruptionSimulation {
    pub model: EruptionModel,
    pub peak_appmag: f64,
    pub peak_mjd: f64,
}

impl EruptionSimulation {
    pub fn flux_at(&self, mjd: f64) -> f64 {
        mag_to_flux(self.peak_appmag) * self.model.relative_flux_at(mjd - self.peak_mjd)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Simulation {
    Gaussian(GaussianSimulation),
    Eruption(EruptionSimulation),
}

impl Simulation {
    pub fn peak_mjd(&self) -> f64 {
        match self {
            Simulation::Gaussian(g) => g.peak_mjd,
            Simulation::Eruption(e) => e.peak_mjd,
        }
    }

    pub fn peak_appmag(&self) -> f64 {
        match self {
            Simulation::Gaussian(g) => g.peak_appmag,
            Simulation::Eruption(e) => e.peak_appmag,
        }
    }

    pub fn flux_at(&self, mjd: f64) -> f64 {
        match self {
            Simulation::Gaussian(g) => g.flux_at(mjd),
            Simulation::Eruption(e) => e.flux_at(mjd),
        }
    }
}

/// Observation season as an inclusive `[start, end]` MJD range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Season(pub f64, pub f64);

impl Season {
    pub fn contains(&self, mjd: f64) -> bool {
        mjd >= self.0 && mjd <= self.1
    }
}

/// True when no seasons are given or `mjd` falls inside one of them.
pub fn in_valid_season(seasons: &[Season], mjd: f64) -> bool {
    seasons.is_empty() || seasons.iter().any(|season| season.contains(mjd))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedRollingSum {
    pub simulation: Simulation,
    pub snr_sim: Vec<f64>,
    pub snr_sim_sum: Vec<f64>,
    pub max_fom_mjd: Option<f64>,
    pub max_fom: Option<f64>,
}

impl SimulatedRollingSum {
    pub fn is_detected(&self, fom_limit: f64) -> bool {
        self.max_fom.is_some_and(|fom| fom >= fom_limit)
    }
}

/// Adds the simulated flux to every good bin and recomputes the rolling sum.
pub fn add_simulation(
    lc: &AveragedLightCurve,
    kernel: &Kernel,
    simulation: &Simulation,
    flag: u32,
) -> Result<SimulatedRollingSum> {
    if lc.is_empty() {
        return Err(AtCleanError::processing(
            "Not enough measurements to add a simulation",
        ));
    }
    let fluxes: Vec<f64> = lc
        .bins
        .iter()
        .map(|b| {
            // MJD 為 NaN (空 bin) 時以 bin 中心計算
            let mjd = if b.mjd.is_finite() { b.mjd } else { b.mjd_bin };
            b.flux + simulation.flux_at(mjd)
        })
        .collect();
    let snr_sim = good_snr(lc, &fluxes, flag);
    let snr_sim_sum = kernel.rolling_sum(&snr_sim);
    let mjds: Vec<f64> = lc.bins.iter().map(|b| b.mjd_bin).collect();
    let max = max_with_mjd(&mjds, &snr_sim_sum);

    Ok(SimulatedRollingSum {
        simulation: simulation.clone(),
        snr_sim,
        snr_sim_sum,
        max_fom_mjd: max.map(|(mjd, _)| mjd),
        max_fom: max.map(|(_, fom)| fom),
    })
}
