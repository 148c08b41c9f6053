use crate::core::cuts::UncertEst;
use crate::core::stats::{median, sigma_clip, ClipOptions, Sample};
use crate::domain::model::{LightCurve, Supernova};
use crate::utils::error::{AtCleanError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ControlNoiseStats {
    pub control_index: usize,
    pub median_dflux: f64,
    pub stdev: f64,
    pub sigma_extra: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UncertEstSummary {
    pub controls: Vec<ControlNoiseStats>,
    pub sigma_extra: f64,
    pub sigma_typical_old: f64,
    pub sigma_typical_new: f64,
    pub percent_greater: f64,
    pub applied: bool,
}

fn clipped_stdev(lc: &LightCurve, indices: &[usize]) -> Option<f64> {
    let samples: Vec<Sample> = indices
        .iter()
        .map(|&ix| Sample::new(ix, lc.measurements[ix].flux))
        .collect();
    sigma_clip(&samples, &ClipOptions::default()).stdev
}

fn median_dflux(lc: &LightCurve, indices: &[usize]) -> Option<f64> {
    let dfluxes: Vec<f64> = indices.iter().map(|&ix| lc.measurements[ix].dflux).collect();
    median(&dfluxes)
}

/// Noise statistics of one control light curve, from measurements that pass
/// the uncertainty cut and a preliminary chi-square cut.
pub fn control_noise_stats(
    lc: &LightCurve,
    uncert_flag: u32,
    est: &UncertEst,
) -> Option<ControlNoiseStats> {
    let dflux_clean_ix = lc.ix_unmasked(uncert_flag);
    let clean_ix: Vec<usize> = dflux_clean_ix
        .iter()
        .copied()
        .filter(|&ix| lc.measurements[ix].chi_n < est.temp_x2_max_value)
        .collect();

    let median_dflux = median_dflux(lc, &clean_ix)
        .or_else(|| median_dflux(lc, &dflux_clean_ix))
        .or_else(|| median_dflux(lc, &lc.indices()))?;

    let stdev = clipped_stdev(lc, &clean_ix)
        .or_else(|| {
            tracing::warn!(
                "Could not get flux std dev of control {} with the preliminary chi-square cut of {}; retrying without it",
                lc.control_index,
                est.temp_x2_max_value
            );
            clipped_stdev(lc, &dflux_clean_ix)
        })
        .or_else(|| {
            tracing::warn!(
                "Could not get flux std dev of control {} using clean indices; retrying with all indices",
                lc.control_index
            );
            clipped_stdev(lc, &lc.indices())
        })?;

    let sigma_extra = (stdev * stdev - median_dflux * median_dflux).max(0.0).sqrt();
    Some(ControlNoiseStats {
        control_index: lc.control_index,
        median_dflux,
        stdev,
        sigma_extra,
    })
}

/// Estimates the extra noise missing from the ATLAS uncertainties using the
/// control light curves, and adds it in quadrature when it is significant.
pub fn apply_uncert_est(
    sn: &mut Supernova,
    est: &UncertEst,
    uncert_flag: u32,
) -> Result<UncertEstSummary> {
    if !sn.has_controls() {
        return Err(AtCleanError::processing(format!(
            "Cannot estimate true uncertainties of {} without control light curves",
            sn.tnsname
        )));
    }

    let controls: Vec<ControlNoiseStats> = sn
        .controls()
        .filter_map(|lc| control_noise_stats(lc, uncert_flag, est))
        .collect();
    if controls.is_empty() {
        return Err(AtCleanError::processing(
            "No control light curve has enough clean measurements for the uncertainty estimate",
        ));
    }

    let sigma_extras: Vec<f64> = controls.iter().map(|c| c.sigma_extra).collect();
    let median_dfluxes: Vec<f64> = controls.iter().map(|c| c.median_dflux).collect();
    let sigma_extra = median(&sigma_extras).unwrap_or(0.0);
    let sigma_typical_old = median(&median_dfluxes).unwrap_or(f64::NAN);
    let sigma_typical_new = (sigma_extra * sigma_extra + sigma_typical_old * sigma_typical_old).sqrt();
    let percent_greater = 100.0 * (sigma_typical_new - sigma_typical_old) / sigma_typical_old;
    let applied = percent_greater >= est.min_percent_greater;

    tracing::info!(
        "True uncertainties: sigma_extra {:.2} uJy, typical uncertainty {:.2} -> {:.2} uJy ({:.2}% greater)",
        sigma_extra,
        sigma_typical_old,
        sigma_typical_new,
        percent_greater
    );

    if applied {
        tracing::info!("Adding extra noise to duJy of SN and control light curves (duJy_new)");
        for lc in sn.lcs.values_mut() {
            lc.add_noise_to_dflux(sigma_extra);
        }
    } else {
        tracing::info!(
            "Typical uncertainty grows by less than {:.0}%; leaving duJy unchanged",
            est.min_percent_greater
        );
    }

    Ok(UncertEstSummary {
        controls,
        sigma_extra,
        sigma_typical_old,
        sigma_typical_new,
        percent_greater,
        applied,
    })
}
