use crate::core::cuts::ControlsCut;
use crate::core::stats::{sigma_clip, ClipOptions, ClipStats, Sample};
use crate::domain::model::{percent, Supernova};
use crate::utils::error::{AtCleanError, Result};

/// Resets masks, drops invalid rows, replaces infinities and aligns the
/// control MJDs with the SN light curve.
pub fn prepare_for_cleaning(sn: &mut Supernova) -> Result<()> {
    for lc in sn.lcs.values_mut() {
        lc.reset_mask();
        let removed = lc.remove_invalid_rows();
        if removed > 0 {
            tracing::debug!(
                "Removed {} rows with duJy=0 or uJy=NaN from light curve {}",
                removed,
                lc.control_index
            );
        }
        lc.replace_infinities();
    }
    align_control_mjds(sn)
}

/// Sorts every light curve by MJD and makes each control carry exactly the
/// SN's MJDs: missing epochs are added as blank rows, extra epochs dropped.
pub fn align_control_mjds(sn: &mut Supernova) -> Result<()> {
    sn.sn_mut()?.sort_by_mjd();
    let sn_mjds = sn.sn()?.mjds();

    for control_index in sn.control_indices() {
        let Some(lc) = sn.lcs.get_mut(&control_index) else {
            continue;
        };
        lc.sort_by_mjd();
        if lc.mjds() == sn_mjds {
            continue;
        }
        tracing::debug!(
            "MJDs out of agreement for control light curve {}, fixing...",
            control_index
        );

        let mut aligned = Vec::with_capacity(sn_mjds.len());
        let mut rows = std::mem::take(&mut lc.measurements).into_iter().peekable();
        for &mjd in &sn_mjds {
            while rows.peek().is_some_and(|m| m.mjd < mjd) {
                rows.next();
            }
            match rows.peek() {
                Some(m) if m.mjd == mjd => {
                    if let Some(m) = rows.next() {
                        aligned.push(m);
                    }
                }
                _ => aligned.push(lc.blank_measurement(mjd)),
            }
        }
        lc.measurements = aligned;
    }
    Ok(())
}

/// Sigma-clipped statistics of the control fluxes at one SN epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEpochStats {
    pub mean: f64,
    pub mean_err: f64,
    pub stdev: f64,
    pub x2norm: f64,
    pub ngood: usize,
    pub nclip: usize,
    pub nmask: usize,
    pub nnan: usize,
}

impl ControlEpochStats {
    fn from_clip(stats: &ClipStats) -> Self {
        Self {
            mean: stats.mean.unwrap_or(f64::NAN),
            mean_err: stats.mean_err.unwrap_or(f64::NAN),
            stdev: stats.stdev.unwrap_or(f64::NAN),
            x2norm: stats.x2norm.unwrap_or(f64::NAN),
            ngood: stats.ngood,
            nclip: stats.nclip,
            nmask: stats.nmask,
            nnan: stats.nnan,
        }
    }

    /// |mean / mean_err|
    pub fn abs_stn(&self) -> f64 {
        (self.mean / self.mean_err).abs()
    }
}

/// Per-epoch control statistics; controls whose mask intersects
/// `previous_flags` are excluded from the average.
pub fn calculate_control_stats(
    sn: &Supernova,
    previous_flags: u32,
) -> Result<Vec<ControlEpochStats>> {
    let sn_lc = sn.sn()?;
    let controls: Vec<_> = sn.controls().collect();

    for control in &controls {
        if control.len() != sn_lc.len() || control.mjds() != sn_lc.mjds() {
            return Err(AtCleanError::processing(format!(
                "SN light curve and control light curve {} have different MJDs; align them first",
                control.control_index
            )));
        }
    }

    let options = ClipOptions::default();
    let stats = (0..sn_lc.len())
        .map(|epoch| {
            let samples: Vec<Sample> = controls
                .iter()
                .map(|control| {
                    let m = &control.measurements[epoch];
                    Sample::new(control.control_index, m.flux)
                        .with_noise(m.effective_dflux())
                        .masked(m.is_masked(previous_flags))
                })
                .collect();
            ControlEpochStats::from_clip(&sigma_clip(&samples, &options))
        })
        .collect();
    Ok(stats)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlsCutSummary {
    pub x2_percent: f64,
    pub stn_percent: f64,
    pub nclip_percent: f64,
    pub ngood_percent: f64,
    pub questionable_percent: f64,
    pub percent: f64,
}

/// Flags SN epochs whose control statistics are inconsistent with zero flux
/// and copies the resulting bits onto every control light curve.
pub fn apply_controls_cut(
    sn: &mut Supernova,
    cut: &ControlsCut,
    previous_flags: u32,
) -> Result<ControlsCutSummary> {
    if !sn.has_controls() {
        return Err(AtCleanError::processing(format!(
            "Cannot apply the control light curve cut to {} without control light curves",
            sn.tnsname
        )));
    }

    tracing::info!("Calculating control light curve statistics...");
    let stats = calculate_control_stats(sn, previous_flags)?;

    let sn_lc = sn.sn_mut()?;
    let sub_flags = cut.x2_flag | cut.stn_flag | cut.nclip_flag | cut.ngood_flag;
    for m in &mut sn_lc.measurements {
        m.mask &= !cut.all_flags();
    }
    for (m, epoch) in sn_lc.measurements.iter_mut().zip(&stats) {
        if epoch.x2norm > cut.x2_max {
            m.mask |= cut.x2_flag;
        }
        if epoch.abs_stn() > cut.stn_max {
            m.mask |= cut.stn_flag;
        }
        if epoch.nclip > cut.nclip_max {
            m.mask |= cut.nclip_flag;
        }
        if epoch.ngood < cut.ngood_min {
            m.mask |= cut.ngood_flag;
        }

        if m.is_masked(sub_flags) {
            m.mask |= cut.flag;
        } else if epoch.nclip > 0 {
            m.mask |= cut.questionable_flag;
        }
    }

    let flags_to_copy: Vec<u32> = sn_lc
        .measurements
        .iter()
        .map(|m| m.mask & cut.all_flags())
        .collect();
    let summary = ControlsCutSummary {
        x2_percent: sn_lc.percent_masked(cut.x2_flag),
        stn_percent: sn_lc.percent_masked(cut.stn_flag),
        nclip_percent: sn_lc.percent_masked(cut.nclip_flag),
        ngood_percent: sn_lc.percent_masked(cut.ngood_flag),
        questionable_percent: sn_lc.percent_masked(cut.questionable_flag),
        percent: percent(sn_lc.ix_masked(cut.flag).len(), sn_lc.len()),
    };

    for control_index in sn.control_indices() {
        if let Some(control) = sn.lcs.get_mut(&control_index) {
            for m in &mut control.measurements {
                m.mask &= !cut.all_flags();
            }
            control.copy_flags(&flags_to_copy)?;
        }
    }

    tracing::info!(
        "Control light curve cut: {:.2}% of SN measurements flagged ({:#x}), {:.2}% questionable",
        summary.percent,
        cut.flag,
        summary.questionable_percent
    );
    Ok(summary)
}
