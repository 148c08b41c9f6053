//! Runs the enabled cuts on one SN in their fixed order.

use crate::core::average::{apply_badday_cut, BadDaySummary};
use crate::core::controls::{apply_controls_cut, prepare_for_cleaning, ControlsCutSummary};
use crate::core::cuts::{apply_custom_cut, apply_uncert_cut, CutList, CutStage};
use crate::core::uncert_est::{apply_uncert_est, UncertEstSummary};
use crate::core::x2_cut::{apply_dynamic_x2_cut, X2CutSummary};
use crate::domain::model::{AveragedSupernova, Filter, Supernova, COL_MASK};
use crate::utils::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct CustomCutSummary {
    pub name: String,
    pub column: String,
    pub flag: u32,
    pub percent: f64,
}

/// What every stage did to one filter of one SN.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanSummary {
    pub filter: Filter,
    pub uncert_cut: Option<f64>,
    pub uncert_est: Option<UncertEstSummary>,
    pub x2_cut: Option<X2CutSummary>,
    pub controls_cut: Option<ControlsCutSummary>,
    pub custom_cuts: Vec<CustomCutSummary>,
    pub badday: Option<BadDaySummary>,
    /// Percentage of SN measurements flagged by any primary flag before averaging.
    pub total_percent: f64,
}

impl CleanSummary {
    fn new(filter: Filter) -> Self {
        Self {
            filter,
            uncert_cut: None,
            uncert_est: None,
            x2_cut: None,
            controls_cut: None,
            custom_cuts: Vec::new(),
            badday: None,
            total_percent: 0.0,
        }
    }
}

pub struct CleanOutcome {
    pub summary: CleanSummary,
    pub averaged: Option<AveragedSupernova>,
}

/// Cleans `sn` in place and averages it when the bad day cut is enabled.
pub fn clean_supernova(sn: &mut Supernova, cuts: &CutList) -> Result<CleanOutcome> {
    tracing::info!("🧹 Cleaning {}", sn);
    prepare_for_cleaning(sn)?;
    for lc in sn.lcs.values_mut() {
        lc.ensure_column(COL_MASK);
    }

    let mut summary = CleanSummary::new(sn.filter);
    let mut averaged = None;
    let tnsname = sn.tnsname.clone();
    let needs_controls = |stage: &str| {
        tracing::warn!(
            "⚠️ Skipping {} for {}: no control light curves loaded",
            stage,
            tnsname
        );
    };

    for stage in cuts.stages() {
        if !cuts.is_enabled(stage) {
            continue;
        }
        let previous_flags = cuts.previous_flags(stage);
        match stage {
            CutStage::UncertCut => {
                summary.uncert_cut = Some(apply_uncert_cut(sn, &cuts.uncert_cut)?);
            }
            CutStage::UncertEst => {
                if !sn.has_controls() {
                    needs_controls("the true uncertainties estimation");
                    continue;
                }
                summary.uncert_est = Some(apply_uncert_est(sn, &cuts.uncert_est, cuts.uncert_cut.flag)?);
            }
            CutStage::X2Cut => {
                summary.x2_cut = Some(apply_dynamic_x2_cut(sn, &cuts.x2_cut)?);
            }
            CutStage::ControlsCut => {
                if !sn.has_controls() {
                    needs_controls("the control light curve cut");
                    continue;
                }
                summary.controls_cut = Some(apply_controls_cut(sn, &cuts.controls_cut, previous_flags)?);
            }
            CutStage::Custom(ix) => {
                let Some(cut) = cuts.custom_cuts.get(ix) else {
                    continue;
                };
                let percent = apply_custom_cut(sn, cut)?;
                summary.custom_cuts.push(CustomCutSummary {
                    name: cut.name.clone(),
                    column: cut.column.clone(),
                    flag: cut.flag,
                    percent,
                });
            }
            CutStage::BadDay => {
                summary.total_percent = sn.sn()?.percent_masked(previous_flags);
                let (avg_sn, badday) = apply_badday_cut(sn, &cuts.badday_cut, previous_flags)?;
                summary.badday = Some(badday);
                averaged = Some(avg_sn);
            }
        }
    }

    if averaged.is_none() {
        let all_flags = cuts
            .stages()
            .into_iter()
            .filter(|s| cuts.is_enabled(*s))
            .fold(0, |mask, s| mask | cuts.stage_flag(s));
        summary.total_percent = sn.sn()?.percent_masked(all_flags);
    }
    tracing::info!(
        "{:.2}% of {} {}-band measurements flagged before averaging",
        summary.total_percent,
        sn.tnsname,
        sn.filter
    );
    Ok(CleanOutcome { summary, averaged })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{LightCurve, Measurement};

    fn supernova(num_controls: usize) -> Supernova {
        let mut sn = Supernova::new("2020abc", Filter::Orange);
        sn.mjd0 = Some(59010.0);
        for control_index in 0..=num_controls {
            let rows = (0..40)
                .map(|i| {
                    let sign = if (i + control_index) % 2 == 0 { 1.0 } else { -1.0 };
                    let dflux = if i == 5 { 500.0 } else { 10.0 };
                    Measurement::new(59000.0 + 0.25 * i as f64, sign * 5.0, dflux).with_chi_n(1.0)
                })
                .collect();
            sn.lcs
                .insert(control_index, LightCurve::from_measurements(control_index, Filter::Orange, rows));
        }
        sn
    }

    #[test]
    fn test_full_run_fills_every_summary() {
        let mut sn = supernova(4);
        let outcome = clean_supernova(&mut sn, &CutList::default()).unwrap();
        let summary = outcome.summary;

        assert_eq!(summary.uncert_cut, Some(2.5));
        assert!(summary.uncert_est.is_some());
        assert!(summary.x2_cut.is_some());
        assert!(summary.controls_cut.is_some());
        assert!(summary.badday.is_some());
        assert!(sn.sn().unwrap().has_column(COL_MASK));
        assert!(sn.sn().unwrap().measurements[5].is_masked(0x2));

        let averaged = outcome.averaged.unwrap();
        assert_eq!(averaged.num_controls(), 4);
    }

    #[test]
    fn test_control_stages_skipped_without_controls() {
        let mut sn = supernova(0);
        let mut cuts = CutList::default();
        cuts.badday_cut.enabled = false;
        let outcome = clean_supernova(&mut sn, &cuts).unwrap();

        assert!(outcome.summary.uncert_est.is_none());
        assert!(outcome.summary.controls_cut.is_none());
        assert!(outcome.averaged.is_none());
        assert!(outcome.summary.total_percent >= 2.5);
    }
}
