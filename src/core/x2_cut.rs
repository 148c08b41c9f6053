//! Dynamic PSF chi-square cut.
//!
//! Measurements with |uJy/duJy| within `stn_bound` are considered "good"
//! (consistent with no flux), the rest "bad". Scanning candidate chi-square
//! cuts gives, per cut, the fraction of good measurements lost and the
//! fraction of bad measurements kept (contamination). The final cut balances
//! both limits.

use crate::core::cuts::{apply_x2_cut, LimitPriority, X2Cut};
use crate::domain::model::{percent, Measurement, Supernova};
use crate::utils::error::Result;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimCutsRow {
    pub x2_cut: f64,
    pub n: usize,
    pub ngood: usize,
    pub nbad: usize,
    pub nkept: usize,
    pub ncut: usize,
    pub ngood_kept: usize,
    pub ngood_cut: usize,
    pub nbad_kept: usize,
    pub nbad_cut: usize,
    pub pgood_kept: f64,
    pub pgood_cut: f64,
    pub pbad_kept: f64,
    pub pbad_cut: f64,
    pub ploss: f64,
    pub pcontamination: f64,
}

/// Loss/contamination table over a set of measurements.
#[derive(Debug, Clone, Default)]
pub struct LimCutsTable {
    pub rows: Vec<LimCutsRow>,
}

impl LimCutsTable {
    pub fn calculate(measurements: &[&Measurement], cut: &X2Cut) -> Self {
        let n = measurements.len();
        let is_good: Vec<bool> = measurements
            .iter()
            .map(|m| m.stn().abs() <= cut.stn_bound)
            .collect();
        let ngood = is_good.iter().filter(|g| **g).count();
        let nbad = n - ngood;

        let mut rows = Vec::new();
        let mut x2 = cut.min_cut;
        while x2 <= cut.max_cut {
            let limit = x2 as f64;
            let kept: Vec<bool> = measurements.iter().map(|m| m.chi_n <= limit).collect();
            let nkept = kept.iter().filter(|k| **k).count();

            // 保留不到 10% 時此 cut 無意義
            if percent(nkept, n) >= 10.0 {
                let count = |good: bool, keep: bool| {
                    is_good
                        .iter()
                        .zip(&kept)
                        .filter(|(g, k)| **g == good && **k == keep)
                        .count()
                };
                let ngood_kept = count(true, true);
                let ngood_cut = count(true, false);
                let nbad_kept = count(false, true);
                let nbad_cut = count(false, false);
                rows.push(LimCutsRow {
                    x2_cut: limit,
                    n,
                    ngood,
                    nbad,
                    nkept,
                    ncut: n - nkept,
                    ngood_kept,
                    ngood_cut,
                    nbad_kept,
                    nbad_cut,
                    pgood_kept: percent(ngood_kept, n),
                    pgood_cut: percent(ngood_cut, n),
                    pbad_kept: percent(nbad_kept, n),
                    pbad_cut: percent(nbad_cut, n),
                    ploss: percent(ngood_cut, ngood),
                    pcontamination: percent(nbad_kept, nkept),
                });
            }
            x2 += cut.cut_step;
        }
        Self { rows }
    }

    /// Largest cut whose contamination stays within the limit.
    pub fn contamination_cut(&self, limit: f64) -> Option<f64> {
        self.rows
            .iter()
            .filter(|r| r.pcontamination <= limit)
            .map(|r| r.x2_cut)
            .reduce(f64::max)
    }

    /// Smallest cut whose loss stays within the limit.
    pub fn loss_cut(&self, limit: f64) -> Option<f64> {
        self.rows
            .iter()
            .filter(|r| r.ploss <= limit)
            .map(|r| r.x2_cut)
            .reduce(f64::min)
    }

    pub fn row(&self, x2_cut: f64) -> Option<&LimCutsRow> {
        self.rows.iter().find(|r| r.x2_cut == x2_cut)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum X2CutChoice {
    Static,
    Fallback,
    Contamination,
    Loss,
    Both,
    Conflict(LimitPriority),
}

#[derive(Debug, Clone, PartialEq)]
pub struct X2CutSummary {
    pub x2_max: f64,
    pub choice: X2CutChoice,
    pub contamination_cut: Option<f64>,
    pub loss_cut: Option<f64>,
    pub selected_row: Option<LimCutsRow>,
    pub percent: f64,
}

/// Picks the final cut from the table.
///
/// Prioritising loss takes the larger of the two candidate cuts (fewer good
/// measurements lost), prioritising contamination the smaller one.
pub fn choose_cut(table: &LimCutsTable, cut: &X2Cut) -> (f64, X2CutChoice) {
    let contam = table.contamination_cut(cut.contamination_limit);
    let loss = table.loss_cut(cut.loss_limit);
    match (contam, loss) {
        (None, None) => (cut.max_value, X2CutChoice::Fallback),
        (Some(c), None) => (c, X2CutChoice::Contamination),
        (None, Some(l)) => (l, X2CutChoice::Loss),
        (Some(c), Some(l)) => {
            let choice = if l <= c {
                X2CutChoice::Both
            } else {
                X2CutChoice::Conflict(cut.prioritize)
            };
            let value = match cut.prioritize {
                LimitPriority::Loss => c.max(l),
                LimitPriority::Contamination => c.min(l),
            };
            (value, choice)
        }
    }
}

/// Measurements used to decide the dynamic cut: all control measurements,
/// or the pre-MJD0 SN measurements when requested or when there are no
/// controls.
fn reference_measurements<'a>(sn: &'a Supernova, cut: &X2Cut) -> Result<Vec<&'a Measurement>> {
    if !cut.use_pre_mjd0_lc && sn.has_controls() {
        return Ok(sn.controls().flat_map(|lc| lc.measurements.iter()).collect());
    }
    let sn_lc = sn.sn()?;
    let measurements = match sn.mjd0 {
        Some(mjd0) => sn_lc
            .measurements
            .iter()
            .filter(|m| m.mjd < mjd0)
            .collect(),
        None => {
            tracing::warn!("MJD0 unknown; using the whole SN light curve for the chi-square cut");
            sn_lc.measurements.iter().collect()
        }
    };
    Ok(measurements)
}

pub fn apply_dynamic_x2_cut(sn: &mut Supernova, cut: &X2Cut) -> Result<X2CutSummary> {
    if !cut.dynamic {
        let percent = apply_x2_cut(sn, cut.max_value, cut.flag)?;
        return Ok(X2CutSummary {
            x2_max: cut.max_value,
            choice: X2CutChoice::Static,
            contamination_cut: None,
            loss_cut: None,
            selected_row: None,
            percent,
        });
    }

    tracing::info!(
        "Calculating loss and contamination for chi-square cuts from {} to {}...",
        cut.min_cut,
        cut.max_cut
    );
    let table = LimCutsTable::calculate(&reference_measurements(sn, cut)?, cut);
    let (x2_max, choice) = choose_cut(&table, cut);
    tracing::info!("Chi-square cut chosen: {:.2} ({:?})", x2_max, choice);

    let percent = apply_x2_cut(sn, x2_max, cut.flag)?;
    Ok(X2CutSummary {
        x2_max,
        choice,
        contamination_cut: table.contamination_cut(cut.contamination_limit),
        loss_cut: table.loss_cut(cut.loss_limit),
        selected_row: table.row(x2_max).cloned(),
        percent,
    })
}
