use crate::domain::flags;
use crate::domain::model::{LightCurve, Supernova, COL_CHI_N, COL_DFLUX};
use crate::utils::error::{AtCleanError, Result};
use crate::utils::validation::{validate_positive_float, validate_unique_flags, Validate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UncertCut {
    pub enabled: bool,
    pub max_value: f64,
    pub flag: u32,
}

impl Default for UncertCut {
    fn default() -> Self {
        Self {
            enabled: true,
            max_value: 160.0,
            flag: flags::UNCERT_CUT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UncertEst {
    pub enabled: bool,
    /// Preliminary chi-square bound for the measurements used in the estimate.
    pub temp_x2_max_value: f64,
    /// The extra noise is only added when it raises the typical uncertainty
    /// by at least this many percent.
    pub min_percent_greater: f64,
}

impl Default for UncertEst {
    fn default() -> Self {
        Self {
            enabled: true,
            temp_x2_max_value: 20.0,
            min_percent_greater: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LimitPriority {
    Loss,
    Contamination,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct X2Cut {
    pub enabled: bool,
    /// Static cut, and fallback of the dynamic one.
    pub max_value: f64,
    pub flag: u32,
    pub dynamic: bool,
    /// Use pre-MJD0 SN measurements instead of the control light curves to
    /// decide the dynamic cut.
    pub use_pre_mjd0_lc: bool,
    pub stn_bound: f64,
    pub min_cut: u32,
    pub max_cut: u32,
    pub cut_step: u32,
    pub contamination_limit: f64,
    pub loss_limit: f64,
    pub prioritize: LimitPriority,
}

impl Default for X2Cut {
    fn default() -> Self {
        Self {
            enabled: true,
            max_value: 10.0,
            flag: flags::X2_CUT,
            dynamic: true,
            use_pre_mjd0_lc: false,
            stn_bound: 3.0,
            min_cut: 3,
            max_cut: 50,
            cut_step: 1,
            contamination_limit: 15.0,
            loss_limit: 10.0,
            prioritize: LimitPriority::Loss,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlsCut {
    pub enabled: bool,
    pub flag: u32,
    pub questionable_flag: u32,
    pub x2_max: f64,
    pub x2_flag: u32,
    pub stn_max: f64,
    pub stn_flag: u32,
    pub nclip_max: usize,
    pub nclip_flag: u32,
    pub ngood_min: usize,
    pub ngood_flag: u32,
}

impl ControlsCut {
    /// Every bit this cut may set on the SN light curve.
    pub fn all_flags(&self) -> u32 {
        self.flag
            | self.questionable_flag
            | self.x2_flag
            | self.stn_flag
            | self.nclip_flag
            | self.ngood_flag
    }
}

impl Default for ControlsCut {
    fn default() -> Self {
        Self {
            enabled: true,
            flag: flags::CONTROLS_BAD,
            questionable_flag: flags::CONTROLS_QUESTIONABLE,
            x2_max: 2.5,
            x2_flag: flags::CONTROLS_X2,
            stn_max: 3.0,
            stn_flag: flags::CONTROLS_STN,
            nclip_max: 2,
            nclip_flag: flags::CONTROLS_NCLIP,
            ngood_min: 4,
            ngood_flag: flags::CONTROLS_NGOOD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BadDayCut {
    pub enabled: bool,
    pub flag: u32,
    pub ixclip_flag: u32,
    pub smallnum_flag: u32,
    pub mjd_bin_size: f64,
    pub x2_max: f64,
    pub nclip_max: usize,
    pub ngood_min: usize,
    /// Averaged fluxes below this many sigma are written as magnitude upper limits.
    pub flux2mag_sigmalimit: f64,
}

impl Default for BadDayCut {
    fn default() -> Self {
        Self {
            enabled: true,
            flag: flags::AVG_BAD,
            ixclip_flag: flags::AVG_IXCLIP,
            smallnum_flag: flags::AVG_SMALLNUM,
            mjd_bin_size: 1.0,
            x2_max: 4.0,
            nclip_max: 1,
            ngood_min: 2,
            flux2mag_sigmalimit: 3.0,
        }
    }
}

/// User-defined range cut on any numeric column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomCut {
    pub name: String,
    pub column: String,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub flag: u32,
}

/// Stages in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutStage {
    UncertCut,
    UncertEst,
    X2Cut,
    ControlsCut,
    Custom(usize),
    BadDay,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CutList {
    pub uncert_cut: UncertCut,
    pub uncert_est: UncertEst,
    pub x2_cut: X2Cut,
    pub controls_cut: ControlsCut,
    pub custom_cuts: Vec<CustomCut>,
    pub badday_cut: BadDayCut,
}

impl CutList {
    pub fn stages(&self) -> Vec<CutStage> {
        let mut stages = vec![
            CutStage::UncertCut,
            CutStage::UncertEst,
            CutStage::X2Cut,
            CutStage::ControlsCut,
        ];
        stages.extend((0..self.custom_cuts.len()).map(CutStage::Custom));
        stages.push(CutStage::BadDay);
        stages
    }

    pub fn is_enabled(&self, stage: CutStage) -> bool {
        match stage {
            CutStage::UncertCut => self.uncert_cut.enabled,
            CutStage::UncertEst => self.uncert_est.enabled,
            CutStage::X2Cut => self.x2_cut.enabled,
            CutStage::ControlsCut => self.controls_cut.enabled,
            CutStage::Custom(ix) => ix < self.custom_cuts.len(),
            CutStage::BadDay => self.badday_cut.enabled,
        }
    }

    /// Primary flag of a stage; the uncertainty estimate sets none.
    pub fn stage_flag(&self, stage: CutStage) -> u32 {
        match stage {
            CutStage::UncertCut => self.uncert_cut.flag,
            CutStage::UncertEst => 0,
            CutStage::X2Cut => self.x2_cut.flag,
            CutStage::ControlsCut => self.controls_cut.flag,
            CutStage::Custom(ix) => self.custom_cuts.get(ix).map_or(0, |c| c.flag),
            CutStage::BadDay => self.badday_cut.flag,
        }
    }

    /// Union of the primary flags of every enabled stage before `stage`.
    pub fn previous_flags(&self, stage: CutStage) -> u32 {
        self.stages()
            .into_iter()
            .take_while(|s| *s != stage)
            .filter(|s| self.is_enabled(*s))
            .fold(0, |mask, s| mask | self.stage_flag(s))
    }

    /// Every configured flag with its config key, for duplicate detection.
    pub fn named_flags(&self) -> Vec<(String, u32)> {
        let mut named = vec![
            ("uncert_cut.flag".to_string(), self.uncert_cut.flag),
            ("x2_cut.flag".to_string(), self.x2_cut.flag),
            ("controls_cut.flag".to_string(), self.controls_cut.flag),
            (
                "controls_cut.questionable_flag".to_string(),
                self.controls_cut.questionable_flag,
            ),
            ("controls_cut.x2_flag".to_string(), self.controls_cut.x2_flag),
            ("controls_cut.stn_flag".to_string(), self.controls_cut.stn_flag),
            ("controls_cut.nclip_flag".to_string(), self.controls_cut.nclip_flag),
            ("controls_cut.ngood_flag".to_string(), self.controls_cut.ngood_flag),
            ("badday_cut.flag".to_string(), self.badday_cut.flag),
            ("badday_cut.ixclip_flag".to_string(), self.badday_cut.ixclip_flag),
            ("badday_cut.smallnum_flag".to_string(), self.badday_cut.smallnum_flag),
        ];
        named.extend(
            self.custom_cuts
                .iter()
                .map(|c| (format!("custom_cuts.{}.flag", c.name), c.flag)),
        );
        named
    }
}

impl Validate for CutList {
    fn validate(&self) -> Result<()> {
        validate_unique_flags(&self.named_flags())?;
        validate_positive_float("uncert_cut.max_value", self.uncert_cut.max_value)?;
        validate_positive_float("x2_cut.max_value", self.x2_cut.max_value)?;
        validate_positive_float("x2_cut.stn_bound", self.x2_cut.stn_bound)?;
        validate_positive_float("badday_cut.mjd_bin_size", self.badday_cut.mjd_bin_size)?;

        if self.x2_cut.cut_step == 0 || self.x2_cut.min_cut > self.x2_cut.max_cut {
            return Err(AtCleanError::InvalidConfigValueError {
                field: "x2_cut".to_string(),
                value: format!(
                    "{}..{} step {}",
                    self.x2_cut.min_cut, self.x2_cut.max_cut, self.x2_cut.cut_step
                ),
                reason: "min_cut must not exceed max_cut and cut_step must be positive"
                    .to_string(),
            });
        }

        let mut names = std::collections::HashSet::new();
        for cut in &self.custom_cuts {
            if !names.insert(cut.name.as_str()) {
                return Err(AtCleanError::ValidationError {
                    message: format!("Custom cut '{}' is defined twice", cut.name),
                });
            }
            if cut.min_value.is_none() && cut.max_value.is_none() {
                return Err(AtCleanError::ValidationError {
                    message: format!(
                        "Custom cut '{}' needs a min_value or a max_value",
                        cut.name
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Rows whose value lies outside `[min, max]` (NaN is always outside).
pub fn outside_range(values: &[f64], min: Option<f64>, max: Option<f64>) -> Vec<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| {
            let above_min = min.map_or(!v.is_nan(), |lo| **v >= lo);
            let below_max = max.map_or(!v.is_nan(), |hi| **v <= hi);
            !(above_min && below_max)
        })
        .map(|(ix, _)| ix)
        .collect()
}

/// Flags rows of `lc` whose `column` lies outside `[min, max]`; returns the
/// percentage flagged.
pub fn apply_range_cut(
    lc: &mut LightCurve,
    column: &str,
    min: Option<f64>,
    max: Option<f64>,
    flag: u32,
) -> Result<f64> {
    if min.is_none() && max.is_none() {
        return Err(AtCleanError::processing(format!(
            "Cannot apply cut on {} without a min or max value",
            column
        )));
    }
    let values = lc
        .numeric_column(column)
        .ok_or_else(|| AtCleanError::MissingColumnError {
            column: column.to_string(),
            path: format!("light curve {}", lc.control_index),
        })?;
    let cut_ix = outside_range(&values, min, max);
    lc.update_mask(flag, &cut_ix, true);
    Ok(crate::domain::model::percent(cut_ix.len(), lc.len()))
}

/// Applies a range cut to the SN and every control; returns the SN percentage.
pub fn apply_cut_to_all(
    sn: &mut Supernova,
    column: &str,
    min: Option<f64>,
    max: Option<f64>,
    flag: u32,
) -> Result<f64> {
    let mut sn_percent = 0.0;
    for (control_index, lc) in sn.lcs.iter_mut() {
        let percent = apply_range_cut(lc, column, min, max, flag)?;
        if *control_index == 0 {
            sn_percent = percent;
        }
    }
    Ok(sn_percent)
}

pub fn apply_uncert_cut(sn: &mut Supernova, cut: &UncertCut) -> Result<f64> {
    let percent = apply_cut_to_all(sn, COL_DFLUX, None, Some(cut.max_value), cut.flag)?;
    tracing::info!(
        "Uncertainty cut (duJy > {}): {:.2}% of SN measurements flagged ({:#x})",
        cut.max_value,
        percent,
        cut.flag
    );
    Ok(percent)
}

pub fn apply_x2_cut(sn: &mut Supernova, max_value: f64, flag: u32) -> Result<f64> {
    let percent = apply_cut_to_all(sn, COL_CHI_N, None, Some(max_value), flag)?;
    tracing::info!(
        "Chi-square cut (chi/N > {:.2}): {:.2}% of SN measurements flagged ({:#x})",
        max_value,
        percent,
        flag
    );
    Ok(percent)
}

pub fn apply_custom_cut(sn: &mut Supernova, cut: &CustomCut) -> Result<f64> {
    let percent = apply_cut_to_all(sn, &cut.column, cut.min_value, cut.max_value, cut.flag)?;
    tracing::info!(
        "Custom cut '{}' on {}: {:.2}% of SN measurements flagged ({:#x})",
        cut.name,
        cut.column,
        percent,
        cut.flag
    );
    Ok(percent)
}
