use crate::domain::coords::Coordinates;
use crate::utils::error::{AtCleanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const COL_MJD: &str = "MJD";
pub const COL_FLUX: &str = "uJy";
pub const COL_DFLUX: &str = "duJy";
pub const COL_DFLUX_NEW: &str = "duJy_new";
pub const COL_CHI_N: &str = "chi/N";
pub const COL_FILTER: &str = "F";
pub const COL_MASK: &str = "Mask";

/// ATLAS filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Filter {
    #[serde(rename = "c")]
    Cyan,
    #[serde(rename = "o")]
    Orange,
}

impl Filter {
    pub const ALL: [Filter; 2] = [Filter::Cyan, Filter::Orange];

    pub fn as_str(&self) -> &'static str {
        match self {
            Filter::Cyan => "c",
            Filter::Orange => "o",
        }
    }

    pub fn long_name(&self) -> &'static str {
        match self {
            Filter::Cyan => "cyan",
            Filter::Orange => "orange",
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Filter {
    type Err = AtCleanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "c" => Ok(Filter::Cyan),
            "o" => Ok(Filter::Orange),
            other => Err(AtCleanError::InvalidConfigValueError {
                field: "filter".to_string(),
                value: other.to_string(),
                reason: "ATLAS filters are 'c' and 'o'".to_string(),
            }),
        }
    }
}

/// One forced-photometry measurement.
///
/// Columns the cleaning touches are typed; every other column of the source
/// file is carried verbatim in `extra`, aligned with
/// [`LightCurve::extra_columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub mjd: f64,
    pub flux: f64,
    pub dflux: f64,
    pub dflux_new: Option<f64>,
    pub chi_n: f64,
    pub mask: u32,
    pub extra: Vec<String>,
}

impl Measurement {
    pub fn new(mjd: f64, flux: f64, dflux: f64) -> Self {
        Self {
            mjd,
            flux,
            dflux,
            dflux_new: None,
            chi_n: f64::NAN,
            mask: 0,
            extra: Vec::new(),
        }
    }

    pub fn with_chi_n(mut self, chi_n: f64) -> Self {
        self.chi_n = chi_n;
        self
    }

    /// Corrected uncertainty when the true-uncertainty estimate was applied.
    pub fn effective_dflux(&self) -> f64 {
        self.dflux_new.unwrap_or(self.dflux)
    }

    /// uJy/duJy
    pub fn stn(&self) -> f64 {
        self.flux / self.effective_dflux()
    }

    pub fn is_masked(&self, flags: u32) -> bool {
        self.mask & flags != 0
    }
}

/// A single-filter light curve of either the SN (control index 0) or one of
/// its control positions.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCurve {
    pub control_index: usize,
    pub filter: Filter,
    columns: Vec<String>,
    extra_columns: Vec<String>,
    pub measurements: Vec<Measurement>,
}

impl LightCurve {
    pub fn new(control_index: usize, filter: Filter) -> Self {
        Self::with_columns(
            control_index,
            filter,
            [COL_MJD, COL_FLUX, COL_DFLUX, COL_CHI_N, COL_MASK]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        )
    }

    /// Creates an empty light curve whose file representation has the given
    /// column order. Columns without a typed field become extra columns.
    pub fn with_columns(control_index: usize, filter: Filter, columns: Vec<String>) -> Self {
        let extra_columns = columns
            .iter()
            .filter(|c| !is_typed_column(c))
            .cloned()
            .collect();
        Self {
            control_index,
            filter,
            columns,
            extra_columns,
            measurements: Vec::new(),
        }
    }

    pub fn from_measurements(
        control_index: usize,
        filter: Filter,
        measurements: Vec<Measurement>,
    ) -> Self {
        let mut lc = Self::new(control_index, filter);
        lc.measurements = measurements;
        lc
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Adds a column to the file representation if it is not there yet.
    pub fn ensure_column(&mut self, name: &str) {
        if self.has_column(name) {
            return;
        }
        self.columns.push(name.to_string());
        if !is_typed_column(name) {
            self.extra_columns.push(name.to_string());
            for m in &mut self.measurements {
                m.extra.push("NaN".to_string());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        (0..self.measurements.len()).collect()
    }

    pub fn mjds(&self) -> Vec<f64> {
        self.measurements.iter().map(|m| m.mjd).collect()
    }

    /// Row with the given MJD and every other value missing.
    pub fn blank_measurement(&self, mjd: f64) -> Measurement {
        Measurement {
            mjd,
            flux: f64::NAN,
            dflux: f64::NAN,
            dflux_new: None,
            chi_n: f64::NAN,
            mask: 0,
            extra: vec!["NaN".to_string(); self.extra_columns.len()],
        }
    }

    /// Raw string value of an extra column.
    pub fn extra_value<'a>(&self, m: &'a Measurement, column: &str) -> Option<&'a str> {
        let position = self.extra_columns.iter().position(|c| c == column)?;
        m.extra.get(position).map(String::as_str)
    }

    /// Values of a numeric column, NaN where a value does not parse.
    /// `None` when the light curve has no such column.
    pub fn numeric_column(&self, column: &str) -> Option<Vec<f64>> {
        if is_typed_column(column) && column != COL_MASK && !self.has_column(column) {
            return None;
        }
        let values = match column {
            COL_MJD => self.measurements.iter().map(|m| m.mjd).collect(),
            COL_FLUX => self.measurements.iter().map(|m| m.flux).collect(),
            COL_DFLUX => self.measurements.iter().map(|m| m.dflux).collect(),
            COL_DFLUX_NEW => self
                .measurements
                .iter()
                .map(|m| m.dflux_new.unwrap_or(f64::NAN))
                .collect(),
            COL_CHI_N => self.measurements.iter().map(|m| m.chi_n).collect(),
            COL_MASK => self.measurements.iter().map(|m| m.mask as f64).collect(),
            "uJy/duJy" => self.measurements.iter().map(|m| m.stn()).collect(),
            _ => {
                let position = self.extra_columns.iter().position(|c| c == column)?;
                self.measurements
                    .iter()
                    .map(|m| {
                        m.extra
                            .get(position)
                            .and_then(|v| v.parse::<f64>().ok())
                            .unwrap_or(f64::NAN)
                    })
                    .collect()
            }
        };
        Some(values)
    }

    pub fn sort_by_mjd(&mut self) {
        self.measurements.sort_by(|a, b| a.mjd.total_cmp(&b.mjd));
    }

    /// Removes rows with duJy = 0 or uJy = NaN, returning how many were dropped.
    pub fn remove_invalid_rows(&mut self) -> usize {
        let before = self.measurements.len();
        self.measurements
            .retain(|m| m.dflux != 0.0 && !m.flux.is_nan());
        before - self.measurements.len()
    }

    pub fn replace_infinities(&mut self) {
        for m in &mut self.measurements {
            for value in [&mut m.flux, &mut m.dflux, &mut m.chi_n] {
                if value.is_infinite() {
                    *value = f64::NAN;
                }
            }
            if let Some(dflux_new) = m.dflux_new.as_mut() {
                if dflux_new.is_infinite() {
                    *dflux_new = f64::NAN;
                }
            }
        }
    }

    pub fn reset_mask(&mut self) {
        for m in &mut self.measurements {
            m.mask = 0;
        }
    }

    /// ORs `flag` into the given rows. With `remove_old` the flag is first
    /// cleared from every row, so re-applying a cut replaces its result.
    pub fn update_mask(&mut self, flag: u32, indices: &[usize], remove_old: bool) {
        if remove_old {
            for m in &mut self.measurements {
                m.mask &= !flag;
            }
        }
        for &ix in indices {
            if let Some(m) = self.measurements.get_mut(ix) {
                m.mask |= flag;
            }
        }
    }

    /// ORs a per-row mask (same length as the light curve) into this one.
    pub fn copy_flags(&mut self, flags: &[u32]) -> Result<()> {
        if flags.len() != self.measurements.len() {
            return Err(AtCleanError::processing(format!(
                "Cannot copy {} flags onto control light curve {} with {} rows",
                flags.len(),
                self.control_index,
                self.measurements.len()
            )));
        }
        for (m, flag) in self.measurements.iter_mut().zip(flags) {
            m.mask |= flag;
        }
        Ok(())
    }

    pub fn ix_masked(&self, flags: u32) -> Vec<usize> {
        self.indices_where(|m| m.is_masked(flags))
    }

    pub fn ix_unmasked(&self, flags: u32) -> Vec<usize> {
        self.indices_where(|m| !m.is_masked(flags))
    }

    pub fn indices_where<F: Fn(&Measurement) -> bool>(&self, predicate: F) -> Vec<usize> {
        self.measurements
            .iter()
            .enumerate()
            .filter(|(_, m)| predicate(m))
            .map(|(ix, _)| ix)
            .collect()
    }

    /// Rows strictly before MJD0.
    pub fn pre_mjd0_indices(&self, mjd0: f64) -> Vec<usize> {
        self.indices_where(|m| m.mjd < mjd0)
    }

    pub fn percent_masked(&self, flags: u32) -> f64 {
        percent(self.ix_masked(flags).len(), self.len())
    }

    /// Adds `sigma_extra` in quadrature to duJy and stores it as duJy_new.
    pub fn add_noise_to_dflux(&mut self, sigma_extra: f64) {
        for m in &mut self.measurements {
            m.dflux_new = Some((m.dflux * m.dflux + sigma_extra * sigma_extra).sqrt());
        }
        self.ensure_column(COL_DFLUX_NEW);
    }
}

fn is_typed_column(name: &str) -> bool {
    matches!(
        name,
        COL_MJD | COL_FLUX | COL_DFLUX | COL_DFLUX_NEW | COL_CHI_N | COL_MASK
    )
}

pub fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * part as f64 / total as f64
    }
}

/// One MJD bin of an averaged light curve.
#[derive(Debug, Clone, PartialEq)]
pub struct AveragedBin {
    pub mjd: f64,
    pub mjd_bin: f64,
    pub flux: f64,
    pub dflux: f64,
    pub stdev: f64,
    pub x2: f64,
    pub nclip: usize,
    pub ngood: usize,
    pub nexcluded: usize,
    pub mask: u32,
    pub mag: f64,
    pub dmag: f64,
}

impl AveragedBin {
    pub fn empty(mjd_bin: f64, nexcluded: usize) -> Self {
        Self {
            mjd: f64::NAN,
            mjd_bin,
            flux: f64::NAN,
            dflux: f64::NAN,
            stdev: f64::NAN,
            x2: f64::NAN,
            nclip: 0,
            ngood: 0,
            nexcluded,
            mask: 0,
            mag: f64::NAN,
            dmag: f64::NAN,
        }
    }

    pub fn is_masked(&self, flags: u32) -> bool {
        self.mask & flags != 0
    }
}

pub const AVERAGED_COLUMNS: [&str; 12] = [
    "MJD", "MJDbin", "uJy", "duJy", "stdev", "x2", "Nclip", "Ngood", "Nexcluded", "Mask", "m", "dm",
];

pub const REQUIRED_COLUMNS: [&str; 3] = [COL_MJD, COL_FLUX, COL_DFLUX];
pub const REQUIRED_AVERAGED_COLUMNS: [&str; 4] = ["MJDbin", COL_FLUX, COL_DFLUX, COL_MASK];

#[derive(Debug, Clone, PartialEq)]
pub struct AveragedLightCurve {
    pub control_index: usize,
    pub filter: Filter,
    pub mjd_bin_size: f64,
    pub bins: Vec<AveragedBin>,
}

impl AveragedLightCurve {
    pub fn new(control_index: usize, filter: Filter, mjd_bin_size: f64) -> Self {
        Self {
            control_index,
            filter,
            mjd_bin_size,
            bins: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn percent_masked(&self, flags: u32) -> f64 {
        let masked = self.bins.iter().filter(|b| b.is_masked(flags)).count();
        percent(masked, self.bins.len())
    }
}

/// A transient with its SN light curve (index 0) and control light curves
/// in one filter.
#[derive(Debug, Clone)]
pub struct Supernova {
    pub tnsname: String,
    pub coords: Option<Coordinates>,
    pub mjd0: Option<f64>,
    pub filter: Filter,
    pub lcs: BTreeMap<usize, LightCurve>,
}

impl Supernova {
    pub fn new(tnsname: impl Into<String>, filter: Filter) -> Self {
        Self {
            tnsname: tnsname.into(),
            coords: None,
            mjd0: None,
            filter,
            lcs: BTreeMap::new(),
        }
    }

    pub fn sn(&self) -> Result<&LightCurve> {
        self.lcs
            .get(&0)
            .ok_or_else(|| AtCleanError::processing(format!("SN {} light curve is not loaded", self.tnsname)))
    }

    pub fn sn_mut(&mut self) -> Result<&mut LightCurve> {
        let name = self.tnsname.clone();
        self.lcs
            .get_mut(&0)
            .ok_or_else(|| AtCleanError::processing(format!("SN {} light curve is not loaded", name)))
    }

    pub fn control_indices(&self) -> Vec<usize> {
        self.lcs.keys().copied().filter(|&ix| ix > 0).collect()
    }

    pub fn num_controls(&self) -> usize {
        self.lcs.keys().filter(|&&ix| ix > 0).count()
    }

    pub fn has_controls(&self) -> bool {
        self.num_controls() > 0
    }

    pub fn controls(&self) -> impl Iterator<Item = &LightCurve> {
        self.lcs.values().filter(|lc| lc.control_index > 0)
    }
}

impl fmt::Display for Supernova {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SN {} ({})", self.tnsname, self.filter)?;
        if let Some(coords) = &self.coords {
            write!(f, " at {}", coords)?;
        }
        match self.mjd0 {
            Some(mjd0) => write!(f, ": MJD0 = {}", mjd0)?,
            None => write!(f, ": MJD0 unknown")?,
        }
        write!(f, ", {} control light curves", self.num_controls())
    }
}

/// Averaged counterpart of [`Supernova`].
#[derive(Debug, Clone)]
pub struct AveragedSupernova {
    pub tnsname: String,
    pub mjd0: Option<f64>,
    pub filter: Filter,
    pub mjd_bin_size: f64,
    pub avg_lcs: BTreeMap<usize, AveragedLightCurve>,
}

impl AveragedSupernova {
    pub fn new(tnsname: impl Into<String>, filter: Filter, mjd_bin_size: f64) -> Self {
        Self {
            tnsname: tnsname.into(),
            mjd0: None,
            filter,
            mjd_bin_size,
            avg_lcs: BTreeMap::new(),
        }
    }

    pub fn sn(&self) -> Result<&AveragedLightCurve> {
        self.avg_lcs.get(&0).ok_or_else(|| {
            AtCleanError::processing(format!("Averaged SN {} light curve is not loaded", self.tnsname))
        })
    }

    pub fn num_controls(&self) -> usize {
        self.avg_lcs.keys().filter(|&&ix| ix > 0).count()
    }
}
