//! Whitespace-separated light curve files and their naming convention.

use crate::domain::flags::{format_mask, parse_mask};
use crate::domain::model::{
    AveragedBin, AveragedLightCurve, Filter, LightCurve, Measurement, AVERAGED_COLUMNS, COL_CHI_N,
    COL_DFLUX, COL_DFLUX_NEW, COL_FILTER, COL_FLUX, COL_MASK, COL_MJD, REQUIRED_AVERAGED_COLUMNS,
    REQUIRED_COLUMNS,
};
use crate::core::rolling::EruptionModel;
use crate::utils::error::{AtCleanError, Result};
use std::collections::BTreeMap;

/// Path of a light curve file:
/// `<dir>/<name>[/controls]/<name>[_i<iii>].<filter>[.<bin>days][.clean].lc.txt`
pub fn lc_filename(
    dir: &str,
    tnsname: &str,
    filter: Filter,
    control_index: usize,
    mjd_bin_size: Option<f64>,
    cleaned: bool,
) -> String {
    let mut filename = join(dir, tnsname);
    if control_index != 0 {
        filename.push_str("/controls");
    }
    filename.push('/');
    filename.push_str(tnsname);
    if control_index != 0 {
        filename.push_str(&format!("_i{:03}", control_index));
    }
    filename.push_str(&format!(".{}", filter));
    if let Some(bin) = mjd_bin_size {
        filename.push_str(&format!(".{:.2}days", bin));
    }
    if cleaned {
        filename.push_str(".clean");
    }
    filename.push_str(".lc.txt");
    filename
}

pub fn readme_filename(dir: &str, tnsname: &str) -> String {
    format!("{}/README.md", join(dir, tnsname))
}

/// Output of a detection run on the averaged light curves, e.g.
/// `<dir>/<name>/<name>.o.1.00days.snrsum.txt`.
pub fn detection_filename(
    dir: &str,
    tnsname: &str,
    filter: Filter,
    mjd_bin_size: f64,
    kind: &str,
) -> String {
    format!(
        "{}/{}.{}.{:.2}days.{}.txt",
        join(dir, tnsname),
        tnsname,
        filter,
        mjd_bin_size,
        kind
    )
}

pub fn control_coords_filename(dir: &str, tnsname: &str) -> String {
    format!("{}/controls/{}.control_coords.txt", join(dir, tnsname), tnsname)
}

/// Joins storage-relative path segments, ignoring an empty base.
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Header and rows of a whitespace-separated table; each row carries its
/// 1-based line number. A `###` header prefix (raw ATLAS output) is dropped.
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<(usize, Vec<String>)>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|c| c == name)
    }

    pub fn require(&self, columns: &[&str], path: &str) -> Result<()> {
        for column in columns {
            if self.column(column).is_none() {
                return Err(AtCleanError::MissingColumnError {
                    column: column.to_string(),
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }
}

pub fn parse_table(text: &str, path: &str) -> Result<Table> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header_line)) = lines.next() else {
        return Ok(Table {
            header: Vec::new(),
            rows: Vec::new(),
        });
    };
    let header: Vec<String> = header_line
        .replace("###", "")
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (ix, line) in lines {
        let values: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if values.len() != header.len() {
            return Err(AtCleanError::ParseError {
                path: path.to_string(),
                line: ix + 1,
                message: format!("expected {} values, found {}", header.len(), values.len()),
            });
        }
        rows.push((ix + 1, values));
    }
    Ok(Table { header, rows })
}

/// Renders a space-separated table with a single header line.
pub fn write_table(header: &[String], rows: &[Vec<String>]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b' ')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AtCleanError::processing(format!("Failed to flush table: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| AtCleanError::processing(format!("Table is not valid UTF-8: {}", e)))
}

pub fn parse_float(value: &str, path: &str, line: usize, column: &str) -> Result<f64> {
    match value {
        "NaN" | "nan" | "None" | "null" => Ok(f64::NAN),
        _ => value.parse::<f64>().map_err(|_| AtCleanError::ParseError {
            path: path.to_string(),
            line,
            message: format!("invalid {} value '{}'", column, value),
        }),
    }
}

pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        value.to_string()
    }
}

fn measurement_from_row(
    table: &Table,
    line: usize,
    values: &[String],
    path: &str,
) -> Result<Measurement> {
    let mut m = Measurement::new(f64::NAN, f64::NAN, f64::NAN);
    for (column, value) in table.header.iter().zip(values) {
        match column.as_str() {
            COL_MJD => m.mjd = parse_float(value, path, line, column)?,
            COL_FLUX => m.flux = parse_float(value, path, line, column)?,
            COL_DFLUX => m.dflux = parse_float(value, path, line, column)?,
            COL_DFLUX_NEW => {
                let dflux_new = parse_float(value, path, line, column)?;
                m.dflux_new = (!dflux_new.is_nan()).then_some(dflux_new);
            }
            COL_CHI_N => m.chi_n = parse_float(value, path, line, column)?,
            COL_MASK => {
                m.mask = parse_mask(value).ok_or_else(|| AtCleanError::ParseError {
                    path: path.to_string(),
                    line,
                    message: format!("invalid Mask value '{}'", value),
                })?;
            }
            _ => m.extra.push(value.clone()),
        }
    }
    Ok(m)
}

/// Parses a single-filter light curve file.
pub fn parse_light_curve(
    text: &str,
    control_index: usize,
    filter: Filter,
    path: &str,
) -> Result<LightCurve> {
    let table = parse_table(text, path)?;
    table.require(&REQUIRED_COLUMNS, path)?;

    let mut lc = LightCurve::with_columns(control_index, filter, table.header.clone());
    for (line, values) in &table.rows {
        lc.measurements
            .push(measurement_from_row(&table, *line, values, path)?);
    }
    Ok(lc)
}

/// Parses raw ATLAS output holding both filters and splits it by the `F`
/// column. Rows of unknown filters are dropped.
pub fn parse_full_light_curve(
    text: &str,
    control_index: usize,
    path: &str,
) -> Result<BTreeMap<Filter, LightCurve>> {
    let table = parse_table(text, path)?;
    let mut lcs: BTreeMap<Filter, LightCurve> = Filter::ALL
        .iter()
        .map(|f| {
            let columns = if table.header.is_empty() {
                LightCurve::new(control_index, *f).columns().to_vec()
            } else {
                table.header.clone()
            };
            (*f, LightCurve::with_columns(control_index, *f, columns))
        })
        .collect();
    if table.rows.is_empty() {
        return Ok(lcs);
    }
    table.require(&REQUIRED_COLUMNS, path)?;
    let filter_ix = table
        .column(COL_FILTER)
        .ok_or_else(|| AtCleanError::MissingColumnError {
            column: COL_FILTER.to_string(),
            path: path.to_string(),
        })?;

    for (line, values) in &table.rows {
        let Ok(filter) = values[filter_ix].parse::<Filter>() else {
            tracing::warn!("{}:{}: skipping row with filter '{}'", path, line, values[filter_ix]);
            continue;
        };
        let m = measurement_from_row(&table, *line, values, path)?;
        if let Some(lc) = lcs.get_mut(&filter) {
            lc.measurements.push(m);
        }
    }
    Ok(lcs)
}

pub fn render_light_curve(lc: &LightCurve) -> Result<String> {
    let header = lc.columns().to_vec();
    let rows: Vec<Vec<String>> = lc
        .measurements
        .iter()
        .map(|m| {
            let mut extra = m.extra.iter();
            header
                .iter()
                .map(|column| match column.as_str() {
                    COL_MJD => format_float(m.mjd),
                    COL_FLUX => format_float(m.flux),
                    COL_DFLUX => format_float(m.dflux),
                    COL_DFLUX_NEW => format_float(m.dflux_new.unwrap_or(f64::NAN)),
                    COL_CHI_N => format_float(m.chi_n),
                    COL_MASK => format_mask(m.mask),
                    _ => extra.next().cloned().unwrap_or_else(|| "NaN".to_string()),
                })
                .collect()
        })
        .collect();
    write_table(&header, &rows)
}

pub fn parse_averaged_light_curve(
    text: &str,
    control_index: usize,
    filter: Filter,
    mjd_bin_size: f64,
    path: &str,
) -> Result<AveragedLightCurve> {
    let table = parse_table(text, path)?;
    table.require(&REQUIRED_AVERAGED_COLUMNS, path)?;

    let mut avg = AveragedLightCurve::new(control_index, filter, mjd_bin_size);
    for (line, values) in &table.rows {
        let line = *line;
        let float = |name: &str| -> Result<f64> {
            match table.column(name) {
                Some(ix) => parse_float(&values[ix], path, line, name),
                None => Ok(f64::NAN),
            }
        };
        let count = |name: &str| -> Result<usize> {
            let value = float(name)?;
            Ok(if value.is_finite() && value >= 0.0 {
                value as usize
            } else {
                0
            })
        };

        let mut bin = AveragedBin::empty(float("MJDbin")?, count("Nexcluded")?);
        bin.mjd = float("MJD")?;
        bin.flux = float(COL_FLUX)?;
        bin.dflux = float(COL_DFLUX)?;
        bin.stdev = float("stdev")?;
        bin.x2 = float("x2")?;
        bin.nclip = count("Nclip")?;
        bin.ngood = count("Ngood")?;
        bin.mag = float("m")?;
        bin.dmag = float("dm")?;
        if let Some(ix) = table.column(COL_MASK) {
            bin.mask = parse_mask(&values[ix]).ok_or_else(|| AtCleanError::ParseError {
                path: path.to_string(),
                line,
                message: format!("invalid Mask value '{}'", values[ix]),
            })?;
        }
        avg.bins.push(bin);
    }
    Ok(avg)
}

pub fn render_averaged_light_curve(avg: &AveragedLightCurve) -> Result<String> {
    let header: Vec<String> = AVERAGED_COLUMNS.iter().map(|c| c.to_string()).collect();
    let rows: Vec<Vec<String>> = avg
        .bins
        .iter()
        .map(|b| {
            vec![
                format_float(b.mjd),
                format_float(b.mjd_bin),
                format_float(b.flux),
                format_float(b.dflux),
                format_float(b.stdev),
                format_float(b.x2),
                b.nclip.to_string(),
                b.ngood.to_string(),
                b.nexcluded.to_string(),
                format_mask(b.mask),
                format_float(b.mag),
                format_float(b.dmag),
            ]
        })
        .collect();
    write_table(&header, &rows)
}

/// Eruption model file: headerless `MJD m` columns, `#` lines are comments.
pub fn parse_eruption_model(text: &str, path: &str) -> Result<EruptionModel> {
    let mut points = Vec::new();
    for (ix, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.len() < 2 {
            return Err(AtCleanError::ParseError {
                path: path.to_string(),
                line: ix + 1,
                message: format!("expected MJD and magnitude, found {} values", values.len()),
            });
        }
        let mjd = parse_float(values[0], path, ix + 1, COL_MJD)?;
        let mag = parse_float(values[1], path, ix + 1, "m")?;
        points.push((mjd, mag));
    }
    EruptionModel::from_points(&points).map_err(|e| {
        AtCleanError::processing(format!("Could not load eruption model {}: {}", path, e))
    })
}
