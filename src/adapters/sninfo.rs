//! SN info table (`tnsname ra dec mjd0`), shared between download and clean runs.

use crate::adapters::lc_file::{format_float, parse_float, parse_table, write_table};
use crate::domain::coords::Coordinates;
use crate::domain::ports::Storage;
use crate::utils::error::{AtCleanError, Result};

pub const SNINFO_COLUMNS: [&str; 4] = ["tnsname", "ra", "dec", "mjd0"];

#[derive(Debug, Clone, PartialEq)]
pub struct SnInfoRow {
    pub tnsname: String,
    pub ra: Option<String>,
    pub dec: Option<String>,
    pub mjd0: Option<f64>,
}

impl SnInfoRow {
    fn new(tnsname: &str) -> Self {
        Self {
            tnsname: tnsname.to_string(),
            ra: None,
            dec: None,
            mjd0: None,
        }
    }

    /// Coordinates, when both RA and Dec are known.
    pub fn coords(&self) -> Result<Option<Coordinates>> {
        match (&self.ra, &self.dec) {
            (Some(ra), Some(dec)) => Coordinates::parse(ra, dec).map(Some),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnInfoTable {
    pub path: String,
    pub rows: Vec<SnInfoRow>,
}

fn optional_string(value: &str) -> Option<String> {
    (!value.eq_ignore_ascii_case("nan")).then(|| value.to_string())
}

impl SnInfoTable {
    pub fn empty(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            rows: Vec::new(),
        }
    }

    /// Loads the table, starting from an empty one when the file does not exist.
    pub async fn load<S: Storage>(storage: &S, path: &str) -> Result<Self> {
        if !storage.exists(path).await {
            tracing::info!("No SN info table at {}; starting a blank one", path);
            return Ok(Self::empty(path));
        }
        let bytes = storage.read_file(path).await?;
        let text = String::from_utf8_lossy(&bytes);
        Self::parse(&text, path)
    }

    pub async fn save<S: Storage>(&self, storage: &S) -> Result<()> {
        tracing::info!("Saving SN info table at {}", self.path);
        storage.write_file(&self.path, self.render()?.as_bytes()).await
    }

    pub fn parse(text: &str, path: &str) -> Result<Self> {
        let table = parse_table(text, path)?;
        let mut sninfo = Self::empty(path);
        if table.header.is_empty() {
            return Ok(sninfo);
        }
        table.require(&["tnsname"], path)?;
        let column = |name: &str| table.column(name);

        for (line, values) in &table.rows {
            let get = |name: &str| column(name).map(|ix| values[ix].as_str());
            let Some(tnsname) = get("tnsname") else {
                continue;
            };
            if sninfo.get(tnsname).is_some() {
                tracing::warn!(
                    "SN info table has duplicate rows for {}; keeping the first",
                    tnsname
                );
                continue;
            }
            let mjd0 = match get("mjd0") {
                Some(value) => parse_float(value, path, *line, "mjd0")?,
                None => f64::NAN,
            };
            sninfo.rows.push(SnInfoRow {
                tnsname: tnsname.to_string(),
                ra: get("ra").and_then(optional_string),
                dec: get("dec").and_then(optional_string),
                mjd0: (!mjd0.is_nan()).then_some(mjd0),
            });
        }
        Ok(sninfo)
    }

    pub fn render(&self) -> Result<String> {
        let header: Vec<String> = SNINFO_COLUMNS.iter().map(|c| c.to_string()).collect();
        let rows: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                vec![
                    row.tnsname.clone(),
                    row.ra.clone().unwrap_or_else(|| "NaN".to_string()),
                    row.dec.clone().unwrap_or_else(|| "NaN".to_string()),
                    format_float(row.mjd0.unwrap_or(f64::NAN)),
                ]
            })
            .collect();
        write_table(&header, &rows)
    }

    pub fn get(&self, tnsname: &str) -> Option<&SnInfoRow> {
        self.rows.iter().find(|row| row.tnsname == tnsname)
    }

    /// Known coordinates and MJD0 of an SN; both are `None` for unknown SNe.
    pub fn get_info(&self, tnsname: &str) -> Result<(Option<Coordinates>, Option<f64>)> {
        match self.get(tnsname) {
            Some(row) => Ok((row.coords()?, row.mjd0)),
            None => Ok((None, None)),
        }
    }

    /// Fills in missing values (or replaces all given values with
    /// `overwrite`), adding a row for unknown SNe.
    pub fn update(
        &mut self,
        tnsname: &str,
        coords: Option<&Coordinates>,
        mjd0: Option<f64>,
        overwrite: bool,
    ) {
        let position = match self.rows.iter().position(|row| row.tnsname == tnsname) {
            Some(position) => position,
            None => {
                self.rows.push(SnInfoRow::new(tnsname));
                self.rows.len() - 1
            }
        };
        let row = &mut self.rows[position];

        if let Some(mjd0) = mjd0 {
            if overwrite || row.mjd0.is_none() {
                row.mjd0 = Some(mjd0);
            }
        }
        if let Some(coords) = coords {
            if overwrite || row.ra.is_none() {
                row.ra = Some(coords.ra_string());
            }
            if overwrite || row.dec.is_none() {
                row.dec = Some(coords.dec_string());
            }
        }
    }
}

impl std::fmt::Display for SnInfoTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.render() {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(std::fmt::Error),
        }
    }
}

/// Fails when an SN info row exists but cannot be interpreted.
pub fn validate_row(row: &SnInfoRow) -> Result<()> {
    row.coords().map(|_| ()).map_err(|e| AtCleanError::ValidationError {
        message: format!("SN info row for {} has invalid coordinates: {}", row.tnsname, e),
    })
}
