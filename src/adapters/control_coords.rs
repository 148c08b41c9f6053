//! Positions of the control light curves around an SN.

use crate::adapters::lc_file::{parse_table, write_table};
use crate::domain::coords::Coordinates;
use crate::utils::error::{AtCleanError, Result};
use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq)]
pub struct ControlPosition {
    pub control_index: usize,
    pub coords: Coordinates,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlLayout {
    /// `num_controls` positions evenly spaced on a circle of `radius_arcsec`.
    Circle { num_controls: usize, radius_arcsec: f64 },
    /// Explicit positions, numbered in file order from 1.
    Table(Vec<Coordinates>),
}

impl ControlLayout {
    pub fn positions(&self, center: &Coordinates) -> Vec<ControlPosition> {
        match self {
            ControlLayout::Circle {
                num_controls,
                radius_arcsec,
            } => (0..*num_controls)
                .map(|i| {
                    let theta = 2.0 * PI * i as f64 / *num_controls as f64;
                    ControlPosition {
                        control_index: i + 1,
                        coords: center.offset(*radius_arcsec, theta),
                    }
                })
                .collect(),
            ControlLayout::Table(coords) => coords
                .iter()
                .enumerate()
                .map(|(i, coords)| ControlPosition {
                    control_index: i + 1,
                    coords: *coords,
                })
                .collect(),
        }
    }

    /// Reads a table with `ra` and `dec` columns.
    pub fn parse_table(text: &str, path: &str) -> Result<Self> {
        let table = parse_table(text, path)?;
        table.require(&["ra", "dec"], path)?;
        let (ra_ix, dec_ix) = match (table.column("ra"), table.column("dec")) {
            (Some(ra), Some(dec)) => (ra, dec),
            _ => {
                return Err(AtCleanError::ValidationError {
                    message: format!("Control coordinates table {} needs ra and dec", path),
                })
            }
        };
        let coords = table
            .rows
            .iter()
            .map(|(_, values)| Coordinates::parse(&values[ra_ix], &values[dec_ix]))
            .collect::<Result<Vec<_>>>()?;
        if coords.is_empty() {
            return Err(AtCleanError::ValidationError {
                message: format!("Control coordinates table {} is empty", path),
            });
        }
        Ok(ControlLayout::Table(coords))
    }
}

/// Table of the control positions actually used, written next to the
/// control light curves.
pub fn render_positions(center: &Coordinates, positions: &[ControlPosition]) -> Result<String> {
    let header: Vec<String> = ["control_index", "ra", "dec", "ra_offset", "dec_offset"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let mut rows = vec![vec![
        "0".to_string(),
        center.ra_string(),
        center.dec_string(),
        "0".to_string(),
        "0".to_string(),
    ]];
    rows.extend(positions.iter().map(|p| {
        vec![
            p.control_index.to_string(),
            p.coords.ra_string(),
            p.coords.dec_string(),
            format!("{:.14}", p.coords.ra - center.ra),
            format!("{:.14}", p.coords.dec - center.dec),
        ]
    }));
    write_table(&header, &rows)
}
