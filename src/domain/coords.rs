use crate::utils::error::{AtCleanError, Result};
use std::fmt;

/// Sky position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub ra: f64,
    pub dec: f64,
}

impl Coordinates {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    /// RA 可為 `hh:mm:ss.s` (小時) 或度數；Dec 可為 `±dd:mm:ss.s` 或度數
    pub fn parse(ra: &str, dec: &str) -> Result<Self> {
        Ok(Self {
            ra: parse_ra(ra)?,
            dec: parse_dec(dec)?,
        })
    }

    /// Parses `"RA,Dec"` as given on the command line.
    pub fn parse_pair(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [ra, dec] => Self::parse(ra, dec),
            _ => Err(AtCleanError::InvalidConfigValueError {
                field: "coords".to_string(),
                value: value.to_string(),
                reason: "Expected comma-separated RA and Dec".to_string(),
            }),
        }
    }

    /// Position `radius_arcsec` away at position angle `theta` (radians),
    /// with the RA offset stretched by 1/cos(Dec).
    pub fn offset(&self, radius_arcsec: f64, theta: f64) -> Self {
        let r = radius_arcsec / 3600.0;
        let ra = self.ra + r * theta.cos() / self.dec.to_radians().cos();
        let dec = self.dec + r * theta.sin();
        Self {
            ra: ra.rem_euclid(360.0),
            dec,
        }
    }

    pub fn ra_string(&self) -> String {
        format!("{:0.14}", self.ra)
    }

    pub fn dec_string(&self) -> String {
        format!("{:0.14}", self.dec)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RA {:0.14}, Dec {:0.14}", self.ra, self.dec)
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> AtCleanError {
    AtCleanError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_sexagesimal(field: &str, value: &str) -> Result<f64> {
    let trimmed = value.trim();
    let negative = trimmed.starts_with('-');
    let unsigned = trimmed.trim_start_matches(['-', '+']);

    let mut total = 0.0;
    let mut scale = 1.0;
    let mut parts = 0;
    for part in unsigned.split(':') {
        let component: f64 = part
            .trim()
            .parse()
            .map_err(|_| invalid(field, value, "Invalid sexagesimal component"))?;
        total += component / scale;
        scale *= 60.0;
        parts += 1;
    }
    if parts > 3 {
        return Err(invalid(field, value, "Too many sexagesimal components"));
    }

    Ok(if negative { -total } else { total })
}

pub fn parse_ra(value: &str) -> Result<f64> {
    let ra = if value.contains(':') {
        parse_sexagesimal("ra", value)? * 15.0
    } else {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid("ra", value, "Not a number"))?
    };
    if !ra.is_finite() || !(0.0..360.0).contains(&ra) {
        return Err(invalid("ra", value, "RA must be within [0, 360) degrees"));
    }
    Ok(ra)
}

pub fn parse_dec(value: &str) -> Result<f64> {
    let dec = if value.contains(':') {
        parse_sexagesimal("dec", value)?
    } else {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid("dec", value, "Not a number"))?
    };
    if !dec.is_finite() || !(-90.0..=90.0).contains(&dec) {
        return Err(invalid("dec", value, "Dec must be within [-90, 90] degrees"));
    }
    Ok(dec)
}
