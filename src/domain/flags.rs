//! Default bit values of the `Mask` column.
//!
//! Every cut ORs its flag into the mask of the measurements (or averaged bins)
//! it rejects. The values below are the defaults written to the README report;
//! all of them can be overridden in the configuration file.

/// PSF chi-square cut.
pub const X2_CUT: u32 = 0x1;
/// Uncertainty cut.
pub const UNCERT_CUT: u32 = 0x2;

/// Control statistics: chi-square of the control fluxes too large.
pub const CONTROLS_X2: u32 = 0x100;
/// Control statistics: |mean / error| of the control fluxes too large.
pub const CONTROLS_STN: u32 = 0x200;
/// Control statistics: too many clipped control measurements.
pub const CONTROLS_NCLIP: u32 = 0x400;
/// Control statistics: too few good control measurements.
pub const CONTROLS_NGOOD: u32 = 0x800;
/// Control statistics look fine but some controls were clipped.
pub const CONTROLS_QUESTIONABLE: u32 = 0x80000;
/// Control light curve cut.
pub const CONTROLS_BAD: u32 = 0x400000;

/// Measurement was sigma-clipped while averaging its bin.
pub const AVG_IXCLIP: u32 = 0x1000;
/// Fewer than three good measurements in the bin.
pub const AVG_SMALLNUM: u32 = 0x2000;
/// Bad day in the averaged light curve.
pub const AVG_BAD: u32 = 0x800000;

/// Formats a mask value the way it appears in light curve files.
pub fn format_mask(mask: u32) -> String {
    format!("0x{:08x}", mask)
}

/// Parses a mask value written either as hex (`0x...`) or decimal.
pub fn parse_mask(value: &str) -> Option<u32> {
    let value = value.trim();
    if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        return u32::from_str_radix(hex, 16).ok();
    }
    if let Ok(parsed) = value.parse::<u32>() {
        return Some(parsed);
    }
    // pandas 寫出的整數欄位偶爾帶小數點
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
        .map(|v| v as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_format_and_parse() {
        assert_eq!(format_mask(CONTROLS_BAD | UNCERT_CUT), "0x00400002");
        assert_eq!(parse_mask("0x00400002"), Some(0x400002));
        assert_eq!(parse_mask("2"), Some(2));
        assert_eq!(parse_mask("8.0"), Some(8));
        assert_eq!(parse_mask("abc"), None);
    }
}
