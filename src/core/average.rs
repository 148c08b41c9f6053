use crate::core::cuts::BadDayCut;
use crate::core::stats::{sigma_clip, ClipOptions, Sample};
use crate::domain::model::{AveragedBin, AveragedLightCurve, AveragedSupernova, LightCurve, Supernova};
use crate::utils::error::Result;

pub const ZERO_POINT: f64 = 23.9;

/// AB magnitude and its error for a flux in uJy. Fluxes below
/// `sigma_limit * dflux` become upper limits with a NaN error.
pub fn flux_to_mag(flux: f64, dflux: f64, sigma_limit: f64) -> (f64, f64) {
    if !flux.is_finite() || !dflux.is_finite() {
        return (f64::NAN, f64::NAN);
    }
    if flux < sigma_limit * dflux {
        let limit = sigma_limit * dflux;
        if limit <= 0.0 {
            return (f64::NAN, f64::NAN);
        }
        return (-2.5 * limit.log10() + ZERO_POINT, f64::NAN);
    }
    (
        -2.5 * flux.log10() + ZERO_POINT,
        2.5 / std::f64::consts::LN_10 * dflux / flux,
    )
}

pub fn mag_to_flux(mag: f64) -> f64 {
    10f64.powf(-0.4 * (mag - ZERO_POINT))
}

fn flux_samples(lc: &LightCurve, indices: &[usize]) -> Vec<Sample> {
    indices
        .iter()
        .map(|&ix| {
            let m = &lc.measurements[ix];
            Sample::new(ix, m.flux).with_noise(m.effective_dflux())
        })
        .collect()
}

fn mean_mjd(lc: &LightCurve, indices: &[usize]) -> f64 {
    let samples: Vec<Sample> = indices
        .iter()
        .map(|&ix| Sample::new(ix, lc.measurements[ix].mjd))
        .collect();
    clipped_mean(&samples)
}

/// MJD weighted by the inverse variance of the flux.
fn weighted_mean_mjd(lc: &LightCurve, indices: &[usize]) -> f64 {
    let samples: Vec<Sample> = indices
        .iter()
        .map(|&ix| {
            let m = &lc.measurements[ix];
            Sample::new(ix, m.mjd).with_noise(m.effective_dflux())
        })
        .collect();
    clipped_mean(&samples)
}

fn clipped_mean(samples: &[Sample]) -> f64 {
    sigma_clip(samples, &ClipOptions::no_clipping())
        .mean
        .unwrap_or(f64::NAN)
}

/// Averages `lc` into MJD bins, flagging bad bins in the averaged light
/// curve and the measurements that went into them in `lc`.
pub fn average_light_curve(
    lc: &mut LightCurve,
    cut: &BadDayCut,
    previous_flags: u32,
) -> AveragedLightCurve {
    let mut avg = AveragedLightCurve::new(lc.control_index, lc.filter, cut.mjd_bin_size);
    let finite_mjds: Vec<f64> = lc.mjds().into_iter().filter(|m| m.is_finite()).collect();
    if finite_mjds.is_empty() {
        return avg;
    }
    let min_mjd = finite_mjds.iter().copied().fold(f64::INFINITY, f64::min).floor();
    let max_mjd = finite_mjds.iter().copied().fold(f64::NEG_INFINITY, f64::max).floor() + 1.0;

    let options = ClipOptions::default();
    let mut step = 0usize;
    loop {
        let start = min_mjd + step as f64 * cut.mjd_bin_size;
        if start > max_mjd {
            break;
        }
        step += 1;
        let end = start + cut.mjd_bin_size;

        let range_ix = lc.indices_where(|m| m.mjd >= start && m.mjd < end);
        let good_ix: Vec<usize> = range_ix
            .iter()
            .copied()
            .filter(|&ix| !lc.measurements[ix].is_masked(previous_flags))
            .collect();
        let mut bin = AveragedBin::empty(start + 0.5 * cut.mjd_bin_size, range_ix.len() - good_ix.len());

        if range_ix.is_empty() {
            bin.mask |= cut.flag;
            avg.bins.push(bin);
            continue;
        }

        // 沒有好的量測時仍然平均，但整個 bin 標記為壞
        if good_ix.is_empty() {
            let stats = sigma_clip(&flux_samples(lc, &range_ix), &options);
            bin.mjd = mean_mjd(lc, &range_ix);
            bin.flux = stats.mean.unwrap_or(f64::NAN);
            bin.dflux = stats.mean_err.unwrap_or(f64::NAN);
            bin.stdev = stats.stdev.unwrap_or(f64::NAN);
            bin.x2 = stats.x2norm.unwrap_or(f64::NAN);
            bin.nclip = stats.nclip;
            bin.ngood = stats.ngood;
            bin.mask |= cut.flag;
            lc.update_mask(cut.flag, &range_ix, false);
            avg.bins.push(bin);
            continue;
        }

        let stats = sigma_clip(&flux_samples(lc, &good_ix), &options);
        let Some(mean) = stats.mean.filter(|_| !stats.ix_good.is_empty()) else {
            lc.update_mask(cut.flag, &range_ix, false);
            bin.mask |= cut.flag;
            avg.bins.push(bin);
            continue;
        };

        bin.mjd = weighted_mean_mjd(lc, &stats.ix_good);
        bin.flux = mean;
        bin.dflux = stats.mean_err.unwrap_or(f64::NAN);
        bin.stdev = stats.stdev.unwrap_or(f64::NAN);
        bin.x2 = stats.x2norm.unwrap_or(f64::NAN);
        bin.nclip = stats.nclip;
        bin.ngood = stats.ngood;

        if !stats.ix_clip.is_empty() {
            lc.update_mask(cut.ixclip_flag, &stats.ix_clip, false);
        }

        if good_ix.len() < 3 {
            lc.update_mask(cut.smallnum_flag, &range_ix, false);
            bin.mask |= cut.smallnum_flag;
        } else {
            let is_bad = stats.ngood < cut.ngood_min
                || stats.nclip > cut.nclip_max
                || stats.x2norm.is_some_and(|x2| x2 > cut.x2_max);
            if is_bad {
                lc.update_mask(cut.flag, &range_ix, false);
                bin.mask |= cut.flag;
            }
        }
        avg.bins.push(bin);
    }

    for bin in &mut avg.bins {
        let (mag, dmag) = flux_to_mag(bin.flux, bin.dflux, cut.flux2mag_sigmalimit);
        bin.mag = mag;
        bin.dmag = dmag;
    }
    avg
}

#[derive(Debug, Clone, PartialEq)]
pub struct BadDaySummary {
    pub mjd_bin_size: f64,
    pub percent: f64,
}

/// Averages the SN and every control light curve; the returned percentage is
/// the share of averaged SN bins carrying a previous flag or a bad-day flag.
pub fn apply_badday_cut(
    sn: &mut Supernova,
    cut: &BadDayCut,
    previous_flags: u32,
) -> Result<(AveragedSupernova, BadDaySummary)> {
    let mut avg_sn = AveragedSupernova::new(sn.tnsname.clone(), sn.filter, cut.mjd_bin_size);
    avg_sn.mjd0 = sn.mjd0;

    for (control_index, lc) in sn.lcs.iter_mut() {
        if *control_index == 0 {
            tracing::info!("Now averaging SN light curve...");
        } else {
            tracing::debug!("Now averaging control light curve {}...", control_index);
        }
        for m in &mut lc.measurements {
            m.mask &= !(cut.flag | cut.ixclip_flag | cut.smallnum_flag);
        }
        let avg = average_light_curve(lc, cut, previous_flags);
        avg_sn.avg_lcs.insert(*control_index, avg);
    }

    let all_flags = previous_flags | cut.flag | cut.ixclip_flag | cut.smallnum_flag;
    let percent = avg_sn.sn()?.percent_masked(all_flags);
    tracing::info!(
        "Bad day cut: {:.2}% of averaged SN bins flagged ({:#x})",
        percent,
        cut.flag
    );
    Ok((
        avg_sn,
        BadDaySummary {
            mjd_bin_size: cut.mjd_bin_size,
            percent,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Filter, Measurement};
    use approx::assert_abs_diff_eq;

    fn lc(rows: &[(f64, f64, f64)]) -> LightCurve {
        LightCurve::from_measurements(
            0,
            Filter::Orange,
            rows.iter()
                .map(|(mjd, flux, dflux)| Measurement::new(*mjd, *flux, *dflux))
                .collect(),
        )
    }

    #[test]
    fn test_flux_to_mag() {
        let (mag, dmag) = flux_to_mag(100.0, 1.0, 3.0);
        assert_abs_diff_eq!(mag, 18.9, epsilon = 1e-12);
        assert_abs_diff_eq!(dmag, 1.0857362047581294 / 100.0, epsilon = 1e-12);

        let (mag, dmag) = flux_to_mag(1.0, 10.0, 3.0);
        assert_abs_diff_eq!(mag, -2.5 * 30f64.log10() + 23.9, epsilon = 1e-12);
        assert!(dmag.is_nan());

        assert_abs_diff_eq!(mag_to_flux(18.9), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bins_cover_floor_min_to_floor_max_plus_one() {
        let mut light_curve = lc(&[
            (59000.1, 10.0, 1.0),
            (59000.2, 10.0, 1.0),
            (59000.3, 10.0, 1.0),
            (59002.5, 10.0, 1.0),
        ]);
        let avg = average_light_curve(&mut light_curve, &BadDayCut::default(), 0);

        let bins: Vec<f64> = avg.bins.iter().map(|b| b.mjd_bin).collect();
        assert_eq!(bins, vec![59000.5, 59001.5, 59002.5, 59003.5]);

        // three good measurements, consistent
        assert_eq!(avg.bins[0].ngood, 3);
        assert_eq!(avg.bins[0].mask, 0);
        assert_abs_diff_eq!(avg.bins[0].flux, 10.0);
        assert_abs_diff_eq!(avg.bins[0].mjd, 59000.2, epsilon = 1e-9);

        // empty bin
        assert_eq!(avg.bins[1].mask, 0x800000);
        assert!(avg.bins[1].flux.is_nan());

        // single measurement: small number
        assert_eq!(avg.bins[2].mask, 0x2000);
        assert_eq!(light_curve.measurements[3].mask, 0x2000);
    }

    #[test]
    fn test_bin_without_good_measurements_is_bad() {
        let mut light_curve = lc(&[(59000.1, 10.0, 1.0), (59000.2, 12.0, 1.0)]);
        light_curve.update_mask(0x2, &[0, 1], false);

        let avg = average_light_curve(&mut light_curve, &BadDayCut::default(), 0x2);
        assert_eq!(avg.bins[0].nexcluded, 2);
        assert!(avg.bins[0].is_masked(0x800000));
        assert_abs_diff_eq!(avg.bins[0].flux, 11.0);
        assert_eq!(light_curve.ix_masked(0x800000), vec![0, 1]);
    }

    #[test]
    fn test_inconsistent_bin_is_flagged_bad() {
        let mut light_curve = lc(&[
            (59000.1, 0.0, 1.0),
            (59000.2, 10.0, 1.0),
            (59000.3, 20.0, 1.0),
        ]);
        let avg = average_light_curve(&mut light_curve, &BadDayCut::default(), 0);
        // chi-square per degree of freedom of 100 exceeds x2_max = 4
        assert!(avg.bins[0].x2 > 4.0);
        assert!(avg.bins[0].is_masked(0x800000));
        assert_eq!(light_curve.ix_masked(0x800000), vec![0, 1, 2]);
    }

    #[test]
    fn test_badday_percent_counts_previous_flags() {
        let mut sn = Supernova::new("2020abc", Filter::Orange);
        let rows: Vec<_> = (0..6)
            .map(|i| (59000.0 + 0.1 * (i % 3) as f64 + (i / 3) as f64, 5.0, 1.0))
            .collect();
        sn.lcs.insert(0, lc(&rows));

        let (avg_sn, summary) = apply_badday_cut(&mut sn, &BadDayCut::default(), 0x3).unwrap();
        // two populated bins plus the trailing empty bin
        assert_eq!(avg_sn.sn().unwrap().len(), 3);
        assert_abs_diff_eq!(summary.percent, 100.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bin_mjd_is_weighted_by_flux_uncertainty() {
        let mut light_curve = lc(&[
            (59000.1, 10.0, 1.0),
            (59000.2, 10.0, 1.0),
            (59000.7, 10.0, 2.0),
        ]);
        let avg = average_light_curve(&mut light_curve, &BadDayCut::default(), 0);

        // 權重 1, 1, 1/4
        let expected = (59000.1 + 59000.2 + 0.25 * 59000.7) / 2.25;
        assert_abs_diff_eq!(avg.bins[0].mjd, expected, epsilon = 1e-9);
        assert!(avg.bins[0].mjd < 59000.3);
    }
}
