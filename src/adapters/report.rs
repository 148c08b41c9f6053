//! README.md written next to the cleaned light curves.

use crate::core::clean::CleanSummary;
use crate::core::cuts::CutList;
use crate::core::x2_cut::X2CutChoice;
use crate::utils::error::{AtCleanError, Result};
use std::fmt::{self, Write};

fn hex(flag: u32) -> String {
    format!("{:#x}", flag)
}

fn file_conventions(out: &mut String, tnsname: &str, cuts: &CutList) -> fmt::Result {
    let bin = format!("{:.2}", cuts.badday_cut.mjd_bin_size);
    writeln!(
        out,
        "The ATLAS SN light curves are separated by filter (orange and cyan) and labelled as such in the file name. \
         Averaged light curves contain an additional number in the file name that represents the MJD bin size used. \
         Control light curves are located in the \"controls\" subdirectory and follow the same naming scheme, \
         only with their control index added after the SN name.\n"
    )?;
    writeln!(out, "The following details the file names for each of the light curve versions:")?;
    writeln!(out, "- SN light curves: `{0}.o.lc.txt` and `{0}.c.lc.txt`", tnsname)?;
    writeln!(
        out,
        "- Cleaned SN light curves: `{0}.o.clean.lc.txt` and `{0}.c.clean.lc.txt`",
        tnsname
    )?;
    if cuts.badday_cut.enabled {
        writeln!(
            out,
            "- Averaged light curves: `{0}.o.{1}days.lc.txt` and `{0}.c.{1}days.lc.txt`",
            tnsname, bin
        )?;
    }
    writeln!(
        out,
        "- Control light curves, where X=001,...: `{0}_iX.o.lc.txt` and `{0}_iX.c.lc.txt`\n",
        tnsname
    )?;
    Ok(())
}

fn mask_conventions(out: &mut String, cuts: &CutList) -> fmt::Result {
    writeln!(
        out,
        "The following summarizes the hex values in the \"Mask\" column of each light curve for each cut applied \
         (see below sections for more information on each cut):"
    )?;
    if cuts.uncert_cut.enabled {
        writeln!(out, "- Uncertainty cut: {}", hex(cuts.uncert_cut.flag))?;
    }
    if cuts.x2_cut.enabled {
        writeln!(out, "- Chi-square cut: {}", hex(cuts.x2_cut.flag))?;
    }
    if cuts.controls_cut.enabled {
        let c = &cuts.controls_cut;
        writeln!(out, "- Control light curve cut: {}", hex(c.flag))?;
        writeln!(out, "\t- Bad measurement: {}", hex(c.flag))?;
        writeln!(out, "\t- Questionable measurement: {}", hex(c.questionable_flag))?;
        writeln!(out, "\t- Chi-square of control statistics: {}", hex(c.x2_flag))?;
        writeln!(out, "\t- Abs. S/N of control mean: {}", hex(c.stn_flag))?;
        writeln!(out, "\t- Number of clipped controls: {}", hex(c.nclip_flag))?;
        writeln!(out, "\t- Number of good controls: {}", hex(c.ngood_flag))?;
    }
    for cut in &cuts.custom_cuts {
        writeln!(out, "- Custom cut '{}' on {}: {}", cut.name, cut.column, hex(cut.flag))?;
    }
    if cuts.badday_cut.enabled {
        let b = &cuts.badday_cut;
        writeln!(out, "- Bad day (for averaged light curves): {}", hex(b.flag))?;
        writeln!(out, "\t- Measurement clipped while averaging: {}", hex(b.ixclip_flag))?;
        writeln!(out, "\t- Small number of good measurements in bin: {}", hex(b.smallnum_flag))?;
    }
    writeln!(out)?;
    Ok(())
}

fn describe_choice(choice: &X2CutChoice) -> &'static str {
    match choice {
        X2CutChoice::Static => "static cut",
        X2CutChoice::Fallback => "no cut met either limit; fell back to the static cut",
        X2CutChoice::Contamination => "only the contamination limit could be met",
        X2CutChoice::Loss => "only the loss limit could be met",
        X2CutChoice::Both => "both the loss and contamination limits are met",
        X2CutChoice::Conflict(_) => "the loss and contamination limits conflict; the prioritized limit decided",
    }
}

fn filter_section(out: &mut String, cuts: &CutList, summary: &CleanSummary) -> fmt::Result {
    writeln!(out, "## FILTER: {}\n", summary.filter)?;

    if let Some(percent) = summary.uncert_cut {
        writeln!(out, "### Uncertainty cut")?;
        writeln!(
            out,
            "Total percent of data flagged ({}): {:.2}%\n",
            hex(cuts.uncert_cut.flag),
            percent
        )?;
    }

    if let Some(est) = &summary.uncert_est {
        writeln!(out, "### True uncertainties estimation")?;
        writeln!(
            out,
            "We can increase the typical uncertainties from {:.2} to {:.2} by adding an additional systematic uncertainty of {:.2} in quadrature",
            est.sigma_typical_old, est.sigma_typical_new, est.sigma_extra
        )?;
        writeln!(
            out,
            "New typical uncertainty is {:.2}% greater than old typical uncertainty",
            est.percent_greater
        )?;
        if est.applied {
            writeln!(out, "Apply true uncertainties estimation: True")?;
            writeln!(out, "The extra noise was added to the uncertainties of the SN light curve and copied to the \"duJy_new\" column\n")?;
        } else {
            writeln!(out, "Apply true uncertainties estimation: False\n")?;
        }
    }

    if let Some(x2) = &summary.x2_cut {
        writeln!(out, "### Chi-square cut")?;
        writeln!(
            out,
            "Chi-square cut {:.2} selected ({})",
            x2.x2_max,
            describe_choice(&x2.choice)
        )?;
        if let Some(row) = &x2.selected_row {
            writeln!(
                out,
                "Contamination: {:.2}%, loss: {:.2}%",
                row.pcontamination, row.ploss
            )?;
        }
        writeln!(
            out,
            "Total percent of data flagged ({}): {:.2}%\n",
            hex(cuts.x2_cut.flag),
            x2.percent
        )?;
    }

    if let Some(controls) = &summary.controls_cut {
        let c = &cuts.controls_cut;
        writeln!(out, "### Control light curve cut")?;
        writeln!(out, "Percent of data above x2_max bound ({}): {:.2}%", hex(c.x2_flag), controls.x2_percent)?;
        writeln!(out, "Percent of data above stn_max bound ({}): {:.2}%", hex(c.stn_flag), controls.stn_percent)?;
        writeln!(out, "Percent of data above Nclip_max bound ({}): {:.2}%", hex(c.nclip_flag), controls.nclip_percent)?;
        writeln!(out, "Percent of data below Ngood_min bound ({}): {:.2}%", hex(c.ngood_flag), controls.ngood_percent)?;
        writeln!(out, "Total percent of data flagged as questionable (not masked with control light curve flags but Nclip > 0) ({}): {:.2}%", hex(c.questionable_flag), controls.questionable_percent)?;
        writeln!(out, "Total percent of data flagged as bad ({}): {:.2}%\n", hex(c.flag), controls.percent)?;
    }

    for custom in &summary.custom_cuts {
        writeln!(out, "### Custom cut '{}'", custom.name)?;
        writeln!(
            out,
            "Total percent of data flagged by the cut on {} ({}): {:.2}%\n",
            custom.column,
            hex(custom.flag),
            custom.percent
        )?;
    }

    writeln!(
        out,
        "After the cuts are applied, the light curves are resaved with the new \"Mask\" column.\n\
         Total percent of data flagged as bad: {:.2}%\n",
        summary.total_percent
    )?;

    if let Some(badday) = &summary.badday {
        writeln!(out, "### Averaging light curves and bad day cut")?;
        writeln!(out, "MJD bin size: {:.2} day{}", badday.mjd_bin_size, if badday.mjd_bin_size == 1.0 { "" } else { "s" })?;
        writeln!(
            out,
            "Total percent of binned data flagged ({}): {:.2}%\n",
            hex(cuts.badday_cut.flag),
            badday.percent
        )?;
    }
    Ok(())
}

/// Renders the README of one SN from the summaries of each cleaned filter.
pub fn render_readme(tnsname: &str, cuts: &CutList, summaries: &[CleanSummary]) -> Result<String> {
    let mut out = String::new();
    write_readme(&mut out, tnsname, cuts, summaries)
        .map_err(|e| AtCleanError::processing(format!("Could not render README of {}: {}", tnsname, e)))?;
    Ok(out)
}

fn write_readme(
    out: &mut String,
    tnsname: &str,
    cuts: &CutList,
    summaries: &[CleanSummary],
) -> fmt::Result {
    writeln!(out, "# SN {} Light Curve Cleaning and Averaging\n", tnsname)?;
    file_conventions(out, tnsname, cuts)?;
    mask_conventions(out, cuts)?;
    for summary in summaries {
        filter_section(out, cuts, summary)?;
    }
    Ok(())
}
