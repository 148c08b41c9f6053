use crate::adapters::lc_file::{
    lc_filename, parse_light_curve, readme_filename, render_averaged_light_curve,
    render_light_curve,
};
use crate::adapters::report::render_readme;
use crate::adapters::sninfo::SnInfoTable;
use crate::adapters::tns::TnsClient;
use crate::config::toml_config::TomlConfig;
use crate::core::clean::{clean_supernova, CleanOutcome};
use crate::core::{Pipeline, Storage};
use crate::domain::model::{Filter, Supernova};
use crate::utils::error::{AtCleanError, Result};
use crate::utils::validation::Validate;

#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub tnsnames: Vec<String>,
    pub filters: Vec<Filter>,
    pub num_controls: usize,
    pub mjd0: Option<f64>,
    pub overwrite: bool,
}

impl Validate for CleanOptions {
    fn validate(&self) -> Result<()> {
        if self.tnsnames.is_empty() {
            return Err(AtCleanError::ValidationError {
                message: "Specify at least one TNS name to clean".to_string(),
            });
        }
        if self.filters.is_empty() {
            return Err(AtCleanError::ValidationError {
                message: "Specify at least one filter to clean".to_string(),
            });
        }
        if self.tnsnames.len() > 1 && self.mjd0.is_some() {
            return Err(AtCleanError::ValidationError {
                message: "Cannot use the same MJD0 for several SNe; put it in the SN info table instead"
                    .to_string(),
            });
        }
        Ok(())
    }
}

pub struct CleanedSupernova {
    pub sn: Supernova,
    pub outcome: CleanOutcome,
}

pub struct CleanPipeline<S: Storage> {
    pub(crate) storage: S,
    pub(crate) config: TomlConfig,
    pub(crate) options: CleanOptions,
}

impl<S: Storage> CleanPipeline<S> {
    pub fn new(storage: S, config: TomlConfig, options: CleanOptions) -> Self {
        Self {
            storage,
            config,
            options,
        }
    }

    /// Controls feed the true-uncertainty estimate, the control cut and
    /// the dynamic chi-square cut unless it uses the pre-MJD0 SN rows.
    fn needs_controls(&self) -> bool {
        let cuts = &self.config.cuts;
        let x2 = &cuts.x2_cut;
        cuts.uncert_est.enabled
            || cuts.controls_cut.enabled
            || (x2.enabled && x2.dynamic && !x2.use_pre_mjd0_lc)
    }

    /// MJD0 from the command line, the SN info table or TNS, in that order.
    async fn resolve_mjd0(
        &self,
        tnsname: &str,
        sninfo: &mut SnInfoTable,
        tns: Option<&TnsClient>,
    ) -> Option<f64> {
        if let Some(mjd0) = self.options.mjd0 {
            tracing::info!("Setting MJD0 to --mjd0 argument: {} MJD", mjd0);
            return Some(mjd0);
        }
        if let Some(mjd0) = sninfo.get(tnsname).and_then(|row| row.mjd0) {
            tracing::info!("Setting MJD0 to {} MJD from SN info table", mjd0);
            return Some(mjd0);
        }
        let tns = tns?;
        match tns.get_object(tnsname).await {
            Ok(object) => {
                let mjd0 = object.mjd0();
                tracing::info!("Setting MJD0 to {} MJD from TNS", mjd0);
                sninfo.update(tnsname, Some(&object.coords), Some(mjd0), false);
                Some(mjd0)
            }
            Err(e) => {
                tracing::warn!("⚠️ Could not get MJD0 of {} from TNS: {}", tnsname, e);
                None
            }
        }
    }

    async fn read_text(&self, path: &str) -> Result<String> {
        let bytes = self.storage.read_file(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn load_supernova(&self, tnsname: &str, filter: Filter, mjd0: Option<f64>) -> Result<Supernova> {
        let output = &self.config.dir.output;
        let mut sn = Supernova::new(tnsname, filter);
        sn.mjd0 = mjd0;

        let path = lc_filename(output, tnsname, filter, 0, None, false);
        if !self.storage.exists(&path).await {
            return Err(AtCleanError::ValidationError {
                message: format!("SN light curve {} not found; download it first", path),
            });
        }
        sn.lcs
            .insert(0, parse_light_curve(&self.read_text(&path).await?, 0, filter, &path)?);

        let num_controls = if self.needs_controls() {
            self.options.num_controls
        } else {
            0
        };
        for control_index in 1..=num_controls {
            let path = lc_filename(output, tnsname, filter, control_index, None, false);
            if !self.storage.exists(&path).await {
                return Err(AtCleanError::ValidationError {
                    message: format!(
                        "Control light curve {} not found; download controls with -c or pass -n 0",
                        path
                    ),
                });
            }
            let lc = parse_light_curve(&self.read_text(&path).await?, control_index, filter, &path)?;
            sn.lcs.insert(control_index, lc);
        }
        tracing::info!("📂 Loaded {}", sn);
        Ok(sn)
    }

    async fn write(&self, path: &str, text: &str) -> Result<bool> {
        if !self.options.overwrite && self.storage.exists(path).await {
            tracing::warn!("⚠️ {} already exists; pass --overwrite to replace it", path);
            return Ok(false);
        }
        self.storage.write_file(path, text.as_bytes()).await?;
        Ok(true)
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for CleanPipeline<S> {
    type Extracted = Vec<Supernova>;
    type Transformed = Vec<CleanedSupernova>;

    fn name(&self) -> String {
        "clean".to_string()
    }

    async fn extract(&self) -> Result<Vec<Supernova>> {
        let mut sninfo = SnInfoTable::load(&self.storage, &self.config.dir.sninfo_path()).await?;
        let tns = self
            .config
            .credentials
            .tns()?
            .map(|credentials| TnsClient::new(&self.config.download.tns_url, credentials));
        let rows_before = sninfo.rows.clone();

        let mut sns = Vec::new();
        for tnsname in &self.options.tnsnames {
            let mjd0 = self.resolve_mjd0(tnsname, &mut sninfo, tns.as_ref()).await;
            if mjd0.is_none() {
                tracing::warn!("⚠️ MJD0 of {} is unknown; the whole light curve counts as pre-MJD0", tnsname);
            }
            for filter in &self.options.filters {
                sns.push(self.load_supernova(tnsname, *filter, mjd0).await?);
            }
        }

        if sninfo.rows != rows_before {
            sninfo.save(&self.storage).await?;
        }
        Ok(sns)
    }

    async fn transform(&self, data: Vec<Supernova>) -> Result<Vec<CleanedSupernova>> {
        data.into_iter()
            .map(|mut sn| {
                let outcome = clean_supernova(&mut sn, &self.config.cuts)?;
                Ok(CleanedSupernova { sn, outcome })
            })
            .collect()
    }

    async fn load(&self, result: Vec<CleanedSupernova>) -> Result<String> {
        let output = &self.config.dir.output;
        let mut written = 0;

        for cleaned in &result {
            let sn = &cleaned.sn;
            for (control_index, lc) in &sn.lcs {
                let path = lc_filename(output, &sn.tnsname, sn.filter, *control_index, None, true);
                if self.write(&path, &render_light_curve(lc)?).await? {
                    written += 1;
                }
            }
            if let Some(averaged) = &cleaned.outcome.averaged {
                for (control_index, avg) in &averaged.avg_lcs {
                    let path = lc_filename(
                        output,
                        &sn.tnsname,
                        sn.filter,
                        *control_index,
                        Some(averaged.mjd_bin_size),
                        false,
                    );
                    if self.write(&path, &render_averaged_light_curve(avg)?).await? {
                        written += 1;
                    }
                }
            }
        }

        // 每個 SN 一份 README，包含所有濾鏡
        for tnsname in &self.options.tnsnames {
            let summaries: Vec<_> = result
                .iter()
                .filter(|c| &c.sn.tnsname == tnsname)
                .map(|c| c.outcome.summary.clone())
                .collect();
            let readme = render_readme(tnsname, &self.config.cuts, &summaries)?;
            self.storage
                .write_file(&readme_filename(output, tnsname), readme.as_bytes())
                .await?;
        }

        tracing::info!("💾 Saved {} cleaned and averaged light curve files", written);
        Ok(output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CleanOptions {
        CleanOptions {
            tnsnames: vec!["2020abc".to_string()],
            filters: vec![Filter::Orange],
            num_controls: 8,
            mjd0: None,
            overwrite: false,
        }
    }

    #[test]
    fn test_options_validation() {
        assert!(options().validate().is_ok());

        let mut opts = options();
        opts.filters.clear();
        assert!(opts.validate().is_err());

        let mut opts = options();
        opts.tnsnames.push("2021xyz".to_string());
        opts.mjd0 = Some(59000.0);
        assert!(opts.validate().is_err());
    }
}
