use crate::adapters::atlas::AtlasClient;
use crate::adapters::control_coords::{render_positions, ControlLayout, ControlPosition};
use crate::adapters::lc_file::{
    control_coords_filename, lc_filename, parse_full_light_curve, render_light_curve,
};
use crate::adapters::sninfo::SnInfoTable;
use crate::adapters::tns::TnsClient;
use crate::config::toml_config::TomlConfig;
use crate::core::{Pipeline, Storage};
use crate::domain::coords::Coordinates;
use crate::domain::mjd::{download_range, now_mjd};
use crate::domain::model::{Filter, LightCurve};
use crate::utils::error::{AtCleanError, Result};
use crate::utils::validation::Validate;

/// What to download, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub tnsnames: Vec<String>,
    /// Days before now to start the light curve at.
    pub lookback_days: Option<f64>,
    pub max_mjd: Option<f64>,
    pub overwrite: bool,
    pub coords: Option<Coordinates>,
    pub mjd0: Option<f64>,
    pub controls: bool,
    /// Table of control positions replacing the circle pattern.
    pub ctrl_coords: Option<String>,
}

impl Validate for DownloadOptions {
    fn validate(&self) -> Result<()> {
        if self.tnsnames.is_empty() {
            return Err(AtCleanError::ValidationError {
                message: "Specify at least one TNS name to download".to_string(),
            });
        }
        if self.tnsnames.len() > 1
            && (self.coords.is_some() || self.mjd0.is_some() || self.ctrl_coords.is_some())
        {
            return Err(AtCleanError::ValidationError {
                message: "Cannot use the same coordinates, MJD0 or control coordinates for several SNe; \
                          put them in the SN info table instead"
                    .to_string(),
            });
        }
        if let Some(lookback) = self.lookback_days {
            if !lookback.is_finite() || lookback < 0.0 {
                return Err(AtCleanError::InvalidConfigValueError {
                    field: "lookbacktime".to_string(),
                    value: lookback.to_string(),
                    reason: "Lookback time must be a non-negative number of days".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// An SN with known coordinates and the positions to query for it.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTarget {
    pub tnsname: String,
    pub coords: Coordinates,
    pub mjd0: Option<f64>,
    /// Index 0 is the SN itself.
    pub positions: Vec<ControlPosition>,
}

impl DownloadTarget {
    fn controls(&self) -> &[ControlPosition] {
        &self.positions[1..]
    }
}

/// Resolved targets and an authenticated ATLAS session.
pub struct DownloadPlan<T> {
    pub sninfo: SnInfoTable,
    pub atlas: AtlasClient,
    pub min_mjd: f64,
    pub max_mjd: f64,
    pub targets: Vec<T>,
}

/// A target with the positions that still need to be queried.
pub type PendingTarget = (DownloadTarget, Vec<ControlPosition>);

pub struct DownloadPipeline<S: Storage> {
    pub(crate) storage: S,
    pub(crate) config: TomlConfig,
    pub(crate) options: DownloadOptions,
}

impl<S: Storage> DownloadPipeline<S> {
    pub fn new(storage: S, config: TomlConfig, options: DownloadOptions) -> Self {
        Self {
            storage,
            config,
            options,
        }
    }

    async fn control_layout(&self) -> Result<Option<ControlLayout>> {
        if !self.options.controls {
            return Ok(None);
        }
        match &self.options.ctrl_coords {
            Some(path) => {
                tracing::info!("Reading control coordinates from {}", path);
                let bytes = self.storage.read_file(path).await?;
                ControlLayout::parse_table(&String::from_utf8_lossy(&bytes), path).map(Some)
            }
            None => {
                tracing::info!(
                    "Circle pattern of {} control light curves with a radius of {}\"",
                    self.config.download.num_controls,
                    self.config.download.radius
                );
                Ok(Some(ControlLayout::Circle {
                    num_controls: self.config.download.num_controls,
                    radius_arcsec: self.config.download.radius,
                }))
            }
        }
    }

    /// 座標與 MJD0 的來源順序：SN info table、命令列、TNS
    async fn resolve_target(
        &self,
        tnsname: &str,
        sninfo: &SnInfoTable,
        tns: Option<&TnsClient>,
        layout: Option<&ControlLayout>,
    ) -> Result<DownloadTarget> {
        let (mut coords, mut mjd0) = sninfo.get_info(tnsname)?;
        if let Some(cli_coords) = self.options.coords {
            tracing::info!("Setting coordinates to --coords argument: {}", cli_coords);
            coords = Some(cli_coords);
        }
        if let Some(cli_mjd0) = self.options.mjd0 {
            tracing::info!("Setting MJD0 to --mjd0 argument: {} MJD", cli_mjd0);
            mjd0 = Some(cli_mjd0);
        }

        if coords.is_none() || mjd0.is_none() {
            match tns {
                Some(tns) => match tns.get_object(tnsname).await {
                    Ok(object) => {
                        coords.get_or_insert(object.coords);
                        mjd0.get_or_insert(object.mjd0());
                    }
                    Err(e) if coords.is_some() => {
                        tracing::warn!("⚠️ Could not get MJD0 of {} from TNS: {}", tnsname, e);
                    }
                    Err(e) => return Err(e),
                },
                None => tracing::warn!(
                    "⚠️ No TNS credentials configured; cannot look up missing data for {}",
                    tnsname
                ),
            }
        }

        let coords = coords.ok_or_else(|| AtCleanError::ValidationError {
            message: format!(
                "No coordinates for {}; pass --coords, add it to the SN info table or configure TNS credentials",
                tnsname
            ),
        })?;

        let mut positions = vec![ControlPosition {
            control_index: 0,
            coords,
        }];
        if let Some(layout) = layout {
            positions.extend(layout.positions(&coords));
        }
        Ok(DownloadTarget {
            tnsname: tnsname.to_string(),
            coords,
            mjd0,
            positions,
        })
    }

    fn filename(&self, tnsname: &str, filter: Filter, control_index: usize) -> String {
        lc_filename(
            &self.config.dir.output,
            tnsname,
            filter,
            control_index,
            None,
            false,
        )
    }

    async fn files_exist(&self, tnsname: &str, control_index: usize) -> bool {
        for filter in Filter::ALL {
            if !self
                .storage
                .exists(&self.filename(tnsname, filter, control_index))
                .await
            {
                return false;
            }
        }
        true
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for DownloadPipeline<S> {
    type Extracted = DownloadPlan<DownloadTarget>;
    type Transformed = DownloadPlan<PendingTarget>;

    fn name(&self) -> String {
        "download".to_string()
    }

    async fn extract(&self) -> Result<Self::Extracted> {
        tracing::info!(
            "List of transients to download from ATLAS: {:?}",
            self.options.tnsnames
        );
        let sninfo = SnInfoTable::load(&self.storage, &self.config.dir.sninfo_path()).await?;
        let layout = self.control_layout().await?;
        let (min_mjd, max_mjd) =
            download_range(self.options.lookback_days, self.options.max_mjd, now_mjd())?;

        let tns = self
            .config
            .credentials
            .tns()?
            .map(|credentials| TnsClient::new(&self.config.download.tns_url, credentials));

        let mut targets = Vec::new();
        for tnsname in &self.options.tnsnames {
            match self
                .resolve_target(tnsname, &sninfo, tns.as_ref(), layout.as_ref())
                .await
            {
                Ok(target) => targets.push(target),
                Err(e) => {
                    tracing::error!("❌ Could not set up SN {}: {}. Skipping to next SN...", tnsname, e);
                }
            }
        }
        if targets.is_empty() {
            return Err(AtCleanError::processing("None of the requested SNe could be downloaded"));
        }

        let (username, password) = self.config.credentials.atlas()?;
        let atlas = AtlasClient::connect(
            &self.config.download.atlas_url,
            &username,
            &password,
            self.config.download.timing.clone(),
        )
        .await?;

        Ok(DownloadPlan {
            sninfo,
            atlas,
            min_mjd,
            max_mjd,
            targets,
        })
    }

    async fn transform(&self, data: Self::Extracted) -> Result<Self::Transformed> {
        let mut targets = Vec::with_capacity(data.targets.len());
        for target in data.targets {
            let mut pending = Vec::with_capacity(target.positions.len());
            for position in &target.positions {
                if !self.options.overwrite
                    && self.files_exist(&target.tnsname, position.control_index).await
                {
                    tracing::info!(
                        "⏭️ Light curve files of {} control index {} already exist; skipping",
                        target.tnsname,
                        position.control_index
                    );
                    continue;
                }
                pending.push(position.clone());
            }
            targets.push((target, pending));
        }
        Ok(DownloadPlan {
            sninfo: data.sninfo,
            atlas: data.atlas,
            min_mjd: data.min_mjd,
            max_mjd: data.max_mjd,
            targets,
        })
    }

    /// 每個 SN 下載完成後立即寫檔並更新 SN info table
    async fn load(&self, plan: Self::Transformed) -> Result<String> {
        let mut sninfo = plan.sninfo;
        let mut downloaded = 0;
        let mut written = 0;

        for (target, pending) in &plan.targets {
            tracing::info!("📡 Downloading ATLAS light curves for SN {}", target.tnsname);
            match self
                .download_target(&plan.atlas, target, pending, plan.min_mjd, plan.max_mjd)
                .await
            {
                Ok(count) => {
                    written += count;
                    downloaded += 1;
                    sninfo.update(&target.tnsname, Some(&target.coords), target.mjd0, true);
                    sninfo.save(&self.storage).await?;
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Could not download SN {}: {}. Skipping to next SN...",
                        target.tnsname,
                        e
                    );
                }
            }
        }

        if downloaded == 0 {
            return Err(AtCleanError::processing("None of the requested SNe could be downloaded"));
        }
        tracing::info!(
            "💾 Saved {} light curve files for {}/{} SNe",
            written,
            downloaded,
            plan.targets.len()
        );
        Ok(self.config.dir.output.clone())
    }
}

impl<S: Storage> DownloadPipeline<S> {
    /// Queries every pending position of one SN, then writes its files.
    /// Nothing is written when any query fails.
    async fn download_target(
        &self,
        atlas: &AtlasClient,
        target: &DownloadTarget,
        pending: &[ControlPosition],
        min_mjd: f64,
        max_mjd: f64,
    ) -> Result<usize> {
        let mut lcs = Vec::new();
        for position in pending {
            let text = atlas.query(&position.coords, min_mjd, max_mjd).await?;
            let label = format!(
                "ATLAS result for {} control index {}",
                target.tnsname, position.control_index
            );
            for (_, mut lc) in parse_full_light_curve(&text, position.control_index, &label)? {
                lc.sort_by_mjd();
                let removed = lc.remove_invalid_rows();
                if removed > 0 {
                    tracing::debug!(
                        "Dropped {} rows with duJy=0 or uJy=NaN from {} {}-band light curve {}",
                        removed,
                        target.tnsname,
                        lc.filter,
                        position.control_index
                    );
                }
                lcs.push(lc);
            }
        }

        let written = self.write_light_curves(&target.tnsname, &lcs).await?;
        if !target.controls().is_empty() {
            let path = control_coords_filename(&self.config.dir.output, &target.tnsname);
            let table = render_positions(&target.coords, target.controls())?;
            self.storage.write_file(&path, table.as_bytes()).await?;
        }
        Ok(written)
    }

    async fn write_light_curves(&self, tnsname: &str, lcs: &[LightCurve]) -> Result<usize> {
        let mut written = 0;
        for lc in lcs {
            let path = self.filename(tnsname, lc.filter, lc.control_index);
            if !self.options.overwrite && self.storage.exists(&path).await {
                tracing::warn!("⚠️ {} already exists; pass --overwrite to replace it", path);
                continue;
            }
            tracing::debug!("Saving {} ({} measurements)", path, lc.len());
            self.storage
                .write_file(&path, render_light_curve(lc)?.as_bytes())
                .await?;
            written += 1;
        }
        Ok(written)
    }
}
