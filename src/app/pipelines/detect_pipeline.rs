use crate::adapters::lc_file::{
    detection_filename, format_float, lc_filename, parse_averaged_light_curve,
    parse_eruption_model, write_table,
};
use crate::config::toml_config::TomlConfig;
use crate::core::rolling::{
    add_simulation, apply_rolling_sum, in_valid_season, EruptionSimulation, GaussianSimulation,
    Kernel, RollingSum, Season, SimulatedRollingSum, Simulation,
};
use crate::core::{Pipeline, Storage};
use crate::domain::model::{AveragedSupernova, Filter};
use crate::utils::error::{AtCleanError, Result};
use crate::utils::validation::{validate_positive_float, Validate};

#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub tnsname: String,
    pub filter: Filter,
    pub num_controls: usize,
    pub mjd_bin_size: f64,
    /// Gaussian kernel sigma in days.
    pub sigma_kern: f64,
    pub fom_limit: Option<f64>,
    pub simulation: Option<SimulationRequest>,
    /// Control indices left out of the rolling sums.
    pub skip_controls: Vec<usize>,
    /// Observation seasons the simulated peak must fall in.
    pub seasons: Vec<Season>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimulationShape {
    Gaussian { sigma_days: f64 },
    /// Eruption model file with `MJD m` columns.
    Eruption { path: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRequest {
    pub peak_appmag: f64,
    pub peak_mjd: f64,
    pub shape: SimulationShape,
}

impl Validate for DetectOptions {
    fn validate(&self) -> Result<()> {
        validate_positive_float("mjd_bin_size", self.mjd_bin_size)?;
        validate_positive_float("sigma_kern", self.sigma_kern)?;
        if self.skip_controls.contains(&0) {
            return Err(AtCleanError::InvalidConfigValueError {
                field: "skip_controls".to_string(),
                value: "0".to_string(),
                reason: "index 0 is the SN light curve".to_string(),
            });
        }
        for season in &self.seasons {
            if !season.0.is_finite() || !season.1.is_finite() || season.0 > season.1 {
                return Err(AtCleanError::InvalidConfigValueError {
                    field: "seasons".to_string(),
                    value: format!("[{}, {}]", season.0, season.1),
                    reason: "a season needs a finite start no later than its end".to_string(),
                });
            }
        }
        if let Some(sim) = &self.simulation {
            if let SimulationShape::Gaussian { sigma_days } = sim.shape {
                validate_positive_float("sim_sigma", sigma_days)?;
            }
            if !sim.peak_appmag.is_finite() || !sim.peak_mjd.is_finite() {
                return Err(AtCleanError::ValidationError {
                    message: "Simulation peak magnitude and MJD must be finite".to_string(),
                });
            }
            if !in_valid_season(&self.seasons, sim.peak_mjd) {
                return Err(AtCleanError::ValidationError {
                    message: format!(
                        "Simulation peak MJD {} is outside the observation seasons",
                        sim.peak_mjd
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Averaged light curves plus the simulation to inject, if any.
#[derive(Debug, Clone)]
pub struct DetectInput {
    pub avg_sn: AveragedSupernova,
    pub simulation: Option<Simulation>,
}

/// Rolling sum of one averaged light curve.
#[derive(Debug, Clone)]
pub struct Detection {
    pub control_index: usize,
    pub rolling: RollingSum,
    pub simulated: Option<SimulatedRollingSum>,
}

#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub kernel: Kernel,
    pub detections: Vec<Detection>,
}

impl DetectionReport {
    pub fn sn(&self) -> Option<&Detection> {
        self.detections.iter().find(|d| d.control_index == 0)
    }

    /// Largest FOM over the control light curves, a reference for `fom_limit`.
    pub fn max_control_fom(&self) -> Option<f64> {
        self.detections
            .iter()
            .filter(|d| d.control_index > 0)
            .filter_map(|d| d.rolling.max_fom().map(|(_, fom)| fom))
            .reduce(f64::max)
    }
}

pub struct DetectPipeline<S: Storage> {
    pub(crate) storage: S,
    pub(crate) config: TomlConfig,
    pub(crate) options: DetectOptions,
}

impl<S: Storage> DetectPipeline<S> {
    pub fn new(storage: S, config: TomlConfig, options: DetectOptions) -> Self {
        Self {
            storage,
            config,
            options,
        }
    }

    fn output_path(&self, kind: &str) -> String {
        detection_filename(
            &self.config.dir.output,
            &self.options.tnsname,
            self.options.filter,
            self.options.mjd_bin_size,
            kind,
        )
    }

    async fn load_simulation(&self, request: &SimulationRequest) -> Result<Simulation> {
        match &request.shape {
            SimulationShape::Gaussian { sigma_days } => Ok(Simulation::Gaussian(GaussianSimulation {
                peak_appmag: request.peak_appmag,
                peak_mjd: request.peak_mjd,
                sigma_days: *sigma_days,
            })),
            SimulationShape::Eruption { path } => {
                let bytes = self.storage.read_file(path).await?;
                let model = parse_eruption_model(&String::from_utf8_lossy(&bytes), path)?;
                tracing::info!("📂 Loaded eruption model {} with {} points", path, model.days.len());
                Ok(Simulation::Eruption(EruptionSimulation {
                    model,
                    peak_appmag: request.peak_appmag,
                    peak_mjd: request.peak_mjd,
                }))
            }
        }
    }

    fn render_rolling_sum(detection: &Detection) -> Result<String> {
        let mut header: Vec<String> = ["MJDbin", "SNR", "SNRsum", "SNRsumnorm"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        if detection.simulated.is_some() {
            header.extend(["SNRsim".to_string(), "SNRsimsum".to_string()]);
        }
        let rolling = &detection.rolling;
        let rows: Vec<Vec<String>> = (0..rolling.mjd_bin.len())
            .map(|i| {
                let mut row = vec![
                    format_float(rolling.mjd_bin[i]),
                    format_float(rolling.snr[i]),
                    format_float(rolling.snr_sum[i]),
                    format_float(rolling.snr_sum_norm[i]),
                ];
                if let Some(sim) = &detection.simulated {
                    row.push(format_float(sim.snr_sim[i]));
                    row.push(format_float(sim.snr_sim_sum[i]));
                }
                row
            })
            .collect();
        write_table(&header, &rows)
    }

    fn render_summary(&self, report: &DetectionReport) -> Result<String> {
        let mut header: Vec<String> = ["control_index", "max_fom", "max_fom_mjd"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        if self.options.simulation.is_some() {
            header.extend(["sim_max_fom", "sim_max_fom_mjd", "detected"].iter().map(|c| c.to_string()));
        }
        let rows: Vec<Vec<String>> = report
            .detections
            .iter()
            .map(|d| {
                let (mjd, fom) = d.rolling.max_fom().unwrap_or((f64::NAN, f64::NAN));
                let mut row = vec![d.control_index.to_string(), format_float(fom), format_float(mjd)];
                if let Some(sim) = &d.simulated {
                    row.push(format_float(sim.max_fom.unwrap_or(f64::NAN)));
                    row.push(format_float(sim.max_fom_mjd.unwrap_or(f64::NAN)));
                    row.push(match self.options.fom_limit {
                        Some(limit) => sim.is_detected(limit).to_string(),
                        None => "NaN".to_string(),
                    });
                }
                row
            })
            .collect();
        write_table(&header, &rows)
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for DetectPipeline<S> {
    type Extracted = DetectInput;
    type Transformed = DetectionReport;

    fn name(&self) -> String {
        "detect".to_string()
    }

    async fn extract(&self) -> Result<DetectInput> {
        let opts = &self.options;
        let mut avg_sn = AveragedSupernova::new(&opts.tnsname, opts.filter, opts.mjd_bin_size);

        for control_index in 0..=opts.num_controls {
            if opts.skip_controls.contains(&control_index) {
                tracing::info!("⏭️ Skipping control light curve {}", control_index);
                continue;
            }
            let path = lc_filename(
                &self.config.dir.output,
                &opts.tnsname,
                opts.filter,
                control_index,
                Some(opts.mjd_bin_size),
                false,
            );
            if !self.storage.exists(&path).await {
                return Err(AtCleanError::ValidationError {
                    message: format!("Averaged light curve {} not found; run clean first", path),
                });
            }
            let bytes = self.storage.read_file(&path).await?;
            let avg = parse_averaged_light_curve(
                &String::from_utf8_lossy(&bytes),
                control_index,
                opts.filter,
                opts.mjd_bin_size,
                &path,
            )?;
            avg_sn.avg_lcs.insert(control_index, avg);
        }
        tracing::info!(
            "📂 Loaded averaged {}-band light curves of {} with {} controls",
            opts.filter,
            opts.tnsname,
            avg_sn.num_controls()
        );

        let simulation = match &opts.simulation {
            Some(request) => Some(self.load_simulation(request).await?),
            None => None,
        };
        Ok(DetectInput { avg_sn, simulation })
    }

    async fn transform(&self, input: DetectInput) -> Result<DetectionReport> {
        let data = input.avg_sn;
        let kernel = Kernel::new(self.options.sigma_kern, data.mjd_bin_size)?;
        let flag = self.config.cuts.badday_cut.flag;
        tracing::info!(
            "Rolling sum with a kernel sigma of {} bins over {} bins",
            kernel.sigma_bins,
            2 * kernel.half_window + 1
        );

        let mut detections = Vec::with_capacity(data.avg_lcs.len());
        for (control_index, avg) in &data.avg_lcs {
            let rolling = apply_rolling_sum(avg, &kernel, flag)?;
            let simulated = match &input.simulation {
                Some(simulation) => Some(add_simulation(avg, &kernel, simulation, flag)?),
                None => None,
            };
            if let Some((mjd, fom)) = rolling.max_fom() {
                tracing::debug!(
                    "Light curve {}: max FOM {:.2} at MJD bin {}",
                    control_index,
                    fom,
                    mjd
                );
            }
            detections.push(Detection {
                control_index: *control_index,
                rolling,
                simulated,
            });
        }
        Ok(DetectionReport { kernel, detections })
    }

    async fn load(&self, report: DetectionReport) -> Result<String> {
        let sn = report
            .sn()
            .ok_or_else(|| AtCleanError::processing("SN rolling sum is missing"))?;
        if let Some((mjd, fom)) = sn.rolling.max_fom() {
            tracing::info!("📈 SN {} max FOM {:.2} at MJD bin {}", self.options.tnsname, fom, mjd);
        }
        if let Some(fom) = report.max_control_fom() {
            tracing::info!("Max FOM of the control light curves: {:.2}", fom);
        }
        if let (Some(sim), Some(limit)) = (&sn.simulated, self.options.fom_limit) {
            tracing::info!(
                "Simulated bump peaking at MJD {} with m={}: max FOM {:.2}, detected above {}: {}",
                sim.simulation.peak_mjd(),
                sim.simulation.peak_appmag(),
                sim.max_fom.unwrap_or(f64::NAN),
                limit,
                sim.is_detected(limit)
            );
        }

        let snrsum_path = self.output_path("snrsum");
        self.storage
            .write_file(&snrsum_path, Self::render_rolling_sum(sn)?.as_bytes())
            .await?;
        self.storage
            .write_file(&self.output_path("fom"), self.render_summary(&report)?.as_bytes())
            .await?;
        Ok(snrsum_path)
    }
}
