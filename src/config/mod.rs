pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use args::*;

#[cfg(feature = "cli")]
mod args {
    use super::toml_config::TomlConfig;
    use crate::app::pipelines::{
        CleanOptions, DetectOptions, DownloadOptions, SimulationRequest, SimulationShape,
    };
    use crate::domain::coords::Coordinates;
    use crate::domain::model::Filter;
    use crate::utils::error::Result;
    use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
    use std::path::Path;

    /// Config file read when `--config` is not given, if present.
    pub const DEFAULT_CONFIG_FILE: &str = "atclean.toml";

    #[derive(Debug, Clone, Parser)]
    #[command(name = "atclean")]
    #[command(about = "Download, clean and average ATLAS forced photometry light curves")]
    pub struct CliConfig {
        #[arg(long, global = true, help = "TOML config file (default: ./atclean.toml if present)")]
        pub config: Option<String>,

        #[arg(short, long, global = true, help = "Enable verbose output")]
        pub verbose: bool,

        #[arg(long, global = true, help = "Log CPU and memory usage per pipeline phase")]
        pub monitor: bool,

        #[arg(long, global = true, help = "Write logs as JSON lines")]
        pub json_logs: bool,

        #[command(subcommand)]
        pub command: Command,
    }

    #[derive(Debug, Clone, Subcommand)]
    pub enum Command {
        /// Download SN and control light curves from the ATLAS forced photometry server
        Download(DownloadArgs),
        /// Apply the data-quality cuts and average the light curves
        Clean(CleanArgs),
        /// Gaussian-weighted rolling sum over averaged light curves
        Detect(DetectArgs),
    }

    #[derive(Debug, Clone, Args)]
    pub struct DownloadArgs {
        #[arg(required = true, help = "TNS names of the transients")]
        pub tnsnames: Vec<String>,

        #[arg(short = 'l', long = "lookbacktime", help = "Days before now to start the light curve at")]
        pub lookbacktime: Option<f64>,

        #[arg(long, help = "Latest MJD to download")]
        pub max_mjd: Option<f64>,

        #[arg(short, long, help = "Overwrite existing files")]
        pub overwrite: bool,

        #[arg(long, value_parser = Coordinates::parse_pair, help = "Comma-separated RA and Dec of a single SN")]
        pub coords: Option<Coordinates>,

        #[arg(long, help = "Start of the transient in MJD for a single SN")]
        pub mjd0: Option<f64>,

        #[arg(short = 'c', long = "controls", help = "Also download control light curves")]
        pub controls: bool,

        #[arg(short = 'n', long, help = "Number of control light curves in the circle pattern")]
        pub num_controls: Option<usize>,

        #[arg(short = 'r', long, help = "Radius of the control circle in arcseconds")]
        pub radius: Option<f64>,

        #[arg(long, help = "Table of control coordinates (ra dec) replacing the circle pattern")]
        pub ctrl_coords: Option<String>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
    pub enum SkipCut {
        Uncert,
        UncertEst,
        X2,
        Controls,
        Badday,
    }

    #[derive(Debug, Clone, Args)]
    pub struct CleanArgs {
        #[arg(required = true, help = "TNS names of the transients")]
        pub tnsnames: Vec<String>,

        #[arg(long, value_delimiter = ',', help = "Filters to clean, e.g. c,o")]
        pub filters: Vec<Filter>,

        #[arg(short = 'n', long, help = "Number of control light curves to load")]
        pub num_controls: Option<usize>,

        #[arg(long, help = "Start of the transient in MJD for a single SN")]
        pub mjd0: Option<f64>,

        #[arg(long = "skip", value_enum, help = "Disable a cut; may be repeated")]
        pub skip: Vec<SkipCut>,

        #[arg(short = 'm', long, help = "MJD bin size in days for averaging")]
        pub mjd_bin_size: Option<f64>,

        #[arg(short, long, help = "Overwrite existing files")]
        pub overwrite: bool,
    }

    #[derive(Debug, Clone, Args)]
    #[command(group(ArgGroup::new("sim_shape").args(["sim_sigma", "sim_eruption"])))]
    pub struct DetectArgs {
        #[arg(help = "TNS name of the transient")]
        pub tnsname: String,

        #[arg(long, help = "Gaussian kernel sigma in days")]
        pub sigma_kern: Option<f64>,

        #[arg(long, default_value = "o")]
        pub filter: Filter,

        #[arg(short = 'n', long, help = "Number of averaged control light curves to load")]
        pub num_controls: Option<usize>,

        #[arg(short = 'm', long, help = "MJD bin size in days of the averaged light curves")]
        pub mjd_bin_size: Option<f64>,

        #[arg(long, help = "Maximum FOM that counts as a detection")]
        pub fom_limit: Option<f64>,

        #[arg(long, value_delimiter = ',', help = "Control indices to leave out")]
        pub skip_ctrl: Vec<usize>,

        #[arg(long, requires_all = ["sim_shape", "sim_peak_mjd"], help = "Peak apparent magnitude of the simulated light curve")]
        pub sim_peak_mag: Option<f64>,

        #[arg(long, requires = "sim_peak_mag", help = "Sigma of a simulated Gaussian bump in days")]
        pub sim_sigma: Option<f64>,

        #[arg(long, requires = "sim_peak_mag", help = "Eruption model file with MJD and magnitude columns")]
        pub sim_eruption: Option<String>,

        #[arg(long, requires = "sim_peak_mag", help = "MJD of the simulated peak")]
        pub sim_peak_mjd: Option<f64>,
    }

    impl CliConfig {
        /// Reads the TOML config; an explicitly given file must exist.
        pub fn load_toml(&self) -> Result<TomlConfig> {
            match &self.config {
                Some(path) => {
                    tracing::info!("Loading config file at {}", path);
                    TomlConfig::from_file(path)
                }
                None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                    tracing::info!("Loading config file at {}", DEFAULT_CONFIG_FILE);
                    TomlConfig::from_file(DEFAULT_CONFIG_FILE)
                }
                None => {
                    tracing::info!("No config file given; using defaults");
                    Ok(TomlConfig::default())
                }
            }
        }

        pub fn monitor_enabled(&self, config: &TomlConfig) -> bool {
            self.monitor || config.monitoring.enabled
        }
    }

    impl DownloadArgs {
        /// 命令列參數覆蓋配置檔
        pub fn apply(&self, config: &mut TomlConfig) {
            if let Some(num_controls) = self.num_controls {
                config.download.num_controls = num_controls;
            }
            if let Some(radius) = self.radius {
                config.download.radius = radius;
            }
        }

        pub fn options(&self) -> DownloadOptions {
            DownloadOptions {
                tnsnames: self.tnsnames.clone(),
                lookback_days: self.lookbacktime,
                max_mjd: self.max_mjd,
                overwrite: self.overwrite,
                coords: self.coords,
                mjd0: self.mjd0,
                controls: self.controls,
                ctrl_coords: self.ctrl_coords.clone(),
            }
        }
    }

    impl CleanArgs {
        pub fn apply(&self, config: &mut TomlConfig) {
            if !self.filters.is_empty() {
                config.cleaning.filters = self.filters.clone();
            }
            if let Some(num_controls) = self.num_controls {
                config.cleaning.num_controls = num_controls;
            }
            if self.overwrite {
                config.cleaning.overwrite = true;
            }
            if let Some(bin) = self.mjd_bin_size {
                config.cuts.badday_cut.mjd_bin_size = bin;
            }
            let cuts = &mut config.cuts;
            for skip in &self.skip {
                match skip {
                    SkipCut::Uncert => cuts.uncert_cut.enabled = false,
                    SkipCut::UncertEst => cuts.uncert_est.enabled = false,
                    SkipCut::X2 => cuts.x2_cut.enabled = false,
                    SkipCut::Controls => cuts.controls_cut.enabled = false,
                    SkipCut::Badday => cuts.badday_cut.enabled = false,
                }
            }
        }

        pub fn options(&self, config: &TomlConfig) -> CleanOptions {
            CleanOptions {
                tnsnames: self.tnsnames.clone(),
                filters: config.cleaning.filters.clone(),
                num_controls: config.cleaning.num_controls,
                mjd0: self.mjd0,
                overwrite: config.cleaning.overwrite,
            }
        }
    }

    impl DetectArgs {
        pub fn apply(&self, config: &mut TomlConfig) {
            if let Some(sigma_kern) = self.sigma_kern {
                config.detect.sigma_kern = sigma_kern;
            }
            if let Some(fom_limit) = self.fom_limit {
                config.detect.fom_limit = Some(fom_limit);
            }
            if let Some(num_controls) = self.num_controls {
                config.cleaning.num_controls = num_controls;
            }
            if let Some(bin) = self.mjd_bin_size {
                config.cuts.badday_cut.mjd_bin_size = bin;
            }
            if !self.skip_ctrl.is_empty() {
                config.detect.skip_controls = self.skip_ctrl.clone();
            }
        }

        pub fn options(&self, config: &TomlConfig) -> DetectOptions {
            let shape = match (self.sim_sigma, &self.sim_eruption) {
                (Some(sigma_days), _) => Some(SimulationShape::Gaussian { sigma_days }),
                (None, Some(path)) => Some(SimulationShape::Eruption { path: path.clone() }),
                (None, None) => None,
            };
            let simulation = match (self.sim_peak_mag, self.sim_peak_mjd, shape) {
                (Some(peak_appmag), Some(peak_mjd), Some(shape)) => Some(SimulationRequest {
                    peak_appmag,
                    peak_mjd,
                    shape,
                }),
                _ => None,
            };
            DetectOptions {
                tnsname: self.tnsname.clone(),
                filter: self.filter,
                num_controls: config.cleaning.num_controls,
                mjd_bin_size: config.cuts.badday_cut.mjd_bin_size,
                sigma_kern: config.detect.sigma_kern,
                fom_limit: config.detect.fom_limit,
                simulation,
                skip_controls: config.detect.skip_controls.clone(),
                seasons: config.detect.seasons.clone(),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_download_command() {
            let cli = CliConfig::try_parse_from([
                "atclean", "-v", "download", "2020abc", "--coords", "10.5,-20.25", "-c", "-n", "4",
                "-r", "20",
            ])
            .unwrap();
            assert!(cli.verbose);
            let Command::Download(args) = &cli.command else {
                panic!("expected download");
            };

            let mut config = TomlConfig::default();
            args.apply(&mut config);
            assert_eq!(config.download.num_controls, 4);
            assert_eq!(config.download.radius, 20.0);

            let options = args.options();
            assert_eq!(options.tnsnames, vec!["2020abc"]);
            assert!(options.controls);
            assert_eq!(options.coords, Some(Coordinates::new(10.5, -20.25)));
        }

        #[test]
        fn test_parse_clean_command_overrides_cuts() {
            let cli = CliConfig::try_parse_from([
                "atclean", "clean", "2020abc", "2021xyz", "--filters", "c", "--skip", "controls",
                "--skip", "uncert-est", "-m", "2.0", "-n", "0",
            ])
            .unwrap();
            let Command::Clean(args) = &cli.command else {
                panic!("expected clean");
            };

            let mut config = TomlConfig::default();
            args.apply(&mut config);
            assert!(!config.cuts.controls_cut.enabled);
            assert!(!config.cuts.uncert_est.enabled);
            assert!(config.cuts.x2_cut.enabled);
            assert_eq!(config.cuts.badday_cut.mjd_bin_size, 2.0);

            let options = args.options(&config);
            assert_eq!(options.filters, vec![Filter::Cyan]);
            assert_eq!(options.num_controls, 0);
            assert_eq!(options.tnsnames.len(), 2);
        }

        #[test]
        fn test_simulation_arguments_come_together() {
            assert!(CliConfig::try_parse_from([
                "atclean", "detect", "2020abc", "--sim-peak-mag", "19"
            ])
            .is_err());

            let cli = CliConfig::try_parse_from([
                "atclean", "detect", "2020abc", "--sigma-kern", "3", "--sim-peak-mag", "19",
                "--sim-sigma", "4", "--sim-peak-mjd", "59010", "--fom-limit", "5",
            ])
            .unwrap();
            let Command::Detect(args) = &cli.command else {
                panic!("expected detect");
            };
            let mut config = TomlConfig::default();
            args.apply(&mut config);
            let options = args.options(&config);
            assert_eq!(options.sigma_kern, 3.0);
            assert_eq!(options.fom_limit, Some(5.0));
            let simulation = options.simulation.unwrap();
            assert_eq!(simulation.peak_mjd, 59010.0);
            assert_eq!(simulation.shape, SimulationShape::Gaussian { sigma_days: 4.0 });
        }

        #[test]
        fn test_eruption_simulation_and_skipped_controls() {
            // 高斯與爆發模型只能擇一
            assert!(CliConfig::try_parse_from([
                "atclean", "detect", "2020abc", "--sim-peak-mag", "19", "--sim-peak-mjd", "59010",
                "--sim-sigma", "4", "--sim-eruption", "eruption.txt",
            ])
            .is_err());

            let cli = CliConfig::try_parse_from([
                "atclean", "detect", "2020abc", "--sim-peak-mag", "19", "--sim-peak-mjd", "59010",
                "--sim-eruption", "eruption.txt", "--skip-ctrl", "2,5",
            ])
            .unwrap();
            let Command::Detect(args) = &cli.command else {
                panic!("expected detect");
            };
            let mut config = TomlConfig::default();
            args.apply(&mut config);
            let options = args.options(&config);
            assert_eq!(options.skip_controls, vec![2, 5]);
            assert_eq!(
                options.simulation.unwrap().shape,
                SimulationShape::Eruption { path: "eruption.txt".to_string() }
            );
        }
    }
}
