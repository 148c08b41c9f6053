use crate::adapters::atlas::{AtlasTiming, DEFAULT_ATLAS_URL};
use crate::adapters::tns::{TnsCredentials, DEFAULT_TNS_URL};
use crate::core::cuts::CutList;
use crate::core::rolling::Season;
use crate::domain::model::Filter;
use crate::utils::error::{AtCleanError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_float, validate_positive_number,
    validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contents of `atclean.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub dir: DirConfig,
    pub credentials: CredentialsConfig,
    pub download: DownloadConfig,
    pub cleaning: CleaningConfig,
    pub detect: DetectConfig,
    pub monitoring: MonitoringConfig,
    /// `[uncert_cut]`, `[uncert_est]`, `[x2_cut]`, `[controls_cut]`,
    /// `[[custom_cuts]]` and `[badday_cut]`.
    #[serde(flatten)]
    pub cuts: CutList,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirConfig {
    pub atclean_input: String,
    pub output: String,
    pub sninfo_filename: String,
}

impl Default for DirConfig {
    fn default() -> Self {
        Self {
            atclean_input: "atclean_input".to_string(),
            output: "output".to_string(),
            sninfo_filename: "sninfo.txt".to_string(),
        }
    }
}

impl DirConfig {
    pub fn sninfo_path(&self) -> String {
        crate::adapters::lc_file::join(&self.atclean_input, &self.sninfo_filename)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CredentialsConfig {
    pub atlas_username: Option<String>,
    pub atlas_password: Option<String>,
    pub tns_api_key: Option<String>,
    pub tns_id: Option<String>,
    pub tns_bot_name: Option<String>,
}

impl CredentialsConfig {
    /// TNS credentials; the three values must be given together.
    pub fn tns(&self) -> Result<Option<TnsCredentials>> {
        let given = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
        match (
            given(&self.tns_api_key),
            given(&self.tns_id),
            given(&self.tns_bot_name),
        ) {
            (true, true, true) => Ok(Some(TnsCredentials {
                api_key: self.tns_api_key.clone().unwrap_or_default(),
                tns_id: self.tns_id.clone().unwrap_or_default(),
                bot_name: self.tns_bot_name.clone().unwrap_or_default(),
            })),
            (false, false, false) => Ok(None),
            _ => Err(AtCleanError::ConfigError {
                message: "Either all or none of 'tns_api_key', 'tns_id' and 'tns_bot_name' must be provided".to_string(),
            }),
        }
    }

    pub fn atlas(&self) -> Result<(String, String)> {
        let username = self
            .atlas_username
            .clone()
            .ok_or_else(|| AtCleanError::MissingConfigError {
                field: "credentials.atlas_username".to_string(),
            })?;
        let password = self
            .atlas_password
            .clone()
            .ok_or_else(|| AtCleanError::MissingConfigError {
                field: "credentials.atlas_password".to_string(),
            })?;
        Ok((username, password))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    pub atlas_url: String,
    pub tns_url: String,
    pub num_controls: usize,
    /// Radius of the control circle in arcseconds.
    pub radius: f64,
    #[serde(flatten)]
    pub timing: AtlasTiming,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            atlas_url: DEFAULT_ATLAS_URL.to_string(),
            tns_url: DEFAULT_TNS_URL.to_string(),
            num_controls: 8,
            radius: 17.0,
            timing: AtlasTiming::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleaningConfig {
    pub filters: Vec<Filter>,
    pub num_controls: usize,
    pub overwrite: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            filters: vec![Filter::Orange, Filter::Cyan],
            num_controls: 8,
            overwrite: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectConfig {
    /// Gaussian kernel sigma in days.
    pub sigma_kern: f64,
    /// Maximum figure of merit that counts as a detection.
    pub fom_limit: Option<f64>,
    /// `[start, end]` MJD ranges a simulated peak may fall in.
    pub seasons: Vec<Season>,
    /// Control indices to leave out.
    pub skip_controls: Vec<usize>,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            sigma_kern: 5.0,
            fom_limit: None,
            seasons: Vec::new(),
            skip_controls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| AtCleanError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${ATLAS_PASSWORD})；未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| AtCleanError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_path("dir.atclean_input", &self.dir.atclean_input)?;
        validate_path("dir.output", &self.dir.output)?;
        validate_non_empty_string("dir.sninfo_filename", &self.dir.sninfo_filename)?;

        validate_url("download.atlas_url", &self.download.atlas_url)?;
        validate_url("download.tns_url", &self.download.tns_url)?;
        validate_positive_number("download.num_controls", self.download.num_controls, 1)?;
        validate_positive_float("download.radius", self.download.radius)?;

        if self.cleaning.filters.is_empty() {
            return Err(AtCleanError::InvalidConfigValueError {
                field: "cleaning.filters".to_string(),
                value: "[]".to_string(),
                reason: "At least one filter is required".to_string(),
            });
        }
        validate_positive_float("detect.sigma_kern", self.detect.sigma_kern)?;

        self.credentials.tns()?;
        self.cuts.validate()
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cuts::LimitPriority;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.dir.sninfo_path(), "atclean_input/sninfo.txt");
        assert_eq!(config.download.num_controls, 8);
        assert_eq!(config.cuts.uncert_cut.max_value, 160.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_cut_sections() {
        let toml_content = r#"
[dir]
output = "lcs"

[cleaning]
filters = ["o"]

[x2_cut]
dynamic = false
max_value = 8.5
prioritize = "contamination"

[badday_cut]
mjd_bin_size = 2.0

[[custom_cuts]]
name = "sky"
column = "Sky"
min_value = 17.0
flag = 0x4
"#;
        let config = TomlConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.dir.output, "lcs");
        assert_eq!(config.cleaning.filters, vec![Filter::Orange]);
        assert!(!config.cuts.x2_cut.dynamic);
        assert_eq!(config.cuts.x2_cut.max_value, 8.5);
        assert_eq!(config.cuts.x2_cut.prioritize, LimitPriority::Contamination);
        assert_eq!(config.cuts.badday_cut.mjd_bin_size, 2.0);
        assert_eq!(config.cuts.custom_cuts[0].flag, 0x4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_download_timing_is_flattened() {
        let config = TomlConfig::from_toml_str(
            "[download]\nretry_delay_seconds = 1\nmax_retries = 7\nradius = 20.0\n",
        )
        .unwrap();
        assert_eq!(config.download.timing.retry_delay_seconds, 1);
        assert_eq!(config.download.timing.max_retries, 7);
        assert_eq!(config.download.timing.queued_poll_seconds, 4);
        assert_eq!(config.download.radius, 20.0);
    }

    #[test]
    fn test_detect_seasons_and_skipped_controls() {
        let config = TomlConfig::from_toml_str(
            "[detect]\nfom_limit = 20.0\nseasons = [[59000.0, 59150.0], [59350.0, 59520.5]]\nskip_controls = [3, 7]\n",
        )
        .unwrap();
        assert_eq!(
            config.detect.seasons,
            vec![Season(59000.0, 59150.0), Season(59350.0, 59520.5)]
        );
        assert_eq!(config.detect.skip_controls, vec![3, 7]);
        assert_eq!(config.detect.sigma_kern, 5.0);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("ATCLEAN_TEST_PASSWORD", "hunter2");

        let config = TomlConfig::from_toml_str(
            "[credentials]\natlas_username = \"someone\"\natlas_password = \"${ATCLEAN_TEST_PASSWORD}\"\n",
        )
        .unwrap();
        assert_eq!(
            config.credentials.atlas().unwrap(),
            ("someone".to_string(), "hunter2".to_string())
        );

        std::env::remove_var("ATCLEAN_TEST_PASSWORD");
    }

    #[test]
    fn test_partial_tns_credentials_are_rejected() {
        let config =
            TomlConfig::from_toml_str("[credentials]\ntns_api_key = \"key\"\ntns_id = \"1\"\n").unwrap();
        assert!(config.credentials.tns().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_flags_are_rejected() {
        let config = TomlConfig::from_toml_str("[controls_cut]\nx2_flag = 0x1\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_url() {
        let config = TomlConfig::from_toml_str("[download]\natlas_url = \"not a url\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[dir]\natclean_input = \"input\"\nsninfo_filename = \"info.txt\"\n")
            .unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.dir.sninfo_path(), "input/info.txt");
    }
}
