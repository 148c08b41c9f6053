use thiserror::Error;

#[derive(Error, Debug)]
pub enum AtCleanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration value: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required column '{column}' in {path}")]
    MissingColumnError { column: String, path: String },

    #[error("Parse error in {path} line {line}: {message}")]
    ParseError {
        path: String,
        line: usize,
        message: String,
    },

    #[error("ATLAS API error ({status}): {message}")]
    AtlasError { status: u16, message: String },

    #[error("TNS API error: {message}")]
    TnsError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("File already exists: {path}")]
    FileExistsError { path: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Data,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AtCleanError {
    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ValidationError { .. } => ErrorCategory::Configuration,
            Self::HttpError(_) | Self::AtlasError { .. } | Self::TnsError { .. } => {
                ErrorCategory::Network
            }
            Self::CsvError(_)
            | Self::SerializationError(_)
            | Self::MissingColumnError { .. }
            | Self::ParseError { .. }
            | Self::ProcessingError { .. } => ErrorCategory::Data,
            Self::IoError(_) | Self::FileExistsError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::FileExistsError { .. } => ErrorSeverity::Low,
            Self::HttpError(_) | Self::AtlasError { .. } | Self::TnsError { .. } => {
                ErrorSeverity::Medium
            }
            Self::IoError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::HttpError(_) => "Check your network connection and try again".to_string(),
            Self::AtlasError { status: 429, .. } => {
                "The ATLAS server is throttling requests; wait a few minutes".to_string()
            }
            Self::AtlasError { .. } => {
                "Check your ATLAS username and password in the config file".to_string()
            }
            Self::TnsError { .. } => {
                "Check tns_api_key, tns_id and tns_bot_name, or add the object to the SN info table"
                    .to_string()
            }
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ValidationError { .. } => {
                "Review the configuration file and command line arguments".to_string()
            }
            Self::MissingColumnError { .. } | Self::ParseError { .. } | Self::CsvError(_) => {
                "Make sure the light curve files were written by ATLAS or by atclean".to_string()
            }
            Self::FileExistsError { .. } => "Pass --overwrite to replace existing files".to_string(),
            Self::IoError(_) => "Check that the input and output directories are accessible".to_string(),
            Self::SerializationError(_) | Self::ProcessingError { .. } => {
                "Run again with --verbose for details".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Network => format!("Could not reach a remote service: {}", self),
            ErrorCategory::Data => format!("Could not process light curve data: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, AtCleanError>;
