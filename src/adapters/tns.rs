//! Transient Name Server lookups for coordinates and discovery dates.

use crate::domain::coords::Coordinates;
use crate::domain::mjd::{parse_tns_date, DISC_DATE_BUFFER};
use crate::utils::error::{AtCleanError, Result};
use reqwest::Client;
use serde_json::{json, Value};

pub const DEFAULT_TNS_URL: &str = "https://www.wis-tns.org";

#[derive(Debug, Clone, PartialEq)]
pub struct TnsCredentials {
    pub api_key: String,
    pub tns_id: String,
    pub bot_name: String,
}

impl TnsCredentials {
    /// Bot marker TNS expects as User-Agent.
    pub fn user_agent(&self) -> String {
        format!(
            "tns_marker{{\"tns_id\":\"{}\",\"type\": \"bot\", \"name\":\"{}\"}}",
            self.tns_id, self.bot_name
        )
    }
}

/// Coordinates and discovery MJD of one object.
#[derive(Debug, Clone, PartialEq)]
pub struct TnsObject {
    pub coords: Coordinates,
    pub discovery_mjd: f64,
}

impl TnsObject {
    /// Start of the transient: discovery date minus the buffer.
    pub fn mjd0(&self) -> f64 {
        self.discovery_mjd - DISC_DATE_BUFFER
    }

    pub fn from_json(tnsname: &str, body: &Value) -> Result<Self> {
        let reply = body
            .get("data")
            .and_then(|d| d.get("reply"))
            .ok_or_else(|| AtCleanError::TnsError {
                message: format!("No reply for {} in TNS response", tnsname),
            })?;
        let field = |key: &str| -> Result<String> {
            match reply.get(key) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                _ => Err(AtCleanError::TnsError {
                    message: format!("TNS reply for {} has no '{}'", tnsname, key),
                }),
            }
        };

        let coords = Coordinates::parse(&field("ra")?, &field("dec")?)?;
        let discovery_mjd = parse_tns_date(&field("discoverydate")?)?;
        Ok(Self {
            coords,
            discovery_mjd,
        })
    }
}

pub struct TnsClient {
    client: Client,
    base_url: String,
    credentials: TnsCredentials,
}

impl TnsClient {
    pub fn new(base_url: &str, credentials: TnsCredentials) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub async fn get_object(&self, tnsname: &str) -> Result<TnsObject> {
        tracing::info!("Querying TNS for {} coordinates and discovery date...", tnsname);
        let data = json!({
            "objname": tnsname,
            "objid": "",
            "photometry": "1",
            "spectra": "1",
        });
        let response = self
            .client
            .post(format!("{}/api/get/object", self.base_url))
            .header("User-Agent", self.credentials.user_agent())
            .form(&[
                ("api_key", self.credentials.api_key.clone()),
                ("data", data.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AtCleanError::TnsError {
                message: format!("TNS returned {} for {}", status, tnsname),
            });
        }
        let body: Value = response.json().await?;
        TnsObject::from_json(tnsname, &body)
    }
}
