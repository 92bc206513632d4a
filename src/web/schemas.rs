use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::ServiceStatus;

#[derive(Debug, Deserialize)]
pub struct NewReservation {
    #[serde(rename = "hw-address", default)]
    pub hw_address: Option<String>,
    #[serde(rename = "ip-address", default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddressUpdate {
    #[serde(rename = "ip-address", default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct Failure {
    pub success: bool,
    pub error: String,
}

impl Failure {
    pub fn new<S: Into<String>>(error: S) -> Failure {
        Failure {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub service: ServiceStatus,
    pub config_valid: bool,
}
