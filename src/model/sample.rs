use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Requested,
    Preparing,
    Shipped,
    InTransit,
    OutForDelivery,
    Delivered,
    Delayed,
    Returned,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GeoLocation {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Latest known state of a product sample in transit.
///
/// Every field is optional: a shipment is assembled from whatever updates
/// have arrived so far.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SampleShipment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SampleStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_delivery: Option<DateTime<Utc>>,
    /// Set once a temperature alert has been received for this shipment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_breach: Option<bool>,
}

/// Cold-chain breach reported by a sample's sensor.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TemperatureAlert {
    #[serde(alias = "sample_id")]
    pub id: String,
    pub temperature: f64,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}
