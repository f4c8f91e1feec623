//! UPS tracking adapter.

use serde::Deserialize;
use shipdesk_core::{Carrier, CarrierClient, LiveTrackingResult, TrackError, TrackingEvent};

use crate::{with_bearer_retry, CarrierConfig, TokenClient};

const TOKEN_PATH: &str = "/security/v1/oauth/token";
const TRACK_PATH: &str = "/api/track/v1/details";

#[derive(Debug, Deserialize)]
struct TrackResponse {
    #[serde(default)]
    shipments: Vec<Shipment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Shipment {
    #[serde(default)]
    status_description: String,
    actual_delivery: Option<String>,
    estimated_delivery: Option<String>,
    #[serde(default)]
    activity: Vec<Activity>,
    #[serde(default)]
    exception: bool,
    exception_reason: Option<String>,
    weight: Option<String>,
    service: Option<String>,
    shipper_reference: Option<String>,
    po_number: Option<String>,
    invoice_number: Option<String>,
    shipper_name: Option<String>,
    recipient_name: Option<String>,
    signed_by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Activity {
    #[serde(default)]
    date: String,
    #[serde(default)]
    time: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    location: String,
}

fn normalize(shipment: Shipment) -> LiveTrackingResult {
    let mut events = shipment
        .activity
        .into_iter()
        .map(|activity| TrackingEvent {
            timestamp: format!("{} {}", activity.date, activity.time).trim().to_string(),
            status: activity.status,
            description: activity.description,
            location: activity.location,
        })
        .collect::<Vec<_>>();
    // Activity timestamps are YYYYMMDD HHMMSS, so lexical order is
    // chronological; newest first.
    events.sort_by(|lhs, rhs| rhs.timestamp.cmp(&lhs.timestamp));

    LiveTrackingResult {
        status_description: shipment.status_description,
        actual_delivery: shipment.actual_delivery,
        estimated_delivery: shipment.estimated_delivery,
        events,
        is_exception: shipment.exception,
        exception_reason: shipment.exception_reason,
        weight: shipment.weight,
        service: shipment.service,
        shipper_reference: shipment.shipper_reference,
        po_number: shipment.po_number,
        invoice_number: shipment.invoice_number,
        shipper_name: shipment.shipper_name,
        recipient_name: shipment.recipient_name,
        signed_by: shipment.signed_by,
        customer_reference: None,
        origin: None,
        destination: None,
    }
}

pub struct UpsClient {
    token: TokenClient,
    track_url: String,
    configured: bool,
}

impl UpsClient {
    #[must_use]
    pub fn new(config: &CarrierConfig) -> Self {
        Self {
            token: TokenClient::new(config, TOKEN_PATH),
            track_url: format!("{}{TRACK_PATH}", config.base_url.trim_end_matches('/')),
            configured: config.is_configured(),
        }
    }
}

impl CarrierClient for UpsClient {
    fn carrier(&self) -> Carrier {
        Carrier::Ups
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn track(&self, identifier: &str) -> Result<Option<LiveTrackingResult>, TrackError> {
        if !self.configured {
            return Err(TrackError::Configuration("ups credentials missing".to_string()));
        }

        let response = with_bearer_retry(&self.token, "ups", |bearer| {
            let call = self
                .token
                .agent()
                .post(&self.track_url)
                .set("authorization", &format!("Bearer {bearer}"))
                .send_json(serde_json::json!({ "trackingNumbers": [identifier] }));
            match call {
                Ok(response) => Ok(Some(response)),
                // A shipment the carrier does not know is a defined empty
                // result, not an adapter failure.
                Err(ureq::Error::Status(404, _)) => Ok(None),
                Err(err) => Err(err),
            }
        })?;

        let Some(response) = response else {
            return Ok(None);
        };
        let parsed: TrackResponse = response
            .into_json()
            .map_err(|err| TrackError::Adapter(format!("ups: tracking response malformed: {err}")))?;
        Ok(parsed.shipments.into_iter().next().map(normalize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_shipment() -> Shipment {
        let json = serde_json::json!({
            "statusDescription": "Out For Delivery",
            "estimatedDelivery": "2024-01-16",
            "weight": "12.0 LBS",
            "service": "UPS Ground",
            "shipperReference": "REF-1",
            "poNumber": "PO-100",
            "signedBy": null,
            "activity": [
                {"date": "20240114", "time": "081500", "status": "IT", "description": "Departed facility", "location": "Mesquite, TX"},
                {"date": "20240115", "time": "063000", "status": "OFD", "description": "Out for delivery", "location": "Dallas, TX"},
                {"date": "20240113", "time": "221000", "status": "OR", "description": "Origin scan", "location": "Irving, TX"}
            ]
        });
        match serde_json::from_value(json) {
            Ok(shipment) => shipment,
            Err(err) => panic!("fixture should deserialize: {err}"),
        }
    }

    #[test]
    fn normalize_orders_events_newest_first() {
        let result = normalize(fixture_shipment());
        assert_eq!(result.status_description, "Out For Delivery");
        assert_eq!(result.events.len(), 3);
        assert_eq!(result.events[0].timestamp, "20240115 063000");
        assert_eq!(result.events[2].timestamp, "20240113 221000");
        assert_eq!(result.po_number.as_deref(), Some("PO-100"));
    }

    #[test]
    fn normalize_tolerates_missing_optional_fields() {
        let shipment: Shipment = match serde_json::from_value(serde_json::json!({})) {
            Ok(shipment) => shipment,
            Err(err) => panic!("empty shipment should deserialize: {err}"),
        };
        let result = normalize(shipment);
        assert!(result.events.is_empty());
        assert!(!result.is_exception);
    }

    #[test]
    fn unconfigured_client_reports_configuration_error() {
        let client = UpsClient::new(&CarrierConfig::default());
        assert!(!client.is_configured());
        let err = match client.track("1Z999AA10123456784") {
            Ok(_) => panic!("unconfigured client must not track"),
            Err(err) => err,
        };
        assert!(matches!(err, TrackError::Configuration(_)));
    }
}
