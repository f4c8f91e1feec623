//! FedEx tracking adapter. The identifier format this adapter accepts is
//! the same predicate the classifier uses: [`shipdesk_core::looks_like_fedex`].

use serde::Deserialize;
use shipdesk_core::{Carrier, CarrierClient, LiveTrackingResult, TrackError, TrackingEvent};

use crate::{with_bearer_retry, CarrierConfig, TokenClient};

const TOKEN_PATH: &str = "/oauth/token";
const TRACK_PATH: &str = "/track/v1/trackingnumbers";

#[derive(Debug, Deserialize)]
struct TrackResponse {
    #[serde(default)]
    results: Vec<TrackResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackResult {
    #[serde(default)]
    status_description: String,
    actual_delivery: Option<String>,
    estimated_delivery: Option<String>,
    #[serde(default)]
    scan_events: Vec<ScanEvent>,
    #[serde(default)]
    is_exception: bool,
    exception_reason: Option<String>,
    weight: Option<String>,
    service_type: Option<String>,
    shipper_reference: Option<String>,
    purchase_order_number: Option<String>,
    invoice_number: Option<String>,
    shipper_name: Option<String>,
    recipient_name: Option<String>,
    customer_reference: Option<String>,
    origin: Option<String>,
    destination: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanEvent {
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    event_description: String,
    #[serde(default)]
    derived_status: String,
    #[serde(default)]
    scan_location: String,
}

fn normalize(result: TrackResult) -> LiveTrackingResult {
    let mut events = result
        .scan_events
        .into_iter()
        .map(|event| TrackingEvent {
            timestamp: event.timestamp,
            status: event.derived_status,
            description: event.event_description,
            location: event.scan_location,
        })
        .collect::<Vec<_>>();
    // ISO-8601 timestamps; newest first.
    events.sort_by(|lhs, rhs| rhs.timestamp.cmp(&lhs.timestamp));

    LiveTrackingResult {
        status_description: result.status_description,
        actual_delivery: result.actual_delivery,
        estimated_delivery: result.estimated_delivery,
        events,
        is_exception: result.is_exception,
        exception_reason: result.exception_reason,
        weight: result.weight,
        service: result.service_type,
        shipper_reference: result.shipper_reference,
        po_number: result.purchase_order_number,
        invoice_number: result.invoice_number,
        shipper_name: result.shipper_name,
        recipient_name: result.recipient_name,
        signed_by: None,
        customer_reference: result.customer_reference,
        origin: result.origin,
        destination: result.destination,
    }
}

pub struct FedexClient {
    token: TokenClient,
    track_url: String,
    configured: bool,
}

impl FedexClient {
    #[must_use]
    pub fn new(config: &CarrierConfig) -> Self {
        Self {
            token: TokenClient::new(config, TOKEN_PATH),
            track_url: format!("{}{TRACK_PATH}", config.base_url.trim_end_matches('/')),
            configured: config.is_configured(),
        }
    }
}

impl CarrierClient for FedexClient {
    fn carrier(&self) -> Carrier {
        Carrier::Fedex
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn track(&self, identifier: &str) -> Result<Option<LiveTrackingResult>, TrackError> {
        if !self.configured {
            return Err(TrackError::Configuration("fedex credentials missing".to_string()));
        }

        let response = with_bearer_retry(&self.token, "fedex", |bearer| {
            let call = self
                .token
                .agent()
                .post(&self.track_url)
                .set("authorization", &format!("Bearer {bearer}"))
                .send_json(serde_json::json!({ "trackingNumbers": [identifier] }));
            match call {
                Ok(response) => Ok(Some(response)),
                Err(ureq::Error::Status(404, _)) => Ok(None),
                Err(err) => Err(err),
            }
        })?;

        let Some(response) = response else {
            return Ok(None);
        };
        let parsed: TrackResponse = response.into_json().map_err(|err| {
            TrackError::Adapter(format!("fedex: tracking response malformed: {err}"))
        })?;
        Ok(parsed.results.into_iter().next().map(normalize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_orders_scan_events_newest_first() {
        let json = serde_json::json!({
            "statusDescription": "Delivered",
            "actualDelivery": "2024-01-15T14:02:00",
            "serviceType": "FedEx Ground",
            "purchaseOrderNumber": "PO-200",
            "origin": "Fort Worth, TX",
            "destination": "Dallas, TX",
            "scanEvents": [
                {"timestamp": "2024-01-14T08:15:00", "eventDescription": "Departed", "derivedStatus": "In transit", "scanLocation": "Fort Worth, TX"},
                {"timestamp": "2024-01-15T14:02:00", "eventDescription": "Delivered", "derivedStatus": "Delivered", "scanLocation": "Dallas, TX"}
            ]
        });
        let result: TrackResult = match serde_json::from_value(json) {
            Ok(result) => result,
            Err(err) => panic!("fixture should deserialize: {err}"),
        };

        let normalized = normalize(result);
        assert_eq!(normalized.events[0].status, "Delivered");
        assert_eq!(normalized.events[1].status, "In transit");
        assert_eq!(normalized.po_number.as_deref(), Some("PO-200"));
        assert_eq!(normalized.origin.as_deref(), Some("Fort Worth, TX"));
    }

    #[test]
    fn unconfigured_client_reports_configuration_error() {
        let client = FedexClient::new(&CarrierConfig::default());
        assert!(!client.is_configured());
        let err = match client.track("123456789012") {
            Ok(_) => panic!("unconfigured client must not track"),
            Err(err) => err,
        };
        assert!(matches!(err, TrackError::Configuration(_)));
    }
}
