//! HTTP adapter for the routing backend.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::BackendError;
use crate::model::{CourierCount, DemandId, DemandRequestSet, NodeId, Warehouse};
use crate::traits::{AssignmentRequest, DemandDraft, RemovalOutcome, SolverBackend, TourCalculation};

pub const URL_ENV: &str = "COURIER_SOLVER_URL";
pub const TIMEOUT_ENV: &str = "COURIER_SOLVER_TIMEOUT_SECS";

#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout_secs: 10,
        }
    }
}

impl SolverConfig {
    /// Defaults overlaid with `COURIER_SOLVER_URL` and
    /// `COURIER_SOLVER_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup(URL_ENV).filter(|url| !url.trim().is_empty()) {
            config.base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.timeout_secs = secs,
                _ => warn!(variable = TIMEOUT_ENV, value = %raw, "ignoring malformed timeout"),
            }
        }
        config
    }
}

#[derive(Debug, Clone)]
pub struct HttpSolverClient {
    config: SolverConfig,
    client: reqwest::blocking::Client,
}

impl HttpSolverClient {
    pub fn new(config: SolverConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn exchange(
        &self,
        operation: &'static str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<ApiEnvelope, BackendError> {
        let response = request.send()?;
        let status = response.status();
        let text = response.text()?;
        let envelope = serde_json::from_str::<ApiEnvelope>(&text).ok();
        debug!(operation, status = status.as_u16(), "backend responded");

        if !status.is_success() {
            let message = envelope
                .and_then(ApiEnvelope::error_text)
                .unwrap_or_else(|| status.to_string());
            return Err(BackendError::rejected(operation, message));
        }

        match envelope {
            Some(envelope) if envelope.success == Some(false) => {
                let message = envelope.error_text().unwrap_or_else(|| "request failed".to_string());
                Err(BackendError::rejected(operation, message))
            }
            Some(envelope) => Ok(envelope),
            None => Err(BackendError::MissingData { operation, field: "body" }),
        }
    }

    fn calculation(
        &self,
        operation: &'static str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<TourCalculation, BackendError> {
        let envelope = self.exchange(operation, request)?;
        envelope.data_as(operation)
    }
}

impl SolverBackend for HttpSolverClient {
    fn add_demand(&self, draft: &DemandDraft) -> Result<DemandId, BackendError> {
        let body = AddDemandBody {
            pickup_address: &draft.pickup_node_id,
            delivery_address: &draft.delivery_node_id,
            pickup_duration: draft.pickup_duration_sec,
            delivery_duration: draft.delivery_duration_sec,
        };
        let request = self.client.post(self.url("/deliveries")).json(&body);
        let envelope = self.exchange("addDemand", request)?;
        envelope.created_id().ok_or(BackendError::MissingData {
            operation: "addDemand",
            field: "id",
        })
    }

    fn remove_demand(&self, id: &DemandId) -> Result<RemovalOutcome, BackendError> {
        let url = self.url(&format!("/deliveries/{id}"));
        let envelope = self.exchange("removeDemand", self.client.delete(url))?;
        let data = envelope
            .data
            .filter(|data| !data.is_null())
            .and_then(|data| serde_json::from_value::<DemandRequestSet>(data).ok());
        Ok(RemovalOutcome { success: true, data })
    }

    fn set_warehouse(&self, warehouse: &Warehouse) -> Result<(), BackendError> {
        let body = WarehouseBody {
            node_id: &warehouse.node_id,
            departure_time: &warehouse.departure_time,
        };
        let request = self.client.post(self.url("/deliveries/warehouse")).json(&body);
        self.exchange("setWarehouse", request)?;
        Ok(())
    }

    fn calculate_tour(&self, couriers: CourierCount) -> Result<TourCalculation, BackendError> {
        let request = self
            .client
            .post(self.url("/tours/calculate"))
            .query(&[("courierCount", couriers.get())]);
        self.calculation("calculateTour", request)
    }

    fn recalculate_assignments(
        &self,
        assignments: &[AssignmentRequest],
    ) -> Result<TourCalculation, BackendError> {
        let request = self
            .client
            .post(self.url("/tours/recalculate"))
            .json(&RecalculateBody { assignments });
        self.calculation("recalculateAssignments", request)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddDemandBody<'a> {
    pickup_address: &'a NodeId,
    delivery_address: &'a NodeId,
    pickup_duration: u32,
    delivery_duration: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WarehouseBody<'a> {
    node_id: &'a NodeId,
    departure_time: &'a str,
}

#[derive(Debug, Serialize)]
struct RecalculateBody<'a> {
    assignments: &'a [AssignmentRequest],
}

/// `{success, message, data}` as sent by every backend endpoint.
#[derive(Debug, Default, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

impl ApiEnvelope {
    fn error_text(self) -> Option<String> {
        self.message.or(self.error).filter(|text| !text.trim().is_empty())
    }

    /// `data.id`, else a top-level `id`.
    fn created_id(&self) -> Option<DemandId> {
        self.data
            .as_ref()
            .and_then(|data| data.get("id"))
            .or(self.id.as_ref())
            .filter(|id| !id.is_null())
            .and_then(|id| serde_json::from_value::<DemandId>(id.clone()).ok())
            .filter(|id| !id.is_blank())
    }

    fn data_as<T: DeserializeOwned>(self, operation: &'static str) -> Result<T, BackendError> {
        let data = self
            .data
            .filter(|data| !data.is_null())
            .ok_or(BackendError::MissingData { operation, field: "data" })?;
        serde_json::from_value(data)
            .map_err(|err| BackendError::rejected(operation, format!("unreadable data: {err}")))
    }
}
