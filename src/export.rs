//! Saving the current tours: the `v1` JSON file read back by
//! [`crate::restore`], a plain-text itinerary, and summary statistics.

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    CourierCount, Demand, DemandId, NodeId, Tour, Trajet, Warehouse, normalize_courier_ids,
};

pub const FORMAT_VERSION: &str = "v1";

/// Demand as written to a file: no display colour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedDemand {
    pub id: DemandId,
    pub pickup_node_id: NodeId,
    pub delivery_node_id: NodeId,
    pub pickup_duration_sec: u32,
    pub delivery_duration_sec: u32,
}

impl From<&Demand> for ExportedDemand {
    fn from(demand: &Demand) -> Self {
        Self {
            id: demand.id.clone(),
            pickup_node_id: demand.pickup_node_id.clone(),
            delivery_node_id: demand.delivery_node_id.clone(),
            pickup_duration_sec: demand.pickup_duration_sec,
            delivery_duration_sec: demand.delivery_duration_sec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    pub version: String,
    pub saved_at: String,
    pub courier_count: CourierCount,
    pub warehouse: Option<Warehouse>,
    pub demands: Vec<ExportedDemand>,
    pub tours: Vec<Tour>,
}

impl ExportFile {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Flattens the console state into a restorable file. Courier ids are
/// normalized exactly as the importer does it.
pub fn serialize(
    tours: &[Tour],
    demands: &[Demand],
    warehouse: Option<&Warehouse>,
    saved_at: DateTime<Utc>,
) -> ExportFile {
    let raw: Vec<Option<u32>> = tours.iter().map(|tour| Some(tour.courier_id.get())).collect();
    let tours: Vec<Tour> = tours
        .iter()
        .zip(normalize_courier_ids(&raw))
        .map(|(tour, courier_id)| Tour {
            courier_id,
            ..tour.clone()
        })
        .collect();

    ExportFile {
        version: FORMAT_VERSION.to_string(),
        saved_at: saved_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        courier_count: CourierCount::new(i64::try_from(tours.len()).unwrap_or(i64::MAX)),
        warehouse: warehouse.cloned(),
        demands: demands.iter().map(ExportedDemand::from).collect(),
        tours,
    }
}

/// [`serialize`] stamped with the current time.
pub fn serialize_now(
    tours: &[Tour],
    demands: &[Demand],
    warehouse: Option<&Warehouse>,
) -> ExportFile {
    serialize(tours, demands, warehouse, Utc::now())
}

/// Human-readable itinerary, one block per courier.
pub fn itinerary_text(tours: &[Tour]) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();
    let _ = writeln!(out, "=== DELIVERY ITINERARIES ===\n");
    let _ = writeln!(out, "Couriers: {}\n", tours.len());

    for tour in tours {
        let _ = writeln!(out, "\n{rule}\nCOURIER {}\n{rule}\n", tour.courier_id);
        let _ = writeln!(out, "Total distance: {:.2} km", tour.total_distance / 1000.0);
        let _ = writeln!(out, "Total duration: {:.2} h", tour.total_duration_sec / 3600.0);
        let _ = writeln!(out, "Stops: {}", tour.stops.len());
        let _ = writeln!(out, "Legs: {}\n", tour.trajets.len());
        let _ = writeln!(out, "--- LEGS ---\n");

        for (index, trajet) in tour.trajets.iter().enumerate() {
            let (from, to) = leg_ends(trajet);
            let _ = writeln!(out, "{}. {}", index + 1, leg_name(trajet));
            let _ = writeln!(out, "   From: {from}");
            let _ = writeln!(out, "   To: {to}");
            let _ = writeln!(out, "   Length: {:.3} km\n", leg_length(trajet) / 1000.0);
        }
    }
    out
}

fn leg_name(trajet: &Trajet) -> &str {
    trajet
        .segments
        .iter()
        .map(|segment| segment.name.trim())
        .find(|name| !name.is_empty())
        .unwrap_or("Segment")
}

fn leg_ends(trajet: &Trajet) -> (String, String) {
    let from = trajet
        .stop_depart
        .as_ref()
        .and_then(|stop| stop.node())
        .or_else(|| trajet.segments.first().and_then(|segment| segment.origin.as_ref()));
    let to = trajet
        .stop_arrivee
        .as_ref()
        .and_then(|stop| stop.node())
        .or_else(|| trajet.segments.last().and_then(|segment| segment.destination.as_ref()));
    let show = |node: Option<&NodeId>| node.map_or_else(|| "N/A".to_string(), NodeId::to_string);
    (show(from), show(to))
}

fn leg_length(trajet: &Trajet) -> f64 {
    if trajet.distance > 0.0 {
        trajet.distance
    } else {
        trajet.segments.iter().fold(0.0, |total, segment| total + segment.length)
    }
}

/// Spread of tour durations, in hours, at which balance drops to zero.
const BALANCE_SPAN_HOURS: f64 = 4.0;

/// Totals shown after a calculation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TourStatistics {
    pub couriers: usize,
    pub total_distance: f64,
    pub total_duration_sec: f64,
    pub total_requests: u32,
    pub total_stops: usize,
    pub total_legs: usize,
    pub average_duration_sec: f64,
    pub max_duration_sec: f64,
    pub min_duration_sec: f64,
    /// 100 when every tour takes the same time.
    pub balance_score: f64,
}

impl TourStatistics {
    pub fn from_tours(tours: &[Tour]) -> Self {
        if tours.is_empty() {
            return Self::default();
        }
        let durations = tours.iter().map(|tour| tour.total_duration_sec);
        let max = durations.clone().fold(f64::MIN, f64::max);
        let min = durations.clone().fold(f64::MAX, f64::min);
        let total_duration_sec: f64 = durations.sum();
        let spread_hours = (max - min) / 3600.0;
        let balance = (BALANCE_SPAN_HOURS - spread_hours) / BALANCE_SPAN_HOURS * 100.0;

        Self {
            couriers: tours.len(),
            total_distance: tours.iter().map(|tour| tour.total_distance).sum(),
            total_duration_sec,
            total_requests: tours.iter().map(|tour| tour.request_count).sum(),
            total_stops: tours.iter().map(|tour| tour.stops.len()).sum(),
            total_legs: tours.iter().map(|tour| tour.trajets.len()).sum(),
            average_duration_sec: total_duration_sec / tours.len() as f64,
            max_duration_sec: max,
            min_duration_sec: min,
            balance_score: balance.clamp(0.0, 100.0),
        }
    }
}
