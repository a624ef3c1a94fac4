//! Recognising the historical tour file layouts.
//!
//! Detectors are tried in order and the first match holding a tour wins.
//! Each one returns
//! the same intermediate [`ParsedFile`], so nothing downstream needs to know
//! which layout the file used.
//!
//! Supported layouts:
//! - `{ "tours": [..], "demands": [..], "warehouse": {..}, "courierCount": n }`
//! - a bare array of tours
//! - `{ "tour": [trajets..], "stops": [..] }`, a single courier

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::model::{DemandId, NodeId, Stop, Trajet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileShape {
    TourList,
    BareArray,
    LegacySingleTour,
}

/// A tour as found in the file, courier id not yet trusted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTour {
    #[serde(default)]
    pub courier_id: Option<Value>,
    #[serde(default, alias = "tour")]
    pub trajets: Vec<Trajet>,
    #[serde(default)]
    pub stops: Vec<Stop>,
    #[serde(default)]
    pub total_distance: Option<f64>,
    #[serde(default)]
    pub total_duration_sec: Option<f64>,
    #[serde(default)]
    pub request_count: Option<u32>,
}

impl RawTour {
    /// The courier id when it is a non-negative integral number.
    pub fn usable_courier_id(&self) -> Option<u32> {
        let value = self.courier_id.as_ref()?;
        if let Some(id) = value.as_u64() {
            return u32::try_from(id).ok();
        }
        value
            .as_f64()
            .filter(|id| id.is_finite() && id.fract() == 0.0)
            .filter(|id| *id >= 0.0 && *id <= f64::from(u32::MAX))
            .map(|id| id as u32)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDemand {
    #[serde(default)]
    pub id: Option<DemandId>,
    #[serde(default)]
    pub pickup_node_id: Option<NodeId>,
    #[serde(default)]
    pub delivery_node_id: Option<NodeId>,
    #[serde(default)]
    pub pickup_duration_sec: Option<u32>,
    #[serde(default)]
    pub delivery_duration_sec: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWarehouse {
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub departure_time: Option<String>,
}

/// Layout-independent view of a tour file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub shape: FileShape,
    pub tours: Vec<RawTour>,
    /// Explicit demands; `None` when absent or empty.
    pub demands: Option<Vec<RawDemand>>,
    pub warehouse: Option<RawWarehouse>,
    /// Explicit positive courier count.
    pub courier_count: Option<i64>,
    /// Entries that were not objects of the expected form.
    pub skipped_entries: usize,
}

type Detector = fn(&Value) -> Option<ParsedFile>;

const DETECTORS: &[Detector] = &[detect_tour_list, detect_bare_array, detect_legacy_single_tour];

/// Runs the detectors in order, skipping matches without a tour. `None`
/// when no layout yields one.
pub fn detect(contents: &Value) -> Option<ParsedFile> {
    let parsed = DETECTORS
        .iter()
        .filter_map(|detector| detector(contents))
        .find(|parsed| !parsed.tours.is_empty())?;
    if parsed.skipped_entries > 0 {
        warn!(skipped = parsed.skipped_entries, "ignored malformed entries in tour file");
    }
    Some(parsed)
}

fn detect_tour_list(contents: &Value) -> Option<ParsedFile> {
    let object = contents.as_object()?;
    let tours = object.get("tours")?.as_array()?;
    let (tours, skipped) = parse_entries::<RawTour>(tours);
    Some(with_metadata(FileShape::TourList, tours, skipped, object))
}

fn detect_bare_array(contents: &Value) -> Option<ParsedFile> {
    let tours = contents.as_array()?;
    let (tours, skipped_entries) = parse_entries::<RawTour>(tours);
    Some(ParsedFile {
        shape: FileShape::BareArray,
        tours,
        demands: None,
        warehouse: None,
        courier_count: None,
        skipped_entries,
    })
}

fn detect_legacy_single_tour(contents: &Value) -> Option<ParsedFile> {
    let object = contents.as_object()?;
    let legs = object.get("tour")?.as_array()?;
    let (trajets, mut skipped) = parse_entries::<Trajet>(legs);
    let (stops, skipped_stops) = object
        .get("stops")
        .and_then(Value::as_array)
        .map(|stops| parse_entries::<Stop>(stops))
        .unwrap_or_default();
    skipped += skipped_stops;

    let tour = RawTour {
        trajets,
        stops,
        ..RawTour::default()
    };
    Some(with_metadata(FileShape::LegacySingleTour, vec![tour], skipped, object))
}

fn with_metadata(
    shape: FileShape,
    tours: Vec<RawTour>,
    mut skipped: usize,
    object: &Map<String, Value>,
) -> ParsedFile {
    let demands = object.get("demands").and_then(Value::as_array).and_then(|entries| {
        let (demands, bad) = parse_entries::<RawDemand>(entries);
        skipped += bad;
        (!demands.is_empty()).then_some(demands)
    });

    let warehouse = object
        .get("warehouse")
        .filter(|value| value.is_object())
        .and_then(|value| serde_json::from_value::<RawWarehouse>(value.clone()).ok());

    let courier_count = object
        .get("courierCount")
        .and_then(|value| {
            value
                .as_i64()
                .or_else(|| value.as_f64().filter(|n| n.is_finite()).map(|n| n as i64))
        })
        .filter(|count| *count > 0);

    ParsedFile {
        shape,
        tours,
        demands,
        warehouse,
        courier_count,
        skipped_entries: skipped,
    }
}

fn parse_entries<T: for<'de> Deserialize<'de>>(entries: &[Value]) -> (Vec<T>, usize) {
    let mut parsed = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for entry in entries {
        match serde_json::from_value::<T>(entry.clone()) {
            Ok(value) => parsed.push(value),
            Err(_) => skipped += 1,
        }
    }
    (parsed, skipped)
}
