//! Domain model shared by the console: map geometry, demands, and the
//! tours returned by the solver.
//!
//! Identifiers coming back from the backend (or from an old export file)
//! are not always the same JSON type, so the id newtypes accept either a
//! string or a number and always serialize as strings.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Smallest courier count the console accepts.
pub const MIN_COURIERS: u32 = 1;

/// Largest courier count the console accepts.
pub const MAX_COURIERS: u32 = 10;

/// Service time used when a demand carries no explicit duration.
pub const DEFAULT_SERVICE_DURATION_SEC: u32 = 300;

/// Departure time used when a warehouse carries none.
pub const DEFAULT_DEPARTURE_TIME: &str = "08:00";

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Empty ids are treated the same as a missing field.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                RawId::deserialize(deserializer).map(|raw| Self(raw.into_string()))
            }
        }
    };
}

string_id!(
    /// Identifier of a map node.
    NodeId
);

string_id!(
    /// Identifier of a demand, assigned by the backend at creation time.
    DemandId
);

/// Identifier of a courier. Unique across the tours of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourierId(u32);

impl CourierId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CourierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of couriers to plan for, always within `MIN_COURIERS..=MAX_COURIERS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CourierCount(u32);

impl CourierCount {
    /// Clamps any requested count into the supported range.
    pub fn new(requested: i64) -> Self {
        let clamped = requested.clamp(i64::from(MIN_COURIERS), i64::from(MAX_COURIERS));
        Self(u32::try_from(clamped).unwrap_or(MIN_COURIERS))
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Default for CourierCount {
    fn default() -> Self {
        Self(MIN_COURIERS)
    }
}

impl<'de> Deserialize<'de> for CourierCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Self::new)
    }
}

impl fmt::Display for CourierCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub origin: Option<NodeId>,
    #[serde(default)]
    pub destination: Option<NodeId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub length: f64,
}

/// The street map currently loaded in the console. Read-only here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CityMap {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl CityMap {
    pub fn new(nodes: Vec<Node>, segments: Vec<Segment>) -> Self {
        Self { nodes, segments }
    }

    pub fn node_ids(&self) -> HashSet<&NodeId> {
        self.nodes.iter().map(|node| &node.id).collect()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|node| &node.id == id)
    }

    pub fn first_node(&self) -> Option<&NodeId> {
        self.nodes.first().map(|node| &node.id)
    }
}

/// One pickup + delivery request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Demand {
    pub id: DemandId,
    pub pickup_node_id: NodeId,
    pub delivery_node_id: NodeId,
    #[serde(default = "default_service_duration")]
    pub pickup_duration_sec: u32,
    #[serde(default = "default_service_duration")]
    pub delivery_duration_sec: u32,
    /// Display colour, recomputed from the demand's list position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Demand {
    pub fn new(
        id: impl Into<DemandId>,
        pickup: impl Into<NodeId>,
        delivery: impl Into<NodeId>,
    ) -> Self {
        Self {
            id: id.into(),
            pickup_node_id: pickup.into(),
            delivery_node_id: delivery.into(),
            pickup_duration_sec: DEFAULT_SERVICE_DURATION_SEC,
            delivery_duration_sec: DEFAULT_SERVICE_DURATION_SEC,
            color: None,
        }
    }

    pub fn with_durations(mut self, pickup_sec: u32, delivery_sec: u32) -> Self {
        self.pickup_duration_sec = pickup_sec;
        self.delivery_duration_sec = delivery_sec;
        self
    }

    /// Pickup and delivery node of this demand, in that order.
    pub fn endpoints(&self) -> (&NodeId, &NodeId) {
        (&self.pickup_node_id, &self.delivery_node_id)
    }
}

fn default_service_duration() -> u32 {
    DEFAULT_SERVICE_DURATION_SEC
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
    pub node_id: NodeId,
    #[serde(default = "default_departure_time")]
    pub departure_time: String,
}

impl Warehouse {
    pub fn new(node_id: impl Into<NodeId>, departure_time: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            departure_time: departure_time.into(),
        }
    }
}

fn default_departure_time() -> String {
    DEFAULT_DEPARTURE_TIME.to_string()
}

/// What must be delivered. Shadows the backend's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemandRequestSet {
    #[serde(default)]
    pub warehouse: Option<Warehouse>,
    #[serde(default)]
    pub demands: Vec<Demand>,
}

impl DemandRequestSet {
    pub fn contains(&self, id: &DemandId) -> bool {
        self.demands.iter().any(|demand| &demand.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopType {
    Pickup,
    Delivery,
    Warehouse,
}

impl StopType {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PICKUP" => Some(Self::Pickup),
            "DELIVERY" => Some(Self::Delivery),
            "WAREHOUSE" => Some(Self::Warehouse),
            _ => None,
        }
    }
}

fn lenient_stop_type<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<StopType>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(serde_json::Value::as_str).and_then(StopType::parse))
}

/// A single visit inside a tour. Any field may be missing in partial
/// solver responses or hand-edited files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    #[serde(default)]
    pub id_node: Option<NodeId>,
    #[serde(default)]
    pub id_demande: Option<DemandId>,
    #[serde(default, deserialize_with = "lenient_stop_type")]
    pub type_stop: Option<StopType>,
}

impl Stop {
    pub fn new(node: impl Into<NodeId>, demand: Option<DemandId>, kind: StopType) -> Self {
        Self {
            id_node: Some(node.into()),
            id_demande: demand,
            type_stop: Some(kind),
        }
    }

    pub fn warehouse(node: impl Into<NodeId>) -> Self {
        Self::new(node, None, StopType::Warehouse)
    }

    pub fn node(&self) -> Option<&NodeId> {
        self.id_node.as_ref().filter(|id| !id.is_blank())
    }

    pub fn demand(&self) -> Option<&DemandId> {
        self.id_demande.as_ref().filter(|id| !id.is_blank())
    }
}

/// One solver-computed leg between two consecutive stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajet {
    #[serde(default)]
    pub stop_depart: Option<Stop>,
    #[serde(default)]
    pub stop_arrivee: Option<Stop>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub duration_sec: f64,
}

impl Trajet {
    pub fn between(from: Stop, to: Stop) -> Self {
        Self {
            stop_depart: Some(from),
            stop_arrivee: Some(to),
            segments: Vec::new(),
            distance: 0.0,
            duration_sec: 0.0,
        }
    }

    /// Departure and arrival stops that are present.
    pub fn endpoints(&self) -> impl Iterator<Item = &Stop> {
        self.stop_depart.iter().chain(self.stop_arrivee.iter())
    }
}

/// One courier's full itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub courier_id: CourierId,
    #[serde(default, alias = "tour")]
    pub trajets: Vec<Trajet>,
    #[serde(default)]
    pub stops: Vec<Stop>,
    #[serde(default)]
    pub total_distance: f64,
    #[serde(default)]
    pub total_duration_sec: f64,
    #[serde(default)]
    pub request_count: u32,
}

impl Tour {
    /// A well-formed tour with nothing in it.
    pub fn placeholder(courier_id: CourierId) -> Self {
        Self {
            courier_id,
            trajets: Vec::new(),
            stops: Vec::new(),
            total_distance: 0.0,
            total_duration_sec: 0.0,
            request_count: 0,
        }
    }

    /// Every stop of the tour: the trajet endpoints followed by `stops`.
    pub fn all_stops(&self) -> impl Iterator<Item = &Stop> {
        self.trajets
            .iter()
            .flat_map(Trajet::endpoints)
            .chain(self.stops.iter())
    }

    /// Union of the node ids reached through trajets and through stops.
    pub fn visited_nodes(&self) -> HashSet<&NodeId> {
        self.all_stops().filter_map(Stop::node).collect()
    }
}

/// Tours as committed for display: never empty, an empty response becomes a
/// single placeholder tour for courier 1.
pub fn non_empty_tours(tours: Vec<Tour>) -> Vec<Tour> {
    if tours.is_empty() {
        vec![Tour::placeholder(CourierId::new(MIN_COURIERS))]
    } else {
        tours
    }
}

/// demand id -> courier serving it, `None` when unassigned.
pub type AssignmentMap = HashMap<DemandId, Option<CourierId>>;

/// Turns raw courier ids (`None` when unusable) into pairwise distinct ids.
///
/// The first occurrence of a usable id keeps it. Every other position gets
/// its 1-based index, or the smallest free id if that index is taken.
pub fn normalize_courier_ids(raw: &[Option<u32>]) -> Vec<CourierId> {
    let mut taken: HashSet<u32> = HashSet::new();
    let kept: Vec<Option<u32>> = raw
        .iter()
        .map(|id| id.filter(|value| taken.insert(*value)))
        .collect();

    let mut next_free = MIN_COURIERS;
    kept.into_iter()
        .enumerate()
        .map(|(index, id)| {
            if let Some(value) = id {
                return CourierId(value);
            }
            let preferred = u32::try_from(index + 1).unwrap_or(u32::MAX);
            if taken.insert(preferred) {
                return CourierId(preferred);
            }
            while taken.contains(&next_free) {
                next_free = next_free.saturating_add(1);
            }
            taken.insert(next_free);
            CourierId(next_free)
        })
        .collect()
}

/// Courier ids that appear on more than one tour, in first-repeat order.
pub fn duplicate_courier_ids(tours: &[Tour]) -> Vec<CourierId> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for tour in tours {
        if !seen.insert(tour.courier_id) && !duplicates.contains(&tour.courier_id) {
            duplicates.push(tour.courier_id);
        }
    }
    duplicates
}
