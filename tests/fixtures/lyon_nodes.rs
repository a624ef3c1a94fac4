//! Named intersections of central Lyon used as map nodes.
//!
//! Coordinates are approximate (OpenStreetMap), good enough for a map the
//! console only reads ids from.

/// A named node with coordinates.
#[derive(Debug, Clone)]
pub struct Location {
    pub id: &'static str,
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub const fn new(id: &'static str, name: &'static str, lat: f64, lng: f64) -> Self {
        Self { id, name, lat, lng }
    }
}

// ============================================================================
// Depots
// ============================================================================

pub const DEPOTS: &[Location] = &[
    Location::new("25175791", "Place Bellecour", 45.7578, 4.8320),
    Location::new("2129259178", "Gare Part-Dieu", 45.7606, 4.8593),
];

// ============================================================================
// Presqu'ile
// ============================================================================

pub const PRESQUILE: &[Location] = &[
    Location::new("26086130", "Place des Terreaux", 45.7675, 4.8336),
    Location::new("55444018", "Place des Jacobins", 45.7606, 4.8337),
    Location::new("26464256", "Place Carnot", 45.7503, 4.8268),
    Location::new("21717915", "Cordeliers", 45.7636, 4.8357),
    Location::new("55444215", "Place Sathonay", 45.7689, 4.8302),
    Location::new("208769039", "Opera", 45.7676, 4.8363),
];

// ============================================================================
// Left bank
// ============================================================================

pub const LEFT_BANK: &[Location] = &[
    Location::new("1679901320", "Guillotiere", 45.7554, 4.8423),
    Location::new("342873658", "Saxe-Gambetta", 45.7539, 4.8478),
    Location::new("25610888", "Foch", 45.7690, 4.8439),
    Location::new("27362899", "Brotteaux", 45.7667, 4.8591),
    Location::new("505061101", "Jean Mace", 45.7456, 4.8424),
    Location::new("48830472", "Monplaisir", 45.7453, 4.8708),
];

/// A node that no fixture map contains.
pub const MISSING_NODE: &str = "N99";

/// Every fixture location.
pub fn all_locations() -> Vec<&'static Location> {
    DEPOTS.iter().chain(PRESQUILE).chain(LEFT_BANK).collect()
}
