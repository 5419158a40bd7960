//! Parsing contracts for the two external-collaborator input files (spec
//! §6 "Input data"). XML/geospatial parsing proper is out of scope; these
//! are the narrow CSV-shaped interfaces the core actually consumes.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::geometry::Position;

/// One leg of a trip plan: travel to `(x, y)`, arriving at `trav_time`
/// seconds into the simulated day. The first leg of a plan defines the
/// client's initial position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripLeg {
    pub position: Position,
    pub trav_time: f64,
}

#[derive(Debug, Clone)]
pub struct TripPlan {
    pub person_id: String,
    pub legs: Vec<TripLeg>,
}

#[derive(Debug, Deserialize)]
struct TripRow {
    person_id: String,
    x: f64,
    y: f64,
    trav_time: String,
}

/// Parses `HH:MM:SS` into seconds since midnight.
fn parse_hhmmss(s: &str) -> Option<f64> {
    let mut parts = s.trim().splitn(3, ':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let sec: f64 = parts.next()?.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + sec)
}

/// Reads a trip-plan CSV (`person_id,x,y,trav_time`) and groups rows into
/// per-person ordered plans, preserving file order within each person.
pub fn load_trip_plans(path: &Path) -> Result<Vec<TripPlan>, ConfigError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| ConfigError::InputIo {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
    })?;

    let mut plans: Vec<TripPlan> = Vec::new();
    for result in reader.deserialize::<TripRow>() {
        let row = result.map_err(|e| ConfigError::InputParse { path: path.display().to_string(), reason: e.to_string() })?;
        let trav_time = parse_hhmmss(&row.trav_time).ok_or_else(|| ConfigError::InputParse {
            path: path.display().to_string(),
            reason: format!("invalid trav_time {:?}", row.trav_time),
        })?;
        let leg = TripLeg { position: Position::new(row.x, row.y), trav_time };
        match plans.iter_mut().find(|p| p.person_id == row.person_id) {
            Some(plan) => plan.legs.push(leg),
            None => plans.push(TripPlan { person_id: row.person_id, legs: vec![leg] }),
        }
    }
    Ok(plans)
}

/// A candidate fog-node site: a fixed point plus the antenna count that
/// drives its slot capacity (spec §6 "Node locations").
#[derive(Debug, Clone, Copy)]
pub struct NodeSite {
    pub position: Position,
    pub antennas: u32,
}

#[derive(Debug, Deserialize)]
struct NodeRow {
    x: f64,
    y: f64,
    antennas: u32,
}

pub fn load_node_sites(path: &Path) -> Result<Vec<NodeSite>, ConfigError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| ConfigError::InputIo {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
    })?;
    let mut sites = Vec::new();
    for result in reader.deserialize::<NodeRow>() {
        let row = result.map_err(|e| ConfigError::InputParse { path: path.display().to_string(), reason: e.to_string() })?;
        sites.push(NodeSite { position: Position::new(row.x, row.y), antennas: row.antennas });
    }
    Ok(sites)
}

/// Slot count derived from a site's antenna count (spec §6): `⌈antennas *
/// slot_scaler⌉`, or unbounded under `unlimited_bandwidth`.
pub fn slots_for(antennas: u32, slot_scaler: f64, unlimited_bandwidth: bool) -> usize {
    if unlimited_bandwidth {
        return usize::MAX;
    }
    (antennas as f64 * slot_scaler).ceil().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hhmmss() {
        assert_eq!(parse_hhmmss("01:02:03"), Some(3723.0));
    }

    #[test]
    fn slots_round_up() {
        assert_eq!(slots_for(3, 1.5, false), 5);
    }

    #[test]
    fn unlimited_bandwidth_is_unbounded() {
        assert_eq!(slots_for(1, 1.0, true), usize::MAX);
    }
}
