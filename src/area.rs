//! Polygon geofences: area attributes, vertices and the per-session set.

use std::collections::BTreeMap;

use crate::error::{ProtocolError, Result};

/// Area attribute word (u16) of a geofence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AreaAttribute(u16);

impl AreaAttribute {
    /// The time window fields are present.
    pub const BY_TIME: u16 = 1 << 0;
    /// The speed limit fields are present.
    pub const SPEED_LIMIT: u16 = 1 << 1;
    pub const ENTER_ALARM_TO_DRIVER: u16 = 1 << 2;
    pub const ENTER_ALARM_TO_PLATFORM: u16 = 1 << 3;
    pub const LEAVE_ALARM_TO_DRIVER: u16 = 1 << 4;
    pub const LEAVE_ALARM_TO_PLATFORM: u16 = 1 << 5;
    /// 0 north, 1 south latitude for the vertices.
    pub const SOUTH_LATITUDE: u16 = 1 << 6;
    /// 0 east, 1 west longitude for the vertices.
    pub const WEST_LONGITUDE: u16 = 1 << 7;

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn has(self, flag: u16) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u16) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u16) {
        self.0 &= !flag;
    }

    pub const fn by_time(self) -> bool {
        self.has(Self::BY_TIME)
    }

    pub const fn speed_limited(self) -> bool {
        self.has(Self::SPEED_LIMIT)
    }
}

/// One polygon vertex in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocationPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A named polygon geofence with optional time window and speed limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonArea {
    pub area_id: u32,
    pub attribute: AreaAttribute,
    /// `YYMMDDhhmmss`; meaningful only when `attribute.by_time()`.
    pub start_time: String,
    /// `YYMMDDhhmmss`; meaningful only when `attribute.by_time()`.
    pub stop_time: String,
    /// km/h; meaningful only when `attribute.speed_limited()`.
    pub max_speed: u16,
    /// Seconds of sustained overspeed before alarming.
    pub overspeed_duration: u8,
    /// Vertices in clockwise order.
    pub vertices: Vec<LocationPoint>,
}

/// The per-session set of polygon areas, keyed by area ID.
#[derive(Debug, Clone, Default)]
pub struct PolygonAreaSet {
    areas: BTreeMap<u32, PolygonArea>,
}

impl PolygonAreaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new area. Fails when the ID already exists.
    pub fn add(&mut self, area: PolygonArea) -> Result<()> {
        let id = area.area_id;
        if self.areas.contains_key(&id) {
            return Err(ProtocolError::AreaExists(id).into());
        }
        self.areas.insert(id, area);
        Ok(())
    }

    /// Insert or replace an area.
    pub fn update(&mut self, area: PolygonArea) {
        self.areas.insert(area.area_id, area);
    }

    /// Look up an area by ID. Succeeds when the ID is present.
    pub fn get(&self, id: u32) -> Result<&PolygonArea> {
        self.areas
            .get(&id)
            .ok_or_else(|| ProtocolError::AreaNotFound(id).into())
    }

    pub fn remove(&mut self, id: u32) -> Option<PolygonArea> {
        self.areas.remove(&id)
    }

    /// Remove the listed areas; an empty list removes everything.
    pub fn remove_ids(&mut self, ids: &[u32]) {
        if ids.is_empty() {
            self.areas.clear();
            return;
        }
        for id in ids {
            self.areas.remove(id);
        }
    }

    pub fn clear(&mut self) {
        self.areas.clear();
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolygonArea> {
        self.areas.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(id: u32) -> PolygonArea {
        PolygonArea {
            area_id: id,
            attribute: AreaAttribute::new(AreaAttribute::BY_TIME),
            start_time: "200101000000".into(),
            stop_time: "201231235959".into(),
            max_speed: 0,
            overspeed_duration: 0,
            vertices: vec![
                LocationPoint::new(31.0, 117.0),
                LocationPoint::new(31.1, 117.0),
                LocationPoint::new(31.1, 117.1),
            ],
        }
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut set = PolygonAreaSet::new();
        set.add(area(1)).unwrap();
        assert!(set.add(area(1)).is_err());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn get_finds_present_areas() {
        let mut set = PolygonAreaSet::new();
        set.add(area(42)).unwrap();
        assert_eq!(set.get(42).unwrap().area_id, 42);
        assert!(set.get(7).is_err());
    }

    #[test]
    fn remove_ids_empty_means_all() {
        let mut set = PolygonAreaSet::new();
        set.add(area(1)).unwrap();
        set.add(area(2)).unwrap();
        set.remove_ids(&[]);
        assert!(set.is_empty());
    }

    #[test]
    fn remove_ids_selective() {
        let mut set = PolygonAreaSet::new();
        set.add(area(1)).unwrap();
        set.add(area(2)).unwrap();
        set.add(area(3)).unwrap();
        set.remove_ids(&[1, 3]);
        assert_eq!(set.len(), 1);
        assert!(set.get(2).is_ok());
    }

    #[test]
    fn attribute_flags() {
        let mut attr = AreaAttribute::new(0);
        attr.set(AreaAttribute::SPEED_LIMIT);
        assert!(attr.speed_limited());
        assert!(!attr.by_time());
        assert_eq!(AreaAttribute::new(attr.raw()), attr);
    }
}
