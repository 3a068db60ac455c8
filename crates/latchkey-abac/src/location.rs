//! Location constraints.
//!
//! Locations are opaque labels ("lobby", "plant-3", "US"). The denied list
//! always takes precedence over the allowed list.
//!
//! When the request carries no location fact the constraint is satisfied.
//! This fail-open behaviour is only acceptable until a geofencing
//! collaborator supplies trusted locations; `radius_meters` and
//! `reference_point` are carried for that collaborator and are not
//! evaluated here.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::condition::Outcome;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A spatial restriction on where a policy applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConstraint {
    pub allowed_locations: BTreeSet<String>,
    pub denied_locations: BTreeSet<String>,
    pub radius_meters: Option<f64>,
    pub reference_point: Option<GeoPoint>,
}

impl LocationConstraint {
    /// Only the given locations are allowed.
    pub fn allow<I, S>(locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_locations: locations.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds denied locations (builder pattern).
    pub fn with_denied<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied_locations
            .extend(locations.into_iter().map(Into::into));
        self
    }

    /// Checks structural validity.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the radius is not a positive
    /// finite number, is set without a reference point, or the reference
    /// point lies outside WGS84 bounds.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(radius) = self.radius_meters {
            if !radius.is_finite() || radius <= 0.0 {
                return Err(format!("radius must be a positive distance, got {radius}"));
            }
            if self.reference_point.is_none() {
                return Err("radius is set without a reference point".to_string());
            }
        }
        if let Some(point) = self.reference_point {
            if !(-90.0..=90.0).contains(&point.latitude)
                || !(-180.0..=180.0).contains(&point.longitude)
            {
                return Err(format!(
                    "reference point ({}, {}) is out of range",
                    point.latitude, point.longitude
                ));
            }
        }
        Ok(())
    }

    /// Evaluates the constraint for the requester's current location.
    pub fn evaluate(&self, location: Option<&str>) -> Outcome {
        let Some(location) = location else {
            return Outcome::matched("no location reported");
        };

        if self.denied_locations.contains(location) {
            return Outcome::rejected(format!("location '{location}' is denied"));
        }
        if !self.allowed_locations.is_empty() && !self.allowed_locations.contains(location) {
            return Outcome::rejected(format!("location '{location}' is not allowed"));
        }
        Outcome::matched(format!("location '{location}' permitted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_location_is_permitted() {
        let constraint = LocationConstraint::allow(["lobby"]);
        assert!(constraint.evaluate(None).matched);
    }

    #[test]
    fn denied_takes_precedence_over_allowed() {
        let constraint = LocationConstraint::allow(["lobby", "vault"]).with_denied(["vault"]);

        assert!(constraint.evaluate(Some("lobby")).matched);
        assert!(!constraint.evaluate(Some("vault")).matched);
    }

    #[test]
    fn allowed_list_requires_membership() {
        let constraint = LocationConstraint::allow(["lobby"]);
        let outcome = constraint.evaluate(Some("garage"));

        assert!(!outcome.matched);
        assert!(outcome.reason.contains("not allowed"));
    }

    #[test]
    fn empty_lists_permit_any_location() {
        let constraint = LocationConstraint::default().with_denied(["roof"]);
        assert!(constraint.evaluate(Some("garage")).matched);
        assert!(!constraint.evaluate(Some("roof")).matched);
    }

    #[test]
    fn radius_requires_reference_point() {
        let constraint = LocationConstraint {
            radius_meters: Some(50.0),
            ..LocationConstraint::default()
        };
        assert!(constraint.validate().is_err());

        let anchored = LocationConstraint {
            radius_meters: Some(50.0),
            reference_point: Some(GeoPoint {
                latitude: 51.5,
                longitude: -0.12,
            }),
            ..LocationConstraint::default()
        };
        assert!(anchored.validate().is_ok());
    }
}
