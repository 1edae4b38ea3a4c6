//! Astronomy collaborator interface
//!
//! Pure functions of (position, time, site) the mount controller depends on.
//! The daemon ships a default implementation in [`crate::ephemeris`]; tests
//! substitute fixed values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observing site coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Site {
    /// Degrees, north positive
    pub latitude: f64,
    /// Degrees, east positive
    pub longitude: f64,
    /// Metres above sea level
    pub elevation: f64,
}

/// Coordinate transforms and ephemerides needed by the mount controller.
///
/// All angles are degrees. Azimuth is measured from north through east;
/// hour angle is west positive.
pub trait Astrometry: Send + Sync {
    /// Apparent local sidereal time, degrees in [0, 360)
    fn apparent_lst(&self, site: &Site, time: DateTime<Utc>) -> f64;

    /// (hour angle, declination) for a horizon-frame position at the site
    fn horizontal_to_hadec(&self, alt: f64, az: f64, site: &Site) -> (f64, f64);

    /// (altitude, azimuth) for an apparent equatorial position
    fn equatorial_to_horizontal(
        &self,
        ra: f64,
        dec: f64,
        site: &Site,
        time: DateTime<Utc>,
    ) -> (f64, f64);

    /// Apparent (ra, dec) for a horizon-frame position
    fn horizontal_to_equatorial(
        &self,
        alt: f64,
        az: f64,
        site: &Site,
        time: DateTime<Utc>,
    ) -> (f64, f64) {
        let (ha, dec) = self.horizontal_to_hadec(alt, az, site);
        let ra = (self.apparent_lst(site, time) - ha).rem_euclid(360.0);
        (ra, dec)
    }

    /// Transform an epoch-2000 position to the equinox of date
    fn j2000_to_apparent(&self, ra: f64, dec: f64, time: DateTime<Utc>) -> (f64, f64);

    /// Transform an equinox-of-date position to epoch 2000
    fn apparent_to_j2000(&self, ra: f64, dec: f64, time: DateTime<Utc>) -> (f64, f64);

    /// Angular separation between two equatorial positions, degrees
    fn angular_separation(&self, ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64;

    /// Apparent solar (ra, dec) at the given time
    fn sun_position(&self, time: DateTime<Utc>) -> (f64, f64);

    /// Apparent lunar (ra, dec) at the given time
    fn moon_position(&self, time: DateTime<Utc>) -> (f64, f64);
}
