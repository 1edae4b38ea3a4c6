//! Default astrometry implementation
//!
//! Compact low-precision ephemerides (Meeus, Astronomical Algorithms):
//! IAU 1982 sidereal time with the leading nutation terms, rigorous
//! spherical transforms, precession via the zeta/z/theta angles, and
//! truncated solar/lunar series. Accuracy is a few arcseconds for the
//! frames and a few arcminutes for the Moon, well inside the tolerances
//! the mount controller works to.

use chrono::{DateTime, Utc};

use crate::astro::{Astrometry, Site};

/// Meeus-based [`Astrometry`] implementation
#[derive(Debug, Default, Clone)]
pub struct MeeusAstrometry;

impl MeeusAstrometry {
    pub fn new() -> Self {
        Self
    }
}

fn julian_day(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 86_400_000.0 + 2_440_587.5
}

/// Julian centuries since J2000.0
fn centuries(jd: f64) -> f64 {
    (jd - 2_451_545.0) / 36_525.0
}

fn normalize(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}

fn sin_d(degrees: f64) -> f64 {
    degrees.to_radians().sin()
}

fn cos_d(degrees: f64) -> f64 {
    degrees.to_radians().cos()
}

/// Mean obliquity of the ecliptic, degrees
fn mean_obliquity(t: f64) -> f64 {
    23.439_291_11 - 0.013_004_17 * t - 1.6389e-7 * t * t + 5.0361e-7 * t * t * t
}

/// Nutation in longitude and obliquity, degrees (four largest terms)
fn nutation(t: f64) -> (f64, f64) {
    let omega = 125.044_52 - 1_934.136_261 * t;
    let l_sun = 280.4665 + 36_000.7698 * t;
    let l_moon = 218.3165 + 481_267.8813 * t;

    let dpsi = (-17.20 * sin_d(omega) - 1.32 * sin_d(2.0 * l_sun) - 0.23 * sin_d(2.0 * l_moon)
        + 0.21 * sin_d(2.0 * omega))
        / 3600.0;
    let deps = (9.20 * cos_d(omega) + 0.57 * cos_d(2.0 * l_sun) + 0.10 * cos_d(2.0 * l_moon)
        - 0.09 * cos_d(2.0 * omega))
        / 3600.0;
    (dpsi, deps)
}

/// Greenwich mean sidereal time, degrees
fn gmst(jd: f64) -> f64 {
    let t = centuries(jd);
    normalize(
        280.460_618_37 + 360.985_647_366_29 * (jd - 2_451_545.0) + 0.000_387_933 * t * t
            - t * t * t / 38_710_000.0,
    )
}

/// Precession angles zeta, z, theta from J2000 to the given epoch, degrees
fn precession_angles(t: f64) -> (f64, f64, f64) {
    let zeta = (2306.2181 * t + 0.30188 * t * t + 0.017998 * t * t * t) / 3600.0;
    let z = (2306.2181 * t + 1.09468 * t * t + 0.018203 * t * t * t) / 3600.0;
    let theta = (2004.3109 * t - 0.42665 * t * t - 0.041833 * t * t * t) / 3600.0;
    (zeta, z, theta)
}

/// Equatorial shift from nutation at the given epoch, degrees
fn nutation_shift(ra: f64, dec: f64, t: f64) -> (f64, f64) {
    let (dpsi, deps) = nutation(t);
    let eps = mean_obliquity(t);
    let tan_dec = dec.to_radians().tan();

    let dra = (cos_d(eps) + sin_d(eps) * sin_d(ra) * tan_dec) * dpsi - cos_d(ra) * tan_dec * deps;
    let ddec = sin_d(eps) * cos_d(ra) * dpsi + sin_d(ra) * deps;
    (dra, ddec)
}

/// Ecliptic (lambda, beta) to equatorial (ra, dec), degrees
fn ecliptic_to_equatorial(lambda: f64, beta: f64, eps: f64) -> (f64, f64) {
    let ra = f64::atan2(
        sin_d(lambda) * cos_d(eps) - beta.to_radians().tan() * sin_d(eps),
        cos_d(lambda),
    )
    .to_degrees();
    let dec = (sin_d(beta) * cos_d(eps) + cos_d(beta) * sin_d(eps) * sin_d(lambda))
        .clamp(-1.0, 1.0)
        .asin()
        .to_degrees();
    (normalize(ra), dec)
}

impl Astrometry for MeeusAstrometry {
    fn apparent_lst(&self, site: &Site, time: DateTime<Utc>) -> f64 {
        let jd = julian_day(time);
        let t = centuries(jd);
        let (dpsi, deps) = nutation(t);
        let eps = mean_obliquity(t) + deps;
        normalize(gmst(jd) + dpsi * cos_d(eps) + site.longitude)
    }

    fn horizontal_to_hadec(&self, alt: f64, az: f64, site: &Site) -> (f64, f64) {
        let phi = site.latitude;
        let sin_dec = sin_d(phi) * sin_d(alt) + cos_d(phi) * cos_d(alt) * cos_d(az);
        let dec = sin_dec.clamp(-1.0, 1.0).asin().to_degrees();
        let ha = f64::atan2(
            -cos_d(alt) * sin_d(az),
            sin_d(alt) * cos_d(phi) - cos_d(alt) * cos_d(az) * sin_d(phi),
        )
        .to_degrees();
        (ha, dec)
    }

    fn equatorial_to_horizontal(
        &self,
        ra: f64,
        dec: f64,
        site: &Site,
        time: DateTime<Utc>,
    ) -> (f64, f64) {
        let phi = site.latitude;
        let ha = self.apparent_lst(site, time) - ra;
        let sin_alt = sin_d(phi) * sin_d(dec) + cos_d(phi) * cos_d(dec) * cos_d(ha);
        let alt = sin_alt.clamp(-1.0, 1.0).asin().to_degrees();
        let az = f64::atan2(
            -cos_d(dec) * sin_d(ha),
            sin_d(dec) * cos_d(phi) - cos_d(dec) * cos_d(ha) * sin_d(phi),
        )
        .to_degrees();
        (alt, normalize(az))
    }

    fn j2000_to_apparent(&self, ra: f64, dec: f64, time: DateTime<Utc>) -> (f64, f64) {
        let t = centuries(julian_day(time));
        let (zeta, z, theta) = precession_angles(t);

        let a = cos_d(dec) * sin_d(ra + zeta);
        let b = cos_d(theta) * cos_d(dec) * cos_d(ra + zeta) - sin_d(theta) * sin_d(dec);
        let c = sin_d(theta) * cos_d(dec) * cos_d(ra + zeta) + cos_d(theta) * sin_d(dec);

        let ra_date = normalize(f64::atan2(a, b).to_degrees() + z);
        let dec_date = c.clamp(-1.0, 1.0).asin().to_degrees();

        let (dra, ddec) = nutation_shift(ra_date, dec_date, t);
        (normalize(ra_date + dra), dec_date + ddec)
    }

    fn apparent_to_j2000(&self, ra: f64, dec: f64, time: DateTime<Utc>) -> (f64, f64) {
        let t = centuries(julian_day(time));
        let (dra, ddec) = nutation_shift(ra, dec, t);
        let (ra, dec) = (ra - dra, dec - ddec);

        let (zeta, z, theta) = precession_angles(t);
        let a = cos_d(dec) * sin_d(ra - z);
        let b = cos_d(theta) * cos_d(dec) * cos_d(ra - z) + sin_d(theta) * sin_d(dec);
        let c = -sin_d(theta) * cos_d(dec) * cos_d(ra - z) + cos_d(theta) * sin_d(dec);

        let ra_2000 = normalize(f64::atan2(a, b).to_degrees() - zeta);
        let dec_2000 = c.clamp(-1.0, 1.0).asin().to_degrees();
        (ra_2000, dec_2000)
    }

    fn angular_separation(&self, ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
        let cos_sep =
            sin_d(dec1) * sin_d(dec2) + cos_d(dec1) * cos_d(dec2) * cos_d(ra1 - ra2);
        cos_sep.clamp(-1.0, 1.0).acos().to_degrees()
    }

    fn sun_position(&self, time: DateTime<Utc>) -> (f64, f64) {
        let t = centuries(julian_day(time));
        let l0 = 280.466_46 + 36_000.769_83 * t + 0.000_303_2 * t * t;
        let m = 357.529_11 + 35_999.050_29 * t - 0.000_153_7 * t * t;

        let c = (1.914_602 - 0.004_817 * t - 0.000_014 * t * t) * sin_d(m)
            + (0.019_993 - 0.000_101 * t) * sin_d(2.0 * m)
            + 0.000_289 * sin_d(3.0 * m);

        let omega = 125.04 - 1_934.136 * t;
        let lambda = l0 + c - 0.005_69 - 0.004_78 * sin_d(omega);
        let eps = mean_obliquity(t) + 0.002_56 * cos_d(omega);

        ecliptic_to_equatorial(lambda, 0.0, eps)
    }

    fn moon_position(&self, time: DateTime<Utc>) -> (f64, f64) {
        let t = centuries(julian_day(time));
        let lp = 218.316_447_7 + 481_267.881_234_21 * t;
        let d = 297.850_192_1 + 445_267.111_403_4 * t;
        let m = 357.529_109_2 + 35_999.050_290_9 * t;
        let mp = 134.963_396_4 + 477_198.867_505_5 * t;
        let f = 93.272_095_0 + 483_202.017_523_3 * t;

        let lambda = lp + 6.288_774 * sin_d(mp) + 1.274_027 * sin_d(2.0 * d - mp)
            + 0.658_314 * sin_d(2.0 * d)
            + 0.213_618 * sin_d(2.0 * mp)
            - 0.185_116 * sin_d(m)
            - 0.114_332 * sin_d(2.0 * f);
        let beta = 5.128_122 * sin_d(f)
            + 0.280_602 * sin_d(mp + f)
            + 0.277_693 * sin_d(mp - f)
            + 0.173_237 * sin_d(2.0 * d - f);

        let eps = mean_obliquity(t);
        ecliptic_to_equatorial(normalize(lambda), beta, eps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn greenwich() -> Site {
        Site {
            latitude: 51.477,
            longitude: 0.0,
            elevation: 46.0,
        }
    }

    #[test]
    fn lst_at_j2000_epoch() {
        let astro = MeeusAstrometry::new();
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        // GMST at J2000.0 is 280.46062 deg; apparent differs by the
        // equation of the equinoxes (about -0.004 deg at that epoch).
        let lst = astro.apparent_lst(&greenwich(), epoch);
        assert!((lst - 280.457).abs() < 0.01, "lst = {lst}");
    }

    #[test]
    fn lst_advances_with_longitude() {
        let astro = MeeusAstrometry::new();
        let time = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let east = Site {
            longitude: 15.0,
            ..greenwich()
        };
        let diff = astro.apparent_lst(&east, time) - astro.apparent_lst(&greenwich(), time);
        assert!((diff.rem_euclid(360.0) - 15.0).abs() < 1e-9, "diff = {diff}");
    }

    #[test]
    fn horizontal_round_trip() {
        let astro = MeeusAstrometry::new();
        let site = greenwich();
        let time = Utc.with_ymd_and_hms(2024, 3, 15, 22, 30, 0).unwrap();

        let (ra, dec) = (123.456, 33.21);
        let (alt, az) = astro.equatorial_to_horizontal(ra, dec, &site, time);
        let (ra2, dec2) = astro.horizontal_to_equatorial(alt, az, &site, time);

        assert!((ra - ra2).abs() < 1e-6, "ra {ra} != {ra2}");
        assert!((dec - dec2).abs() < 1e-6, "dec {dec} != {dec2}");
    }

    #[test]
    fn meridian_object_has_zero_hour_angle() {
        let astro = MeeusAstrometry::new();
        let site = greenwich();
        // Due south at the complement altitude sits on the meridian
        let (ha, dec) = astro.horizontal_to_hadec(90.0 - site.latitude, 180.0, &site);
        assert!(ha.abs() < 1e-9, "ha = {ha}");
        assert!(dec.abs() < 1e-9, "dec = {dec}");
    }

    #[test]
    fn precession_round_trip() {
        let astro = MeeusAstrometry::new();
        let time = Utc.with_ymd_and_hms(2026, 8, 1, 3, 0, 0).unwrap();
        let (ra, dec) = (201.298, -11.161); // Spica, J2000

        let (ra_app, dec_app) = astro.j2000_to_apparent(ra, dec, time);
        // About a quarter century of precession, roughly 0.3 deg in RA
        assert!((ra_app - ra).abs() > 0.1 && (ra_app - ra).abs() < 1.0);

        let (ra2, dec2) = astro.apparent_to_j2000(ra_app, dec_app, time);
        assert!((ra - ra2).abs() < 1e-6, "ra {ra} != {ra2}");
        assert!((dec - dec2).abs() < 1e-6, "dec {dec} != {dec2}");
    }

    #[test]
    fn separation_basics() {
        let astro = MeeusAstrometry::new();
        assert!(astro.angular_separation(10.0, 20.0, 10.0, 20.0).abs() < 1e-9);
        assert!((astro.angular_separation(0.0, 0.0, 90.0, 0.0) - 90.0).abs() < 1e-9);
        assert!((astro.angular_separation(0.0, -45.0, 180.0, -45.0) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn sun_near_equator_at_equinox() {
        let astro = MeeusAstrometry::new();
        let equinox = Utc.with_ymd_and_hms(2025, 3, 20, 9, 1, 0).unwrap();
        let (ra, dec) = astro.sun_position(equinox);
        assert!(dec.abs() < 0.1, "sun dec = {dec}");
        let ra_wrapped = if ra > 180.0 { ra - 360.0 } else { ra };
        assert!(ra_wrapped.abs() < 0.5, "sun ra = {ra}");
    }

    #[test]
    fn moon_stays_near_ecliptic() {
        let astro = MeeusAstrometry::new();
        let time = Utc.with_ymd_and_hms(2024, 10, 17, 0, 0, 0).unwrap();
        let (_, dec) = astro.moon_position(time);
        assert!(dec.abs() < 30.0, "moon dec = {dec}");
    }
}
