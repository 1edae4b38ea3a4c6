//! Soft pointing-limit validation
//!
//! Runs caller-side before a command is queued, so a target outside the
//! configured hour-angle or declination window never touches the serial
//! link.

use chrono::{DateTime, Utc};

use crate::astro::Astrometry;
use crate::config::Config;
use crate::types::{CommandStatus, EquatorialTarget};

/// Wrap an angle into (-180, +180] degrees
pub fn wrap_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Check an epoch-2000 target against the configured soft limits.
///
/// Returns `None` when the target is acceptable, otherwise the status to
/// hand back to the caller. Both limit boundaries are inclusive.
pub fn validate_target(
    target: &EquatorialTarget,
    time: DateTime<Utc>,
    config: &Config,
    astro: &dyn Astrometry,
) -> Option<CommandStatus> {
    let (ra, dec) = astro.j2000_to_apparent(target.ra, target.dec, time);
    let lst = astro.apparent_lst(&config.site, time);
    let ha = wrap_degrees(lst - ra);

    let [ha_low, ha_high] = config.pointing.ha_soft_limits;
    if ha < ha_low || ha > ha_high {
        return Some(CommandStatus::OutsideHALimits);
    }

    let [dec_low, dec_high] = config.pointing.dec_soft_limits;
    if dec < dec_low || dec > dec_high {
        return Some(CommandStatus::OutsideDecLimits);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::astro::Site;

    /// Astrometry stub with a fixed sidereal time and identity frames
    struct FixedAstrometry {
        lst: f64,
    }

    impl Astrometry for FixedAstrometry {
        fn apparent_lst(&self, _site: &Site, _time: DateTime<Utc>) -> f64 {
            self.lst
        }

        fn horizontal_to_hadec(&self, _alt: f64, _az: f64, _site: &Site) -> (f64, f64) {
            (0.0, 0.0)
        }

        fn equatorial_to_horizontal(
            &self,
            _ra: f64,
            _dec: f64,
            _site: &Site,
            _time: DateTime<Utc>,
        ) -> (f64, f64) {
            (0.0, 0.0)
        }

        fn j2000_to_apparent(&self, ra: f64, dec: f64, _time: DateTime<Utc>) -> (f64, f64) {
            (ra, dec)
        }

        fn apparent_to_j2000(&self, ra: f64, dec: f64, _time: DateTime<Utc>) -> (f64, f64) {
            (ra, dec)
        }

        fn angular_separation(&self, _ra1: f64, _dec1: f64, _ra2: f64, _dec2: f64) -> f64 {
            0.0
        }

        fn sun_position(&self, _time: DateTime<Utc>) -> (f64, f64) {
            (0.0, 0.0)
        }

        fn moon_position(&self, _time: DateTime<Utc>) -> (f64, f64) {
            (0.0, 0.0)
        }
    }

    fn config_with_limits(ha: [f64; 2], dec: [f64; 2]) -> Config {
        let mut config = Config::default();
        config.pointing.ha_soft_limits = ha;
        config.pointing.dec_soft_limits = dec;
        config
    }

    #[test]
    fn wrap_degrees_range() {
        assert_eq!(wrap_degrees(0.0), 0.0);
        assert_eq!(wrap_degrees(180.0), 180.0);
        assert_eq!(wrap_degrees(180.5), -179.5);
        assert_eq!(wrap_degrees(360.0), 0.0);
        assert_eq!(wrap_degrees(-190.0), 170.0);
        assert_eq!(wrap_degrees(540.0), 180.0);
    }

    #[test]
    fn target_inside_limits_is_accepted() {
        let config = config_with_limits([-60.0, 60.0], [-20.0, 80.0]);
        let astro = FixedAstrometry { lst: 100.0 };
        let target = EquatorialTarget {
            ra: 100.0,
            dec: 30.0,
        };
        assert_eq!(
            validate_target(&target, Utc::now(), &config, &astro),
            None
        );
    }

    #[test]
    fn hour_angle_boundary_is_inclusive() {
        let config = config_with_limits([-60.0, 60.0], [-90.0, 90.0]);
        let astro = FixedAstrometry { lst: 100.0 };

        // ha = lst - ra = exactly the positive limit
        let on_boundary = EquatorialTarget { ra: 40.0, dec: 0.0 };
        assert_eq!(
            validate_target(&on_boundary, Utc::now(), &config, &astro),
            None
        );

        // one ulp beyond the limit is rejected
        let beyond = EquatorialTarget {
            ra: f64::from_bits(40.0_f64.to_bits() - 1),
            dec: 0.0,
        };
        assert_eq!(
            validate_target(&beyond, Utc::now(), &config, &astro),
            Some(CommandStatus::OutsideHALimits)
        );
    }

    #[test]
    fn declination_limits() {
        let config = config_with_limits([-180.0, 180.0], [-20.0, 80.0]);
        let astro = FixedAstrometry { lst: 0.0 };

        let low = EquatorialTarget {
            ra: 0.0,
            dec: -20.01,
        };
        assert_eq!(
            validate_target(&low, Utc::now(), &config, &astro),
            Some(CommandStatus::OutsideDecLimits)
        );

        let high = EquatorialTarget {
            ra: 0.0,
            dec: 80.0,
        };
        assert_eq!(validate_target(&high, Utc::now(), &config, &astro), None);
    }

    #[test]
    fn hour_angle_wraps_across_zero_ra() {
        let config = config_with_limits([-60.0, 60.0], [-90.0, 90.0]);
        let astro = FixedAstrometry { lst: 10.0 };
        // ra = 350 gives a raw difference of -340, which wraps to +20
        let target = EquatorialTarget { ra: 350.0, dec: 0.0 };
        assert_eq!(validate_target(&target, Utc::now(), &config, &astro), None);
    }
}
