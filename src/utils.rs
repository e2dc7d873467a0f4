/// Utility functions
use crate::domain::{Angle, Observer};
use crate::errors::{ResolveError, ResolveResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse an absolute timestamp. Input without an offset is taken as UTC.
pub fn parse_timestamp(raw: &str) -> ResolveResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }
    Err(ResolveError::protocol(format!(
        "unparsable timestamp '{}', expected YYYY-MM-DD HH:MM:SS",
        raw
    )))
}

pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Timestamp form safe for use inside a filename.
pub fn filename_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// Split `[sign]<a><unit><b>m<c>[s]` into its sign and three components.
pub fn parse_sexagesimal(raw: &str, unit: char) -> Option<(bool, f64, f64, f64)> {
    let (negative, body) = match raw.chars().next()? {
        '-' => (true, &raw[1..]),
        '+' => (false, &raw[1..]),
        _ => (false, raw),
    };
    let (a, rest) = body.split_once(unit)?;
    let (b, rest) = rest.split_once('m')?;
    let c = rest.strip_suffix('s').unwrap_or(rest);

    let a = unsigned(a)?;
    let b = unsigned(b)?;
    let c = unsigned(c)?;
    if b >= 60.0 || c >= 60.0 {
        return None;
    }
    Some((negative, a, b, c))
}

fn unsigned(part: &str) -> Option<f64> {
    let part = part.trim();
    if part.is_empty() || part.starts_with(['-', '+']) {
        return None;
    }
    part.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Normalise an angle to `[0, 360)`.
pub fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

pub fn lerp(a: f64, b: f64, frac: f64) -> f64 {
    a + (b - a) * frac
}

/// Interpolate right ascension along the shorter arc, across the 0/360 seam.
pub fn interpolate_ra(a: f64, b: f64, frac: f64) -> f64 {
    let delta = (b - a + 540.0).rem_euclid(360.0) - 180.0;
    wrap_degrees(a + delta * frac)
}

pub fn julian_date(dt: DateTime<Utc>) -> f64 {
    let seconds = dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) * 1e-9;
    seconds / 86_400.0 + 2_440_587.5
}

/// Greenwich mean sidereal time in degrees.
pub fn gmst_degrees(dt: DateTime<Utc>) -> f64 {
    let d = julian_date(dt) - 2_451_545.0;
    let t = d / 36_525.0;
    wrap_degrees(
        280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t
            - t * t * t / 38_710_000.0,
    )
}

/// Azimuth (north through east) and elevation of an equatorial position.
pub fn horizontal(ra: Angle, dec: Angle, at: DateTime<Utc>, observer: &Observer) -> (f64, f64) {
    let lst = gmst_degrees(at) + observer.longitude;
    let hour_angle = (lst - ra.degrees()).to_radians();
    let dec = dec.degrees().to_radians();
    let lat = observer.latitude.to_radians();

    let sin_el = lat.sin() * dec.sin() + lat.cos() * dec.cos() * hour_angle.cos();
    let el = sin_el.clamp(-1.0, 1.0).asin();

    let y = -dec.cos() * hour_angle.sin();
    let x = dec.sin() * lat.cos() - dec.cos() * lat.sin() * hour_angle.cos();
    let az = wrap_degrees(y.atan2(x).to_degrees());

    (az, el.to_degrees())
}
