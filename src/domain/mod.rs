/// Domain models for the application
use crate::errors::{ResolveError, ResolveResult};
use crate::utils::{format_timestamp, parse_sexagesimal, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An angle normalised to decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Angle(f64);

impl Angle {
    pub fn from_degrees(degrees: f64) -> Self {
        Self(degrees)
    }

    pub fn degrees(self) -> f64 {
        self.0
    }

    /// Parse right ascension from plain degrees or `<H>h<M>m<S>s`.
    pub fn parse_ra(raw: &str) -> ResolveResult<Self> {
        let raw = raw.trim();
        let degrees = match raw.parse::<f64>() {
            Ok(deg) => deg,
            Err(_) => {
                let (negative, h, m, s) = parse_sexagesimal(raw, 'h')
                    .ok_or_else(|| ResolveError::protocol(format!("unparsable RA '{}'", raw)))?;
                if negative || h >= 24.0 {
                    return Err(ResolveError::protocol(format!("RA out of range '{}'", raw)));
                }
                (h + m / 60.0 + s / 3600.0) * 15.0
            }
        };

        Self::ra(degrees)
    }

    /// Parse declination from plain degrees or `<sign><D>d<M>m<S>s`.
    pub fn parse_dec(raw: &str) -> ResolveResult<Self> {
        let raw = raw.trim();
        let degrees = match raw.parse::<f64>() {
            Ok(deg) => deg,
            Err(_) => {
                let (negative, d, m, s) = parse_sexagesimal(raw, 'd')
                    .ok_or_else(|| ResolveError::protocol(format!("unparsable Dec '{}'", raw)))?;
                let magnitude = d + m / 60.0 + s / 3600.0;
                if negative {
                    -magnitude
                } else {
                    magnitude
                }
            }
        };

        Self::dec(degrees)
    }

    /// Right ascension in `[0, 360]` degrees; 360 wraps to 0.
    pub fn ra(degrees: f64) -> ResolveResult<Self> {
        if !degrees.is_finite() || !(0.0..=360.0).contains(&degrees) {
            return Err(ResolveError::protocol(format!("RA out of range: {}", degrees)));
        }
        Ok(Self(if degrees == 360.0 { 0.0 } else { degrees }))
    }

    /// Declination in `[-90, 90]` degrees.
    pub fn dec(degrees: f64) -> ResolveResult<Self> {
        if !degrees.is_finite() || !(-90.0..=90.0).contains(&degrees) {
            return Err(ResolveError::protocol(format!("Dec out of range: {}", degrees)));
        }
        Ok(Self(degrees))
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

/// Which astrometric source a target resolves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Dso,
    Sso,
    Fixed,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Dso => "dso",
            ObjectKind::Sso => "sso",
            ObjectKind::Fixed => "fixed",
        }
    }
}

/// Object kinds that resolve by name through a catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogueKind {
    Dso,
    Sso,
}

impl From<CatalogueKind> for ObjectKind {
    fn from(kind: CatalogueKind) -> Self {
        match kind {
            CatalogueKind::Dso => ObjectKind::Dso,
            CatalogueKind::Sso => ObjectKind::Sso,
        }
    }
}

/// Which literal of the `resolve_request` flag field denotes an SSO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SsoFlag {
    #[default]
    TrueMeansSso,
    FalseMeansSso,
}

impl SsoFlag {
    /// Map the case-sensitive `True`/`False` field to an object kind.
    pub fn kind_for(self, raw: &str) -> ResolveResult<CatalogueKind> {
        let flag = match raw {
            "True" => true,
            "False" => false,
            other => {
                return Err(ResolveError::protocol(format!(
                    "object kind flag must be 'True' or 'False', got '{}'",
                    other
                )))
            }
        };
        let sso = match self {
            SsoFlag::TrueMeansSso => flag,
            SsoFlag::FalseMeansSso => !flag,
        };
        Ok(if sso {
            CatalogueKind::Sso
        } else {
            CatalogueKind::Dso
        })
    }
}

impl FromStr for SsoFlag {
    type Err = String;

    /// Parses the literal that denotes an SSO.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "True" => Ok(SsoFlag::TrueMeansSso),
            "False" => Ok(SsoFlag::FalseMeansSso),
            other => Err(format!("expected 'True' or 'False', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CelestialTarget {
    Dso { name: String },
    Sso { name: String },
    Fixed { name: String, ra: Angle, dec: Angle },
}

impl CelestialTarget {
    pub fn named(kind: CatalogueKind, name: String) -> Self {
        match kind {
            CatalogueKind::Dso => CelestialTarget::Dso { name },
            CatalogueKind::Sso => CelestialTarget::Sso { name },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CelestialTarget::Dso { name }
            | CelestialTarget::Sso { name }
            | CelestialTarget::Fixed { name, .. } => name,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            CelestialTarget::Dso { .. } => ObjectKind::Dso,
            CelestialTarget::Sso { .. } => ObjectKind::Sso,
            CelestialTarget::Fixed { .. } => ObjectKind::Fixed,
        }
    }
}

/// A validated, UTC time interval with `stop > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> ResolveResult<Self> {
        if stop <= start {
            return Err(ResolveError::TimeRange {
                start: format_timestamp(start),
                stop: format_timestamp(stop),
            });
        }
        Ok(Self { start, stop })
    }

    /// Parse and validate a raw start/stop pair.
    pub fn validate(start_raw: &str, stop_raw: &str) -> ResolveResult<Self> {
        let start = parse_timestamp(start_raw)?;
        let stop = parse_timestamp(stop_raw)?;
        Self::new(start, stop)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn stop(&self) -> DateTime<Utc> {
        self.stop
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.stop - self.start).num_seconds()
    }
}

/// A catalogue-fixed equatorial position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub ra: Angle,
    pub dec: Angle,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoordinateSample {
    pub timestamp: DateTime<Utc>,
    pub ra: Angle,
    pub dec: Angle,
}

/// Process-unique request identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub target: CelestialTarget,
    pub range: Option<TimeRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Solved,
    Generated,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Generated | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationJob {
    pub request_id: RequestId,
    pub filename: String,
    pub status: JobStatus,
}

/// Ground station used for the horizontal (Az/El) columns of the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observer {
    pub latitude: f64,
    pub longitude: f64,
    pub height_m: f64,
}

impl Default for Observer {
    /// RT2 radio telescope, Ondřejov.
    fn default() -> Self {
        Self {
            latitude: 49.908_598_050_618_35,
            longitude: 14.779_752_713_599_184,
            height_m: 512.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ra_plain_degrees() {
        assert_eq!(Angle::parse_ra("280").unwrap().degrees(), 280.0);
        assert_eq!(Angle::parse_ra("360").unwrap().degrees(), 0.0);
    }

    #[test]
    fn test_ra_sexagesimal() {
        let ra = Angle::parse_ra("18h36m56.3364s").unwrap();
        assert!((ra.degrees() - 279.234735).abs() < 1e-6);
    }

    #[test]
    fn test_ra_out_of_range() {
        assert!(Angle::parse_ra("361").is_err());
        assert!(Angle::parse_ra("-1").is_err());
        assert!(Angle::parse_ra("24h00m00s").is_err());
        assert!(Angle::parse_ra("abc").is_err());
    }

    #[test]
    fn test_dec_forms_agree() {
        let sexa = Angle::parse_dec("+38d47m01.280s").unwrap();
        let plain = Angle::parse_dec("38.783689").unwrap();
        assert!((sexa.degrees() - plain.degrees()).abs() < 1e-6);
    }

    #[test]
    fn test_dec_negative_zero_degrees() {
        let dec = Angle::parse_dec("-0d30m00s").unwrap();
        assert!((dec.degrees() + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_dec_out_of_range() {
        assert!(Angle::parse_dec("90.5").is_err());
        assert!(Angle::parse_dec("-91d00m00s").is_err());
    }

    #[test]
    fn test_sso_flag_mapping() {
        assert_eq!(SsoFlag::TrueMeansSso.kind_for("True").unwrap(), CatalogueKind::Sso);
        assert_eq!(SsoFlag::TrueMeansSso.kind_for("False").unwrap(), CatalogueKind::Dso);
        assert_eq!(SsoFlag::FalseMeansSso.kind_for("True").unwrap(), CatalogueKind::Dso);
        assert!(SsoFlag::TrueMeansSso.kind_for("true").is_err());
        assert_eq!("False".parse::<SsoFlag>().unwrap(), SsoFlag::FalseMeansSso);
    }

    #[test]
    fn test_named_targets_keep_their_kind() {
        let dso = CelestialTarget::named(CatalogueKind::Dso, "Vega".into());
        let sso = CelestialTarget::named(CatalogueKind::Sso, "Jupiter".into());
        assert_eq!(dso.kind(), ObjectKind::from(CatalogueKind::Dso));
        assert_eq!(sso.kind(), ObjectKind::Sso);
    }

    #[test]
    fn test_time_range_validate() {
        let range = TimeRange::validate("2021-07-14 08:41:00", "2021-07-14 9:00:00").unwrap();
        assert_eq!(range.duration_seconds(), 19 * 60);
        assert_eq!(
            range.start(),
            Utc.with_ymd_and_hms(2021, 7, 14, 8, 41, 0).unwrap()
        );
    }

    #[test]
    fn test_time_range_rejects_reversed_and_empty() {
        let err = TimeRange::validate("2021-07-14 09:00:00", "2021-07-14 08:41:00").unwrap_err();
        assert!(matches!(err, ResolveError::TimeRange { .. }));
        let err = TimeRange::validate("2021-07-14 09:00:00", "2021-07-14 09:00:00").unwrap_err();
        assert!(matches!(err, ResolveError::TimeRange { .. }));
    }

    #[test]
    fn test_time_range_parse_error_is_protocol() {
        let err = TimeRange::validate("yesterday", "2021-07-14 08:41:00").unwrap_err();
        assert!(matches!(err, ResolveError::Protocol(_)));
    }
}
