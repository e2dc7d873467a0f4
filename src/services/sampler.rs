/// Coordinate sampling across a request's time range
use crate::clients::{bounded, DsoCatalogue, SsoCatalogue};
use crate::domain::{Angle, CelestialTarget, CoordinateSample, Coordinates, Request, TimeRange};
use crate::errors::{ResolveError, ResolveResult};
use crate::utils::{format_timestamp, interpolate_ra, lerp};
use chrono::{DateTime, Duration as TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct EphemerisSampler {
    dso: Arc<dyn DsoCatalogue>,
    sso: Arc<dyn SsoCatalogue>,
    lookup_timeout: Duration,
    tolerance: TimeDelta,
}

impl EphemerisSampler {
    pub fn new(
        dso: Arc<dyn DsoCatalogue>,
        sso: Arc<dyn SsoCatalogue>,
        lookup_timeout: Duration,
        tolerance_seconds: u64,
    ) -> Self {
        Self {
            dso,
            sso,
            lookup_timeout,
            tolerance: TimeDelta::seconds(tolerance_seconds as i64),
        }
    }

    /// Resolve a request's target to its coordinate samples.
    ///
    /// DSO and fixed targets yield exactly one sample. SSO targets yield the
    /// catalogue's full, time-ordered sequence covering the range.
    pub async fn sample(&self, request: &Request) -> ResolveResult<Vec<CoordinateSample>> {
        let at = request.range.map_or_else(Utc::now, |r| r.start());
        match &request.target {
            CelestialTarget::Fixed { ra, dec, .. } => Ok(fixed(
                Coordinates { ra: *ra, dec: *dec },
                at,
            )),
            CelestialTarget::Dso { name } => {
                let coords =
                    bounded(self.lookup_timeout, "SIMBAD", self.dso.lookup_dso(name)).await?;
                debug!(request_id = %request.id, name = %name, "DSO resolved");
                Ok(fixed(coords, at))
            }
            CelestialTarget::Sso { name } => {
                let range = request.range.ok_or_else(|| ResolveError::SsoNotFound {
                    name: name.clone(),
                    detail: "solar-system lookup requires a time range".to_string(),
                })?;
                let samples = bounded(
                    self.lookup_timeout,
                    "Horizons",
                    self.sso.lookup_sso(name, &range),
                )
                .await?;
                debug!(request_id = %request.id, name = %name, count = samples.len(), "SSO ephemeris received");
                check_coverage(name, samples, &range, self.tolerance)
            }
        }
    }
}

/// A catalogue-fixed position is constant over the interval.
pub fn fixed(coords: Coordinates, at: DateTime<Utc>) -> Vec<CoordinateSample> {
    vec![CoordinateSample {
        timestamp: at,
        ra: coords.ra,
        dec: coords.dec,
    }]
}

/// Reject sequences that are empty, unordered, or fail to span the range.
pub fn check_coverage(
    name: &str,
    samples: Vec<CoordinateSample>,
    range: &TimeRange,
    tolerance: TimeDelta,
) -> ResolveResult<Vec<CoordinateSample>> {
    let not_found = |detail: String| ResolveError::SsoNotFound {
        name: name.to_string(),
        detail,
    };

    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Err(not_found("catalogue returned no ephemeris samples".to_string()));
    };

    if let Some(pair) = samples
        .windows(2)
        .find(|pair| pair[1].timestamp <= pair[0].timestamp)
    {
        return Err(not_found(format!(
            "ephemeris samples out of order at {}",
            format_timestamp(pair[1].timestamp)
        )));
    }

    if first.timestamp > range.start() + tolerance || last.timestamp < range.stop() - tolerance {
        return Err(not_found(format!(
            "ephemeris spans {} to {}, requested {} to {}",
            format_timestamp(first.timestamp),
            format_timestamp(last.timestamp),
            format_timestamp(range.start()),
            format_timestamp(range.stop()),
        )));
    }

    Ok(samples)
}

/// Output grid `[start, stop)` at a fixed step.
pub fn time_grid(range: &TimeRange, step_seconds: u64) -> impl Iterator<Item = DateTime<Utc>> {
    let step = TimeDelta::seconds(step_seconds.max(1) as i64);
    let stop = range.stop();
    std::iter::successors(Some(range.start()), move |t| Some(*t + step))
        .take_while(move |t| *t < stop)
}

/// Linearly interpolate samples onto the given instants, lazily. Instants
/// outside the sampled span take the nearest endpoint.
pub fn resample<'a, I>(
    samples: &'a [CoordinateSample],
    instants: I,
) -> impl Iterator<Item = CoordinateSample> + 'a
where
    I: IntoIterator<Item = DateTime<Utc>>,
    I::IntoIter: 'a,
{
    let mut segment = 0;
    instants.into_iter().filter_map(move |t| {
        let first = samples.first()?;
        while segment + 1 < samples.len() && samples[segment + 1].timestamp <= t {
            segment += 1;
        }
        let a = &samples[segment];
        let (ra, dec) = match samples.get(segment + 1) {
            _ if t <= first.timestamp => (first.ra, first.dec),
            Some(b) => {
                let span = (b.timestamp - a.timestamp).num_milliseconds() as f64;
                let frac = (t - a.timestamp).num_milliseconds() as f64 / span;
                (
                    Angle::from_degrees(interpolate_ra(a.ra.degrees(), b.ra.degrees(), frac)),
                    Angle::from_degrees(lerp(a.dec.degrees(), b.dec.degrees(), frac)),
                )
            }
            None => (a.ra, a.dec),
        };
        Some(CoordinateSample {
            timestamp: t,
            ra,
            dec,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CatalogueKind, RequestId};
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct Catalogue;

    #[async_trait]
    impl DsoCatalogue for Catalogue {
        async fn lookup_dso(&self, _name: &str) -> ResolveResult<Coordinates> {
            Ok(Coordinates {
                ra: Angle::from_degrees(279.23473479),
                dec: Angle::from_degrees(38.78368896),
            })
        }
    }

    #[async_trait]
    impl SsoCatalogue for Catalogue {
        async fn lookup_sso(
            &self,
            _name: &str,
            range: &TimeRange,
        ) -> ResolveResult<Vec<CoordinateSample>> {
            Ok(vec![
                sample(range.stop(), 11.0, 1.0),
                sample(range.start(), 10.0, 0.0),
            ])
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 7, 14, h, m, s).unwrap()
    }

    fn sample(t: DateTime<Utc>, ra: f64, dec: f64) -> CoordinateSample {
        CoordinateSample {
            timestamp: t,
            ra: Angle::from_degrees(ra),
            dec: Angle::from_degrees(dec),
        }
    }

    fn range() -> TimeRange {
        TimeRange::new(at(8, 41, 0), at(9, 0, 0)).unwrap()
    }

    fn sampler() -> EphemerisSampler {
        let catalogue = Arc::new(Catalogue);
        EphemerisSampler::new(catalogue.clone(), catalogue, Duration::from_secs(1), 60)
    }

    #[tokio::test]
    async fn test_dso_yields_single_sample() {
        let request = Request {
            id: RequestId(1),
            target: CelestialTarget::named(CatalogueKind::Dso, "Vega".into()),
            range: Some(range()),
        };
        let samples = sampler().sample(&request).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp, at(8, 41, 0));
    }

    #[tokio::test]
    async fn test_sso_rejects_unordered_catalogue_output() {
        let request = Request {
            id: RequestId(2),
            target: CelestialTarget::named(CatalogueKind::Sso, "Jupiter".into()),
            range: Some(range()),
        };
        let err = sampler().sample(&request).await.unwrap_err();
        assert!(matches!(err, ResolveError::SsoNotFound { .. }));
    }

    #[test]
    fn test_coverage_accepts_spanning_sequence() {
        let samples = vec![
            sample(at(8, 41, 0), 10.0, 0.0),
            sample(at(8, 50, 0), 10.5, 0.5),
            sample(at(9, 0, 0), 11.0, 1.0),
        ];
        let checked = check_coverage("Mars", samples, &range(), TimeDelta::seconds(60)).unwrap();
        assert!(checked.windows(2).all(|p| p[0].timestamp < p[1].timestamp));
    }

    #[test]
    fn test_coverage_rejects_short_and_empty() {
        let short = vec![
            sample(at(8, 41, 0), 10.0, 0.0),
            sample(at(8, 50, 0), 10.5, 0.5),
        ];
        assert!(check_coverage("Mars", short, &range(), TimeDelta::seconds(60)).is_err());
        assert!(check_coverage("Mars", Vec::new(), &range(), TimeDelta::seconds(60)).is_err());
    }

    #[test]
    fn test_time_grid_is_half_open() {
        let grid: Vec<_> = time_grid(&range(), 60).collect();
        assert_eq!(grid.len(), 19);
        assert_eq!(grid[0], at(8, 41, 0));
        assert_eq!(grid[18], at(8, 59, 0));
    }

    #[test]
    fn test_resample_interpolates_and_clamps() {
        let samples = vec![
            sample(at(8, 41, 0), 359.0, 0.0),
            sample(at(8, 43, 0), 1.0, 2.0),
        ];
        let out: Vec<_> = resample(&samples, [at(8, 40, 0), at(8, 42, 0), at(8, 44, 0)]).collect();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].ra.degrees(), 359.0);
        assert!(out[1].ra.degrees() < 1e-9 || (out[1].ra.degrees() - 360.0).abs() < 1e-9);
        assert!((out[1].dec.degrees() - 1.0).abs() < 1e-12);
        assert_eq!(out[2].ra.degrees(), 1.0);
        assert_eq!(resample(&[], [at(8, 40, 0)]).count(), 0);
    }
}
