/// Request classification: typed requests from decoded commands
use crate::domain::{Angle, CelestialTarget, ObjectKind, Request, RequestId, SsoFlag, TimeRange};
use crate::errors::ResolveResult;
use crate::protocol::Command;

/// Where a request's coordinates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Name lookup in the catalogue for the given kind.
    Catalogue(ObjectKind),
    /// Coordinates supplied by the caller.
    Direct,
}

impl Route {
    pub fn of(request: &Request) -> Self {
        match request.target {
            CelestialTarget::Fixed { .. } => Route::Direct,
            ref target => Route::Catalogue(target.kind()),
        }
    }
}

/// Build a typed request from a decoded command.
///
/// The object kind comes from the explicit flag field, never from the name.
/// Performs no I/O.
pub fn route(command: Command, id: RequestId, sso_flag: SsoFlag) -> ResolveResult<Request> {
    match command {
        Command::Resolve {
            name,
            start,
            stop,
            flag,
        } => {
            let kind = sso_flag.kind_for(&flag)?;
            let range = TimeRange::validate(&start, &stop)?;
            Ok(Request {
                id,
                target: CelestialTarget::named(kind, name.trim().to_string()),
                range: Some(range),
            })
        }
        Command::PushRaDec {
            ra,
            dec,
            start,
            stop,
            name,
        } => {
            let ra = Angle::parse_ra(&ra)?;
            let dec = Angle::parse_dec(&dec)?;
            let range = TimeRange::validate(&start, &stop)?;
            let name = match name.trim() {
                "" => format!("{}_{}", ra, dec),
                named => named.to_string(),
            };
            Ok(Request {
                id,
                target: CelestialTarget::Fixed { name, ra, dec },
                range: Some(range),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ResolveError;
    use crate::protocol::decode;

    fn routed(payload: &str) -> ResolveResult<Request> {
        route(decode(payload)?, RequestId(7), SsoFlag::default())
    }

    #[test]
    fn test_route_dso_request() {
        let request =
            routed("resolve_request\nVega\n2021-07-14 08:41:00\n2021-07-14 9:00:00\nFalse").unwrap();
        assert_eq!(request.id, RequestId(7));
        assert_eq!(
            request.target,
            CelestialTarget::Dso {
                name: "Vega".to_string()
            }
        );
        assert_eq!(Route::of(&request), Route::Catalogue(ObjectKind::Dso));
    }

    #[test]
    fn test_route_sso_request() {
        let request =
            routed("resolve_request\nJupiter\n2021-07-14 08:41:00\n2021-07-14 9:00:00\nTrue")
                .unwrap();
        assert_eq!(Route::of(&request), Route::Catalogue(ObjectKind::Sso));
    }

    #[test]
    fn test_route_push_is_direct() {
        let request = routed(
            "pushing_ra_dec\n280\n40\n2021-07-14 08:41:00\n2021-07-14 9:00:00\nMyRadioSourceName",
        )
        .unwrap();
        assert_eq!(Route::of(&request), Route::Direct);
        match request.target {
            CelestialTarget::Fixed { name, ra, dec } => {
                assert_eq!(name, "MyRadioSourceName");
                assert_eq!(ra.degrees(), 280.0);
                assert_eq!(dec.degrees(), 40.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_route_push_accepts_sexagesimal() {
        let request = routed(
            "pushing_ra_dec\n18h40m00s\n+40d00m00s\n2021-07-14 08:41:00\n2021-07-14 9:00:00\nSrc",
        )
        .unwrap();
        match request.target {
            CelestialTarget::Fixed { ra, dec, .. } => {
                assert!((ra.degrees() - 280.0).abs() < 1e-9);
                assert!((dec.degrees() - 40.0).abs() < 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_route_rejects_bad_flag() {
        let err = routed("resolve_request\nVega\n2021-07-14 08:41:00\n2021-07-14 9:00:00\ntrue")
            .unwrap_err();
        assert!(matches!(err, ResolveError::Protocol(_)));
    }

    #[test]
    fn test_route_reversed_range() {
        let err = routed("resolve_request\nVega\n2021-07-14 09:00:00\n2021-07-14 08:41:00\nFalse")
            .unwrap_err();
        assert!(matches!(err, ResolveError::TimeRange { .. }));
    }
}
