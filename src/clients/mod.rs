/// External catalogue clients module
use crate::config::HorizonsConfig;
use crate::domain::{Angle, CoordinateSample, Coordinates, TimeRange};
use crate::errors::{ResolveError, ResolveResult};
use crate::utils::format_timestamp;
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Static catalogue lookup for deep-sky objects.
#[async_trait]
pub trait DsoCatalogue: Send + Sync {
    async fn lookup_dso(&self, name: &str) -> ResolveResult<Coordinates>;
}

/// Time-aware ephemeris lookup for solar-system objects.
#[async_trait]
pub trait SsoCatalogue: Send + Sync {
    async fn lookup_sso(
        &self,
        name: &str,
        range: &TimeRange,
    ) -> ResolveResult<Vec<CoordinateSample>>;
}

/// Bound a catalogue call so a lookup that never returns becomes a failure.
pub async fn bounded<T, F>(timeout: Duration, catalogue: &str, fut: F) -> ResolveResult<T>
where
    F: Future<Output = ResolveResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ResolveError::CatalogueUnavailable(format!(
            "{} lookup timed out after {}s",
            catalogue,
            timeout.as_secs()
        ))),
    }
}

/// HTTP client wrapper with common configuration
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> ResolveResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("rust-ephem-service/1.0")
            .build()?;
        Ok(Self { client })
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}

/// SIMBAD name resolution through the CDS Sesame service
pub struct SimbadClient {
    http_client: HttpClient,
    base_url: String,
}

impl SimbadClient {
    pub fn new(base_url: String, timeout: Duration) -> ResolveResult<Self> {
        Ok(Self {
            http_client: HttpClient::new(timeout)?,
            base_url,
        })
    }
}

#[async_trait]
impl DsoCatalogue for SimbadClient {
    async fn lookup_dso(&self, name: &str) -> ResolveResult<Coordinates> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ResolveError::CatalogueUnavailable(format!("invalid SIMBAD url: {}", e))
        })?;
        url.set_query(Some(name));

        let resp = self.http_client.get_client().get(url).send().await?;
        if !resp.status().is_success() {
            return Err(ResolveError::CatalogueUnavailable(format!(
                "SIMBAD request failed with status {}",
                resp.status()
            )));
        }

        let body = resp.text().await?;
        debug!(name, "SIMBAD responded with {} bytes", body.len());
        parse_sesame(name, &body)
    }
}

/// Extract the J2000 position from Sesame's plain-text output.
pub fn parse_sesame(name: &str, body: &str) -> ResolveResult<Coordinates> {
    for line in body.lines() {
        let Some(rest) = line.strip_prefix("%J") else {
            continue;
        };
        let mut fields = rest.split_whitespace();
        let (Some(ra), Some(dec)) = (fields.next(), fields.next()) else {
            continue;
        };
        let coords = Angle::parse_ra(ra).and_then(|ra| Ok((ra, Angle::parse_dec(dec)?)));
        return match coords {
            Ok((ra, dec)) => Ok(Coordinates { ra, dec }),
            Err(e) => Err(ResolveError::DsoNotFound {
                name: name.to_string(),
                detail: format!("unusable SIMBAD position: {}", e),
            }),
        };
    }

    let detail = body
        .lines()
        .filter(|line| line.starts_with("#!"))
        .collect::<Vec<_>>()
        .join("\n");

    if !detail.is_empty() {
        return Err(ResolveError::DsoNotFound {
            name: name.to_string(),
            detail,
        });
    }
    // A finished Sesame answer with no position is a miss; anything else
    // did not come from the resolver.
    if body.lines().any(|line| line.starts_with("#====Done")) {
        return Err(ResolveError::DsoNotFound {
            name: name.to_string(),
            detail: format!("'{}' not resolved by SIMBAD", name),
        });
    }
    Err(ResolveError::CatalogueUnavailable(
        "unrecognised SIMBAD response".to_string(),
    ))
}

#[derive(Debug, Deserialize)]
struct HorizonsResponse {
    result: Option<String>,
    error: Option<String>,
}

/// JPL Horizons observer-ephemeris client
pub struct HorizonsClient {
    http_client: HttpClient,
    config: HorizonsConfig,
}

impl HorizonsClient {
    pub fn new(config: HorizonsConfig, timeout: Duration) -> ResolveResult<Self> {
        Ok(Self {
            http_client: HttpClient::new(timeout)?,
            config,
        })
    }

    /// Number of equal ephemeris intervals to request, at most one per second.
    fn intervals(&self, range: &TimeRange) -> u64 {
        let duration = range.duration_seconds().max(1) as u64;
        self.config.max_lines.min(duration).max(1)
    }
}

#[async_trait]
impl SsoCatalogue for HorizonsClient {
    async fn lookup_sso(
        &self,
        name: &str,
        range: &TimeRange,
    ) -> ResolveResult<Vec<CoordinateSample>> {
        let command = format!("'{}'", horizons_command(name));
        let center = format!("'{}'", self.config.location);
        let start = format!("'{}'", format_timestamp(range.start()));
        let stop = format!("'{}'", format_timestamp(range.stop()));
        let step = format!("'{}'", self.intervals(range));

        let resp = self
            .http_client
            .get_client()
            .get(&self.config.url)
            .query(&[
                ("format", "json"),
                ("COMMAND", command.as_str()),
                ("OBJ_DATA", "'NO'"),
                ("MAKE_EPHEM", "'YES'"),
                ("EPHEM_TYPE", "'OBSERVER'"),
                ("CENTER", center.as_str()),
                ("START_TIME", start.as_str()),
                ("STOP_TIME", stop.as_str()),
                ("STEP_SIZE", step.as_str()),
                ("QUANTITIES", "'1'"),
                ("ANG_FORMAT", "'DEG'"),
                ("CSV_FORMAT", "'YES'"),
                ("TIME_DIGITS", "'SECONDS'"),
            ])
            .send()
            .await?;

        // Horizons reports lookup problems in the JSON body, often with 400.
        let status = resp.status();
        let text = resp.text().await?;
        debug!(name, "Horizons responded with {} bytes", text.len());
        match serde_json::from_str::<HorizonsResponse>(&text) {
            Ok(body) => horizons_result(name, body),
            Err(e) if !status.is_success() => Err(ResolveError::CatalogueUnavailable(format!(
                "Horizons request failed with status {}: {}",
                status, e
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

/// Map a decoded Horizons body to samples. The `error` field is passed
/// through verbatim.
fn horizons_result(name: &str, body: HorizonsResponse) -> ResolveResult<Vec<CoordinateSample>> {
    if let Some(error) = body.error {
        return Err(ResolveError::SsoNotFound {
            name: name.to_string(),
            detail: error.trim().to_string(),
        });
    }
    parse_horizons(name, &body.result.unwrap_or_default())
}

/// Map well-known major bodies to their Horizons ids.
pub fn horizons_command(name: &str) -> String {
    let id = match name.trim().to_lowercase().as_str() {
        "mercury" => Some(199),
        "venus" => Some(299),
        "moon" => Some(301),
        "mars" => Some(499),
        "jupiter" => Some(599),
        "saturn" => Some(699),
        "uranus" => Some(799),
        "neptune" => Some(899),
        _ => None,
    };
    id.map(|id| id.to_string())
        .unwrap_or_else(|| name.trim().to_string())
}

/// Parse the CSV rows between `$$SOE` and `$$EOE`.
pub fn parse_horizons(name: &str, result: &str) -> ResolveResult<Vec<CoordinateSample>> {
    let not_found = |detail: String| ResolveError::SsoNotFound {
        name: name.to_string(),
        detail,
    };

    let Some((_, tail)) = result.split_once("$$SOE") else {
        return Err(not_found(result.trim().to_string()));
    };
    let table = tail.split_once("$$EOE").map_or(tail, |(rows, _)| rows);

    let mut samples = Vec::new();
    for row in table.lines().map(str::trim).filter(|r| !r.is_empty()) {
        let mut fields = row.split(',').map(str::trim);
        let stamp = fields.next().unwrap_or_default();
        let timestamp = NaiveDateTime::parse_from_str(stamp, "%Y-%b-%d %H:%M:%S%.f")
            .map(|ndt| Utc.from_utc_datetime(&ndt))
            .map_err(|e| not_found(format!("unreadable ephemeris time '{}': {}", stamp, e)))?;

        // Presence flags are non-numeric; RA and Dec are the first two numbers.
        let mut numbers = fields.filter_map(|f| f.parse::<f64>().ok());
        let (Some(ra), Some(dec)) = (numbers.next(), numbers.next()) else {
            return Err(not_found(format!("incomplete ephemeris row '{}'", row)));
        };

        samples.push(CoordinateSample {
            timestamp,
            ra: Angle::ra(ra).map_err(|e| not_found(e.to_string()))?,
            dec: Angle::dec(dec).map_err(|e| not_found(e.to_string()))?,
        });
    }

    if samples.is_empty() {
        return Err(not_found("Horizons returned an empty ephemeris".to_string()));
    }
    Ok(samples)
}
