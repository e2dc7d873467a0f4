/// Artifact repository: filename reservation, job arena and file output
use crate::config::SamplingConfig;
use crate::domain::{
    CelestialTarget, CoordinateSample, GenerationJob, JobStatus, Observer, Request, RequestId,
};
use crate::errors::{ResolveError, ResolveResult};
use crate::services::sampler::{resample, time_grid};
use crate::utils::{filename_timestamp, format_timestamp, horizontal};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Outcome of a `generate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    Written(String),
    AlreadyGenerated,
}

struct JobEntry {
    job: GenerationJob,
    writing: bool,
}

/// Deterministic, collision-free artifact name for a request.
pub fn reserve_filename(request: &Request) -> String {
    let name: String = request
        .target
        .name()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let name = match name.trim_matches('.') {
        "" => "target",
        trimmed => trimmed,
    };

    match request.range {
        Some(range) => format!(
            "{}_{}_{}.txt",
            name,
            filename_timestamp(range.start()),
            request.id
        ),
        None => format!("{}_{}.txt", name, request.id),
    }
}

#[derive(Serialize)]
struct ArtifactHeader<'a> {
    request_id: RequestId,
    target: &'a str,
    kind: &'static str,
    start: Option<String>,
    stop: Option<String>,
    samples: usize,
    step_seconds: u64,
    observer: &'a Observer,
}

/// Owns generation jobs and writes one artifact per request.
pub struct FileGenerator {
    output_dir: PathBuf,
    sampling: SamplingConfig,
    observer: Observer,
    jobs: Mutex<HashMap<RequestId, JobEntry>>,
}

impl FileGenerator {
    pub fn new(output_dir: PathBuf, sampling: SamplingConfig, observer: Observer) -> Self {
        Self {
            output_dir,
            sampling,
            observer,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<RequestId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a pending job for the request and return its filename.
    pub fn reserve(&self, request: &Request) -> ResolveResult<String> {
        let filename = reserve_filename(request);
        let mut jobs = self.jobs();
        if jobs.contains_key(&request.id) {
            return Err(ResolveError::Generation(format!(
                "request {} already has a reservation",
                request.id
            )));
        }
        jobs.insert(
            request.id,
            JobEntry {
                job: GenerationJob {
                    request_id: request.id,
                    filename: filename.clone(),
                    status: JobStatus::Pending,
                },
                writing: false,
            },
        );
        debug!(request_id = %request.id, filename = %filename, "filename reserved");
        Ok(filename)
    }

    pub fn job(&self, id: RequestId) -> Option<GenerationJob> {
        self.jobs().get(&id).map(|entry| entry.job.clone())
    }

    pub fn mark_solved(&self, id: RequestId) -> ResolveResult<()> {
        self.transition(id, JobStatus::Pending, JobStatus::Solved)
    }

    /// Move a non-terminal job to `Failed`. Terminal jobs are left alone.
    pub fn mark_failed(&self, id: RequestId) {
        if let Some(entry) = self.jobs().get_mut(&id) {
            if !entry.job.status.is_terminal() {
                entry.job.status = JobStatus::Failed;
            }
        }
    }

    /// Drop the job once its request has emitted a terminal event.
    pub fn release(&self, id: RequestId) -> Option<GenerationJob> {
        self.jobs().remove(&id).map(|entry| entry.job)
    }

    fn transition(&self, id: RequestId, from: JobStatus, to: JobStatus) -> ResolveResult<()> {
        let mut jobs = self.jobs();
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| ResolveError::Generation(format!("no job for request {}", id)))?;
        if entry.job.status != from {
            return Err(ResolveError::Generation(format!(
                "job {} is {:?}, expected {:?}",
                id, entry.job.status, from
            )));
        }
        entry.job.status = to;
        Ok(())
    }

    /// Write the artifact for a solved job. A job that is already generated
    /// is not written again.
    pub async fn generate(
        &self,
        request: &Request,
        samples: &[CoordinateSample],
    ) -> ResolveResult<Generation> {
        let filename = {
            let mut jobs = self.jobs();
            let entry = jobs.get_mut(&request.id).ok_or_else(|| {
                ResolveError::Generation(format!("no job for request {}", request.id))
            })?;
            match entry.job.status {
                JobStatus::Generated => return Ok(Generation::AlreadyGenerated),
                JobStatus::Solved if !entry.writing => {}
                JobStatus::Solved => {
                    return Err(ResolveError::Generation(format!(
                        "artifact for request {} is already being written",
                        request.id
                    )))
                }
                status => {
                    return Err(ResolveError::Generation(format!(
                        "job {} is {:?}, expected Solved",
                        request.id, status
                    )))
                }
            }
            entry.writing = true;
            entry.job.filename.clone()
        };

        let result = self.write_artifact(&filename, request, samples).await;

        let mut jobs = self.jobs();
        if let Some(entry) = jobs.get_mut(&request.id) {
            entry.writing = false;
            entry.job.status = if result.is_ok() {
                JobStatus::Generated
            } else {
                JobStatus::Failed
            };
        }
        drop(jobs);

        result.map(|rows| {
            info!(request_id = %request.id, filename = %filename, rows, "artifact written");
            Generation::Written(filename)
        })
    }

    async fn write_artifact(
        &self,
        filename: &str,
        request: &Request,
        samples: &[CoordinateSample],
    ) -> ResolveResult<usize> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(filename);
        let partial = self.output_dir.join(format!("{}.part", filename));

        let artifact = Artifact {
            request: request.clone(),
            samples: samples.to_vec(),
            step_seconds: self.sampling.step_seconds,
            observer: self.observer,
        };
        // CPU-bound and unbounded in length: runs on the blocking pool.
        let target = partial.clone();
        let written = tokio::task::spawn_blocking(move || artifact.write(&target))
            .await
            .map_err(|e| ResolveError::Generation(format!("artifact writer failed: {}", e)))
            .and_then(|result| result);

        match written {
            Ok(rows) => {
                tokio::fs::rename(&partial, &path).await?;
                Ok(rows)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), error = %cleanup, "no partial artifact to remove");
                }
                Err(e)
            }
        }
    }
}

/// Everything needed to render one artifact away from the job arena.
struct Artifact {
    request: Request,
    samples: Vec<CoordinateSample>,
    step_seconds: u64,
    observer: Observer,
}

impl Artifact {
    /// Stream a metadata header line, then `time RA Dec Az El` rows, into
    /// `path`. Returns the number of rows written.
    fn write(&self, path: &Path) -> ResolveResult<usize> {
        let Some(first) = self.samples.first().copied() else {
            return Err(ResolveError::Generation(format!(
                "no coordinate samples for request {}",
                self.request.id
            )));
        };

        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "# {}", self.header()?)?;

        let step = self.step_seconds;
        let rows = match (&self.request.target, self.request.range) {
            (CelestialTarget::Sso { .. }, Some(range)) => {
                self.write_rows(&mut out, resample(&self.samples, time_grid(&range, step)))?
            }
            (_, Some(range)) => self.write_rows(
                &mut out,
                time_grid(&range, step).map(move |t| CoordinateSample {
                    timestamp: t,
                    ..first
                }),
            )?,
            (_, None) => self.write_rows(&mut out, self.samples.iter().copied())?,
        };

        out.flush()?;
        Ok(rows)
    }

    fn header(&self) -> ResolveResult<String> {
        let header = ArtifactHeader {
            request_id: self.request.id,
            target: self.request.target.name(),
            kind: self.request.target.kind().as_str(),
            start: self.request.range.map(|r| format_timestamp(r.start())),
            stop: self.request.range.map(|r| format_timestamp(r.stop())),
            samples: self.samples.len(),
            step_seconds: self.step_seconds,
            observer: &self.observer,
        };
        serde_json::to_string(&header).map_err(|e| ResolveError::Generation(e.to_string()))
    }

    fn write_rows<W, I>(&self, out: &mut W, rows: I) -> io::Result<usize>
    where
        W: Write,
        I: Iterator<Item = CoordinateSample>,
    {
        let mut count = 0;
        for row in rows {
            let (az, el) = horizontal(row.ra, row.dec, row.timestamp, &self.observer);
            writeln!(
                out,
                "{} {} {} {:.6} {:.6}",
                format_timestamp(row.timestamp),
                row.ra,
                row.dec,
                az,
                el
            )?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Angle, TimeRange};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::Instant;

    fn request(id: u64, target: CelestialTarget) -> Request {
        Request {
            id: RequestId(id),
            target,
            range: Some(
                TimeRange::validate("2021-07-14 08:41:00", "2021-07-14 08:42:00").unwrap(),
            ),
        }
    }

    fn vega() -> CelestialTarget {
        CelestialTarget::Dso {
            name: "Vega".to_string(),
        }
    }

    fn samples() -> Vec<CoordinateSample> {
        vec![CoordinateSample {
            timestamp: TimeRange::validate("2021-07-14 08:41:00", "2021-07-14 08:42:00")
                .unwrap()
                .start(),
            ra: Angle::from_degrees(279.23473479),
            dec: Angle::from_degrees(38.78368896),
        }]
    }

    fn generator(dir: &TempDir) -> FileGenerator {
        FileGenerator::new(
            dir.path().to_path_buf(),
            SamplingConfig::default(),
            Observer::default(),
        )
    }

    #[test]
    fn test_reserve_filename_is_deterministic_and_unique() {
        let a = request(1, vega());
        let b = request(2, vega());
        assert_eq!(reserve_filename(&a), "Vega_2021-07-14_08-41-00_1.txt");
        assert_eq!(reserve_filename(&a), reserve_filename(&a));
        assert_ne!(reserve_filename(&a), reserve_filename(&b));
    }

    #[test]
    fn test_reserve_filename_sanitises_name() {
        let target = CelestialTarget::Dso {
            name: "Sgr A*/../x".to_string(),
        };
        let filename = reserve_filename(&request(3, target));
        assert!(!filename.contains('/'));
        assert!(filename.starts_with("Sgr_A__.._x_2021-07-14"));
    }

    #[test]
    fn test_reserve_twice_fails() {
        let dir = TempDir::new().unwrap();
        let generator = generator(&dir);
        let req = request(1, vega());
        generator.reserve(&req).unwrap();
        assert!(generator.reserve(&req).is_err());
        assert_eq!(generator.job(req.id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_generate_requires_solved_job() {
        let dir = TempDir::new().unwrap();
        let generator = generator(&dir);
        let req = request(1, vega());
        assert!(generator.generate(&req, &samples()).await.is_err());
        generator.reserve(&req).unwrap();
        assert!(generator.generate(&req, &samples()).await.is_err());
    }

    #[tokio::test]
    async fn test_generate_writes_once() {
        let dir = TempDir::new().unwrap();
        let generator = generator(&dir);
        let req = request(1, vega());
        let filename = generator.reserve(&req).unwrap();
        generator.mark_solved(req.id).unwrap();

        let first = generator.generate(&req, &samples()).await.unwrap();
        assert_eq!(first, Generation::Written(filename.clone()));
        let path = dir.path().join(&filename);
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();

        let second = generator.generate(&req, &samples()).await.unwrap();
        assert_eq!(second, Generation::AlreadyGenerated);
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), modified);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(generator.job(req.id).unwrap().status, JobStatus::Generated);
    }

    #[tokio::test]
    async fn test_artifact_contents() {
        let dir = TempDir::new().unwrap();
        let generator = generator(&dir);
        let req = request(4, vega());
        let filename = generator.reserve(&req).unwrap();
        generator.mark_solved(req.id).unwrap();
        generator.generate(&req, &samples()).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join(filename)).unwrap();
        let mut lines = content.lines();
        let header: serde_json::Value =
            serde_json::from_str(lines.next().unwrap().trim_start_matches("# ")).unwrap();
        assert_eq!(header["target"], "Vega");
        assert_eq!(header["kind"], "dso");
        assert_eq!(header["start"], "2021-07-14 08:41:00");
        assert_eq!(header["samples"], 1);

        let rows: Vec<&str> = lines.collect();
        assert_eq!(rows.len(), 60);
        assert!(rows[0].starts_with("2021-07-14 08:41:00 279.234735 38.783689 "));
        assert!(rows[59].starts_with("2021-07-14 08:41:59 "));
        assert_eq!(rows[0].split_whitespace().count(), 6);
    }

    #[tokio::test]
    async fn test_long_range_does_not_stall_runtime() {
        let dir = TempDir::new().unwrap();
        let generator = generator(&dir);
        let range = TimeRange::validate("2021-07-01 00:00:00", "2021-07-06 00:00:00").unwrap();
        let req = Request {
            id: RequestId(6),
            target: CelestialTarget::Fixed {
                name: "Long".to_string(),
                ra: Angle::from_degrees(280.0),
                dec: Angle::from_degrees(40.0),
            },
            range: Some(range),
        };
        let filename = generator.reserve(&req).unwrap();
        generator.mark_solved(req.id).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let ticker = tokio::spawn({
            let done = done.clone();
            async move {
                let mut worst = Duration::ZERO;
                let mut last = Instant::now();
                while !done.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    let now = Instant::now();
                    worst = worst.max(now - last);
                    last = now;
                }
                worst
            }
        });

        let samples = vec![CoordinateSample {
            timestamp: range.start(),
            ra: Angle::from_degrees(280.0),
            dec: Angle::from_degrees(40.0),
        }];
        let outcome = generator.generate(&req, &samples).await.unwrap();
        done.store(true, Ordering::SeqCst);
        let worst = ticker.await.unwrap();

        assert_eq!(outcome, Generation::Written(filename.clone()));
        assert!(worst < Duration::from_millis(250), "runtime stalled for {:?}", worst);
        let content = std::fs::read_to_string(dir.path().join(filename)).unwrap();
        assert_eq!(content.lines().count(), 1 + 5 * 86_400);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let generator = generator(&dir);
        let req = request(7, vega());
        generator.reserve(&req).unwrap();
        generator.mark_solved(req.id).unwrap();

        assert!(generator.generate(&req, &[]).await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(generator.job(req.id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_release_discards_job() {
        let dir = TempDir::new().unwrap();
        let generator = generator(&dir);
        let req = request(5, vega());
        generator.reserve(&req).unwrap();
        generator.mark_failed(req.id);
        assert_eq!(generator.release(req.id).unwrap().status, JobStatus::Failed);
        assert!(generator.job(req.id).is_none());
    }
}
