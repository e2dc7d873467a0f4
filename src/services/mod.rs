/// Request resolution service and per-request state machine
pub mod sampler;

use crate::domain::{CelestialTarget, CoordinateSample, Request, RequestId, SsoFlag};
use crate::errors::{ResolveError, ResolveResult};
use crate::protocol::{decode, frame_text, Event, Solution};
use crate::repo::{FileGenerator, Generation};
use crate::routes::{route, Route};
use sampler::EphemerisSampler;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Lifecycle of one request. Moves strictly forward; any non-terminal
/// state may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Received,
    FilenameExpected,
    CoordinatesSolved,
    OutputGenerated,
    Failed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Received => "received",
            SessionState::FilenameExpected => "filename_expected",
            SessionState::CoordinatesSolved => "coordinates_solved",
            SessionState::OutputGenerated => "output_generated",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::OutputGenerated | SessionState::Failed)
    }

    fn successor(self) -> Option<SessionState> {
        match self {
            SessionState::Received => Some(SessionState::FilenameExpected),
            SessionState::FilenameExpected => Some(SessionState::CoordinatesSolved),
            SessionState::CoordinatesSolved => Some(SessionState::OutputGenerated),
            SessionState::OutputGenerated | SessionState::Failed => None,
        }
    }

    /// Validate a transition without performing it.
    pub fn advance(self, next: SessionState) -> ResolveResult<SessionState> {
        let allowed = match next {
            SessionState::Failed => !self.is_terminal(),
            next => self.successor() == Some(next),
        };
        if allowed {
            Ok(next)
        } else {
            Err(ResolveError::InvalidTransition {
                from: self.name(),
                to: next.name(),
            })
        }
    }
}

/// One request's state plus its event channel back to the caller.
pub struct Session {
    id: RequestId,
    state: SessionState,
    events: UnboundedSender<Event>,
}

impl Session {
    pub fn new(id: RequestId, events: UnboundedSender<Event>) -> Self {
        Self {
            id,
            state: SessionState::Received,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Enter the next state and emit the event that announces it.
    fn enter(&mut self, next: SessionState, event: Event) -> ResolveResult<()> {
        self.state = self.state.advance(next)?;
        debug!(request_id = %self.id, state = next.name(), "session advanced");
        self.emit(event);
        Ok(())
    }

    /// Fail the session with exactly one error event. No-op once terminal.
    fn fail(&mut self, err: &ResolveError) {
        if self.state.advance(SessionState::Failed).is_err() {
            warn!(request_id = %self.id, error = %err, "error after terminal state ignored");
            return;
        }
        warn!(request_id = %self.id, state = self.state.name(), error = %err, "request failed");
        self.state = SessionState::Failed;
        self.emit(Event::failure(err));
    }

    fn emit(&self, event: Event) {
        if event.is_terminal() {
            info!(request_id = %self.id, event = event.name(), "request finished");
        }
        // The caller may have hung up; the request still runs to completion.
        if self.events.send(event).is_err() {
            debug!(request_id = %self.id, "event receiver dropped");
        }
    }
}

/// Drives requests from raw payload to terminal event.
pub struct ResolutionService {
    sampler: EphemerisSampler,
    generator: Arc<FileGenerator>,
    sso_flag: SsoFlag,
    next_id: AtomicU64,
}

impl ResolutionService {
    pub fn new(sampler: EphemerisSampler, generator: Arc<FileGenerator>, sso_flag: SsoFlag) -> Self {
        Self {
            sampler,
            generator,
            sso_flag,
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Handle one raw frame. A payload that is not text fails as its own
    /// request with a single error event.
    pub async fn handle_frame(
        &self,
        frame: Vec<u8>,
        events: UnboundedSender<Event>,
    ) -> SessionState {
        match frame_text(frame) {
            Ok(payload) => self.handle(&payload, events).await,
            Err(err) => {
                let mut session = Session::new(self.allocate_id(), events);
                session.fail(&err);
                session.state()
            }
        }
    }

    /// Handle one command payload, emitting its events in order. Returns the
    /// terminal state reached.
    pub async fn handle(&self, payload: &str, events: UnboundedSender<Event>) -> SessionState {
        let id = self.allocate_id();
        let mut session = Session::new(id, events);

        if let Err(err) = self.run(&mut session, payload).await {
            self.generator.mark_failed(id);
            session.fail(&err);
        }

        // The request is discarded once its terminal event is out.
        self.generator.release(id);
        session.state()
    }

    async fn run(&self, session: &mut Session, payload: &str) -> ResolveResult<()> {
        let command = decode(payload)?;
        let request = route(command, session.id, self.sso_flag)?;
        info!(
            request_id = %request.id,
            target = request.target.name(),
            kind = request.target.kind().as_str(),
            route = ?Route::of(&request),
            "request received"
        );

        let filename = self.generator.reserve(&request)?;
        session.enter(
            SessionState::FilenameExpected,
            Event::ExpectedFilename(filename),
        )?;

        let samples = self.sampler.sample(&request).await?;
        self.generator.mark_solved(request.id)?;
        session.enter(
            SessionState::CoordinatesSolved,
            Event::CoordinatesSolved(solution(&request, &samples)?),
        )?;

        match self.generator.generate(&request, &samples).await? {
            Generation::Written(filename) => session.enter(
                SessionState::OutputGenerated,
                Event::OutputFileGenerated(filename),
            ),
            Generation::AlreadyGenerated => Err(ResolveError::Generation(format!(
                "artifact for request {} was generated twice",
                request.id
            ))),
        }
    }
}

fn solution(request: &Request, samples: &[CoordinateSample]) -> ResolveResult<Solution> {
    let name = request.target.name().to_string();
    match (&request.target, request.range) {
        (CelestialTarget::Sso { .. }, Some(range)) => Ok(Solution::Ephemeris {
            name,
            samples: samples.len(),
            range,
        }),
        (_, range) => {
            let first = samples.first().ok_or_else(|| {
                ResolveError::Generation(format!("no coordinates for request {}", request.id))
            })?;
            Ok(Solution::Fixed {
                name,
                ra: first.ra,
                dec: first.dec,
                range,
            })
        }
    }
}
