//! Central viewport state machine.
//!
//! The controller owns the visible incinerator list and decides when and
//! where to load it. Operations are async and return once the fetch they
//! triggered has settled; retries, prefetches and debounced updates run as
//! spawned tasks that are aborted when superseded.
//!
//! Invariants:
//! - `loading` is true exactly while at least one fetch (or a connection
//!   test) is outstanding, and always returns to false.
//! - an organic fetch is skipped while another one is in flight; only forced
//!   fetches may overlap
//! - a response is applied only if no newer one has been applied and the
//!   source it came from is still the active one
//! - timers can be cancelled only while they wait; once a timer's delay has
//!   elapsed the fetch it starts runs to completion

use std::sync::Arc;
use std::time::Duration;

use catalog::{Incinerator, region_for_bounds};
use foundation::MapBounds;
use parking_lot::Mutex;
use runtime::{Counter, LogFeed, LogLevel, Metrics, MetricsSnapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::ViewportCache;
use crate::error::{ErrorKind, LoadError};
use crate::protocol::{ViewportRequest, ViewportResponse};
use crate::source::{BoxFuture, IncineratorSource};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub prefetch_enabled: bool,
    pub prefetch_delay: Duration,
    /// Fraction of each span added on every side of a prefetched viewport.
    pub prefetch_expansion: f64,
    /// Degrees an edge must move before a viewport counts as changed.
    pub bounds_tolerance: f64,
    pub zoom_tolerance: f64,
    /// Delay before re-attempting after an [`ErrorKind::Api`] failure.
    pub api_retry_delay: Duration,
    /// Delay before re-attempting after an [`ErrorKind::Network`] failure.
    pub network_retry_delay: Duration,
    /// Consecutive automatic retries before a retryable error is treated as
    /// final.
    pub max_auto_retries: u32,
    /// Debounce for [`ViewportController::update_viewport`]. `None` fetches
    /// immediately.
    pub settle_delay: Option<Duration>,
    /// Viewport to load in [`ViewportController::start`]. Without one the
    /// controller waits for the first viewport update.
    pub initial_viewport: Option<ViewportRequest>,
    pub start_with_remote: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            prefetch_enabled: true,
            prefetch_delay: Duration::from_secs(2),
            prefetch_expansion: 0.1,
            bounds_tolerance: 0.001,
            zoom_tolerance: 0.5,
            api_retry_delay: Duration::from_millis(1500),
            network_retry_delay: Duration::from_secs(3),
            max_auto_retries: 3,
            settle_delay: None,
            initial_viewport: None,
            start_with_remote: false,
        }
    }
}

/// Error as shown to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerError {
    pub kind: ErrorKind,
    /// Safe to display.
    pub message: String,
}

impl ControllerError {
    fn from_load(err: &LoadError) -> Self {
        Self {
            kind: err.kind(),
            message: err.user_message().to_string(),
        }
    }
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Observable controller state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewportSnapshot {
    pub incinerators: Vec<Incinerator>,
    pub loading: bool,
    pub error: Option<ControllerError>,
    pub total_count: usize,
    pub clustered: bool,
    pub using_remote_api: bool,
    pub current_region_name: Option<&'static str>,
}

#[derive(Default)]
struct State {
    snapshot: ViewportSnapshot,
    last: Option<ViewportRequest>,
    in_flight: usize,
    next_seq: u64,
    applied_seq: u64,
    retries: u32,
    next_timer: u64,
    prefetch: Option<Timer>,
    settle: Option<Timer>,
    retry: Option<Timer>,
}

/// A delayed task that is still waiting.
struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

impl State {
    fn abort_timers(&mut self) {
        for timer in [self.prefetch.take(), self.settle.take(), self.retry.take()]
            .into_iter()
            .flatten()
        {
            timer.handle.abort();
        }
    }

    fn next_timer_id(&mut self) -> u64 {
        self.next_timer += 1;
        self.next_timer
    }
}

/// Called by a timer task once its delay elapsed, with the state locked.
/// Removes the timer from `slot` so later aborts leave its work alone.
/// Returns `false` when the timer was superseded meanwhile.
fn fire(slot: &mut Option<Timer>, id: u64) -> bool {
    if slot.as_ref().is_some_and(|t| t.id == id) {
        *slot = None;
        true
    } else {
        false
    }
}

struct Shared {
    config: ControllerConfig,
    local: Arc<dyn IncineratorSource>,
    remote: Option<Arc<dyn IncineratorSource>>,
    cache: Mutex<ViewportCache>,
    metrics: Mutex<Metrics>,
    log: Option<Arc<LogFeed>>,
    state: Mutex<State>,
    tx: watch::Sender<ViewportSnapshot>,
}

impl Shared {
    fn publish(&self, state: &State) {
        self.tx.send_replace(state.snapshot.clone());
    }

    fn count(&self, counter: Counter) {
        self.metrics.lock().inc(counter);
    }

    fn record(&self, level: LogLevel, operation: &'static str, message: impl Into<String>) {
        if let Some(log) = &self.log {
            log.record(level, operation, message);
        }
    }
}

/// Marks one outstanding operation. Dropping it (normally or through task
/// abort) recomputes `loading`.
struct InFlight<'a> {
    shared: &'a Shared,
}

impl<'a> InFlight<'a> {
    fn enter(shared: &'a Shared, state: &mut State) -> Self {
        state.in_flight += 1;
        state.snapshot.loading = true;
        Self { shared }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock();
        st.in_flight = st.in_flight.saturating_sub(1);
        st.snapshot.loading = st.in_flight > 0;
        self.shared.publish(&st);
    }
}

enum Outcome {
    Done,
    FallBackToLocal,
}

pub struct ViewportControllerBuilder {
    config: ControllerConfig,
    local: Arc<dyn IncineratorSource>,
    remote: Option<Arc<dyn IncineratorSource>>,
    cache: Option<ViewportCache>,
    log: Option<Arc<LogFeed>>,
}

impl ViewportControllerBuilder {
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn remote(mut self, source: Arc<dyn IncineratorSource>) -> Self {
        self.remote = Some(source);
        self
    }

    pub fn cache(mut self, cache: ViewportCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn log_feed(mut self, feed: Arc<LogFeed>) -> Self {
        self.log = Some(feed);
        self
    }

    pub fn build(self) -> ViewportController {
        let snapshot = ViewportSnapshot {
            using_remote_api: self.config.start_with_remote && self.remote.is_some(),
            ..ViewportSnapshot::default()
        };
        let (tx, _) = watch::channel(snapshot.clone());
        let state = State {
            snapshot,
            ..State::default()
        };
        ViewportController {
            shared: Arc::new(Shared {
                config: self.config,
                local: self.local,
                remote: self.remote,
                cache: Mutex::new(self.cache.unwrap_or_default()),
                metrics: Mutex::new(Metrics::new()),
                log: self.log,
                state: Mutex::new(state),
                tx,
            }),
        }
    }
}

/// Handle to the viewport state machine. Cheap to clone.
#[derive(Clone)]
pub struct ViewportController {
    shared: Arc<Shared>,
}

impl ViewportController {
    pub fn builder(local: Arc<dyn IncineratorSource>) -> ViewportControllerBuilder {
        ViewportControllerBuilder {
            config: ControllerConfig::default(),
            local,
            remote: None,
            cache: None,
            log: None,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    pub fn snapshot(&self) -> ViewportSnapshot {
        self.shared.state.lock().snapshot.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewportSnapshot> {
        self.shared.tx.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.lock().snapshot()
    }

    pub fn cache_len(&self) -> usize {
        self.shared.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.shared.cache.lock().clear();
    }

    /// Loads the configured initial viewport, if any.
    pub async fn start(&self) {
        match self.shared.config.initial_viewport {
            Some(req) => {
                self.update_viewport(req.bounds, req.zoom).await;
            }
            None => debug!("no initial viewport, waiting for the map"),
        }
    }

    /// Reports the viewport the map settled on.
    ///
    /// Returns `false` when the change is within tolerance and nothing was
    /// scheduled.
    pub async fn update_viewport(&self, bounds: MapBounds, zoom: f64) -> bool {
        let shared = &self.shared;
        let request = ViewportRequest::new(bounds, zoom);
        {
            let mut st = shared.state.lock();
            if let Some(last) = st.last {
                let moved = bounds.differs_from(&last.bounds, shared.config.bounds_tolerance);
                let zoomed = (zoom - last.zoom).abs() > shared.config.zoom_tolerance;
                if !moved && !zoomed {
                    return false;
                }
            }
            st.abort_timers();
            st.retries = 0;
            st.last = Some(request);
            st.snapshot.current_region_name = region_for_bounds(&bounds).map(|r| r.name);
            shared.publish(&st);

            if let Some(delay) = shared.config.settle_delay {
                let task_shared = shared.clone();
                let id = st.next_timer_id();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if !fire(&mut task_shared.state.lock().settle, id) {
                        return;
                    }
                    fetch_data(task_shared, request, false).await;
                });
                st.settle = Some(Timer { id, handle });
                return true;
            }
        }
        fetch_data(shared.clone(), request, false).await;
        true
    }

    /// Re-issues the last request, even if another fetch is in flight.
    pub async fn refetch(&self) {
        let last = self.shared.state.lock().last;
        match last {
            Some(req) => fetch_data(self.shared.clone(), req, true).await,
            None => debug!("refetch before any viewport, ignoring"),
        }
    }

    /// Switches to the remote API after a successful connection test.
    ///
    /// On failure the controller stays on local data and the error carries
    /// the reason. Returns whether the switch happened.
    pub async fn switch_to_remote_api(&self) -> bool {
        let shared = &self.shared;
        let Some(remote) = shared.remote.clone() else {
            let mut st = shared.state.lock();
            st.snapshot.error = Some(ControllerError {
                kind: ErrorKind::Unknown,
                message: "Remote API is not configured".to_string(),
            });
            shared.publish(&st);
            return false;
        };

        let guard = {
            let mut st = shared.state.lock();
            st.abort_timers();
            st.snapshot.error = None;
            let guard = InFlight::enter(shared, &mut st);
            shared.publish(&st);
            guard
        };
        let result = remote.check_connection().await;

        let last = {
            let mut st = shared.state.lock();
            match &result {
                Ok(()) => {
                    st.snapshot.using_remote_api = true;
                    st.retries = 0;
                }
                Err(err) => {
                    st.snapshot.error = Some(ControllerError {
                        kind: err.kind(),
                        message: format!("Remote API is not reachable: {err}"),
                    });
                }
            }
            shared.publish(&st);
            st.last
        };
        drop(guard);

        match result {
            Ok(()) => {
                info!(source = remote.name(), "switched to remote API");
                shared.record(LogLevel::Info, "switch_to_remote_api", "switched to remote API");
                if let Some(req) = last {
                    fetch_data(shared.clone(), req, true).await;
                }
                true
            }
            Err(err) => {
                warn!(operation = "switch_to_remote_api", "connection test failed: {err}");
                shared.record(
                    LogLevel::Warn,
                    "switch_to_remote_api",
                    format!("connection test failed: {err}"),
                );
                false
            }
        }
    }

    /// Switches to the bundled data without a connectivity check.
    pub async fn switch_to_local_api(&self) {
        let shared = &self.shared;
        let last = {
            let mut st = shared.state.lock();
            st.abort_timers();
            st.retries = 0;
            st.snapshot.using_remote_api = false;
            st.snapshot.error = None;
            shared.publish(&st);
            st.last
        };
        info!("switched to local data");
        shared.record(LogLevel::Info, "switch_to_local_api", "switched to local data");
        if let Some(req) = last {
            fetch_data(shared.clone(), req, true).await;
        }
    }
}

/// One controller fetch plus any forced local re-attempt after a remote
/// failure. Boxed because retries re-enter it from spawned tasks.
fn fetch_data(shared: Arc<Shared>, request: ViewportRequest, force: bool) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let outcome = attempt(&shared, request, force).await;
        if let Outcome::FallBackToLocal = outcome {
            fetch_data(shared, request, true).await;
        }
    })
}

async fn attempt(shared: &Arc<Shared>, request: ViewportRequest, force: bool) -> Outcome {
    let (seq, use_remote, _guard) = {
        let mut st = shared.state.lock();
        if st.in_flight > 0 && !force {
            drop(st);
            shared.count(Counter::FetchSkippedInFlight);
            debug!(
                bounds = %request.bounds,
                zoom = request.zoom,
                "fetch already in flight, skipping"
            );
            return Outcome::Done;
        }
        st.next_seq += 1;
        st.snapshot.error = None;
        let guard = InFlight::enter(shared, &mut st);
        shared.publish(&st);
        (st.next_seq, st.snapshot.using_remote_api, guard)
    };
    shared.count(Counter::FetchStarted);

    let started = tokio::time::Instant::now();
    let result = match (use_remote, &shared.remote) {
        (true, Some(remote)) => remote.fetch_viewport(&request).await,
        (true, None) => Err(LoadError::Unknown("remote source is not configured".into())),
        (false, _) => fetch_with_cache(shared, &request).await,
    };
    shared
        .metrics
        .lock()
        .record_fetch_latency_ms(started.elapsed().as_millis() as u64);

    match result {
        Ok(response) => {
            apply(shared, seq, use_remote, &request, response);
            Outcome::Done
        }
        Err(err) => handle_failure(shared, seq, use_remote, request, err),
    }
}

/// Local path: cache first, then the source. Successful answers are cached.
async fn fetch_with_cache(
    shared: &Shared,
    request: &ViewportRequest,
) -> Result<ViewportResponse, LoadError> {
    let cached = shared.cache.lock().get(&request.bounds, request.zoom);
    if let Some(hit) = cached {
        shared.count(Counter::CacheHit);
        debug!(bounds = %request.bounds, zoom = request.zoom, "cache hit");
        return Ok(hit);
    }
    shared.count(Counter::CacheMiss);

    let response = shared.local.fetch_viewport(request).await?;
    shared
        .cache
        .lock()
        .set(&request.bounds, request.zoom, response.clone());
    Ok(response)
}

fn is_stale(state: &State, seq: u64, use_remote: bool) -> bool {
    seq < state.applied_seq || state.snapshot.using_remote_api != use_remote
}

fn apply(
    shared: &Arc<Shared>,
    seq: u64,
    use_remote: bool,
    request: &ViewportRequest,
    response: ViewportResponse,
) {
    let mut st = shared.state.lock();
    if is_stale(&st, seq, use_remote) {
        drop(st);
        shared.count(Counter::StaleResponseDropped);
        debug!(seq, "dropping stale response for {request}");
        return;
    }
    st.applied_seq = seq;
    st.retries = 0;
    let shown = response.incinerators.len();
    st.snapshot.incinerators = response.incinerators;
    st.snapshot.total_count = response.total_count;
    st.snapshot.clustered = response.clustered;
    st.snapshot.error = None;
    shared.publish(&st);

    if !use_remote && shared.config.prefetch_enabled {
        schedule_prefetch(shared, &mut st, request);
    }
    drop(st);

    shared.count(Counter::FetchSucceeded);
    let source = if use_remote { "remote" } else { "local" };
    debug!(
        source,
        shown,
        total = response.total_count,
        "applied {request}"
    );
    shared.record(
        LogLevel::Debug,
        "fetch_data",
        format!("loaded {shown}/{} for {request}", response.total_count),
    );
}

fn schedule_prefetch(shared: &Arc<Shared>, st: &mut State, request: &ViewportRequest) {
    if let Some(old) = st.prefetch.take() {
        old.handle.abort();
    }
    let target = ViewportRequest {
        bounds: request.bounds.expanded(shared.config.prefetch_expansion),
        ..*request
    };
    let delay = shared.config.prefetch_delay;
    let task_shared = shared.clone();
    shared.count(Counter::PrefetchScheduled);
    let id = st.next_timer_id();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if !fire(&mut task_shared.state.lock().prefetch, id) {
            return;
        }
        if let Err(err) = fetch_with_cache(&task_shared, &target).await {
            task_shared.count(Counter::PrefetchFailed);
            debug!(
                operation = "prefetch",
                bounds = %target.bounds,
                zoom = target.zoom,
                "prefetch failed: {err}"
            );
            task_shared.record(LogLevel::Debug, "prefetch", format!("prefetch failed: {err}"));
        }
    });
    st.prefetch = Some(Timer { id, handle });
}

fn handle_failure(
    shared: &Arc<Shared>,
    seq: u64,
    use_remote: bool,
    request: ViewportRequest,
    err: LoadError,
) -> Outcome {
    shared.count(Counter::FetchFailed);
    let source = if use_remote { "remote" } else { "local" };
    warn!(
        operation = "fetch_data",
        source,
        bounds = %request.bounds,
        zoom = request.zoom,
        kind = ?err.kind(),
        "fetch failed: {err}"
    );
    shared.record(
        LogLevel::Error,
        "fetch_data",
        format!("{source} fetch failed for {request}: {err}"),
    );

    let mut st = shared.state.lock();
    if is_stale(&st, seq, use_remote) {
        drop(st);
        shared.count(Counter::StaleResponseDropped);
        return Outcome::Done;
    }

    if err.is_retryable() && st.retries < shared.config.max_auto_retries {
        st.retries += 1;
        let delay = match err.kind() {
            ErrorKind::Network => shared.config.network_retry_delay,
            _ => shared.config.api_retry_delay,
        };
        st.snapshot.error = Some(ControllerError::from_load(&err));
        shared.publish(&st);

        let attempt_no = st.retries;
        let task_shared = shared.clone();
        // A retry running this code has already left the slot, so whatever
        // is left there is still waiting.
        if let Some(old) = st.retry.take() {
            old.handle.abort();
        }
        let id = st.next_timer_id();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut st = task_shared.state.lock();
                if !fire(&mut st.retry, id) {
                    return;
                }
                st.snapshot.error = None;
                task_shared.publish(&st);
            }
            fetch_data(task_shared, request, false).await;
        });
        st.retry = Some(Timer { id, handle });
        drop(st);
        shared.count(Counter::RetryScheduled);
        debug!(attempt = attempt_no, delay_ms = delay.as_millis() as u64, "retry scheduled");
        return Outcome::Done;
    }

    if use_remote {
        st.snapshot.using_remote_api = false;
        st.retries = 0;
        st.snapshot.error = None;
        shared.publish(&st);
        drop(st);
        shared.count(Counter::FallbackToLocal);
        info!(operation = "fetch_data", "remote failed for good, falling back to local data");
        shared.record(LogLevel::Warn, "fetch_data", "falling back to local data");
        return Outcome::FallBackToLocal;
    }

    st.snapshot.error = Some(ControllerError::from_load(&err));
    shared.publish(&st);
    Outcome::Done
}

#[cfg(test)]
mod tests {
    use super::{ControllerConfig, ViewportController};
    use crate::error::{ErrorKind, LoadError};
    use crate::protocol::{ViewportRequest, ViewportResponse};
    use crate::source::{BoxFuture, IncineratorSource};
    use catalog::{Incinerator, REGIONS};
    use foundation::MapBounds;
    use parking_lot::Mutex;
    use runtime::{Counter, LogFeed, LogLevel};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    type Script = VecDeque<Result<usize, LoadError>>;

    /// Answers with `n` sites or an error, in script order. Once the script
    /// runs out it keeps answering with `fallback` sites.
    struct ScriptedSource {
        name: &'static str,
        delay: Duration,
        script: Mutex<Script>,
        fallback: usize,
        connection: Result<(), LoadError>,
        calls: AtomicUsize,
        requests: Mutex<Vec<ViewportRequest>>,
    }

    impl ScriptedSource {
        fn new(name: &'static str, fallback: usize) -> Self {
            Self {
                name,
                delay: Duration::ZERO,
                script: Mutex::new(VecDeque::new()),
                fallback,
                connection: Ok(()),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn then(self, step: Result<usize, LoadError>) -> Self {
            self.script.lock().push_back(step);
            self
        }

        fn unreachable(mut self, err: LoadError) -> Self {
            self.connection = Err(err);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn site(i: usize) -> Incinerator {
        serde_json::from_value(json!({
            "id": format!("s{i}"),
            "name": format!("Site {i}"),
            "location": { "lat": 50.0, "lng": 14.4 },
            "operational": true
        }))
        .unwrap()
    }

    impl IncineratorSource for ScriptedSource {
        fn name(&self) -> &'static str {
            self.name
        }

        fn fetch_viewport(
            &self,
            request: &ViewportRequest,
        ) -> BoxFuture<'_, Result<ViewportResponse, LoadError>> {
            let request = *request;
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.requests.lock().push(request);
                let step = self.script.lock().pop_front().unwrap_or(Ok(self.fallback));
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let n = step?;
                Ok(ViewportResponse {
                    incinerators: (0..n).map(site).collect(),
                    total_count: n,
                    clustered: request.zoom < 10.0,
                })
            })
        }

        fn check_connection(&self) -> BoxFuture<'_, Result<(), LoadError>> {
            Box::pin(async move { self.connection.clone() })
        }
    }

    fn simulated() -> LoadError {
        LoadError::Simulated {
            region: "Praha a okolí".into(),
        }
    }

    fn prague() -> MapBounds {
        REGIONS[0].bounds
    }

    fn no_prefetch() -> ControllerConfig {
        ControllerConfig {
            prefetch_enabled: false,
            ..ControllerConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_fetch_until_a_viewport_arrives() {
        let local = Arc::new(ScriptedSource::new("local", 3));
        let controller = ViewportController::builder(local.clone()).build();
        controller.start().await;
        assert_eq!(local.calls(), 0);
        assert!(!controller.snapshot().loading);

        let with_initial = ViewportController::builder(local.clone())
            .config(ControllerConfig {
                initial_viewport: Some(ViewportRequest::new(prague(), 11.0)),
                ..no_prefetch()
            })
            .build();
        with_initial.start().await;
        assert_eq!(local.calls(), 1);
        assert_eq!(with_initial.snapshot().incinerators.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn update_sets_region_and_replaces_data() {
        let local = Arc::new(ScriptedSource::new("local", 0).then(Ok(4)).then(Ok(2)));
        let controller = ViewportController::builder(local.clone())
            .config(no_prefetch())
            .build();

        assert!(controller.update_viewport(prague(), 11.0).await);
        let snap = controller.snapshot();
        assert_eq!(snap.current_region_name, Some("Praha a okolí"));
        assert_eq!(snap.incinerators.len(), 4);
        assert!(!snap.clustered);
        assert!(!snap.loading);

        let elsewhere = MapBounds::new_unchecked(40.0, 39.0, -20.0, -21.0);
        assert!(controller.update_viewport(elsewhere, 8.0).await);
        let snap = controller.snapshot();
        assert_eq!(snap.current_region_name, None);
        // Replaced wholesale, not merged.
        assert_eq!(snap.incinerators.len(), 2);
        assert!(snap.clustered);
    }

    #[tokio::test(start_paused = true)]
    async fn sub_tolerance_jiggle_fetches_once() {
        let local = Arc::new(ScriptedSource::new("local", 1));
        let controller = ViewportController::builder(local.clone())
            .config(no_prefetch())
            .build();

        let b = prague();
        let jiggled =
            MapBounds::new_unchecked(b.north + 0.0009, b.south - 0.0005, b.east, b.west + 0.0009);
        assert!(controller.update_viewport(b, 11.0).await);
        assert!(!controller.update_viewport(jiggled, 11.5).await);
        assert_eq!(local.calls(), 1);

        let moved = MapBounds::new_unchecked(b.north + 0.002, b.south, b.east, b.west);
        assert!(controller.update_viewport(moved, 11.0).await);
        assert_eq!(local.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn organic_update_is_skipped_while_in_flight() {
        let local =
            Arc::new(ScriptedSource::new("local", 1).with_delay(Duration::from_millis(500)));
        let controller = ViewportController::builder(local.clone())
            .config(no_prefetch())
            .build();

        let first = controller.update_viewport(prague(), 11.0);
        let second = controller.update_viewport(REGIONS[1].bounds, 11.0);
        tokio::join!(first, second);

        assert_eq!(local.calls(), 1);
        assert_eq!(controller.metrics().counter(Counter::FetchSkippedInFlight), 1);
        assert!(!controller.snapshot().loading);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refetches_settle_loading_false() {
        let local =
            Arc::new(ScriptedSource::new("local", 2).with_delay(Duration::from_millis(300)));
        let controller = ViewportController::builder(local.clone())
            .config(no_prefetch())
            .build();
        controller.update_viewport(prague(), 11.0).await;
        // Cache would answer a local refetch; make the source do the work.
        controller.clear_cache();

        let mut rx = controller.subscribe();
        let c1 = controller.clone();
        let c2 = controller.clone();
        let h = tokio::spawn(async move { tokio::join!(c1.refetch(), c2.refetch()) });
        rx.changed().await.unwrap();
        assert!(rx.borrow().loading);
        h.await.unwrap();

        let snap = controller.snapshot();
        assert!(!snap.loading);
        assert_eq!(snap.incinerators.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_failure_clears_and_repopulates_without_user_action() {
        let local = Arc::new(ScriptedSource::new("local", 5).then(Err(simulated())));
        let controller = ViewportController::builder(local.clone())
            .config(no_prefetch())
            .build();

        controller.update_viewport(prague(), 11.0).await;
        let snap = controller.snapshot();
        let err = snap.error.expect("error is visible until the retry");
        assert_eq!(err.kind, ErrorKind::Api);
        assert!(snap.incinerators.is_empty());
        assert!(!snap.loading);

        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert!(controller.snapshot().error.is_some());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let snap = controller.snapshot();
        assert_eq!(snap.error, None);
        assert_eq!(snap.incinerators.len(), 5);
        assert_eq!(local.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn new_viewport_does_not_cancel_a_retry_that_is_fetching() {
        let local = Arc::new(
            ScriptedSource::new("local", 5)
                .with_delay(Duration::from_millis(500))
                .then(Err(simulated())),
        );
        let controller = ViewportController::builder(local.clone())
            .config(no_prefetch())
            .build();
        controller.update_viewport(prague(), 11.0).await;

        // The retry fires 1.5 s after the failure and is now inside the
        // source's delay.
        tokio::time::sleep(Duration::from_millis(1700)).await;
        assert!(controller.snapshot().loading);
        assert!(controller.update_viewport(REGIONS[1].bounds, 11.0).await);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snap = controller.snapshot();
        assert_eq!(snap.incinerators.len(), 5);
        assert_eq!(snap.error, None);
        assert!(!snap.loading);
        assert_eq!(local.calls(), 2);
        assert_eq!(controller.metrics().counter(Counter::FetchSkippedInFlight), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_retry_after_three_seconds() {
        let local = Arc::new(
            ScriptedSource::new("local", 1).then(Err(LoadError::Network("reset".into()))),
        );
        let controller = ViewportController::builder(local.clone())
            .config(no_prefetch())
            .build();
        controller.update_viewport(prague(), 11.0).await;
        assert_eq!(controller.snapshot().error.unwrap().kind, ErrorKind::Network);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(local.calls(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(local.calls(), 2);
        assert!(controller.snapshot().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_after_the_configured_maximum() {
        let local = Arc::new(
            ScriptedSource::new("local", 1)
                .then(Err(simulated()))
                .then(Err(simulated()))
                .then(Err(simulated())),
        );
        let controller = ViewportController::builder(local.clone())
            .config(ControllerConfig {
                max_auto_retries: 2,
                ..no_prefetch()
            })
            .build();
        controller.update_viewport(prague(), 11.0).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        // Initial attempt plus two retries, then the error stays.
        assert_eq!(local.calls(), 3);
        let snap = controller.snapshot();
        assert_eq!(snap.error.unwrap().kind, ErrorKind::Api);
        assert!(!snap.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_error_on_local_stays_visible() {
        let local = Arc::new(
            ScriptedSource::new("local", 1).then(Err(LoadError::InvalidPayload("bad".into()))),
        );
        let controller = ViewportController::builder(local.clone())
            .config(no_prefetch())
            .build();
        controller.update_viewport(prague(), 11.0).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(local.calls(), 1);
        assert_eq!(controller.snapshot().error.unwrap().kind, ErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connection_test_keeps_local_source() {
        let local = Arc::new(ScriptedSource::new("local", 1));
        let remote = Arc::new(
            ScriptedSource::new("remote", 9)
                .unreachable(LoadError::Network("connection refused".into())),
        );
        let controller = ViewportController::builder(local.clone())
            .remote(remote.clone())
            .config(no_prefetch())
            .build();
        controller.update_viewport(prague(), 11.0).await;

        assert!(!controller.switch_to_remote_api().await);
        let snap = controller.snapshot();
        assert!(!snap.using_remote_api);
        assert!(!snap.loading);
        let message = snap.error.unwrap().message;
        assert!(message.contains("connection refused"), "{message}");
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_switch_refetches_from_remote_and_back() {
        let local = Arc::new(ScriptedSource::new("local", 1));
        let remote = Arc::new(ScriptedSource::new("remote", 9));
        let controller = ViewportController::builder(local.clone())
            .remote(remote.clone())
            .config(no_prefetch())
            .build();
        controller.update_viewport(prague(), 11.0).await;

        assert!(controller.switch_to_remote_api().await);
        let snap = controller.snapshot();
        assert!(snap.using_remote_api);
        assert_eq!(snap.incinerators.len(), 9);

        controller.switch_to_local_api().await;
        let snap = controller.snapshot();
        assert!(!snap.using_remote_api);
        assert_eq!(snap.incinerators.len(), 1);
        assert_eq!(remote.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn final_remote_failure_falls_back_to_local() {
        let local = Arc::new(ScriptedSource::new("local", 4));
        let remote = Arc::new(ScriptedSource::new("remote", 0).then(Err(LoadError::Http {
            status: 404,
            reason: "Not Found".into(),
        })));
        let feed = Arc::new(LogFeed::new(50));
        let controller = ViewportController::builder(local.clone())
            .remote(remote.clone())
            .config(ControllerConfig {
                start_with_remote: true,
                ..no_prefetch()
            })
            .log_feed(feed.clone())
            .build();
        assert!(controller.snapshot().using_remote_api);

        controller.update_viewport(prague(), 11.0).await;
        let snap = controller.snapshot();
        assert!(!snap.using_remote_api);
        assert_eq!(snap.error, None);
        assert_eq!(snap.incinerators.len(), 4);
        assert!(!snap.loading);
        assert!(!feed.entries_at_least(LogLevel::Error).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_network_errors_are_retried_before_falling_back() {
        let local = Arc::new(ScriptedSource::new("local", 4));
        let remote = Arc::new(
            ScriptedSource::new("remote", 0)
                .then(Err(LoadError::Network("reset".into())))
                .then(Err(LoadError::Network("reset".into()))),
        );
        let controller = ViewportController::builder(local.clone())
            .remote(remote.clone())
            .config(ControllerConfig {
                start_with_remote: true,
                max_auto_retries: 1,
                ..no_prefetch()
            })
            .build();
        controller.update_viewport(prague(), 11.0).await;
        assert!(controller.snapshot().using_remote_api);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(remote.calls(), 2);
        let snap = controller.snapshot();
        assert!(!snap.using_remote_api);
        assert_eq!(snap.incinerators.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn prefetch_warms_the_cache_for_the_expanded_viewport() {
        let local = Arc::new(ScriptedSource::new("local", 3));
        let controller = ViewportController::builder(local.clone()).build();
        controller.update_viewport(prague(), 11.0).await;
        assert_eq!(controller.cache_len(), 1);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(local.calls(), 2);
        assert_eq!(controller.cache_len(), 2);
        let prefetched = local.requests.lock()[1];
        assert_eq!(prefetched.bounds, prague().expanded(0.1));
        assert_eq!(prefetched.zoom, 11.0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_viewport_cancels_pending_prefetch() {
        let local = Arc::new(ScriptedSource::new("local", 3));
        let controller = ViewportController::builder(local.clone()).build();
        controller.update_viewport(prague(), 11.0).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        controller.update_viewport(REGIONS[1].bounds, 11.0).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // Two viewports, the first prefetch never ran, the second is pending.
        assert_eq!(local.calls(), 2);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(local.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn running_prefetch_survives_a_new_viewport() {
        let local =
            Arc::new(ScriptedSource::new("local", 3).with_delay(Duration::from_millis(500)));
        let controller = ViewportController::builder(local.clone()).build();
        controller.update_viewport(prague(), 11.0).await;

        // Prefetch starts at 2.5 s and is inside the source's delay at 2.7 s.
        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert_eq!(local.calls(), 2);
        controller.update_viewport(REGIONS[1].bounds, 11.0).await;

        assert_eq!(local.calls(), 3);
        // Prague, the prefetched expansion of Prague, and Brno.
        assert_eq!(controller.cache_len(), 3);
        assert_eq!(controller.metrics().counter(Counter::PrefetchFailed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn prefetch_failures_are_swallowed() {
        let local = Arc::new(ScriptedSource::new("local", 3).then(Ok(3)).then(Err(simulated())));
        let controller = ViewportController::builder(local.clone()).build();
        controller.update_viewport(prague(), 11.0).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(local.calls(), 2);
        assert_eq!(controller.snapshot().error, None);
        assert_eq!(controller.metrics().counter(Counter::PrefetchFailed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn revisiting_a_viewport_hits_the_cache() {
        let local = Arc::new(ScriptedSource::new("local", 3));
        let controller = ViewportController::builder(local.clone())
            .config(no_prefetch())
            .build();
        controller.update_viewport(prague(), 11.0).await;
        controller.update_viewport(REGIONS[1].bounds, 11.0).await;
        controller.update_viewport(prague(), 11.0).await;
        assert_eq!(local.calls(), 2);
        assert_eq!(controller.snapshot().incinerators.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_debounces_rapid_updates() {
        let local = Arc::new(ScriptedSource::new("local", 1));
        let controller = ViewportController::builder(local.clone())
            .config(ControllerConfig {
                settle_delay: Some(Duration::from_millis(300)),
                ..no_prefetch()
            })
            .build();
        controller.update_viewport(prague(), 9.0).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.update_viewport(prague(), 11.0).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.update_viewport(prague(), 13.0).await;
        assert_eq!(local.calls(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(local.calls(), 1);
        assert_eq!(local.requests.lock()[0].zoom, 13.0);
    }

    #[tokio::test(start_paused = true)]
    async fn older_forced_response_cannot_overwrite_newer_data() {
        // The first call is slow and answers last with older data.
        let local = Arc::new(ScriptedSource::new("local", 0).then(Ok(7)).then(Ok(1)));
        let slow_first = Arc::new(SlowFirst {
            inner: local,
            used: AtomicBool::new(false),
        });
        let controller = ViewportController::builder(slow_first)
            .config(no_prefetch())
            .build();
        let c1 = controller.clone();
        let update = tokio::spawn(async move { c1.update_viewport(prague(), 11.0).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.clear_cache();
        controller.refetch().await;
        update.await.unwrap();

        assert_eq!(controller.snapshot().incinerators.len(), 7);
        assert_eq!(controller.metrics().counter(Counter::StaleResponseDropped), 1);
    }

    struct SlowFirst {
        inner: Arc<ScriptedSource>,
        used: AtomicBool,
    }

    impl IncineratorSource for SlowFirst {
        fn name(&self) -> &'static str {
            "local"
        }

        fn fetch_viewport(
            &self,
            request: &ViewportRequest,
        ) -> BoxFuture<'_, Result<ViewportResponse, LoadError>> {
            let first = !self.used.swap(true, Ordering::SeqCst);
            let request = *request;
            Box::pin(async move {
                let fut = self.inner.fetch_viewport(&request);
                if first {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                fut.await
            })
        }
    }
}
