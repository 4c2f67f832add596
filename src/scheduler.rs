//! Load scheduler: owns one run's lifecycle from `Idle` through `Running` to
//! a terminal `Completed` / `Cancelled` / `Failed` state. Dispatches requests
//! in fixed 100ms ticks, keeps at most `concurrency` requests in flight, and
//! drains (never kills) in-flight work on cancellation so no outcome is lost.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::{Client, Url};
use serde_json::{Map, Value};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use crate::catalog::{Endpoint, ParamLocation};
use crate::error::EngineError;
use crate::metrics::{MetricsRecorder, RunSnapshot};
use crate::session::CompletedRun;
use crate::synth::RequestTemplates;
use crate::types::{ErrorKind, GeneratedRequest, RequestOutcome, RunConfig, RunState, TrafficPattern};

pub(crate) const TICK: Duration = Duration::from_millis(100);

/// Handle to one running (or finished) load test.
///
/// `cancel()` is cooperative and drains: it resolves once all in-flight
/// requests have been accounted for, not immediately. Calling it after the
/// run reached a terminal state is a no-op that returns that state.
pub struct RunHandle {
    run_id: Uuid,
    recorder: Arc<MetricsRecorder>,
    cancel_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<RunState>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    /// Point-in-time metrics copy, callable at any moment including mid-run.
    pub fn snapshot(&self) -> RunSnapshot {
        self.recorder.snapshot()
    }

    /// Awaits the terminal state of the run.
    pub async fn wait(&self) -> RunState {
        let mut rx = self.state_rx.clone();
        let terminal = rx
            .wait_for(|state| state.is_terminal())
            .await
            .map(|state| *state);
        match terminal {
            Ok(state) => state,
            Err(_) => *rx.borrow(),
        }
    }

    /// Requests cancellation and waits until no more outcomes will arrive.
    pub async fn cancel(&self) -> RunState {
        if !self.state().is_terminal() {
            let _ = self.cancel_tx.send(true);
        }
        self.wait().await
    }
}

/// Validates the configuration and spawns the run task. Config errors are
/// surfaced synchronously here; setup faults discovered inside the task
/// (an unparseable base URL, a client that will not build) transition the
/// run straight to `Failed` before it ever enters `Running`.
pub(crate) fn start_run(
    config: RunConfig,
    templates: Arc<Mutex<RequestTemplates>>,
    history: Arc<Mutex<Vec<CompletedRun>>>,
) -> Result<RunHandle, EngineError> {
    config.validate()?;

    let run_id = Uuid::new_v4();
    let recorder = Arc::new(MetricsRecorder::new());
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(RunState::Idle);

    let executor = RunExecutor {
        run_id,
        config,
        recorder: recorder.clone(),
        templates,
        history,
        cancel_rx,
        state_tx,
    };
    tokio::spawn(executor.run());

    Ok(RunHandle {
        run_id,
        recorder,
        cancel_tx,
        state_rx,
    })
}

struct RunExecutor {
    run_id: Uuid,
    config: RunConfig,
    recorder: Arc<MetricsRecorder>,
    templates: Arc<Mutex<RequestTemplates>>,
    history: Arc<Mutex<Vec<CompletedRun>>>,
    cancel_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<RunState>,
}

impl RunExecutor {
    async fn run(mut self) {
        if let Err(message) = Url::parse(&self.config.target_base_url)
            .map(|_| ())
            .map_err(|e| format!("invalid base URL `{}`: {e}", self.config.target_base_url))
        {
            error!("❌ Run {} failed during setup: {message}", self.run_id);
            self.recorder.finalize();
            self.finish(RunState::Failed);
            return;
        }

        let client = match Client::builder().timeout(self.config.request_timeout).build() {
            Ok(client) => client,
            Err(e) => {
                error!("❌ Run {} failed during setup: {e}", self.run_id);
                self.recorder.finalize();
                self.finish(RunState::Failed);
                return;
            }
        };

        let _ = self.state_tx.send(RunState::Running);
        info!(
            "🎯 Run {}: {} endpoint(s) @ concurrency {} for {}s ({:?})",
            self.run_id,
            self.config.endpoints.len(),
            self.config.concurrency,
            self.config.duration_seconds,
            self.config.pattern,
        );

        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.duration_seconds as u64);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency as usize));
        let mut cancel_rx = self.cancel_rx.clone();
        let endpoints = self.config.endpoints.clone();
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let mut rng = StdRng::from_entropy();
        let mut cursor = 0usize;
        let mut carry = 0.0f64;
        let mut next_tick = Instant::now() + TICK;
        let mut tick_budget = self.tick_tokens(&mut carry);
        let mut issued_in_tick = 0u32;

        loop {
            if *cancel_rx.borrow() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                info!("⏱️ Duration limit reached, stopping run {}", self.run_id);
                break;
            }
            if now >= next_tick {
                next_tick += TICK;
                if next_tick <= now {
                    next_tick = now + TICK;
                }
                tick_budget = self.tick_tokens(&mut carry);
                issued_in_tick = 0;
            }

            if let Some(budget) = tick_budget {
                if issued_in_tick >= budget {
                    // rate budget for this tick is spent, wait out the boundary
                    tokio::select! {
                        _ = sleep_until(next_tick) => {}
                        _ = cancel_rx.changed() => {}
                    }
                    continue;
                }
            }

            tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    let slot = issued_in_tick;
                    issued_in_tick += 1;

                    let index = match self.config.pattern {
                        TrafficPattern::Sequential => {
                            let i = cursor % endpoints.len();
                            cursor += 1;
                            i
                        }
                        TrafficPattern::Interleaved => slot as usize % endpoints.len(),
                        TrafficPattern::Random => rng.gen_range(0..endpoints.len()),
                    };
                    let endpoint = endpoints[index].clone();

                    let request = match self.templates.lock().unwrap().instantiate(&endpoint) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!("⚠️ Skipping {}: {e}", endpoint.id());
                            continue;
                        }
                    };

                    let client = client.clone();
                    let base_url = self.config.target_base_url.clone();
                    let recorder = self.recorder.clone();
                    handles.push(tokio::spawn(async move {
                        let outcome = dispatch(&client, &base_url, &endpoint, &request).await;
                        recorder.record(outcome);
                        drop(permit);
                    }));
                }
                _ = sleep_until(next_tick) => {}
                _ = sleep_until(deadline) => {}
                _ = cancel_rx.changed() => {}
            }
        }

        let cancelled = *cancel_rx.borrow();
        if cancelled {
            info!("🛑 Run {} cancelled, draining in-flight requests", self.run_id);
        }
        // in-flight requests finish and their outcomes still count
        join_all(handles).await;
        self.recorder.finalize();

        let snapshot = self.recorder.snapshot();
        info!(
            "✅ Run {} finished: {} requests in {:.2}s",
            self.run_id,
            snapshot.total_requests,
            started.elapsed().as_secs_f64(),
        );
        self.finish(if cancelled {
            RunState::Cancelled
        } else {
            RunState::Completed
        });
    }

    fn tick_tokens(&self, carry: &mut f64) -> Option<u32> {
        rate_tokens(self.config.rate_per_second, self.config.concurrency, carry)
    }

    fn finish(&self, state: RunState) {
        // archive before signalling, so a caller woken by wait() already
        // sees the run in the session history
        self.history.lock().unwrap().push(CompletedRun {
            run_id: self.run_id,
            state,
            snapshot: self.recorder.snapshot(),
            outcomes: self.recorder.outcomes(),
        });
        let _ = self.state_tx.send(state);
    }
}

/// Requests allowed this tick under the rate limit, with fractional
/// carry-over between ticks so coarse ticks do not round the rate away.
/// `None` means issuance is bounded only by the concurrency window.
fn rate_tokens(rate_per_second: Option<u32>, concurrency: u32, carry: &mut f64) -> Option<u32> {
    let rate = rate_per_second?;
    let exact = rate as f64 * TICK.as_secs_f64() + *carry;
    let tokens = exact.floor();
    *carry = exact - tokens;
    Some((tokens as u32).min(concurrency))
}

/// Issues one HTTP call and turns its result into a `RequestOutcome`.
/// Transport failures and non-2xx statuses are data here, never errors.
async fn dispatch(
    client: &Client,
    base_url: &str,
    endpoint: &Endpoint,
    request: &GeneratedRequest,
) -> RequestOutcome {
    let timestamp = Utc::now();
    let started = Instant::now();

    let mut path = endpoint.path.clone();
    let mut body_fields = Map::new();
    let mut builder_params = Vec::new();
    for param in &endpoint.parameters {
        let Some(value) = request.parameter_values.get(&param.name) else {
            continue;
        };
        match param.location {
            ParamLocation::Path => {
                path = path.replace(&format!("{{{}}}", param.name), &plain(value));
            }
            ParamLocation::Query | ParamLocation::Header => {
                builder_params.push((param.location, param.name.clone(), plain(value)));
            }
            ParamLocation::Body => {
                body_fields.insert(param.name.clone(), value.clone());
            }
        }
    }

    let url = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let mut builder = client.request(endpoint.method.clone(), url);
    for (location, name, value) in builder_params {
        builder = match location {
            ParamLocation::Query => builder.query(&[(name, value)]),
            _ => builder.header(name, value),
        };
    }
    let body = request.body.clone().or_else(|| {
        (!body_fields.is_empty()).then(|| Value::Object(body_fields))
    });
    if let Some(body) = &body {
        builder = builder.json(body);
    }

    match builder.send().await {
        Ok(response) => {
            let latency_ms = started.elapsed().as_millis() as u64;
            let status = response.status();
            let success = status.is_success();
            RequestOutcome {
                endpoint: endpoint.id(),
                status_code: Some(status.as_u16()),
                latency_ms,
                timestamp,
                success,
                error_kind: (!success).then_some(ErrorKind::HttpError),
            }
        }
        Err(e) => {
            let latency_ms = started.elapsed().as_millis() as u64;
            RequestOutcome {
                endpoint: endpoint.id(),
                status_code: e.status().map(|s| s.as_u16()),
                latency_ms,
                timestamp,
                success: false,
                error_kind: Some(ErrorKind::from_reqwest(&e)),
            }
        }
    }
}

/// Parameter values are rendered without JSON quoting when interpolated into
/// paths, query strings and headers.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
