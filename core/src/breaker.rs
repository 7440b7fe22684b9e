use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use solroute_commons::metrics::RouterMetrics;
use tracing::{info, warn};

use crate::error::{RouterError, RouterResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitPhase {
    fn as_str(self) -> &'static str {
        match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::HalfOpen => "half_open",
            CircuitPhase::Open => "open",
        }
    }

    fn gauge_value(self) -> i64 {
        match self {
            CircuitPhase::Closed => 0,
            CircuitPhase::HalfOpen => 1,
            CircuitPhase::Open => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
    /// Failures further apart than this do not accumulate toward the
    /// threshold.
    pub monitoring_window: Duration,
}

impl BreakerConfig {
    /// Defaults for upstream aggregator operations.
    pub fn adapter_default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            monitoring_window: Duration::from_secs(120),
        }
    }

    /// Defaults for generic downstream services.
    pub fn generic_default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            monitoring_window: Duration::from_secs(300),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::generic_default()
    }
}

#[derive(Debug)]
struct CircuitState {
    phase: CircuitPhase,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    next_attempt: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            phase: CircuitPhase::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_success: None,
            next_attempt: None,
            probe_in_flight: false,
        }
    }
}

/// Read-only view of a circuit, for health reporting.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub service: String,
    pub operation: String,
    pub phase: String,
    pub failure_count: u32,
    pub success_count: u32,
    pub open_for_ms: Option<u64>,
}

enum Admission {
    Pass,
    Probe,
    Reject,
}

/// Per-(service, operation) circuit registry.
///
/// One generic `execute_guarded` closes over the registry instead of a
/// decorator type per guarded operation. All state mutation happens inside
/// the per-circuit mutex; the guarded future is awaited outside it.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Arc<Mutex<CircuitState>>>>,
    configs: HashMap<String, BreakerConfig>,
    default_config: BreakerConfig,
    metrics: Arc<RouterMetrics>,
}

impl CircuitBreaker {
    pub fn new(metrics: Arc<RouterMetrics>) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            configs: HashMap::new(),
            default_config: BreakerConfig::generic_default(),
            metrics,
        }
    }

    /// Registers a per-service config; unknown services use the generic
    /// default.
    pub fn with_config(mut self, service: impl Into<String>, config: BreakerConfig) -> Self {
        self.configs.insert(service.into(), config);
        self
    }

    fn config_for(&self, service: &str) -> BreakerConfig {
        self.configs.get(service).copied().unwrap_or(self.default_config)
    }

    fn circuit(&self, key: &str) -> Arc<Mutex<CircuitState>> {
        let mut map = self.circuits.lock().expect("circuit registry poisoned");
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitState::new())))
            .clone()
    }

    fn record_transition(&self, service: &str, operation: &str, to: CircuitPhase) {
        self.metrics
            .breaker
            .transitions
            .with_label_values(&[service, operation, to.as_str()])
            .inc();
        self.metrics
            .breaker
            .state
            .with_label_values(&[service, operation])
            .set(to.gauge_value());
    }

    fn admit(&self, state: &mut CircuitState, service: &str, operation: &str) -> Admission {
        match state.phase {
            CircuitPhase::Closed => Admission::Pass,
            CircuitPhase::Open => {
                let due = state.next_attempt.map(|at| Instant::now() >= at).unwrap_or(true);
                if due {
                    state.phase = CircuitPhase::HalfOpen;
                    state.success_count = 0;
                    state.probe_in_flight = true;
                    info!("circuit {}/{} half-open, admitting probe", service, operation);
                    self.record_transition(service, operation, CircuitPhase::HalfOpen);
                    Admission::Probe
                } else {
                    Admission::Reject
                }
            }
            CircuitPhase::HalfOpen => {
                if state.probe_in_flight {
                    Admission::Reject
                } else {
                    state.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    fn on_success(&self, state: &mut CircuitState, config: &BreakerConfig, service: &str, operation: &str) {
        state.last_success = Some(Instant::now());
        match state.phase {
            CircuitPhase::Closed => {
                state.failure_count = state.failure_count.saturating_sub(1);
            }
            CircuitPhase::HalfOpen => {
                state.probe_in_flight = false;
                state.success_count += 1;
                if state.success_count >= config.success_threshold {
                    state.phase = CircuitPhase::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.next_attempt = None;
                    info!("circuit {}/{} closed after recovery", service, operation);
                    self.record_transition(service, operation, CircuitPhase::Closed);
                }
            }
            CircuitPhase::Open => {
                // A call admitted before the circuit opened; ignore.
            }
        }
    }

    fn on_failure(&self, state: &mut CircuitState, config: &BreakerConfig, service: &str, operation: &str) {
        let now = Instant::now();
        match state.phase {
            CircuitPhase::Closed => {
                let window_expired = state
                    .last_failure
                    .map(|at| now.duration_since(at) > config.monitoring_window)
                    .unwrap_or(false);
                state.failure_count = if window_expired { 1 } else { state.failure_count + 1 };
                state.last_failure = Some(now);
                if state.failure_count >= config.failure_threshold {
                    state.phase = CircuitPhase::Open;
                    state.next_attempt = Some(now + config.recovery_timeout);
                    warn!(
                        "circuit {}/{} open after {} consecutive failures",
                        service, operation, state.failure_count
                    );
                    self.record_transition(service, operation, CircuitPhase::Open);
                }
            }
            CircuitPhase::HalfOpen => {
                state.probe_in_flight = false;
                state.last_failure = Some(now);
                state.phase = CircuitPhase::Open;
                state.next_attempt = Some(now + config.recovery_timeout);
                warn!("circuit {}/{} re-opened by failed probe", service, operation);
                self.record_transition(service, operation, CircuitPhase::Open);
            }
            CircuitPhase::Open => {}
        }
    }

    /// Runs `call` through the circuit for (service, operation).
    ///
    /// Open circuits fail fast with `CIRCUIT_BREAKER_OPEN`; half-open
    /// circuits admit a single probe and reject the rest.
    pub async fn execute_guarded<T, Fut>(&self, service: &str, operation: &str, call: Fut) -> RouterResult<T>
    where
        Fut: Future<Output = RouterResult<T>>,
    {
        self.execute_guarded_with_fallback(service, operation, call, None::<fn() -> T>)
            .await
    }

    /// Same as `execute_guarded`, with a fallback invoked instead of
    /// failing fast while the circuit rejects calls.
    pub async fn execute_guarded_with_fallback<T, Fut, F>(
        &self,
        service: &str,
        operation: &str,
        call: Fut,
        fallback: Option<F>,
    ) -> RouterResult<T>
    where
        Fut: Future<Output = RouterResult<T>>,
        F: FnOnce() -> T,
    {
        let key = format!("{service}/{operation}");
        let config = self.config_for(service);
        let circuit = self.circuit(&key);

        let admission = {
            let mut state = circuit.lock().expect("circuit poisoned");
            self.admit(&mut state, service, operation)
        };

        if let Admission::Reject = admission {
            self.metrics
                .breaker
                .short_circuits
                .with_label_values(&[service, operation])
                .inc();
            return match fallback {
                Some(f) => Ok(f()),
                None => Err(RouterError::circuit_open(service, operation)),
            };
        }

        let result = call.await;

        {
            let mut state = circuit.lock().expect("circuit poisoned");
            match &result {
                Ok(_) => self.on_success(&mut state, &config, service, operation),
                Err(_) => self.on_failure(&mut state, &config, service, operation),
            }
        }
        self.metrics
            .breaker
            .outcomes
            .with_label_values(&[service, operation, if result.is_ok() { "ok" } else { "error" }])
            .inc();

        result
    }

    /// Manual reset to CLOSED with cleared counters.
    pub fn reset(&self, service: &str, operation: &str) {
        let key = format!("{service}/{operation}");
        let circuit = self.circuit(&key);
        let mut state = circuit.lock().expect("circuit poisoned");
        *state = CircuitState::new();
        self.record_transition(service, operation, CircuitPhase::Closed);
    }

    pub fn phase(&self, service: &str, operation: &str) -> CircuitPhase {
        let key = format!("{service}/{operation}");
        let circuit = self.circuit(&key);
        let state = circuit.lock().expect("circuit poisoned");
        state.phase
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let map = self.circuits.lock().expect("circuit registry poisoned");
        let mut out: Vec<CircuitSnapshot> = map
            .iter()
            .map(|(key, circuit)| {
                let state = circuit.lock().expect("circuit poisoned");
                let (service, operation) = key.split_once('/').unwrap_or((key.as_str(), ""));
                CircuitSnapshot {
                    service: service.to_string(),
                    operation: operation.to_string(),
                    phase: state.phase.as_str().to_string(),
                    failure_count: state.failure_count,
                    success_count: state.success_count,
                    open_for_ms: state
                        .last_failure
                        .filter(|_| state.phase == CircuitPhase::Open)
                        .map(|at| at.elapsed().as_millis() as u64),
                }
            })
            .collect();
        out.sort_by(|a, b| (&a.service, &a.operation).cmp(&(&b.service, &b.operation)));
        out
    }
}
