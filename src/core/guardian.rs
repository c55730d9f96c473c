//! Crash Guardian: heartbeat watchdog, restart-with-backoff supervisor, and
//! system/RPC health polling. Grounded on spec.md §4.K and
//! `original_source/tpu/utils/crash_guardian.py` (registration shape,
//! backoff schedule, throttled alerting).

use crate::core::notifier::Notifier;
use crate::core::rpc::RpcClient;
use crate::core::telemetry::CoreTelemetry;
use futures_util::future::BoxFuture;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, warn};

const WATCHDOG_CADENCE_S: u64 = 2;
const BACKOFF_START_S: f64 = 1.0;
const BACKOFF_CAP_S: f64 = 60.0;
const BACKOFF_JITTER_MAX_S: f64 = 0.4;
const MIN_RESTART_INTERVAL_S: f64 = 10.0;
const SYSTEM_CHECK_CADENCE_S: u64 = 60;
const RPC_CHECK_CADENCE_S: u64 = 60;
const ALERT_COOLDOWN_S: f64 = 300.0;

type StartFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// One supervised long-running loop (spec.md §4.K registration shape).
#[derive(Clone)]
pub struct ModuleRegistration {
    pub name: String,
    pub start_fn: StartFn,
    pub heartbeat_timeout_s: f64,
    pub restart: bool,
    pub critical: bool,
    pub startup_grace_s: f64,
    pub min_sleep_s: f64,
}

struct ModuleState {
    handle: tokio::task::JoinHandle<()>,
    last_beat: f64,
    alive: bool,
    backoff_s: f64,
    last_restart: f64,
    restart_count: u64,
    registered_at: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    pub name: String,
    pub alive: bool,
    pub last_beat: f64,
    pub backoff_s: f64,
    pub restart_count: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SystemStats {
    pub cpu_load_1m: f64,
    pub mem_used_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardianStatus {
    pub modules: Vec<ModuleStatus>,
    pub system: SystemStats,
    pub rpc_healthy: bool,
    pub firehose_live: bool,
}

/// Supervises every long-running loop in the process. One instance is
/// shared (via `Arc`) across the watchdog loop, the system-check loop and
/// the RPC-health loop.
pub struct CrashGuardian {
    registrations: Mutex<HashMap<String, ModuleRegistration>>,
    states: Mutex<HashMap<String, ModuleState>>,
    alert_throttle: Mutex<HashMap<String, f64>>,
    notifier: Arc<dyn Notifier>,
    telemetry: Option<Arc<CoreTelemetry>>,
}

impl CrashGuardian {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            registrations: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            alert_throttle: Mutex::new(HashMap::new()),
            notifier,
            telemetry: None,
        }
    }

    /// Attaches process-wide telemetry counters; restarts are recorded as
    /// they happen (spec.md §3 "guardian restarts" gauge).
    pub fn with_telemetry(mut self, telemetry: Arc<CoreTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Registers and immediately starts a module. A second `register` call
    /// for the same name replaces the registration and restarts it — the
    /// guardian never runs two copies of the same named loop.
    pub async fn register(&self, reg: ModuleRegistration) {
        let name = reg.name.clone();
        let now = crate::core::now_epoch();
        let handle = spawn_once(reg.start_fn.clone());
        {
            let mut states = self.states.lock().await;
            if let Some(old) = states.remove(&name) {
                old.handle.abort();
            }
            states.insert(
                name.clone(),
                ModuleState {
                    handle,
                    last_beat: now,
                    alive: true,
                    backoff_s: BACKOFF_START_S,
                    last_restart: now,
                    restart_count: 0,
                    registered_at: now,
                },
            );
        }
        self.registrations.lock().await.insert(name, reg);
    }

    /// Called by a supervised loop on each tick to mark itself alive.
    pub async fn beat(&self, name: &str) {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(name) {
            state.last_beat = crate::core::now_epoch();
            state.alive = true;
        }
    }

    /// Runs forever at `WATCHDOG_CADENCE_S`, restarting any module whose
    /// heartbeat has gone stale past its startup grace period.
    pub async fn run_watchdog(self: Arc<Self>) {
        loop {
            tokio::time::sleep(Duration::from_secs(WATCHDOG_CADENCE_S)).await;
            let names: Vec<String> = self.registrations.lock().await.keys().cloned().collect();
            for name in names {
                self.check_and_restart(&name).await;
            }
        }
    }

    async fn check_and_restart(&self, name: &str) {
        let now = crate::core::now_epoch();
        let Some(reg) = self.registrations.lock().await.get(name).cloned() else {
            return;
        };
        let stale = {
            let states = self.states.lock().await;
            let Some(state) = states.get(name) else { return };
            if now - state.registered_at < reg.startup_grace_s {
                false
            } else {
                now - state.last_beat > reg.heartbeat_timeout_s
            }
        };
        if !stale || !reg.restart {
            return;
        }
        self.restart_module(&reg).await;
    }

    async fn restart_module(&self, reg: &ModuleRegistration) {
        let now = crate::core::now_epoch();
        let (backoff, since_last_restart) = {
            let states = self.states.lock().await;
            match states.get(&reg.name) {
                Some(state) => (state.backoff_s, now - state.last_restart),
                None => (BACKOFF_START_S, f64::MAX),
            }
        };
        if since_last_restart < MIN_RESTART_INTERVAL_S {
            return;
        }

        warn!("[CrashGuardian] module '{}' heartbeat stale, restarting", reg.name);
        {
            let mut states = self.states.lock().await;
            if let Some(state) = states.get_mut(&reg.name) {
                state.handle.abort();
                state.alive = false;
            }
        }

        let jitter: f64 = rand::thread_rng().gen_range(0.0..BACKOFF_JITTER_MAX_S);
        let sleep_s = backoff.max(reg.min_sleep_s) + jitter;
        tokio::time::sleep(Duration::from_secs_f64(sleep_s)).await;

        let handle = spawn_once(reg.start_fn.clone());
        let restarted_at = crate::core::now_epoch();
        let mut states = self.states.lock().await;
        let next_backoff = (backoff * 2.0).min(BACKOFF_CAP_S);
        match states.get_mut(&reg.name) {
            Some(state) => {
                state.handle = handle;
                state.last_beat = restarted_at;
                state.alive = true;
                state.backoff_s = next_backoff;
                state.last_restart = restarted_at;
                state.restart_count += 1;
            }
            None => {
                states.insert(
                    reg.name.clone(),
                    ModuleState {
                        handle,
                        last_beat: restarted_at,
                        alive: true,
                        backoff_s: next_backoff,
                        last_restart: restarted_at,
                        restart_count: 1,
                        registered_at: restarted_at,
                    },
                );
            }
        }
        drop(states);

        if let Some(t) = &self.telemetry {
            t.record_guardian_restart();
        }

        if reg.critical {
            self.alert(&format!("restart:{}", reg.name), &format!("critical module '{}' restarted", reg.name))
                .await;
        }
    }

    /// Sends a notification through `notifier`, but at most once per
    /// `ALERT_COOLDOWN_S` for a given `key` (spec.md §4.K throttled
    /// alerting).
    async fn alert(&self, key: &str, text: &str) {
        let now = crate::core::now_epoch();
        {
            let mut throttle = self.alert_throttle.lock().await;
            if let Some(last) = throttle.get(key) {
                if now - last < ALERT_COOLDOWN_S {
                    return;
                }
            }
            throttle.insert(key.to_string(), now);
        }
        if let Err(e) = self.notifier.send(text).await {
            error!("[CrashGuardian] alert delivery failed: {e}");
        }
    }

    /// Periodic CPU/mem probe (spec.md §4.K, `SYSTEM_CHECK_CADENCE_S`
    /// cadence). Best-effort: on platforms without `/proc`, stats read as
    /// zero rather than erroring.
    pub async fn run_system_checks(self: Arc<Self>) {
        loop {
            let stats = probe_system_stats();
            if stats.cpu_load_1m > 0.9 || stats.mem_used_pct > 90.0 {
                self.alert(
                    "system_stress",
                    &format!(
                        "system stress high: cpu_load={:.2} mem_used_pct={:.1}",
                        stats.cpu_load_1m, stats.mem_used_pct
                    ),
                )
                .await;
            }
            tokio::time::sleep(Duration::from_secs(SYSTEM_CHECK_CADENCE_S)).await;
        }
    }

    /// Periodic RPC health ping (spec.md §4.K, `RPC_CHECK_CADENCE_S`
    /// cadence): a `getLatestBlockhash` call that must merely succeed.
    pub async fn run_rpc_health(self: Arc<Self>, rpc: Arc<dyn RpcClient>) {
        loop {
            match rpc.get_latest_blockhash().await {
                Ok(_) => {}
                Err(e) => {
                    self.alert("rpc_unhealthy", &format!("RPC health check failed: {e}")).await;
                }
            }
            tokio::time::sleep(Duration::from_secs(RPC_CHECK_CADENCE_S)).await;
        }
    }

    pub async fn status_snapshot(&self, rpc_healthy: bool, firehose_live: bool) -> GuardianStatus {
        let states = self.states.lock().await;
        let modules = states
            .iter()
            .map(|(name, s)| ModuleStatus {
                name: name.clone(),
                alive: s.alive,
                last_beat: s.last_beat,
                backoff_s: s.backoff_s,
                restart_count: s.restart_count,
            })
            .collect();
        GuardianStatus {
            modules,
            system: probe_system_stats(),
            rpc_healthy,
            firehose_live,
        }
    }
}

fn spawn_once(start_fn: StartFn) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = start_fn().await {
            warn!("[CrashGuardian] supervised loop exited with error: {e}");
        }
    })
}

#[cfg(target_os = "linux")]
fn probe_system_stats() -> SystemStats {
    let cpu_load_1m = std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|s| s.split_whitespace().next().map(|s| s.to_string()))
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let mem_used_pct = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|contents| {
            let mut total = None;
            let mut available = None;
            for line in contents.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    total = rest.split_whitespace().next().and_then(|v| v.parse::<f64>().ok());
                } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                    available = rest.split_whitespace().next().and_then(|v| v.parse::<f64>().ok());
                }
            }
            match (total, available) {
                (Some(t), Some(a)) if t > 0.0 => Some((1.0 - a / t) * 100.0),
                _ => None,
            }
        })
        .unwrap_or(0.0);

    SystemStats { cpu_load_1m, mem_used_pct }
}

#[cfg(not(target_os = "linux"))]
fn probe_system_stats() -> SystemStats {
    SystemStats::default()
}
