//! Polling supervisor.
//!
//! Owns one poll loop per (user, automation) pair. `start_polling` runs a
//! test tick before installing the interval timer; active rows are
//! re-installed on startup with a small stagger. Ticks for one pair never
//! overlap: while one is still running, timer fires are skipped.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::config::Config;
use crate::engine::{Engine, ExecutionContext, RunReport};
use crate::error::{Error, Result};
use crate::nodes::{is_trigger, NodeRegistry};
use crate::storage::{AutomationState, SqliteStore, UserAutomation};
use crate::template::prepare_template;
use crate::tokens::{normalize_tokens, preprocess_workflow};
use crate::workflow::{parse_workflow, Workflow};

struct PollHandle {
    task: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

/// Process-wide registry of poll loops.
pub struct PollSupervisor {
    store: SqliteStore,
    registry: Arc<NodeRegistry>,
    config: Config,
    client: Client,
    loops: Arc<RwLock<HashMap<(String, String), PollHandle>>>,
}

impl PollSupervisor {
    pub fn new(store: SqliteStore, registry: Arc<NodeRegistry>, config: Config) -> Self {
        Self {
            store,
            registry,
            config,
            client: Client::new(),
            loops: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start polling for one pair: verify credentials, run a test tick,
    /// then install the interval timer. A failed test tick marks the row
    /// inactive and surfaces the error.
    pub async fn start_polling(
        &self,
        user_id: &str,
        automation_id: &str,
        interval_override_seconds: Option<u64>,
    ) -> Result<RunReport> {
        let record = self
            .store
            .get_user_automation(user_id, automation_id)
            .await?
            .ok_or_else(|| {
                Error::Storage(format!(
                    "user_automation not found: {}:{}",
                    user_id, automation_id
                ))
            })?;

        let has_tokens = record
            .access_token
            .as_deref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
            || record
                .refresh_token
                .as_deref()
                .map(|t| !t.is_empty())
                .unwrap_or(false);
        if !has_tokens {
            return Err(Error::Auth {
                provider: record.provider.clone(),
                reason: "no OAuth tokens on record".to_string(),
            });
        }

        info!(user = %user_id, automation = %automation_id, "running test tick");
        let report = match self.run_tick(user_id, automation_id).await {
            Ok(report) if report.error.is_none() => report,
            Ok(report) => {
                let message = report.error.clone().unwrap_or_default();
                self.store.set_active(&record.id, false).await.ok();
                return Err(Error::Workflow(format!("test tick failed: {}", message)));
            }
            Err(e) => {
                self.store.set_active(&record.id, false).await.ok();
                return Err(e);
            }
        };

        self.store.set_active(&record.id, true).await?;

        let interval = interval_override_seconds
            .unwrap_or_else(|| self.template_interval_seconds(&record));
        self.install_loop(user_id, automation_id, interval, 0).await;

        info!(
            user = %user_id,
            automation = %automation_id,
            interval_seconds = interval,
            "polling started"
        );
        Ok(report)
    }

    /// Stop one loop and mark the record inactive.
    pub async fn stop_polling(&self, user_id: &str, automation_id: &str) -> Result<()> {
        let key = (user_id.to_string(), automation_id.to_string());
        let removed = self.loops.write().await.remove(&key);
        if let Some(handle) = removed {
            handle.task.abort();
            info!(user = %user_id, automation = %automation_id, "polling stopped");
        }

        let id = format!("{}:{}", user_id, automation_id);
        self.store.set_active(&id, false).await?;
        Ok(())
    }

    /// Cancel every loop. Called on process shutdown; active flags are
    /// left in place so loops resume on the next startup.
    pub async fn stop_all(&self) {
        let mut loops = self.loops.write().await;
        let count = loops.len();
        for (_, handle) in loops.drain() {
            handle.task.abort();
        }
        info!(count, "all poll loops cancelled");
    }

    /// Re-install timers for every active row, staggered to avoid a
    /// thundering herd at startup.
    pub async fn resume_active(&self) -> Result<usize> {
        let active = self.store.list_active().await?;
        let stagger = self.config.polling.startup_stagger_ms;
        let mut resumed = 0;

        for (index, record) in active.iter().enumerate() {
            let interval = self.template_interval_seconds(record);
            self.install_loop(
                &record.user_id,
                &record.automation_id,
                interval,
                stagger * index as u64,
            )
            .await;
            resumed += 1;
        }

        info!(resumed, "resumed active poll loops");
        Ok(resumed)
    }

    /// Number of installed loops.
    pub async fn loop_count(&self) -> usize {
        self.loops.read().await.len()
    }

    /// Whether a tick is currently in flight for the pair.
    pub async fn is_tick_running(&self, user_id: &str, automation_id: &str) -> bool {
        let key = (user_id.to_string(), automation_id.to_string());
        self.loops
            .read()
            .await
            .get(&key)
            .map(|handle| handle.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// One polling iteration: refresh credentials, prepare and inject the
    /// template, run the engine, persist cursor and dedup set.
    pub async fn run_tick(&self, user_id: &str, automation_id: &str) -> Result<RunReport> {
        tick(
            &self.store,
            &self.registry,
            &self.config,
            &self.client,
            user_id,
            automation_id,
        )
        .await
    }

    async fn install_loop(
        &self,
        user_id: &str,
        automation_id: &str,
        interval_seconds: u64,
        initial_delay_ms: u64,
    ) {
        let key = (user_id.to_string(), automation_id.to_string());

        // Replace any existing loop for the pair.
        if let Some(previous) = self.loops.write().await.remove(&key) {
            previous.task.abort();
        }

        let running = Arc::new(AtomicBool::new(false));
        let guard = running.clone();
        let store = self.store.clone();
        let registry = self.registry.clone();
        let config = self.config.clone();
        let client = self.client.clone();
        let user = user_id.to_string();
        let automation = automation_id.to_string();

        let task = tokio::spawn(async move {
            if initial_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(initial_delay_ms)).await;
            }
            let period = std::time::Duration::from_secs(interval_seconds.max(1));
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                if guard
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    debug!(user = %user, automation = %automation, "previous tick still running, skipping");
                    continue;
                }

                match tick(&store, &registry, &config, &client, &user, &automation).await {
                    Ok(report) => {
                        debug!(
                            user = %user,
                            automation = %automation,
                            success = report.success,
                            errors = report.errors.len(),
                            "tick complete"
                        );
                    }
                    Err(e) => {
                        // Auth and transient failures leave the loop
                        // registered; the next tick retries.
                        error!(user = %user, automation = %automation, error = %e, "tick failed");
                    }
                }

                guard.store(false, Ordering::SeqCst);
            }
        });

        self.loops
            .write()
            .await
            .insert(key, PollHandle { task, running });
    }

    fn template_interval_seconds(&self, record: &UserAutomation) -> u64 {
        poll_times_seconds(&record.parameters)
            .unwrap_or(self.config.polling.default_interval_seconds)
    }
}

async fn tick(
    store: &SqliteStore,
    registry: &Arc<NodeRegistry>,
    config: &Config,
    client: &Client,
    user_id: &str,
    automation_id: &str,
) -> Result<RunReport> {
    let mut record = store
        .get_user_automation(user_id, automation_id)
        .await?
        .ok_or_else(|| {
            Error::Storage(format!(
                "user_automation not found: {}:{}",
                user_id, automation_id
            ))
        })?;

    auth::ensure_fresh(client, store, &config.oauth, &mut record).await?;

    let template = store
        .get_template(automation_id)
        .await?
        .ok_or_else(|| Error::Storage(format!("template not found: {}", automation_id)))?;
    let workflow = parse_workflow(&template.definition)?;

    let developer_keys = store.developer_keys().await?;
    let params = parameter_map(&record.parameters);

    let prepared = prepare_template(&workflow, &params, &developer_keys);
    let mut tokens = normalize_tokens(&record_tokens(&record), &HashMap::new());
    tokens.extend(prepared.resolved_credentials.clone());

    let mut prepared_workflow = prepared.workflow;
    preprocess_workflow(&mut prepared_workflow, &tokens);

    let state = &record.automation_data;
    let processed: HashSet<String> = state.processed_files.iter().cloned().collect();

    let mut ctx = ExecutionContext::new(Arc::new(prepared_workflow))
        .with_tokens(tokens)
        .with_initial_data(json!({
            "config": record.parameters,
            "automationId": record.automation_id,
            "userId": record.user_id,
        }))
        .with_processed_set(processed.clone());
    if let Some(cursor) = state.last_poll_time {
        ctx = ctx.with_polling_cursor(cursor);
    }

    // Captured before the engine runs so events arriving during the
    // execution stay inside the next window.
    let execution_start_time = Utc::now();

    let engine = Engine::new(registry.clone());
    let report = engine.run(&mut ctx).await;

    let trigger_keys = trigger_natural_keys(&ctx.workflow, &report);
    let fresh: Vec<String> = trigger_keys
        .into_iter()
        .filter(|k| !processed.contains(k))
        .collect();

    let mut new_state = AutomationState {
        last_poll_time: Some(execution_start_time),
        processed_files: state.processed_files.clone(),
        last_run: Some(execution_start_time),
        total_processed: state.total_processed + fresh.len() as u64,
    };
    new_state.processed_files.extend(fresh.iter().cloned());

    if let Err(e) = store
        .update_poll_state(&record.id, &new_state, execution_start_time)
        .await
    {
        warn!(
            automation = %record.id,
            error = %e,
            "failed to persist poll state, proceeding with in-memory state"
        );
    }

    Ok(report)
}

/// Extract `pollTimes.everyX` (+ optional `unit`) from a parameter tree.
pub fn poll_times_seconds(parameters: &Value) -> Option<u64> {
    let poll_times = parameters.get("pollTimes")?;
    let every_x = poll_times.get("everyX")?.as_u64()?;
    let unit = poll_times
        .get("unit")
        .and_then(|u| u.as_str())
        .unwrap_or("seconds");
    match unit {
        "seconds" => Some(every_x),
        "minutes" => Some(every_x * 60),
        "hours" => Some(every_x * 3600),
        _ => Some(every_x),
    }
}

/// Find the trigger node's output in the report and collect each item's
/// natural key (`id`).
fn trigger_natural_keys(workflow: &Workflow, report: &RunReport) -> Vec<String> {
    let Some(trigger) = workflow.nodes.iter().find(|n| is_trigger(&n.node_type)) else {
        return Vec::new();
    };
    let Some(items) = report.output(&trigger.name) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| item.json.get("id"))
        .filter_map(|id| id.as_str().map(|s| s.to_string()))
        .collect()
}

fn parameter_map(parameters: &Value) -> HashMap<String, Value> {
    parameters
        .as_object()
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn record_tokens(record: &UserAutomation) -> HashMap<String, String> {
    let mut raw = HashMap::new();
    if let Some(access) = record.access_token.as_deref().filter(|t| !t.is_empty()) {
        let name = match record.provider.as_str() {
            "google" => "google_access_token".to_string(),
            "tiktok" => "tiktok_access_token".to_string(),
            "slack" => "slack_access_token".to_string(),
            other => format!("{}_access_token", other),
        };
        raw.insert(name, access.to_string());
    }
    raw
}
