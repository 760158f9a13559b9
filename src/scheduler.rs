use chrono::Local;
use cron::Schedule;
use std::{
    str::FromStr,
    sync::{Arc, Mutex, PoisonError, RwLock},
};
use thiserror::Error;
use tokio::{task::JoinHandle, time};
use toml::Table;
use tracing::{debug, error, info, warn};

use crate::{
    provision::{ProvisionOptions, ProvisionResult, Provisioner},
    rule::{self, Rule},
    settings::{non_empty, touches_schedule, ConfigStore, Settings, SettingsError},
    source::{RuleSource, SourceEndpoint},
};

/// What a single `execute_once` call did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Another cycle held the snapshot; this tick was dropped.
    Busy,
    /// The rule source is not configured.
    Unconfigured,
    Completed(CycleReport),
    Failed(String),
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub fetched: usize,
    pub new_rules: usize,
    pub results: Vec<ProvisionResult>,
}

/// Cron-driven polling loop owning the previous rule snapshot.
pub struct Scheduler<S: RuleSource> {
    cycle: Arc<Cycle<S>>,
    job: Mutex<Option<JoinHandle<()>>>,
}

struct Cycle<S: RuleSource> {
    store: Arc<dyn ConfigStore>,
    source: S,
    provisioner: Provisioner,

    // Doubles as the re-entrancy guard: a cycle holds it from fetch to replace.
    previous: tokio::sync::Mutex<Option<Vec<Rule>>>,
    schedule: RwLock<Option<Schedule>>,
}

impl<S: RuleSource + 'static> Scheduler<S> {
    pub fn new(store: Arc<dyn ConfigStore>, source: S, provisioner: Provisioner) -> Self {
        Self {
            cycle: Arc::new(Cycle {
                store,
                source,
                provisioner,
                previous: tokio::sync::Mutex::new(None),
                schedule: RwLock::new(None),
            }),
            job: Mutex::new(None),
        }
    }

    /// Replaces any running job with one for `cron_expression` and runs a cycle right away.
    pub fn start(&self, cron_expression: &str) -> Result<(), SchedulerError> {
        self.cancel_job();

        let schedule = parse_cron(cron_expression).map_err(|e| {
            error!(cron = cron_expression, error = %e, "failed to start scheduler");
            e
        })?;
        *self.cycle.schedule.write().unwrap_or_else(PoisonError::into_inner) = Some(schedule.clone());

        let cycle = self.cycle.clone();
        tokio::spawn(async move {
            cycle.execute_once().await;
        });

        let cycle = self.cycle.clone();
        let handle = tokio::spawn(cycle.tick_loop(schedule));
        *self.job.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(outcome = "success", cron = cron_expression, "scheduler started");
        Ok(())
    }

    /// Cancels future ticks. A cycle already in flight runs to completion.
    pub fn stop(&self) {
        if self.cancel_job() {
            info!("scheduler stopped");
        }
    }

    /// Restarts with the cron expression currently in the config store.
    pub fn reload(&self) -> Result<(), SchedulerError> {
        self.stop();

        let settings = self.cycle.store.get()?;
        match non_empty(settings.cron_expression.as_deref()) {
            Some(cron_expression) => self.start(cron_expression),
            None => {
                warn!("no cron_expression configured, scheduler not started");
                Ok(())
            }
        }
    }

    /// Persists `patch` and reloads when it touches the schedule or the rule source.
    pub fn apply_settings(&self, patch: Table) -> Result<Settings, SchedulerError> {
        let reload = touches_schedule(&patch);
        let settings = self.cycle.store.set(patch)?;
        if reload {
            self.reload()?;
        }
        Ok(settings)
    }

    pub async fn execute_once(&self) -> CycleOutcome {
        self.cycle.execute_once().await
    }

    pub fn is_running(&self) -> bool {
        self.job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |job| !job.is_finished())
    }

    fn cancel_job(&self) -> bool {
        *self.cycle.schedule.write().unwrap_or_else(PoisonError::into_inner) = None;
        match self.job.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(job) => {
                job.abort();
                true
            }
            None => false,
        }
    }
}

impl<S: RuleSource> Drop for Scheduler<S> {
    fn drop(&mut self) {
        if let Some(job) = self.job.lock().unwrap_or_else(PoisonError::into_inner).take() {
            job.abort();
        }
    }
}

impl<S: RuleSource + 'static> Cycle<S> {
    async fn tick_loop(self: Arc<Self>, schedule: Schedule) {
        for next in schedule.upcoming(Local) {
            let Ok(wait) = (next - Local::now()).to_std() else {
                debug!(%next, "missed tick, skipping");
                continue;
            };
            time::sleep(wait).await;

            let cycle = self.clone();
            tokio::spawn(async move {
                cycle.execute_once().await;
            });
        }
        warn!("cron schedule has no further runs");
    }

    async fn execute_once(&self) -> CycleOutcome {
        let Ok(mut previous) = self.previous.try_lock() else {
            warn!("previous cycle still running, skipping tick");
            return CycleOutcome::Busy;
        };

        let settings = match self.store.get() {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "failed to read configuration");
                return CycleOutcome::Failed(e.to_string());
            }
        };

        let endpoint = match source_endpoint(&settings) {
            Ok(endpoint) => endpoint,
            Err(missing) => {
                warn!(missing, "rule source not configured, skipping cycle");
                return CycleOutcome::Unconfigured;
            }
        };

        let cycle_timeout = match settings.cycle_timeout() {
            Ok(timeout) => timeout,
            Err(e) => {
                error!(error = %e, "invalid cycle timeout");
                return CycleOutcome::Failed(e.to_string());
            }
        };

        // The timeout bounds the fetch only. Provider calls carry their own
        // request timeout, and a cycle that got rules always commits them.
        let outcome = match time::timeout(cycle_timeout, self.source.fetch_rules(&endpoint)).await {
            Ok(Ok(current)) => {
                let report = self.advance(&settings, current, &mut previous).await;
                info!(
                    outcome = "success",
                    fetched = report.fetched,
                    new_rules = report.new_rules,
                    provisioned = report.results.iter().filter(|r| r.success).count(),
                    "polling cycle completed"
                );
                CycleOutcome::Completed(report)
            }
            Ok(Err(e)) => {
                error!(error = %e, "failed to fetch rules");
                CycleOutcome::Failed(e.to_string())
            }
            Err(_) => {
                error!(timeout = ?cycle_timeout, "rule fetch timed out");
                CycleOutcome::Failed(format!("timed out after {cycle_timeout:?}"))
            }
        };

        info!(next = %self.next_run(), "next scheduled run");
        outcome
    }

    /// Diffs `current` against the snapshot, replaces the snapshot, then
    /// provisions the new rules. New rules are never attempted twice.
    #[tracing::instrument(skip_all)]
    async fn advance(
        &self,
        settings: &Settings,
        current: Vec<Rule>,
        previous: &mut Option<Vec<Rule>>,
    ) -> CycleReport {
        let mut report = CycleReport {
            fetched: current.len(),
            ..Default::default()
        };

        let new_rules = match previous.as_deref() {
            Some(previous) => {
                let changed = rule::changed_under_known_key(&current, previous);
                if changed > 0 {
                    debug!(changed, "rules changed under known keys, not reconciled");
                }

                let new_rules = rule::diff(&current, previous);
                for r in &new_rules {
                    info!(key = %r.key, domains = ?r.domains.normalize(), "new rule detected");
                }
                new_rules
            }
            None => {
                info!(rules = current.len(), "initial snapshot taken, existing rules are not provisioned");
                Vec::new()
            }
        };
        report.new_rules = new_rules.len();
        *previous = Some(current);

        if !new_rules.is_empty() {
            match ProvisionOptions::from_settings(settings) {
                Some(opts) => {
                    report.results = self.provisioner.provision_all(&new_rules, &opts).await;
                }
                None => warn!(
                    missing = "edge.site_id",
                    "edge configuration incomplete, skipping DNS provisioning"
                ),
            }
        }

        report
    }

    fn next_run(&self) -> String {
        self.schedule
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|schedule| schedule.upcoming(Local).next())
            .map(|next| next.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_owned())
    }
}

fn source_endpoint(settings: &Settings) -> Result<SourceEndpoint, &'static str> {
    let url = non_empty(settings.source.url.as_deref()).ok_or("source.url")?;
    let token = non_empty(settings.source.token.as_deref()).ok_or("source.token")?;
    Ok(SourceEndpoint {
        url: url.to_owned(),
        token: token.to_owned(),
    })
}

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Parses a cron expression; five-field expressions get a leading seconds field.
///
/// Numeric weekdays count from Sunday = 0 (7 is Sunday too). They are
/// rewritten to names, since the `cron` crate counts from Sunday = 1.
/// Seven-field expressions are passed through untouched.
pub fn parse_cron(expression: &str) -> Result<Schedule, SchedulerError> {
    let expression = expression.trim();
    let mut fields: Vec<String> = expression.split_whitespace().map(ToOwned::to_owned).collect();
    if fields.len() == 5 {
        fields.insert(0, "0".to_owned());
    }
    if fields.len() == 6 {
        fields[5] = weekday_names(&fields[5]);
    }

    Schedule::from_str(&fields.join(" ")).map_err(|source| SchedulerError::InvalidCron {
        expression: expression.to_owned(),
        source,
    })
}

fn weekday_names(field: &str) -> String {
    field
        .split(',')
        .map(|item| numeric_weekdays(item).unwrap_or_else(|| item.to_owned()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Expands a numeric `n`, `n-m`, `*/s`, `n/s` or `n-m/s` item into day names.
/// Anything else is left for the cron parser to accept or reject.
fn numeric_weekdays(item: &str) -> Option<String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None => (item, 1),
    };
    if range == "*" && step == 1 {
        return None;
    }

    let (start, end) = match (range, range.split_once('-')) {
        ("*", _) => (0, 6),
        (_, Some((from, to))) => (from.parse::<usize>().ok()?, to.parse::<usize>().ok()?),
        (single, None) => {
            let day = single.parse::<usize>().ok()?;
            (day, if item.contains('/') { 6 } else { day })
        }
    };
    if start > end || end >= WEEKDAYS.len() {
        return None;
    }

    let mut names: Vec<&str> = Vec::new();
    for day in (start..=end).step_by(step) {
        if !names.contains(&WEEKDAYS[day]) {
            names.push(WEEKDAYS[day]);
        }
    }
    Some(names.join(","))
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression {expression:?}: {source}")]
    InvalidCron {
        expression: String,
        source: cron::error::Error,
    },
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dns::{CreatedRecord, MockEdgeProvider, ProviderError},
        rate_limit::RateLimit,
        rule::Domains,
        settings::MemoryConfigStore,
        source::{lucky::LuckyError, MockRuleSource},
    };
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    const CONFIG: &str = r#"
        [source]
        url = "http://lucky.invalid/api/webservice/rules"
        token = "t"
        [edge]
        site_id = 1
        target_suffix = "edge.example.net"
    "#;

    fn rule(key: &str, domain: &str) -> Rule {
        Rule::new(key, Domains::List(vec![domain.to_owned()]))
    }

    fn provisioner(edge: MockEdgeProvider) -> Provisioner {
        Provisioner::new(Arc::new(edge), vec![], RateLimit::per_second(1000))
    }

    fn store(raw: &str) -> Arc<MemoryConfigStore> {
        Arc::new(MemoryConfigStore::from_toml(raw))
    }

    fn completed(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => report,
            other => panic!("expected a completed cycle, got {other:?}"),
        }
    }

    fn expect_snapshots(source: &mut MockRuleSource, snapshots: Vec<Result<Vec<Rule>, ()>>) {
        let mut seq = Sequence::new();
        for snapshot in snapshots {
            source
                .expect_fetch_rules()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| match &snapshot {
                    Ok(rules) => Ok(rules.clone()),
                    Err(()) => Err(LuckyError::BadBaseUrl),
                });
        }
    }

    /// Counts fetches and optionally blocks each one until notified.
    struct GatedSource {
        calls: Arc<AtomicUsize>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait::async_trait]
    impl RuleSource for GatedSource {
        type Error = LuckyError;

        async fn fetch_rules(&self, _: &SourceEndpoint) -> Result<Vec<Rule>, Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(vec![rule("a", "a.example.com")])
        }
    }

    async fn wait_for_calls(calls: &AtomicUsize, n: usize) {
        time::timeout(Duration::from_secs(5), async {
            while calls.load(Ordering::SeqCst) < n {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("source was not called");
    }

    #[test]
    fn parses_five_and_six_field_cron() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("0 */5 * * * *").is_ok());
        assert!(parse_cron(" 0 0 3 * * * ").is_ok());
        assert!(matches!(
            parse_cron("every five minutes"),
            Err(SchedulerError::InvalidCron { .. })
        ));
    }

    #[test]
    fn numeric_weekdays_count_from_sunday_zero() {
        use chrono::{Datelike, Utc, Weekday};

        let next = |expr: &str| {
            parse_cron(expr)
                .unwrap()
                .upcoming(Utc)
                .take(14)
                .map(|t| t.weekday())
                .collect::<Vec<_>>()
        };

        assert!(next("0 9 * * 1").iter().all(|d| *d == Weekday::Mon));
        assert!(next("0 9 * * 0").iter().all(|d| *d == Weekday::Sun));
        assert!(next("0 9 * * 7").iter().all(|d| *d == Weekday::Sun));
        assert!(next("0 0 9 * * 6").iter().all(|d| *d == Weekday::Sat));
        assert!(next("0 9 * * 1-5")
            .iter()
            .all(|d| !matches!(d, Weekday::Sat | Weekday::Sun)));

        assert_eq!(weekday_names("1-5"), "MON,TUE,WED,THU,FRI");
        assert_eq!(weekday_names("*/2"), "SUN,TUE,THU,SAT");
        assert_eq!(weekday_names("0,7,3"), "SUN,SUN,WED");
        assert_eq!(weekday_names("*"), "*");
        assert_eq!(weekday_names("MON-FRI"), "MON-FRI");
        assert!(parse_cron("0 9 * * 9").is_err());
    }

    #[tokio::test]
    async fn first_cycle_only_takes_snapshot_and_repeats_provision_nothing() {
        let a = rule("a", "a.example.com");
        let b = rule("b", "b.example.com");

        let mut source = MockRuleSource::new();
        expect_snapshots(
            &mut source,
            vec![
                Ok(vec![a.clone()]),
                Ok(vec![a.clone()]),
                Ok(vec![a.clone(), b.clone()]),
                Ok(vec![a.clone(), b.clone()]),
            ],
        );

        let mut edge = MockEdgeProvider::new();
        edge.expect_create_record()
            .withf(|req| req.record_name == "b.example.com" && req.target_value == "b.edge.example.net")
            .times(1)
            .returning(|_| {
                Ok(CreatedRecord {
                    record_id: "1".into(),
                    raw: serde_json::Value::Null,
                })
            });

        let scheduler = Scheduler::new(store(CONFIG), source, provisioner(edge));

        let first = completed(scheduler.execute_once().await);
        assert_eq!((first.fetched, first.new_rules), (1, 0));

        let second = completed(scheduler.execute_once().await);
        assert_eq!(second.new_rules, 0);
        assert!(second.results.is_empty());

        let third = completed(scheduler.execute_once().await);
        assert_eq!(third.new_rules, 1);
        assert_eq!(third.results.len(), 1);
        assert!(third.results[0].success);

        let fourth = completed(scheduler.execute_once().await);
        assert_eq!(fourth.new_rules, 0);
        assert!(fourth.results.is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_snapshot() {
        let a = rule("a", "a.example.com");
        let b = rule("b", "b.example.com");

        let mut source = MockRuleSource::new();
        expect_snapshots(
            &mut source,
            vec![Ok(vec![a.clone()]), Err(()), Ok(vec![a.clone(), b.clone()])],
        );

        let mut edge = MockEdgeProvider::new();
        edge.expect_create_record()
            .withf(|req| req.record_name == "b.example.com")
            .times(1)
            .returning(|_| {
                Ok(CreatedRecord {
                    record_id: "1".into(),
                    raw: serde_json::Value::Null,
                })
            });

        let scheduler = Scheduler::new(store(CONFIG), source, provisioner(edge));

        completed(scheduler.execute_once().await);
        assert!(matches!(scheduler.execute_once().await, CycleOutcome::Failed(_)));
        let report = completed(scheduler.execute_once().await);
        assert_eq!(report.new_rules, 1);
    }

    #[tokio::test]
    async fn provider_failures_do_not_fail_the_cycle() {
        let mut source = MockRuleSource::new();
        expect_snapshots(
            &mut source,
            vec![Ok(vec![]), Ok(vec![rule("a", "a.example.com")])],
        );

        let mut edge = MockEdgeProvider::new();
        edge.expect_create_record()
            .times(1)
            .returning(|_| Err(ProviderError::MissingCredentials("edge.access_key_id")));

        let scheduler = Scheduler::new(store(CONFIG), source, provisioner(edge));
        completed(scheduler.execute_once().await);

        let report = completed(scheduler.execute_once().await);
        assert_eq!(report.results.len(), 1);
        assert!(!report.results[0].success);
    }

    #[tokio::test]
    async fn unconfigured_source_skips_without_fetching() {
        let mut source = MockRuleSource::new();
        source.expect_fetch_rules().never();

        let scheduler = Scheduler::new(
            store("[source]\nurl = \"http://lucky.invalid\""),
            source,
            provisioner(MockEdgeProvider::new()),
        );

        assert!(matches!(scheduler.execute_once().await, CycleOutcome::Unconfigured));
    }

    #[tokio::test]
    async fn missing_site_id_skips_provisioning_but_advances_snapshot() {
        let a = rule("a", "a.example.com");
        let b = rule("b", "b.example.com");

        let mut source = MockRuleSource::new();
        expect_snapshots(
            &mut source,
            vec![Ok(vec![a.clone()]), Ok(vec![a.clone(), b.clone()]), Ok(vec![a, b])],
        );

        let mut edge = MockEdgeProvider::new();
        edge.expect_create_record().never();

        let config = store("[source]\nurl = \"http://lucky.invalid\"\ntoken = \"t\"");
        let scheduler = Scheduler::new(config.clone(), source, provisioner(edge));

        completed(scheduler.execute_once().await);
        let second = completed(scheduler.execute_once().await);
        assert_eq!(second.new_rules, 1);
        assert!(second.results.is_empty());

        config.set(toml::from_str("[edge]\nsite_id = 1").unwrap()).unwrap();
        let third = completed(scheduler.execute_once().await);
        assert_eq!(third.new_rules, 0);
    }

    #[tokio::test]
    async fn overlapping_cycle_is_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let source = GatedSource {
            calls: calls.clone(),
            gate: Some(gate.clone()),
        };
        let scheduler = Arc::new(Scheduler::new(
            store(CONFIG),
            source,
            provisioner(MockEdgeProvider::new()),
        ));

        let running = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.execute_once().await })
        };
        wait_for_calls(&calls, 1).await;

        assert!(matches!(scheduler.execute_once().await, CycleOutcome::Busy));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        completed(running.await.unwrap());
    }

    #[tokio::test]
    async fn fetch_timeout_keeps_previous_snapshot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = GatedSource {
            calls: calls.clone(),
            gate: Some(Arc::new(Notify::new())),
        };
        let scheduler = Scheduler::new(
            store(&format!("cycle_timeout = \"50ms\"\n{CONFIG}")),
            source,
            provisioner(MockEdgeProvider::new()),
        );

        assert!(matches!(scheduler.execute_once().await, CycleOutcome::Failed(_)));
        assert!(scheduler.cycle.previous.lock().await.is_none());
    }

    /// Edge provider that takes `delay` per call and records what it created.
    struct SlowEdge {
        delay: Duration,
        created: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl crate::dns::EdgeProvider for SlowEdge {
        async fn create_record(
            &self,
            request: &crate::dns::ProvisionRequest,
        ) -> Result<CreatedRecord, ProviderError> {
            time::sleep(self.delay).await;
            let mut created = self.created.lock().unwrap();
            created.push(request.record_name.clone());
            Ok(CreatedRecord {
                record_id: created.len().to_string(),
                raw: serde_json::Value::Null,
            })
        }

        async fn get_record(&self, _: &str) -> Result<crate::dns::EdgeRecord, ProviderError> {
            Err(ProviderError::InvalidRequest("not used".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provisioning_commits_snapshot_and_never_repeats_creates() {
        let a = rule("a", "a.example.com");
        let b = Rule::new(
            "b",
            Domains::List(vec!["b1.example.com".into(), "b2.example.com".into()]),
        );

        let mut source = MockRuleSource::new();
        expect_snapshots(
            &mut source,
            vec![
                Ok(vec![a.clone()]),
                Ok(vec![a.clone(), b.clone()]),
                Ok(vec![a, b]),
            ],
        );

        let created = Arc::new(Mutex::new(Vec::new()));
        let edge = SlowEdge {
            delay: Duration::from_millis(60),
            created: created.clone(),
        };
        let scheduler = Scheduler::new(
            store(&format!("cycle_timeout = \"100ms\"\n{CONFIG}")),
            source,
            Provisioner::new(Arc::new(edge), vec![], RateLimit::per_second(1000)),
        );

        completed(scheduler.execute_once().await);

        let report = completed(scheduler.execute_once().await);
        assert_eq!(report.new_rules, 1);
        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| r.success));

        let report = completed(scheduler.execute_once().await);
        assert_eq!(report.new_rules, 0);
        assert!(report.results.is_empty());

        assert_eq!(
            *created.lock().unwrap(),
            vec!["b1.example.com".to_owned(), "b2.example.com".to_owned()]
        );
    }

    #[tokio::test]
    async fn start_then_stop_runs_only_the_immediate_cycle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = GatedSource {
            calls: calls.clone(),
            gate: None,
        };
        let scheduler = Scheduler::new(store(CONFIG), source, provisioner(MockEdgeProvider::new()));

        scheduler.start("0 0 0 1 1 *").unwrap();
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());

        wait_for_calls(&calls, 1).await;
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Stopping twice is harmless.
        scheduler.stop();
    }

    #[tokio::test]
    async fn invalid_cron_does_not_start() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = GatedSource {
            calls: calls.clone(),
            gate: None,
        };
        let scheduler = Scheduler::new(store(CONFIG), source, provisioner(MockEdgeProvider::new()));

        assert!(scheduler.start("not a cron").is_err());
        assert!(!scheduler.is_running());
        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reload_follows_config_changes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = GatedSource {
            calls: calls.clone(),
            gate: None,
        };
        let scheduler = Scheduler::new(store(CONFIG), source, provisioner(MockEdgeProvider::new()));

        scheduler.reload().unwrap();
        assert!(!scheduler.is_running());

        scheduler
            .apply_settings(toml::from_str("cron_expression = \"0 0 1 1 *\"").unwrap())
            .unwrap();
        assert!(scheduler.is_running());
        wait_for_calls(&calls, 1).await;
        assert_ne!(scheduler.cycle.next_run(), "unknown");

        scheduler
            .apply_settings(toml::from_str("[edge]\nbiz_name = \"api\"").unwrap())
            .unwrap();
        assert!(scheduler.is_running());

        scheduler.stop();
        assert_eq!(scheduler.cycle.next_run(), "unknown");
    }
}
