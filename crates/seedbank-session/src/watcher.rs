//! Event watcher: drains engine events and offers them to match rules.
//!
//! The inline variant is stepped by its owner, once per worker tick. The
//! concurrent variant runs its loop on a dedicated task; rule mutations from
//! the worker are serialized with the loop through a mutex.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use seedbank_torrent_core::{EngineEvent, TransferEngine, event_kind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::ipc::QueueItem;
use crate::rule::{MatchRule, RuleEffect, RuleSpec};

/// Iteration cap applied unless configured otherwise.
pub const DEFAULT_LOOP_LIMIT: u32 = 250;
/// Sleep between two iterations of the concurrent loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Watcher construction parameters.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Label used in logs.
    pub label: String,
    /// Stop after this many iterations; `0` runs until stopped.
    pub loop_limit: u32,
    /// Sleep between iterations of the concurrent loop.
    pub poll_interval: Duration,
    /// Offer each event to every rule instead of stopping at the first match.
    pub match_all: bool,
    /// Log every drained event.
    pub verbose: bool,
}

impl WatcherSettings {
    /// Settings with the stock limits.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            loop_limit: DEFAULT_LOOP_LIMIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            match_all: true,
            verbose: false,
        }
    }
}

/// How the watcher loop is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherMode {
    /// Stepped by the owner through [`EventWatcher::pump`].
    Inline,
    /// Runs on its own task once started.
    Concurrent,
}

/// Lifecycle of a watcher; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Constructed, not yet started.
    Idle,
    /// Draining events.
    Running,
    /// Finished or stopped.
    Stopped,
}

impl WatcherState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Stopped => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Named rules of one watcher.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: BTreeMap<String, MatchRule>,
}

impl RuleSet {
    /// Register a rule.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DuplicateRule`] if the name is taken.
    pub fn add(&mut self, spec: RuleSpec) -> SessionResult<()> {
        if self.rules.contains_key(&spec.name) {
            return Err(SessionError::DuplicateRule { name: spec.name });
        }
        self.rules.insert(spec.name.clone(), MatchRule::new(spec));
        Ok(())
    }

    /// Drop a rule; returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.rules.remove(name).is_some()
    }

    /// Drop every rule.
    pub fn clear(&mut self) {
        self.rules.clear();
    }

    /// Whether a rule is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Registered rule by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MatchRule> {
        self.rules.get(name)
    }

    /// Number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rule is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether every rule has expired. Holds vacuously for an empty set.
    #[must_use]
    pub fn is_fully_matched(&self) -> bool {
        self.rules.values().all(MatchRule::is_expired)
    }

    /// Offer one event to the rules and collect the side effects.
    pub fn dispatch(&mut self, event: &EngineEvent, match_all: bool) -> Vec<RuleEffect> {
        let mut effects = Vec::new();
        for rule in self.rules.values_mut() {
            let outcome = rule.observe(event);
            effects.extend(outcome.effect);
            if outcome.matched && !match_all {
                break;
            }
        }
        effects
    }
}

struct Shared {
    settings: WatcherSettings,
    engine: Arc<dyn TransferEngine>,
    reports: mpsc::Sender<QueueItem>,
    rules: Mutex<RuleSet>,
    state: AtomicU8,
    iterations: AtomicU32,
}

impl Shared {
    fn rules(&self) -> MutexGuard<'_, RuleSet> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> WatcherState {
        WatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn finish(&self) {
        self.state
            .store(WatcherState::Stopped.as_u8(), Ordering::Release);
    }

    async fn drain(&self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        loop {
            match self.engine.pop_next_event().await {
                Ok(Some(event)) => {
                    if self.settings.verbose && event.kind != event_kind::STATS {
                        info!(
                            watcher = %self.settings.label,
                            kind = %event.kind,
                            message = %event.message,
                            "engine event"
                        );
                    }
                    events.push(event);
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(watcher = %self.settings.label, error = %err, "event drain failed");
                    break;
                }
            }
        }
        events
    }

    fn apply(&self, effects: Vec<RuleEffect>) {
        for effect in effects {
            match effect {
                RuleEffect::Log(line) => info!(watcher = %self.settings.label, "{line}"),
                RuleEffect::Forward(report) => match report.to_item() {
                    Ok(item) => {
                        if let Err(err) = self.reports.try_send(item) {
                            warn!(watcher = %self.settings.label, error = %err, "dropping watcher report");
                        }
                    }
                    Err(err) => {
                        warn!(watcher = %self.settings.label, error = %err, "unencodable watcher report");
                    }
                },
            }
        }
    }

    /// One loop iteration; returns whether the watcher keeps running.
    async fn iterate(&self) -> bool {
        if self.state() != WatcherState::Running {
            return false;
        }
        let limit = self.settings.loop_limit;
        if limit > 0 && self.iterations.load(Ordering::Acquire) >= limit {
            info!(watcher = %self.settings.label, "watch loop limit reached");
            self.finish();
            return false;
        }

        let events = self.drain().await;
        let (effects, fully_matched) = {
            let mut rules = self.rules();
            let mut effects = Vec::new();
            for event in &events {
                effects.extend(rules.dispatch(event, self.settings.match_all));
            }
            (effects, rules.is_fully_matched())
        };
        self.apply(effects);

        if fully_matched {
            info!(watcher = %self.settings.label, "fully matched, exiting");
            self.finish();
            return false;
        }
        if limit > 0 {
            self.iterations.fetch_add(1, Ordering::AcqRel);
        }
        self.state() == WatcherState::Running
    }
}

/// Watcher over one engine's event stream.
pub struct EventWatcher {
    mode: WatcherMode,
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl EventWatcher {
    /// Build an idle watcher with the given rules. Side effects that forward
    /// reports are sent on `reports`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DuplicateRule`] when two rules share a name.
    pub fn new(
        mode: WatcherMode,
        settings: WatcherSettings,
        engine: Arc<dyn TransferEngine>,
        reports: mpsc::Sender<QueueItem>,
        rules: Vec<RuleSpec>,
    ) -> SessionResult<Self> {
        let mut set = RuleSet::default();
        for spec in rules {
            set.add(spec)?;
        }
        Ok(Self {
            mode,
            shared: Arc::new(Shared {
                settings,
                engine,
                reports,
                rules: Mutex::new(set),
                state: AtomicU8::new(WatcherState::Idle.as_u8()),
                iterations: AtomicU32::new(0),
            }),
            task: None,
        })
    }

    /// Driving mode.
    #[must_use]
    pub const fn mode(&self) -> WatcherMode {
        self.mode
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WatcherState {
        self.shared.state()
    }

    /// Move to `Running`; the concurrent variant spawns its loop.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::WatcherStopped`] once the watcher stopped.
    pub fn start(&mut self) -> SessionResult<()> {
        let transition = self.shared.state.compare_exchange(
            WatcherState::Idle.as_u8(),
            WatcherState::Running.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        match transition {
            Ok(_) => {}
            Err(current) if WatcherState::from_u8(current) == WatcherState::Running => {
                return Ok(());
            }
            Err(_) => {
                return Err(SessionError::WatcherStopped {
                    label: self.shared.settings.label.clone(),
                });
            }
        }
        debug!(watcher = %self.shared.settings.label, mode = ?self.mode, "starting event watcher");
        if self.mode == WatcherMode::Concurrent {
            let shared = Arc::clone(&self.shared);
            self.task = Some(tokio::spawn(async move {
                while shared.iterate().await {
                    tokio::time::sleep(shared.settings.poll_interval).await;
                }
                debug!(watcher = %shared.settings.label, "event watcher loop finished");
            }));
        }
        Ok(())
    }

    /// Run one iteration of the inline variant. Returns whether the watcher
    /// is still running; the concurrent variant only reports liveness.
    pub async fn pump(&self) -> bool {
        match self.mode {
            WatcherMode::Inline => self.shared.iterate().await,
            WatcherMode::Concurrent => self.is_alive(),
        }
    }

    /// Run the loop in the caller's control flow until the watcher stops.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::WatcherStopped`] when already stopped.
    pub async fn run(&mut self) -> SessionResult<()> {
        if self.mode == WatcherMode::Concurrent {
            self.start()?;
            self.join().await;
            return Ok(());
        }
        self.start()?;
        while self.shared.iterate().await {
            tokio::time::sleep(self.shared.settings.poll_interval).await;
        }
        Ok(())
    }

    /// Request the loop to stop. Terminal.
    pub fn stop(&self) {
        if self.state() != WatcherState::Stopped {
            info!(watcher = %self.shared.settings.label, "stopping event watcher");
        }
        self.shared.finish();
    }

    /// Whether the loop is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        let task_alive = self
            .task
            .as_ref()
            .is_none_or(|task| !task.is_finished());
        self.state() == WatcherState::Running && task_alive
    }

    /// Wait for the concurrent loop to exit.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(watcher = %self.shared.settings.label, error = %err, "event watcher task failed");
        }
    }

    /// Register a rule.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DuplicateRule`] if the name is taken.
    pub fn add(&self, spec: RuleSpec) -> SessionResult<()> {
        let name = spec.name.clone();
        self.shared.rules().add(spec)?;
        debug!(watcher = %self.shared.settings.label, rule = %name, "added match rule");
        Ok(())
    }

    /// Drop a rule; returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.shared.rules().remove(name)
    }

    /// Drop every rule.
    pub fn clear(&self) {
        self.shared.rules().clear();
    }

    /// Whether a rule is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.shared.rules().has(name)
    }

    /// Match count of a rule.
    #[must_use]
    pub fn match_count(&self, name: &str) -> Option<u32> {
        self.shared.rules().get(name).map(MatchRule::match_count)
    }

    /// Whether every rule has expired.
    #[must_use]
    pub fn is_fully_matched(&self) -> bool {
        self.shared.rules().is_fully_matched()
    }
}
