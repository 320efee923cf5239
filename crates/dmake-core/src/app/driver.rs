//! Driver: owns the job's Space and walks the dependency graph to completion.
//!
//! The driver never talks to workers directly. It writes `todo` entries for
//! ready rules and reacts to the task events the Space publishes:
//!
//! | event               | entry        | action                                   |
//! |---------------------|--------------|------------------------------------------|
//! | write               | `done`       | take it, mark node done, schedule parents |
//! | write               | `failed`     | take it, stop the job                     |
//! | write               | `working`    | take the `scheduled` timer                |
//! | take                | `todo`       | write a `scheduled` timer                 |
//! | expire              | `working`    | restore `todo` (worker died)              |
//! | expire              | `scheduled`  | restore `todo` (claim never confirmed)    |

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::builder::{BuildError, check_sources};
use super::status::{JobOutcome, JobReport};
use crate::config::DriverConfig;
use crate::domain::{CONFIG_JOB, CONFIG_PERIOD, Entry, JobId, Kind, NodeContent, TaskState, Template};
use crate::graph::{Graph, NodeId};
use crate::ports::{ArtifactStore, Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::space::{EventKind, InMemorySpace, Space, SpaceError, SpaceServer, Subscription, Wait};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Space(#[from] SpaceError),

    #[error("cannot serve the space: {0}")]
    Bind(#[source] std::io::Error),

    #[error("space closed while the job was running")]
    SpaceClosed,

    #[error("interrupted")]
    Interrupted,
}

enum Flow {
    Continue,
    Finished(JobOutcome),
}

#[derive(Default)]
struct Counters {
    dispatched: usize,
    completed: usize,
    restored: usize,
}

pub struct Driver {
    config: DriverConfig,
    graph: Graph,
    space: Arc<InMemorySpace>,
    artifacts: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,

    /// Nodes reachable from the entry point; nothing else is scheduled.
    scope: HashSet<NodeId>,
    counters: Counters,
    started: Option<(DateTime<Utc>, Instant)>,
}

impl Driver {
    /// The driver owns `space` for the job: it is closed when `run` returns.
    pub fn new(config: DriverConfig, graph: Graph, space: Arc<InMemorySpace>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        let scope = graph.root().map(|root| graph.reachable(root)).unwrap_or_default();
        Self {
            config,
            graph,
            space,
            artifacts,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            scope,
            counters: Counters::default(),
            started: None,
        }
    }

    /// Run the job until the entry point is done, a task fails, or
    /// `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<JobReport, DriverError> {
        let job_id = self.ids.job_id();
        tracing::info!(job = %self.config.job_name, %job_id, nodes = self.scope.len(), "starting job");

        let server_stop = shutdown.child_token();
        let result = self.run_job(&shutdown, &server_stop).await;

        server_stop.cancel();
        self.withdraw_pending().await;
        self.space.close().await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job = %self.config.job_name, error = %e, "job aborted");
                return Err(e);
            }
        };
        let report = self.report(job_id, outcome);
        tracing::info!("{report}");
        Ok(report)
    }

    async fn run_job(&mut self, shutdown: &CancellationToken, server_stop: &CancellationToken) -> Result<JobOutcome, DriverError> {
        check_sources(&self.graph, self.artifacts.as_ref()).await?;

        let Some(root) = self.graph.root() else {
            tracing::info!("nothing to build");
            return Ok(JobOutcome::Completed);
        };

        if self.config.dry_run {
            self.dry_run(root);
            return Ok(JobOutcome::DryRun);
        }

        if let Some(bind) = self.config.bind {
            let space: Arc<dyn Space> = self.space.clone();
            let server = SpaceServer::bind(bind, space).await.map_err(DriverError::Bind)?;
            tokio::spawn(server.serve(server_stop.clone()));
        }

        self.publish_job().await?;
        self.wait_for_workers(shutdown).await?;

        // Subscribe before seeding so no claim of a seeded task is missed.
        let mut events = self
            .space
            .notify(
                &[EventKind::Write, EventKind::Take, EventKind::Expire],
                Template::kind(Kind::Task),
            )
            .await;

        self.advance(self.ready_in_scope()).await?;
        if self.graph.node(root).is_done() {
            return Ok(JobOutcome::Completed);
        }

        self.event_loop(&mut events, root, shutdown).await
    }

    fn dry_run(&self, root: NodeId) {
        tracing::info!("dependency tree:\n{}", self.graph.render_tree(root));
        let ready: Vec<&str> = self
            .ready_in_scope()
            .into_iter()
            .filter(|&id| !self.graph.node(id).content().is_phony())
            .map(|id| self.graph.name(id))
            .collect();
        tracing::info!(ready = ?ready, "initial ready set");
    }

    /// Config entries and the read-only rule table workers consult.
    async fn publish_job(&self) -> Result<(), DriverError> {
        let period_ms = self.config.space.period().as_millis() as u64;
        self.space
            .write(Entry::config(CONFIG_PERIOD, Value::from(period_ms)), None)
            .await?;
        self.space
            .write(Entry::config(CONFIG_JOB, Value::from(self.config.job_name.clone())), None)
            .await?;

        let mut rules = 0;
        for id in self.scope_in_order() {
            if let Some(rule) = self.graph.node(id).rule() {
                self.space.write(Entry::rule(&rule.name, &rule.spec()), None).await?;
                rules += 1;
            }
        }
        tracing::debug!(rules, period_ms, "published job tables");
        Ok(())
    }

    async fn wait_for_workers(&self, shutdown: &CancellationToken) -> Result<(), DriverError> {
        let wanted = self.config.min_workers;
        if wanted == 0 {
            return Ok(());
        }

        let mut joins = self.space.notify(&[EventKind::Write], Template::kind(Kind::Worker)).await;
        loop {
            let present = self.space.read_all(&Template::kind(Kind::Worker)).await?.len();
            if present >= wanted {
                tracing::info!(present, "workers ready");
                return Ok(());
            }
            tracing::info!(present, wanted, "waiting for workers");

            tokio::select! {
                _ = shutdown.cancelled() => return Err(DriverError::Interrupted),
                event = joins.recv() => {
                    if event.is_none_or(|e| e.kind == EventKind::Close) {
                        return Err(DriverError::SpaceClosed);
                    }
                }
            }
        }
    }

    async fn event_loop(
        &mut self,
        events: &mut Subscription,
        root: NodeId,
        shutdown: &CancellationToken,
    ) -> Result<JobOutcome, DriverError> {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return Err(DriverError::Interrupted),
                event = events.recv() => event,
            };
            let Some(event) = event else {
                return Err(DriverError::SpaceClosed);
            };
            if event.kind == EventKind::Close {
                return Err(DriverError::SpaceClosed);
            }
            let Some(entry) = event.entry else {
                continue;
            };
            let Some(state) = entry.task_state() else {
                tracing::warn!(%entry, "ignoring malformed task entry");
                continue;
            };

            let flow = match (event.kind, state) {
                (EventKind::Write, TaskState::Done) => self.on_done(&entry.key, root).await?,
                (EventKind::Write, TaskState::Failed) => self.on_failed(&entry.key).await?,
                (EventKind::Write, TaskState::Working) => self.on_working(&entry.key).await?,
                (EventKind::Take, TaskState::Todo) => self.on_claimed(&entry.key).await?,
                (EventKind::Expire, TaskState::Working | TaskState::Scheduled) => {
                    self.on_lost(&entry.key, state).await?
                }
                _ => Flow::Continue,
            };

            if let Flow::Finished(outcome) = flow {
                events.cancel();
                return Ok(outcome);
            }
        }
    }

    async fn on_done(&mut self, rule: &str, root: NodeId) -> Result<Flow, DriverError> {
        take_if_present(self.space.as_ref(), &Template::task(Some(rule), Some(TaskState::Done))).await?;

        let Some(id) = self.in_scope(rule) else {
            tracing::warn!(rule, "completion for unknown rule");
            return Ok(Flow::Continue);
        };
        if self.graph.node(id).is_done() {
            tracing::debug!(rule, "duplicate completion");
            return Ok(Flow::Continue);
        }

        tracing::info!(rule, "task done");
        self.graph.mark_done(id);
        self.counters.completed += 1;

        let parents = self.graph.node(id).parents().to_vec();
        self.advance(parents.into()).await?;

        if self.graph.node(root).is_done() {
            return Ok(Flow::Finished(JobOutcome::Completed));
        }
        Ok(Flow::Continue)
    }

    async fn on_failed(&mut self, rule: &str) -> Result<Flow, DriverError> {
        take_if_present(self.space.as_ref(), &Template::task(Some(rule), Some(TaskState::Failed))).await?;
        tracing::error!(rule, "task failed; stopping job");
        Ok(Flow::Finished(JobOutcome::Failed {
            rule: rule.to_string(),
        }))
    }

    /// The worker confirmed it started; the liveness timer is no longer needed.
    async fn on_working(&mut self, rule: &str) -> Result<Flow, DriverError> {
        tracing::debug!(rule, "task confirmed");
        take_if_present(self.space.as_ref(), &Template::task(Some(rule), Some(TaskState::Scheduled))).await?;
        Ok(Flow::Continue)
    }

    async fn on_claimed(&mut self, rule: &str) -> Result<Flow, DriverError> {
        if self.started.is_none() {
            self.started = Some((self.clock.now(), Instant::now()));
            tracing::info!(job = %self.config.job_name, "first task claimed; job timer started");
        }
        tracing::debug!(rule, "task claimed");
        self.space
            .write(
                Entry::task(rule, TaskState::Scheduled),
                Some(self.config.space.scheduled_timer()),
            )
            .await?;
        Ok(Flow::Continue)
    }

    async fn on_lost(&mut self, rule: &str, state: TaskState) -> Result<Flow, DriverError> {
        let Some(id) = self.in_scope(rule) else {
            return Ok(Flow::Continue);
        };
        if self.graph.node(id).is_done() {
            return Ok(Flow::Continue);
        }

        tracing::warn!(rule, lost = %state, "task lease expired; restoring");
        self.space.write(Entry::task(rule, TaskState::Todo), None).await?;
        self.counters.restored += 1;
        self.counters.dispatched += 1;
        Ok(Flow::Continue)
    }

    /// Schedule every candidate that has become ready. Phony nodes complete
    /// on the spot and hand readiness on to their own parents.
    async fn advance(&mut self, mut candidates: VecDeque<NodeId>) -> Result<(), DriverError> {
        while let Some(id) = candidates.pop_front() {
            if !self.scope.contains(&id) {
                continue;
            }
            let node = self.graph.node(id);
            if node.is_done() || node.is_processing() || !self.graph.is_ready(id) {
                continue;
            }

            if node.content().is_phony() {
                if let NodeContent::Rule(rule) = node.content() {
                    tracing::info!(rule = %rule.name, "phony rule satisfied");
                }
                candidates.extend(node.parents().iter().copied());
                self.graph.mark_done(id);
                continue;
            }

            let rule = node.name().to_string();
            self.space.write(Entry::task(&rule, TaskState::Todo), None).await?;
            self.graph.set_processing(id, true);
            self.counters.dispatched += 1;
            tracing::info!(rule = %rule, "task scheduled");
        }
        Ok(())
    }

    /// Withdraw unclaimed work so nothing more starts once the job is over.
    async fn withdraw_pending(&self) {
        let template = Template::task(None, Some(TaskState::Todo));
        while let Ok(entry) = self.space.take(&template, Wait::NOW).await {
            tracing::debug!(rule = %entry.key, "withdrawn");
        }
    }

    fn ready_in_scope(&self) -> VecDeque<NodeId> {
        self.scope_in_order()
            .into_iter()
            .filter(|&id| self.graph.is_ready(id))
            .collect()
    }

    fn scope_in_order(&self) -> Vec<NodeId> {
        self.graph.ids().filter(|id| self.scope.contains(id)).collect()
    }

    fn in_scope(&self, rule: &str) -> Option<NodeId> {
        self.graph.lookup(rule).filter(|id| self.scope.contains(id))
    }

    fn report(&self, job_id: JobId, outcome: JobOutcome) -> JobReport {
        JobReport {
            job: self.config.job_name.clone(),
            job_id,
            outcome,
            tasks_dispatched: self.counters.dispatched,
            tasks_completed: self.counters.completed,
            tasks_restored: self.counters.restored,
            started_at: self.started.map(|(at, _)| at),
            elapsed: self.started.map(|(_, at)| at.elapsed()),
        }
    }
}

/// Consuming take that tolerates the entry already being gone.
async fn take_if_present(space: &dyn Space, template: &Template) -> Result<(), SpaceError> {
    match space.take(template, Wait::NOW).await {
        Ok(_) | Err(SpaceError::NoMatch(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
