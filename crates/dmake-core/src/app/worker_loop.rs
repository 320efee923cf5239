//! Worker: joins the Space, claims `todo` tasks and executes them.
//!
//! A worker loops over sessions. Each session locates the Space, reads the
//! job period, announces itself and then claims tasks until the Space goes
//! away, at which point the worker waits and rejoins. Losing the Space is
//! never a task failure.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::priority::{CANDIDATE_LIMIT, PriorityIndex};
use crate::config::{SpaceConfig, WorkerConfig};
use crate::domain::{CONFIG_PERIOD, Entry, Kind, RuleSpec, TaskState, Template, WorkerId};
use crate::ports::{ArtifactError, ArtifactStore, CommandRunner, Connector, IdGenerator, SystemClock, UlidGenerator};
use crate::space::{LeaseGuard, Space, SpaceError, Wait};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Space(#[from] SpaceError),

    #[error(transparent)]
    Artifacts(#[from] ArtifactError),

    #[error("job has no valid period: {0}")]
    BadPeriod(String),
}

impl WorkerError {
    /// Errors after which the worker should look for the Space again.
    fn is_rejoinable(&self) -> bool {
        match self {
            WorkerError::Space(e) => e.is_connection_lost() || matches!(e, SpaceError::NoMatch(_)),
            WorkerError::Artifacts(ArtifactError::Space(e)) => e.is_connection_lost(),
            _ => false,
        }
    }
}

/// Everything one joined session needs. Dropping it stops every renewal
/// the session started.
struct Session {
    id: WorkerId,
    space: Arc<dyn Space>,
    store: Arc<dyn ArtifactStore>,
    config: SpaceConfig,
    priority: Option<PriorityIndex>,
    _presence: LeaseGuard,
}

/// How a claimed task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskResult {
    Done,
    Failed(String),
}

pub struct Worker<C> {
    config: WorkerConfig,
    connector: C,
    runner: Arc<dyn CommandRunner>,
    ids: Arc<dyn IdGenerator>,
}

impl<C: Connector> Worker<C> {
    pub fn new(config: WorkerConfig, connector: C, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            connector,
            runner,
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Join and work until `shutdown` fires. Only errors that rejoining
    /// cannot fix are returned.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let mut warned = false;

        while !shutdown.is_cancelled() {
            let joined = tokio::select! {
                _ = shutdown.cancelled() => break,
                joined = self.join() => joined,
            };

            match joined {
                Ok(mut session) => {
                    warned = false;
                    tracing::info!(worker = %session.id, name = %self.config.name, "joined space");
                    match self.work(&mut session, &shutdown).await {
                        Ok(()) => break,
                        Err(e) if e.is_rejoinable() => {
                            tracing::info!(worker = %session.id, error = %e, "space lost; waiting to rejoin");
                        }
                        Err(e) => {
                            tracing::error!(worker = %session.id, error = %e, "worker stopped");
                            return Err(e);
                        }
                    }
                }
                Err(e) if e.is_rejoinable() => {
                    if !warned {
                        tracing::warn!(error = %e, "space not available; retrying periodically");
                        warned = true;
                    } else {
                        tracing::debug!(error = %e, "space still not available");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "cannot join space");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.rejoin_delay) => {}
            }
        }

        tracing::info!(name = %self.config.name, "worker stopped");
        Ok(())
    }

    async fn join(&self) -> Result<Session, WorkerError> {
        let space = self.connector.connect().await?;

        let period = space
            .read(
                &Template::kind(Kind::Config).with_key(CONFIG_PERIOD),
                Wait::For(self.config.rejoin_delay),
            )
            .await?;
        let Some(period_ms) = period.value.as_u64() else {
            return Err(WorkerError::BadPeriod(period.value.to_string()));
        };
        let config =
            SpaceConfig::from_millis(period_ms).map_err(|_| WorkerError::BadPeriod(period.value.to_string()))?;
        tracing::debug!(period_ms, "read job period");

        let store = self.connector.open_store(Arc::clone(&space), &config).await?;

        let priority = if self.config.prefer_local {
            let table = space.read_all(&Template::kind(Kind::Rule)).await?;
            let specs: Vec<(String, RuleSpec)> = table
                .into_iter()
                .filter_map(|entry| entry.rule_spec().map(|spec| (entry.key, spec)))
                .collect();
            Some(PriorityIndex::new(specs.iter().map(|(name, spec)| (name.as_str(), spec))))
        } else {
            None
        };

        let id = self.ids.worker_id();
        let lease = space
            .write(Entry::worker(id.to_string(), &self.config.name), Some(config.presence_lease()))
            .await?;
        let presence = LeaseGuard::spawn(Arc::clone(&space), lease, config.presence_lease(), config.renew_interval());

        Ok(Session {
            id,
            space,
            store,
            config,
            priority,
            _presence: presence,
        })
    }

    /// Claim and execute tasks until shutdown (`Ok`) or a Space failure.
    async fn work(&self, session: &mut Session, shutdown: &CancellationToken) -> Result<(), WorkerError> {
        loop {
            let claimed = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                claimed = claim(session) => claimed?,
            };
            self.process(session, &claimed.key).await?;
        }
    }

    /// Execute one claimed task and report its outcome.
    async fn process(&self, session: &mut Session, rule: &str) -> Result<(), WorkerError> {
        tracing::info!(worker = %session.id, rule, "got task");

        let lease_length = session.config.working_lease();
        let lease = session
            .space
            .write(Entry::task(rule, TaskState::Working), Some(lease_length))
            .await?;
        let guard = LeaseGuard::spawn(
            Arc::clone(&session.space),
            lease,
            lease_length,
            session.config.renew_interval(),
        );

        let result = self.execute(session, rule).await?;

        let state = match &result {
            TaskResult::Done => {
                tracing::info!(worker = %session.id, rule, "task completed");
                TaskState::Done
            }
            TaskResult::Failed(reason) => {
                tracing::error!(worker = %session.id, rule, reason = %reason, "task failed");
                TaskState::Failed
            }
        };
        session.space.write(Entry::task(rule, state), None).await?;

        match session.space.cancel(guard.stop()).await {
            Ok(_) | Err(SpaceError::LeaseNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(priority) = session.priority.as_mut() {
            priority.finished(rule);
        }
        Ok(())
    }

    /// Fetch, run, publish. Space loss is an error; anything else about the
    /// task itself is a `Failed` result.
    async fn execute(&self, session: &mut Session, rule: &str) -> Result<TaskResult, WorkerError> {
        let entry = match session
            .space
            .read(&Template::kind(Kind::Rule).with_key(rule), Wait::NOW)
            .await
        {
            Ok(entry) => entry,
            Err(SpaceError::NoMatch(_)) => return Ok(TaskResult::Failed("rule is not in the rule table".into())),
            Err(e) => return Err(e.into()),
        };
        let Some(spec) = entry.rule_spec() else {
            return Ok(TaskResult::Failed("malformed rule entry".into()));
        };

        for dependency in artifact_dependencies(session.space.as_ref(), &spec.dependencies).await? {
            match session.store.get(&dependency).await {
                Ok(()) => {
                    if let Some(priority) = session.priority.as_mut() {
                        priority.artifact_local(&dependency);
                    }
                }
                Err(ArtifactError::Space(e)) => return Err(e.into()),
                Err(e) => return Ok(TaskResult::Failed(e.to_string())),
            }
        }

        if spec.commands.is_empty() {
            return Ok(TaskResult::Done);
        }

        for command in &spec.commands {
            let output = self.runner.run(command).await;
            if !output.success {
                return Ok(TaskResult::Failed(format!("command failed: {command}")));
            }
        }

        match session.store.publish(rule).await {
            Ok(()) => Ok(TaskResult::Done),
            Err(ArtifactError::Missing(_)) => Ok(TaskResult::Failed("target was not produced".into())),
            Err(ArtifactError::Space(e)) => Err(e.into()),
            Err(e) => Ok(TaskResult::Failed(e.to_string())),
        }
    }
}

/// Take a `todo` task, trying the preferred candidates first when enabled.
async fn claim(session: &Session) -> Result<Entry, SpaceError> {
    if let Some(priority) = &session.priority {
        for rule in priority.candidates(CANDIDATE_LIMIT) {
            let template = Template::task(Some(rule), Some(TaskState::Todo));
            match session.space.take(&template, Wait::NOW).await {
                Ok(entry) => return Ok(entry),
                Err(SpaceError::NoMatch(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }
    session
        .space
        .take(&Template::task(None, Some(TaskState::Todo)), Wait::Forever)
        .await
}

/// Artifacts a rule needs on disk. Phony dependencies have no artifact of
/// their own and stand for their dependencies, transitively. Each name is
/// listed once, in first-seen order.
async fn artifact_dependencies(space: &dyn Space, dependencies: &[String]) -> Result<Vec<String>, SpaceError> {
    let mut stack: Vec<String> = dependencies.iter().rev().cloned().collect();
    let mut seen = HashSet::new();
    let mut artifacts = Vec::new();

    while let Some(name) = stack.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        match phony_dependencies(space, &name).await? {
            Some(children) => stack.extend(children.into_iter().rev()),
            None => artifacts.push(name),
        }
    }
    Ok(artifacts)
}

/// Dependencies of `name` if it is a phony rule, `None` for anything that
/// has an artifact (real rules and plain sources).
async fn phony_dependencies(space: &dyn Space, name: &str) -> Result<Option<Vec<String>>, SpaceError> {
    match space.read(&Template::kind(Kind::Rule).with_key(name), Wait::NOW).await {
        Ok(entry) => Ok(entry
            .rule_spec()
            .filter(|spec| spec.commands.is_empty())
            .map(|spec| spec.dependencies)),
        Err(SpaceError::NoMatch(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
