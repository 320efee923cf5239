//! Job and process configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default port the driver serves its Space on.
pub const DEFAULT_PORT: u16 = 7700;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("coordination period must be greater than zero")]
    ZeroPeriod,
}

/// Timing of everything leased in the Space, derived from one base period.
/// The period is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceConfig {
    period: Duration,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
        }
    }
}

impl SpaceConfig {
    pub fn new(period: Duration) -> Result<Self, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        Ok(Self { period })
    }

    pub fn from_millis(ms: u64) -> Result<Self, ConfigError> {
        Self::new(Duration::from_millis(ms))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Lease on a `working` task entry.
    pub fn working_lease(&self) -> Duration {
        self.period.saturating_mul(2)
    }

    /// How often any lease holder renews.
    pub fn renew_interval(&self) -> Duration {
        self.working_lease() / 2
    }

    /// Expiry of the `scheduled` timer written when a task is claimed.
    pub fn scheduled_timer(&self) -> Duration {
        self.period.saturating_mul(5)
    }

    pub fn presence_lease(&self) -> Duration {
        self.period.saturating_mul(2)
    }

    pub fn file_lease(&self) -> Duration {
        self.period.saturating_mul(2)
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub job_name: String,
    /// Serve the Space on this address; `None` keeps it in-process.
    pub bind: Option<SocketAddr>,
    pub dry_run: bool,
    pub space: SpaceConfig,
    /// Workers that must be present before any task is dispatched.
    pub min_workers: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            job_name: "dmake".to_string(),
            bind: None,
            dry_run: false,
            space: SpaceConfig::default(),
            min_workers: 0,
        }
    }
}

impl DriverConfig {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            ..Default::default()
        }
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = Some(bind);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Result<Self, ConfigError> {
        self.space = SpaceConfig::new(period)?;
        Ok(self)
    }

    pub fn with_min_workers(mut self, min_workers: usize) -> Self {
        self.min_workers = min_workers;
        self
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Human-readable name shown in the driver's presence table.
    pub name: String,
    pub driver: SocketAddr,
    pub work_dir: PathBuf,
    /// Pause between failed join attempts.
    pub rejoin_delay: Duration,
    /// Prefer tasks whose dependencies are already local.
    pub prefer_local: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            driver: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            work_dir: PathBuf::from("."),
            rejoin_delay: Duration::from_secs(1),
            prefer_local: false,
        }
    }
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_driver(mut self, driver: SocketAddr) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_rejoin_delay(mut self, delay: Duration) -> Self {
        self.rejoin_delay = delay;
        self
    }

    pub fn with_prefer_local(mut self, prefer_local: bool) -> Self {
        self.prefer_local = prefer_local;
        self
    }
}
