//! Per-session single-flight lock for the generation stage.
//!
//! Each session key owns one async mutex. The mutex guards a [`BuildSlot`]
//! holding the last completed generation, so a turn that waited behind a
//! peer can hand back the peer's answer instead of generating again.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::session::SessionKey;

/// What to do when another turn already holds the session's build lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait up to the configured timeout, then report busy
    #[default]
    Wait,
    /// Report busy immediately
    Report,
}

impl std::str::FromStr for BusyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(Self::Wait),
            "report" => Ok(Self::Report),
            other => Err(format!("unknown busy policy `{other}` (expected wait|report)")),
        }
    }
}

impl std::fmt::Display for BusyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wait => write!(f, "wait"),
            Self::Report => write!(f, "report"),
        }
    }
}

/// A finished stage-5 answer.
#[derive(Debug, Clone)]
pub struct CompletedGeneration {
    pub query: String,
    pub response: String,
    pub needs_fix: bool,
    finished_at: Instant,
}

/// State guarded by a session's build lock.
#[derive(Debug, Default)]
pub struct BuildSlot {
    last: Option<CompletedGeneration>,
}

impl BuildSlot {
    pub fn last(&self) -> Option<&CompletedGeneration> {
        self.last.as_ref()
    }
}

/// Exclusive right to run generation for one session.
#[derive(Debug)]
pub struct BuildPermit {
    guard: OwnedMutexGuard<BuildSlot>,
    peer_result: Option<CompletedGeneration>,
}

impl BuildPermit {
    /// Generation a peer finished while this turn was waiting for the lock.
    pub fn peer_result(&self) -> Option<&CompletedGeneration> {
        self.peer_result.as_ref()
    }

    /// Remember a finished generation for turns queued behind this one.
    pub fn record(&mut self, query: impl Into<String>, response: impl Into<String>, needs_fix: bool) {
        self.guard.last = Some(CompletedGeneration {
            query: query.into(),
            response: response.into(),
            needs_fix,
            finished_at: Instant::now(),
        });
    }

    pub fn slot(&self) -> &BuildSlot {
        &self.guard
    }
}

/// Outcome of [`BuildLocks::acquire`].
#[derive(Debug)]
pub enum Acquire {
    Acquired(BuildPermit),
    Busy,
}

#[derive(Debug, Default)]
pub struct BuildLocks {
    locks: DashMap<SessionKey, Arc<Mutex<BuildSlot>>>,
}

pub type SharedBuildLocks = Arc<BuildLocks>;

impl BuildLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedBuildLocks {
        Arc::new(self)
    }

    fn lock_for(&self, key: &SessionKey) -> Arc<Mutex<BuildSlot>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(BuildSlot::default())))
            .clone()
    }

    /// Try to take the build lock for `key` under `policy`.
    ///
    /// `wait` bounds how long [`BusyPolicy::Wait`] blocks. A permit obtained
    /// after waiting carries the generation the previous holder recorded, if
    /// any.
    pub async fn acquire(&self, key: &SessionKey, policy: BusyPolicy, wait: Duration) -> Acquire {
        let lock = self.lock_for(key);

        if let Ok(guard) = Arc::clone(&lock).try_lock_owned() {
            return Acquire::Acquired(BuildPermit {
                guard,
                peer_result: None,
            });
        }

        if policy == BusyPolicy::Report {
            debug!(session = %key, "build lock held, reporting busy");
            return Acquire::Busy;
        }

        let started = Instant::now();
        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => {
                let peer_result = guard
                    .last
                    .as_ref()
                    .filter(|g| g.finished_at >= started)
                    .cloned();
                debug!(
                    session = %key,
                    waited_ms = started.elapsed().as_millis() as u64,
                    reused = peer_result.is_some(),
                    "build lock acquired after wait"
                );
                Acquire::Acquired(BuildPermit { guard, peer_result })
            }
            Err(_) => {
                debug!(session = %key, "build lock wait timed out");
                Acquire::Busy
            }
        }
    }

    /// Whether a build currently holds the lock for `key`.
    pub fn is_locked(&self, key: &SessionKey) -> bool {
        self.locks
            .get(key)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Drop locks nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks
            .retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
