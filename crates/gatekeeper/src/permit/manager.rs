//! Admission manager: one arbiter task owns every piece of admission state.
//!
//! Callers hold an [`AdmissionManager`] handle and talk to the arbiter over a
//! bounded mailbox. Acquire replies come back on a oneshot carrying a `Result`,
//! so cancellation can be reported on the same path as a grant.
//!
//! Counters are republished after every command so the overload ratio can be
//! read without a round-trip through the mailbox.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::token::{Token, TokenId};

/// Mailbox depth. Senders wait for room once it fills up.
const MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid admission limit {0}: must be greater than zero")]
    InvalidLimit(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("acquire cancelled before a token was granted")]
    Cancelled,
    #[error("admission manager is closed")]
    ManagerClosed,
}

type AcquireReply = oneshot::Sender<Result<Token, AcquireError>>;

enum Command {
    Acquire { reply: AcquireReply },
    Release { token: Option<Token> },
    ReleaseAll,
    Snapshot { reply: oneshot::Sender<ManagerStats> },
}

/// Point-in-time view of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ManagerStats {
    pub limit: usize,
    pub active: usize,
    pub pending_demand: usize,
    pub overload_ratio: f64,
}

impl ManagerStats {
    fn new(limit: usize, active: usize, pending_demand: usize) -> Self {
        Self {
            limit,
            active,
            pending_demand,
            overload_ratio: pending_demand as f64 / limit as f64,
        }
    }

    /// Every token is out.
    pub fn is_saturated(&self) -> bool {
        self.active >= self.limit
    }
}

/// Counters written only by the arbiter.
///
/// High 32 bits hold the active count, low 32 bits the pending demand, so a
/// single load always sees a pair that existed together.
#[derive(Debug, Default)]
struct Published(AtomicU64);

impl Published {
    fn store(&self, active: usize, pending: usize) {
        let active = active.min(u32::MAX as usize) as u64;
        let pending = pending.min(u32::MAX as usize) as u64;
        self.0.store((active << 32) | pending, Ordering::Release);
    }

    fn load(&self) -> (usize, usize) {
        let packed = self.0.load(Ordering::Acquire);
        ((packed >> 32) as usize, (packed & 0xffff_ffff) as usize)
    }
}

/// Handle to a bounded-concurrency admission arbiter.
///
/// Cheap to clone. The arbiter task runs until the last handle is dropped, so
/// anything still holding a token keeps its issuing manager reachable.
#[derive(Debug, Clone)]
pub struct AdmissionManager {
    limit: usize,
    tx: mpsc::Sender<Command>,
    published: Arc<Published>,
}

impl AdmissionManager {
    /// Construct a manager and spawn its arbiter on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, since the arbiter task is
    /// spawned with `tokio::spawn`.
    pub fn new(limit: i64) -> Result<Self, ConfigError> {
        if limit <= 0 {
            return Err(ConfigError::InvalidLimit(limit));
        }
        let limit = usize::try_from(limit).map_err(|_| ConfigError::InvalidLimit(limit))?;

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let published = Arc::new(Published::default());

        let arbiter = Arbiter {
            limit,
            active: HashMap::with_capacity(limit.min(1024)),
            waiters: VecDeque::new(),
            published: Arc::clone(&published),
        };
        tokio::spawn(arbiter.run(rx));

        tracing::debug!(limit, "Admission manager started");

        Ok(Self {
            limit,
            tx,
            published,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Wait for a token.
    ///
    /// Dropping the returned future before it resolves gives back any token
    /// that was granted in the meantime.
    pub async fn acquire(&self) -> Result<Token, AcquireError> {
        let (reply, rx) = oneshot::channel();
        let wait = GrantWait {
            rx,
            tx: self.tx.clone(),
            settled: false,
        };
        self.tx
            .send(Command::Acquire { reply })
            .await
            .map_err(|_| AcquireError::ManagerClosed)?;
        wait.wait().await
    }

    /// Wait for a token unless `cancel` fires first.
    pub async fn acquire_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Token, AcquireError> {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("Acquire cancelled while waiting");
                Err(AcquireError::Cancelled)
            }
            result = self.acquire() => result,
        }
    }

    /// Hand a token back. `None` and unknown tokens are logged and ignored.
    ///
    /// Waits for mailbox room before giving up the token; if this future is
    /// dropped while waiting, the token is released detached instead.
    pub async fn release(&self, token: Option<Token>) {
        let mut pending = PendingRelease {
            tx: &self.tx,
            token,
        };
        match self.tx.reserve().await {
            Ok(permit) => permit.send(Command::Release {
                token: pending.token.take(),
            }),
            Err(_) => {
                pending.token = None;
                tracing::warn!("Admission manager closed - release dropped");
            }
        }
    }

    /// Release without waiting, for contexts that cannot await (e.g. `Drop`).
    ///
    /// Falls back to a single spawned send when the mailbox is full.
    pub fn release_detached(&self, token: Token) {
        release_detached(&self.tx, token);
    }

    /// Release every outstanding token through the normal release path.
    pub async fn release_all(&self) {
        if self.tx.send(Command::ReleaseAll).await.is_err() {
            tracing::warn!("Admission manager closed - release_all dropped");
        }
    }

    /// `pending_demand / limit`, unclamped.
    pub fn overload_ratio(&self) -> f64 {
        self.stats().overload_ratio
    }

    /// Counters as last published by the arbiter.
    pub fn stats(&self) -> ManagerStats {
        let (active, pending) = self.published.load();
        ManagerStats::new(self.limit, active, pending)
    }

    /// Counters taken by the arbiter itself, after every command this caller
    /// sent earlier has been applied.
    pub async fn snapshot(&self) -> Result<ManagerStats, AcquireError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| AcquireError::ManagerClosed)?;
        rx.await.map_err(|_| AcquireError::ManagerClosed)
    }
}

fn release_detached(tx: &mpsc::Sender<Command>, token: Token) {
    match tx.try_send(Command::Release { token: Some(token) }) {
        Ok(()) => {}
        Err(TrySendError::Full(command)) => match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let tx = tx.clone();
                handle.spawn(async move {
                    let _ = tx.send(command).await;
                });
            }
            Err(_) => {
                tracing::error!("Mailbox full outside a runtime - token leaked");
            }
        },
        Err(TrySendError::Closed(_)) => {
            tracing::debug!("Admission manager closed - nothing to release into");
        }
    }
}

/// A release waiting for mailbox room. Dropped unsent, it falls back to a
/// detached release so the token is never lost.
struct PendingRelease<'a> {
    tx: &'a mpsc::Sender<Command>,
    token: Option<Token>,
}

impl Drop for PendingRelease<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            tracing::debug!(token = %token.id(), "Release cancelled while waiting - detaching");
            release_detached(self.tx, token);
        }
    }
}

/// Receiving side of an acquire.
///
/// If dropped before the reply is taken, closes the reply channel so the
/// arbiter releases on grant, and gives back a token that already arrived.
struct GrantWait {
    rx: oneshot::Receiver<Result<Token, AcquireError>>,
    tx: mpsc::Sender<Command>,
    settled: bool,
}

impl GrantWait {
    async fn wait(mut self) -> Result<Token, AcquireError> {
        let result = (&mut self.rx).await;
        self.settled = true;
        result.map_err(|_| AcquireError::ManagerClosed)?
    }
}

impl Drop for GrantWait {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.rx.close();
        if let Ok(Ok(token)) = self.rx.try_recv() {
            tracing::debug!(token = %token.id(), "Grant arrived after acquirer left - releasing");
            release_detached(&self.tx, token);
        }
    }
}

struct Arbiter {
    limit: usize,
    active: HashMap<TokenId, Token>,
    /// Acquirers waiting for capacity. Their count is the pending demand;
    /// the order they are served in is not part of the contract.
    waiters: VecDeque<AcquireReply>,
    published: Arc<Published>,
}

impl Arbiter {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.prune_abandoned_waiters();

            match command {
                Command::Acquire { reply } => self.acquire(reply),
                Command::Release { token } => self.release(token),
                Command::ReleaseAll => self.release_all(),
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.stats());
                }
            }

            debug_assert!(self.active.len() <= self.limit);
            self.publish();
        }

        tracing::debug!(limit = self.limit, "Admission manager stopped");
    }

    fn stats(&self) -> ManagerStats {
        ManagerStats::new(self.limit, self.active.len(), self.waiters.len())
    }

    fn publish(&self) {
        self.published.store(self.active.len(), self.waiters.len());
    }

    fn acquire(&mut self, reply: AcquireReply) {
        if self.active.len() < self.limit {
            self.grant(reply);
        } else {
            self.waiters.push_back(reply);
            tracing::debug!(
                limit = self.limit,
                pending = self.waiters.len(),
                "At capacity - acquire waiting"
            );
        }
    }

    fn release(&mut self, token: Option<Token>) {
        let Some(token) = token else {
            tracing::warn!("Cannot release an absent token");
            return;
        };

        if self.active.remove(&token.id()).is_none() {
            tracing::warn!(token = %token.id(), "Unable to release token - not in use");
            return;
        }
        tracing::trace!(token = %token.id(), "Token released");

        self.admit_waiters();
    }

    fn release_all(&mut self) {
        let snapshot: Vec<Token> = self.active.values().cloned().collect();
        let released = snapshot.len();
        for token in snapshot {
            self.release(Some(token));
        }
        tracing::info!(
            released,
            granted = self.active.len(),
            "Released all outstanding tokens"
        );
    }

    /// Hand freed capacity to waiters until it runs out or nobody is waiting.
    fn admit_waiters(&mut self) {
        while self.active.len() < self.limit {
            let Some(reply) = self.waiters.pop_front() else {
                break;
            };
            self.grant(reply);
        }
    }

    fn grant(&mut self, reply: AcquireReply) {
        let token = Token::grant();
        let id = token.id();
        self.active.insert(id, token.clone());
        // A grantee reads the ratio as soon as it wakes up.
        self.publish();

        if reply.send(Ok(token)).is_err() {
            // Release on grant: the acquirer gave up before we could answer.
            self.active.remove(&id);
            tracing::debug!(token = %id, "Acquirer gone - grant released");
        } else {
            tracing::trace!(token = %id, active = self.active.len(), "Token granted");
        }
    }

    fn prune_abandoned_waiters(&mut self) {
        let before = self.waiters.len();
        self.waiters.retain(|reply| !reply.is_closed());
        let pruned = before - self.waiters.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Dropped abandoned acquire requests");
        }
    }
}
