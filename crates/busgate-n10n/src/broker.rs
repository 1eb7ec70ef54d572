//! The broker seam and its in-memory implementation.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::{ChannelId, N10nError, Offset, ProjectionKey};

/// Callback invoked by [`NotificationBroker::watch`] for every update.
pub type UpdateCallback = Box<dyn FnMut(ProjectionKey, Offset) + Send>;

/// Interface to the notification broker.
///
/// Channels carry a TTL and at most one concurrent watcher. `watch` runs
/// until the cancellation token fires or the channel disappears, invoking
/// the callback for each `(projection, offset)` update.
pub trait NotificationBroker: Send + Sync + 'static {
    /// Create a channel for `subject` with the given TTL.
    fn new_channel(&self, subject: String, ttl: Duration) -> Result<ChannelId, N10nError>;

    /// Subscribe a channel to a projection.
    fn subscribe(&self, channel: &ChannelId, projection: ProjectionKey) -> Result<(), N10nError>;

    /// Remove a projection subscription from a channel.
    fn unsubscribe(&self, channel: &ChannelId, projection: &ProjectionKey)
        -> Result<(), N10nError>;

    /// Watch a channel, invoking `callback` for every update until `cancel`
    /// fires. The channel and its subscriptions are released when the watch
    /// ends.
    fn watch(
        &self,
        cancel: CancellationToken,
        channel: ChannelId,
        callback: UpdateCallback,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Record a new offset for a projection, fanning it out to subscribed
    /// channels.
    fn update(&self, projection: ProjectionKey, offset: Offset);

    /// Number of outstanding subscriptions across all channels. The server
    /// container polls this during shutdown until it reaches zero.
    fn subscription_count(&self) -> usize;
}

/// Per-channel state in the in-memory broker.
struct ChannelState {
    subject: String,
    expires_at: Instant,
    subscriptions: Vec<ProjectionKey>,
    update_tx: mpsc::UnboundedSender<(ProjectionKey, Offset)>,
    // Taken by the (single) watcher.
    update_rx: Option<mpsc::UnboundedReceiver<(ProjectionKey, Offset)>>,
}

/// In-memory, quota-enforcing [`NotificationBroker`].
pub struct MemoryBroker {
    channels: DashMap<ChannelId, ChannelState>,
    offsets: DashMap<ProjectionKey, Offset>,
    max_channels: usize,
    max_subscriptions_per_channel: usize,
}

impl MemoryBroker {
    /// Create a broker with the given quotas.
    #[must_use]
    pub fn new(max_channels: usize, max_subscriptions_per_channel: usize) -> Self {
        Self {
            channels: DashMap::new(),
            offsets: DashMap::new(),
            max_channels,
            max_subscriptions_per_channel,
        }
    }

    /// Drop channels whose TTL has passed.
    fn sweep_expired(&self) {
        let now = Instant::now();
        self.channels.retain(|_, state| state.expires_at > now);
    }
}

impl NotificationBroker for MemoryBroker {
    fn new_channel(&self, subject: String, ttl: Duration) -> Result<ChannelId, N10nError> {
        self.sweep_expired();
        if self.channels.len() >= self.max_channels {
            return Err(N10nError::ChannelQuotaExceeded);
        }
        let id = ChannelId::random();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        debug!(channel = %id, subject = %subject, "new notification channel");
        self.channels.insert(
            id.clone(),
            ChannelState {
                subject,
                expires_at: Instant::now() + ttl,
                subscriptions: Vec::new(),
                update_tx,
                update_rx: Some(update_rx),
            },
        );
        Ok(id)
    }

    fn subscribe(&self, channel: &ChannelId, projection: ProjectionKey) -> Result<(), N10nError> {
        let mut state = self
            .channels
            .get_mut(channel)
            .ok_or_else(|| N10nError::UnknownChannel(channel.clone()))?;
        if state.subscriptions.len() >= self.max_subscriptions_per_channel {
            return Err(N10nError::SubscriptionQuotaExceeded(channel.clone()));
        }
        if !state.subscriptions.contains(&projection) {
            state.subscriptions.push(projection);
        }
        Ok(())
    }

    fn unsubscribe(
        &self,
        channel: &ChannelId,
        projection: &ProjectionKey,
    ) -> Result<(), N10nError> {
        let mut state = self
            .channels
            .get_mut(channel)
            .ok_or_else(|| N10nError::UnknownChannel(channel.clone()))?;
        state.subscriptions.retain(|p| p != projection);
        Ok(())
    }

    fn watch(
        &self,
        cancel: CancellationToken,
        channel: ChannelId,
        mut callback: UpdateCallback,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(mut rx) = self
                .channels
                .get_mut(&channel)
                .and_then(|mut state| state.update_rx.take())
            else {
                return;
            };

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    update = rx.recv() => match update {
                        Some((projection, offset)) => callback(projection, offset),
                        None => break,
                    },
                }
            }

            if let Some((_, state)) = self.channels.remove(&channel) {
                debug!(channel = %channel, subject = %state.subject, "watch done, releasing channel");
            }
        })
    }

    fn update(&self, projection: ProjectionKey, offset: Offset) {
        self.offsets.insert(projection.clone(), offset);
        for state in self.channels.iter() {
            if state.subscriptions.contains(&projection) {
                let _ = state.update_tx.send((projection.clone(), offset));
            }
        }
    }

    fn subscription_count(&self) -> usize {
        self.channels
            .iter()
            .map(|state| state.subscriptions.len())
            .sum()
    }
}
