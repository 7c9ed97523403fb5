use crate::safe_lock;
use async_trait::async_trait;
use fpm_core::{EventFeed, EventStream, PowerChangeEvent, PowerError, Result};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct FeedState {
    current: Option<mpsc::Sender<PowerChangeEvent>>,
    subscriptions: usize,
    fail_next: usize,
}

/// Event feed driven by the test. Each subscription replaces the previous stream.
#[derive(Default)]
pub struct ChannelEventFeed {
    state: Mutex<FeedState>,
}

impl ChannelEventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to the live stream. False when nobody is subscribed.
    pub fn publish(&self, event: PowerChangeEvent) -> bool {
        match &safe_lock(&self.state).current {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Close the live stream, as a broken transport would.
    pub fn disconnect(&self) {
        safe_lock(&self.state).current = None;
    }

    /// Refuse the next `n` subscription attempts.
    pub fn fail_next_subscriptions(&self, n: usize) {
        safe_lock(&self.state).fail_next = n;
    }

    /// Subscription attempts so far, failed ones included.
    pub fn subscriptions(&self) -> usize {
        safe_lock(&self.state).subscriptions
    }

    pub fn is_connected(&self) -> bool {
        safe_lock(&self.state)
            .current
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Poll until `n` subscription attempts were made and a stream is live.
    pub async fn wait_for_subscriptions(&self, n: usize) {
        while self.subscriptions() < n || !self.is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EventFeed for ChannelEventFeed {
    async fn subscribe(&self) -> Result<EventStream> {
        let mut state = safe_lock(&self.state);
        state.subscriptions += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            state.current = None;
            return Err(PowerError::Connection("event bus unreachable".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        state.current = Some(tx);
        Ok(rx)
    }
}
