//! Announcement queue
//!
//! `speak` enqueues without blocking and drops the request when the queue
//! is full. A single drain loop plays announcements one at a time, pacing
//! them by the player's reported clip duration.

use ha_config::AnnouncementConfig;
use ha_state_store::SharedStateStore;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::SharedClient;

/// One queued announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Media player to speak on
    pub entity_id: String,
    pub message: String,
}

/// Producer side of the announcement queue
#[derive(Debug, Clone)]
pub struct AnnouncementQueue {
    sender: mpsc::Sender<Announcement>,
}

impl AnnouncementQueue {
    /// Create a queue holding at most `capacity` pending announcements
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Announcement>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue an announcement; returns false when it was dropped
    pub fn speak(&self, entity_id: impl Into<String>, message: impl Into<String>) -> bool {
        let announcement = Announcement {
            entity_id: entity_id.into(),
            message: message.into(),
        };
        match self.sender.try_send(announcement) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                debug!(entity_id = %dropped.entity_id, "Announcement queue full, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                debug!(entity_id = %dropped.entity_id, "Announcement queue closed, dropping");
                false
            }
        }
    }

    /// Free slots left in the queue
    pub fn remaining_capacity(&self) -> usize {
        self.sender.capacity()
    }
}

/// Plays queued announcements until `cancel` fires
///
/// Returns the receiver so a restarted daemon can keep the same queue.
pub async fn drain_announcements(
    mut receiver: mpsc::Receiver<Announcement>,
    client: SharedClient,
    store: SharedStateStore,
    settings: AnnouncementConfig,
    cancel: CancellationToken,
) -> mpsc::Receiver<Announcement> {
    info!("Announcement loop started");
    let settle_delay = settings.settle_delay();

    loop {
        let announcement = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Some(announcement) => announcement,
                None => break,
            },
        };

        let data = json!({
            "entity_id": announcement.entity_id,
            "message": announcement.message,
        });
        if let Err(e) = client
            .call_service(&settings.tts_domain, &settings.tts_service, data, true)
            .await
        {
            warn!(entity_id = %announcement.entity_id, error = %e, "Announcement call failed");
        }

        if !pause(&cancel, settle_delay).await {
            break;
        }

        // The player reports the clip length only once playback started
        let remaining = store
            .get(&announcement.entity_id)
            .and_then(|state| state.attribute::<f64>(&settings.duration_attribute))
            .and_then(|seconds| remaining_playback(seconds, settle_delay));
        if let Some(remaining) = remaining {
            debug!(entity_id = %announcement.entity_id, remaining_ms = remaining.as_millis() as u64, "Waiting for playback");
            if !pause(&cancel, remaining).await {
                break;
            }
        }
    }

    info!("Announcement loop stopped");
    receiver
}

/// Sleep unless cancelled; false when cancelled
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Playback time left after the settle delay, if any
///
/// Durations that do not fit a `Duration` count as unknown.
fn remaining_playback(duration_seconds: f64, elapsed: Duration) -> Option<Duration> {
    Duration::try_from_secs_f64(duration_seconds)
        .ok()?
        .checked_sub(elapsed)
        .filter(|remaining| !remaining.is_zero())
}
