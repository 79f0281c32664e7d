//! Waiting until entities reach a state
//!
//! A wait owns one state subscription per watched entity. The first
//! subscription whose condition holds resolves the wait and cancels all of
//! its siblings; cancelling or dropping the handle resolves it with `false`.

use ha_core::EntityState;
use ha_subscriptions::{SharedSubscriptionRegistry, SubscriptionId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Condition over (new, old) state
pub type ConditionFn =
    Arc<dyn Fn(Option<&EntityState>, Option<&EntityState>) -> anyhow::Result<bool> + Send + Sync>;

/// What a wait is waiting for
#[derive(Clone)]
pub enum WaitCondition {
    /// Match on state values
    ///
    /// `to` must equal the new state and `from` the old one when given.
    /// Unless `all_changes` is set, a change that leaves the state value
    /// as it was (attributes only) does not count.
    Values {
        to: Option<String>,
        from: Option<String>,
        all_changes: bool,
    },
    /// Arbitrary condition; an error counts as no match
    Custom(ConditionFn),
}

impl WaitCondition {
    /// Any change of the state value
    pub fn any_change() -> Self {
        Self::Values {
            to: None,
            from: None,
            all_changes: false,
        }
    }

    /// New state equals `to`
    pub fn to(to: impl Into<String>) -> Self {
        Self::Values {
            to: Some(to.into()),
            from: None,
            all_changes: false,
        }
    }

    /// Old state equals `from`
    pub fn from(from: impl Into<String>) -> Self {
        Self::Values {
            to: None,
            from: Some(from.into()),
            all_changes: false,
        }
    }

    pub fn custom<F>(condition: F) -> Self
    where
        F: Fn(Option<&EntityState>, Option<&EntityState>) -> anyhow::Result<bool>
            + Send
            + Sync
            + 'static,
    {
        Self::Custom(Arc::new(condition))
    }

    /// Evaluate against one delivered change
    pub fn matches(
        &self,
        new_state: Option<&EntityState>,
        old_state: Option<&EntityState>,
    ) -> anyhow::Result<bool> {
        match self {
            Self::Values {
                to,
                from,
                all_changes,
            } => {
                let new_value = new_state.map(|s| s.state.as_str());
                let old_value = old_state.map(|s| s.state.as_str());
                if to.is_some() && to.as_deref() != new_value {
                    return Ok(false);
                }
                if from.is_some() && from.as_deref() != old_value {
                    return Ok(false);
                }
                Ok(*all_changes || new_value != old_value)
            }
            Self::Custom(condition) => condition(new_state, old_state),
        }
    }
}

impl fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Values {
                to,
                from,
                all_changes,
            } => f
                .debug_struct("Values")
                .field("to", to)
                .field("from", from)
                .field("all_changes", all_changes)
                .finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// State shared by a wait handle and its subscriptions
struct WaitShared {
    subscriptions: SharedSubscriptionRegistry,
    owned: Mutex<Vec<SubscriptionId>>,
    /// One-shot guard, set by whoever resolves first
    settled: AtomicBool,
    result: watch::Sender<Option<bool>>,
}

impl WaitShared {
    fn owned(&self) -> MutexGuard<'_, Vec<SubscriptionId>> {
        self.owned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a freshly made subscription, or cancel it if already settled
    fn adopt(&self, id: SubscriptionId) {
        let mut owned = self.owned();
        if self.settled.load(Ordering::SeqCst) {
            drop(owned);
            self.subscriptions.cancel(id);
        } else {
            owned.push(id);
        }
    }

    /// Resolve with `fired` and tear down; only the first call has any effect
    fn settle(&self, fired: bool) -> bool {
        if self.settled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let owned = std::mem::take(&mut *self.owned());
        for id in owned {
            self.subscriptions.cancel(id);
        }
        self.result.send_replace(Some(fired));
        true
    }
}

/// Handle to a pending wait
///
/// Dropping the handle cancels the wait.
pub struct WaitResult {
    shared: Arc<WaitShared>,
    result: watch::Receiver<Option<bool>>,
}

impl WaitResult {
    /// Subscribe to every entity in `entity_ids` and wait for `condition`
    ///
    /// Only the exact ids count. State subscriptions match by prefix, so a
    /// change to `light.kitchen2` reaches the handler for `light.kitchen`
    /// but is ignored there.
    pub fn start(
        subscriptions: SharedSubscriptionRegistry,
        entity_ids: impl IntoIterator<Item = impl Into<String>>,
        condition: WaitCondition,
    ) -> Self {
        let (sender, result) = watch::channel(None);
        let shared = Arc::new(WaitShared {
            subscriptions: subscriptions.clone(),
            owned: Mutex::new(Vec::new()),
            settled: AtomicBool::new(false),
            result: sender,
        });
        let condition = Arc::new(condition);

        for entity_id in entity_ids {
            let entity_id: String = entity_id.into();
            let watched: Arc<str> = Arc::from(entity_id);
            let handler_shared = shared.clone();
            let condition = condition.clone();
            let pattern = watched.to_string();

            let id = subscriptions.listen_state(pattern, move |changed, new_state, old_state| {
                let shared = handler_shared.clone();
                let condition = condition.clone();
                let watched = watched.clone();
                async move {
                    // The subscription matches by prefix; only the exact entity counts
                    if changed != *watched || shared.settled.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    match condition.matches(new_state.as_deref(), old_state.as_deref()) {
                        Ok(true) => {
                            if shared.settle(true) {
                                debug!(entity_id = %changed, "Wait condition met");
                            }
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(
                                entity_id = %changed,
                                error = %format!("{:#}", e),
                                "Wait condition failed, treating as no match"
                            );
                        }
                    }
                    Ok(())
                }
            });
            shared.adopt(id);
        }

        Self { shared, result }
    }

    /// Wait for the outcome
    ///
    /// `true` when the condition was met, `false` when the wait was
    /// cancelled first.
    pub async fn wait(&self) -> bool {
        let mut result = self.result.clone();
        let fired = match result.wait_for(Option::is_some).await {
            Ok(value) => (*value).unwrap_or(false),
            Err(_) => false,
        };
        fired
    }

    /// The outcome if already resolved
    pub fn result(&self) -> Option<bool> {
        *self.result.borrow()
    }

    /// Cancel the wait and its subscriptions; safe to call repeatedly
    pub fn cancel(&self) {
        if self.shared.settle(false) {
            debug!("Wait cancelled");
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.settled.load(Ordering::SeqCst)
    }

    /// Subscriptions still owned by this wait
    pub fn subscription_count(&self) -> usize {
        self.shared.owned().len()
    }
}

impl Drop for WaitResult {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for WaitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitResult")
            .field("resolved", &self.is_resolved())
            .field("result", &self.result())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}
