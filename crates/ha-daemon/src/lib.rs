//! Automation daemon core
//!
//! Mirrors the remote platform's entity states, dispatches its live event
//! stream to automation handlers and provides the primitives automation
//! code builds on:
//!
//! - [`Daemon`] - the host facade: lifecycle, listeners, states, outbound calls
//! - [`Dispatcher`] - classifies events and fans handlers out as supervised tasks
//! - [`WaitResult`] - wait until entities reach a state
//! - [`AnnouncementQueue`] - serialized, paced voice announcements
//! - [`AppRegistry`] - running app instances by id
//! - [`DataCache`] - write-through cache over a [`DataRepository`]
//!
//! The transport itself is supplied by the embedding process through the
//! [`HassClient`] trait.
//!
//! # Example
//!
//! ```ignore
//! use ha_daemon::{Daemon, WaitCondition};
//! use tokio_util::sync::CancellationToken;
//!
//! let daemon = Arc::new(Daemon::new(config, client));
//! daemon.listen_state("light.", |entity_id, new_state, _old| async move {
//!     tracing::info!(%entity_id, state = ?new_state.map(|s| s.state.clone()), "light changed");
//!     Ok(())
//! });
//! let wait = daemon.wait_for_change(["binary_sensor.door"], WaitCondition::to("on"));
//! tokio::spawn({
//!     let daemon = daemon.clone();
//!     async move { daemon.run(CancellationToken::new()).await }
//! });
//! wait.wait().await;
//! ```

mod announce;
mod apps;
mod client;
mod data;
mod dispatcher;
mod error;
mod host;
pub mod telemetry;
mod wait;

pub use announce::{drain_announcements, Announcement, AnnouncementQueue};
pub use apps::AppRegistry;
pub use client::{HassClient, SharedClient};
pub use data::{DataCache, DataRepository, SharedDataRepository};
pub use dispatcher::{Dispatcher, FanOutReport};
pub use error::{ClientError, DaemonError, DaemonResult};
pub use host::{Daemon, SharedDaemon, STATUS_CONNECTED};
pub use wait::{ConditionFn, WaitCondition, WaitResult};

pub use ha_config::{ConnectTarget, DaemonConfig};
pub use ha_subscriptions::{SubscriptionId, SubscriptionKind};
