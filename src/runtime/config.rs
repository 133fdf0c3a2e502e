//! # Configuration
//!
//! [`DispatchConfig`] is the serde-facing settings block for one
//! publisher/subscriber pair. Every field has a default, so an empty object
//! is a valid configuration:
//!
//! ```json
//! { "name": "orders", "poll_interval_ms": 5, "topic": "eu", "delivery": "direct" }
//! ```
//!
//! Call [`DispatchConfig::validate`] after loading, then convert with the
//! `*_options` methods.

use crate::framework::{DispatchError, QueueOptions, Topic};
use crate::transport::{DeliveryMode, PublisherOptions, SubscriberOptions};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Display name; the publisher and subscriber derive theirs from it.
    pub name: String,
    pub poll_interval_ms: u64,
    pub pause_supported: bool,
    /// Default publish topic. `None` or `""` means no topic.
    pub topic: Option<String>,
    pub delivery: DeliveryMode,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            name: "dispatch".to_string(),
            poll_interval_ms: 1,
            pause_supported: true,
            topic: None,
            delivery: DeliveryMode::Queued,
        }
    }
}

impl DispatchConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_pause_supported(mut self, pause_supported: bool) -> Self {
        self.pause_supported = pause_supported;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.name.trim().is_empty() {
            return Err(DispatchError::InvalidArgument(
                "name must not be blank".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(DispatchError::InvalidArgument(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Topic::parse(self.topic.as_deref())?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Options for a bare queue named `<name>.<suffix>`.
    pub fn queue_options(&self, suffix: &str) -> QueueOptions {
        QueueOptions::new(format!("{}.{suffix}", self.name))
            .with_poll_interval(self.poll_interval())
            .with_pause_supported(self.pause_supported)
    }

    pub fn publisher_options(&self) -> PublisherOptions {
        let options = PublisherOptions::new(format!("{}.publisher", self.name))
            .with_queue(self.queue_options("publisher"));
        match self.topic.as_deref() {
            Some(topic) => options.with_topic(topic),
            None => options,
        }
    }

    pub fn subscriber_options(&self) -> SubscriberOptions {
        SubscriberOptions::new(format!("{}.subscriber", self.name))
            .with_poll_interval(self.poll_interval())
            .with_pause_supported(self.pause_supported)
            .with_delivery(self.delivery)
    }
}
