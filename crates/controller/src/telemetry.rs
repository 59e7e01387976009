//! Best-effort telemetry: one MQTT feed per sensor channel, value as a
//! plain decimal string.

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::{FeedConfig, MqttConfig};
use crate::sensor::{Channel, SensorReading};

#[derive(Debug, Error)]
#[error("publish to {feed} failed after {attempts} attempt(s): {last}")]
pub struct PublishError {
    pub feed: String,
    pub attempts: u32,
    pub last: String,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, feed: &str, value: f32) -> Result<(), PublishError>;
}

/// Wire format of a feed value.
pub fn format_value(value: f32) -> String {
    format!("{value:.2}")
}

impl FeedConfig {
    pub fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Humidity => &self.humidity,
            Channel::Temperature => &self.temperature,
            Channel::Light => &self.light,
        }
    }
}

/// Publish every channel of `reading` to its feed. Failures are logged and
/// counted, never propagated. Returns the number of feeds published.
pub async fn publish_reading(
    publisher: &dyn Publisher,
    feeds: &FeedConfig,
    reading: &SensorReading,
) -> usize {
    let mut published = 0;
    for channel in Channel::ALL {
        let feed = feeds.topic(channel);
        match publisher.publish(feed, reading.value(channel)).await {
            Ok(()) => published += 1,
            Err(e) => warn!(%channel, "telemetry dropped: {e}"),
        }
    }
    published
}

// ---------------------------------------------------------------------------
// MQTT implementation
// ---------------------------------------------------------------------------

pub struct MqttPublisher {
    client: AsyncClient,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, cfg: &MqttConfig) -> Self {
        Self {
            client,
            timeout: Duration::from_millis(cfg.publish_timeout_ms),
            max_attempts: cfg.max_attempts.max(1),
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, feed: &str, value: f32) -> Result<(), PublishError> {
        let payload = format_value(value);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let last = match timeout(
                self.timeout,
                self.client
                    .publish(feed, QoS::AtLeastOnce, false, payload.clone().into_bytes()),
            )
            .await
            {
                Ok(Ok(())) => {
                    debug!(feed, payload = %payload, "telemetry queued");
                    return Ok(());
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.timeout),
            };

            if attempt >= self.max_attempts {
                return Err(PublishError {
                    feed: feed.to_string(),
                    attempts: attempt,
                    last,
                });
            }
            sleep(self.retry_delay).await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use time::macros::datetime;

    /// Records publishes; feeds listed in `failing` always fail.
    #[derive(Default)]
    pub(crate) struct RecordingPublisher {
        pub(crate) sent: Mutex<Vec<(String, f32)>>,
        pub(crate) failing: Vec<String>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, feed: &str, value: f32) -> Result<(), PublishError> {
            if self.failing.iter().any(|f| f == feed) {
                return Err(PublishError {
                    feed: feed.to_string(),
                    attempts: 1,
                    last: "broker gone".into(),
                });
            }
            self.sent.lock().unwrap().push((feed.to_string(), value));
            Ok(())
        }
    }

    fn reading() -> SensorReading {
        SensorReading {
            taken_at: datetime!(2024-06-01 10:00 -7),
            humidity: 41.0,
            temperature: 19.5,
            light: 640.0,
        }
    }

    fn mqtt_cfg(max_attempts: u32) -> MqttConfig {
        MqttConfig {
            publish_timeout_ms: 100,
            max_attempts,
            retry_delay_ms: 5,
            ..MqttConfig::default()
        }
    }

    #[test]
    fn values_are_formatted_with_two_decimals() {
        assert_eq!(format_value(41.0), "41.00");
        assert_eq!(format_value(19.456), "19.46");
        assert_eq!(format_value(-3.0), "-3.00");
    }

    #[test]
    fn feeds_map_to_channels() {
        let feeds = FeedConfig::default();
        assert_eq!(feeds.topic(Channel::Humidity), "ivkhrul/soil/humidity");
        assert_eq!(feeds.topic(Channel::Temperature), "ivkhrul/soil/temperature");
        assert_eq!(feeds.topic(Channel::Light), "ivkhrul/soil/lux");
    }

    #[tokio::test]
    async fn publish_reading_sends_every_channel_to_its_feed() {
        let p = RecordingPublisher::default();
        let n = publish_reading(&p, &FeedConfig::default(), &reading()).await;

        assert_eq!(n, 3);
        let sent = p.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![
                ("ivkhrul/soil/humidity".to_string(), 41.0),
                ("ivkhrul/soil/temperature".to_string(), 19.5),
                ("ivkhrul/soil/lux".to_string(), 640.0),
            ]
        );
    }

    #[tokio::test]
    async fn failed_feed_does_not_stop_the_others() {
        let p = RecordingPublisher {
            failing: vec!["ivkhrul/soil/temperature".into()],
            ..RecordingPublisher::default()
        };
        let n = publish_reading(&p, &FeedConfig::default(), &reading()).await;

        assert_eq!(n, 2);
        assert_eq!(p.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn mqtt_publish_queues_while_event_loop_alive() {
        let (client, _eventloop) = crate::mqtt::connect(&MqttConfig::default());
        let p = MqttPublisher::new(client, &mqtt_cfg(1));
        p.publish("ivkhrul/soil/humidity", 41.0).await.unwrap();
    }

    #[tokio::test]
    async fn mqtt_publish_fails_after_retries_when_event_loop_gone() {
        let (client, eventloop) = crate::mqtt::connect(&MqttConfig::default());
        drop(eventloop);
        let p = MqttPublisher::new(client, &mqtt_cfg(3));

        let err = p.publish("ivkhrul/soil/humidity", 41.0).await.unwrap_err();
        assert_eq!(err.feed, "ivkhrul/soil/humidity");
        assert_eq!(err.attempts, 3);
    }
}
