use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::MqttConfig;
use crate::state::SharedState;

/// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Outgoing request queue depth. Publishes beyond this fail fast instead of
/// blocking the control loop.
const REQUEST_CAPACITY: usize = 20;

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

pub fn connect(cfg: &MqttConfig) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_sec));
    AsyncClient::new(opts, REQUEST_CAPACITY)
}

/// Poll the MQTT event loop forever, mirroring connection state into the
/// shared status. rumqttc reconnects on the next poll after an error.
pub async fn drive(mut eventloop: EventLoop, shared: SharedState) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                {
                    let mut st = shared.write().await;
                    if st.mqtt_connected {
                        st.record_error(format!("mqtt error: {e}"));
                    }
                    st.mqtt_connected = false;
                }
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Topic helpers
// ---------------------------------------------------------------------------

/// A feed must be a concrete publish topic: non-empty, no wildcards, no
/// empty levels, no NUL.
pub fn is_valid_feed(topic: &str) -> bool {
    !topic.is_empty()
        && !topic.contains(['+', '#', '\0'])
        && topic.split('/').all(|level| !level.is_empty())
}

// ===========================================================================
// Tests
// ===========================================================================
