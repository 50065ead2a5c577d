//! Keep-alive loop: randomized-interval ping over the channel with a
//! response deadline. Sustained failure is treated as connectivity loss
//! and feeds the reconnection control loop.

use crate::client::Client;
use crate::wire::{SignalMethod, WireMessage};
use log::{debug, info, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

const KEEP_ALIVE_INTERVAL_MIN: Duration = Duration::from_secs(20);
const KEEP_ALIVE_INTERVAL_MAX: Duration = Duration::from_secs(30);
const KEEP_ALIVE_MAX_FAIL_TIME: Duration = Duration::from_secs(180);
const KEEP_ALIVE_RESPONSE_DEADLINE: Duration = Duration::from_secs(20);

impl Client {
    /// Sends a single ping and waits for the ack. Returns false on any
    /// failure; the loop decides when failures become a loss.
    async fn send_keepalive(&self) -> bool {
        debug!(target: "Client/Keepalive", "Sending keepalive ping");
        let request = match WireMessage::request(
            self.channel.next_id(),
            SignalMethod::Ping,
            &serde_json::json!({}),
        ) {
            Ok(r) => r,
            Err(e) => {
                warn!(target: "Client/Keepalive", "Could not build ping: {e}");
                return false;
            }
        };
        match self
            .channel
            .send_and_wait(request, Some(KEEP_ALIVE_RESPONSE_DEADLINE))
            .await
        {
            Ok(_) => {
                debug!(target: "Client/Keepalive", "Received keepalive ack");
                true
            }
            Err(e) => {
                warn!(target: "Client/Keepalive", "Keepalive ping failed: {e}");
                false
            }
        }
    }

    /// The main keepalive loop. Spawned per successful login; exits when
    /// the connection it was started for is gone or on shutdown.
    pub(crate) async fn keepalive_loop(self: Arc<Self>) {
        let generation = self.channel.current_generation().await;
        let mut last_success = chrono::Utc::now();
        let mut error_count = 0u32;

        loop {
            let interval_ms = rand::rng().random_range(
                KEEP_ALIVE_INTERVAL_MIN.as_millis()..=KEEP_ALIVE_INTERVAL_MAX.as_millis(),
            );
            let interval = Duration::from_millis(interval_ms as u64);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if !self.channel.is_connected().await
                        || self.channel.current_generation().await != generation
                    {
                        debug!(target: "Client/Keepalive", "Connection gone, exiting keepalive loop");
                        return;
                    }

                    if self.send_keepalive().await {
                        if error_count > 0 {
                            info!(target: "Client/Keepalive", "Keepalive restored");
                        }
                        error_count = 0;
                        last_success = chrono::Utc::now();
                    } else {
                        error_count += 1;
                        warn!(target: "Client/Keepalive", "Keepalive timeout, error count: {error_count}");

                        if chrono::Utc::now().signed_duration_since(last_success)
                            > chrono::Duration::from_std(KEEP_ALIVE_MAX_FAIL_TIME).unwrap()
                        {
                            warn!(
                                target: "Client/Keepalive",
                                "No keepalive ack for over {}s, treating as connectivity loss",
                                KEEP_ALIVE_MAX_FAIL_TIME.as_secs()
                            );
                            self.notify_connectivity_lost().await;
                            return;
                        }
                    }
                },
                _ = self.shutdown.notified() => {
                    debug!(target: "Client/Keepalive", "Shutdown signaled, exiting keepalive loop");
                    return;
                }
            }
        }
    }
}
