//! MQTT broker client for the pub/sub transport.
//!
//! Subscribes to the router's control topics, feeds every incoming message
//! to [`PubSubRouter::handle`] and publishes everything that reaches the
//! publication channel: router replies as well as `mqtt:` push sinks.

use crate::pubsub::PubSubRouter;
use crate::sink::Publication;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 10;

/// Where and how to reach the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub retry_delay: Duration,
}

/// Run the broker session forever; the event loop reconnects on its own
pub async fn run(
    router: PubSubRouter,
    publications: broadcast::Sender<Publication>,
    broker: BrokerConfig,
) {
    let mut options = MqttOptions::new(&broker.client_id, &broker.host, broker.port);
    options.set_keep_alive(broker.keep_alive);

    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    tracing::info!("MQTT: connecting to {}:{}", broker.host, broker.port);

    let forwarder = tokio::spawn(forward(client.clone(), publications.subscribe()));

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Sessions are clean, so every connect subscribes again
                for topic in router.subscriptions() {
                    match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                        Ok(()) => tracing::info!("MQTT: subscribed to '{}'", topic),
                        Err(e) => tracing::error!("MQTT: failed to subscribe to '{}': {}", topic, e),
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload);
                on_message(&router, &publications, &publish.topic, &payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("MQTT connection error: {}", e);
                sleep(broker.retry_delay).await;
            }
        }

        if forwarder.is_finished() {
            tracing::error!("MQTT publisher stopped");
            return;
        }
    }
}

/// Route one control message and queue its reply for publishing
pub async fn on_message(
    router: &PubSubRouter,
    publications: &broadcast::Sender<Publication>,
    topic: &str,
    payload: &str,
) {
    tracing::debug!("MQTT: {} <- {}", topic, payload);

    if let Some(reply) = router.handle(topic, payload).await {
        if publications.send(reply).is_err() {
            tracing::warn!("MQTT: no publisher for reply on {}", topic);
        }
    }
}

async fn forward(client: AsyncClient, mut publications: broadcast::Receiver<Publication>) {
    loop {
        match publications.recv().await {
            Ok(Publication { topic, payload }) => {
                if let Err(e) = client
                    .publish(topic.as_str(), QoS::AtMostOnce, false, payload.into_bytes())
                    .await
                {
                    tracing::error!("MQTT: failed to publish to {}: {}", topic, e);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("MQTT: dropped {} publications", n);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Bridge;
    use crate::connection::LinkConfig;
    use crate::types::ChannelCatalog;

    #[tokio::test]
    async fn replies_go_to_publication_channel() {
        let bridge = Bridge::new(LinkConfig::default(), ChannelCatalog::default());
        let router = PubSubRouter::new("riod", bridge.clone());
        let mut published = bridge.publications().subscribe();

        on_message(&router, bridge.publications(), "riod/Get", "DefaultChannels").await;
        let reply = published.try_recv().unwrap();
        assert_eq!(reply.topic, "riod/Data");

        on_message(&router, bridge.publications(), "riod/Cmd", "action=on&zone=1").await;
        let reply = published.try_recv().unwrap();
        assert_eq!(reply.topic, "riod/Ack");
        assert_eq!(reply.payload, "32 action=on&zone=1");
    }

    #[tokio::test]
    async fn unrelated_topics_publish_nothing() {
        let bridge = Bridge::new(LinkConfig::default(), ChannelCatalog::default());
        let router = PubSubRouter::new("riod", bridge.clone());
        let mut published = bridge.publications().subscribe();

        on_message(&router, bridge.publications(), "other/Get", "status").await;
        on_message(&router, bridge.publications(), "riod/Set", "hexdump=1").await;
        assert!(published.try_recv().is_err());
        assert!(bridge.link().hexdump());
    }
}
