//! Application topic gossip

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use dias_core::DiasResult;

use crate::{PubSub, PubSubMessage};

/// Publish/subscribe on the application topic
#[derive(Clone)]
pub struct Gossip {
    pubsub: Arc<dyn PubSub>,
    topic: String,
}

impl Gossip {
    pub fn new(pubsub: Arc<dyn PubSub>, topic: impl Into<String>) -> Self {
        Gossip {
            pubsub,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Subscribe to the topic; messages arrive on the returned receiver
    pub async fn start(&self) -> DiasResult<mpsc::UnboundedReceiver<PubSubMessage>> {
        let rx = self.pubsub.subscribe(&self.topic).await?;
        debug!(topic = %self.topic, "gossip subscribed");
        Ok(rx)
    }

    pub async fn broadcast(&self, data: Vec<u8>) -> DiasResult<()> {
        self.pubsub.publish(&self.topic, data).await
    }

    pub async fn stop(&self) -> DiasResult<()> {
        self.pubsub.unsubscribe(&self.topic).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryNetwork;
    use dias_core::{PeerId, PeerInfo};

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let net = MemoryNetwork::new();
        let a = net.add_node(PeerInfo::new(PeerId::from_bytes([1; 32])));
        let b = net.add_node(PeerInfo::new(PeerId::from_bytes([2; 32])));
        let ga = Gossip::new(a.clone(), "app");
        let gb = Gossip::new(b.clone(), "app");

        let _rx_a = ga.start().await.unwrap();
        let mut rx_b = gb.start().await.unwrap();
        ga.broadcast(b"hello".to_vec()).await.unwrap();

        let msg = rx_b.recv().await.unwrap();
        assert_eq!(msg.from, PeerId::from_bytes([1; 32]));
        assert_eq!(msg.topic, "app");
        assert_eq!(msg.data, b"hello".to_vec());

        gb.stop().await.unwrap();
        ga.broadcast(b"again".to_vec()).await.unwrap();
        assert!(rx_b.recv().await.is_none());
    }
}
