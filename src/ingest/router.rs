//! Message type → channel routing.

use std::collections::HashMap;

use crate::config::BatchingConfig;
use crate::ingest::queue::{self, QueueConsumer, QueueProducer};

pub const DEFAULT_CHANNEL: &str = "default";

/// Producer side of every channel queue, owned by the connection manager.
#[derive(Debug)]
pub struct ChannelRouter {
    producers: Vec<QueueProducer>,
    by_type: HashMap<String, usize>,
    default: usize,
}

impl ChannelRouter {
    /// Build one bounded queue per configured channel. Returns the router and
    /// the consumer halves in channel order.
    pub fn build(config: &BatchingConfig) -> (Self, Vec<QueueConsumer>) {
        let mut producers = Vec::new();
        let mut consumers = Vec::new();
        let mut by_type = HashMap::new();
        let mut default = None;

        for (index, channel) in config.channels.iter().enumerate() {
            let (producer, consumer) = queue::bounded(&channel.name, config.message_queue_size);
            producers.push(producer);
            consumers.push(consumer);
            if channel.message_types.is_empty() {
                default.get_or_insert(index);
            }
            for kind in &channel.message_types {
                by_type.entry(kind.clone()).or_insert(index);
            }
        }

        let default = match default {
            Some(index) => index,
            None => {
                let (producer, consumer) =
                    queue::bounded(DEFAULT_CHANNEL, config.message_queue_size);
                producers.push(producer);
                consumers.push(consumer);
                producers.len() - 1
            }
        };

        (
            Self {
                producers,
                by_type,
                default,
            },
            consumers,
        )
    }

    pub fn route(&self, message_type: &str) -> &QueueProducer {
        let index = self
            .by_type
            .get(message_type)
            .copied()
            .unwrap_or(self.default);
        &self.producers[index]
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.producers.iter().map(QueueProducer::channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;

    #[test]
    fn test_routes_by_type_with_default() {
        let config = BatchingConfig {
            channels: vec![
                ChannelConfig {
                    name: "books".into(),
                    message_types: vec!["orderbook".into(), "snapshot".into()],
                },
                ChannelConfig::default(),
            ],
            ..Default::default()
        };
        let (router, consumers) = ChannelRouter::build(&config);
        assert_eq!(consumers.len(), 2);
        assert_eq!(router.route("orderbook").channel(), "books");
        assert_eq!(router.route("trade").channel(), DEFAULT_CHANNEL);
    }

    #[test]
    fn test_adds_default_channel_when_missing() {
        let config = BatchingConfig {
            channels: vec![ChannelConfig {
                name: "books".into(),
                message_types: vec!["orderbook".into()],
            }],
            ..Default::default()
        };
        let (router, consumers) = ChannelRouter::build(&config);
        assert_eq!(consumers.len(), 2);
        assert_eq!(router.route("heartbeat").channel(), DEFAULT_CHANNEL);
        assert_eq!(router.channels().collect::<Vec<_>>(), vec!["books", "default"]);
    }
}
