//! Translation between AMQP 1.0 messages and backend messages.
//!
//! Field mapping:
//!
//! | AMQP 1.0                    | backend                          |
//! |-----------------------------|----------------------------------|
//! | `header.durable`            | `delivery_mode` 2 (else 1)       |
//! | `header.priority`           | `priority`                       |
//! | `header.ttl` (ms)           | `expiration` (decimal ms)        |
//! | `properties.creation_time`  | `timestamp` (seconds)            |
//! | application properties      | `headers`                        |
//! | `properties.subject`        | routing key of the delivery      |
//!
//! The remaining properties map one to one by name.

use super::{Header, Message, Properties};
use crate::backend::{BackendMessage, BasicProperties, Delivery};

const PERSISTENT: u8 = 2;
const TRANSIENT: u8 = 1;

impl Message {
    /// Build the message sent to the peer for a backend delivery.
    ///
    /// The delivery's routing key becomes the subject so receivers can tell
    /// which binding matched.
    #[must_use]
    pub fn from_delivery(delivery: &Delivery) -> Self {
        let props = &delivery.message.properties;
        let header = Header {
            durable: props.delivery_mode == Some(PERSISTENT),
            priority: props.priority,
            ttl: props.expiration.as_deref().and_then(|raw| raw.parse().ok()),
            first_acquirer: !delivery.redelivered,
            delivery_count: u32::from(delivery.redelivered),
        };
        let properties = Properties {
            message_id: props.message_id.clone(),
            user_id: props.user_id.clone(),
            to: None,
            subject: Some(delivery.routing_key.clone()),
            reply_to: props.reply_to.clone(),
            correlation_id: props.correlation_id.clone(),
            content_type: props.content_type.clone(),
            content_encoding: props.content_encoding.clone(),
            creation_time: props.timestamp.map(|secs| secs.saturating_mul(1_000)),
        };
        Self {
            header: Some(header),
            properties: Some(properties),
            application_properties: props.headers.clone(),
            body: delivery.message.body.clone(),
        }
    }

    /// Convert into the message published to the backend.
    #[must_use]
    pub fn into_backend(self) -> BackendMessage {
        let Self {
            header,
            properties,
            application_properties,
            body,
        } = self;
        let properties = properties.unwrap_or_default();
        let basic = BasicProperties {
            content_type: properties.content_type,
            content_encoding: properties.content_encoding,
            headers: application_properties,
            delivery_mode: header
                .as_ref()
                .map(|h| if h.durable { PERSISTENT } else { TRANSIENT }),
            priority: header.as_ref().and_then(|h| h.priority),
            correlation_id: properties.correlation_id,
            reply_to: properties.reply_to,
            expiration: header.as_ref().and_then(|h| h.ttl).map(|ttl| ttl.to_string()),
            message_id: properties.message_id,
            timestamp: properties.creation_time.map(|ms| ms / 1_000),
            user_id: properties.user_id,
        };
        BackendMessage {
            properties: basic,
            body,
        }
    }
}
