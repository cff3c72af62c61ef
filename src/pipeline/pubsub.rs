//! Pub/Sub Messages
//!
//! Once a pipeline subscribes it is in one-way mode: the server pushes
//! multi-bulk frames that answer no particular request. [`PubSubMessage`]
//! classifies them.
//!
//! ```text
//! *3 $7 message   <channel> <payload>
//! *4 $8 pmessage  <pattern> <channel> <payload>
//! *3 $9 subscribe <channel> :<count>        (also unsubscribe, psubscribe, punsubscribe)
//! *2 $4 pong      <payload>
//! ```

use crate::error::{ClientError, ClientResult};
use crate::protocol::parser::bytes_of;
use crate::protocol::{ParseError, Reply};
use bytes::Bytes;

/// A message pushed by the server to a subscribed pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubMessage {
    /// Payload published on a subscribed channel
    Message { channel: Bytes, payload: Bytes },

    /// Payload published on a channel matching a subscribed pattern
    PMessage {
        pattern: Bytes,
        channel: Bytes,
        payload: Bytes,
    },

    /// Subscription confirmed; `count` is the number of active subscriptions
    Subscribe { channel: Bytes, count: i64 },

    Unsubscribe { channel: Bytes, count: i64 },

    PSubscribe { pattern: Bytes, count: i64 },

    PUnsubscribe { pattern: Bytes, count: i64 },

    /// Reply to PING while subscribed
    Pong(Bytes),
}

impl PubSubMessage {
    /// Classifies a pushed reply.
    ///
    /// Anything that is not one of the known push shapes is a protocol error.
    pub fn from_reply(reply: Reply) -> ClientResult<Self> {
        let items = match reply {
            Reply::MultiBulk(Some(items)) if !items.is_empty() => items,
            other => return Err(unexpected(&format!("push frame {}", kind_of(&other)))),
        };

        let kind = bytes_of(&items[0])
            .ok_or_else(|| unexpected("push frame without a kind"))?
            .to_ascii_lowercase();

        let message = match (kind.as_slice(), items.as_slice()) {
            (b"message", [_, channel, payload]) => PubSubMessage::Message {
                channel: field(channel)?,
                payload: field(payload)?,
            },
            (b"pmessage", [_, pattern, channel, payload]) => PubSubMessage::PMessage {
                pattern: field(pattern)?,
                channel: field(channel)?,
                payload: field(payload)?,
            },
            (b"subscribe", [_, channel, count]) => PubSubMessage::Subscribe {
                channel: field(channel)?,
                count: count_of(count)?,
            },
            (b"unsubscribe", [_, channel, count]) => PubSubMessage::Unsubscribe {
                channel: field(channel)?,
                count: count_of(count)?,
            },
            (b"psubscribe", [_, pattern, count]) => PubSubMessage::PSubscribe {
                pattern: field(pattern)?,
                count: count_of(count)?,
            },
            (b"punsubscribe", [_, pattern, count]) => PubSubMessage::PUnsubscribe {
                pattern: field(pattern)?,
                count: count_of(count)?,
            },
            (b"pong", [_]) => PubSubMessage::Pong(Bytes::new()),
            (b"pong", [_, payload]) => PubSubMessage::Pong(field(payload)?),
            (other, _) => {
                return Err(unexpected(&format!(
                    "push kind '{}' with {} elements",
                    String::from_utf8_lossy(other),
                    items.len()
                )))
            }
        };
        Ok(message)
    }

    /// The channel a `Message` or `PMessage` arrived on.
    pub fn channel(&self) -> Option<&Bytes> {
        match self {
            PubSubMessage::Message { channel, .. } | PubSubMessage::PMessage { channel, .. } => {
                Some(channel)
            }
            _ => None,
        }
    }

    /// The published payload of a `Message` or `PMessage`.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            PubSubMessage::Message { payload, .. } | PubSubMessage::PMessage { payload, .. } => {
                Some(payload)
            }
            _ => None,
        }
    }
}

/// A bulk field; nil (e.g. unsubscribing with no channels) reads as empty.
fn field(value: &Reply) -> ClientResult<Bytes> {
    match value {
        Reply::Bulk(None) => Ok(Bytes::new()),
        other => bytes_of(other).ok_or_else(|| unexpected("non-bulk push field")),
    }
}

fn count_of(value: &Reply) -> ClientResult<i64> {
    value
        .as_integer()
        .ok_or_else(|| unexpected("subscription count is not an integer"))
}

fn kind_of(reply: &Reply) -> &'static str {
    match reply {
        Reply::Status(_) => "status",
        Reply::Error(_) => "error",
        Reply::Integer(_) => "integer",
        Reply::Bulk(_) => "bulk",
        Reply::MultiBulk(None) => "nil multi-bulk",
        Reply::MultiBulk(Some(_)) => "empty multi-bulk",
    }
}

fn unexpected(what: &str) -> ClientError {
    ClientError::Protocol(ParseError::Framing(format!("unexpected {}", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(parts: Vec<Reply>) -> Reply {
        Reply::multi(parts)
    }

    #[test]
    fn test_message() {
        let reply = push(vec![
            Reply::bulk("message"),
            Reply::bulk("news"),
            Reply::bulk("hello"),
        ]);
        let message = PubSubMessage::from_reply(reply).unwrap();
        assert_eq!(
            message,
            PubSubMessage::Message {
                channel: Bytes::from("news"),
                payload: Bytes::from("hello"),
            }
        );
        assert_eq!(message.channel().unwrap(), &Bytes::from("news"));
        assert_eq!(message.payload().unwrap(), &Bytes::from("hello"));
    }

    #[test]
    fn test_pmessage() {
        let reply = push(vec![
            Reply::bulk("pmessage"),
            Reply::bulk("n*"),
            Reply::bulk("news"),
            Reply::bulk("hi"),
        ]);
        assert_eq!(
            PubSubMessage::from_reply(reply).unwrap(),
            PubSubMessage::PMessage {
                pattern: Bytes::from("n*"),
                channel: Bytes::from("news"),
                payload: Bytes::from("hi"),
            }
        );
    }

    #[test]
    fn test_confirmations() {
        let reply = push(vec![
            Reply::bulk("subscribe"),
            Reply::bulk("news"),
            Reply::Integer(1),
        ]);
        assert_eq!(
            PubSubMessage::from_reply(reply).unwrap(),
            PubSubMessage::Subscribe {
                channel: Bytes::from("news"),
                count: 1
            }
        );

        let reply = push(vec![Reply::bulk("unsubscribe"), Reply::nil(), Reply::Integer(0)]);
        assert_eq!(
            PubSubMessage::from_reply(reply).unwrap(),
            PubSubMessage::Unsubscribe {
                channel: Bytes::new(),
                count: 0
            }
        );

        let reply = push(vec![Reply::bulk("psubscribe"), Reply::bulk("a*"), Reply::Integer(2)]);
        assert!(matches!(
            PubSubMessage::from_reply(reply).unwrap(),
            PubSubMessage::PSubscribe { count: 2, .. }
        ));
    }

    #[test]
    fn test_pong() {
        let reply = push(vec![Reply::bulk("pong"), Reply::bulk("")]);
        assert_eq!(
            PubSubMessage::from_reply(reply).unwrap(),
            PubSubMessage::Pong(Bytes::new())
        );
    }

    #[test]
    fn test_unexpected_shapes() {
        assert!(PubSubMessage::from_reply(Reply::ok()).is_err());
        assert!(PubSubMessage::from_reply(Reply::multi(vec![])).is_err());

        let wrong_arity = push(vec![Reply::bulk("message"), Reply::bulk("news")]);
        let err = PubSubMessage::from_reply(wrong_arity).unwrap_err();
        assert!(err.is_fatal());

        let bad_count = push(vec![
            Reply::bulk("subscribe"),
            Reply::bulk("news"),
            Reply::bulk("one"),
        ]);
        assert!(PubSubMessage::from_reply(bad_count).is_err());
    }
}
