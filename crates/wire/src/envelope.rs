// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary encoding for the bus envelope ([`ghost_core::Message`]).
//!
//! Field order: `Id, Channel, Priority, CreatedAt, ExpiresAt, TypeTag, Payload`.

use ghost_core::{Message, MessageId, Priority};

use crate::codec::{Reader, Writer};
use crate::error::ProtocolError;

fn priority_tag(p: Priority) -> u8 {
    match p {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
        Priority::Critical => 3,
    }
}

fn priority_from_tag(tag: u8) -> Result<Priority, ProtocolError> {
    match tag {
        0 => Ok(Priority::Low),
        1 => Ok(Priority::Normal),
        2 => Ok(Priority::High),
        3 => Ok(Priority::Critical),
        other => Err(ProtocolError::UnknownTag(other, "Priority")),
    }
}

pub fn encode_message(msg: &Message) -> Vec<u8> {
    let mut w = Writer::new();
    w.str(msg.id.as_str());
    w.str(&msg.channel);
    w.u8(priority_tag(msg.priority));
    w.u64(msg.created_at);
    w.u64(msg.expires_at);
    w.str(&msg.type_tag);
    w.bytes(&msg.payload);
    w.finish()
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = Reader::new(bytes);
    let id = MessageId(r.str()?);
    let channel = r.str()?;
    let priority = priority_from_tag(r.u8()?)?;
    let created_at = r.u64()?;
    let expires_at = r.u64()?;
    let type_tag = r.str()?;
    let payload = r.bytes()?;
    Ok(Message {
        id,
        channel,
        priority,
        created_at,
        expires_at,
        type_tag,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrips_through_binary_codec() {
        let msg = Message {
            id: MessageId::new(1_700_000_000_000, 3, uuid::Uuid::nil()),
            channel: "ghost:commands".into(),
            priority: Priority::High,
            created_at: 1_700_000_000_000,
            expires_at: 1_700_000_086_400,
            type_tag: "system_command".into(),
            payload: b"hello".to_vec(),
        };
        let decoded = decode_message(&encode_message(&msg)).unwrap();
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.channel, msg.channel);
        assert_eq!(decoded.priority, msg.priority);
        assert_eq!(decoded.payload, msg.payload);
    }
}
