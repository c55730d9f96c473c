//! Binary frame decoding for the firehose stream. Grounded on
//! `original_source/tpu/inputs/onchain/firehose/proto_decoder.py`: the
//! decoder is a distinct stage from the socket-reading listener so it can be
//! unit tested against raw bytes without a live connection.

use crate::core::error::{CoreError, CoreResult};
use crate::core::models::TradeEvent;
use serde::{Deserialize, Serialize};

/// A decoded block/transaction bundle from the firehose (spec.md §4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPacket {
    pub slot: u64,
    pub transactions: Vec<RawTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub token_mint: String,
    pub price: f64,
    pub amount: f64,
    pub ts: f64,
}

/// Length-delimited frame decoder. Production frames are protobuf; this
/// decoder accepts a length-prefixed JSON encoding of the same shape so the
/// core stays free of a protobuf toolchain dependency while preserving the
/// wire framing contract (4-byte big-endian length prefix + payload).
#[derive(Debug, Default)]
pub struct Decoder {
    pub malformed_count: u64,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one length-prefixed frame. Malformed frames are counted and
    /// dropped, never propagated as a hard error (spec.md §7).
    pub fn decode_frame(&mut self, frame: &[u8]) -> Option<RawPacket> {
        if frame.len() < 4 {
            self.malformed_count += 1;
            return None;
        }
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let payload = frame.get(4..4 + len)?;
        match serde_json::from_slice::<RawPacket>(payload) {
            Ok(packet) => Some(packet),
            Err(_) => {
                self.malformed_count += 1;
                None
            }
        }
    }

    /// Extract canonical `TradeEvent`s from a decoded packet.
    pub fn to_trade_events(&self, packet: &RawPacket) -> CoreResult<Vec<TradeEvent>> {
        let mut out = Vec::with_capacity(packet.transactions.len());
        for tx in &packet.transactions {
            if !crate::core::models::is_valid_base58_address(&tx.token_mint) {
                return Err(CoreError::InvalidAddress(tx.token_mint.clone()));
            }
            out.push(TradeEvent {
                token_mint: tx.token_mint.clone(),
                ts: tx.ts,
                price: tx.price,
                amount: tx.amount,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_for(packet: &RawPacket) -> Vec<u8> {
        let payload = serde_json::to_vec(packet).unwrap();
        let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
        frame.extend(payload);
        frame
    }

    #[test]
    fn decodes_well_formed_frame() {
        let packet = RawPacket {
            slot: 42,
            transactions: vec![RawTransaction {
                token_mint: "11111111111111111111111111111111".to_string(),
                price: 1.5,
                amount: 10.0,
                ts: 100.0,
            }],
        };
        let frame = frame_for(&packet);
        let mut decoder = Decoder::new();
        let decoded = decoder.decode_frame(&frame).expect("decodes");
        assert_eq!(decoded.slot, 42);
        assert_eq!(decoder.malformed_count, 0);
        let events = decoder.to_trade_events(&decoded).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].price, 1.5);
    }

    #[test]
    fn counts_and_drops_malformed_frames() {
        let mut decoder = Decoder::new();
        assert!(decoder.decode_frame(&[0, 0]).is_none());
        assert_eq!(decoder.malformed_count, 1);
        assert!(decoder.decode_frame(&[0, 0, 0, 5, 1, 2]).is_none());
        assert_eq!(decoder.malformed_count, 2);
    }

    #[test]
    fn rejects_invalid_mint_address() {
        let packet = RawPacket {
            slot: 1,
            transactions: vec![RawTransaction {
                token_mint: "not-base58!!".to_string(),
                price: 1.0,
                amount: 1.0,
                ts: 1.0,
            }],
        };
        let decoder = Decoder::new();
        assert!(decoder.to_trade_events(&packet).is_err());
    }
}
