//! Synthetic product messages
//!
//! Generation is pure: no shared state, safe to call from many tasks at once.

use crate::broker::OutgoingRecord;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const NAME_MAX_CHARS: usize = 19;
pub const DESCRIPTION_MIN_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 999;
/// Exclusive upper bound of generated prices
pub const PRICE_LIMIT: u64 = 1_000_000;

const DESCRIPTION_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789 ";

/// Payload of every produced record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticMessage {
    pub name: String,
    pub description: String,
    pub price: u64,
}

impl SyntheticMessage {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let name: String = format!("Product-{}", rng.gen_range(0..1000))
            .chars()
            .take(NAME_MAX_CHARS)
            .collect();

        let length = rng.gen_range(DESCRIPTION_MIN_CHARS..=DESCRIPTION_MAX_CHARS);
        let alphabet = Uniform::from(0..DESCRIPTION_ALPHABET.len());
        let description = alphabet
            .sample_iter(&mut *rng)
            .take(length)
            .map(|index| DESCRIPTION_ALPHABET[index] as char)
            .collect();

        Self {
            name,
            description,
            price: rng.gen_range(0..PRICE_LIMIT),
        }
    }

    /// True when every field is within the generator's bounds
    pub fn within_bounds(&self) -> bool {
        let description_chars = self.description.chars().count();
        self.name.chars().count() <= NAME_MAX_CHARS
            && (DESCRIPTION_MIN_CHARS..=DESCRIPTION_MAX_CHARS).contains(&description_chars)
            && self
                .description
                .bytes()
                .all(|b| DESCRIPTION_ALPHABET.contains(&b))
            && self.price < PRICE_LIMIT
    }
}

/// `count` fresh messages from the thread-local generator
pub fn generate_batch(count: usize) -> Vec<SyntheticMessage> {
    generate_batch_with(&mut rand::thread_rng(), count)
}

pub fn generate_batch_with<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<SyntheticMessage> {
    (0..count).map(|_| SyntheticMessage::random(rng)).collect()
}

/// JSON-encode messages into records keyed `key-<index>`
pub fn encode_batch(messages: &[SyntheticMessage]) -> serde_json::Result<Vec<OutgoingRecord>> {
    messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            Ok(OutgoingRecord::new(
                format!("key-{index}"),
                serde_json::to_vec(message)?,
            ))
        })
        .collect()
}
