//! XOR keystreams applied over whole wire payloads.

use std::sync::Mutex;

use crate::mt19937::Mt19937_64;

/// A byte stream XORed over buffers in place.
///
/// XOR is its own inverse, so one call encrypts and a second call with
/// the same stream decrypts.
pub trait Keystream {
    /// XOR `buf[i]` with the i-th keystream byte.
    fn xor(&self, buf: &mut [u8]);
}

// ─── SharedKey ───────────────────────────────────────────────────────────────

/// The fixed pre-login key pad, applied cyclically.
pub struct SharedKey {
    pad: Vec<u8>,
}

impl SharedKey {
    /// Wrap raw pad bytes. Empty pads are rejected by construction.
    pub fn new(pad: Vec<u8>) -> Option<Self> {
        if pad.is_empty() { None } else { Some(Self { pad }) }
    }

    /// Pad length in bytes.
    pub fn len(&self) -> usize {
        self.pad.len()
    }

    /// Whether the pad is empty (never true for a constructed key).
    pub fn is_empty(&self) -> bool {
        self.pad.is_empty()
    }
}

impl Keystream for SharedKey {
    fn xor(&self, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b ^= self.pad[i % self.pad.len()];
        }
    }
}

// ─── KeyBlock ────────────────────────────────────────────────────────────────

/// The post-login session keystream.
///
/// Lazily extended from MT19937-64: each `next_u64` appends 8 big-endian
/// bytes. Both forwarding loops of a session XOR against the same block,
/// so growth and reads happen under one lock.
pub struct KeyBlock {
    state: Mutex<BlockState>,
}

struct BlockState {
    rng: Mt19937_64,
    block: Vec<u8>,
}

impl KeyBlock {
    /// Derive a key block from the 64-bit token-exchange seed.
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(BlockState { rng: Mt19937_64::new(seed), block: Vec::new() }),
        }
    }

    /// Bytes generated so far.
    pub fn generated(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).block.len()
    }
}

impl Keystream for KeyBlock {
    fn xor(&self, buf: &mut [u8]) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.block.len() < buf.len() {
            let word = state.rng.next_u64();
            state.block.extend_from_slice(&word.to_be_bytes());
        }
        for (b, k) in buf.iter_mut().zip(state.block.iter()) {
            *b ^= k;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_is_involution() {
        let key = KeyBlock::new(0x090A_0C0E_0E0C_0A09);
        let original: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let mut buf = original.clone();
        key.xor(&mut buf);
        assert_ne!(buf, original);
        key.xor(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn shared_key_cycles_over_pad() {
        let key = SharedKey::new(vec![0xAA, 0x55]).unwrap();
        let mut buf = vec![0u8; 4];
        key.xor(&mut buf);
        assert_eq!(buf, [0xAA, 0x55, 0xAA, 0x55]);
    }

    #[test]
    fn key_block_grows_on_demand() {
        let key = KeyBlock::new(42);
        let mut small = [0u8; 4];
        key.xor(&mut small);
        assert_eq!(key.generated(), 8);

        let mut large = [0u8; 100];
        key.xor(&mut large);
        assert_eq!(key.generated(), 104);
    }

    #[test]
    fn key_block_prefix_is_stable_across_growth() {
        let a = KeyBlock::new(7);
        let b = KeyBlock::new(7);

        let mut short = [0u8; 16];
        a.xor(&mut short);

        let mut long = [0u8; 64];
        b.xor(&mut long);
        assert_eq!(short, long[..16]);
    }
}
