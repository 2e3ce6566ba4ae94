use framing::FrameError;

// ═══════════════════════════════════════════════════════════════
//  PRNG (xorshift64)
// ═══════════════════════════════════════════════════════════════

pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: i64) -> Self {
        let state = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1 // ensure non-zero
        } else {
            seed as u64
        };
        Self { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    pub fn next_intn(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Frame batches
// ═══════════════════════════════════════════════════════════════

/// Builds outer frames with a random topic and a payload that starts with
/// the big-endian sequence number, so gaps are visible in stored data.
pub struct FrameBuilder {
    topics: Vec<String>,
    payload: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(topics: Vec<String>, payload_size: usize) -> Self {
        Self { topics, payload: vec![0u8; payload_size] }
    }

    pub fn push_frame(&mut self, seq: u64, rng: &mut Rng, out: &mut Vec<u8>) -> Result<(), FrameError> {
        let topic = &self.topics[rng.next_intn(self.topics.len())];
        rng.fill(&mut self.payload);
        let stamp = seq.to_be_bytes();
        let n = stamp.len().min(self.payload.len());
        self.payload[..n].copy_from_slice(&stamp[..n]);
        framing::encode_frame(topic, &self.payload, out)
    }
}

/// Cut point strictly inside `len`, so both writes are non-empty.
pub fn split_point(len: usize, rng: &mut Rng) -> Option<usize> {
    if len < 2 {
        return None;
    }
    Some(1 + rng.next_intn(len - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use framing::{Decoded, LengthPrefixedFraming, decode_outer_frame};

    #[test]
    fn test_rng_is_deterministic_for_seed() {
        let mut a = Rng::new(42);
        let mut b = Rng::new(42);
        for _ in 0..10 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_sticky_batch_decodes_back() {
        let mut rng = Rng::new(7);
        let mut builder = FrameBuilder::new(vec!["a".into(), "bb".into()], 20);
        let mut buf = Vec::new();
        builder.push_frame(1, &mut rng, &mut buf).unwrap();
        builder.push_frame(2, &mut rng, &mut buf).unwrap();

        let framing = LengthPrefixedFraming::default();
        let mut pos = 0;
        let mut seqs = Vec::new();
        while let Some((kind, consumed)) = framing.decode(&buf[pos..]).unwrap() {
            assert_eq!(kind, Decoded::Frame);
            let frame = decode_outer_frame(&buf[pos..pos + consumed]).unwrap();
            assert!(frame.topic == "a" || frame.topic == "bb");
            assert_eq!(frame.payload.len(), 20);
            seqs.push(u64::from_be_bytes(frame.payload[..8].try_into().unwrap()));
            pos += consumed;
        }
        assert_eq!(pos, buf.len());
        assert_eq!(seqs, [1, 2]);
    }

    #[test]
    fn test_split_point_in_range() {
        let mut rng = Rng::new(3);
        assert_eq!(split_point(1, &mut rng), None);
        for _ in 0..100 {
            let cut = split_point(10, &mut rng).unwrap();
            assert!((1..10).contains(&cut));
        }
    }

    #[test]
    fn test_short_payload_keeps_prefix_of_seq() {
        let mut rng = Rng::new(9);
        let mut builder = FrameBuilder::new(vec!["t".into()], 3);
        let mut buf = Vec::new();
        builder.push_frame(u64::MAX, &mut rng, &mut buf).unwrap();
        let frame = decode_outer_frame(&buf).unwrap();
        assert_eq!(frame.payload, &[0xFF, 0xFF, 0xFF]);
    }
}
