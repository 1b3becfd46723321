use crate::webrtc::IceCandidate;
use std::collections::VecDeque;

/// Remote candidates that arrived before the remote description.
///
/// Drained once, in arrival order, when the description is applied.
#[derive(Debug, Default)]
pub struct PendingCandidateBuffer {
    queue: VecDeque<IceCandidate>,
}

impl PendingCandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
    }

    /// Take every buffered candidate, oldest first, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{} 1 udp 1 10.0.0.{} 9 typ host", n, n),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    #[test]
    fn test_drain_is_fifo_and_empties() {
        let mut buffer = PendingCandidateBuffer::new();
        for n in 1..=3 {
            buffer.push(candidate(n));
        }
        let drained = buffer.drain();
        assert_eq!(drained, vec![candidate(1), candidate(2), candidate(3)]);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }
}
