//! Bounded outgoing byte queue of one client session
//!
//! Data frames are perishable: under pressure they are dropped (oldest first)
//! or refused, depending on the policy. Replies and announcements are never
//! dropped, but a session that lets them pile up past twice the capacity is
//! treated as dead. Round markers (SYNCH) are never dropped either; two
//! markers are never queued back to back, which keeps them bounded by the
//! frames they separate.

use crate::error::{Error, Result};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// What to do with data frames when a client does not keep up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued data frames to make room
    #[default]
    DropOldest,
    /// Refuse new data frames and stop serving the session until it drains
    Backpressure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Data,
    Marker,
    Reliable,
}

struct Queued {
    bytes: Vec<u8>,
    kind: Kind,
}

pub struct Outbox {
    queue: VecDeque<Queued>,
    /// Bytes of the front frame already handed to the transport
    head_written: usize,
    /// Unwritten bytes across all queued frames
    queued_bytes: usize,
    capacity: usize,
    policy: OverflowPolicy,
    /// Set when backpressure refused a frame, cleared once half drained
    saturated: bool,
    dropped: u64,
}

impl Outbox {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: VecDeque::new(),
            head_written: 0,
            queued_bytes: 0,
            capacity,
            policy,
            saturated: false,
            dropped: 0,
        }
    }

    /// Queue an encoded data frame. Returns false if it was dropped.
    pub fn push_data(&mut self, frame: Vec<u8>) -> bool {
        let len = frame.len();
        if len > self.capacity {
            self.dropped += 1;
            return false;
        }

        match self.policy {
            OverflowPolicy::Backpressure => {
                if self.saturated || self.queued_bytes + len > self.capacity {
                    self.saturated = true;
                    self.dropped += 1;
                    return false;
                }
            }
            OverflowPolicy::DropOldest => {
                while self.queued_bytes + len > self.capacity {
                    if !self.evict_oldest_perishable() {
                        self.dropped += 1;
                        return false;
                    }
                }
            }
        }

        self.queued_bytes += len;
        self.queue.push_back(Queued {
            bytes: frame,
            kind: Kind::Data,
        });
        true
    }

    /// Queue the marker that ends a round.
    ///
    /// Markers are neither evicted nor refused. When the last queued frame is
    /// already a marker the new one is skipped: the round it would close has
    /// no data left in the queue.
    pub fn push_marker(&mut self, frame: Vec<u8>) {
        if self.queue.back().is_some_and(|q| q.kind == Kind::Marker) {
            return;
        }
        self.queued_bytes += frame.len();
        self.queue.push_back(Queued {
            bytes: frame,
            kind: Kind::Marker,
        });
    }

    /// Queue a reply or announcement that must not be dropped
    pub fn push_reliable(&mut self, frame: Vec<u8>) -> Result<()> {
        if self.queued_bytes + frame.len() > self.capacity.saturating_mul(2) {
            return Err(Error::QueueFull("client is not reading its replies"));
        }
        self.queued_bytes += frame.len();
        self.queue.push_back(Queued {
            bytes: frame,
            kind: Kind::Reliable,
        });
        Ok(())
    }

    /// Drop the oldest data frame that is not partially written
    fn evict_oldest_perishable(&mut self) -> bool {
        let skip = usize::from(self.head_written > 0);
        let Some(index) = self
            .queue
            .iter()
            .skip(skip)
            .position(|q| q.kind == Kind::Data)
            .map(|i| i + skip)
        else {
            return false;
        };
        if let Some(evicted) = self.queue.remove(index) {
            self.queued_bytes -= evicted.bytes.len();
            self.dropped += 1;
        }
        // the round lost its last frame: merge its marker into the one before
        let is_marker = |i: usize| self.queue.get(i).is_some_and(|q| q.kind == Kind::Marker);
        if index > 0
            && is_marker(index - 1)
            && is_marker(index)
            && let Some(marker) = self.queue.remove(index)
        {
            self.queued_bytes -= marker.bytes.len();
        }
        true
    }

    /// Write queued frames until the transport stops accepting bytes.
    /// Returns the number of bytes written.
    pub fn flush(&mut self, transport: &mut dyn Transport) -> Result<usize> {
        let mut written = 0;
        while let Some(front) = self.queue.front() {
            let n = transport.write(&front.bytes[self.head_written..])?;
            if n == 0 {
                break;
            }
            written += n;
            self.queued_bytes -= n;
            self.head_written += n;
            if self.head_written == front.bytes.len() {
                self.queue.pop_front();
                self.head_written = 0;
            }
        }
        if written > 0 {
            transport.flush()?;
        }
        if self.saturated && self.queued_bytes <= self.capacity / 2 {
            self.saturated = false;
        }
        Ok(written)
    }

    /// Data frames are being refused until the queue drains
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Data frames dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn test_drop_oldest_keeps_bound() {
        let mut outbox = Outbox::new(100, OverflowPolicy::DropOldest);
        for i in 0..10u8 {
            assert!(outbox.push_data(vec![i; 40]));
            assert!(outbox.queued_bytes() <= 100);
        }
        assert_eq!(outbox.queued_frames(), 2);
        assert_eq!(outbox.dropped(), 8);

        let mut mock = MockTransport::new();
        outbox.flush(&mut mock).unwrap();
        let written = mock.get_written();
        assert_eq!(&written[..40], &[8; 40]);
        assert_eq!(&written[40..], &[9; 40]);
    }

    #[test]
    fn test_partially_written_frame_not_evicted() {
        let mut outbox = Outbox::new(100, OverflowPolicy::DropOldest);
        let mock = MockTransport::new();
        let mut transport = mock.clone();

        outbox.push_data(vec![1; 60]);
        mock.set_write_capacity(Some(10));
        outbox.flush(&mut transport).unwrap();
        assert_eq!(outbox.queued_bytes(), 50);

        // the in-flight frame stays; the new frame cannot fit and is dropped
        assert!(!outbox.push_data(vec![2; 60]));
        assert!(outbox.push_data(vec![3; 50]));

        mock.set_write_capacity(None);
        outbox.flush(&mut transport).unwrap();
        let written = mock.get_written();
        assert_eq!(written.len(), 110);
        assert!(written[..60].iter().all(|&b| b == 1));
        assert!(written[60..].iter().all(|&b| b == 3));
    }

    #[test]
    fn test_replies_never_evicted() {
        let mut outbox = Outbox::new(100, OverflowPolicy::DropOldest);
        outbox.push_reliable(vec![7; 80]).unwrap();
        assert!(!outbox.push_data(vec![1; 40]));
        assert!(outbox.push_data(vec![1; 20]));
        assert_eq!(outbox.queued_frames(), 2);
    }

    #[test]
    fn test_backpressure_refuses_and_saturates() {
        let mut outbox = Outbox::new(100, OverflowPolicy::Backpressure);
        assert!(outbox.push_data(vec![0; 60]));
        assert!(!outbox.is_saturated());
        assert!(!outbox.push_data(vec![0; 60]));
        assert!(outbox.is_saturated());
        // would fit, but the session has to drain first
        assert!(!outbox.push_data(vec![0; 40]));
        assert_eq!(outbox.dropped(), 2);
        assert!(outbox.push_reliable(vec![0; 40]).is_ok());

        let mut mock = MockTransport::new();
        outbox.flush(&mut mock).unwrap();
        assert!(!outbox.is_saturated());
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_reliable_hard_limit() {
        let mut outbox = Outbox::new(50, OverflowPolicy::Backpressure);
        outbox.push_reliable(vec![0; 60]).unwrap();
        assert!(outbox.push_reliable(vec![0; 60]).is_err());
    }

    #[test]
    fn test_round_markers_survive_eviction() {
        let mut outbox = Outbox::new(100, OverflowPolicy::DropOldest);
        for round in 0..5u8 {
            assert!(outbox.push_data(vec![round; 40]));
            outbox.push_marker(vec![0xff; 4]);
        }
        assert_eq!(outbox.dropped(), 3);

        let mut mock = MockTransport::new();
        outbox.flush(&mut mock).unwrap();
        let mut expected = vec![0xff; 4];
        expected.extend([3; 40]);
        expected.extend([0xff; 4]);
        expected.extend([4; 40]);
        expected.extend([0xff; 4]);
        assert_eq!(mock.get_written(), expected);
    }

    #[test]
    fn test_marker_admitted_when_data_refused() {
        let mut outbox = Outbox::new(50, OverflowPolicy::Backpressure);
        assert!(outbox.push_data(vec![1; 40]));
        assert!(!outbox.push_data(vec![2; 40]));
        outbox.push_marker(vec![0xff; 4]);
        // an empty round right behind the last one adds nothing
        outbox.push_marker(vec![0xff; 4]);
        assert_eq!(outbox.queued_frames(), 2);
        assert_eq!(outbox.queued_bytes(), 44);
        assert!(outbox.is_saturated());
    }

    #[test]
    fn test_frame_larger_than_capacity() {
        let mut outbox = Outbox::new(10, OverflowPolicy::DropOldest);
        assert!(!outbox.push_data(vec![0; 11]));
        assert!(outbox.is_empty());
    }
}
