//! In-process channel over a bounded lock-free queue.
//!
//! The publication end feeds the subscription end directly, so a ping
//! offered on it comes straight back as the pong. A full queue is reported
//! as backpressure. Closing or dropping either end closes the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::ArrayQueue;

use super::{Publication, Subscription, TransportError};

#[derive(Debug)]
struct Shared {
    queue: ArrayQueue<Vec<u8>>,
    closed: AtomicBool,
}

impl Shared {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pub fn channel(capacity: usize) -> (IpcPublication, IpcSubscription) {
    let shared = Arc::new(Shared {
        queue: ArrayQueue::new(capacity.max(1)),
        closed: AtomicBool::new(false),
    });
    (
        IpcPublication {
            shared: shared.clone(),
        },
        IpcSubscription { shared },
    )
}

#[derive(Debug)]
pub struct IpcPublication {
    shared: Arc<Shared>,
}

impl Publication for IpcPublication {
    fn offer(&mut self, buffer: &[u8]) -> Result<bool, TransportError> {
        if self.shared.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(self.shared.queue.push(buffer.to_vec()).is_ok())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.shared.close();
        Ok(())
    }
}

impl Drop for IpcPublication {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[derive(Debug)]
pub struct IpcSubscription {
    shared: Arc<Shared>,
}

impl Subscription for IpcSubscription {
    fn poll<F>(&mut self, fragment_limit: usize, mut handler: F) -> Result<usize, TransportError>
    where
        F: FnMut(&[u8]),
    {
        let mut fragments = 0;
        while fragments < fragment_limit {
            match self.shared.queue.pop() {
                Some(fragment) => {
                    handler(&fragment);
                    fragments += 1;
                }
                None => break,
            }
        }

        // drain what was queued before a close, then report it
        if fragments == 0 && self.shared.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(fragments)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.shared.close();
        Ok(())
    }
}

impl Drop for IpcSubscription {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_then_poll() {
        let (mut publication, mut subscription) = channel(8);
        assert!(publication.offer(&[1, 2, 3]).unwrap());
        assert!(publication.offer(&[4]).unwrap());

        let mut received = Vec::new();
        let read = subscription.poll(10, |f| received.push(f.to_vec())).unwrap();
        assert_eq!(read, 2);
        assert_eq!(received, vec![vec![1, 2, 3], vec![4]]);
        assert_eq!(subscription.poll(10, |_| {}).unwrap(), 0);
    }

    #[test]
    fn test_full_queue_is_backpressure() {
        let (mut publication, mut subscription) = channel(2);
        assert!(publication.offer(b"a").unwrap());
        assert!(publication.offer(b"b").unwrap());
        assert!(!publication.offer(b"c").unwrap());

        assert_eq!(subscription.poll(1, |_| {}).unwrap(), 1);
        assert!(publication.offer(b"c").unwrap());
    }

    #[test]
    fn test_fragment_limit_is_respected() {
        let (mut publication, mut subscription) = channel(8);
        for i in 0..5u8 {
            publication.offer(&[i]).unwrap();
        }
        assert_eq!(subscription.poll(3, |_| {}).unwrap(), 3);
        assert_eq!(subscription.poll(3, |_| {}).unwrap(), 2);
    }

    #[test]
    fn test_close_drains_then_fails() {
        let (mut publication, mut subscription) = channel(8);
        publication.offer(b"last").unwrap();
        drop(publication);

        assert_eq!(subscription.poll(10, |_| {}).unwrap(), 1);
        assert!(matches!(subscription.poll(10, |_| {}), Err(TransportError::Closed)));
    }

    #[test]
    fn test_dropped_subscription_closes_publication() {
        let (mut publication, subscription) = channel(8);
        drop(subscription);
        assert!(matches!(publication.offer(b"x"), Err(TransportError::Closed)));
    }
}
