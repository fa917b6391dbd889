use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::types::BinlogEvent;

/// Creates the bounded queue between an event source and the stream consumer.
pub fn event_queue(capacity: usize) -> (EventSender, EventQueue) {
    let (tx, rx) = mpsc::channel(capacity);

    (
        EventSender { tx },
        EventQueue {
            rx,
            pushback: VecDeque::new(),
        },
    )
}

/// Producing side of the event queue, handed to the event source.
///
/// Sending waits while the queue is full, which back-pressures the source.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<BinlogEvent>,
}

impl EventSender {
    pub async fn send(&self, event: BinlogEvent) -> CdcResult<()> {
        if self.tx.send(event).await.is_err() {
            bail!(
                ErrorKind::SourceIoError,
                "The event queue was closed by the consumer"
            );
        }

        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consuming side of the event queue.
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::Receiver<BinlogEvent>,
    pushback: VecDeque<BinlogEvent>,
}

impl EventQueue {
    /// Returns the next event, or `None` if nothing arrived within `timeout`.
    pub async fn poll(&mut self, timeout: Duration) -> Option<BinlogEvent> {
        if let Some(event) = self.pushback.pop_front() {
            return Some(event);
        }

        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => Some(event),
            Ok(None) => {
                // Every sender is gone: behave like an idle queue instead of spinning.
                tokio::time::sleep(timeout).await;
                None
            }
            Err(_) => None,
        }
    }

    /// Puts `event` back so that the next poll returns it.
    pub fn push_front(&mut self, event: BinlogEvent) {
        self.pushback.push_front(event);
    }

    pub fn len(&self) -> usize {
        self.pushback.len() + self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BinlogPosition, EventBody, EventHeader};
    use chrono::Utc;

    fn event(offset: u64) -> BinlogEvent {
        BinlogEvent::new(
            EventHeader {
                position: BinlogPosition::new("mysql-bin.000001", offset),
                next_position: BinlogPosition::new("mysql-bin.000001", offset + 10),
                timestamp: Utc::now(),
                server_id: 1,
            },
            EventBody::Xid { xid: offset },
        )
    }

    #[tokio::test]
    async fn pushed_back_events_come_first() {
        let (tx, mut queue) = event_queue(4);
        tx.send(event(1)).await.unwrap();
        tx.send(event(2)).await.unwrap();

        let first = queue.poll(Duration::from_millis(10)).await.unwrap();
        queue.push_front(first.clone());

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.poll(Duration::from_millis(10)).await, Some(first));
        assert_eq!(
            queue.poll(Duration::from_millis(10)).await.unwrap().header.position.offset(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn poll_times_out_on_idle_queue() {
        let (_tx, mut queue) = event_queue(4);
        assert!(queue.poll(Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn send_fails_once_the_queue_is_dropped() {
        let (tx, queue) = event_queue(1);
        drop(queue);

        let err = tx.send(event(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceIoError);
    }
}
