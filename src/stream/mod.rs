//! Push streaming of log lines and metric samples
//!
//! A [`StreamHub`] has one producer and any number of consumers. Every
//! consumer session sees the producer's messages in emission order and ends
//! with exactly one terminal frame ([`Frame::Done`] or [`Frame::Error`]).
//!
//! The producer never waits on consumers: each consumer has a bounded
//! buffer, and a consumer whose buffer is full is dropped from the hub. It
//! still drains what was buffered and then receives an error frame.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::config::StreamConfig;

/// One message on a stream session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Frame<T> {
    /// A log line or sample
    Data(T),
    /// Graceful completion
    Done,
    /// Abnormal completion
    Error(String),
}

impl<T> Frame<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Frame::Data(_))
    }

    /// Event name used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Data(_) => "data",
            Frame::Done => "done",
            Frame::Error(_) => "error",
        }
    }
}

/// What a new subscriber receives before live messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Retained backlog first, then live messages
    FromStart,
    /// Only messages emitted after attaching
    FromNow,
}

/// Error reported to a consumer that could not keep up
pub const LAGGED_MESSAGE: &str = "consumer fell behind; stream dropped";

struct Subscriber<T> {
    tx: mpsc::Sender<Frame<T>>,
    lagged: Arc<AtomicBool>,
}

struct HubState<T> {
    backlog: VecDeque<T>,
    emitted: u64,
    subscribers: Vec<Subscriber<T>>,
    terminal: Option<Frame<T>>,
}

/// Single-producer, multi-consumer stream
pub struct StreamHub<T> {
    state: Arc<Mutex<HubState<T>>>,
    replay: Replay,
    capacity: usize,
    backlog_limit: usize,
}

impl<T> Clone for StreamHub<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            replay: self.replay,
            capacity: self.capacity,
            backlog_limit: self.backlog_limit,
        }
    }
}

impl<T: Clone + Send + 'static> StreamHub<T> {
    /// Create an open hub
    pub fn new(replay: Replay, config: StreamConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                backlog: VecDeque::new(),
                emitted: 0,
                subscribers: Vec::new(),
                terminal: None,
            })),
            replay,
            capacity: config.subscriber_capacity.max(1),
            backlog_limit: config.backlog_limit,
        }
    }

    /// Hub for a log tap (replays from the start)
    pub fn log(config: StreamConfig) -> Self {
        Self::new(Replay::FromStart, config)
    }

    /// Hub for a broadcast feed (live only)
    pub fn broadcast(config: StreamConfig) -> Self {
        Self::new(Replay::FromNow, config)
    }

    fn lock(&self) -> MutexGuard<'_, HubState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit a message. Returns `false` once the hub is closed.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return false;
        }
        state.emitted += 1;

        state.subscribers.retain(|sub| {
            match sub.tx.try_send(Frame::Data(item.clone())) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    sub.lagged.store(true, Ordering::Release);
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });

        if self.replay == Replay::FromStart {
            state.backlog.push_back(item);
            while state.backlog.len() > self.backlog_limit {
                state.backlog.pop_front();
            }
        }
        true
    }

    /// Close with [`Frame::Done`]. Returns `false` if already closed.
    pub fn finish(&self) -> bool {
        self.close(Frame::Done)
    }

    /// Close with [`Frame::Error`]. Returns `false` if already closed.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.close(Frame::Error(message.into()))
    }

    fn close(&self, terminal: Frame<T>) -> bool {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return false;
        }
        for sub in state.subscribers.drain(..) {
            if let Err(TrySendError::Full(_)) = sub.tx.try_send(terminal.clone()) {
                sub.lagged.store(true, Ordering::Release);
            }
        }
        state.terminal = Some(terminal);
        true
    }

    /// Attach a new consumer
    pub fn subscribe(&self) -> Subscription<T> {
        let mut state = self.lock();
        let replayed = match self.replay {
            Replay::FromStart => state.backlog.len(),
            Replay::FromNow => 0,
        };

        // Room for the replay, the terminal frame, and the live buffer
        let (tx, rx) = mpsc::channel(replayed + self.capacity + 1);
        let lagged = Arc::new(AtomicBool::new(false));

        if self.replay == Replay::FromStart {
            for item in &state.backlog {
                let _ = tx.try_send(Frame::Data(item.clone()));
            }
        }

        match state.terminal.clone() {
            Some(terminal) => {
                let _ = tx.try_send(terminal);
            }
            None => state.subscribers.push(Subscriber {
                tx,
                lagged: Arc::clone(&lagged),
            }),
        }

        Subscription {
            rx,
            lagged,
            finished: false,
        }
    }

    /// Number of messages emitted so far
    pub fn emitted(&self) -> u64 {
        self.lock().emitted
    }

    /// Whether a terminal frame has been emitted
    pub fn is_closed(&self) -> bool {
        self.lock().terminal.is_some()
    }

    /// Number of attached consumers
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|sub| !sub.tx.is_closed());
        state.subscribers.len()
    }
}

/// One consumer's session on a [`StreamHub`]
pub struct Subscription<T> {
    rx: mpsc::Receiver<Frame<T>>,
    lagged: Arc<AtomicBool>,
    finished: bool,
}

impl<T: Send + 'static> Subscription<T> {
    /// A session with nothing to deliver; yields `Done` and ends
    pub fn empty() -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(Frame::Done);
        Self {
            rx,
            lagged: Arc::new(AtomicBool::new(false)),
            finished: false,
        }
    }

    /// Next frame, or `None` after the terminal frame has been delivered.
    ///
    /// If the hub goes away without a terminal frame the session ends with
    /// `Done`; if this consumer was dropped for lagging it ends with `Error`.
    pub async fn next(&mut self) -> Option<Frame<T>> {
        if self.finished {
            return None;
        }
        let frame = match self.rx.recv().await {
            Some(frame) => frame,
            None if self.lagged.load(Ordering::Acquire) => {
                Frame::Error(LAGGED_MESSAGE.to_string())
            }
            None => Frame::Done,
        };
        if frame.is_terminal() {
            self.finished = true;
            self.rx.close();
        }
        Some(frame)
    }

    /// Adapt into a `Stream` that ends after the terminal frame
    pub fn into_stream(self) -> impl Stream<Item = Frame<T>> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|frame| (frame, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: usize) -> StreamConfig {
        StreamConfig {
            subscriber_capacity: capacity,
            backlog_limit: 100,
        }
    }

    async fn drain(mut sub: Subscription<String>) -> Vec<Frame<String>> {
        let mut frames = Vec::new();
        while let Some(frame) = sub.next().await {
            frames.push(frame);
        }
        frames
    }

    fn data(s: &str) -> Frame<String> {
        Frame::Data(s.to_string())
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_backlog_then_live() {
        let hub = StreamHub::log(config(8));
        hub.push("a".to_string());
        hub.push("b".to_string());

        let sub = hub.subscribe();
        hub.push("c".to_string());
        hub.finish();

        assert_eq!(
            drain(sub).await,
            vec![data("a"), data("b"), data("c"), Frame::Done]
        );
    }

    #[tokio::test]
    async fn test_subscribe_after_close_replays_and_terminates() {
        let hub = StreamHub::log(config(8));
        hub.push("only".to_string());
        hub.fail("boom");

        assert!(!hub.push("ignored".to_string()));
        assert!(!hub.finish());
        assert_eq!(
            drain(hub.subscribe()).await,
            vec![data("only"), Frame::Error("boom".to_string())]
        );
    }

    #[tokio::test]
    async fn test_broadcast_skips_history() {
        let hub = StreamHub::broadcast(config(8));
        hub.push("before".to_string());
        let sub = hub.subscribe();
        hub.push("after".to_string());
        hub.finish();

        assert_eq!(drain(sub).await, vec![data("after"), Frame::Done]);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_dropped_with_error() {
        let hub = StreamHub::broadcast(config(2));
        let slow = hub.subscribe();

        // Producer never blocks even though nobody is reading
        for i in 0..10 {
            assert!(hub.push(i.to_string()));
        }
        assert_eq!(hub.subscriber_count(), 0);

        let frames = drain(slow).await;
        // Buffered prefix in order, then an error terminal
        assert_eq!(frames[0], data("0"));
        assert_eq!(frames[1], data("1"));
        assert_eq!(
            frames.last(),
            Some(&Frame::Error(LAGGED_MESSAGE.to_string()))
        );
        assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_hub_reads_as_done() {
        let hub: StreamHub<String> = StreamHub::log(config(4));
        let sub = hub.subscribe();
        hub.push("x".to_string());
        drop(hub);

        assert_eq!(drain(sub).await, vec![data("x"), Frame::Done]);
    }

    #[tokio::test]
    async fn test_empty_subscription() {
        let frames = drain(Subscription::<String>::empty()).await;
        assert_eq!(frames, vec![Frame::Done]);
    }

    #[tokio::test]
    async fn test_backlog_limit_keeps_newest() {
        let hub = StreamHub::log(StreamConfig {
            subscriber_capacity: 4,
            backlog_limit: 2,
        });
        for line in ["1", "2", "3"] {
            hub.push(line.to_string());
        }
        hub.finish();

        assert_eq!(hub.emitted(), 3);
        assert_eq!(
            drain(hub.subscribe()).await,
            vec![data("2"), data("3"), Frame::Done]
        );
    }

    #[test]
    fn test_frame_wire_format() {
        let json = serde_json::to_string(&Frame::Data("line".to_string())).unwrap();
        assert_eq!(json, r#"{"type":"data","data":"line"}"#);
        let json = serde_json::to_string(&Frame::<String>::Done).unwrap();
        assert_eq!(json, r#"{"type":"done"}"#);
        let json = serde_json::to_string(&Frame::<String>::Error("x".into())).unwrap();
        assert_eq!(json, r#"{"type":"error","data":"x"}"#);
    }
}
