//! The plumbing under the event hooks: one bounded mpsc channel per event type, many producers,
//! one dispatch loop.
//!
//! Handlers are stateless async closures; they get the event and nothing else. The gateway uses
//! this to take the paid notification and operator alerts off the request path. Each received
//! event is handled on its own task, so one slow merchant endpoint does not hold up the channel.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use log::*;
use tokio::sync::mpsc;

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    listener: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, listener) = mpsc::channel(buffer_size);
        Self { listener, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    /// Runs the dispatch loop until every producer has been dropped, then drains the in-flight
    /// handler tasks before returning.
    pub async fn start_handler(mut self) {
        debug!("📬️ Event handler running");
        // Dropping our own sender makes recv() answer None once the last producer is gone.
        drop(self.sender);
        let in_flight = Arc::new(AtomicI64::new(0));
        while let Some(event) = self.listener.recv().await {
            trace!("📬️ Dispatching an event");
            let handler = Arc::clone(&self.handler);
            let gauge = Arc::clone(&in_flight);
            gauge.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                (handler)(event).await;
                gauge.fetch_sub(1, Ordering::SeqCst);
            });
        }
        loop {
            let pending = in_flight.load(Ordering::SeqCst);
            if pending <= 0 {
                break;
            }
            debug!("📬️ Waiting for {pending} in-flight handlers to finish");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        debug!("📬️ Event handler stopped");
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub fn new(sender: mpsc::Sender<E>) -> Self {
        Self { sender }
    }

    /// Publishing never fails the caller. A dead channel is logged and the event is dropped,
    /// which is the right trade for fire-and-forget side effects.
    pub async fn publish_event(&self, event: E) {
        if let Err(e) = self.sender.send(event).await {
            error!("📬️ An event was dropped because its channel is closed: {e}");
        }
    }
}
