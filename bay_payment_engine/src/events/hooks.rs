use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, Handler, OperatorAlertEvent, OrderClosedEvent, OrderPaidEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub order_paid_producer: Vec<EventProducer<OrderPaidEvent>>,
    pub order_closed_producer: Vec<EventProducer<OrderClosedEvent>>,
    pub alert_producer: Vec<EventProducer<OperatorAlertEvent>>,
}

pub struct EventHandlers {
    pub on_order_paid: Option<EventHandler<OrderPaidEvent>>,
    pub on_order_closed: Option<EventHandler<OrderClosedEvent>>,
    pub on_alert: Option<EventHandler<OperatorAlertEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_order_paid = hooks.on_order_paid.map(|f| EventHandler::new(buffer_size, f));
        let on_order_closed = hooks.on_order_closed.map(|f| EventHandler::new(buffer_size, f));
        let on_alert = hooks.on_alert.map(|f| EventHandler::new(buffer_size, f));
        Self { on_order_paid, on_order_closed, on_alert }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_order_paid {
            result.order_paid_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_order_closed {
            result.order_closed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_alert {
            result.alert_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_order_paid {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_order_closed {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_alert {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_order_paid: Option<Handler<OrderPaidEvent>>,
    pub on_order_closed: Option<Handler<OrderClosedEvent>>,
    pub on_alert: Option<Handler<OperatorAlertEvent>>,
}

impl EventHooks {
    pub fn on_order_paid<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderPaidEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_paid = Some(Arc::new(f));
        self
    }

    pub fn on_order_closed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderClosedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_closed = Some(Arc::new(f));
        self
    }

    pub fn on_alert<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OperatorAlertEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_alert = Some(Arc::new(f));
        self
    }
}
