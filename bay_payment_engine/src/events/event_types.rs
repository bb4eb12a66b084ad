use std::fmt::Display;

use chrono::{DateTime, Utc};

use crate::db_types::Order;

/// An order has been confirmed as paid, either via a provider callback or a reconciliation query.
#[derive(Clone, Debug)]
pub struct OrderPaidEvent {
    pub order: Order,
}

impl OrderPaidEvent {
    pub fn new(order: Order) -> Self {
        Self { order }
    }
}

/// An order has been closed without payment, either explicitly or because it expired.
#[derive(Clone, Debug)]
pub struct OrderClosedEvent {
    pub order: Order,
}

impl OrderClosedEvent {
    pub fn new(order: Order) -> Self {
        Self { order }
    }
}

/// Something happened that an operator should look at. These events are informational; the engine
/// has already taken whatever protective action it is going to take.
#[derive(Clone, Debug)]
pub struct OperatorAlertEvent {
    pub alert: OperatorAlert,
}

impl OperatorAlertEvent {
    pub fn new(alert: OperatorAlert) -> Self {
        Self { alert }
    }
}

#[derive(Clone, Debug)]
pub enum OperatorAlert {
    /// A merchant's notification circuit breaker has tripped. Deliveries are skipped until the
    /// given time.
    CircuitOpened { merchant_id: i64, until: DateTime<Utc> },
    /// A settlement subject was disabled because the provider returned a code that marks the
    /// account as unusable.
    SubjectDisabled { subject_id: i64, code: String },
    /// A royalty settlement was abandoned and needs manual follow-up.
    RoyaltyFailed { order_id: i64, message: String },
}

impl Display for OperatorAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorAlert::CircuitOpened { merchant_id, until } => {
                write!(f, "Notification circuit for merchant {merchant_id} is open until {until}")
            },
            OperatorAlert::SubjectDisabled { subject_id, code } => {
                write!(f, "Subject {subject_id} has been disabled after provider code {code}")
            },
            OperatorAlert::RoyaltyFailed { order_id, message } => {
                write!(f, "Royalty settlement for order id {order_id} was abandoned: {message}")
            },
        }
    }
}
