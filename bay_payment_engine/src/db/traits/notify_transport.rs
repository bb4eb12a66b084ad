use std::future::Future;

/// The HTTP leg of a merchant notification.
///
/// The engine decides *whether* to send (attempt cap, circuit breaker) and what the payload is;
/// the transport only moves bytes and classifies what came back. The production implementation is
/// a reqwest client with fixed timeouts; tests use a recording fake.
pub trait NotifyTransport: Clone {
    /// POSTs the form to the merchant and classifies the outcome. Transport problems are part of
    /// the classification, not errors, which is why this is infallible.
    fn deliver(&self, url: &str, form: &[(String, String)]) -> impl Future<Output = NotifyOutcome> + Send;
}

/// What happened to one delivery attempt.
///
/// `Success` requires an HTTP 2xx answer whose trimmed, upper-cased body equals `SUCCESS`.
/// Anything else the merchant answered is `BadResponse`; failing to get an answer at all is
/// `Timeout`. The split matters because the circuit breaker counts the two families separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Success,
    Timeout(String),
    BadResponse(String),
}
