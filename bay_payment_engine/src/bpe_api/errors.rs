use thiserror::Error;

use crate::traits::{FastStoreError, MerchantApiError, PaymentGatewayError, ProviderError};

/// Everything that can go wrong between an authenticated merchant request and a committed order
/// mutation.
///
/// The callers at the HTTP boundary map these onto status codes, so the split between variants
/// follows what the client can do about it: fix the request (`Validation`), fix the credentials
/// (`InvalidCredentials`), retry later (`OrderNumberExhausted` and the store/provider
/// pass-throughs), or nothing at all.
#[derive(Debug, Error)]
pub enum OrderFlowError {
    #[error("Invalid request. {0}")]
    Validation(String),
    /// One uniform message for every authentication failure. Callers must not be able to tell an
    /// unknown key from a disabled merchant, a rejected IP or a bad digest.
    #[error("Invalid api key or merchant disabled")]
    InvalidCredentials,
    #[error("The callback signature does not verify")]
    InvalidProviderSignature,
    #[error("Could not issue a unique order number after {0} attempts")]
    OrderNumberExhausted(u32),
    #[error(transparent)]
    DatabaseError(#[from] PaymentGatewayError),
    #[error(transparent)]
    MerchantError(#[from] MerchantApiError),
    #[error(transparent)]
    StoreError(#[from] FastStoreError),
    #[error(transparent)]
    ProviderError(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum NotifyApiError {
    #[error("Merchant {0} does not exist")]
    MerchantNotFound(i64),
    #[error(transparent)]
    DatabaseError(#[from] PaymentGatewayError),
    #[error(transparent)]
    StoreError(#[from] FastStoreError),
}

impl From<MerchantApiError> for NotifyApiError {
    fn from(e: MerchantApiError) -> Self {
        NotifyApiError::DatabaseError(PaymentGatewayError::MerchantError(e))
    }
}
