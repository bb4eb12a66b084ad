use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use bay_payment_engine::{
    errors::{NotifyApiError, OrderFlowError},
    traits::{FastStoreError, PaymentGatewayError, RoyaltyApiError},
};
use log::error;
use thiserror::Error;

use crate::data_objects::ApiResponse;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    /// One uniform message for every failed merchant authentication.
    #[error("Invalid api key or merchant disabled")]
    AuthenticationError,
    #[error("Access denied")]
    ForbiddenPeer,
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Invalid request. {0}")]
    ValidationError(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    StateError(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("A backing service is unavailable. {0}")]
    ServiceUnavailable(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationError => StatusCode::UNAUTHORIZED,
            Self::ForbiddenPeer => StatusCode::FORBIDDEN,
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::StateError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(ApiResponse::failure(self.to_string()))
    }
}

impl From<OrderFlowError> for ServerError {
    fn from(e: OrderFlowError) -> Self {
        match e {
            OrderFlowError::InvalidCredentials => Self::AuthenticationError,
            OrderFlowError::InvalidProviderSignature => Self::AuthenticationError,
            OrderFlowError::Validation(msg) => Self::ValidationError(msg),
            OrderFlowError::OrderNumberExhausted(_) => Self::Conflict(e.to_string()),
            OrderFlowError::DatabaseError(db) => db.into(),
            OrderFlowError::MerchantError(e) => Self::BackendError(e.to_string()),
            OrderFlowError::StoreError(e) => e.into(),
            OrderFlowError::ProviderError(e) => Self::ServiceUnavailable(e.to_string()),
        }
    }
}

impl From<PaymentGatewayError> for ServerError {
    fn from(e: PaymentGatewayError) -> Self {
        match e {
            PaymentGatewayError::DuplicateMerchantOrder(_) | PaymentGatewayError::OrderNoCollision(_) => {
                Self::Conflict(e.to_string())
            },
            PaymentGatewayError::OrderNotFound(_) | PaymentGatewayError::OrderIdNotFound(_) => {
                Self::NoRecordFound(e.to_string())
            },
            PaymentGatewayError::OrderModificationForbidden(_) | PaymentGatewayError::OrderModificationNoOp => {
                Self::StateError(e.to_string())
            },
            PaymentGatewayError::DatabaseError(msg) => Self::BackendError(msg),
            PaymentGatewayError::MerchantError(e) => Self::BackendError(e.to_string()),
        }
    }
}

impl From<FastStoreError> for ServerError {
    fn from(e: FastStoreError) -> Self {
        Self::ServiceUnavailable(e.to_string())
    }
}

impl From<NotifyApiError> for ServerError {
    fn from(e: NotifyApiError) -> Self {
        match e {
            NotifyApiError::MerchantNotFound(id) => Self::NoRecordFound(format!("merchant {id}")),
            NotifyApiError::DatabaseError(db) => db.into(),
            NotifyApiError::StoreError(e) => e.into(),
        }
    }
}

impl From<RoyaltyApiError> for ServerError {
    fn from(e: RoyaltyApiError) -> Self {
        match e {
            RoyaltyApiError::RoyaltyNotFound(_) | RoyaltyApiError::OrderNotFound(_) => {
                Self::NoRecordFound(e.to_string())
            },
            RoyaltyApiError::RetryNotAllowed(_, _) => Self::StateError(e.to_string()),
            RoyaltyApiError::RoyaltyAlreadyExists(_) => Self::Conflict(e.to_string()),
            RoyaltyApiError::InvalidSplit(msg) => Self::ValidationError(msg),
            RoyaltyApiError::StoreError(msg) => Self::ServiceUnavailable(msg),
            RoyaltyApiError::DatabaseError(msg) => Self::BackendError(msg),
            RoyaltyApiError::BadQueueMessage(msg) => Self::BackendError(msg),
        }
    }
}
