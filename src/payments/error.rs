use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Gateway configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Callback verification failed: {message}")]
    CallbackVerificationError { message: String },

    #[error("Malformed callback: {message}")]
    MalformedCallback {
        message: String,
        field: Option<String>,
    },
}

impl PaymentError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        PaymentError::ValidationError {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn malformed(message: impl Into<String>, field: &str) -> Self {
        PaymentError::MalformedCallback {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ConfigurationError { .. } => 500,
            PaymentError::ValidationError { .. } => 400,
            PaymentError::CallbackVerificationError { .. } => 401,
            PaymentError::MalformedCallback { .. } => 400,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ConfigurationError { .. } => {
                "Payment gateway is not available".to_string()
            }
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::CallbackVerificationError { .. } => {
                "Invalid payment callback signature".to_string()
            }
            PaymentError::MalformedCallback { message, .. } => message.clone(),
        }
    }
}
