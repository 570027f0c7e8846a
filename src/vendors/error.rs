use thiserror::Error;

pub type VendorResult<T> = Result<T, VendorError>;

/// Errors raised by vendor adapters. Retryability drives both the adapter's
/// own backoff loop and the orchestrator's failover decision.
#[derive(Debug, Clone, Error)]
pub enum VendorError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("authentication with {vendor} failed: {message}")]
    Authentication { vendor: String, message: String },

    #[error("network error calling {vendor}: {message}")]
    Network { vendor: String, message: String },

    #[error("{vendor} request timed out after {timeout_secs}s")]
    Timeout { vendor: String, timeout_secs: u64 },

    #[error("{vendor} rate limit exceeded")]
    RateLimit {
        vendor: String,
        retry_after_seconds: Option<u64>,
    },

    /// The vendor acknowledged the reference as already submitted. Adapters
    /// translate HTTP 409 / duplicate responses into a `Pending` outcome; this
    /// variant only escapes when that translation is impossible.
    #[error("{vendor} reported a duplicate submission for {reference}")]
    Duplicate { vendor: String, reference: String },

    #[error("{vendor} does not support customer verification")]
    VerificationUnsupported { vendor: String },

    #[error("vendor error: vendor={vendor}, message={message}")]
    Upstream {
        vendor: String,
        message: String,
        vendor_code: Option<String>,
        retryable: bool,
    },
}

impl VendorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            VendorError::Validation { .. } => false,
            VendorError::Authentication { .. } => false,
            VendorError::Network { .. } => true,
            VendorError::Timeout { .. } => true,
            VendorError::RateLimit { .. } => true,
            VendorError::Duplicate { .. } => false,
            VendorError::VerificationUnsupported { .. } => false,
            VendorError::Upstream { retryable, .. } => *retryable,
        }
    }

    /// True for failures where the vendor may nevertheless have received the
    /// order (the wire went dark mid-flight).
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, VendorError::Timeout { .. } | VendorError::Network { .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            VendorError::Validation { message, .. } => message.clone(),
            VendorError::Authentication { .. } => {
                "Service provider rejected our credentials".to_string()
            }
            VendorError::Network { .. } | VendorError::Timeout { .. } => {
                "Service provider is temporarily unavailable".to_string()
            }
            VendorError::RateLimit { .. } => {
                "Too many requests to the service provider. Please retry shortly".to_string()
            }
            VendorError::Duplicate { .. } => {
                "This purchase was already submitted and is being processed".to_string()
            }
            VendorError::VerificationUnsupported { .. } => {
                "Customer verification is not available on this route".to_string()
            }
            VendorError::Upstream { .. } => "Service provider returned an error".to_string(),
        }
    }
}
