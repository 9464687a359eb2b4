//! Error types for the SpotX adapter.
//!
//! Operations that can fail return [`error_stack::Report<AdapterError>`] so the
//! host framework gets the full context chain when it logs a failure.

use derive_more::{Display, Error};

/// Errors surfaced by the adapter.
#[derive(Debug, Display, Error)]
pub enum AdapterError {
    /// Settings could not be loaded or failed validation.
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// Bidder params could not be read from a descriptor.
    #[display("Invalid bidder params: {message}")]
    InvalidParams { message: String },

    /// The outbound request could not be assembled.
    #[display("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The vendor response body could not be interpreted.
    #[display("Response error: {message}")]
    Response { message: String },

    /// The outstream player could not be injected into the page.
    #[display("Render error: {message}")]
    Render { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_stack::Report;

    #[test]
    fn display_includes_message() {
        let err = AdapterError::InvalidRequest {
            message: "no descriptors".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid request: no descriptors");
    }

    #[test]
    fn report_keeps_current_context() {
        let report = Report::new(AdapterError::Render {
            message: "slot missing".to_string(),
        });
        assert!(matches!(
            report.current_context(),
            AdapterError::Render { .. }
        ));
    }
}
