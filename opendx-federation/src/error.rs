use apollo_compiler::InvalidNameError;

#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("invalid unified schema: {message}")]
    InvalidSchema { message: String },
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },
    #[error("only query operations are supported, found a {operation} operation")]
    UnsupportedOperation { operation: String },
    #[error("the query document must contain exactly one operation")]
    NotSingleOperation,
    #[error("no active unified schema is available")]
    MissingActiveSchema,
    #[error("@sourceInfo on \"{location}\" is missing the \"{argument}\" argument")]
    MalformedSourceInfo { location: String, argument: String },
    #[error(
        "variable \"${variable}\" has unsupported kind \"{kind}\", \
         expected string, int, float or boolean"
    )]
    UnsupportedArgumentKind { variable: String, kind: &'static str },
    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),
    #[error("{message}")]
    Internal { message: String },
}

impl FederationError {
    pub fn internal(message: impl Into<String>) -> Self {
        FederationError::Internal {
            message: message.into(),
        }
    }
}

/// Machine-readable error codes surfaced on `errors[].extensions.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ErrorCode {
    #[strum(to_string = "PDP_ERROR")]
    PdpError,
    #[strum(to_string = "PDP_NO_RESPONSE")]
    PdpNoResponse,
    #[strum(to_string = "PDP_NOT_ALLOWED")]
    PdpNotAllowed,
    #[strum(to_string = "CE_ERROR")]
    CeError,
    #[strum(to_string = "CE_NOT_APPROVED")]
    CeNotApproved,
    #[strum(to_string = "MISSING_ENTITY_IDENTIFIER")]
    MissingEntityIdentifier,
}
