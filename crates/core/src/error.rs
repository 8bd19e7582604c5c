#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Cannot aggregate an empty list of {entity_type} timings")]
    EmptyAggregation { entity_type: String },

    #[error(
        "Invalid output image URL {0}, it should look like server.com/org, \
         server.com/org/image, or server.com/org/image:tag"
    )]
    InvalidImageUrl(String),
}
