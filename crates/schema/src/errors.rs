use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("stream_id must not be empty")]
    EmptyStreamId,

    #[error("source_uri must not be empty")]
    EmptySourceUri,

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        assert_eq!(
            SchemaError::EmptyStreamId.to_string(),
            "stream_id must not be empty"
        );
        assert_eq!(
            SchemaError::EmptySourceUri.to_string(),
            "source_uri must not be empty"
        );
    }

    #[test]
    fn test_error_conversion_from_json_error() {
        let json_err = serde_json::from_str::<u32>("{").unwrap_err();
        let err: SchemaError = json_err.into();
        assert!(matches!(err, SchemaError::Json(_)));
        assert!(err.to_string().starts_with("malformed JSON:"));
    }
}
