use thiserror::Error;

pub type FieldMapResult<T> = Result<T, FieldMapError>;

#[derive(Debug, Error)]
pub enum FieldMapError {
    #[error("invalid field mapping: {0}")]
    Validation(String),

    /// Schema fetch failed for a reason other than permissions or absence.
    #[error("schema fetch failed: {0}")]
    Upstream(#[from] esg_airtable::AirtableError),
}
