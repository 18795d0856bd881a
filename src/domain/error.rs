use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("document `{slug}` not found")]
    NotFound { slug: String },
}

impl DomainError {
    pub fn not_found(slug: impl Into<String>) -> Self {
        Self::NotFound { slug: slug.into() }
    }
}
