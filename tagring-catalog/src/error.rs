#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("content write failed: {0}")]
    Content(#[from] std::io::Error),
    #[error("unknown user id {0}")]
    UnknownUser(u64),
}
