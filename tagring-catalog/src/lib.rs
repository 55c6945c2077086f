mod catalog;
mod content;
mod error;
mod models;

pub use catalog::Catalog;
pub use content::ContentStore;
pub use error::CatalogError;
pub use models::{FileDescriptor, FileRow, TagKey, TagRow, UserRow};
