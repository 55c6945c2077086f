use serde::{Deserialize, Serialize};

/// Mirrors the original `files` table: primary key, a handful of scalar
/// fields, and the `created_at`/`updated_at`/`deleted` triple the
/// replication contract (spec.md §3) requires of every catalog row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FileRow {
    pub id: u64,
    pub name: String,
    pub file_type: String,
    pub size: u64,
    pub user_id: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted: bool,
}

/// Mirrors the `file_tags` association table: one row per (file, tag) pair.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TagKey {
    pub file_id: u64,
    pub tag: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TagRow {
    pub file_id: u64,
    pub tag: String,
    pub updated_at: i64,
    pub deleted: bool,
}

/// Mirrors the `users` table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserRow {
    pub id: u64,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A file as returned to clients: row plus its current (non-deleted) tag set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FileDescriptor {
    pub id: u64,
    pub name: String,
    pub file_type: String,
    pub size: u64,
    pub user_id: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub tags: Vec<String>,
}
