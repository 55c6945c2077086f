use crate::content::ContentStore;
use crate::error::CatalogError;
use crate::models::{FileDescriptor, FileRow, TagKey, TagRow, UserRow};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// The local catalog collaborator: files, their tags, and users, each with
/// the `created_at`/`updated_at`/`deleted` discipline the replication layer
/// relies on (spec.md §3, §4.8). This is intentionally not a SQL engine —
/// the core only needs "list rows with `updated_at >= t`", "upsert by
/// primary key preferring the larger `updated_at`", and "soft-delete".
pub struct Catalog {
    files: DashMap<u64, FileRow>,
    next_file_id: AtomicU64,
    tags: DashMap<TagKey, TagRow>,
    users: DashMap<u64, UserRow>,
    next_user_id: AtomicU64,
    users_by_name: DashMap<String, u64>,
    content: ContentStore,
}

impl Catalog {
    pub fn new(content_path: impl Into<std::path::PathBuf>) -> std::io::Result<Catalog> {
        Ok(Catalog {
            files: DashMap::new(),
            next_file_id: AtomicU64::new(1),
            tags: DashMap::new(),
            users: DashMap::new(),
            next_user_id: AtomicU64::new(1),
            users_by_name: DashMap::new(),
            content: ContentStore::new(content_path)?,
        })
    }

    // ---- client-facing catalog operations (spec.md §6) ----------------

    /// `Create/add`: writes the blob first, then the catalog rows, so a
    /// failed blob write never leaves a dangling file row (spec.md §4.8:
    /// "A failed blob write rolls back the catalog insert").
    #[allow(clippy::too_many_arguments)]
    pub fn add_file(
        &self,
        name: &str,
        file_type: &str,
        size: u64,
        user_id: u64,
        content: &[u8],
        tags: &[String],
        now: i64,
    ) -> Result<FileDescriptor, CatalogError> {
        self.content.write(name, file_type, content)?;
        let id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        let row = FileRow { id, name: name.to_string(), file_type: file_type.to_string(), size, user_id, created_at: now, updated_at: now, deleted: false };
        self.files.insert(id, row.clone());
        for tag in tags {
            self.tags.insert(
                TagKey { file_id: id, tag: tag.clone() },
                TagRow { file_id: id, tag: tag.clone(), updated_at: now, deleted: false },
            );
        }
        Ok(self.describe(&row))
    }

    pub fn list_files(&self, tag_query: &[String]) -> Vec<FileDescriptor> {
        self.files
            .iter()
            .filter(|entry| !entry.deleted && self.matches_query(entry.id, tag_query))
            .map(|entry| self.describe(&entry))
            .collect()
    }

    /// `Delete/delete`: soft-deletes every non-deleted file matching the
    /// tag query (AND semantics, spec.md §6).
    pub fn delete_by_query(&self, tag_query: &[String], now: i64) -> usize {
        let ids: Vec<u64> = self
            .files
            .iter()
            .filter(|entry| !entry.deleted && self.matches_query(entry.id, tag_query))
            .map(|entry| entry.id)
            .collect();
        for id in &ids {
            if let Some(mut row) = self.files.get_mut(id) {
                row.deleted = true;
                row.updated_at = now;
            }
        }
        ids.len()
    }

    pub fn add_tags(&self, tag_query: &[String], tags: &[String], now: i64) -> usize {
        let ids: Vec<u64> = self
            .files
            .iter()
            .filter(|entry| !entry.deleted && self.matches_query(entry.id, tag_query))
            .map(|entry| entry.id)
            .collect();
        for id in &ids {
            for tag in tags {
                let key = TagKey { file_id: *id, tag: tag.clone() };
                self.tags
                    .entry(key)
                    .and_modify(|row| {
                        row.deleted = false;
                        row.updated_at = now;
                    })
                    .or_insert_with(|| TagRow { file_id: *id, tag: tag.clone(), updated_at: now, deleted: false });
            }
        }
        ids.len()
    }

    pub fn delete_tags(&self, tag_query: &[String], tags: &[String], now: i64) -> usize {
        let ids: Vec<u64> = self
            .files
            .iter()
            .filter(|entry| !entry.deleted && self.matches_query(entry.id, tag_query))
            .map(|entry| entry.id)
            .collect();
        for id in &ids {
            for tag in tags {
                let key = TagKey { file_id: *id, tag: tag.clone() };
                if let Some(mut row) = self.tags.get_mut(&key) {
                    row.deleted = true;
                    row.updated_at = now;
                }
            }
        }
        ids.len()
    }

    pub fn get_or_create_user_id(&self, user_name: &str, now: i64) -> u64 {
        if let Some(id) = self.users_by_name.get(user_name) {
            return *id;
        }
        let id = self.next_user_id.fetch_add(1, Ordering::SeqCst);
        self.users.insert(id, UserRow { id, name: user_name.to_string(), created_at: now, updated_at: now });
        self.users_by_name.insert(user_name.to_string(), id);
        id
    }

    // ---- replication surface (spec.md §4.8) ----------------------------

    pub fn files_since(&self, since: i64) -> Vec<FileRow> {
        self.files.iter().filter(|r| r.updated_at >= since).map(|r| r.clone()).collect()
    }

    pub fn tags_since(&self, since: i64) -> Vec<TagRow> {
        self.tags.iter().filter(|r| r.updated_at >= since).map(|r| r.clone()).collect()
    }

    pub fn users_since(&self, since: i64) -> Vec<UserRow> {
        self.users.iter().filter(|r| r.updated_at >= since).map(|r| r.clone()).collect()
    }

    /// Upsert-by-pk preferring the larger `updated_at`; on an exact tie the
    /// existing row wins, making repeated delivery of the same delta a
    /// no-op (spec.md §8 idempotence law).
    pub fn merge_file(&self, incoming: FileRow) {
        self.files
            .entry(incoming.id)
            .and_modify(|existing| {
                if incoming.updated_at > existing.updated_at {
                    *existing = incoming.clone();
                }
            })
            .or_insert(incoming);
    }

    pub fn merge_tag(&self, incoming: TagRow) {
        let key = TagKey { file_id: incoming.file_id, tag: incoming.tag.clone() };
        self.tags
            .entry(key)
            .and_modify(|existing| {
                if incoming.updated_at > existing.updated_at {
                    *existing = incoming.clone();
                }
            })
            .or_insert(incoming);
    }

    pub fn merge_user(&self, incoming: UserRow) {
        let incoming_id = incoming.id;
        self.users_by_name.entry(incoming.name.clone()).or_insert(incoming.id);
        self.users
            .entry(incoming.id)
            .and_modify(|existing| {
                if incoming.updated_at > existing.updated_at {
                    *existing = incoming.clone();
                }
            })
            .or_insert(incoming);
        if self.next_user_id.load(Ordering::SeqCst) <= incoming_id {
            self.next_user_id.store(incoming_id + 1, Ordering::SeqCst);
        }
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    // ---- helpers ---------------------------------------------------------

    fn matches_query(&self, file_id: u64, tag_query: &[String]) -> bool {
        tag_query.iter().all(|wanted| {
            self.tags
                .get(&TagKey { file_id, tag: wanted.clone() })
                .map(|row| !row.deleted)
                .unwrap_or(false)
        })
    }

    fn describe(&self, row: &FileRow) -> FileDescriptor {
        let mut tags: Vec<String> = self
            .tags
            .iter()
            .filter(|entry| entry.file_id == row.id && !entry.deleted)
            .map(|entry| entry.tag.clone())
            .collect();
        tags.sort();
        FileDescriptor {
            id: row.id,
            name: row.name.clone(),
            file_type: row.file_type.clone(),
            size: row.size,
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            tags,
        }
    }
}
