//! SQLite storage layer for devconnect.
//!
//! Stands in for the hosted relational database: schema creation and CRUD for
//! users, profiles, follows, posts, questions, tags, likes, notifications,
//! chats, messages and stories. Nothing here publishes change events; the
//! [`Database`](crate::db::Database) wrapper does that after each write.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub created_at: u64,
}

/// Profile row, 1:1 with a user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfileRow {
    pub user_id: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowRow {
    pub follower_id: String,
    pub following_id: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub content: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRow {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub body: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRow {
    pub id: String,
    pub name: String,
}

/// One like per (post, user).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeRow {
    pub post_id: String,
    pub user_id: String,
    pub created_at: u64,
}

/// Kind of event a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    Comment,
    Follow,
    Mention,
    Other,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Like => "like",
            NotificationType::Comment => "comment",
            NotificationType::Follow => "follow",
            NotificationType::Mention => "mention",
            NotificationType::Other => "other",
        }
    }

    /// Unknown values map to `Other` rather than failing the whole row.
    pub fn from_db(value: &str) -> Self {
        match value {
            "like" => NotificationType::Like,
            "comment" => NotificationType::Comment,
            "follow" => NotificationType::Follow,
            "mention" => NotificationType::Mention,
            _ => NotificationType::Other,
        }
    }
}

/// Notification row stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: i64,
    pub recipient_id: String,
    pub actor_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub entity_id: Option<String>,
    /// "post", "question", "comment", "user", ...
    pub entity_kind: Option<String>,
    pub message: String,
    pub read: bool,
    pub created_at: u64,
}

/// Result of marking a single notification read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkRead {
    Marked,
    AlreadyRead,
    NotFound,
}

/// Per-user email preferences. A missing row means everything is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettingsRow {
    pub user_id: String,
    pub email_enabled: bool,
    pub likes: bool,
    pub comments: bool,
    pub follows: bool,
    pub mentions: bool,
}

impl NotificationSettingsRow {
    pub fn enabled_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            email_enabled: true,
            likes: true,
            comments: true,
            follows: true,
            mentions: true,
        }
    }

    /// Whether an email should go out for this notification type.
    /// `Other` has no per-type switch and follows the global toggle only.
    pub fn allows(&self, notification_type: NotificationType) -> bool {
        if !self.email_enabled {
            return false;
        }
        match notification_type {
            NotificationType::Like => self.likes,
            NotificationType::Comment => self.comments,
            NotificationType::Follow => self.follows,
            NotificationType::Mention => self.mentions,
            NotificationType::Other => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRow {
    pub id: String,
    pub user_id: String,
    pub media_url: String,
    pub caption: Option<String>,
    pub created_at: u64,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryViewRow {
    pub story_id: String,
    pub user_id: String,
    pub viewed_at: u64,
}

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        actor_id: row.get(2)?,
        notification_type: NotificationType::from_db(&row.get::<_, String>(3)?),
        entity_id: row.get(4)?,
        entity_kind: row.get(5)?,
        message: row.get(6)?,
        read: row.get::<_, i32>(7)? != 0,
        created_at: row.get::<_, i64>(8)? as u64,
    })
}

fn story_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoryRow> {
    Ok(StoryRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        media_url: row.get(2)?,
        caption: row.get(3)?,
        created_at: row.get::<_, i64>(4)? as u64,
        expires_at: row.get::<_, i64>(5)? as u64,
    })
}

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, actor_id, type, entity_id, entity_kind, message, read, created_at";

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

/// Main storage handle wrapping a SQLite connection.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create a database at the given path. Creates schema if needed.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Raw SQL for tests that need to break the schema.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                email       TEXT,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS profiles (
                user_id         TEXT PRIMARY KEY REFERENCES users(id),
                display_name    TEXT,
                bio             TEXT,
                avatar_url      TEXT,
                updated_at      INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS follows (
                follower_id     TEXT NOT NULL,
                following_id    TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                PRIMARY KEY (follower_id, following_id)
            );

            CREATE TABLE IF NOT EXISTS posts (
                id          TEXT PRIMARY KEY,
                author_id   TEXT NOT NULL,
                title       TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_posts_created ON posts(created_at);

            CREATE TABLE IF NOT EXISTS questions (
                id          TEXT PRIMARY KEY,
                author_id   TEXT NOT NULL,
                title       TEXT NOT NULL,
                body        TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tags (
                id      TEXT PRIMARY KEY,
                name    TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS likes (
                post_id     TEXT NOT NULL REFERENCES posts(id),
                user_id     TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (post_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_id    TEXT NOT NULL,
                actor_id        TEXT NOT NULL,
                type            TEXT NOT NULL,
                entity_id       TEXT,
                entity_kind     TEXT,
                message         TEXT NOT NULL,
                read            INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_recipient
                ON notifications(recipient_id, read, created_at);

            CREATE TABLE IF NOT EXISTS notification_settings (
                user_id         TEXT PRIMARY KEY,
                email_enabled   INTEGER NOT NULL DEFAULT 1,
                likes           INTEGER NOT NULL DEFAULT 1,
                comments        INTEGER NOT NULL DEFAULT 1,
                follows         INTEGER NOT NULL DEFAULT 1,
                mentions        INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS chats (
                id          TEXT PRIMARY KEY,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_members (
                chat_id     TEXT NOT NULL REFERENCES chats(id),
                user_id     TEXT NOT NULL,
                PRIMARY KEY (chat_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id          TEXT PRIMARY KEY,
                chat_id     TEXT NOT NULL REFERENCES chats(id),
                sender_id   TEXT NOT NULL,
                content     TEXT NOT NULL,
                is_read     INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat
                ON messages(chat_id, is_read);

            CREATE TABLE IF NOT EXISTS stories (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                media_url   TEXT NOT NULL,
                caption     TEXT,
                created_at  INTEGER NOT NULL,
                expires_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_stories_expiry ON stories(expires_at);

            CREATE TABLE IF NOT EXISTS story_views (
                story_id    TEXT NOT NULL REFERENCES stories(id),
                user_id     TEXT NOT NULL,
                viewed_at   INTEGER NOT NULL,
                PRIMARY KEY (story_id, user_id)
            );
            ",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub fn insert_user(&self, row: &UserRow) -> Result<(), StorageError> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO users (id, username, email, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![row.id, row.username, row.email, row.created_at as i64],
        )?;
        if affected == 0 {
            return Err(StorageError::AlreadyExists(format!("user {}", row.username)));
        }
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, username, email, created_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        created_at: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Case-insensitive username substring match, alphabetical.
    pub fn search_users(&self, query: &str, limit: u32) -> Result<Vec<UserRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, username, email, created_at FROM users
             WHERE instr(lower(username), lower(?1)) > 0
             ORDER BY username ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                created_at: row.get::<_, i64>(3)? as u64,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Profiles
    // -----------------------------------------------------------------------

    /// Insert or update a profile. Returns true if the row was newly created.
    pub fn upsert_profile(&self, row: &ProfileRow) -> Result<bool, StorageError> {
        let existed = self.get_profile(&row.user_id)?.is_some();
        self.conn.execute(
            "INSERT OR REPLACE INTO profiles
             (user_id, display_name, bio, avatar_url, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.user_id,
                row.display_name,
                row.bio,
                row.avatar_url,
                row.updated_at as i64,
            ],
        )?;
        Ok(!existed)
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, display_name, bio, avatar_url, updated_at
                 FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(ProfileRow {
                        user_id: row.get(0)?,
                        display_name: row.get(1)?,
                        bio: row.get(2)?,
                        avatar_url: row.get(3)?,
                        updated_at: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Follows
    // -----------------------------------------------------------------------

    /// Returns false if the follow already existed.
    pub fn insert_follow(&self, row: &FollowRow) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO follows (follower_id, following_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![row.follower_id, row.following_id, row.created_at as i64],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_follow(&self, follower_id: &str, following_id: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
            params![follower_id, following_id],
        )?;
        Ok(affected > 0)
    }

    pub fn count_followers(&self, user_id: &str) -> Result<u32, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE following_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    // -----------------------------------------------------------------------
    // Posts, questions, tags
    // -----------------------------------------------------------------------

    pub fn insert_post(&self, row: &PostRow) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO posts (id, author_id, title, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id,
                row.author_id,
                row.title,
                row.content,
                row.created_at as i64
            ],
        )?;
        Ok(())
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, author_id, title, content, created_at FROM posts WHERE id = ?1",
                params![id],
                |row| {
                    Ok(PostRow {
                        id: row.get(0)?,
                        author_id: row.get(1)?,
                        title: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Posts whose title or content contains `query`, newest first.
    pub fn search_posts(&self, query: &str, limit: u32) -> Result<Vec<PostRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, author_id, title, content, created_at FROM posts
             WHERE instr(lower(title), lower(?1)) > 0
                OR instr(lower(content), lower(?1)) > 0
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok(PostRow {
                id: row.get(0)?,
                author_id: row.get(1)?,
                title: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get::<_, i64>(4)? as u64,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn insert_question(&self, row: &QuestionRow) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO questions (id, author_id, title, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id,
                row.author_id,
                row.title,
                row.body,
                row.created_at as i64
            ],
        )?;
        Ok(())
    }

    pub fn search_questions(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<QuestionRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, author_id, title, body, created_at FROM questions
             WHERE instr(lower(title), lower(?1)) > 0
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok(QuestionRow {
                id: row.get(0)?,
                author_id: row.get(1)?,
                title: row.get(2)?,
                body: row.get(3)?,
                created_at: row.get::<_, i64>(4)? as u64,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn insert_tag(&self, row: &TagRow) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tags (id, name) VALUES (?1, ?2)",
            params![row.id, row.name],
        )?;
        Ok(())
    }

    pub fn search_tags(&self, query: &str, limit: u32) -> Result<Vec<TagRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name FROM tags
             WHERE instr(lower(name), lower(?1)) > 0
             ORDER BY name ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok(TagRow {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Likes
    // -----------------------------------------------------------------------

    pub fn has_like(&self, post_id: &str, user_id: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_like(&self, row: &LikeRow) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO likes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![row.post_id, row.user_id, row.created_at as i64],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_like(&self, post_id: &str, user_id: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, user_id],
        )?;
        Ok(affected > 0)
    }

    pub fn count_likes(&self, post_id: &str) -> Result<u32, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM likes WHERE post_id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Insert a notification. The `id` field of `row` is ignored; the new
    /// row id is returned.
    pub fn insert_notification(&self, row: &NotificationRow) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO notifications
             (recipient_id, actor_id, type, entity_id, entity_kind, message, read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.recipient_id,
                row.actor_id,
                row.notification_type.as_str(),
                row.entity_id,
                row.entity_kind,
                row.message,
                row.read as i32,
                row.created_at as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<NotificationRow>, StorageError> {
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], notification_from_row)
            .optional()?;
        Ok(row)
    }

    /// List a recipient's notifications, newest first.
    pub fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<NotificationRow>, StorageError> {
        let filter = if unread_only { " AND read = 0" } else { "" };
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE recipient_id = ?1{filter}
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![recipient_id, limit as i64], notification_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Mark one notification read. Already-read rows are left untouched.
    pub fn mark_notification_read(&self, id: i64) -> Result<MarkRead, StorageError> {
        let affected = self.conn.execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND read = 0",
            params![id],
        )?;
        if affected > 0 {
            return Ok(MarkRead::Marked);
        }
        match self.get_notification(id)? {
            Some(_) => Ok(MarkRead::AlreadyRead),
            None => Ok(MarkRead::NotFound),
        }
    }

    /// Mark every unread notification of a recipient read. Returns the ids
    /// that actually changed.
    pub fn mark_all_notifications_read(
        &self,
        recipient_id: &str,
    ) -> Result<Vec<i64>, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let ids: Vec<i64> = {
            let mut stmt =
                tx.prepare("SELECT id FROM notifications WHERE recipient_id = ?1 AND read = 0")?;
            let rows = stmt.query_map(params![recipient_id], |row| row.get(0))?;
            let mut ids = Vec::new();
            for id in rows {
                ids.push(id?);
            }
            ids
        };
        tx.execute(
            "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
            params![recipient_id],
        )?;
        tx.commit()?;
        Ok(ids)
    }

    pub fn count_unread_notifications(&self, recipient_id: &str) -> Result<u32, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND read = 0",
            params![recipient_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    pub fn upsert_notification_settings(
        &self,
        row: &NotificationSettingsRow,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO notification_settings
             (user_id, email_enabled, likes, comments, follows, mentions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.user_id,
                row.email_enabled as i32,
                row.likes as i32,
                row.comments as i32,
                row.follows as i32,
                row.mentions as i32,
            ],
        )?;
        Ok(())
    }

    pub fn get_notification_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationSettingsRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, email_enabled, likes, comments, follows, mentions
                 FROM notification_settings WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(NotificationSettingsRow {
                        user_id: row.get(0)?,
                        email_enabled: row.get::<_, i32>(1)? != 0,
                        likes: row.get::<_, i32>(2)? != 0,
                        comments: row.get::<_, i32>(3)? != 0,
                        follows: row.get::<_, i32>(4)? != 0,
                        mentions: row.get::<_, i32>(5)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Chats and messages
    // -----------------------------------------------------------------------

    pub fn insert_chat(
        &self,
        chat_id: &str,
        member_ids: &[String],
        created_at: u64,
    ) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO chats (id, created_at) VALUES (?1, ?2)",
            params![chat_id, created_at as i64],
        )?;
        for member in member_ids {
            tx.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
                params![chat_id, member],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_chat_members(&self, chat_id: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM chat_members WHERE chat_id = ?1 ORDER BY user_id")?;
        let rows = stmt.query_map(params![chat_id], |row| row.get(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn insert_message(&self, row: &MessageRow) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id,
                row.chat_id,
                row.sender_id,
                row.content,
                row.is_read as i32,
                row.created_at as i64,
            ],
        )?;
        Ok(())
    }

    /// Mark every message in a chat that `user_id` did not send as read.
    /// Returns the rows that changed, as they are after the update.
    pub fn mark_chat_read(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> Result<Vec<MessageRow>, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let rows: Vec<MessageRow> = {
            let mut stmt = tx.prepare(
                "SELECT id, chat_id, sender_id, content, created_at FROM messages
                 WHERE chat_id = ?1 AND sender_id != ?2 AND is_read = 0
                 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![chat_id, user_id], |row| {
                Ok(MessageRow {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    content: row.get(3)?,
                    is_read: true,
                    created_at: row.get::<_, i64>(4)? as u64,
                })
            })?;
            let mut result = Vec::new();
            for row in rows {
                result.push(row?);
            }
            result
        };
        tx.execute(
            "UPDATE messages SET is_read = 1
             WHERE chat_id = ?1 AND sender_id != ?2 AND is_read = 0",
            params![chat_id, user_id],
        )?;
        tx.commit()?;
        Ok(rows)
    }

    /// Messages in the user's chats, not sent by the user, not yet read.
    pub fn count_unread_messages(&self, user_id: &str) -> Result<u32, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages m
             JOIN chat_members cm ON cm.chat_id = m.chat_id AND cm.user_id = ?1
             WHERE m.sender_id != ?1 AND m.is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    // -----------------------------------------------------------------------
    // Stories
    // -----------------------------------------------------------------------

    pub fn insert_story(&self, row: &StoryRow) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO stories (id, user_id, media_url, caption, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id,
                row.user_id,
                row.media_url,
                row.caption,
                row.created_at as i64,
                row.expires_at as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_story(&self, id: &str) -> Result<Option<StoryRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, user_id, media_url, caption, created_at, expires_at
                 FROM stories WHERE id = ?1",
                params![id],
                story_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Stories that have not expired at `now`, newest first.
    pub fn list_active_stories(&self, now: u64) -> Result<Vec<StoryRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, media_url, caption, created_at, expires_at
             FROM stories WHERE expires_at > ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![now as i64], story_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Returns false if the viewer had already seen the story.
    pub fn insert_story_view(&self, row: &StoryViewRow) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO story_views (story_id, user_id, viewed_at)
             VALUES (?1, ?2, ?3)",
            params![row.story_id, row.user_id, row.viewed_at as i64],
        )?;
        Ok(affected > 0)
    }

    pub fn list_viewed_story_ids(&self, viewer_id: &str) -> Result<HashSet<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT story_id FROM story_views WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![viewer_id], |row| row.get(0))?;
        let mut result = HashSet::new();
        for row in rows {
            result.insert(row?);
        }
        Ok(result)
    }
}

/// Default database path inside a data directory.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("devconnect.db")
}
