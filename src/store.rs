//! VeriFlow KYC - Local Verification Store
//!
//! Durable key/value persistence for flow artifacts, scoped to the current
//! authenticated user. Each logical key is written independently (no
//! cross-key transactions), so a crash between two writes can leave partial
//! state - `load_session` treats any missing key as "step not yet complete".
//!
//! Raw key strings never leave this module; callers use typed accessors.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::KycResult;
use crate::session::{IdCardFields, ImageRef, VerificationSession};

// Logical keys (implementation detail of this module)
const KEY_ACTIVE: &str = "active_verification";
const KEY_CONFIRMED: &str = "id_card_confirmed";
const KEY_FRONT: &str = "id_card_front";
const KEY_BACK: &str = "id_card_back";
const KEY_FIELDS: &str = "id_card_fields";
const KEY_SELFIE: &str = "selfie";

/// Local Verification Store - one row per (user, key)
pub struct VerificationStore {
    /// Database connection
    conn: Mutex<Connection>,
    /// Authenticated user this store is scoped to
    user_id: String,
}

impl VerificationStore {
    /// Open (or create) the store under the given directory
    pub fn open(dir: &Path, user_id: &str) -> KycResult<Self> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join("verification.db"))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                user_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (user_id, key)
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            user_id: user_id.to_string(),
        })
    }

    /// In-memory store (tests, throwaway sessions)
    pub fn in_memory(user_id: &str) -> KycResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                user_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (user_id, key)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            user_id: user_id.to_string(),
        })
    }

    fn get(&self, key: &str) -> KycResult<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE user_id = ?1 AND key = ?2",
                params![self.user_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> KycResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO kv (user_id, key, value) VALUES (?1, ?2, ?3)",
            params![self.user_id, key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> KycResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM kv WHERE user_id = ?1 AND key = ?2",
            params![self.user_id, key],
        )?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TYPED ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn active_flag(&self) -> KycResult<bool> {
        Ok(self.get(KEY_ACTIVE)?.as_deref() == Some("true"))
    }

    pub fn set_active_flag(&self, active: bool) -> KycResult<()> {
        if active {
            self.set(KEY_ACTIVE, "true")
        } else {
            self.remove(KEY_ACTIVE)
        }
    }

    pub fn id_card_confirmed(&self) -> KycResult<bool> {
        Ok(self.get(KEY_CONFIRMED)?.as_deref() == Some("true"))
    }

    pub fn set_id_card_confirmed(&self, confirmed: bool) -> KycResult<()> {
        if confirmed {
            self.set(KEY_CONFIRMED, "true")
        } else {
            self.remove(KEY_CONFIRMED)
        }
    }

    pub fn set_front_image(&self, image: &ImageRef) -> KycResult<()> {
        self.set(KEY_FRONT, &serde_json::to_string(image)?)
    }

    pub fn set_back_image(&self, image: &ImageRef) -> KycResult<()> {
        self.set(KEY_BACK, &serde_json::to_string(image)?)
    }

    pub fn set_selfie(&self, image: &ImageRef) -> KycResult<()> {
        self.set(KEY_SELFIE, &serde_json::to_string(image)?)
    }

    pub fn set_id_card_fields(&self, fields: &IdCardFields) -> KycResult<()> {
        self.set(KEY_FIELDS, &serde_json::to_string(fields)?)
    }

    pub fn id_card_fields(&self) -> KycResult<Option<IdCardFields>> {
        self.get_json(KEY_FIELDS)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> KycResult<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    /// Load the full session. Missing or unreadable keys come back as
    /// `None`/`false` - partial persisted state must resume, not crash.
    pub fn load_session(&self) -> KycResult<VerificationSession> {
        Ok(VerificationSession {
            active: self.active_flag()?,
            id_card_front: self.get_json(KEY_FRONT)?,
            id_card_back: self.get_json(KEY_BACK)?,
            id_card_fields: self.id_card_fields()?,
            id_card_confirmed: self.id_card_confirmed()?,
            selfie: self.get_json(KEY_SELFIE)?,
            face_match: None,
            liveness: None,
        })
    }

    /// Clear the step artifacts after full completion. Remote status is the
    /// source of truth from here on.
    pub fn clear_session(&self) -> KycResult<()> {
        for key in [
            KEY_ACTIVE,
            KEY_CONFIRMED,
            KEY_FRONT,
            KEY_BACK,
            KEY_FIELDS,
            KEY_SELFIE,
        ] {
            self.remove(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_flags_roundtrip() {
        let dir = tempdir().unwrap();
        let store = VerificationStore::open(dir.path(), "user-1").unwrap();

        assert!(!store.active_flag().unwrap());
        store.set_active_flag(true).unwrap();
        assert!(store.active_flag().unwrap());
        store.set_active_flag(false).unwrap();
        assert!(!store.active_flag().unwrap());

        store.set_id_card_confirmed(true).unwrap();
        assert!(store.id_card_confirmed().unwrap());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = VerificationStore::open(dir.path(), "user-1").unwrap();
            store
                .set_front_image(&ImageRef::new("front.jpg".into()))
                .unwrap();
            store.set_id_card_confirmed(true).unwrap();
        }
        let store = VerificationStore::open(dir.path(), "user-1").unwrap();
        let session = store.load_session().unwrap();
        assert!(session.id_card_front.is_some());
        assert!(session.id_card_confirmed);
    }

    #[test]
    fn test_scoped_per_user() {
        let dir = tempdir().unwrap();
        let a = VerificationStore::open(dir.path(), "alice").unwrap();
        a.set_id_card_confirmed(true).unwrap();

        let b = VerificationStore::open(dir.path(), "bob").unwrap();
        assert!(!b.id_card_confirmed().unwrap());
    }

    #[test]
    fn test_partial_state_loads_as_incomplete() {
        let dir = tempdir().unwrap();
        let store = VerificationStore::open(dir.path(), "user-1").unwrap();

        // Simulated crash: front image was written, fields were not
        store
            .set_front_image(&ImageRef::new("front.jpg".into()))
            .unwrap();

        let session = store.load_session().unwrap();
        assert!(session.id_card_front.is_some());
        assert!(session.id_card_fields.is_none());
        assert!(!session.front_complete());
    }

    #[test]
    fn test_clear_session() {
        let dir = tempdir().unwrap();
        let store = VerificationStore::open(dir.path(), "user-1").unwrap();
        store.set_active_flag(true).unwrap();
        store.set_id_card_confirmed(true).unwrap();
        store
            .set_front_image(&ImageRef::new("front.jpg".into()))
            .unwrap();

        store.clear_session().unwrap();
        let session = store.load_session().unwrap();
        assert!(!session.active);
        assert!(!session.id_card_confirmed);
        assert!(session.id_card_front.is_none());
    }
}
