use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use directories::ProjectDirs;
use log::debug;
use rusqlite::{params, Connection};

use crate::api::models::{Contact, Group, GroupId};
use crate::error::Result;

fn db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "CipherChat")?;
    Some(proj.data_dir().join("cache.sqlite"))
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS contacts (
        owner TEXT NOT NULL,
        contact TEXT NOT NULL,
        name TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (owner, contact)
    );
    CREATE TABLE IF NOT EXISTS chat_groups (
        owner TEXT NOT NULL,
        id TEXT NOT NULL,
        name TEXT NOT NULL,
        admin TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (owner, id)
    );
"#;

/// Last-seen contact and group lists per user, so the contact list can show
/// something before the network answers. Each refetch replaces the owner's
/// snapshot.
pub struct Cache {
    conn: Connection,
}

impl Cache {
    pub fn open_default() -> Result<Self> {
        let path = db_path().ok_or_else(|| rusqlite::Error::InvalidPath("no data dir".into()))?;
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("cache at {} (journal {mode})", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn replace_contacts(&mut self, owner: &str, contacts: &[Contact]) -> Result<()> {
        let now = Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM contacts WHERE owner = ?1", params![owner])?;
        for c in contacts {
            tx.execute(
                r#"
                INSERT INTO contacts (owner, contact, name, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(owner, contact) DO UPDATE SET
                    name=excluded.name,
                    updated_at=excluded.updated_at
                "#,
                params![owner, c.contact, c.name, now],
            )?;
        }
        tx.commit()?;
        debug!("cached {} contacts for {owner}", contacts.len());
        Ok(())
    }

    pub fn contacts(&self, owner: &str) -> Result<Vec<Contact>> {
        let mut stmt = self
            .conn
            .prepare("SELECT contact, name FROM contacts WHERE owner = ?1 ORDER BY name ASC, contact ASC")?;
        let rows = stmt.query_map(params![owner], |row| {
            Ok(Contact {
                owner: Some(owner.to_string()),
                contact: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn replace_groups(&mut self, owner: &str, groups: &[Group]) -> Result<()> {
        let now = Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM chat_groups WHERE owner = ?1", params![owner])?;
        for g in groups {
            tx.execute(
                r#"
                INSERT INTO chat_groups (owner, id, name, admin, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(owner, id) DO UPDATE SET
                    name=excluded.name,
                    admin=excluded.admin,
                    updated_at=excluded.updated_at
                "#,
                params![owner, g.id.as_str(), g.name, g.admin, now],
            )?;
        }
        tx.commit()?;
        debug!("cached {} groups for {owner}", groups.len());
        Ok(())
    }

    pub fn groups(&self, owner: &str) -> Result<Vec<Group>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, admin FROM chat_groups WHERE owner = ?1 ORDER BY name ASC, id ASC")?;
        let rows = stmt.query_map(params![owner], |row| {
            Ok(Group {
                id: GroupId::new(row.get::<_, String>(0)?),
                name: row.get(1)?,
                admin: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: &str, name: &str) -> Contact {
        Contact { owner: None, contact: id.into(), name: name.into() }
    }

    #[test]
    fn contact_snapshots_replace_per_owner() {
        let mut cache = Cache::open_in_memory().unwrap();
        cache.replace_contacts("me", &[contact("b", "Bob"), contact("a", "Alice")]).unwrap();
        cache.replace_contacts("other", &[contact("z", "Zed")]).unwrap();
        let names: Vec<String> = cache.contacts("me").unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);

        cache.replace_contacts("me", &[contact("c", "Carol")]).unwrap();
        assert_eq!(cache.contacts("me").unwrap().len(), 1);
        assert_eq!(cache.contacts("other").unwrap().len(), 1);
    }

    #[test]
    fn groups_round_trip() {
        let mut cache = Cache::open_in_memory().unwrap();
        let g = Group { id: GroupId::from(3), name: "Team".into(), admin: "me".into() };
        cache.replace_groups("me", &[g.clone()]).unwrap();
        assert_eq!(cache.groups("me").unwrap(), vec![g]);
    }

    #[test]
    fn opens_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("cache.sqlite");
        let mut cache = Cache::open_at(&path).unwrap();
        cache.replace_contacts("me", &[contact("a", "A")]).unwrap();
        drop(cache);
        assert_eq!(Cache::open_at(&path).unwrap().contacts("me").unwrap().len(), 1);
    }
}
