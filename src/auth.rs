use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::SchedulingError;
use crate::model::{Identity, Role};

/// User lookup and token authentication, owned by an external service.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn authenticate(&self, token: &str) -> Option<Identity>;
    async fn identity(&self, user_id: Ulid) -> Option<Identity>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: Ulid,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub token: Option<String>,
}

/// In-memory directory, optionally loaded from a JSON users file.
#[derive(Default)]
pub struct StaticDirectory {
    users: DashMap<Ulid, Identity>,
    tokens: DashMap<String, Ulid>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let records: Vec<UserRecord> = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let dir = Self::new();
        for r in records {
            dir.insert(r);
        }
        Ok(dir)
    }

    pub fn insert(&self, record: UserRecord) {
        if let Some(token) = record.token {
            self.tokens.insert(token, record.id);
        }
        self.users.insert(
            record.id,
            Identity {
                id: record.id,
                name: record.name,
                role: record.role,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn authenticate(&self, token: &str) -> Option<Identity> {
        let id = *self.tokens.get(token)?;
        self.users.get(&id).map(|u| u.clone())
    }

    async fn identity(&self, user_id: Ulid) -> Option<Identity> {
        self.users.get(&user_id).map(|u| u.clone())
    }
}

// ── Role checks ──────────────────────────────────────────────────

pub fn require_staff(actor: &Identity) -> Result<(), SchedulingError> {
    if actor.role.is_staff() {
        Ok(())
    } else {
        Err(SchedulingError::Authorization("admin or manager role required"))
    }
}

/// Staff, or the user the resource belongs to.
pub fn require_self_or_staff(actor: &Identity, owner: Ulid) -> Result<(), SchedulingError> {
    if actor.role.is_staff() || actor.id == owner {
        Ok(())
    } else {
        Err(SchedulingError::Authorization("not the owner of this resource"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(role: Role, token: Option<&str>) -> UserRecord {
        UserRecord {
            id: Ulid::new(),
            name: "Ana".into(),
            role,
            token: token.map(Into::into),
        }
    }

    #[tokio::test]
    async fn token_resolves_identity() {
        let dir = StaticDirectory::new();
        let r = record(Role::Teacher, Some("t-123"));
        let id = r.id;
        dir.insert(r);

        let who = dir.authenticate("t-123").await.unwrap();
        assert_eq!(who.id, id);
        assert_eq!(who.role, Role::Teacher);
        assert!(dir.authenticate("nope").await.is_none());
        assert_eq!(dir.identity(id).await.unwrap().name, "Ana");
    }

    #[test]
    fn users_file_parses() {
        let path = std::env::temp_dir().join("classbook_users_test.json");
        let id = Ulid::new();
        std::fs::write(
            &path,
            format!(r#"[{{"id":"{id}","name":"Bia","role":"manager","token":"m"}},{{"id":"{}","name":"Caio","role":"student"}}]"#, Ulid::new()),
        )
        .unwrap();
        let dir = StaticDirectory::load(&path).unwrap();
        assert_eq!(dir.len(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn role_gates() {
        let admin = Identity { id: Ulid::new(), name: "a".into(), role: Role::Admin };
        let student = Identity { id: Ulid::new(), name: "s".into(), role: Role::Student };
        assert!(require_staff(&admin).is_ok());
        assert!(require_staff(&student).is_err());
        assert!(require_self_or_staff(&student, student.id).is_ok());
        assert!(require_self_or_staff(&student, Ulid::new()).is_err());
        assert!(require_self_or_staff(&admin, Ulid::new()).is_ok());
    }
}
