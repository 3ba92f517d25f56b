//! Session persistence
//!
//! The connector never touches ambient storage. It reads the session once at
//! construction and writes it on every transition through an injected
//! [`SessionStore`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::Session;

pub const SESSION_FILE: &str = "walletconnect.json";
pub const MOBILE_LINK_CHOICE_FILE: &str = "walletconnect-deeplink-choice.json";

/// Wallet app the user picked last time, used for deep link redirects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MobileLinkChoice {
    pub name: String,
    pub href: String,
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<Session>;

    fn save(&self, session: &Session) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn load_link_choice(&self) -> Option<MobileLinkChoice> {
        None
    }

    fn save_link_choice(&self, _choice: &MobileLinkChoice) -> Result<()> {
        Ok(())
    }

    fn clear_link_choice(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    session: Mutex<Option<Session>>,
    link_choice: Mutex<Option<MobileLinkChoice>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
            ..Default::default()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Option<Session> {
        lock(&self.session).clone()
    }

    fn save(&self, session: &Session) -> Result<()> {
        *lock(&self.session) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *lock(&self.session) = None;
        Ok(())
    }

    fn load_link_choice(&self) -> Option<MobileLinkChoice> {
        lock(&self.link_choice).clone()
    }

    fn save_link_choice(&self, choice: &MobileLinkChoice) -> Result<()> {
        *lock(&self.link_choice) = Some(choice.clone());
        Ok(())
    }

    fn clear_link_choice(&self) -> Result<()> {
        *lock(&self.link_choice) = None;
        Ok(())
    }
}

/// Keeps each record as a JSON file inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.dir.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("failed to read {path:?}: {e}");
                return None;
            }
        };
        serde_json::from_str(&content)
            .inspect_err(|e| log::warn!("ignoring malformed {path:?}: {e}"))
            .ok()
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(value)?;
        fs::write(self.dir.join(name), content)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.dir.join(name)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Option<Session> {
        self.read(SESSION_FILE)
    }

    fn save(&self, session: &Session) -> Result<()> {
        self.write(SESSION_FILE, session)
    }

    fn clear(&self) -> Result<()> {
        self.remove(SESSION_FILE)
    }

    fn load_link_choice(&self) -> Option<MobileLinkChoice> {
        self.read(MOBILE_LINK_CHOICE_FILE)
    }

    fn save_link_choice(&self, choice: &MobileLinkChoice) -> Result<()> {
        self.write(MOBILE_LINK_CHOICE_FILE, choice)
    }

    fn clear_link_choice(&self) -> Result<()> {
        self.remove(MOBILE_LINK_CHOICE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("https://bridge.example", "client".to_string(), None)
    }

    fn choice() -> MobileLinkChoice {
        MobileLinkChoice {
            name: "Wallet".to_string(),
            href: "wallet://".to_string(),
        }
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.load().is_none());

        store.save(&session()).unwrap();
        assert_eq!(store.load(), Some(session()));
        store.clear().unwrap();
        assert!(store.load().is_none());

        store.save_link_choice(&choice()).unwrap();
        assert_eq!(store.load_link_choice(), Some(choice()));
        store.clear_link_choice().unwrap();
        assert!(store.load_link_choice().is_none());
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        assert!(store.load().is_none());
        store.clear().unwrap();

        store.save(&session()).unwrap();
        store.save_link_choice(&choice()).unwrap();

        // a fresh handle sees what the first one wrote
        let reopened = FileStore::new(store.dir());
        assert_eq!(reopened.load(), Some(session()));
        assert_eq!(reopened.load_link_choice(), Some(choice()));

        reopened.clear().unwrap();
        assert!(store.load().is_none());
        assert_eq!(store.load_link_choice(), Some(choice()));
    }

    #[test]
    fn test_file_store_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SESSION_FILE), "not json").unwrap();
        assert!(FileStore::new(dir.path()).load().is_none());
    }
}
