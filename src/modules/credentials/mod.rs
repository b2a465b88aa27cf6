//! Persistence of the session cookie jar.
//!
//! A run that has already passed the login handshake leaves its cookies on
//! disk so the next run can skip it. Loading never fails: a missing or
//! unreadable file is the normal first-run case and simply yields an empty jar.
//!
//! The file holds the JSON array written by `cookie_store`. Session cookies
//! are kept, since the campus session itself is one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cookie_store::CookieStore;
use cookie_store::serde::json;
use thiserror::Error;

/// Default location used by [`CredentialStore::default`].
pub const DEFAULT_CREDENTIALS_PATH: &str = "./credentials.json";

#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("failed to serialise cookie jar: {0}")]
    Serialize(String),
    #[error("failed to write credentials to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// JSON file backed cookie jar storage.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored jar, dropping expired cookies. Missing or corrupt
    /// files produce an empty jar.
    pub fn load(&self) -> CookieStore {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::warn!(
                    "no stored credentials at {}, starting with an empty cookie jar",
                    self.path.display()
                );
                return CookieStore::default();
            }
            Err(err) => {
                log::warn!(
                    "could not read credentials at {}: {err}; starting with an empty cookie jar",
                    self.path.display()
                );
                return CookieStore::default();
            }
        };

        match json::load(raw.as_bytes()) {
            Ok(jar) => {
                log::debug!(
                    "loaded {} cookies from {}",
                    jar.iter_unexpired().count(),
                    self.path.display()
                );
                jar
            }
            Err(err) => {
                log::warn!(
                    "credentials at {} are corrupt ({err}); starting with an empty cookie jar",
                    self.path.display()
                );
                CookieStore::default()
            }
        }
    }

    /// Overwrite the stored jar.
    pub fn save(&self, jar: &CookieStore) -> Result<(), CredentialStoreError> {
        let mut buffer = Vec::new();
        json::save_incl_expired_and_nonpersistent(jar, &mut buffer)
            .map_err(|err| CredentialStoreError::Serialize(err.to_string()))?;
        fs::write(&self.path, buffer).map_err(|source| CredentialStoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        log::debug!(
            "saved {} cookies to {}",
            jar.iter_unexpired().count(),
            self.path.display()
        );
        Ok(())
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIALS_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request_values(jar: &CookieStore, url: &Url) -> Vec<(String, String)> {
        let mut values: Vec<(String, String)> = jar
            .get_request_values(url)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        values.sort();
        values
    }

    #[test]
    fn missing_file_yields_empty_jar() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load().iter_any().count(), 0);
    }

    #[test]
    fn corrupt_file_yields_empty_jar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(CredentialStore::new(&path).load().iter_any().count(), 0);
    }

    #[test]
    fn round_trip_keeps_session_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));

        let origin = Url::parse("https://campusweb.office.uec.ac.jp/campusweb/ssologin.do").unwrap();
        let mut jar = CookieStore::default();
        jar.parse("JSESSIONID=abc; Path=/campusweb", &origin).unwrap();
        jar.parse("_shibsession=xyz; Domain=uec.ac.jp; Path=/; Secure", &origin)
            .unwrap();
        jar.parse("remember=1; Path=/; Max-Age=3600", &origin).unwrap();

        store.save(&jar).unwrap();
        let restored = store.load();

        let target = Url::parse("https://campusweb.office.uec.ac.jp/campusweb/campussquare.do").unwrap();
        let values = request_values(&restored, &target);
        assert_eq!(values, request_values(&jar, &target));
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn save_overwrites_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let origin = Url::parse("https://host.example/").unwrap();

        let mut first = CookieStore::default();
        first.parse("a=1", &origin).unwrap();
        store.save(&first).unwrap();

        let mut second = CookieStore::default();
        second.parse("b=2", &origin).unwrap();
        store.save(&second).unwrap();

        assert_eq!(
            request_values(&store.load(), &origin),
            vec![("b".to_string(), "2".to_string())]
        );
    }
}
