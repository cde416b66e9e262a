// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The process-wide registry of open stores.
//!
//! A process is only permitted to have one open handle to each store path:
//! the substrate's writer lock is per-environment, so a second environment
//! over the same files would break write serialization. This manager
//! enforces that constraint: don't open stores directly.

use std::collections::BTreeMap;
use std::fs;
use std::ops::Deref;
use std::path::{
    Path,
    PathBuf,
};
use std::sync::{
    Arc,
    RwLock,
};

use datalith_db::StoreOptions;

use conn::Conn;
use errors::{
    Error,
    Result,
};

lazy_static! {
    static ref MANAGER: RwLock<Stores> = RwLock::new(Stores::new());
}

struct StoreConnection {
    conn: Arc<Conn>,
    path: PathBuf,
}

/// Stores keeps the `Conn` opened for each store path, keyed by the
/// canonicalized path.
pub struct Stores {
    connections: BTreeMap<String, StoreConnection>,
}

/// A handle onto an open store. Cloning shares the underlying connection;
/// the store stays open until `Stores::close` succeeds.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Conn>,
}

impl Store {
    pub fn conn(&self) -> &Arc<Conn> {
        &self.conn
    }
}

impl Deref for Store {
    type Target = Conn;

    fn deref(&self) -> &Conn {
        &*self.conn
    }
}

fn canonical_name(path: &Path) -> Result<(String, PathBuf)> {
    // The store directory is created on open, so it exists by the time we
    // canonicalize.
    fs::create_dir_all(path)
        .and_then(|_| path.canonicalize())
        .map(|canonical| (canonical.to_string_lossy().into_owned(), canonical))
        .map_err(|e| Error::BadStorePath(path.to_path_buf(), e.to_string()))
}

impl Stores {
    fn new() -> Stores {
        Stores {
            connections: Default::default(),
        }
    }

    pub fn singleton() -> &'static RwLock<Stores> {
        &*MANAGER
    }

    /// Open the store at `path`. A second open of the same path in the same
    /// process is an error.
    pub fn open<T>(path: T, options: StoreOptions) -> Result<Store> where T: AsRef<Path> {
        let (name, canonical) = canonical_name(path.as_ref())?;
        let mut manager = Stores::singleton().write().unwrap();
        if manager.connections.contains_key(&name) {
            bail!(Error::StoreAlreadyOpen(name));
        }
        let conn = Arc::new(Conn::open(&canonical, options)?);
        manager.connections.insert(name, StoreConnection {
            conn: conn.clone(),
            path: canonical,
        });
        Ok(Store { conn: conn })
    }

    /// A handle onto an already-open store, or `None`.
    pub fn get<T>(path: T) -> Result<Option<Store>> where T: AsRef<Path> {
        let (name, _) = canonical_name(path.as_ref())?;
        let manager = Stores::singleton().read().unwrap();
        Ok(manager.connections.get(&name).map(|sc| Store { conn: sc.conn.clone() }))
    }

    /// Whether the path is currently open.
    pub fn is_open<T>(path: T) -> bool where T: AsRef<Path> {
        match canonical_name(path.as_ref()) {
            Ok((name, _)) => {
                Stores::singleton().read().unwrap().connections.contains_key(&name)
            },
            Err(_) => false,
        }
    }

    /// Release the store. Fails while other `Store` handles are alive, so a
    /// close cannot invalidate someone else's connection.
    pub fn close<T>(path: T) -> Result<()> where T: AsRef<Path> {
        let (name, _) = canonical_name(path.as_ref())?;
        let mut manager = Stores::singleton().write().unwrap();
        {
            let sc = match manager.connections.get(&name) {
                Some(sc) => sc,
                None => bail!(Error::StoreNotFound(name)),
            };
            // One reference is the registry's own.
            if Arc::strong_count(&sc.conn) > 1 {
                bail!(Error::StoreConnectionStillActive(name));
            }
            debug!("closing store at {:?}", sc.path);
        }
        manager.connections.remove(&name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate tempfile;

    use super::*;

    #[test]
    fn test_double_open_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Stores::open(dir.path(), StoreOptions::default()).expect("opened");

        match Stores::open(dir.path(), StoreOptions::default()) {
            Err(Error::StoreAlreadyOpen(_)) => {},
            x => panic!("expected StoreAlreadyOpen, got {:?}", x.map(|_| ())),
        }

        drop(store);
        Stores::close(dir.path()).expect("closed");
    }

    #[test]
    fn test_get_shares_the_connection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Stores::open(dir.path(), StoreOptions::default()).expect("opened");
        let other = Stores::get(dir.path()).expect("got").expect("present");
        assert!(Arc::ptr_eq(store.conn(), other.conn()));

        // Both handles alive: close refuses.
        match Stores::close(dir.path()) {
            Err(Error::StoreConnectionStillActive(_)) => {},
            x => panic!("expected StoreConnectionStillActive, got {:?}", x),
        }

        drop(store);
        drop(other);
        Stores::close(dir.path()).expect("closed");
        assert!(Stores::get(dir.path()).expect("got").is_none());
    }

    #[test]
    fn test_close_unopened_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        match Stores::close(dir.path()) {
            Err(Error::StoreNotFound(_)) => {},
            x => panic!("expected StoreNotFound, got {:?}", x),
        }
    }
}
