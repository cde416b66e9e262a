// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The thin contract over the ordered key-value engine.
//!
//! Everything above this module speaks in named dbis, batched write
//! operations, ranged cursors, and inverted lists; only this module speaks
//! LMDB. The engine gives us what the store design assumes: one writer at a
//! time, snapshot readers that never block it, and bytewise-ordered keys
//! (our codec produces keys whose byte order is the semantic order, so no
//! custom comparators are installed).

use std::fs;
use std::ops::Bound;
use std::path::Path;

use lmdb;
use lmdb::{
    Cursor,
    Database,
    DatabaseFlags,
    Environment,
    RoTransaction,
    RwTransaction,
    Transaction,
    WriteFlags,
};
use lmdb_sys as ffi;

use errors::Result;

/// Default memory map size: 1 GiB. Grows only with an explicit reopen.
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Default reader-slot count, matching the engine's own default.
pub const DEFAULT_MAX_READERS: u32 = 126;

const MAX_DBIS: u32 = 24;

/// An open LMDB environment holding all of a store's dbis.
pub struct DbEnv {
    env: Environment,
}

impl DbEnv {
    /// Open (creating if necessary) the environment at `path`, which names a
    /// directory.
    pub fn open(path: &Path, map_size: usize, max_readers: u32) -> Result<DbEnv> {
        fs::create_dir_all(path)?;
        let mut builder = Environment::new();
        builder.set_max_dbs(MAX_DBIS);
        builder.set_max_readers(max_readers);
        builder.set_map_size(map_size);
        let env = builder.open(path)?;
        Ok(DbEnv { env: env })
    }

    /// Create or open a plain dbi.
    pub fn create_dbi(&self, name: &str) -> Result<Database> {
        Ok(self.env.create_db(Some(name), DatabaseFlags::empty())?)
    }

    /// Create or open an inverted-list dbi: a key maps to a sorted set of
    /// values.
    pub fn create_list_dbi(&self, name: &str) -> Result<Database> {
        Ok(self.env.create_db(Some(name), DatabaseFlags::DUP_SORT)?)
    }

    /// Begin a snapshot read transaction.
    pub fn begin_read(&self) -> Result<RoTransaction> {
        Ok(self.env.begin_ro_txn()?)
    }

    /// Begin the (single) write transaction.
    pub fn begin_write(&self) -> Result<RwTransaction> {
        Ok(self.env.begin_rw_txn()?)
    }

    pub fn sync(&self) -> Result<()> {
        Ok(self.env.sync(true)?)
    }
}

/// One batched write operation. A transaction's operations apply atomically:
/// either the commit makes them all visible or none.
#[derive(Clone, Debug)]
pub enum KvOp {
    Put {
        db: Database,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Del {
        db: Database,
        key: Vec<u8>,
    },
    PutListItem {
        db: Database,
        key: Vec<u8>,
        item: Vec<u8>,
    },
    DelList {
        db: Database,
        key: Vec<u8>,
    },
    DelListItems {
        db: Database,
        key: Vec<u8>,
        items: Vec<Vec<u8>>,
    },
}

/// Apply a batch of operations inside the given write transaction. Deletes
/// of absent keys are no-ops.
pub fn apply_ops(txn: &mut RwTransaction, ops: Vec<KvOp>) -> Result<()> {
    for op in ops {
        match op {
            KvOp::Put { db, key, value } => {
                txn.put(db, &key, &value, WriteFlags::empty())?;
            },
            KvOp::Del { db, key } => {
                ignore_not_found(txn.del(db, &key, None))?;
            },
            KvOp::PutListItem { db, key, item } => {
                txn.put(db, &key, &item, WriteFlags::empty())?;
            },
            KvOp::DelList { db, key } => {
                ignore_not_found(txn.del(db, &key, None))?;
            },
            KvOp::DelListItems { db, key, items } => {
                for item in items {
                    ignore_not_found(txn.del(db, &key, Some(&item)))?;
                }
            },
        }
    }
    Ok(())
}

fn ignore_not_found(r: lmdb::Result<()>) -> Result<()> {
    match r {
        Ok(()) | Err(lmdb::Error::NotFound) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Point lookup.
pub fn get_kv<'t, T: Transaction>(txn: &'t T, db: Database, key: &[u8]) -> Result<Option<&'t [u8]>> {
    match txn.get(db, &key) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether `item` is present in the inverted list at `key`.
pub fn in_list<T: Transaction>(txn: &T, db: Database, key: &[u8], item: &[u8]) -> Result<bool> {
    let cursor = txn.open_ro_cursor(db)?;
    match cursor.get(Some(key), Some(item), ffi::MDB_GET_BOTH) {
        Ok(_) => Ok(true),
        Err(lmdb::Error::NotFound) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Number of items in the inverted list at `key`.
pub fn list_count<T: Transaction>(txn: &T, db: Database, key: &[u8]) -> Result<usize> {
    let mut n = 0;
    let mut iter = list_items(txn, db, key)?;
    while iter.next()?.is_some() {
        n += 1;
    }
    Ok(n)
}

/// Iterate the (sorted) items of the inverted list at `key`.
pub fn list_items<'t, T: Transaction>(txn: &'t T, db: Database, key: &[u8]) -> Result<ListIter<'t>> {
    let cursor = txn.open_ro_cursor(db)?;
    let positioned = match cursor.get(Some(key), None, ffi::MDB_SET) {
        Ok(_) => true,
        Err(lmdb::Error::NotFound) => false,
        Err(e) => return Err(e.into()),
    };
    Ok(ListIter {
        cursor: cursor,
        at_first: true,
        exhausted: !positioned,
    })
}

pub struct ListIter<'t> {
    cursor: lmdb::RoCursor<'t>,
    at_first: bool,
    exhausted: bool,
}

impl<'t> ListIter<'t> {
    pub fn next(&mut self) -> Result<Option<&'t [u8]>> {
        if self.exhausted {
            return Ok(None);
        }
        let op = if self.at_first { ffi::MDB_GET_CURRENT } else { ffi::MDB_NEXT_DUP };
        self.at_first = false;
        match self.cursor.get(None, None, op) {
            Ok((_, value)) => Ok(Some(value)),
            Err(lmdb::Error::NotFound) => {
                self.exhausted = true;
                Ok(None)
            },
            Err(e) => Err(e.into()),
        }
    }
}

/// A forward or backward ranged scan with open/closed endpoints.
pub struct RangeIter<'t> {
    cursor: lmdb::RoCursor<'t>,
    forward: bool,
    started: bool,
    exhausted: bool,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
}

impl<'t> RangeIter<'t> {
    fn below_lower(&self, key: &[u8]) -> bool {
        match self.lower {
            Bound::Unbounded => false,
            Bound::Included(ref lo) => key < lo.as_slice(),
            Bound::Excluded(ref lo) => key <= lo.as_slice(),
        }
    }

    fn above_upper(&self, key: &[u8]) -> bool {
        match self.upper {
            Bound::Unbounded => false,
            Bound::Included(ref hi) => key > hi.as_slice(),
            Bound::Excluded(ref hi) => key >= hi.as_slice(),
        }
    }

    pub fn next(&mut self) -> Result<Option<(&'t [u8], &'t [u8])>> {
        if self.exhausted {
            return Ok(None);
        }
        loop {
            let step = if !self.started {
                self.started = true;
                if self.forward {
                    match self.lower {
                        Bound::Unbounded => self.cursor.get(None, None, ffi::MDB_FIRST),
                        Bound::Included(ref lo) | Bound::Excluded(ref lo) => {
                            self.cursor.get(Some(lo), None, ffi::MDB_SET_RANGE)
                        },
                    }
                } else {
                    match self.upper {
                        Bound::Unbounded => self.cursor.get(None, None, ffi::MDB_LAST),
                        Bound::Included(ref hi) | Bound::Excluded(ref hi) => {
                            // Position at the first key >= hi, then step back
                            // as needed; if past the end, take the last key.
                            match self.cursor.get(Some(hi), None, ffi::MDB_SET_RANGE) {
                                Err(lmdb::Error::NotFound) => self.cursor.get(None, None, ffi::MDB_LAST),
                                r => r,
                            }
                        },
                    }
                }
            } else if self.forward {
                self.cursor.get(None, None, ffi::MDB_NEXT)
            } else {
                self.cursor.get(None, None, ffi::MDB_PREV)
            };

            match step {
                Ok((Some(key), value)) => {
                    let below = self.below_lower(key);
                    let above = self.above_upper(key);
                    if !below && !above {
                        return Ok(Some((key, value)));
                    }
                    // A key on the wrong side of the far bound ends the
                    // scan; one on the near side (an excluded endpoint, or
                    // a backward scan positioned past its upper bound)
                    // means keep stepping.
                    if (self.forward && above) || (!self.forward && below) {
                        self.exhausted = true;
                        return Ok(None);
                    }
                },
                Ok((None, _)) => {
                    self.exhausted = true;
                    return Ok(None);
                },
                Err(lmdb::Error::NotFound) => {
                    self.exhausted = true;
                    return Ok(None);
                },
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Forward scan of `[lower, upper]` per the given bounds.
pub fn scan_range<'t, T: Transaction>(txn: &'t T,
                                      db: Database,
                                      lower: Bound<Vec<u8>>,
                                      upper: Bound<Vec<u8>>)
                                      -> Result<RangeIter<'t>> {
    Ok(RangeIter {
        cursor: txn.open_ro_cursor(db)?,
        forward: true,
        started: false,
        exhausted: false,
        lower: lower,
        upper: upper,
    })
}

/// Backward scan of `[lower, upper]` per the given bounds, yielding keys in
/// decreasing order.
pub fn scan_range_back<'t, T: Transaction>(txn: &'t T,
                                           db: Database,
                                           lower: Bound<Vec<u8>>,
                                           upper: Bound<Vec<u8>>)
                                           -> Result<RangeIter<'t>> {
    Ok(RangeIter {
        cursor: txn.open_ro_cursor(db)?,
        forward: false,
        started: false,
        exhausted: false,
        lower: lower,
        upper: upper,
    })
}

/// The smallest byte string strictly greater than every string with `prefix`
/// as a prefix, or `None` when no such string exists.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last < 0xFF {
            out.push(last + 1);
            return Some(out);
        }
    }
    None
}

/// Bounds covering exactly the keys that start with `prefix`.
pub fn prefix_bounds(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let upper = match prefix_successor(prefix) {
        Some(succ) => Bound::Excluded(succ),
        None => Bound::Unbounded,
    };
    (Bound::Included(prefix.to_vec()), upper)
}

#[cfg(test)]
mod tests {
    extern crate tempfile;

    use super::*;

    fn test_env() -> (tempfile::TempDir, DbEnv) {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = DbEnv::open(dir.path(), 1 << 24, DEFAULT_MAX_READERS).expect("env");
        (dir, env)
    }

    #[test]
    fn test_put_get_del() {
        let (_dir, env) = test_env();
        let db = env.create_dbi("test").expect("dbi");

        let mut txn = env.begin_write().expect("write txn");
        apply_ops(&mut txn, vec![
            KvOp::Put { db: db, key: b"a".to_vec(), value: b"1".to_vec() },
            KvOp::Put { db: db, key: b"b".to_vec(), value: b"2".to_vec() },
        ]).expect("applied");
        txn.commit().expect("committed");

        let read = env.begin_read().expect("read txn");
        assert_eq!(Some(&b"1"[..]), get_kv(&read, db, b"a").expect("get"));
        assert_eq!(None, get_kv(&read, db, b"c").expect("get"));
        drop(read);

        let mut txn = env.begin_write().expect("write txn");
        apply_ops(&mut txn, vec![
            KvOp::Del { db: db, key: b"a".to_vec() },
            // Deleting an absent key is fine.
            KvOp::Del { db: db, key: b"nope".to_vec() },
        ]).expect("applied");
        txn.commit().expect("committed");

        let read = env.begin_read().expect("read txn");
        assert_eq!(None, get_kv(&read, db, b"a").expect("get"));
    }

    #[test]
    fn test_range_scans_both_directions() {
        let (_dir, env) = test_env();
        let db = env.create_dbi("test").expect("dbi");

        let mut txn = env.begin_write().expect("write txn");
        for k in &[b"a", b"b", b"c", b"d", b"e"] {
            txn.put(db, k, &b"v"[..], WriteFlags::empty()).expect("put");
        }
        txn.commit().expect("committed");

        let read = env.begin_read().expect("read txn");

        let mut iter = scan_range(&read, db,
                                  Bound::Included(b"b".to_vec()),
                                  Bound::Excluded(b"d".to_vec())).expect("scan");
        let mut keys = vec![];
        while let Some((k, _)) = iter.next().expect("next") {
            keys.push(k.to_vec());
        }
        assert_eq!(vec![b"b".to_vec(), b"c".to_vec()], keys);

        let mut iter = scan_range_back(&read, db,
                                       Bound::Excluded(b"a".to_vec()),
                                       Bound::Included(b"d".to_vec())).expect("scan");
        let mut keys = vec![];
        while let Some((k, _)) = iter.next().expect("next") {
            keys.push(k.to_vec());
        }
        assert_eq!(vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec()], keys);
    }

    #[test]
    fn test_inverted_lists() {
        let (_dir, env) = test_env();
        let db = env.create_list_dbi("lists").expect("dbi");

        let mut txn = env.begin_write().expect("write txn");
        apply_ops(&mut txn, vec![
            KvOp::PutListItem { db: db, key: b"k".to_vec(), item: b"3".to_vec() },
            KvOp::PutListItem { db: db, key: b"k".to_vec(), item: b"1".to_vec() },
            KvOp::PutListItem { db: db, key: b"k".to_vec(), item: b"2".to_vec() },
            KvOp::PutListItem { db: db, key: b"other".to_vec(), item: b"9".to_vec() },
        ]).expect("applied");
        txn.commit().expect("committed");

        let read = env.begin_read().expect("read txn");
        assert_eq!(3, list_count(&read, db, b"k").expect("count"));
        assert!(in_list(&read, db, b"k", b"2").expect("in-list"));
        assert!(!in_list(&read, db, b"k", b"4").expect("in-list"));

        // Items come back sorted.
        let mut items = vec![];
        let mut iter = list_items(&read, db, b"k").expect("items");
        while let Some(item) = iter.next().expect("next") {
            items.push(item.to_vec());
        }
        assert_eq!(vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()], items);
        drop(read);

        let mut txn = env.begin_write().expect("write txn");
        apply_ops(&mut txn, vec![
            KvOp::DelListItems { db: db, key: b"k".to_vec(), items: vec![b"1".to_vec(), b"3".to_vec()] },
        ]).expect("applied");
        txn.commit().expect("committed");

        let read = env.begin_read().expect("read txn");
        assert_eq!(1, list_count(&read, db, b"k").expect("count"));
        drop(read);

        let mut txn = env.begin_write().expect("write txn");
        apply_ops(&mut txn, vec![
            KvOp::DelList { db: db, key: b"k".to_vec() },
        ]).expect("applied");
        txn.commit().expect("committed");

        let read = env.begin_read().expect("read txn");
        assert_eq!(0, list_count(&read, db, b"k").expect("count"));
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(Some(b"ab".to_vec()), prefix_successor(b"aa"));
        assert_eq!(Some(b"b".to_vec()), prefix_successor(&[b'a', 0xFF][..]));
        assert_eq!(None, prefix_successor(&[0xFF, 0xFF][..]));
    }
}
