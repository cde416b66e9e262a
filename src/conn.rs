// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! A connection to one open store.
//!
//! All mutating transactions serialize on the metadata mutex, so concurrent
//! callers see the writer as a single logical queue and unique-constraint
//! checks are race-free. Queries open a snapshot read transaction and never
//! take the writer lock. An aborted write leaves counters untouched.

use std::path::Path;
use std::sync::{
    Arc,
    Mutex,
};

use lmdb::Transaction;

use datalith_core::{
    Entid,
    Keyword,
    Schema,
    TypedValue,
};
use datalith_db::{
    self,
    DbEnv,
    Dbis,
    StoreOptions,
    TxFunction,
    TxFunctionRegistry,
    TxReport,
};
use datalith_db::bootstrap;
use datalith_db::store;
use datalith_db::tx as db_tx;
use datalith_query::{
    DbView,
    QueryInputs,
    QueryOutput,
    Sources,
    q_once,
};
use datalith_search::{
    DocId,
    SearchEngine,
    SearchParams,
    SearchResults,
    TermId,
};
use edn;
use edn::entities::Entity;

use errors::Result;

/// Connection metadata required to query from, or apply transactions to,
/// the store.
///
/// Owned data for the volatile parts (generation and counters), and `Arc`
/// for the infrequently changing schema, so long-running query threads can
/// keep a consistent schema while the writer moves the metadata forward.
struct Metadata {
    generation: u64,
    schema: Arc<Schema>,
    next_eid: Entid,
    next_tx: Entid,
}

/// A mutable, safe reference to one open store.
pub struct Conn {
    env: DbEnv,
    dbis: Dbis,
    options: StoreOptions,
    search: SearchEngine,
    metadata: Mutex<Metadata>,
    tx_functions: Mutex<TxFunctionRegistry>,
}

impl Conn {
    /// Open (creating if necessary) the store at `path`.
    ///
    /// Options are fixed at creation; on reopen, persisted options win over
    /// the requested ones.
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Conn> {
        let env = DbEnv::open(path.as_ref(), options.map_size, options.max_readers)?;
        let dbis = store::open_dbis(&env)?;

        let mut txn = env.begin_write()?;
        let schema = bootstrap::ensure_initialized(&mut txn, &dbis, &options)?;
        let options = bootstrap::read_options(&txn, &dbis, &options)?;
        let next_eid = store::get_meta_i64(&txn, &dbis, store::META_NEXT_EID)?
            .expect("initialized store has counters");
        let next_tx = store::get_meta_i64(&txn, &dbis, store::META_NEXT_TX)?
            .expect("initialized store has counters");
        txn.commit().map_err(datalith_db::DbError::from)?;

        let search = SearchEngine::open(&env, SearchParams::default())?;

        info!("opened store at {:?}: next-eid {}, next-tx {}", path.as_ref(), next_eid, next_tx);

        Ok(Conn {
            env: env,
            dbis: dbis,
            options: options,
            search: search,
            metadata: Mutex::new(Metadata {
                generation: 0,
                schema: Arc::new(schema),
                next_eid: next_eid,
                next_tx: next_tx,
            }),
            tx_functions: Mutex::new(TxFunctionRegistry::new()),
        })
    }

    /// Yield the current schema.
    pub fn current_schema(&self) -> Arc<Schema> {
        self.metadata.lock().unwrap().schema.clone()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// The underlying environment, for callers that assemble their own read
    /// views (multi-source queries, mostly).
    pub fn env(&self) -> &DbEnv {
        &self.env
    }

    pub fn dbis(&self) -> &Dbis {
        &self.dbis
    }

    /// Register a named transaction function, callable as `[:ident args…]`
    /// or `[:db.fn/call :ident args…]`.
    pub fn register_tx_function(&self, ident: Keyword, function: TxFunction) {
        self.tx_functions.lock().unwrap().insert(ident, function);
    }

    /// Apply a transaction given as EDN text.
    pub fn transact(&self, input: &str) -> Result<TxReport> {
        let entities = datalith_db::parse_tx(input)?;
        self.transact_entities(entities)
    }

    /// Apply a transaction given as parsed entities.
    ///
    /// Atomic: a rejected item aborts the whole transaction with no partial
    /// visibility, and the counters do not advance.
    pub fn transact_entities(&self, entities: Vec<Entity<edn::Value>>) -> Result<TxReport> {
        // Take the metadata lock for the whole write: this is the writer
        // queue.
        let mut metadata = self.metadata.lock().unwrap();
        let registry = self.tx_functions.lock().unwrap();

        let mut txn = self.env.begin_write()?;
        let (report, next_schema) = db_tx::transact(&mut txn,
                                                    &self.dbis,
                                                    &metadata.schema,
                                                    &self.options,
                                                    &registry,
                                                    metadata.next_eid,
                                                    metadata.next_tx,
                                                    entities)?;
        txn.commit().map_err(datalith_db::DbError::from)?;

        metadata.generation += 1;
        metadata.next_eid = report.db_after.next_eid;
        metadata.next_tx = report.db_after.next_tx;
        if let Some(schema) = next_schema {
            metadata.schema = Arc::new(schema);
        }
        Ok(report)
    }

    /// Run a query against a fresh snapshot of this store.
    pub fn q_once(&self, query: &str, inputs: QueryInputs) -> Result<QueryOutput> {
        let schema = self.current_schema();
        let txn = self.env.begin_read()?;
        let view = DbView {
            txn: &txn,
            dbis: &self.dbis,
            schema: &schema,
        };
        let sources = Sources::new(view);
        Ok(q_once(&sources, query, inputs)?)
    }

    /// All current datoms, for tests and debugging.
    pub fn datoms(&self) -> Result<Vec<datalith_db::Datom>> {
        let txn = self.env.begin_read()?;
        Ok(datalith_db::debug::user_datoms(&txn, &self.dbis)?)
    }

    // ---------- Full-text search ----------

    /// Index a document; shares the substrate and the writer queue with the
    /// datom store.
    pub fn add_doc(&self, doc_ref: &TypedValue, text: &str) -> Result<DocId> {
        let _metadata = self.metadata.lock().unwrap();
        let mut txn = self.env.begin_write()?;
        let doc_id = self.search.add_doc(&mut txn, doc_ref, text)?;
        txn.commit().map_err(datalith_db::DbError::from)?;
        Ok(doc_id)
    }

    pub fn remove_doc(&self, doc_id: DocId) -> Result<()> {
        let _metadata = self.metadata.lock().unwrap();
        let mut txn = self.env.begin_write()?;
        self.search.remove_doc(&mut txn, doc_id)?;
        txn.commit().map_err(datalith_db::DbError::from)?;
        Ok(())
    }

    /// Ranked full-text search: `(doc-ref, doc-id)` in decreasing score.
    pub fn search(&self, query: &str) -> Result<SearchResults> {
        let txn = self.env.begin_read()?;
        Ok(self.search.search(&txn, query)?)
    }

    /// How many documents are indexed.
    pub fn doc_count(&self) -> Result<u64> {
        let txn = self.env.begin_read()?;
        Ok(self.search.doc_count(&txn)?)
    }

    /// The dictionary term behind a term-id from a posting list, if it is
    /// still indexed.
    pub fn term_of(&self, term_id: TermId) -> Result<Option<String>> {
        let txn = self.env.begin_read()?;
        Ok(self.search.term_of(&txn, term_id)?)
    }
}
