// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The inverted-index engine.
//!
//! Index layout, one dbi each, sharing the store's substrate:
//!
//! - `unigrams`: term -> (term-id, document-frequency);
//! - `bigrams`: (term-id, term-id) -> frequency, for adjacent pairs;
//! - `docs`: doc-id -> (doc-ref, token term-ids in order);
//! - `term-docs`: term-id -> sorted inverted list of doc-ids;
//! - `positions`: (doc-id, term-id) -> list of (position, byte offset).
//!
//! Queries analyze, correct each term by symmetric-delete fuzzy lookup,
//! union the candidate posting lists, and rank with a combined
//! unigram/bigram score in which adjacent-pair hits weigh above isolated
//! unigram hits.

use std::collections::{
    BTreeMap,
    HashMap,
    HashSet,
};
use std::sync::RwLock;

use lmdb::{
    Database,
    RwTransaction,
    Transaction,
};

use datalith_core::TypedValue;
use datalith_db::codec;
use datalith_db::errors::{
    DbErrorKind,
    Result,
};
use datalith_db::substrate::{
    self,
    DbEnv,
    KvOp,
};

use analyzer::{
    self,
    Token,
};

pub type DocId = u64;
pub type TermId = u64;

/// How far fuzzy correction reaches, and how much of each term participates
/// in the delete dictionary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SearchParams {
    pub max_edit_distance: usize,
    pub prefix_length: usize,
}

impl Default for SearchParams {
    fn default() -> SearchParams {
        SearchParams {
            max_edit_distance: 2,
            prefix_length: 7,
        }
    }
}

/// Weight of a bigram hit relative to a unigram hit.
const BIGRAM_WEIGHT: f64 = 2.0;

const META_NEXT_DOC_ID: &[u8] = b"fulltext/next-doc-id";
const META_NEXT_TERM_ID: &[u8] = b"fulltext/next-term-id";

#[derive(Clone, Copy, Debug)]
pub struct SearchDbis {
    pub unigrams: Database,
    pub bigrams: Database,
    pub docs: Database,
    pub term_docs: Database,
    pub positions: Database,
    meta: Database,
}

/// The in-memory symmetric-delete dictionary, rebuilt lazily from the
/// `unigrams` dbi after a write invalidates it.
struct FuzzyIndex {
    /// delete-form -> terms whose prefix produces it.
    deletes: HashMap<String, Vec<String>>,
    /// term -> (term-id, document frequency).
    terms: HashMap<String, (TermId, u64)>,
}

pub struct SearchEngine {
    dbis: SearchDbis,
    params: SearchParams,
    fuzzy: RwLock<Option<FuzzyIndex>>,
}

impl SearchEngine {
    pub fn open(env: &DbEnv, params: SearchParams) -> Result<SearchEngine> {
        Ok(SearchEngine {
            dbis: SearchDbis {
                unigrams: env.create_dbi("unigrams")?,
                bigrams: env.create_dbi("bigrams")?,
                docs: env.create_dbi("docs")?,
                term_docs: env.create_list_dbi("term-docs")?,
                positions: env.create_dbi("positions")?,
                meta: env.create_dbi("meta")?,
            },
            params: params,
            fuzzy: RwLock::new(None),
        })
    }

    pub fn dbis(&self) -> &SearchDbis {
        &self.dbis
    }

    fn next_counter(&self, txn: &mut RwTransaction, key: &[u8]) -> Result<u64> {
        let next = match substrate::get_kv(txn, self.dbis.meta, key)? {
            Some(bytes) => read_u64(bytes)?,
            None => 0,
        };
        substrate::apply_ops(txn, vec![KvOp::Put {
            db: self.dbis.meta,
            key: key.to_vec(),
            value: next.checked_add(1).expect("counter overflow").to_be_bytes().to_vec(),
        }])?;
        Ok(next)
    }

    fn term_entry<T: Transaction>(&self, txn: &T, term: &str) -> Result<Option<(TermId, u64)>> {
        match substrate::get_kv(txn, self.dbis.unigrams, term.as_bytes())? {
            Some(bytes) => {
                let term_id = read_u64(bytes)?;
                let df = read_u64(&bytes[8..])?;
                Ok(Some((term_id, df)))
            },
            None => Ok(None),
        }
    }

    /// Index one document under a fresh doc-id. All five structures update
    /// inside the caller's write transaction.
    pub fn add_doc(&self,
                   txn: &mut RwTransaction,
                   doc_ref: &TypedValue,
                   text: &str)
                   -> Result<DocId> {
        let tokens = analyzer::analyze(text);
        let doc_id = self.next_counter(txn, META_NEXT_DOC_ID)?;

        // Aggregate per-term positions.
        let mut term_positions: BTreeMap<&str, Vec<(u32, u32)>> = BTreeMap::new();
        for token in &tokens {
            term_positions.entry(token.term.as_str())
                          .or_insert_with(Vec::new)
                          .push((token.position, token.offset));
        }

        // Assign term ids and bump document frequencies.
        let mut term_ids: HashMap<&str, TermId> = HashMap::new();
        for (term, _) in &term_positions {
            let (term_id, df) = match self.term_entry(txn, term)? {
                Some((term_id, df)) => (term_id, df + 1),
                None => (self.next_counter(txn, META_NEXT_TERM_ID)?, 1),
            };
            term_ids.insert(*term, term_id);
            let mut value = Vec::with_capacity(16);
            value.extend_from_slice(&term_id.to_be_bytes());
            value.extend_from_slice(&df.to_be_bytes());
            substrate::apply_ops(txn, vec![KvOp::Put {
                db: self.dbis.unigrams,
                key: term.as_bytes().to_vec(),
                value: value,
            }])?;
        }

        let mut ops = vec![];

        // Postings and positions.
        for (term, positions) in &term_positions {
            let term_id = term_ids[term];
            ops.push(KvOp::PutListItem {
                db: self.dbis.term_docs,
                key: term_id.to_be_bytes().to_vec(),
                item: doc_id.to_be_bytes().to_vec(),
            });
            let mut value = Vec::with_capacity(positions.len() * 8);
            for &(position, offset) in positions {
                value.extend_from_slice(&position.to_be_bytes());
                value.extend_from_slice(&offset.to_be_bytes());
            }
            ops.push(KvOp::Put {
                db: self.dbis.positions,
                key: doc_term_key(doc_id, term_id),
                value: value,
            });
        }
        substrate::apply_ops(txn, ops)?;

        // Bigrams require adjacent positions.
        for pair in tokens.windows(2) {
            if pair[1].position == pair[0].position + 1 {
                let key = bigram_key(term_ids[pair[0].term.as_str()], term_ids[pair[1].term.as_str()]);
                let count = match substrate::get_kv(txn, self.dbis.bigrams, &key)? {
                    Some(bytes) => read_u64(bytes)? + 1,
                    None => 1,
                };
                substrate::apply_ops(txn, vec![KvOp::Put {
                    db: self.dbis.bigrams,
                    key: key,
                    value: count.to_be_bytes().to_vec(),
                }])?;
            }
        }

        // The doc row: the ref, then the token term-ids in order, so the
        // document can be unindexed without its text.
        let mut doc_row = vec![];
        codec::push_value(&mut doc_row, doc_ref);
        doc_row.extend_from_slice(&(tokens.len() as u32).to_be_bytes());
        for token in &tokens {
            doc_row.extend_from_slice(&term_ids[token.term.as_str()].to_be_bytes());
            doc_row.extend_from_slice(&token.position.to_be_bytes());
        }
        substrate::apply_ops(txn, vec![KvOp::Put {
            db: self.dbis.docs,
            key: doc_id.to_be_bytes().to_vec(),
            value: doc_row,
        }])?;

        self.invalidate_fuzzy();
        Ok(doc_id)
    }

    /// Unindex a document, maintaining all five structures.
    pub fn remove_doc(&self, txn: &mut RwTransaction, doc_id: DocId) -> Result<()> {
        let (_, tokens) = match self.read_doc(txn, doc_id)? {
            Some(row) => row,
            None => return Ok(()),
        };

        let mut distinct: BTreeMap<TermId, u64> = BTreeMap::new();
        for &(term_id, _) in &tokens {
            *distinct.entry(term_id).or_insert(0) += 1;
        }

        let mut ops = vec![];
        for (&term_id, _) in &distinct {
            ops.push(KvOp::DelListItems {
                db: self.dbis.term_docs,
                key: term_id.to_be_bytes().to_vec(),
                items: vec![doc_id.to_be_bytes().to_vec()],
            });
            ops.push(KvOp::Del {
                db: self.dbis.positions,
                key: doc_term_key(doc_id, term_id),
            });
        }
        ops.push(KvOp::Del {
            db: self.dbis.docs,
            key: doc_id.to_be_bytes().to_vec(),
        });
        substrate::apply_ops(txn, ops)?;

        // Decrement document frequencies; drop exhausted terms.
        let mut terms_by_id: HashMap<TermId, String> = HashMap::new();
        {
            let mut iter = substrate::scan_range(txn, self.dbis.unigrams,
                                                 ::std::ops::Bound::Unbounded,
                                                 ::std::ops::Bound::Unbounded)?;
            while let Some((key, value)) = iter.next()? {
                let term_id = read_u64(value)?;
                if distinct.contains_key(&term_id) {
                    terms_by_id.insert(term_id, String::from_utf8_lossy(key).into_owned());
                }
            }
        }
        for (&term_id, _) in &distinct {
            let term = match terms_by_id.get(&term_id) {
                Some(term) => term.clone(),
                None => continue,
            };
            let (_, df) = self.term_entry(txn, &term)?.expect("term present");
            if df <= 1 {
                substrate::apply_ops(txn, vec![KvOp::Del {
                    db: self.dbis.unigrams,
                    key: term.into_bytes(),
                }])?;
            } else {
                let mut value = Vec::with_capacity(16);
                value.extend_from_slice(&term_id.to_be_bytes());
                value.extend_from_slice(&(df - 1).to_be_bytes());
                substrate::apply_ops(txn, vec![KvOp::Put {
                    db: self.dbis.unigrams,
                    key: term.into_bytes(),
                    value: value,
                }])?;
            }
        }

        // Decrement this document's adjacent pairs.
        for pair in tokens.windows(2) {
            if pair[1].1 == pair[0].1 + 1 {
                let key = bigram_key(pair[0].0, pair[1].0);
                if let Some(bytes) = substrate::get_kv(txn, self.dbis.bigrams, &key)? {
                    let count = read_u64(bytes)?;
                    if count <= 1 {
                        substrate::apply_ops(txn, vec![KvOp::Del { db: self.dbis.bigrams, key: key }])?;
                    } else {
                        substrate::apply_ops(txn, vec![KvOp::Put {
                            db: self.dbis.bigrams,
                            key: key,
                            value: (count - 1).to_be_bytes().to_vec(),
                        }])?;
                    }
                }
            }
        }

        self.invalidate_fuzzy();
        Ok(())
    }

    fn read_doc<T: Transaction>(&self,
                                txn: &T,
                                doc_id: DocId)
                                -> Result<Option<(TypedValue, Vec<(TermId, u32)>)>> {
        let bytes = match substrate::get_kv(txn, self.dbis.docs, &doc_id.to_be_bytes())? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let (doc_ref, rest) = codec::read_value(bytes)?;
        let count = read_u32(rest)? as usize;
        let mut rest = &rest[4..];
        let mut tokens = Vec::with_capacity(count);
        for _ in 0..count {
            let term_id = read_u64(rest)?;
            let position = read_u32(&rest[8..])?;
            tokens.push((term_id, position));
            rest = &rest[12..];
        }
        Ok(Some((doc_ref, tokens)))
    }

    pub fn doc_count<T: Transaction>(&self, txn: &T) -> Result<u64> {
        let mut count = 0;
        let mut iter = substrate::scan_range(txn, self.dbis.docs,
                                             ::std::ops::Bound::Unbounded,
                                             ::std::ops::Bound::Unbounded)?;
        while iter.next()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// The dictionary term behind a term-id, if it is still indexed. The
    /// `unigrams` dbi is keyed by term, so this is a scan; callers that hold
    /// ids from posting lists use it to render results, not on hot paths.
    pub fn term_of<T: Transaction>(&self, txn: &T, term_id: TermId) -> Result<Option<String>> {
        let mut iter = substrate::scan_range(txn, self.dbis.unigrams,
                                             ::std::ops::Bound::Unbounded,
                                             ::std::ops::Bound::Unbounded)?;
        while let Some((key, value)) = iter.next()? {
            if read_u64(value)? == term_id {
                let term = String::from_utf8(key.to_vec())
                    .map_err(|e| DbErrorKind::CorruptValue(format!("bad term in unigrams: {}", e)))?;
                return Ok(Some(term));
            }
        }
        Ok(None)
    }

    fn invalidate_fuzzy(&self) {
        *self.fuzzy.write().unwrap() = None;
    }

    fn ensure_fuzzy<T: Transaction>(&self, txn: &T) -> Result<()> {
        {
            if self.fuzzy.read().unwrap().is_some() {
                return Ok(());
            }
        }
        let mut terms: HashMap<String, (TermId, u64)> = HashMap::new();
        let mut deletes: HashMap<String, Vec<String>> = HashMap::new();
        {
            let mut iter = substrate::scan_range(txn, self.dbis.unigrams,
                                                 ::std::ops::Bound::Unbounded,
                                                 ::std::ops::Bound::Unbounded)?;
            while let Some((key, value)) = iter.next()? {
                let term = String::from_utf8_lossy(key).into_owned();
                let term_id = read_u64(value)?;
                let df = read_u64(&value[8..])?;
                let prefix = prefix_of(&term, self.params.prefix_length);
                for form in delete_forms(&prefix, self.params.max_edit_distance) {
                    deletes.entry(form).or_insert_with(Vec::new).push(term.clone());
                }
                terms.insert(term, (term_id, df));
            }
        }
        *self.fuzzy.write().unwrap() = Some(FuzzyIndex {
            deletes: deletes,
            terms: terms,
        });
        Ok(())
    }

    /// Candidate corrections for one query term: `(term, term-id, df,
    /// edit distance)`, nearest first.
    fn fuzzy_candidates<T: Transaction>(&self,
                                        txn: &T,
                                        query_term: &str)
                                        -> Result<Vec<(String, TermId, u64, usize)>> {
        self.ensure_fuzzy(txn)?;
        let guard = self.fuzzy.read().unwrap();
        let index = guard.as_ref().expect("fuzzy index built above");

        let mut seen: HashSet<&String> = HashSet::new();
        let prefix = prefix_of(query_term, self.params.prefix_length);
        for form in delete_forms(&prefix, self.params.max_edit_distance) {
            if let Some(terms) = index.deletes.get(&form) {
                for term in terms {
                    seen.insert(term);
                }
            }
        }

        let mut candidates = vec![];
        for term in seen {
            if let Some(distance) = edit_distance_within(query_term, term, self.params.max_edit_distance) {
                let (term_id, df) = index.terms[term];
                candidates.push((term.clone(), term_id, df, distance));
            }
        }
        candidates.sort_by(|a, b| a.3.cmp(&b.3).then_with(|| a.0.cmp(&b.0)));
        Ok(candidates)
    }

    /// Rank documents for `query`, best first, as `(doc-ref, doc-id)`.
    pub fn search<T: Transaction>(&self,
                                  txn: &T,
                                  query: &str)
                                  -> Result<SearchResults> {
        let query_tokens: Vec<Token> = analyzer::analyze(query);
        if query_tokens.is_empty() {
            return Ok(SearchResults { hits: vec![].into_iter() });
        }

        let doc_total = self.doc_count(txn)? as f64;

        // Correct each term, then union the candidate posting lists.
        let mut per_token: Vec<Vec<(String, TermId, u64, usize)>> = vec![];
        for token in &query_tokens {
            per_token.push(self.fuzzy_candidates(txn, &token.term)?);
        }

        let mut scores: HashMap<DocId, f64> = HashMap::new();
        let mut doc_term_ids: HashMap<DocId, HashSet<TermId>> = HashMap::new();
        for candidates in &per_token {
            for &(_, term_id, df, distance) in candidates {
                let idf = (1.0 + doc_total / df as f64).ln();
                let mut docs = substrate::list_items(txn, self.dbis.term_docs,
                                                     &term_id.to_be_bytes())?;
                while let Some(item) = docs.next()? {
                    let doc_id = read_u64(item)?;
                    let tf = self.positions_count(txn, doc_id, term_id)? as f64;
                    *scores.entry(doc_id).or_insert(0.0) +=
                        tf * idf / (1.0 + distance as f64);
                    doc_term_ids.entry(doc_id).or_insert_with(HashSet::new).insert(term_id);
                }
            }
        }

        // Bigram bonus: adjacent query terms whose candidates appear
        // adjacently in the document.
        for window in per_token.windows(2) {
            for &(_, id1, df1, _) in &window[0] {
                for &(_, id2, df2, _) in &window[1] {
                    if substrate::get_kv(txn, self.dbis.bigrams, &bigram_key(id1, id2))?.is_none() {
                        continue;
                    }
                    let idf = (1.0 + doc_total / df1 as f64).ln()
                        + (1.0 + doc_total / df2 as f64).ln();
                    let doc_ids: Vec<DocId> = scores.keys().cloned().collect();
                    for doc_id in doc_ids {
                        let has_both = doc_term_ids.get(&doc_id)
                            .map(|ids| ids.contains(&id1) && ids.contains(&id2))
                            .unwrap_or(false);
                        if has_both && self.adjacent_in_doc(txn, doc_id, id1, id2)? {
                            *scores.entry(doc_id).or_insert(0.0) += BIGRAM_WEIGHT * idf;
                        }
                    }
                }
            }
        }

        let mut ranked: Vec<(DocId, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
               .unwrap_or(::std::cmp::Ordering::Equal)
               .then_with(|| a.0.cmp(&b.0))
        });

        let mut hits = vec![];
        for (doc_id, _) in ranked {
            if let Some((doc_ref, _)) = self.read_doc(txn, doc_id)? {
                hits.push((doc_ref, doc_id));
            }
        }
        debug!("search {:?} matched {} documents", query, hits.len());
        Ok(SearchResults { hits: hits.into_iter() })
    }

    fn positions_count<T: Transaction>(&self, txn: &T, doc_id: DocId, term_id: TermId) -> Result<usize> {
        match substrate::get_kv(txn, self.dbis.positions, &doc_term_key(doc_id, term_id))? {
            Some(bytes) => Ok(bytes.len() / 8),
            None => Ok(0),
        }
    }

    fn positions_of<T: Transaction>(&self, txn: &T, doc_id: DocId, term_id: TermId) -> Result<Vec<u32>> {
        match substrate::get_kv(txn, self.dbis.positions, &doc_term_key(doc_id, term_id))? {
            Some(bytes) => {
                let mut positions = vec![];
                let mut rest = bytes;
                while rest.len() >= 8 {
                    positions.push(read_u32(rest)?);
                    rest = &rest[8..];
                }
                Ok(positions)
            },
            None => Ok(vec![]),
        }
    }

    fn adjacent_in_doc<T: Transaction>(&self,
                                       txn: &T,
                                       doc_id: DocId,
                                       id1: TermId,
                                       id2: TermId)
                                       -> Result<bool> {
        let first: HashSet<u32> = self.positions_of(txn, doc_id, id1)?.into_iter().collect();
        for p in self.positions_of(txn, doc_id, id2)? {
            if p > 0 && first.contains(&(p - 1)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Ranked hits, lazily consumable.
pub struct SearchResults {
    hits: ::std::vec::IntoIter<(TypedValue, DocId)>,
}

impl Iterator for SearchResults {
    type Item = (TypedValue, DocId);

    fn next(&mut self) -> Option<(TypedValue, DocId)> {
        self.hits.next()
    }
}

fn doc_term_key(doc_id: DocId, term_id: TermId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&doc_id.to_be_bytes());
    key.extend_from_slice(&term_id.to_be_bytes());
    key
}

fn bigram_key(id1: TermId, id2: TermId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&id1.to_be_bytes());
    key.extend_from_slice(&id2.to_be_bytes());
    key
}

fn read_u64(bytes: &[u8]) -> Result<u64> {
    if bytes.len() < 8 {
        bail!(DbErrorKind::CorruptValue("truncated u64 in search index".to_string()));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    Ok(u64::from_be_bytes(raw))
}

fn read_u32(bytes: &[u8]) -> Result<u32> {
    if bytes.len() < 4 {
        bail!(DbErrorKind::CorruptValue("truncated u32 in search index".to_string()));
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    Ok(u32::from_be_bytes(raw))
}

fn prefix_of(term: &str, prefix_length: usize) -> String {
    term.chars().take(prefix_length).collect()
}

/// All strings reachable from `word` by at most `distance` single-character
/// deletions, including `word` itself.
fn delete_forms(word: &str, distance: usize) -> HashSet<String> {
    let mut forms = HashSet::new();
    forms.insert(word.to_string());
    let mut frontier: Vec<String> = vec![word.to_string()];
    for _ in 0..distance {
        let mut next = vec![];
        for w in frontier {
            let chars: Vec<char> = w.chars().collect();
            for skip in 0..chars.len() {
                let shorter: String = chars.iter()
                    .enumerate()
                    .filter(|&(i, _)| i != skip)
                    .map(|(_, c)| *c)
                    .collect();
                if forms.insert(shorter.clone()) {
                    next.push(shorter);
                }
            }
        }
        frontier = next;
    }
    forms
}

/// Levenshtein distance, bounded: `None` when it exceeds `max`.
fn edit_distance_within(a: &str, b: &str, max: usize) -> Option<usize> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len() > b.len() + max || b.len() > a.len() + max {
        return None;
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut current = vec![i + 1];
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + if ca == cb { 0 } else { 1 };
            let insertion = current[j] + 1;
            let deletion = previous[j + 1] + 1;
            current.push(substitution.min(insertion).min(deletion));
        }
        previous = current;
    }
    let distance = previous[b.len()];
    if distance <= max {
        Some(distance)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    extern crate tempfile;

    use super::*;

    fn test_engine() -> (tempfile::TempDir, DbEnv, SearchEngine) {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = DbEnv::open(dir.path(), 1 << 24, substrate::DEFAULT_MAX_READERS).expect("env");
        let engine = SearchEngine::open(&env, SearchParams::default()).expect("engine");
        (dir, env, engine)
    }

    fn add(env: &DbEnv, engine: &SearchEngine, doc_ref: i64, text: &str) -> DocId {
        let mut txn = env.begin_write().expect("write");
        let doc_id = engine.add_doc(&mut txn, &TypedValue::Long(doc_ref), text).expect("added");
        txn.commit().expect("committed");
        doc_id
    }

    #[test]
    fn test_delete_forms() {
        let forms = delete_forms("abc", 1);
        assert!(forms.contains("abc"));
        assert!(forms.contains("ab"));
        assert!(forms.contains("ac"));
        assert!(forms.contains("bc"));
        assert_eq!(4, forms.len());
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(Some(0), edit_distance_within("red", "red", 2));
        assert_eq!(Some(1), edit_distance_within("red", "rad", 2));
        assert_eq!(Some(2), edit_distance_within("red", "rider", 2));
        assert_eq!(None, edit_distance_within("red", "blue", 2));
    }

    #[test]
    fn test_bigram_ranking() {
        let (_dir, env, engine) = test_engine();
        add(&env, &engine, 0, "The quick red fox jumped over the lazy red dogs.");
        add(&env, &engine, 1, "Mary had a little lamb whose fleece was red as fire.");

        let read = env.begin_read().expect("read");
        let hits: Vec<(TypedValue, DocId)> = engine.search(&read, "red fox").expect("searched").collect();
        assert_eq!(2, hits.len());
        // The bigram match ranks the fox document above the lamb document.
        assert_eq!(TypedValue::Long(0), hits[0].0);
        assert_eq!(TypedValue::Long(1), hits[1].0);
    }

    #[test]
    fn test_fuzzy_correction() {
        let (_dir, env, engine) = test_engine();
        add(&env, &engine, 7, "a quick brown fox");

        let read = env.begin_read().expect("read");
        // "foxx" corrects to "fox".
        let hits: Vec<(TypedValue, DocId)> = engine.search(&read, "foxx").expect("searched").collect();
        assert_eq!(1, hits.len());
        assert_eq!(TypedValue::Long(7), hits[0].0);
    }

    #[test]
    fn test_term_of() {
        let (_dir, env, engine) = test_engine();
        add(&env, &engine, 1, "red fox");

        let read = env.begin_read().expect("read");
        let (term_id, _) = engine.term_entry(&read, "fox").expect("entry").expect("indexed");
        assert_eq!(Some("fox".to_string()), engine.term_of(&read, term_id).expect("term"));
        assert_eq!(None, engine.term_of(&read, 9_999).expect("term"));
    }

    #[test]
    fn test_remove_doc() {
        let (_dir, env, engine) = test_engine();
        let doc_id = add(&env, &engine, 1, "red fox");
        add(&env, &engine, 2, "red lamp");

        let mut txn = env.begin_write().expect("write");
        engine.remove_doc(&mut txn, doc_id).expect("removed");
        txn.commit().expect("committed");

        let read = env.begin_read().expect("read");
        assert_eq!(1, engine.doc_count(&read).expect("count"));
        let hits: Vec<(TypedValue, DocId)> = engine.search(&read, "fox").expect("searched").collect();
        assert!(hits.is_empty());
        let hits: Vec<(TypedValue, DocId)> = engine.search(&read, "red").expect("searched").collect();
        assert_eq!(1, hits.len());
        assert_eq!(TypedValue::Long(2), hits[0].0);
    }
}
