// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! A simple interner: hand out a shared `Rc` for each distinct value so that
//! equal tempids (and similar small values) are pointer-shared during a
//! transaction.

use std::collections::HashSet;
use std::hash::Hash;
use std::rc::Rc;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InternSet<T> where T: Eq + Hash {
    inner: HashSet<Rc<T>>,
}

impl<T> InternSet<T> where T: Eq + Hash {
    pub fn new() -> InternSet<T> {
        InternSet {
            inner: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Intern a value, returning the canonical `Rc`.
    pub fn intern<R>(&mut self, value: R) -> Rc<T> where R: Into<Rc<T>> {
        let key: Rc<T> = value.into();
        if self.inner.insert(key.clone()) {
            key
        } else {
            self.inner.get(&key).unwrap().clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_shares() {
        let mut s: InternSet<String> = InternSet::new();
        let a = s.intern("x".to_string());
        let b = s.intern("x".to_string());
        assert_eq!(1, s.len());
        assert!(Rc::ptr_eq(&a, &b));
    }
}
