// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::fmt;

/// A plain symbol: `?x`, `untuple`, `$src`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct PlainSymbol(pub String);

impl PlainSymbol {
    pub fn plain<T>(name: T) -> PlainSymbol where T: Into<String> {
        let n = name.into();
        assert!(!n.is_empty(), "Symbols cannot be unnamed.");
        PlainSymbol(n)
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Return the name without a leading sigil, which is how a `?var` or a
    /// `$src` names itself in bindings.
    pub fn without_sigil(&self) -> &str {
        if self.is_var_symbol() || self.is_src_symbol() {
            &self.0[1..]
        } else {
            &self.0
        }
    }

    pub fn is_var_symbol(&self) -> bool {
        self.0.starts_with('?')
    }

    pub fn is_src_symbol(&self) -> bool {
        self.0.starts_with('$')
    }
}

impl fmt::Display for PlainSymbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A keyword, optionally namespaced: `:name` or `:namespace/name`.
///
/// Keywords name attributes and idents throughout the system. A keyword whose
/// name begins with `_` addresses the reverse direction of a ref attribute
/// (`:person/_friend`).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct Keyword {
    namespace: Option<String>,
    name: String,
}

impl Keyword {
    pub fn plain<T>(name: T) -> Keyword where T: Into<String> {
        let n = name.into();
        assert!(!n.is_empty(), "Keywords cannot be unnamed.");
        Keyword { namespace: None, name: n }
    }

    pub fn namespaced<N, T>(namespace: N, name: T) -> Keyword where N: Into<String>, T: Into<String> {
        let ns = namespace.into();
        let n = name.into();
        assert!(!ns.is_empty(), "Namespaced keywords cannot have an empty namespace.");
        assert!(!n.is_empty(), "Keywords cannot be unnamed.");
        Keyword { namespace: Some(ns), name: n }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_ref().map(|s| s.as_str())
    }

    pub fn is_namespaced(&self) -> bool {
        self.namespace.is_some()
    }

    /// Whether this keyword names the reverse direction of a ref attribute.
    pub fn is_backward(&self) -> bool {
        self.name.starts_with('_')
    }

    pub fn is_forward(&self) -> bool {
        !self.is_backward()
    }

    /// `:ns/_name` -> `:ns/name`. Returns `None` for forward keywords.
    pub fn unreversed(&self) -> Option<Keyword> {
        if self.is_backward() {
            Some(Keyword {
                namespace: self.namespace.clone(),
                name: self.name[1..].to_string(),
            })
        } else {
            None
        }
    }

    /// `:ns/name` -> `:ns/_name`.
    pub fn to_reversed(&self) -> Keyword {
        if self.is_backward() {
            self.clone()
        } else {
            Keyword {
                namespace: self.namespace.clone(),
                name: format!("_{}", self.name),
            }
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.namespace {
            Some(ref ns) => write!(f, ":{}/{}", ns, self.name),
            None => write!(f, ":{}", self.name),
        }
    }
}

/// Construct a `Keyword` at the call site: `kw!(:db/ident)`, `kw!(:name)`.
///
/// Only simple identifiers tokenize here; dotted namespaces go through
/// `Keyword::namespaced`.
#[macro_export]
macro_rules! kw {
    ( : $ns:ident / $n:ident ) => {
        $crate::symbols::Keyword::namespaced(stringify!($ns), stringify!($n))
    };

    ( : $n:ident ) => {
        $crate::symbols::Keyword::plain(stringify!($n))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_display() {
        assert_eq!(":foo/bar", Keyword::namespaced("foo", "bar").to_string());
        assert_eq!(":baz", Keyword::plain("baz").to_string());
    }

    #[test]
    fn test_reversed() {
        let fwd = Keyword::namespaced("person", "friend");
        let bwd = fwd.to_reversed();
        assert_eq!(":person/_friend", bwd.to_string());
        assert!(bwd.is_backward());
        assert_eq!(Some(fwd), bwd.unreversed());
        assert_eq!(None, Keyword::namespaced("person", "friend").unreversed());
    }
}
