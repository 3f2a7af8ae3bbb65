//! Base-name blacklist with self-tuning rule order.
//!
//! Rules are tried in order and the first match wins. Every hit bumps the
//! rule's counter and the list is re-sorted by hits, so rules that fire
//! often are tried first on the next lookup.

use ferret_db::{BlacklistRecord, Id};
use globset::{Glob, GlobMatcher};
use regex::Regex;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum BlacklistError {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// A single compiled rule.
#[derive(Debug)]
pub enum Rule {
    Regex {
        id: Id,
        pattern: String,
        regex: Regex,
        hits: AtomicU64,
    },
    Glob {
        id: Id,
        pattern: String,
        matcher: GlobMatcher,
        hits: AtomicU64,
    },
}

impl Rule {
    pub fn regex(id: Id, pattern: &str, hits: u64) -> Result<Self, BlacklistError> {
        let regex = Regex::new(pattern).map_err(|e| invalid(pattern, e))?;
        Ok(Rule::Regex {
            id,
            pattern: pattern.to_string(),
            regex,
            hits: AtomicU64::new(hits),
        })
    }

    /// Globs are matched case-sensitively against the base name.
    pub fn glob(id: Id, pattern: &str, hits: u64) -> Result<Self, BlacklistError> {
        let matcher = Glob::new(pattern)
            .map_err(|e| invalid(pattern, e))?
            .compile_matcher();
        Ok(Rule::Glob {
            id,
            pattern: pattern.to_string(),
            matcher,
            hits: AtomicU64::new(hits),
        })
    }

    pub fn from_record(record: &BlacklistRecord) -> Result<Self, BlacklistError> {
        if record.is_glob {
            Self::glob(record.id, &record.pattern, record.hits)
        } else {
            Self::regex(record.id, &record.pattern, record.hits)
        }
    }

    pub fn id(&self) -> Id {
        match self {
            Rule::Regex { id, .. } | Rule::Glob { id, .. } => *id,
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            Rule::Regex { pattern, .. } | Rule::Glob { pattern, .. } => pattern,
        }
    }

    pub fn is_glob(&self) -> bool {
        matches!(self, Rule::Glob { .. })
    }

    pub fn hits(&self) -> u64 {
        self.counter().load(Ordering::Relaxed)
    }

    fn counter(&self) -> &AtomicU64 {
        match self {
            Rule::Regex { hits, .. } | Rule::Glob { hits, .. } => hits,
        }
    }

    fn is_match(&self, name: &str) -> bool {
        match self {
            Rule::Regex { regex, .. } => regex.is_match(name),
            Rule::Glob { matcher, .. } => matcher.is_match(name),
        }
    }

    fn to_record(&self) -> BlacklistRecord {
        BlacklistRecord {
            id: self.id(),
            pattern: self.pattern().to_string(),
            is_glob: self.is_glob(),
            hits: self.hits(),
        }
    }
}

fn invalid(pattern: &str, err: impl std::fmt::Display) -> BlacklistError {
    BlacklistError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    }
}

/// An ordered, thread-safe set of rules.
#[derive(Debug, Default)]
pub struct Blacklist {
    rules: RwLock<Vec<Rule>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted rows, keeping their hit counts.
    pub fn from_records(records: &[BlacklistRecord]) -> Result<Self, BlacklistError> {
        let mut rules = records
            .iter()
            .map(Rule::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        sort_by_hits(&mut rules);
        Ok(Self {
            rules: RwLock::new(rules),
        })
    }

    pub fn add(&self, rule: Rule) {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        rules.push(rule);
        sort_by_hits(&mut rules);
    }

    pub fn len(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Does any rule match the base name of `path`?
    pub fn matches(&self, path: impl AsRef<Path>) -> bool {
        self.match_rule(path).is_some()
    }

    /// Id of the first rule matching the base name of `path`.
    pub fn match_rule(&self, path: impl AsRef<Path>) -> Option<Id> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(OsStr::to_string_lossy)
            .unwrap_or_else(|| path.as_os_str().to_string_lossy());

        let (position, id) = {
            let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
            let position = rules.iter().position(|rule| rule.is_match(&name))?;
            let rule = &rules[position];
            rule.counter().fetch_add(1, Ordering::Relaxed);
            (position, rule.id())
        };
        trace!(name = %name, rule = id, "Blacklisted");

        if position > 0 {
            let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            sort_by_hits(&mut rules);
        }
        Some(id)
    }

    /// Current rules in match order.
    pub fn rules(&self) -> Vec<BlacklistRecord> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Rule::to_record)
            .collect()
    }
}

// Stable, so ties keep their insertion order.
fn sort_by_hits(rules: &mut [Rule]) {
    rules.sort_by(|a, b| b.hits().cmp(&a.hits()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferret_db::schema::SEED_RULES;

    fn seeded() -> Blacklist {
        let records: Vec<_> = SEED_RULES
            .iter()
            .enumerate()
            .map(|(i, (pattern, is_glob))| BlacklistRecord {
                id: i as Id + 1,
                pattern: pattern.to_string(),
                is_glob: *is_glob,
                hits: 0,
            })
            .collect();
        Blacklist::from_records(&records).unwrap()
    }

    #[test]
    fn empty_never_matches() {
        let bl = Blacklist::new();
        assert!(bl.is_empty());
        assert!(!bl.matches("/anything/at/all"));
    }

    #[test]
    fn seed_rules_match_base_names() {
        let bl = seeded();
        assert!(bl.matches("/home/u/.bashrc"));
        assert!(bl.matches("/home/u/#draft#"));
        assert!(bl.matches("/home/u/notes.txt~"));
        assert!(bl.matches("/src/.main.rs.swp"));
        assert!(bl.matches("/src/main.o"));
        assert!(bl.matches("/py/__pycache__"));
        assert!(bl.matches("/web/node_modules"));
        assert!(bl.matches("/lost+found"));

        assert!(!bl.matches("/home/u/notes.txt"));
        // only the base name is considered
        assert!(!bl.matches("/home/.hidden/notes.txt"));
    }

    #[test]
    fn globs_are_case_sensitive() {
        let bl = Blacklist::new();
        bl.add(Rule::glob(1, "*.bak", 0).unwrap());
        assert!(bl.matches("/a/b.bak"));
        assert!(!bl.matches("/a/b.BAK"));
    }

    #[test]
    fn match_rule_returns_id_and_counts() {
        let bl = Blacklist::new();
        bl.add(Rule::glob(7, "*.tmp", 0).unwrap());
        assert_eq!(bl.match_rule("/x/y.tmp"), Some(7));
        assert_eq!(bl.match_rule("/x/y.txt"), None);
        assert_eq!(bl.rules()[0].hits, 1);
    }

    #[test]
    fn hits_reorder_rules() {
        let bl = Blacklist::new();
        bl.add(Rule::glob(1, "*.a", 0).unwrap());
        bl.add(Rule::glob(2, "*.b", 0).unwrap());
        bl.add(Rule::regex(3, r"\.c$", 0).unwrap());

        bl.matches("x.c");
        bl.matches("y.c");
        bl.matches("z.b");

        let order: Vec<Id> = bl.rules().iter().map(|r| r.id).collect();
        assert_eq!(order, vec![3, 2, 1]);
        assert_eq!(bl.rules()[0].hits, 2);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let bl = Blacklist::new();
        bl.add(Rule::glob(1, "*.a", 0).unwrap());
        bl.add(Rule::glob(2, "*.b", 0).unwrap());
        bl.add(Rule::glob(3, "*.c", 0).unwrap());
        bl.matches("q.c");
        bl.matches("q.b");

        let order: Vec<Id> = bl.rules().iter().map(|r| r.id).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn from_records_orders_by_persisted_hits() {
        let records = vec![
            BlacklistRecord { id: 1, pattern: "*.a".into(), is_glob: true, hits: 1 },
            BlacklistRecord { id: 2, pattern: "b$".into(), is_glob: false, hits: 9 },
        ];
        let bl = Blacklist::from_records(&records).unwrap();
        let rules = bl.rules();
        assert_eq!(rules[0].id, 2);
        assert!(!rules[0].is_glob);
        assert_eq!(rules[1].hits, 1);
    }

    #[test]
    fn invalid_patterns_rejected() {
        assert!(matches!(
            Rule::regex(1, "(unclosed", 0),
            Err(BlacklistError::InvalidPattern { .. })
        ));
        assert!(matches!(
            Rule::glob(1, "[unclosed", 0),
            Err(BlacklistError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn concurrent_matching() {
        let bl = std::sync::Arc::new(seeded());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let bl = std::sync::Arc::clone(&bl);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(bl.matches("/p/x.pyc"));
                        assert!(!bl.matches("/p/x.py"));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let rules = bl.rules();
        assert_eq!(rules[0].pattern, "*.pyc");
        assert_eq!(rules[0].hits, 400);
    }
}
