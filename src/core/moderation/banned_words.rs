// Banned word matcher - normalized term set plus lexical detection.
//
// The store is the source of truth; the matcher keeps a read-mostly copy that
// is refreshed whenever an administrator adds or removes terms.

use std::collections::{BTreeSet, HashSet};
use tokio::sync::RwLock;

/// Separator for administrator-supplied term lists.
pub const TERM_DELIMITER: char = ',';

/// Split, trim, lowercase and drop empties. Duplicates collapse.
pub fn normalize_terms(raw: &str) -> BTreeSet<String> {
    raw.split(TERM_DELIMITER)
        .map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty())
        .collect()
}

/// Result of an add request, both sides in normalized form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddTermsOutcome {
    pub added: BTreeSet<String>,
    pub skipped: BTreeSet<String>,
}

/// Result of a remove request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveTermsOutcome {
    pub removed: BTreeSet<String>,
    pub not_found: BTreeSet<String>,
}

/// Which rule produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Token,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermMatch {
    pub term: String,
    pub rule: MatchRule,
}

/// Cached banned-word set.
#[derive(Default)]
pub struct BannedWordMatcher {
    terms: RwLock<HashSet<String>>,
}

impl BannedWordMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached set, e.g. after loading from the store.
    pub async fn replace_all<I>(&self, terms: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut cached = self.terms.write().await;
        *cached = terms.into_iter().collect();
    }

    pub async fn insert_cached<'a, I>(&self, terms: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut cached = self.terms.write().await;
        cached.extend(terms.into_iter().cloned());
    }

    pub async fn remove_cached<'a, I>(&self, terms: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut cached = self.terms.write().await;
        for term in terms {
            cached.remove(term);
        }
    }

    pub async fn len(&self) -> usize {
        self.terms.read().await.len()
    }

    /// Return the first banned term found in `text`, if any.
    ///
    /// Each term is tried first against the whole-word tokens of the text, then
    /// as a plain substring. The substring rule deliberately catches obfuscated
    /// embeddings at the cost of false positives ("ass" in "classical").
    pub async fn contains_violation(&self, text: &str) -> Option<TermMatch> {
        let terms = self.terms.read().await;
        find_violation(terms.iter().map(String::as_str), text)
    }
}

/// Matching over any term iterator. Which term wins when several match is
/// unspecified.
pub fn find_violation<'a, I>(terms: I, text: &str) -> Option<TermMatch>
where
    I: IntoIterator<Item = &'a str>,
{
    let lowered = text.to_lowercase();
    let tokens: HashSet<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .collect();

    for term in terms {
        if tokens.contains(term) {
            return Some(TermMatch {
                term: term.to_string(),
                rule: MatchRule::Token,
            });
        }
        if lowered.contains(term) {
            return Some(TermMatch {
                term: term.to_string(),
                rule: MatchRule::Substring,
            });
        }
    }
    None
}

/// Byte budget for one rendered term list. Two lists plus their labels stay
/// under Discord's 2000-character message limit.
pub const MAX_LISTED_BYTES: usize = 800;

/// Render a set for an administrator reply, cut short with "…and N more"
/// once the list would pass `MAX_LISTED_BYTES`.
pub fn format_terms(terms: &BTreeSet<String>) -> String {
    if terms.is_empty() {
        return "none".to_string();
    }

    let mut out = String::new();
    let mut listed = 0;
    for term in terms {
        let separator = if out.is_empty() { "" } else { ", " };
        if out.len() + separator.len() + term.len() > MAX_LISTED_BYTES {
            break;
        }
        out.push_str(separator);
        out.push_str(term);
        listed += 1;
    }

    let rest = terms.len() - listed;
    match (rest, out.is_empty()) {
        (0, _) => out,
        (_, true) => format!("…and {} more", rest),
        (_, false) => format!("{} …and {} more", out, rest),
    }
}
