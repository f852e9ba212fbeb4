//! BM25 keyword index over tokenized memory content.

use std::collections::HashMap;

/// English stop words skipped by the tokenizer.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'          // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}'        // Extension A
        | '\u{F900}'..='\u{FAFF}'        // Compatibility Ideographs
        | '\u{3040}'..='\u{30FF}'        // Hiragana + Katakana
        | '\u{AC00}'..='\u{D7AF}'        // Hangul Syllables
    )
}

/// Lowercases, strips punctuation, skips stop words, and emits each CJK
/// character as its own token.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if is_cjk(c) {
            if !current.is_empty() {
                if !is_stop_word(&current) {
                    tokens.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            if !is_stop_word(&current) {
                tokens.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if !current.is_empty() && !is_stop_word(&current) {
        tokens.push(current);
    }
    tokens
}

struct DocMeta {
    session_id: String,
    length: usize,
}

/// Inverted index with BM25 scoring (`k1`, `b`, mean-document-length
/// normalization). Searches are scoped to one session.
pub struct Bm25Index {
    k1: f64,
    b: f64,
    docs: HashMap<String, DocMeta>,
    /// term -> doc id -> term frequency
    postings: HashMap<String, HashMap<String, u32>>,
}

impl Bm25Index {
    pub fn new(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            docs: HashMap::new(),
            postings: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Indexes (or re-indexes) a document.
    pub fn add(&mut self, doc_id: &str, session_id: &str, content: &str) {
        self.remove(doc_id);
        let tokens = tokenize(content);
        let length = tokens.len();
        for token in tokens {
            *self
                .postings
                .entry(token)
                .or_default()
                .entry(doc_id.to_string())
                .or_insert(0) += 1;
        }
        self.docs.insert(
            doc_id.to_string(),
            DocMeta {
                session_id: session_id.to_string(),
                length,
            },
        );
    }

    pub fn remove(&mut self, doc_id: &str) {
        if self.docs.remove(doc_id).is_none() {
            return;
        }
        self.postings.retain(|_, docs| {
            docs.remove(doc_id);
            !docs.is_empty()
        });
    }

    /// BM25 search within one session, best first.
    pub fn search(&self, session_id: &str, text: &str, limit: usize) -> Vec<(String, f64)> {
        let terms = tokenize(text);
        if terms.is_empty() {
            return Vec::new();
        }

        // Corpus statistics over the session's documents only.
        let session_docs: Vec<(&String, &DocMeta)> = self
            .docs
            .iter()
            .filter(|(_, meta)| meta.session_id == session_id)
            .collect();
        let n = session_docs.len();
        if n == 0 {
            return Vec::new();
        }
        let avg_len = session_docs.iter().map(|(_, m)| m.length).sum::<usize>() as f64
            / n as f64;
        let avg_len = avg_len.max(1.0);

        let mut scores: HashMap<&String, f64> = HashMap::new();
        for term in &terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs
                .keys()
                .filter(|id| {
                    self.docs
                        .get(*id)
                        .is_some_and(|m| m.session_id == session_id)
                })
                .count();
            if df == 0 {
                continue;
            }
            let idf = (((n as f64 - df as f64 + 0.5) / (df as f64 + 0.5)) + 1.0).ln();

            for (doc_id, &tf) in docs {
                let Some(meta) = self.docs.get(doc_id) else {
                    continue;
                };
                if meta.session_id != session_id {
                    continue;
                }
                let tf = f64::from(tf);
                let norm = self.k1 * (1.0 - self.b + self.b * meta.length as f64 / avg_len);
                let term_score = idf * tf * (self.k1 + 1.0) / (tf + norm);
                *scores.entry(doc_id).or_insert(0.0) += term_score;
            }
        }

        let mut ranked: Vec<(String, f64)> = scores
            .into_iter()
            .map(|(id, score)| (id.clone(), score))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        assert_eq!(
            tokenize("Machine Learning, again!"),
            vec!["machine", "learning", "again"]
        );
    }

    #[test]
    fn test_tokenize_skips_stop_words() {
        assert_eq!(tokenize("the cat and the hat"), vec!["cat", "hat"]);
    }

    #[test]
    fn test_tokenize_cjk_per_character() {
        assert_eq!(tokenize("机器学习"), vec!["机", "器", "学", "习"]);
        assert_eq!(tokenize("rust与机器"), vec!["rust", "与", "机", "器"]);
    }

    #[test]
    fn test_search_ranks_by_relevance() {
        let mut index = Bm25Index::new(1.2, 0.75);
        index.add("d1", "s1", "machine learning with rust");
        index.add("d2", "s1", "deep learning");
        index.add("d3", "s1", "cooking recipes");

        let results = index.search("s1", "machine learning", 10);
        assert_eq!(results[0].0, "d1");
        assert!(results.iter().any(|(id, _)| id == "d2"));
        assert!(!results.iter().any(|(id, _)| id == "d3"));
    }

    #[test]
    fn test_search_is_session_scoped() {
        let mut index = Bm25Index::new(1.2, 0.75);
        index.add("d1", "s1", "shared topic words");
        index.add("d2", "s2", "shared topic words");

        let results = index.search("s1", "shared topic", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "d1");
    }

    #[test]
    fn test_remove_drops_document() {
        let mut index = Bm25Index::new(1.2, 0.75);
        index.add("d1", "s1", "ephemeral entry");
        index.remove("d1");
        assert!(index.search("s1", "ephemeral", 10).is_empty());
        assert!(index.is_empty());
    }
}
