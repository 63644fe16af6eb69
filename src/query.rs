//! Rule-based query analysis: intent, keywords, rewrites, weight split.
//!
//! The analyzer is deliberately simple — cue-word lists and templates —
//! and always produces a usable [`QueryAnalysis`]. The downstream fusion
//! stage does the heavy lifting; this stage only decides *what* to search
//! for and how to split effort between the semantic and keyword phases.

use std::collections::{HashMap, HashSet};

use crate::models::{QueryAnalysis, QueryIntent, SearchWeights};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "do", "does", "did", "of", "in",
    "on", "at", "to", "for", "with", "about", "and", "or", "but", "what", "which", "who", "whom",
    "when", "where", "why", "how", "i", "you", "we", "they", "it", "this", "that", "my", "your",
    "me", "us", "them", "can", "could", "would", "should", "will", "there", "please",
];

/// Common misspellings corrected before analysis.
const TYPO_FIXES: &[(&str, &str)] = &[
    ("shedule", "schedule"),
    ("scedule", "schedule"),
    ("meating", "meeting"),
    ("projct", "project"),
    ("recieve", "receive"),
    ("adress", "address"),
];

pub struct QueryProcessor;

impl QueryProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn process(&self, query: &str) -> QueryAnalysis {
        let cleaned = clean_query(query);
        let intent = detect_intent(&cleaned);
        let keywords = extract_keywords(&cleaned);
        let entities = extract_entities(&cleaned);
        let rewritten_queries = rewrite_queries(&cleaned, intent, &keywords);
        let weights = weights_for(intent);

        QueryAnalysis {
            original_query: query.to_string(),
            intent,
            keywords,
            entities,
            rewritten_queries,
            // Rule analysis carries middling confidence by construction.
            confidence: 0.5,
            weights,
        }
    }
}

impl Default for QueryProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn clean_query(query: &str) -> String {
    let mut q = query.split_whitespace().collect::<Vec<_>>().join(" ");
    for (typo, fix) in TYPO_FIXES {
        if q.to_lowercase().contains(typo) {
            q = replace_case_insensitive(&q, typo, fix);
        }
    }
    q
}

/// ASCII-case-insensitive replacement. Matching is done over the original
/// string with `eq_ignore_ascii_case`, never over a lowercased copy whose
/// byte offsets could diverge from the original (`to_lowercase` can change
/// byte length for characters like `İ`).
fn replace_case_insensitive(text: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if i + from.len() <= text.len()
            && text.is_char_boundary(i + from.len())
            && text[i..i + from.len()].eq_ignore_ascii_case(from)
        {
            out.push_str(to);
            i += from.len();
        } else {
            let mut j = i + 1;
            while !text.is_char_boundary(j) {
                j += 1;
            }
            out.push_str(&text[i..j]);
            i = j;
        }
    }
    out
}

fn detect_intent(query: &str) -> QueryIntent {
    let q = query.to_lowercase();
    let has = |cues: &[&str]| cues.iter().any(|c| q.contains(c));

    if has(&["compare", " vs ", "versus", "difference between", "better"]) {
        QueryIntent::Comparative
    } else if has(&["when", "what time", "how long", "what date", "deadline", "schedule"]) {
        QueryIntent::Temporal
    } else if has(&["where", "location", "address", "which place", "which room"]) {
        QueryIntent::Location
    } else if has(&["who is", "who was", "whose", "contact for", "who "]) {
        QueryIntent::Person
    } else if has(&["how do", "how to", "how can", "steps", "process for", "procedure"]) {
        QueryIntent::Procedural
    } else if has(&["what is", "what are", "define", "definition", "explain", "meaning of"]) {
        QueryIntent::Conceptual
    } else if q.ends_with('?') || has(&["did ", "does ", "is ", "are "]) {
        QueryIntent::Factual
    } else {
        QueryIntent::Unknown
    }
}

fn extract_keywords(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(&w.as_str()))
        .fold(Vec::new(), |mut acc, w| {
            if !acc.contains(&w) {
                acc.push(w);
            }
            acc
        })
}

/// Very light entity tagging: years and capitalized mid-sentence words.
fn extract_entities(query: &str) -> HashMap<String, String> {
    let mut entities = HashMap::new();

    for word in query.split_whitespace() {
        let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
        if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
            entities.insert("year".to_string(), trimmed.to_string());
        }
    }

    for word in query.split_whitespace().skip(1) {
        let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
        if trimmed.chars().next().is_some_and(|c| c.is_uppercase()) && trimmed.len() > 1 {
            entities.insert("name".to_string(), trimmed.to_string());
            break;
        }
    }

    entities
}

/// Original query + intent-specific variants + keyword joins, deduplicated
/// in order of generation.
fn rewrite_queries(query: &str, intent: QueryIntent, keywords: &[String]) -> Vec<String> {
    let mut rewritten = vec![query.to_string()];

    match intent {
        QueryIntent::Temporal => {
            rewritten.push(format!("{} schedule", query));
            rewritten.push(format!("{} date and time", query));
        }
        QueryIntent::Location => {
            rewritten.push(format!("{} location", query));
            rewritten.push(format!("where is {}", query));
        }
        QueryIntent::Procedural => {
            rewritten.push(format!("how to {}", query));
            rewritten.push(format!("{} steps", query));
        }
        QueryIntent::Conceptual => {
            rewritten.push(format!("what is {}", query));
            rewritten.push(format!("{} definition", query));
        }
        QueryIntent::Person => {
            rewritten.push(format!("{} contact", query));
        }
        QueryIntent::Comparative | QueryIntent::Factual | QueryIntent::Unknown => {}
    }

    if !keywords.is_empty() {
        rewritten.push(keywords.join(" "));
        // Pairwise keyword combinations, capped so a long question does not
        // explode into dozens of embedding calls.
        let mut pairs = 0;
        'outer: for i in 0..keywords.len() {
            for j in (i + 1)..keywords.len() {
                rewritten.push(format!("{} {}", keywords[i], keywords[j]));
                pairs += 1;
                if pairs >= 6 {
                    break 'outer;
                }
            }
        }
    }

    let mut seen = HashSet::new();
    rewritten.retain(|q| seen.insert(q.clone()));
    rewritten
}

fn weights_for(intent: QueryIntent) -> SearchWeights {
    match intent {
        QueryIntent::Conceptual | QueryIntent::Procedural => SearchWeights {
            semantic: 0.8,
            keyword: 0.2,
        },
        QueryIntent::Temporal | QueryIntent::Location => SearchWeights {
            semantic: 0.5,
            keyword: 0.5,
        },
        _ => SearchWeights {
            semantic: 0.7,
            keyword: 0.3,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporal_intent() {
        let analysis = QueryProcessor::new().process("when is the quarterly review meeting");
        assert_eq!(analysis.intent, QueryIntent::Temporal);
        assert!((analysis.weights.semantic - 0.5).abs() < 1e-6);
        assert!((analysis.weights.keyword - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_conceptual_intent_weights() {
        let analysis = QueryProcessor::new().process("what is the deployment pipeline");
        assert_eq!(analysis.intent, QueryIntent::Conceptual);
        assert!((analysis.weights.semantic - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_weights_sum_to_one() {
        for q in [
            "when is lunch",
            "where is the office",
            "how do I deploy",
            "compare staging and production",
            "tell me about the project",
        ] {
            let analysis = QueryProcessor::new().process(q);
            let sum = analysis.weights.semantic + analysis.weights.keyword;
            assert!((sum - 1.0).abs() < 1e-6, "weights for {:?} sum to {}", q, sum);
        }
    }

    #[test]
    fn test_keywords_filter_stopwords() {
        let analysis = QueryProcessor::new().process("what is the budget for the offsite");
        assert!(analysis.keywords.contains(&"budget".to_string()));
        assert!(analysis.keywords.contains(&"offsite".to_string()));
        assert!(!analysis.keywords.contains(&"the".to_string()));
        assert!(!analysis.keywords.contains(&"what".to_string()));
    }

    #[test]
    fn test_rewrites_include_original_and_dedupe() {
        let analysis = QueryProcessor::new().process("deployment process");
        assert_eq!(analysis.rewritten_queries[0], "deployment process");
        let unique: HashSet<_> = analysis.rewritten_queries.iter().collect();
        assert_eq!(unique.len(), analysis.rewritten_queries.len());
    }

    #[test]
    fn test_typo_correction() {
        let analysis = QueryProcessor::new().process("when is the team meating");
        assert!(analysis.rewritten_queries[0].contains("meeting"));
    }

    #[test]
    fn test_typo_correction_mixed_case() {
        let analysis = QueryProcessor::new().process("Shedule the review");
        assert_eq!(analysis.rewritten_queries[0], "schedule the review");
    }

    #[test]
    fn test_typo_correction_non_ascii_text() {
        // `İ`.to_lowercase() is longer in bytes than `İ`; make sure typo
        // replacement stays on char boundaries around such characters.
        let analysis = QueryProcessor::new().process("İ shedule the sync");
        assert_eq!(analysis.rewritten_queries[0], "İ schedule the sync");
    }

    #[test]
    fn test_whitespace_collapsed() {
        let analysis = QueryProcessor::new().process("  what   is\tthis  ");
        assert_eq!(analysis.rewritten_queries[0], "what is this");
        // original_query keeps the caller's raw text
        assert!(analysis.original_query.contains("  "));
    }

    #[test]
    fn test_year_entity() {
        let analysis = QueryProcessor::new().process("plans for 2026 launch");
        assert_eq!(analysis.entities.get("year").map(String::as_str), Some("2026"));
    }
}
