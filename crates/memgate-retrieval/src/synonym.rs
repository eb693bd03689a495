use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Upper bound on terms passed to the hybrid retrieval keyword arm (§4.4).
pub const MAX_EXPANSIONS: usize = 5;

/// In-memory synonym table, loaded at startup from `synonym_map` and
/// refreshable at runtime. Forward map is `term -> group`; reverse map is
/// `any synonym (lower-cased) -> group`, so looking a hit up in either
/// direction returns the whole group (§3, §4.4).
#[derive(Default)]
pub struct SynonymExpander {
    reverse: RwLock<HashMap<String, Vec<String>>>,
}

impl SynonymExpander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the loaded table. `groups` is `term -> [synonyms]`; the
    /// synonyms themselves (not the term) are what the reverse index is
    /// built from, mirroring the `synonym_map` row shape.
    pub fn load(&self, groups: &HashMap<String, Vec<String>>) {
        let mut reverse = HashMap::new();
        for synonyms in groups.values() {
            for syn in synonyms {
                reverse.insert(syn.to_lowercase(), synonyms.clone());
            }
        }
        *self.reverse.write().unwrap() = reverse;
    }

    /// Tokenizes `query`, expands each token against the reverse synonym
    /// index, and returns the union bounded to [`MAX_EXPANSIONS`] terms.
    /// The original query is always included first.
    pub fn expand(&self, query: &str) -> Vec<String> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let tokens = tokenize(query);
        let reverse = self.reverse.read().unwrap();

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        seen.insert(query.to_string());
        out.push(query.to_string());

        for token in &tokens {
            if out.len() >= MAX_EXPANSIONS {
                break;
            }
            if seen.insert(token.clone()) {
                out.push(token.clone());
            }
        }

        'tokens: for token in &tokens {
            let lower = token.to_lowercase();
            if let Some(group) = reverse.get(&lower).or_else(|| reverse.get(token)) {
                for syn in group {
                    if out.len() >= MAX_EXPANSIONS {
                        break 'tokens;
                    }
                    if seen.insert(syn.clone()) {
                        out.push(syn.clone());
                    }
                }
            }
        }

        out
    }
}

/// Splits `text` into CJK runs, Latin runs, and digit runs, then for each
/// CJK token of length > 2 also emits every contiguous substring of length
/// 2..=4 (so "角色扮演" contributes "角色", "色扮", "扮演", "角色扮", ...).
fn tokenize(text: &str) -> Vec<String> {
    #[derive(PartialEq, Clone, Copy)]
    enum Class {
        Cjk,
        Latin,
        Digit,
        Other,
    }

    fn classify(c: char) -> Class {
        if c.is_ascii_digit() {
            Class::Digit
        } else if c.is_ascii_alphabetic() {
            Class::Latin
        } else if is_cjk(c) {
            Class::Cjk
        } else {
            Class::Other
        }
    }

    let mut runs: Vec<(Class, String)> = Vec::new();
    let mut current_class: Option<Class> = None;
    let mut current = String::new();

    for c in text.chars() {
        let class = classify(c);
        if class == Class::Other {
            if let Some(cls) = current_class.take() {
                runs.push((cls, std::mem::take(&mut current)));
            }
            continue;
        }
        match current_class {
            Some(cls) if cls == class => current.push(c),
            _ => {
                if let Some(cls) = current_class.take() {
                    runs.push((cls, std::mem::take(&mut current)));
                }
                current_class = Some(class);
                current.push(c);
            }
        }
    }
    if let Some(cls) = current_class {
        runs.push((cls, current));
    }

    let mut out = Vec::new();
    for (class, run) in runs {
        let char_count = run.chars().count();
        out.push(run.clone());
        if class == Class::Cjk && char_count > 2 {
            let chars: Vec<char> = run.chars().collect();
            for n in 2..=4.min(chars.len()) {
                for start in 0..=(chars.len() - n) {
                    let ngram: String = chars[start..start + n].iter().collect();
                    out.push(ngram);
                }
            }
        }
    }

    let mut seen = HashSet::new();
    out.retain(|t| seen.insert(t.clone()));
    out
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_mixed_script_runs() {
        let tokens = tokenize("test123角色扮演");
        assert!(tokens.contains(&"test".to_string()));
        assert!(tokens.contains(&"123".to_string()));
        assert!(tokens.contains(&"角色扮演".to_string()));
        assert!(tokens.contains(&"角色".to_string()));
        assert!(tokens.contains(&"扮演".to_string()));
    }

    #[test]
    fn expand_always_includes_original_query_first() {
        let exp = SynonymExpander::new();
        let out = exp.expand("hello world");
        assert_eq!(out[0], "hello world");
    }

    #[test]
    fn expand_unions_synonym_group() {
        let exp = SynonymExpander::new();
        let mut groups = HashMap::new();
        groups.insert(
            "dragon".to_string(),
            vec!["dragon".to_string(), "wyrm".to_string(), "drake".to_string()],
        );
        exp.load(&groups);

        let out = exp.expand("dragon");
        assert!(out.contains(&"wyrm".to_string()));
        assert!(out.contains(&"drake".to_string()));
    }

    #[test]
    fn expand_is_bounded_to_max_expansions() {
        let exp = SynonymExpander::new();
        let out = exp.expand("角色扮演测试比赛冠军");
        assert!(out.len() <= MAX_EXPANSIONS);
    }
}
