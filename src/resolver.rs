use crate::domain::FileFormat;

pub const DEFAULT_SIMILARITY_CUTOFF: f64 = 0.5;

const TOKEN_MATCH_SCORE: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct NameResolver {
    candidates: Vec<String>,
    cutoff: f64,
}

impl NameResolver {
    pub fn new(candidates: Vec<String>) -> Self {
        Self::with_cutoff(candidates, DEFAULT_SIMILARITY_CUTOFF)
    }

    pub fn with_cutoff(candidates: Vec<String>, cutoff: f64) -> Self {
        Self { candidates, cutoff }
    }

    pub fn resolve(&self, query: &str) -> Option<&str> {
        let needle = if looks_like_path(query) {
            last_segment(query)
        } else {
            query.trim().to_string()
        };
        self.best_match(&needle)
    }

    /// The server abbreviates "United States" to `us` in paths; unmatched
    /// segments are kept verbatim.
    pub fn resolve_dir_segment(&self, segment: &str) -> String {
        if segment.trim().eq_ignore_ascii_case("us") {
            return "United States".to_string();
        }
        self.best_match(segment)
            .map(str::to_string)
            .unwrap_or_else(|| segment.to_string())
    }

    fn best_match(&self, needle: &str) -> Option<&str> {
        let query = normalize(needle);
        if query.is_empty() {
            return None;
        }
        let mut best: Option<(&str, f64)> = None;
        for candidate in &self.candidates {
            let score = similarity(&query, &normalize(candidate));
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((candidate.as_str(), score));
            }
        }
        best.filter(|(_, score)| *score >= self.cutoff)
            .map(|(name, _)| name)
    }
}

fn looks_like_path(query: &str) -> bool {
    query.contains('/') || query.contains('\\')
}

fn last_segment(query: &str) -> String {
    let trimmed = query.trim().trim_end_matches(['/', '\\']);
    let segment = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    let mut segment = segment.to_string();
    for suffix in FileFormat::ALL
        .iter()
        .map(|format| format.extension())
        .chain([".html", ".kml", ".poly"])
    {
        if let Some(stripped) = segment.strip_suffix(suffix) {
            segment = stripped.to_string();
            break;
        }
    }
    for suffix in ["-latest-free", "-latest"] {
        if let Some(stripped) = segment.strip_suffix(suffix) {
            segment = stripped.to_string();
            break;
        }
    }
    segment
}

fn normalize(value: &str) -> String {
    value
        .split(|ch: char| ch.is_whitespace() || ch == '-' || ch == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn similarity(query: &str, candidate: &str) -> f64 {
    if query == candidate {
        return 1.0;
    }
    let ratio = sequence_ratio(query, candidate);
    if contains_words(candidate, query) {
        return ratio.max(TOKEN_MATCH_SCORE);
    }
    ratio
}

fn contains_words(haystack: &str, words: &str) -> bool {
    let hay: Vec<&str> = haystack
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect();
    let needle: Vec<&str> = words
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect();
    !needle.is_empty() && hay.windows(needle.len()).any(|window| window == needle.as_slice())
}

pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((a_lo, a_hi, b_lo, b_hi)) = pending.pop() {
        let (a_start, b_start, len) = longest_common_run(&a[a_lo..a_hi], &b[b_lo..b_hi]);
        if len == 0 {
            continue;
        }
        matched += len;
        let (a_start, b_start) = (a_lo + a_start, b_lo + b_start);
        pending.push((a_lo, a_start, b_lo, b_start));
        pending.push((a_start + len, a_hi, b_start + len, b_hi));
    }
    matched
}

fn longest_common_run(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut previous = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                current[j + 1] = previous[j] + 1;
                if current[j + 1] > best.2 {
                    best = (i + 1 - current[j + 1], j + 1 - current[j + 1], current[j + 1]);
                }
            }
        }
        previous = current;
    }
    best
}
