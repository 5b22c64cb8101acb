//! Technician name recovery: parse the OCR'd "by First L Role" line, then map
//! the candidate onto the configured roster.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::config::NormalizerConfig;
use crate::similarity::SimilarityMetric;

/// Stored in place of a technician name when nothing on the roster matches.
pub const UNKNOWN_TECHNICIAN: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Correction,
    Fuzzy,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameMatch {
    pub name: String,
    pub confidence: f64,
    pub kind: MatchKind,
}

impl NameMatch {
    fn unknown() -> Self {
        Self {
            name: UNKNOWN_TECHNICIAN.to_string(),
            confidence: 0.0,
            kind: MatchKind::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        self.kind != MatchKind::Unknown
    }
}

/// Maps noisy OCR names to canonical roster entries.
///
/// Lookup order, first hit wins:
/// 1. case-insensitive exact roster match (confidence 1.0)
/// 2. correction table (confidence 1.0)
/// 3. best similarity against every roster entry, accepted at or above
///    `min_similarity` with the score as confidence
///
/// Anything else is `UNKNOWN` with confidence 0.0.
#[derive(Debug, Clone)]
pub struct NameNormalizer {
    roster: Vec<String>,
    /// Keyed by lowercased raw reading.
    corrections: HashMap<String, String>,
    min_similarity: f64,
    metric: SimilarityMetric,
}

impl NameNormalizer {
    pub fn new(config: &NormalizerConfig) -> Self {
        let mut normalizer = Self {
            roster: Vec::with_capacity(config.roster.len()),
            corrections: config
                .corrections
                .iter()
                .map(|(raw, canon)| (squash(raw).to_lowercase(), canon.clone()))
                .collect(),
            min_similarity: config.min_similarity,
            metric: config.metric,
        };
        for name in &config.roster {
            normalizer.add_known(name);
        }
        normalizer
    }

    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    /// Add a technician to the roster. Blank and duplicate (case-insensitive)
    /// names are ignored; the roster stays sorted.
    pub fn add_known(&mut self, name: &str) -> bool {
        let name = squash(name);
        if name.is_empty() || self.find_exact(&name).is_some() {
            return false;
        }
        let pos = self.roster.binary_search(&name).unwrap_or_else(|p| p);
        self.roster.insert(pos, name);
        true
    }

    pub fn normalize(&self, raw: &str) -> NameMatch {
        let candidate = squash(raw);
        if candidate.is_empty() {
            return NameMatch::unknown();
        }

        if let Some(canon) = self.find_exact(&candidate) {
            return NameMatch {
                name: canon.clone(),
                confidence: 1.0,
                kind: MatchKind::Exact,
            };
        }

        if let Some(canon) = self.corrections.get(&candidate.to_lowercase()) {
            return NameMatch {
                name: canon.clone(),
                confidence: 1.0,
                kind: MatchKind::Correction,
            };
        }

        let mut best: Option<(&String, f64)> = None;
        for known in &self.roster {
            let score = self.metric.ratio(&candidate, known);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((known, score));
            }
        }

        match best {
            Some((known, score)) if score >= self.min_similarity => {
                log::debug!("[names] {candidate:?} ~ {known:?} ({score:.3})");
                NameMatch {
                    name: known.clone(),
                    confidence: score,
                    kind: MatchKind::Fuzzy,
                }
            }
            _ => {
                log::debug!("[names] {candidate:?} matched nothing on the roster");
                NameMatch::unknown()
            }
        }
    }

    fn find_exact(&self, name: &str) -> Option<&String> {
        self.roster.iter().find(|known| known.eq_ignore_ascii_case(name))
    }
}

/// Trim and collapse internal whitespace.
fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Technician line ──────────────────────────────────────────────────────────

/// What could be read off the printed "by Darren B Tech" line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechnicianLine {
    /// "First L" when the line matched, otherwise the cleaned text.
    pub name: String,
    pub role: Option<String>,
}

fn line_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // by Darren B Tech / by Darren B Ld Tech
            Regex::new(r"(?i)\bby\s+([a-z]{2,})\s+([a-z])\s+(?:ld\s+)?([a-z]{2,})").expect("valid regex"),
            // by Darren BTech
            Regex::new(r"(?i)\bby\s+([a-z]{2,})\s+([a-z])([a-z]{2,})").expect("valid regex"),
            // by Darren B
            Regex::new(r"(?i)\bby\s+([a-z]{2,})\s+([a-z])").expect("valid regex"),
        ]
    })
}

fn punctuation() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("valid regex"))
}

/// Clean a raw OCR line and pull out the technician's "First L" and role.
pub fn parse_technician_line(raw: &str) -> TechnicianLine {
    let text: String = raw
        .chars()
        .filter(|c| *c != '/' && *c != '\\')
        .map(|c| if c == '|' { 'I' } else { c })
        .collect();
    let text = squash(&punctuation().replace_all(&text, " "));

    for re in line_patterns() {
        if let Some(caps) = re.captures(&text) {
            let first = title_case(&caps[1]);
            let initial = caps[2].to_uppercase();
            return TechnicianLine {
                name: format!("{first} {initial}"),
                role: caps.get(3).map(|m| m.as_str().to_string()),
            };
        }
    }

    TechnicianLine { name: text, role: None }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
