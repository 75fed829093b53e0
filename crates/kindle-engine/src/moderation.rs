//! Message moderation.
//!
//! Two tiers. Hard patterns (contact details, links, explicit terms) block
//! outright. Text that clears them goes to a [`SecondaryClassifier`] which
//! scores soft categories; the summed score decides between allow, allow
//! with masking, and block.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use kindle_types::models::{ModerationCategory, ModerationClassification, ModerationVerdict};

/// Scores at or above this block the message.
pub const BLOCK_THRESHOLD: u8 = 60;
/// Scores at or above this (and below the block threshold) are masked.
pub const MASK_THRESHOLD: u8 = 30;

struct HardPattern {
    category: ModerationCategory,
    regex: Regex,
}

fn hard(category: ModerationCategory, pattern: &str) -> HardPattern {
    HardPattern {
        category,
        regex: Regex::new(pattern).expect("moderation pattern must compile"),
    }
}

static HARD_PATTERNS: LazyLock<Vec<HardPattern>> = LazyLock::new(|| {
    use ModerationCategory::*;
    vec![
        // Phone-like runs: eight or more digits, separators allowed
        hard(ContactInfo, r"(?:\+?\d[\s().\-]*){8,}"),
        hard(ContactInfo, r"(?i)\b[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}\b"),
        hard(ContactInfo, r"(?i)(?:^|\s)@[a-z0-9_.]{3,30}\b"),
        hard(
            ContactInfo,
            r"(?i)\b(?:insta(?:gram)?|whats?app|wpp|zap|telegram|snap(?:chat)?|tik\s?tok)\s*:\s*@?[a-z0-9_.\-]{3,}",
        ),
        hard(
            ContactInfo,
            r"(?i)\b(?:me\s+)?(?:chama|manda|fala|add|adiciona)\s+(?:no|na|pelo|pela)\s+(?:insta(?:gram)?|whats(?:app)?|zap|wpp|telegram|snap|face(?:book)?|tik\s?tok)\b",
        ),
        hard(
            ContactInfo,
            r"(?i)\b(?:add|text|call|dm|message|find)\s+me\s+(?:on|at)\s+(?:insta(?:gram)?|whatsapp|telegram|snap(?:chat)?|facebook|tik\s?tok|signal)\b",
        ),
        hard(ExternalLink, r"(?i)\bhttps?://\S+"),
        hard(ExternalLink, r"(?i)\bwww\.\S+"),
        hard(
            ExternalLink,
            r"(?i)\b[a-z0-9\-]+\.(?:com|net|org|br|io|me|tv|app|xyz|site|link|bio|ly|ee)(?:/\S*)?\b",
        ),
        hard(
            Explicit,
            r"(?i)\b(?:nudes?|sexting|onlyfans|cam\s*(?:girl|boy)|sugar\s*(?:daddy|mommy|baby)|transar|trepar|xoxota|buceta|conte[uú]do\s+adulto)\b",
        ),
    ]
});

struct SoftPattern {
    category: ModerationCategory,
    regex: Regex,
}

fn soft(category: ModerationCategory, pattern: &str) -> SoftPattern {
    SoftPattern {
        category,
        regex: Regex::new(pattern).expect("moderation pattern must compile"),
    }
}

static SOFT_PATTERNS: LazyLock<Vec<SoftPattern>> = LazyLock::new(|| {
    use ModerationCategory::*;
    vec![
        soft(
            Profanity,
            r"(?i)\b(?:porra|caralho|merda|bosta|cacete|fdp|vsf|pqp|fuck(?:ing)?|shit|bitch|asshole)\b",
        ),
        // Five or more shouted words in a row
        soft(Spam, r"\b[A-Z]{2,}(?:\s+[A-Z]{2,}){4,}\b"),
        soft(
            Harassment,
            r"(?i)\b(?:vou\s+te\s+(?:matar|pegar|ca[cç]ar|encontrar)|sei\s+onde\s+(?:voc[eê]|vc|tu)\s+(?:mora|trabalha|estuda)|i\s+know\s+where\s+you\s+(?:live|work)|i(?:'ll|\s+will)\s+(?:kill|find|hurt)\s+you)\b",
        ),
        soft(
            Scam,
            r"(?i)\b(?:ganhe\s+dinheiro|renda\s+extra|(?:pix|transfere|deposita)\s+(?:primeiro|antes|pra\s+mim)|(?:investimento|bitcoin|btc|cripto|forex)\s+(?:garantido|rendimento|lucro)|send\s+me\s+money|gift\s+cards?|wire\s+transfer|guaranteed\s+(?:profits?|returns?))\b",
        ),
        soft(
            HateSpeech,
            r"(?i)\b(?:nazista|(?:macaco|crioulo)\s+(?:lixo|nojento|fedido)|(?:gay|viado|traveco|trans)\s+(?:lixo|nojento|doente)|(?:mulher|homem)\s+(?:lixo|inferior))\b",
        ),
    ]
});

/// Points a single finding adds to the score.
pub fn weight(category: ModerationCategory) -> u8 {
    use ModerationCategory::*;
    match category {
        Profanity | Spam => 10,
        Harassment | Scam | HateSpeech => 60,
        ContactInfo | ExternalLink | Explicit | ClassifierUnavailable => 100,
    }
}

/// One flagged fragment of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub category: ModerationCategory,
    pub fragment: String,
}

#[derive(Debug, Error)]
#[error("Classifier unavailable: {0}")]
pub struct ClassifierUnavailable(pub String);

/// Second-tier scorer for soft categories. May call out to a remote model.
pub trait SecondaryClassifier: Send + Sync {
    fn findings(&self, text: &str) -> Result<Vec<Finding>, ClassifierUnavailable>;
}

/// What to do when the secondary classifier cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Closed,
    Open,
}

/// Local pattern and shape heuristics.
#[derive(Debug, Default)]
pub struct HeuristicClassifier;

impl SecondaryClassifier for HeuristicClassifier {
    fn findings(&self, text: &str) -> Result<Vec<Finding>, ClassifierUnavailable> {
        let mut findings = Vec::new();
        for pattern in SOFT_PATTERNS.iter() {
            for m in pattern.regex.find_iter(text) {
                findings.push(Finding {
                    category: pattern.category,
                    fragment: m.as_str().to_string(),
                });
            }
        }
        if let Some(run) = repeated_char_run(text, 5) {
            findings.push(Finding {
                category: ModerationCategory::Spam,
                fragment: run,
            });
        }
        if let Some(word) = repeated_word(text, 3) {
            findings.push(Finding {
                category: ModerationCategory::Spam,
                fragment: word,
            });
        }
        Ok(findings)
    }
}

/// First run of the same character repeated at least `min` times.
fn repeated_char_run(text: &str, min: usize) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut start = 0;
    while start < chars.len() {
        let mut end = start + 1;
        while end < chars.len() && chars[end] == chars[start] {
            end += 1;
        }
        if end - start >= min && !chars[start].is_whitespace() {
            return Some(chars[start..end].iter().collect());
        }
        start = end;
    }
    None
}

/// A word of three or more letters repeated `times` times back to back.
fn repeated_word(text: &str, times: usize) -> Option<String> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .collect();
    let mut run = 1;
    for pair in words.windows(2) {
        if pair[0] == pair[1] && pair[0].chars().count() >= 3 {
            run += 1;
            if run >= times {
                return Some(pair[1].clone());
            }
        } else {
            run = 1;
        }
    }
    None
}

/// Keep the first and last character, star the rest.
pub fn mask(fragment: &str) -> String {
    let chars: Vec<char> = fragment.chars().collect();
    match chars.len() {
        0 => String::new(),
        1 | 2 => "*".repeat(chars.len()),
        n => {
            let mut out = String::with_capacity(fragment.len());
            out.push(chars[0]);
            out.extend(std::iter::repeat_n('*', n - 2));
            out.push(chars[n - 1]);
            out
        }
    }
}

pub struct ModerationFilter {
    secondary: Box<dyn SecondaryClassifier>,
    policy: FailurePolicy,
    allow_list: HashSet<String>,
}

impl ModerationFilter {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            secondary: Box::new(HeuristicClassifier),
            policy,
            allow_list: HashSet::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn SecondaryClassifier>) -> Self {
        self.secondary = classifier;
        self
    }

    pub fn with_allow_list<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allow_list
            .extend(terms.into_iter().map(|t| t.as_ref().trim().to_lowercase()));
        self
    }

    fn allowed_term(&self, fragment: &str) -> bool {
        self.allow_list.contains(&fragment.trim().to_lowercase())
    }

    /// Classify a message body. Pure apart from the secondary classifier.
    pub fn classify(&self, text: &str) -> ModerationVerdict {
        for pattern in HARD_PATTERNS.iter() {
            let hit = pattern
                .regex
                .find_iter(text)
                .any(|m| !self.allowed_term(m.as_str()));
            if hit {
                return ModerationVerdict::blocked(pattern.category, weight(pattern.category));
            }
        }

        let findings = match self.secondary.findings(text) {
            Ok(findings) => findings,
            Err(e) => {
                warn!("Secondary moderation failed ({:?} policy): {}", self.policy, e);
                return match self.policy {
                    FailurePolicy::Closed => ModerationVerdict::blocked(
                        ModerationCategory::ClassifierUnavailable,
                        weight(ModerationCategory::ClassifierUnavailable),
                    ),
                    FailurePolicy::Open => ModerationVerdict::allowed(),
                };
            }
        };

        let findings: Vec<Finding> = findings
            .into_iter()
            .filter(|f| !self.allowed_term(&f.fragment))
            .collect();

        let total: u32 = findings.iter().map(|f| weight(f.category) as u32).sum();
        let score = total.min(100) as u8;
        let worst = findings
            .iter()
            .max_by_key(|f| weight(f.category))
            .map(|f| f.category);

        if score >= BLOCK_THRESHOLD {
            if let Some(category) = worst {
                return ModerationVerdict::blocked(category, score);
            }
        }

        if score >= MASK_THRESHOLD {
            let mut sanitized = text.to_string();
            for finding in &findings {
                sanitized = sanitized.replace(&finding.fragment, &mask(&finding.fragment));
            }
            return ModerationVerdict {
                classification: ModerationClassification::Allowed,
                category: worst,
                score,
                sanitized: Some(sanitized),
            };
        }

        ModerationVerdict {
            classification: ModerationClassification::Allowed,
            category: worst,
            score,
            sanitized: None,
        }
    }
}

impl Default for ModerationFilter {
    fn default() -> Self {
        Self::new(FailurePolicy::Closed)
    }
}
