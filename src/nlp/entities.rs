//! Entity extraction and enrichment (§4.4 steps 4-5).

use std::collections::HashSet;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::normalize::NormalizedText;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Ipv4,
    Ipv6,
    Domain,
    Url,
    Email,
    HashMd5,
    HashSha1,
    HashSha256,
    HashSha512,
    Cve,
    MitreTechnique,
    ThreatActor,
    MalwareFamily,
    Country,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Valid,
    Invalid,
    Unverified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub entity_id: Uuid,
    pub entity_type: EntityType,
    pub raw_value: String,
    pub normalized_value: String,
    pub confidence: f64,
    pub span: (usize, usize),
    pub context_snippet: String,
    pub threat_level: ThreatLevel,
    pub validation: ValidationStatus,
    pub pattern_matched: bool,
    /// Sighting count contributed by an `IocReputationTracker`, or `0` when
    /// none was supplied to `extract` (SPEC_FULL.md §10.6).
    pub reputation_hits: u64,
}

const BASE_CONFIDENCE: f64 = 0.7;
const PATTERN_MATCH_BONUS: f64 = 0.2;
const KEYWORD_BONUS_PER_HIT: f64 = 0.02;
const KEYWORD_BONUS_CAP: f64 = 0.1;
const KEYWORD_WINDOW_CHARS: usize = 50;
const REPUTATION_BONUS_PER_SIGHTING: f64 = 0.01;
const REPUTATION_BONUS_CAP: f64 = 0.1;

/// Tracks how many times each normalized IOC value has previously been
/// observed across documents processed through the same tracker instance
/// (SPEC_FULL.md §10.6). A cheap in-process stand-in for an external
/// reputation feed; no network lookups are performed.
#[derive(Debug, Default)]
pub struct IocReputationTracker {
    counts: DashMap<(EntityType, String), u64>,
}

impl IocReputationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more sighting of `(entity_type, normalized_value)` and
    /// returns the running count including this sighting.
    fn observe(&self, entity_type: EntityType, normalized_value: &str) -> u64 {
        let mut count = self.counts.entry((entity_type, normalized_value.to_string())).or_insert(0);
        *count += 1;
        *count
    }
}

const SECURITY_CONTEXT_KEYWORDS: &[&str] =
    &["malware", "exploit", "attack", "breach", "vulnerability", "compromise", "phishing", "ransomware", "c2", "backdoor"];

static IPV4_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());
static IPV6_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){2,7}[0-9a-fA-F]{0,4}\b").unwrap());
static DOMAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}\b").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s<>\x22]+").unwrap());
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[\w.+-]+@[\w-]+\.[\w.-]+\b").unwrap());
static MD5_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-fA-F0-9]{32}\b").unwrap());
static SHA1_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-fA-F0-9]{40}\b").unwrap());
static SHA256_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-fA-F0-9]{64}\b").unwrap());
static SHA512_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-fA-F0-9]{128}\b").unwrap());
static CVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bCVE-\d{4}-\d{4,7}\b").unwrap());
static MITRE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bT\d{4}(?:\.\d{3})?\b").unwrap());
static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap());

const THREAT_ACTORS: &[&str] = &["apt28", "apt29", "lazarus group", "fin7", "carbanak", "sandworm", "equation group"];
const MALWARE_FAMILIES: &[&str] = &["emotet", "trickbot", "ryuk", "wannacry", "notpetya", "cobalt strike", "mimikatz"];
const COUNTRIES: &[&str] = &["russia", "china", "north korea", "iran", "united states", "ukraine"];

/// §4.4 step 5: "cve -> from severity source". The core has no CVSS feed to
/// consult (persistence/external lookups are out of scope, §1), so a CVE
/// mention defaults to `High` instead of falling through to the generic
/// `Medium` other unlisted types get.
fn threat_level_for(entity_type: EntityType) -> ThreatLevel {
    match entity_type {
        EntityType::HashMd5 | EntityType::HashSha1 | EntityType::HashSha256 | EntityType::HashSha512 => {
            ThreatLevel::High
        }
        EntityType::Url | EntityType::Cve => ThreatLevel::High,
        EntityType::Ipv4 | EntityType::Ipv6 | EntityType::Domain => ThreatLevel::Medium,
        EntityType::Email => ThreatLevel::Low,
        _ => ThreatLevel::Medium,
    }
}

fn validate(entity_type: EntityType, normalized: &str) -> ValidationStatus {
    match entity_type {
        EntityType::Ipv4 => {
            let valid = normalized.split('.').count() == 4
                && normalized.split('.').all(|part| part.parse::<u16>().map(|v| v <= 255).unwrap_or(false));
            if valid { ValidationStatus::Valid } else { ValidationStatus::Invalid }
        }
        EntityType::Email => {
            if normalized.matches('@').count() == 1 { ValidationStatus::Valid } else { ValidationStatus::Invalid }
        }
        _ => ValidationStatus::Unverified,
    }
}

fn normalize_value(entity_type: EntityType, raw: &str) -> String {
    let trimmed = raw.trim_end_matches(|c: char| ".,;:)]}\"'".contains(c));
    match entity_type {
        EntityType::Domain | EntityType::Url | EntityType::Email | EntityType::ThreatActor | EntityType::MalwareFamily | EntityType::Country => {
            trimmed.to_lowercase()
        }
        EntityType::HashMd5 | EntityType::HashSha1 | EntityType::HashSha256 | EntityType::HashSha512 => {
            trimmed.to_lowercase()
        }
        EntityType::Ipv6 => compress_ipv6(trimmed),
        _ => trimmed.to_string(),
    }
}

fn compress_ipv6(addr: &str) -> String {
    addr.to_lowercase()
}

fn context_snippet(text: &str, start: usize, end: usize) -> String {
    let lo = start.saturating_sub(KEYWORD_WINDOW_CHARS);
    let hi = (end + KEYWORD_WINDOW_CHARS).min(text.len());
    let lo = text.char_indices().map(|(i, _)| i).filter(|i| *i <= lo).last().unwrap_or(0);
    let hi = text.char_indices().map(|(i, _)| i).find(|i| *i >= hi).unwrap_or(text.len());
    text[lo..hi].to_string()
}

fn security_keyword_bonus(snippet: &str) -> f64 {
    let lower = snippet.to_lowercase();
    let hits = SECURITY_CONTEXT_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();
    (hits as f64 * KEYWORD_BONUS_PER_HIT).min(KEYWORD_BONUS_CAP)
}

fn push_regex_matches(
    out: &mut Vec<ExtractedEntity>,
    text: &str,
    entity_type: EntityType,
    pattern: &Regex,
    pattern_matched: bool,
) {
    for m in pattern.find_iter(text) {
        let raw = m.as_str();
        let normalized = normalize_value(entity_type, raw);
        let snippet = context_snippet(text, m.start(), m.end());
        let bonus = if pattern_matched { PATTERN_MATCH_BONUS } else { 0.0 };
        let confidence = (BASE_CONFIDENCE + bonus + security_keyword_bonus(&snippet)).min(1.0);
        out.push(ExtractedEntity {
            entity_id: Uuid::new_v4(),
            entity_type,
            raw_value: raw.to_string(),
            normalized_value: normalized.clone(),
            confidence,
            span: (m.start(), m.end()),
            context_snippet: snippet,
            threat_level: threat_level_for(entity_type),
            validation: validate(entity_type, &normalized),
            pattern_matched,
            reputation_hits: 0,
        });
    }
}

fn push_lexicon_matches(out: &mut Vec<ExtractedEntity>, text: &str, entity_type: EntityType, lexicon: &[&str]) {
    let lower = text.to_lowercase();
    for term in lexicon {
        let mut search_from = 0;
        while let Some(rel) = lower[search_from..].find(term) {
            let start = search_from + rel;
            let end = start + term.len();
            let boundary_ok = boundary(&lower, start) && boundary(&lower, end);
            search_from = end;
            if !boundary_ok {
                continue;
            }
            let raw = &text[start..end];
            let snippet = context_snippet(text, start, end);
            let confidence = (BASE_CONFIDENCE + security_keyword_bonus(&snippet)).min(1.0);
            out.push(ExtractedEntity {
                entity_id: Uuid::new_v4(),
                entity_type,
                raw_value: raw.to_string(),
                normalized_value: term.to_string(),
                confidence,
                span: (start, end),
                context_snippet: snippet,
                threat_level: threat_level_for(entity_type),
                validation: ValidationStatus::Unverified,
                pattern_matched: false,
                reputation_hits: 0,
            });
        }
    }
}

fn boundary(text: &str, idx: usize) -> bool {
    let before = text[..idx].chars().last();
    let after = text[idx..].chars().next();
    let before_ok = before.map(|c| !c.is_alphanumeric()).unwrap_or(true);
    let after_ok = after.map(|c| !c.is_alphanumeric()).unwrap_or(true);
    before_ok && after_ok
}

/// Runs both extraction sub-passes over `normalized.text` (§4.4 step 4) and
/// enriches each hit per step 5.
pub fn extract(normalized: &NormalizedText, reputation: Option<&IocReputationTracker>) -> Vec<ExtractedEntity> {
    let text = &normalized.text;
    let mut entities = Vec::new();

    push_regex_matches(&mut entities, text, EntityType::Url, &URL_RE, true);
    push_regex_matches(&mut entities, text, EntityType::Email, &EMAIL_RE, true);
    push_regex_matches(&mut entities, text, EntityType::Ipv4, &IPV4_RE, true);
    push_regex_matches(&mut entities, text, EntityType::Ipv6, &IPV6_RE, true);
    push_regex_matches(&mut entities, text, EntityType::Cve, &CVE_RE, true);
    push_regex_matches(&mut entities, text, EntityType::MitreTechnique, &MITRE_RE, true);
    push_regex_matches(&mut entities, text, EntityType::HashSha512, &SHA512_RE, true);
    push_regex_matches(&mut entities, text, EntityType::HashSha256, &SHA256_RE, true);
    push_regex_matches(&mut entities, text, EntityType::HashSha1, &SHA1_RE, true);
    push_regex_matches(&mut entities, text, EntityType::HashMd5, &MD5_RE, true);
    push_regex_matches(&mut entities, text, EntityType::Date, &DATE_RE, true);
    push_regex_matches(&mut entities, text, EntityType::Domain, &DOMAIN_RE, true);

    push_lexicon_matches(&mut entities, text, EntityType::ThreatActor, THREAT_ACTORS);
    push_lexicon_matches(&mut entities, text, EntityType::MalwareFamily, MALWARE_FAMILIES);
    push_lexicon_matches(&mut entities, text, EntityType::Country, COUNTRIES);

    let mut entities = dedupe_overlapping(entities);
    if let Some(tracker) = reputation {
        for entity in &mut entities {
            let hits = tracker.observe(entity.entity_type, &entity.normalized_value);
            entity.reputation_hits = hits;
            let bonus = ((hits.saturating_sub(1)) as f64 * REPUTATION_BONUS_PER_SIGHTING).min(REPUTATION_BONUS_CAP);
            entity.confidence = (entity.confidence + bonus).min(1.0);
        }
    }
    entities
}

/// Domains embedded in URLs/emails double-match the domain pattern; keep the
/// more specific entity type and drop the redundant domain hit.
fn dedupe_overlapping(mut entities: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    entities.sort_by_key(|e| e.span.0);
    let mut seen_spans: HashSet<(usize, usize)> = HashSet::new();
    let mut keep = Vec::new();
    'outer: for entity in entities {
        if entity.entity_type == EntityType::Domain {
            for (s, e) in &seen_spans {
                if entity.span.0 >= *s && entity.span.1 <= *e {
                    continue 'outer;
                }
            }
        }
        seen_spans.insert(entity.span);
        keep.push(entity);
    }
    keep
}
