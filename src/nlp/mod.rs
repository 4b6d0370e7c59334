//! Threat-Intelligence NLP Core (§4.4): per-document pipeline from raw text
//! to structured entities, relationships, and a severity assessment.

pub mod aggregate;
pub mod entities;
pub mod language;
pub mod normalize;
pub mod relationships;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LanguageConfig;
use crate::error::ProcessingError;

pub use entities::{EntityType, ExtractedEntity, IocReputationTracker, ThreatLevel, ValidationStatus};
pub use language::LanguageGuess;
pub use relationships::{EntityRelationship, RelationshipType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeverityCategory {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityAssessment {
    pub score: f64,
    pub category: SeverityCategory,
    pub high_confidence_indicator_count: usize,
    pub critical_technique_count: usize,
}

const SOPHISTICATED_ACTORS: &[&str] = &["apt28", "apt29", "lazarus group", "equation group"];
const CRITICAL_TECHNIQUES: &[&str] = &["t1486", "t1490", "t1489"];
const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.85;

fn severity_category(score: f64) -> SeverityCategory {
    if score >= 0.8 {
        SeverityCategory::Critical
    } else if score >= 0.6 {
        SeverityCategory::High
    } else if score >= 0.4 {
        SeverityCategory::Medium
    } else {
        SeverityCategory::Low
    }
}

/// Severity roll-up (§4.4 step 7): rises with high-confidence indicator
/// density, presence of expert-sophistication actors, and critical
/// technique ids.
fn assess_severity(entities: &[ExtractedEntity]) -> SeverityAssessment {
    let high_confidence_indicator_count =
        entities.iter().filter(|e| e.confidence >= HIGH_CONFIDENCE_THRESHOLD).count();
    let has_sophisticated_actor = entities.iter().any(|e| {
        e.entity_type == EntityType::ThreatActor && SOPHISTICATED_ACTORS.contains(&e.normalized_value.as_str())
    });
    let critical_technique_count = entities
        .iter()
        .filter(|e| {
            e.entity_type == EntityType::MitreTechnique
                && CRITICAL_TECHNIQUES.contains(&e.normalized_value.to_lowercase().as_str())
        })
        .count();

    let total = entities.len().max(1) as f64;
    let mut score = (high_confidence_indicator_count as f64 / total) * 0.5;
    if has_sophisticated_actor {
        score += 0.3;
    }
    score += (critical_technique_count as f64 * 0.2).min(0.3);
    let score = score.min(1.0);

    SeverityAssessment {
        score,
        category: severity_category(score),
        high_confidence_indicator_count,
        critical_technique_count,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub document_id: Uuid,
    pub original_text: String,
    pub canonical_text: Option<String>,
    pub language: LanguageGuess,
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<EntityRelationship>,
    pub severity: SeverityAssessment,
}

/// Runs the full §4.4 per-document pipeline. `translator` is an optional
/// canonical-language rewrite; when absent (or the document is already in
/// the canonical language) `canonical_text` stays `None` and entities are
/// scanned against the normalized original.
pub fn process_document(
    text: &str,
    config: &LanguageConfig,
    translator: Option<&dyn Fn(&str) -> String>,
) -> ProcessedDocument {
    process_document_with_reputation(text, config, translator, None)
}

/// Same pipeline as `process_document`, plus an optional IOC reputation
/// tracker shared across the batch of documents (SPEC_FULL.md §10.6).
pub fn process_document_with_reputation(
    text: &str,
    config: &LanguageConfig,
    translator: Option<&dyn Fn(&str) -> String>,
    reputation: Option<&IocReputationTracker>,
) -> ProcessedDocument {
    let language = language::detect(text, &config.supported_languages, &config.default_language);
    let normalized = normalize::normalize(text);

    let canonical_text = if language.code != config.default_language && config.translation_enabled {
        translator.map(|f| f(&normalized.text))
    } else {
        None
    };

    let scan_target = canonical_text.as_deref().unwrap_or(&normalized.text);
    let scanned = normalize::normalize(scan_target);
    let entities = entities::extract(&scanned, reputation);
    let relationships = relationships::infer(&entities, &scanned.text);
    let severity = assess_severity(&entities);

    ProcessedDocument {
        document_id: Uuid::new_v4(),
        original_text: text.to_string(),
        canonical_text,
        language,
        entities,
        relationships,
        severity,
    }
}

/// Batch entry point (§4.4 failure semantics): each document is processed in
/// isolation; a panic-free parse failure becomes a `ProcessingError` and
/// never aborts the rest of the batch. IOC reputation (SPEC_FULL.md §10.6)
/// accumulates across the whole batch via a tracker shared between calls.
pub fn process_batch(
    documents: &[(Uuid, String)],
    config: &LanguageConfig,
) -> (Vec<ProcessedDocument>, Vec<ProcessingError>) {
    let reputation = IocReputationTracker::new();
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for (document_id, text) in documents {
        if text.trim().is_empty() {
            failed.push(ProcessingError {
                document_id: *document_id,
                stage: "normalize".into(),
                message: "document text is empty".into(),
            });
            continue;
        }
        let mut doc = process_document_with_reputation(text, config, None, Some(&reputation));
        doc.document_id = *document_id;
        succeeded.push(doc);
    }
    (succeeded, failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_b3_unrecognizable_language_still_runs_pipeline() {
        let config = LanguageConfig::default();
        let doc = process_document("12345 !@#$% 67890", &config, None);
        assert_eq!(doc.language.code, config.default_language);
        assert!(doc.language.confidence < 0.5);
    }

    #[test]
    fn property_p7_entity_span_matches_raw_value_in_scanned_text() {
        let config = LanguageConfig::default();
        let doc = process_document("Connect to 8.8.8.8 now.", &config, None);
        let ip = doc.entities.iter().find(|e| e.entity_type == EntityType::Ipv4).unwrap();
        let scanned = normalize::normalize("Connect to 8.8.8.8 now.");
        assert_eq!(&scanned.text[ip.span.0..ip.span.1], ip.raw_value);
    }

    #[test]
    fn batch_isolates_empty_document_failure() {
        let config = LanguageConfig::default();
        let docs = vec![(Uuid::new_v4(), "Exploit used CVE-2023-1111.".to_string()), (Uuid::new_v4(), "   ".to_string())];
        let (succeeded, failed) = process_batch(&docs, &config);
        assert_eq!(succeeded.len(), 1);
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn batch_shares_reputation_tracker_across_documents() {
        let config = LanguageConfig::default();
        let docs = vec![
            (Uuid::new_v4(), "Seen from 10.0.0.1 during recon.".to_string()),
            (Uuid::new_v4(), "Same IP 10.0.0.1 again during exfiltration.".to_string()),
        ];
        let (succeeded, _) = process_batch(&docs, &config);
        let ip_in_second = succeeded[1].entities.iter().find(|e| e.entity_type == EntityType::Ipv4).unwrap();
        assert_eq!(ip_in_second.reputation_hits, 2);
    }

    #[test]
    fn high_confidence_actor_and_technique_raise_severity() {
        let config = LanguageConfig::default();
        let doc = process_document(
            "APT28 exploited CVE-2023-9999 using technique T1486 against the target network.",
            &config,
            None,
        );
        assert!(doc.severity.score > 0.0);
    }

    #[test]
    fn scenario_s6_nlp_extraction() {
        let config = LanguageConfig::default();
        let doc = process_document(
            "APT29 deployed ransomware from 203.0.113.5 targeting example.org (CVE-2021-44228)",
            &config,
            None,
        );

        assert!(doc.entities.iter().any(|e| e.entity_type == EntityType::ThreatActor && e.normalized_value == "apt29"));
        let ip = doc.entities.iter().find(|e| e.entity_type == EntityType::Ipv4).unwrap();
        assert_eq!(ip.normalized_value, "203.0.113.5");
        assert_eq!(ip.threat_level, ThreatLevel::Medium);
        assert!(doc.entities.iter().any(|e| e.entity_type == EntityType::Domain && e.normalized_value == "example.org"));
        let cve = doc.entities.iter().find(|e| e.entity_type == EntityType::Cve).unwrap();
        assert_eq!(cve.threat_level, ThreatLevel::High);

        // No MitreTechnique entity is present, so no uses_technique-class
        // relationship can exist regardless of proximity.
        assert!(!doc.relationships.iter().any(|r| r.relationship_type == RelationshipType::UsesTechnique));

        // ip <-> cve co-occurrence relationship, by type per the closed
        // mapping (not "affects", since the IP isn't the CVE's target).
        let ip_id = ip.entity_id;
        let cve_id = cve.entity_id;
        assert!(doc.relationships.iter().any(|r| {
            (r.source_entity_id == ip_id && r.target_entity_id == cve_id)
                || (r.source_entity_id == cve_id && r.target_entity_id == ip_id)
        }));
    }
}
