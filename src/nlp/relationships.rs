//! Relationship inference (§4.4 step 6): closed type-pair mapping over
//! entity pairs within a proximity window.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entities::{EntityType, ExtractedEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    ResolvesTo,
    HostedOn,
    CommunicatesWith,
    UsesTechnique,
    AttributedTo,
    Exploits,
    Affects,
    Precedes,
    Follows,
    CoOccurs,
    RelatedTo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    pub evidence_snippet: String,
    pub temporal_overlap: bool,
    pub contextual_proximity: f64,
}

const PROXIMITY_WINDOW_CHARS: usize = 200;
const BASE_CONFIDENCE: f64 = 0.6;
const PROXIMITY_WEIGHT: f64 = 0.2;
const MEAN_CONFIDENCE_WEIGHT: f64 = 0.2;

fn mapping(a: EntityType, b: EntityType) -> Option<RelationshipType> {
    use EntityType::*;
    use RelationshipType as R;
    let pair = (a, b);
    let mapped = match pair {
        (Ipv4, Domain) | (Domain, Ipv4) | (Ipv6, Domain) | (Domain, Ipv6) => R::ResolvesTo,
        (Domain, Url) | (Url, Domain) => R::HostedOn,
        (Ipv4, Ipv4) | (Ipv4, Ipv6) | (Ipv6, Ipv4) | (Domain, Domain) => R::CommunicatesWith,
        (MitreTechnique, ThreatActor) | (ThreatActor, MitreTechnique) => R::UsesTechnique,
        (MalwareFamily, ThreatActor) | (ThreatActor, MalwareFamily) => R::AttributedTo,
        (Cve, MalwareFamily) | (MalwareFamily, Cve) | (Cve, ThreatActor) | (ThreatActor, Cve) => R::Exploits,
        (Cve, Domain) | (Domain, Cve) => R::Affects,
        // An IP seen near a CVE mention isn't itself "affected" by the CVE
        // the way a named target is; it's evidence by co-occurrence only.
        (Cve, Ipv4) | (Ipv4, Cve) | (Cve, Ipv6) | (Ipv6, Cve) => R::RelatedTo,
        (Date, _) if matches!(b, Ipv4 | Ipv6 | Domain | Url | HashMd5 | HashSha1 | HashSha256 | HashSha512) => {
            R::Precedes
        }
        (_, Date) if matches!(a, Ipv4 | Ipv6 | Domain | Url | HashMd5 | HashSha1 | HashSha256 | HashSha512) => {
            R::Follows
        }
        (ThreatActor, Country) | (Country, ThreatActor) => R::RelatedTo,
        (HashMd5, ThreatActor)
        | (HashSha1, ThreatActor)
        | (HashSha256, ThreatActor)
        | (HashSha512, ThreatActor)
        | (ThreatActor, HashMd5)
        | (ThreatActor, HashSha1)
        | (ThreatActor, HashSha256)
        | (ThreatActor, HashSha512) => R::CoOccurs,
        _ => return None,
    };
    Some(mapped)
}

fn proximity_score(distance: usize) -> f64 {
    1.0 - (distance as f64 / PROXIMITY_WINDOW_CHARS as f64).min(1.0)
}

/// Infers relationships for every unordered entity pair within
/// `PROXIMITY_WINDOW_CHARS` of each other (§4.4 step 6).
pub fn infer(entities: &[ExtractedEntity], text: &str) -> Vec<EntityRelationship> {
    let mut out = Vec::new();
    for i in 0..entities.len() {
        for j in (i + 1)..entities.len() {
            let a = &entities[i];
            let b = &entities[j];
            let distance = a.span.1.abs_diff(b.span.0).min(b.span.1.abs_diff(a.span.0));
            if distance > PROXIMITY_WINDOW_CHARS {
                continue;
            }
            let Some(relationship_type) = mapping(a.entity_type, b.entity_type) else { continue };

            let proximity = proximity_score(distance);
            let mean_confidence = (a.confidence + b.confidence) / 2.0;
            let confidence = (BASE_CONFIDENCE + proximity * PROXIMITY_WEIGHT + mean_confidence * MEAN_CONFIDENCE_WEIGHT).min(1.0);

            let lo = a.span.0.min(b.span.0);
            let hi = a.span.1.max(b.span.1);
            let lo = text.char_indices().map(|(i, _)| i).filter(|i| *i <= lo).last().unwrap_or(0);
            let hi = text.char_indices().map(|(i, _)| i).find(|i| *i >= hi).unwrap_or(text.len());
            let evidence_snippet = text.get(lo..hi).unwrap_or_default().to_string();

            out.push(EntityRelationship {
                source_entity_id: a.entity_id,
                target_entity_id: b.entity_id,
                relationship_type,
                confidence,
                evidence_snippet,
                temporal_overlap: a.entity_type == EntityType::Date || b.entity_type == EntityType::Date,
                contextual_proximity: proximity,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::entities::{ThreatLevel, ValidationStatus};

    fn entity(entity_type: EntityType, span: (usize, usize)) -> ExtractedEntity {
        ExtractedEntity {
            entity_id: Uuid::new_v4(),
            entity_type,
            raw_value: "x".into(),
            normalized_value: "x".into(),
            confidence: 0.8,
            span,
            context_snippet: "x".into(),
            threat_level: ThreatLevel::Medium,
            validation: ValidationStatus::Unverified,
            pattern_matched: true,
            reputation_hits: 0,
        }
    }

    #[test]
    fn ip_and_domain_within_window_resolves_to() {
        let entities = vec![entity(EntityType::Ipv4, (0, 10)), entity(EntityType::Domain, (20, 30))];
        let rels = infer(&entities, "0123456789 0123456789 example.com");
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relationship_type, RelationshipType::ResolvesTo);
    }

    #[test]
    fn pairs_outside_proximity_window_produce_no_relationship() {
        let entities = vec![entity(EntityType::Ipv4, (0, 10)), entity(EntityType::Domain, (500, 510))];
        let rels = infer(&entities, &"x".repeat(600));
        assert!(rels.is_empty());
    }

    #[test]
    fn unmapped_type_pair_yields_no_relationship() {
        let entities = vec![entity(EntityType::Email, (0, 10)), entity(EntityType::Country, (15, 25))];
        let rels = infer(&entities, &"x".repeat(30));
        assert!(rels.is_empty());
    }
}
