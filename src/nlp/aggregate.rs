//! Multi-document aggregation (§4.4): dedup entities, top-K threats, actor
//! attribution, geographic distribution, coarse temporal trend.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entities::{EntityType, ExtractedEntity};
use super::ProcessedDocument;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeduplicatedEntity {
    pub entity_type: EntityType,
    pub normalized_value: String,
    pub occurrence_count: usize,
    pub evidence: Vec<String>,
    pub max_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorAttribution {
    pub actor: String,
    pub frequency: usize,
    pub mean_source_reliability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalBucket {
    pub bucket_start: DateTime<Utc>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    pub deduplicated_entities: Vec<DeduplicatedEntity>,
    pub top_threats: Vec<DeduplicatedEntity>,
    pub actor_attribution: Vec<ActorAttribution>,
    pub geographic_distribution: HashMap<String, usize>,
    pub temporal_trend: Vec<TemporalBucket>,
}

const TOP_K: usize = 10;
const TEMPORAL_BUCKET_SECONDS: i64 = 86_400;

/// Aggregates a batch of processed documents per §4.4's multi-document
/// aggregation step. Source reliability defaults to each document's own
/// language-detection confidence when no richer per-source signal exists.
pub fn aggregate(documents: &[(ProcessedDocument, DateTime<Utc>)]) -> AggregationResult {
    let mut dedup: HashMap<(EntityType, String), DeduplicatedEntity> = HashMap::new();
    let mut actor_hits: HashMap<String, (usize, f64)> = HashMap::new();
    let mut geo: HashMap<String, usize> = HashMap::new();
    let mut buckets: HashMap<i64, usize> = HashMap::new();

    for (doc, received_at) in documents {
        for entity in &doc.entities {
            let key = (entity.entity_type, entity.normalized_value.clone());
            let entry = dedup.entry(key).or_insert_with(|| DeduplicatedEntity {
                entity_type: entity.entity_type,
                normalized_value: entity.normalized_value.clone(),
                occurrence_count: 0,
                evidence: Vec::new(),
                max_confidence: 0.0,
            });
            entry.occurrence_count += 1;
            entry.evidence.push(entity.context_snippet.clone());
            entry.max_confidence = entry.max_confidence.max(entity.confidence);

            if entity.entity_type == EntityType::ThreatActor {
                let reliability = doc.language.confidence;
                let slot = actor_hits.entry(entity.normalized_value.clone()).or_insert((0, 0.0));
                slot.0 += 1;
                slot.1 += reliability;
            }
            if entity.entity_type == EntityType::Country {
                *geo.entry(entity.normalized_value.clone()).or_insert(0) += 1;
            }
        }

        let bucket = received_at.timestamp() / TEMPORAL_BUCKET_SECONDS;
        *buckets.entry(bucket).or_insert(0) += 1;
    }

    let mut deduplicated_entities: Vec<DeduplicatedEntity> = dedup.into_values().collect();
    deduplicated_entities.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));

    let mut top_threats = deduplicated_entities.clone();
    top_threats.truncate(TOP_K);

    let mut actor_attribution: Vec<ActorAttribution> = actor_hits
        .into_iter()
        .map(|(actor, (count, total_reliability))| ActorAttribution {
            actor,
            frequency: count,
            mean_source_reliability: total_reliability / count as f64,
        })
        .collect();
    actor_attribution.sort_by(|a, b| b.frequency.cmp(&a.frequency));

    let mut temporal_trend: Vec<TemporalBucket> = buckets
        .into_iter()
        .map(|(bucket, count)| TemporalBucket {
            bucket_start: DateTime::from_timestamp(bucket * TEMPORAL_BUCKET_SECONDS, 0).unwrap_or_else(Utc::now),
            count,
        })
        .collect();
    temporal_trend.sort_by_key(|b| b.bucket_start);

    AggregationResult { deduplicated_entities, top_threats, actor_attribution, geographic_distribution: geo, temporal_trend }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::process_document;
    use crate::config::LanguageConfig;

    #[test]
    fn dedups_entities_across_documents_by_type_and_normalized_value() {
        let config = LanguageConfig::default();
        let doc1 = process_document("Seen from 10.0.0.1 attributed to APT28.", &config, None);
        let doc2 = process_document("Another hit from 10.0.0.1 again.", &config, None);
        let now = Utc::now();
        let result = aggregate(&[(doc1, now), (doc2, now)]);
        let ip_entry = result
            .deduplicated_entities
            .iter()
            .find(|e| e.entity_type == EntityType::Ipv4 && e.normalized_value == "10.0.0.1")
            .unwrap();
        assert_eq!(ip_entry.occurrence_count, 2);
    }
}
