//! Fuzzy entity resolution.
//!
//! Matches free-text names (contacts, categories, accounts) against stored
//! entities, creating a new entity only when nothing clears the match
//! threshold. Applied in order, first hit wins:
//!
//! 1. Exact case-insensitive name match (confidence 1.0).
//! 2. Match on the normalized form (0.95) or any stored variation (0.9).
//! 3. Substring fuzzy match over normalized names, scored
//!    `min(len) / max(len)`, kept only strictly above the threshold.
//! 4. Create a new entity seeded with deterministic name variations
//!    (confidence 0.0, `created = true`).

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use super::models::{EntityKind, Resolution, StoredEntity};
use super::store::EntityStore;

const HONORIFICS: &[&str] = &["mr", "mrs", "ms", "dr", "prof"];
const LEGAL_SUFFIXES: &[&str] = &["inc", "llc", "ltd", "corp", "co", "gmbh"];

pub struct EntityResolver {
    store: Arc<dyn EntityStore>,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, kind: EntityKind, name: &str) -> Result<Resolution> {
        let normalized = normalize(name);

        // Step 1: exact case-insensitive match.
        if let Some(entity) = self.store.find_by_name(kind, name).await? {
            return Ok(Resolution {
                entity,
                created: false,
                match_confidence: 1.0,
            });
        }

        let candidates = self.store.list(kind).await?;

        // Step 2: normalized form, then stored variations.
        for candidate in &candidates {
            if candidate.normalized_name == normalized {
                return Ok(Resolution {
                    entity: candidate.clone(),
                    created: false,
                    match_confidence: 0.95,
                });
            }
        }
        for candidate in &candidates {
            if candidate.variations.iter().any(|v| *v == normalized) {
                return Ok(Resolution {
                    entity: candidate.clone(),
                    created: false,
                    match_confidence: 0.9,
                });
            }
        }

        // Step 3: substring fuzzy match, strict threshold.
        let threshold = fuzzy_threshold(kind);
        let mut best: Option<(&StoredEntity, f32)> = None;
        for candidate in &candidates {
            let cand = &candidate.normalized_name;
            if cand.is_empty() || normalized.is_empty() {
                continue;
            }
            if !cand.contains(normalized.as_str()) && !normalized.contains(cand.as_str()) {
                continue;
            }
            let score = substring_score(&normalized, cand);
            if score > threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((candidate, score));
            }
        }
        if let Some((candidate, score)) = best {
            return Ok(Resolution {
                entity: candidate.clone(),
                created: false,
                match_confidence: score,
            });
        }

        // Step 4: create, seeded with deterministic variations. The store
        // enforces uniqueness on (kind, normalized_name); a concurrent create
        // of the same name resolves to the winner's row.
        let candidate = StoredEntity {
            id: Uuid::now_v7(),
            kind,
            name: name.trim().to_string(),
            normalized_name: normalized,
            variations: generate_variations(name),
        };
        let candidate_id = candidate.id;
        let stored = self.store.insert(candidate).await?;
        let created = stored.id == candidate_id;
        Ok(Resolution {
            entity: stored,
            created,
            match_confidence: if created { 0.0 } else { 1.0 },
        })
    }
}

fn fuzzy_threshold(kind: EntityKind) -> f32 {
    // Category names are short; a stricter bar avoids spurious matches.
    match kind {
        EntityKind::Category => 0.7,
        _ => 0.6,
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn substring_score(a: &str, b: &str) -> f32 {
    let (min, max) = if a.len() < b.len() {
        (a.len(), b.len())
    } else {
        (b.len(), a.len())
    };
    min as f32 / max as f32
}

/// Deterministic alias forms for a new entity.
pub fn generate_variations(name: &str) -> Vec<String> {
    let normalized = normalize(name);
    let tokens: Vec<&str> = normalized.split_whitespace().collect();

    let mut variations = Vec::new();
    let mut push = |v: String| {
        if !v.is_empty() && v != normalized && !variations.contains(&v) {
            variations.push(v);
        }
    };

    if tokens.len() > 1 {
        // Concatenated-words form and initials.
        push(tokens.concat());
        push(tokens.iter().filter_map(|t| t.chars().next()).collect());
    }

    // Honorific-stripped and legal-suffix-stripped forms.
    if let Some(first) = tokens.first() {
        if HONORIFICS.contains(&first.trim_end_matches('.')) {
            push(tokens[1..].join(" "));
        }
    }
    if let Some(last) = tokens.last() {
        if LEGAL_SUFFIXES.contains(&last.trim_end_matches('.')) {
            push(tokens[..tokens.len() - 1].join(" "));
        }
    }

    // Each individual token of a multi-word name.
    if tokens.len() > 1 {
        for token in &tokens {
            push((*token).to_string());
        }
    }

    variations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::InMemoryEntityStore;

    fn stored(kind: EntityKind, name: &str) -> StoredEntity {
        StoredEntity {
            id: Uuid::now_v7(),
            kind,
            name: name.to_string(),
            normalized_name: normalize(name),
            variations: generate_variations(name),
        }
    }

    async fn resolver_with(entities: Vec<StoredEntity>) -> EntityResolver {
        let store = Arc::new(InMemoryEntityStore::default());
        for entity in entities {
            store.insert(entity).await.unwrap();
        }
        EntityResolver::new(store)
    }

    #[tokio::test]
    async fn test_exact_case_insensitive_match() {
        let resolver =
            resolver_with(vec![stored(EntityKind::Contact, "Acme Corp")]).await;

        let resolution = resolver
            .resolve(EntityKind::Contact, "ACME CORP")
            .await
            .unwrap();
        assert!(!resolution.created);
        assert_eq!(resolution.match_confidence, 1.0);
        assert_eq!(resolution.entity.name, "Acme Corp");
    }

    #[tokio::test]
    async fn test_variation_match() {
        let resolver =
            resolver_with(vec![stored(EntityKind::Contact, "John Smith")]).await;

        // Initials are a stored variation of a multi-word name.
        let resolution = resolver
            .resolve(EntityKind::Contact, "js")
            .await
            .unwrap();
        assert!(!resolution.created);
        assert_eq!(resolution.match_confidence, 0.9);
    }

    #[tokio::test]
    async fn test_fuzzy_score_at_threshold_is_rejected() {
        // "abc" against "abcde": 3/5 = 0.6 exactly, strictly-greater fails.
        let resolver = resolver_with(vec![stored(EntityKind::Contact, "abcde")]).await;

        let resolution = resolver
            .resolve(EntityKind::Contact, "abc")
            .await
            .unwrap();
        assert!(resolution.created);
        assert_eq!(resolution.match_confidence, 0.0);
    }

    #[tokio::test]
    async fn test_fuzzy_score_above_threshold_is_selected() {
        // 11/18 = 0.611, above the 0.6 bar.
        let resolver =
            resolver_with(vec![stored(EntityKind::Contact, "abcdefghijk")]).await;

        let resolution = resolver
            .resolve(EntityKind::Contact, "abcdefghijklmnopqr")
            .await
            .unwrap();
        assert!(!resolution.created);
        assert!((resolution.match_confidence - 11.0 / 18.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_category_threshold_is_stricter() {
        // 2/3 = 0.667 clears 0.6 but not the 0.7 bar categories use.
        let contact_resolver = resolver_with(vec![stored(EntityKind::Contact, "abc")]).await;
        let resolved = contact_resolver
            .resolve(EntityKind::Contact, "ab")
            .await
            .unwrap();
        assert!(!resolved.created);

        let category_resolver =
            resolver_with(vec![stored(EntityKind::Category, "abc")]).await;
        let created = category_resolver
            .resolve(EntityKind::Category, "ab")
            .await
            .unwrap();
        assert!(created.created);
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let resolver = resolver_with(vec![]).await;

        let first = resolver
            .resolve(EntityKind::Contact, "New Vendor")
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.match_confidence, 0.0);

        let second = resolver
            .resolve(EntityKind::Contact, "New Vendor")
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.match_confidence, 1.0);
        assert_eq!(second.entity.id, first.entity.id);
    }

    #[test]
    fn test_variation_generation() {
        let variations = generate_variations("Dr. John Smith");
        assert!(variations.contains(&"john smith".to_string()));
        assert!(variations.contains(&"djs".to_string()));
        assert!(variations.contains(&"john".to_string()));
        assert!(variations.contains(&"smith".to_string()));

        let corp = generate_variations("Acme Inc");
        assert!(corp.contains(&"acme".to_string()));
        assert!(corp.contains(&"ai".to_string()));
        assert!(corp.contains(&"acmeinc".to_string()));
    }
}
