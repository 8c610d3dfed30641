//! Guideline categorization into evaluation buckets

use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

use crate::error::Result;
use crate::guidelines::Guideline;
use crate::ids::GuidelineId;
use crate::relationships::{RelationshipEntity, RelationshipKind, RelationshipStore};

/// The bucket a guideline is evaluated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuidelineCategory {
    Observational,
    Disambiguation,
    Continuous,
    PreviouslyAppliedCustomerDependent,
    PreviouslyApplied,
    Actionable,
}

impl GuidelineCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observational => "observational",
            Self::Disambiguation => "disambiguation",
            Self::Continuous => "continuous",
            Self::PreviouslyAppliedCustomerDependent => "previously_applied_customer_dependent",
            Self::PreviouslyApplied => "previously_applied",
            Self::Actionable => "actionable",
        }
    }

    pub fn all() -> &'static [GuidelineCategory] {
        &[
            Self::Observational,
            Self::Disambiguation,
            Self::Continuous,
            Self::PreviouslyAppliedCustomerDependent,
            Self::PreviouslyApplied,
            Self::Actionable,
        ]
    }
}

impl fmt::Display for GuidelineCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ambiguous observational guideline and its candidate interpretations
///
/// The group owns only its head. Targets keep their own bucket and are
/// referenced here so the disambiguation batch can present them.
#[derive(Debug, Clone)]
pub struct DisambiguationGroup {
    pub head: Guideline,
    pub targets: Vec<Guideline>,
}

/// Disjoint buckets produced by [`categorize`]
#[derive(Debug, Clone, Default)]
pub struct CategorizedGuidelines {
    pub observational: Vec<Guideline>,
    pub disambiguation_groups: Vec<DisambiguationGroup>,
    pub continuous: Vec<Guideline>,
    pub previously_applied_customer_dependent: Vec<Guideline>,
    pub previously_applied: Vec<Guideline>,
    pub actionable: Vec<Guideline>,
}

impl CategorizedGuidelines {
    /// Number of guidelines owned by a bucket
    pub fn count(&self, category: GuidelineCategory) -> usize {
        match category {
            GuidelineCategory::Observational => self.observational.len(),
            GuidelineCategory::Disambiguation => self.disambiguation_groups.len(),
            GuidelineCategory::Continuous => self.continuous.len(),
            GuidelineCategory::PreviouslyAppliedCustomerDependent => {
                self.previously_applied_customer_dependent.len()
            }
            GuidelineCategory::PreviouslyApplied => self.previously_applied.len(),
            GuidelineCategory::Actionable => self.actionable.len(),
        }
    }

    pub fn total(&self) -> usize {
        GuidelineCategory::all().iter().map(|c| self.count(*c)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Bucket owning `id`, if the guideline was categorized at all
    pub fn category_of(&self, id: &GuidelineId) -> Option<GuidelineCategory> {
        let holds = |bucket: &[Guideline]| bucket.iter().any(|g| &g.id == id);

        if self.disambiguation_groups.iter().any(|g| &g.head.id == id) {
            Some(GuidelineCategory::Disambiguation)
        } else if holds(&self.observational) {
            Some(GuidelineCategory::Observational)
        } else if holds(&self.continuous) {
            Some(GuidelineCategory::Continuous)
        } else if holds(&self.previously_applied_customer_dependent) {
            Some(GuidelineCategory::PreviouslyAppliedCustomerDependent)
        } else if holds(&self.previously_applied) {
            Some(GuidelineCategory::PreviouslyApplied)
        } else if holds(&self.actionable) {
            Some(GuidelineCategory::Actionable)
        } else {
            None
        }
    }
}

/// Partition `guidelines` into evaluation buckets
///
/// `applied` holds the ids already triggered earlier in the session.
/// `disambiguation_targets` maps observational guidelines to the targets of
/// their outgoing disambiguation relationships; a head with fewer than two
/// targets present in `guidelines` stays observational. Duplicate ids are
/// categorized once, at their first occurrence.
pub fn categorize(
    guidelines: &[Guideline],
    applied: &HashSet<GuidelineId>,
    disambiguation_targets: &HashMap<GuidelineId, Vec<GuidelineId>>,
) -> CategorizedGuidelines {
    categorize_with_known_targets(guidelines, &[], applied, disambiguation_targets)
}

/// [`categorize`], with `known_targets` also eligible as disambiguation targets
///
/// Known targets are guidelines evaluated elsewhere in the cycle, typically
/// by another strategy. They complete a group but are never bucketed here.
pub fn categorize_with_known_targets(
    guidelines: &[Guideline],
    known_targets: &[Guideline],
    applied: &HashSet<GuidelineId>,
    disambiguation_targets: &HashMap<GuidelineId, Vec<GuidelineId>>,
) -> CategorizedGuidelines {
    let mut by_id: HashMap<&GuidelineId, &Guideline> =
        known_targets.iter().map(|g| (&g.id, g)).collect();
    by_id.extend(guidelines.iter().map(|g| (&g.id, g)));
    let mut seen = HashSet::new();
    let mut result = CategorizedGuidelines::default();

    for guideline in guidelines {
        if !seen.insert(&guideline.id) {
            continue;
        }

        if guideline.is_observational() {
            let targets: Vec<Guideline> = disambiguation_targets
                .get(&guideline.id)
                .into_iter()
                .flatten()
                .filter(|id| *id != &guideline.id)
                .filter_map(|id| by_id.get(id).map(|g| (*g).clone()))
                .collect();

            if targets.len() >= 2 {
                result.disambiguation_groups.push(DisambiguationGroup {
                    head: guideline.clone(),
                    targets,
                });
            } else {
                result.observational.push(guideline.clone());
            }
            continue;
        }

        if guideline.annotations.continuous {
            result.continuous.push(guideline.clone());
        } else if applied.contains(&guideline.id) {
            if guideline.annotations.is_customer_dependent() {
                result
                    .previously_applied_customer_dependent
                    .push(guideline.clone());
            } else {
                result.previously_applied.push(guideline.clone());
            }
        } else {
            result.actionable.push(guideline.clone());
        }
    }

    debug!(
        observational = result.observational.len(),
        disambiguation_groups = result.disambiguation_groups.len(),
        continuous = result.continuous.len(),
        previously_applied = result.previously_applied.len(),
        previously_applied_customer_dependent = result.previously_applied_customer_dependent.len(),
        actionable = result.actionable.len(),
        "Guidelines categorized"
    );

    result
}

/// Targets of the direct disambiguation edges leaving each observational guideline
///
/// Tag targets expand to the given guidelines carrying the tag. Heads
/// without any target are left out of the map.
pub async fn disambiguation_targets(
    relationships: &dyn RelationshipStore,
    guidelines: &[Guideline],
) -> Result<HashMap<GuidelineId, Vec<GuidelineId>>> {
    let mut result = HashMap::new();

    for head in guidelines.iter().filter(|g| g.is_observational()) {
        let source = RelationshipEntity::Guideline(head.id.clone());
        let edges = relationships
            .list_relationships(RelationshipKind::Disambiguation, false, Some(&source), None)
            .await?;

        let mut targets: Vec<GuidelineId> = Vec::new();
        for edge in edges {
            let expanded: Vec<GuidelineId> = match &edge.target {
                RelationshipEntity::Guideline(id) => vec![id.clone()],
                RelationshipEntity::Tag(tag) => guidelines
                    .iter()
                    .filter(|g| g.has_tag(tag))
                    .map(|g| g.id.clone())
                    .collect(),
            };
            for id in expanded {
                if id != head.id && !targets.contains(&id) {
                    targets.push(id);
                }
            }
        }

        if !targets.is_empty() {
            result.insert(head.id.clone(), targets);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guidelines::CustomerDependentAction;

    fn ids(bucket: &[Guideline]) -> Vec<&str> {
        bucket.iter().map(|g| g.id.as_str()).collect()
    }

    #[test]
    fn test_each_category() {
        let guidelines = vec![
            Guideline::observational("customer mentions a competitor").with_id("obs"),
            Guideline::actionable("customer is angry", "apologize").with_id("cont").continuous(),
            Guideline::actionable("customer asks for a refund", "ask for the order number")
                .with_id("cd")
                .customer_dependent(CustomerDependentAction::new(
                    "provide order number",
                    "ask for order number",
                )),
            Guideline::actionable("customer greets", "greet back").with_id("prev"),
            Guideline::actionable("customer asks about hours", "share hours").with_id("new"),
        ];
        let applied: HashSet<GuidelineId> = ["cd", "prev", "cont"].into_iter().map(Into::into).collect();

        let result = categorize(&guidelines, &applied, &HashMap::new());

        assert_eq!(ids(&result.observational), vec!["obs"]);
        assert_eq!(ids(&result.continuous), vec!["cont"]);
        assert_eq!(ids(&result.previously_applied_customer_dependent), vec!["cd"]);
        assert_eq!(ids(&result.previously_applied), vec!["prev"]);
        assert_eq!(ids(&result.actionable), vec!["new"]);
        assert_eq!(result.total(), guidelines.len());
    }

    #[test]
    fn test_disambiguation_head_needs_two_present_targets() {
        let guidelines = vec![
            Guideline::observational("customer received the wrong item").with_id("head"),
            Guideline::actionable("customer wants a refund", "issue a refund").with_id("refund"),
            Guideline::actionable("customer wants a replacement", "ship a replacement").with_id("replace"),
            Guideline::observational("customer is unsure").with_id("lonely"),
        ];
        let targets = HashMap::from([
            (GuidelineId::from("head"), vec!["refund".into(), "replace".into()]),
            (GuidelineId::from("lonely"), vec!["refund".into(), "missing".into()]),
        ]);

        let result = categorize(&guidelines, &HashSet::new(), &targets);

        assert_eq!(result.disambiguation_groups.len(), 1);
        let group = &result.disambiguation_groups[0];
        assert_eq!(group.head.id.as_str(), "head");
        assert_eq!(ids(&group.targets), vec!["refund", "replace"]);

        assert_eq!(ids(&result.observational), vec!["lonely"]);
        assert_eq!(ids(&result.actionable), vec!["refund", "replace"]);
        assert_eq!(
            result.category_of(&"head".into()),
            Some(GuidelineCategory::Disambiguation)
        );
    }

    #[test]
    fn test_duplicates_are_categorized_once() {
        let g = Guideline::actionable("x", "y").with_id("dup");
        let result = categorize(&[g.clone(), g], &HashSet::new(), &HashMap::new());
        assert_eq!(result.total(), 1);
    }

    #[test]
    fn test_empty_input() {
        let result = categorize(&[], &HashSet::new(), &HashMap::new());
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_disambiguation_targets_expand_tags() {
        use crate::relationships::InMemoryRelationshipStore;

        let store = InMemoryRelationshipStore::new();
        let head = RelationshipEntity::Guideline("head".into());
        store
            .create_relationship(head.clone(), RelationshipEntity::Guideline("refund".into()), RelationshipKind::Disambiguation)
            .await
            .unwrap();
        store
            .create_relationship(head, RelationshipEntity::Tag("returns".into()), RelationshipKind::Disambiguation)
            .await
            .unwrap();

        let guidelines = vec![
            Guideline::observational("customer wants their money back").with_id("head"),
            Guideline::actionable("refund", "refund").with_id("refund").with_tags(vec!["returns".into()]),
            Guideline::actionable("replace", "replace").with_id("replace").with_tags(vec!["returns".into()]),
            Guideline::observational("unrelated").with_id("lonely"),
        ];

        let targets = disambiguation_targets(&store, &guidelines).await.unwrap();

        assert_eq!(targets.len(), 1);
        let head_targets: Vec<&str> = targets[&GuidelineId::from("head")].iter().map(|id| id.as_str()).collect();
        assert_eq!(head_targets, vec!["refund", "replace"]);
    }

    #[test]
    fn test_known_targets_complete_a_group() {
        let head = Guideline::observational("customer wants to change the order").with_id("head");
        let inside = Guideline::actionable("change address", "update the address").with_id("address");
        let outside = Guideline::actionable("change items", "update the items").with_id("items");
        let targets = HashMap::from([(
            GuidelineId::from("head"),
            vec![GuidelineId::from("address"), GuidelineId::from("items")],
        )]);

        let alone = categorize(&[head.clone(), inside.clone()], &HashSet::new(), &targets);
        assert!(alone.disambiguation_groups.is_empty());

        let result = categorize_with_known_targets(
            &[head, inside],
            &[outside],
            &HashSet::new(),
            &targets,
        );
        assert_eq!(result.disambiguation_groups.len(), 1);
        assert_eq!(ids(&result.disambiguation_groups[0].targets), vec!["address", "items"]);
        assert_eq!(ids(&result.actionable), vec!["address"]);
        assert_eq!(result.category_of(&"items".into()), None);
    }
}
