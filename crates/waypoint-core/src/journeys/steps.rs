//! Step graph of a journey

use std::collections::HashMap;

use super::types::Journey;
use crate::error::{Error, Result};
use crate::guidelines::Guideline;
use crate::ids::GuidelineId;

/// One node of the step graph
#[derive(Debug, Clone)]
pub struct JourneyStep {
    pub guideline: Guideline,
    pub follow_ups: Vec<GuidelineId>,
    pub parents: Vec<GuidelineId>,
    pub customer_dependent: bool,
    pub requires_tool_calls: bool,
}

impl JourneyStep {
    pub fn id(&self) -> &GuidelineId {
        &self.guideline.id
    }
}

/// Validated step graph built from a journey and its step guidelines
///
/// Steps form a DAG rooted at the journey root. The only cycles allowed are
/// self-loops, which model re-asking an incomplete step.
#[derive(Debug, Clone)]
pub struct JourneyStepGraph {
    root: GuidelineId,
    steps: Vec<JourneyStep>,
    index: HashMap<GuidelineId, usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl JourneyStepGraph {
    pub fn build(journey: &Journey, guidelines: &[Guideline]) -> Result<Self> {
        let by_id: HashMap<&GuidelineId, &Guideline> =
            guidelines.iter().map(|g| (&g.id, g)).collect();

        let mut steps = Vec::with_capacity(journey.steps.len());
        let mut index = HashMap::with_capacity(journey.steps.len());

        for step_id in &journey.steps {
            let guideline = by_id.get(step_id).ok_or_else(|| {
                Error::InvalidJourney(format!(
                    "journey '{}' lists step '{}' but no step guideline was provided",
                    journey.id, step_id
                ))
            })?;

            let link = guideline.annotations.journey_step.as_ref().ok_or_else(|| {
                Error::InvalidJourney(format!(
                    "guideline '{}' is not linked to a journey step",
                    step_id
                ))
            })?;

            if link.journey_id != journey.id {
                return Err(Error::InvalidJourney(format!(
                    "step '{}' belongs to journey '{}', not '{}'",
                    step_id, link.journey_id, journey.id
                )));
            }

            if index.insert(step_id.clone(), steps.len()).is_some() {
                return Err(Error::InvalidJourney(format!(
                    "step '{}' is listed twice",
                    step_id
                )));
            }

            steps.push(JourneyStep {
                guideline: (*guideline).clone(),
                follow_ups: link.follow_ups.clone(),
                parents: Vec::new(),
                customer_dependent: guideline.annotations.is_customer_dependent(),
                requires_tool_calls: link.requires_tool_calls,
            });
        }

        let root = journey
            .root_step()
            .cloned()
            .ok_or_else(|| Error::InvalidJourney(format!("journey '{}' has no steps", journey.id)))?;
        if !index.contains_key(&root) {
            return Err(Error::InvalidJourney(format!(
                "root '{}' is not a step of journey '{}'",
                root, journey.id
            )));
        }

        for position in 0..steps.len() {
            let parent = steps[position].id().clone();
            for follow_up in steps[position].follow_ups.clone() {
                let target = *index.get(&follow_up).ok_or_else(|| {
                    Error::InvalidJourney(format!(
                        "step '{}' transitions to unknown step '{}'",
                        parent, follow_up
                    ))
                })?;
                if target != position {
                    steps[target].parents.push(parent.clone());
                }
            }
        }

        let graph = Self { root, steps, index };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut marks = vec![Mark::Unvisited; self.steps.len()];

        for start in 0..self.steps.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            // Iterative DFS; the frame holds (step, next follow-up to visit)
            let mut stack = vec![(start, 0usize)];
            marks[start] = Mark::InProgress;

            while let Some((node, cursor)) = stack.pop() {
                let follow_ups = &self.steps[node].follow_ups;
                if cursor == follow_ups.len() {
                    marks[node] = Mark::Done;
                    continue;
                }
                stack.push((node, cursor + 1));

                let next = self.index[&follow_ups[cursor]];
                if next == node {
                    continue;
                }
                match marks[next] {
                    Mark::InProgress => {
                        return Err(Error::InvalidJourney(format!(
                            "transition '{}' -> '{}' closes a cycle; only self-repeats are allowed",
                            self.steps[node].id(),
                            self.steps[next].id()
                        )));
                    }
                    Mark::Unvisited => {
                        marks[next] = Mark::InProgress;
                        stack.push((next, 0));
                    }
                    Mark::Done => {}
                }
            }
        }

        Ok(())
    }

    pub fn root(&self) -> &GuidelineId {
        &self.root
    }

    /// Steps in journey order
    pub fn steps(&self) -> &[JourneyStep] {
        &self.steps
    }

    pub fn step(&self, id: &GuidelineId) -> Option<&JourneyStep> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn contains(&self, id: &GuidelineId) -> bool {
        self.index.contains_key(id)
    }

    /// Position of a step in journey order
    pub fn position(&self, id: &GuidelineId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn is_transition(&self, from: &GuidelineId, to: &GuidelineId) -> bool {
        self.step(from)
            .is_some_and(|step| step.follow_ups.contains(to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guidelines::JourneyStepLink;
    use crate::ids::JourneyId;

    fn step(journey: &JourneyId, id: &str, follow_ups: &[&str]) -> Guideline {
        Guideline::actionable(format!("condition {}", id), format!("action {}", id))
            .with_id(id)
            .with_journey_step(
                JourneyStepLink::new(journey.clone())
                    .with_follow_ups(follow_ups.iter().map(|f| GuidelineId::from(*f)).collect()),
            )
    }

    fn journey(steps: &[&str]) -> Journey {
        Journey::new("Reset Password")
            .with_id("reset")
            .with_steps(steps.iter().map(|s| GuidelineId::from(*s)).collect())
    }

    #[test]
    fn test_builds_parents_from_follow_ups() {
        let j = journey(&["1", "2", "3"]);
        let guidelines = vec![
            step(&j.id, "1", &["2", "1"]),
            step(&j.id, "2", &["3"]),
            step(&j.id, "3", &[]),
        ];

        let graph = JourneyStepGraph::build(&j, &guidelines).unwrap();
        assert_eq!(graph.root().as_str(), "1");
        assert_eq!(graph.step(&"3".into()).unwrap().parents, vec![GuidelineId::from("2")]);
        assert!(graph.step(&"1".into()).unwrap().parents.is_empty());
        assert!(graph.is_transition(&"1".into(), &"2".into()));
        assert!(!graph.is_transition(&"1".into(), &"3".into()));
    }

    #[test]
    fn test_rejects_cycle_that_is_not_a_repeat() {
        let j = journey(&["1", "2"]);
        let guidelines = vec![step(&j.id, "1", &["2"]), step(&j.id, "2", &["1"])];

        let err = JourneyStepGraph::build(&j, &guidelines).unwrap_err();
        assert!(matches!(err, Error::InvalidJourney(_)));
    }

    #[test]
    fn test_rejects_unknown_follow_up() {
        let j = journey(&["1"]);
        let guidelines = vec![step(&j.id, "1", &["9"])];
        assert!(JourneyStepGraph::build(&j, &guidelines).is_err());
    }

    #[test]
    fn test_rejects_step_of_other_journey() {
        let j = journey(&["1"]);
        let other = JourneyId::from("other");
        let guidelines = vec![step(&other, "1", &[])];
        assert!(JourneyStepGraph::build(&j, &guidelines).is_err());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let j = journey(&["1", "2", "3", "4"]);
        let guidelines = vec![
            step(&j.id, "1", &["2", "3"]),
            step(&j.id, "2", &["4"]),
            step(&j.id, "3", &["4"]),
            step(&j.id, "4", &[]),
        ];
        let graph = JourneyStepGraph::build(&j, &guidelines).unwrap();
        assert_eq!(graph.step(&"4".into()).unwrap().parents.len(), 2);
    }
}
