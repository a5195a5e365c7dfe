//! Question selection collaborator seam
//!
//! The coordinator never owns question data; it asks an external service for
//! a question matching the offer's criteria when a session is created. The
//! static selector bundled here serves development and tests.

use crate::error::{CoordinatorError, Result};
use crate::types::{Complexity, MatchCriteria, QuestionRef};
use async_trait::async_trait;

/// Trait for the external question-selection service
#[async_trait]
pub trait QuestionSelector: Send + Sync {
    /// Select a question matching the given criteria
    async fn select_question(&self, criteria: &MatchCriteria) -> Result<QuestionRef>;
}

/// Static in-memory selector with a small criteria-matched table.
///
/// Selection is deterministic per criteria so test runs are reproducible.
pub struct StaticQuestionSelector {
    table: Vec<(Complexity, &'static str, QuestionRef)>,
}

impl Default for StaticQuestionSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticQuestionSelector {
    pub fn new() -> Self {
        let entry = |complexity, category: &'static str, id: &str, title: &str| {
            (
                complexity,
                category,
                QuestionRef {
                    id: id.to_string(),
                    title: title.to_string(),
                },
            )
        };

        Self {
            table: vec![
                entry(Complexity::Easy, "Arrays", "q-contains-duplicate", "Contains Duplicate"),
                entry(Complexity::Easy, "Strings", "q-valid-anagram", "Valid Anagram"),
                entry(Complexity::Medium, "Arrays", "q-two-sum-ii", "Two Sum II"),
                entry(Complexity::Medium, "Strings", "q-longest-substring", "Longest Substring Without Repeating Characters"),
                entry(Complexity::Medium, "Graphs", "q-number-of-islands", "Number of Islands"),
                entry(Complexity::Hard, "Arrays", "q-median-sorted-arrays", "Median of Two Sorted Arrays"),
                entry(Complexity::Hard, "Graphs", "q-word-ladder", "Word Ladder"),
            ],
        }
    }
}

#[async_trait]
impl QuestionSelector for StaticQuestionSelector {
    async fn select_question(&self, criteria: &MatchCriteria) -> Result<QuestionRef> {
        // Exact complexity+category match first, then complexity alone
        self.table
            .iter()
            .find(|(c, cat, _)| *c == criteria.complexity && *cat == criteria.category)
            .or_else(|| {
                self.table
                    .iter()
                    .find(|(c, _, _)| *c == criteria.complexity)
            })
            .map(|(_, _, q)| q.clone())
            .ok_or_else(|| {
                CoordinatorError::NotFound {
                    entity: format!(
                        "question for {} / {}",
                        criteria.complexity, criteria.category
                    ),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria(complexity: Complexity, category: &str) -> MatchCriteria {
        MatchCriteria {
            complexity,
            category: category.to_string(),
            language: "Python".to_string(),
        }
    }

    #[tokio::test]
    async fn test_exact_category_match() {
        let selector = StaticQuestionSelector::new();
        let q = selector
            .select_question(&criteria(Complexity::Medium, "Arrays"))
            .await
            .unwrap();
        assert_eq!(q.id, "q-two-sum-ii");
    }

    #[tokio::test]
    async fn test_falls_back_to_complexity() {
        let selector = StaticQuestionSelector::new();
        let q = selector
            .select_question(&criteria(Complexity::Hard, "Dynamic Programming"))
            .await
            .unwrap();
        assert_eq!(q.id, "q-median-sorted-arrays");
    }

    #[tokio::test]
    async fn test_selection_is_deterministic() {
        let selector = StaticQuestionSelector::new();
        let c = criteria(Complexity::Easy, "Strings");
        let first = selector.select_question(&c).await.unwrap();
        let second = selector.select_question(&c).await.unwrap();
        assert_eq!(first, second);
    }
}
