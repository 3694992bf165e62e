//! Similarity banding: turns the best match of a search into reuse, alias or create.

use serde::Serialize;

use crate::store::{RecordKind, SimilarRecord};

/// Two ordered thresholds, `suggest < reuse`, partitioning `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityBands {
    pub suggest: f64,
    pub reuse: f64,
}

impl SimilarityBands {
    pub const LABELS: Self = Self { suggest: 0.75, reuse: 0.92 };
    pub const SUBJECTS: Self = Self { suggest: 0.70, reuse: 0.85 };

    pub fn new(suggest: f64, reuse: f64) -> Result<Self, String> {
        if !(0.0..=1.0).contains(&suggest) || !(0.0..=1.0).contains(&reuse) {
            return Err(format!("thresholds must lie in [0, 1] (suggest={suggest}, reuse={reuse})"));
        }
        if suggest >= reuse {
            return Err(format!("suggest threshold {suggest} must be below reuse threshold {reuse}"));
        }
        Ok(Self { suggest, reuse })
    }

    pub fn defaults_for(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Label => Self::LABELS,
            RecordKind::Subject => Self::SUBJECTS,
        }
    }

    /// Lowest similarity worth retrieving at all.
    pub fn search_floor(&self) -> f64 {
        self.suggest.min(self.reuse)
    }

    pub fn band(&self, similarity: f64) -> Band {
        if similarity >= self.reuse {
            Band::ReuseExisting
        } else if similarity >= self.suggest {
            Band::SuggestGrouping
        } else {
            Band::CreateNew
        }
    }

    /// Decision for the most similar candidate, if any. `candidates` must be
    /// ordered most similar first, as the record store returns them.
    pub fn decide(&self, candidates: &[SimilarRecord]) -> MatchDecision {
        match candidates.first() {
            None => MatchDecision::CreateNew,
            Some(best) => match self.band(best.similarity) {
                Band::ReuseExisting => MatchDecision::Reuse {
                    record_id: best.id.clone(),
                    similarity: best.similarity,
                },
                Band::SuggestGrouping => MatchDecision::Alias {
                    matched_id: best.id.clone(),
                    similarity: best.similarity,
                },
                Band::CreateNew => MatchDecision::CreateNew,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    CreateNew,
    SuggestGrouping,
    ReuseExisting,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    CreateNew,
    Alias { matched_id: String, similarity: f64 },
    Reuse { record_id: String, similarity: f64 },
}

impl MatchDecision {
    pub fn band(&self) -> Band {
        match self {
            Self::CreateNew => Band::CreateNew,
            Self::Alias { .. } => Band::SuggestGrouping,
            Self::Reuse { .. } => Band::ReuseExisting,
        }
    }
}

/// What finally happened to a classified discussion's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationAction {
    CreatedNew,
    ReusedExisting,
    CreatedAlias,
    Skip,
}

impl ClassificationAction {
    pub fn name(&self, kind: RecordKind) -> String {
        match self {
            Self::CreatedNew => format!("created_new_{}", kind.as_str()),
            Self::ReusedExisting => format!("reused_existing_{}", kind.as_str()),
            Self::CreatedAlias => format!("created_alias_{}", kind.as_str()),
            Self::Skip => "skip_classification".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn candidate(id: &str, similarity: f64) -> SimilarRecord {
        SimilarRecord { id: id.into(), name: id.into(), alias_of: None, similarity }
    }

    #[test]
    fn test_boundaries_are_inclusive_on_the_high_side() {
        let bands = SimilarityBands::SUBJECTS;
        assert_eq!(bands.band(0.85), Band::ReuseExisting);
        assert_eq!(bands.band(0.8499), Band::SuggestGrouping);
        assert_eq!(bands.band(0.70), Band::SuggestGrouping);
        assert_eq!(bands.band(0.6999), Band::CreateNew);
        assert_eq!(bands.search_floor(), 0.70);
    }

    #[test]
    fn test_decide_uses_the_first_candidate() {
        let bands = SimilarityBands::SUBJECTS;
        assert_eq!(bands.decide(&[]), MatchDecision::CreateNew);
        assert_eq!(
            bands.decide(&[candidate("a", 0.95), candidate("b", 0.90)]),
            MatchDecision::Reuse { record_id: "a".into(), similarity: 0.95 }
        );
        assert_eq!(
            bands.decide(&[candidate("c", 0.78)]),
            MatchDecision::Alias { matched_id: "c".into(), similarity: 0.78 }
        );
    }

    #[test]
    fn test_invalid_thresholds_are_rejected() {
        assert!(SimilarityBands::new(0.9, 0.8).is_err());
        assert!(SimilarityBands::new(0.8, 0.8).is_err());
        assert!(SimilarityBands::new(0.5, 1.2).is_err());
        assert!(SimilarityBands::new(0.0, 1.0).is_ok());
    }

    #[test]
    fn test_action_names_follow_the_record_kind() {
        assert_eq!(ClassificationAction::CreatedNew.name(RecordKind::Subject), "created_new_subject");
        assert_eq!(ClassificationAction::ReusedExisting.name(RecordKind::Label), "reused_existing_label");
        assert_eq!(ClassificationAction::CreatedAlias.name(RecordKind::Subject), "created_alias_subject");
        assert_eq!(ClassificationAction::Skip.name(RecordKind::Label), "skip_classification");
    }

    proptest! {
        #[test]
        fn prop_bands_partition_unit_interval(
            suggest in 0.0f64..0.99,
            gap in 0.001f64..1.0,
            similarity in 0.0f64..=1.0,
        ) {
            let reuse = (suggest + gap).min(1.0);
            prop_assume!(suggest < reuse);
            let bands = SimilarityBands::new(suggest, reuse).unwrap();
            let band = bands.band(similarity);
            let expected = [
                similarity < suggest,
                similarity >= suggest && similarity < reuse,
                similarity >= reuse,
            ];
            prop_assert_eq!(expected.iter().filter(|b| **b).count(), 1);
            match band {
                Band::CreateNew => prop_assert!(expected[0]),
                Band::SuggestGrouping => prop_assert!(expected[1]),
                Band::ReuseExisting => prop_assert!(expected[2]),
            }
        }
    }
}
