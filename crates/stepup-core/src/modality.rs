//! Modality selection
//!
//! Turns an actor's enrollment into an ordered, non-empty [`ModalityPlan`].

use crate::contracts::EnrollmentStore;
use crate::types::{ActorId, Modality};
use std::sync::Arc;

/// Ordered, de-duplicated, never-empty list of eligible modalities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalityPlan {
    modalities: Vec<Modality>,
}

impl ModalityPlan {
    /// Plan with a single modality
    #[inline]
    #[must_use]
    pub fn single(modality: Modality) -> Self {
        Self {
            modalities: vec![modality],
        }
    }

    /// Build from enrollment order, `None` when nothing is enrolled
    #[must_use]
    pub fn from_enrolled(enrolled: impl IntoIterator<Item = Modality>) -> Option<Self> {
        let mut modalities: Vec<Modality> = Vec::new();
        for modality in enrolled {
            if !modalities.contains(&modality) {
                modalities.push(modality);
            }
        }
        (!modalities.is_empty()).then_some(Self { modalities })
    }

    /// Most preferred modality
    #[inline]
    #[must_use]
    pub fn primary(&self) -> Modality {
        self.modalities[0]
    }

    /// All modalities in preference order
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[Modality] {
        &self.modalities
    }

    /// Iterate in preference order
    pub fn iter(&self) -> impl Iterator<Item = Modality> + '_ {
        self.modalities.iter().copied()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.modalities.len()
    }

    /// Always false; kept for API symmetry with `len`
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Resolves eligible modalities for an actor
pub struct ModalitySelector {
    enrollments: Arc<dyn EnrollmentStore>,
    default_modality: Modality,
}

impl std::fmt::Debug for ModalitySelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModalitySelector")
            .field("default_modality", &self.default_modality)
            .finish_non_exhaustive()
    }
}

impl ModalitySelector {
    /// Selector falling back to facial, which needs no enrollment
    #[must_use]
    pub fn new(enrollments: Arc<dyn EnrollmentStore>) -> Self {
        Self::with_default(enrollments, Modality::Facial)
    }

    /// Selector with an explicit fallback modality
    #[must_use]
    pub fn with_default(enrollments: Arc<dyn EnrollmentStore>, default_modality: Modality) -> Self {
        Self {
            enrollments,
            default_modality,
        }
    }

    /// Eligible modalities for the actor, in preference order
    ///
    /// An empty enrollment, or an enrollment lookup failure, yields the
    /// default modality alone.
    pub async fn select_modalities(&self, actor_id: &ActorId) -> ModalityPlan {
        let enrolled = match self.enrollments.get(actor_id).await {
            Ok(enrolled) => enrolled,
            Err(e) => {
                tracing::warn!(actor = %actor_id, "enrollment lookup failed: {}", e);
                Vec::new()
            }
        };

        ModalityPlan::from_enrolled(enrolled).unwrap_or_else(|| {
            tracing::debug!(
                actor = %actor_id,
                modality = %self.default_modality,
                "no enrollment, using default modality"
            );
            ModalityPlan::single(self.default_modality)
        })
    }
}
