use std::collections::HashSet;
use std::sync::Arc;

use lingo_logging::{lingo_debug, lingo_warn};
use thiserror::Error;

use crate::{Segment, SegmentPatch};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("duplicate segment id {0}")]
    DuplicateId(String),
    #[error("duplicate segment order {order} (segments {first} and {second})")]
    DuplicateOrder {
        order: i32,
        first: String,
        second: String,
    },
}

/// Ordered, immutable snapshot of one document's segments.
///
/// Entries are shared `Arc`s: [`SegmentStore::merge`] only allocates the
/// replaced entry, so a renderer can detect changes with `Arc::ptr_eq`.
#[derive(Debug, Clone, Default)]
pub struct SegmentStore {
    segments: Vec<Arc<Segment>>,
}

impl SegmentStore {
    /// Build a store in display order. `order` and `id` must both be unique.
    pub fn new(segments: Vec<Segment>) -> Result<Self, StoreError> {
        let mut segments: Vec<Arc<Segment>> = segments.into_iter().map(Arc::new).collect();
        segments.sort_by_key(|segment| segment.order);

        let mut ids = HashSet::with_capacity(segments.len());
        for segment in &segments {
            if !ids.insert(segment.id.as_str()) {
                return Err(StoreError::DuplicateId(segment.id.clone()));
            }
        }
        if let Some(pair) = segments.windows(2).find(|pair| pair[0].order == pair[1].order) {
            return Err(StoreError::DuplicateOrder {
                order: pair[0].order,
                first: pair[0].id.clone(),
                second: pair[1].id.clone(),
            });
        }

        Ok(Self { segments })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Segment>> {
        self.segments.iter().find(|segment| segment.id == id)
    }

    /// Segments in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.segments.iter()
    }

    /// Returns a new snapshot with the entry for `id` replaced by a
    /// shallow-merged copy. Unknown ids leave the snapshot unchanged.
    pub fn merge(&self, id: &str, patch: &SegmentPatch) -> SegmentStore {
        let Some(index) = self.segments.iter().position(|segment| segment.id == id) else {
            lingo_warn!("merge ignored: segment {} not in store", id);
            return self.clone();
        };
        if patch.is_empty() {
            lingo_debug!("merge ignored: empty patch for segment {}", id);
            return self.clone();
        }

        let mut segments = self.segments.clone();
        segments[index] = Arc::new(segments[index].patched(patch));
        SegmentStore { segments }
    }

    /// Segments that still lack an explanation, in display order.
    pub fn pending_explanation(&self) -> Vec<Segment> {
        self.segments
            .iter()
            .filter(|segment| !segment.has_explanation())
            .map(|segment| Segment::clone(segment))
            .collect()
    }

    pub fn missing_explanation_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| !segment.has_explanation())
            .count()
    }

    pub fn to_vec(&self) -> Vec<Segment> {
        self.segments
            .iter()
            .map(|segment| Segment::clone(segment))
            .collect()
    }
}

impl PartialEq for SegmentStore {
    fn eq(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| Arc::ptr_eq(a, b) || a == b)
    }
}

#[cfg(test)]
mod tests {
    use super::{SegmentStore, StoreError};
    use crate::{Explanation, Segment, SegmentPatch};
    use std::sync::Arc;

    fn store() -> SegmentStore {
        SegmentStore::new(vec![
            Segment::new("b", 1, "Bye"),
            Segment::new("a", 0, "Hi"),
            Segment::new("c", 2, "See you"),
        ])
        .unwrap()
    }

    #[test]
    fn sorted_by_order() {
        let ids: Vec<_> = store().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_duplicate_order_and_id() {
        let err = SegmentStore::new(vec![Segment::new("a", 0, "x"), Segment::new("b", 0, "y")])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrder { order: 0, .. }));

        let err = SegmentStore::new(vec![Segment::new("a", 0, "x"), Segment::new("a", 1, "y")])
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateId("a".into()));
    }

    #[test]
    fn merge_replaces_only_target_entry() {
        let before = store();
        let patch = SegmentPatch::from_explanation(&Explanation::with_translation("T"));
        let after = before.merge("b", &patch);

        assert!(Arc::ptr_eq(before.get("a").unwrap(), after.get("a").unwrap()));
        assert!(Arc::ptr_eq(before.get("c").unwrap(), after.get("c").unwrap()));
        assert!(!Arc::ptr_eq(before.get("b").unwrap(), after.get("b").unwrap()));
        assert_eq!(after.get("b").unwrap().translation.as_deref(), Some("T"));
        assert!(before.get("b").unwrap().translation.is_none());
    }

    #[test]
    fn merge_unknown_id_is_noop() {
        let before = store();
        let after = before.merge("zzz", &SegmentPatch::default());
        assert_eq!(before, after);
        assert!(before
            .iter()
            .zip(after.iter())
            .all(|(a, b)| Arc::ptr_eq(a, b)));
    }

    #[test]
    fn merge_keeps_fields_missing_from_patch() {
        let before = store().merge(
            "a",
            &SegmentPatch {
                reading_text: Some("hai".into()),
                ..SegmentPatch::default()
            },
        );
        let after = before.merge(
            "a",
            &SegmentPatch {
                translation: Some("T".into()),
                ..SegmentPatch::default()
            },
        );
        let a = after.get("a").unwrap();
        assert_eq!(a.reading_text.as_deref(), Some("hai"));
        assert_eq!(a.translation.as_deref(), Some("T"));
        assert!(a.explanation.is_none());
    }

    #[test]
    fn pending_explanation_skips_explained_segments() {
        let patch = SegmentPatch::from_explanation(&Explanation::with_translation("T"));
        let store = store().merge("a", &patch);
        let pending: Vec<_> = store.pending_explanation().into_iter().map(|s| s.id).collect();
        assert_eq!(pending, vec!["b", "c"]);
        assert_eq!(store.missing_explanation_count(), 2);
    }
}
