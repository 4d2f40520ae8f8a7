use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::recipients::Recipient;
use crate::segment::{Filter, FilterError, SegmentKey, SegmentSet};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("invalid segment '{segment}': {source}")]
    InvalidSegment {
        segment: String,
        #[source]
        source: FilterError,
    },

    #[error("member {member_id} matches none of the segments {segments:?}")]
    Unmatched {
        member_id: Uuid,
        segments: Vec<String>,
    },

    #[error("member {member_id} matches more than one segment: {matched:?}")]
    Overlapping {
        member_id: Uuid,
        matched: Vec<String>,
    },
}

/// A batch before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBatch {
    /// `None` for the single universal rendering.
    pub segment: Option<String>,
    /// Scoped expressions every recipient of this batch matches.
    pub scoped: Vec<String>,
    pub chunk_index: usize,
    pub recipients: Vec<Recipient>,
}

impl PlannedBatch {
    pub fn member_ids(&self) -> Vec<Uuid> {
        self.recipients.iter().map(|r| r.member_id).collect()
    }

    pub fn key(&self) -> SegmentKey {
        SegmentKey::new(self.segment.as_deref(), &self.scoped)
    }
}

/// Partitions `recipients` and chunks every partition into batches of at most
/// `max_batch_size`, keeping recipient order.
///
/// Every recipient must match exactly one status segment. Within a status
/// segment, recipients are further grouped by the exact set of scoped
/// expressions they match, so each batch shares one rendering. With no
/// segments all recipients share one partition.
pub fn plan(
    recipients: &[Recipient],
    set: &SegmentSet,
    max_batch_size: usize,
) -> Result<Vec<PlannedBatch>, PartitionError> {
    if max_batch_size == 0 {
        return Err(PartitionError::ZeroBatchSize);
    }

    let segments = set.segments();
    let filters = segments
        .iter()
        .map(|s| {
            Filter::parse(s).map_err(|source| PartitionError::InvalidSegment {
                segment: s.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let scoped: Vec<Option<Filter>> = set
        .scoped()
        .iter()
        .map(|expr| match Filter::parse(expr) {
            Ok(filter) => Some(filter),
            Err(e) => {
                warn!(segment = %expr, error = %e, "Scoped segment does not parse, it matches nobody");
                None
            }
        })
        .collect();

    let mut partitions: BTreeMap<(Option<usize>, Vec<usize>), Vec<Recipient>> = BTreeMap::new();

    for recipient in recipients {
        let status = if filters.is_empty() {
            None
        } else {
            let mut hits = filters
                .iter()
                .enumerate()
                .filter(|(_, f)| f.matches(recipient))
                .map(|(i, _)| i);

            let first = hits.next().ok_or_else(|| PartitionError::Unmatched {
                member_id: recipient.member_id,
                segments: segments.to_vec(),
            })?;

            if let Some(second) = hits.next() {
                let mut matched = vec![segments[first].clone(), segments[second].clone()];
                matched.extend(hits.map(|i| segments[i].clone()));
                return Err(PartitionError::Overlapping {
                    member_id: recipient.member_id,
                    matched,
                });
            }
            Some(first)
        };

        let signature: Vec<usize> = scoped
            .iter()
            .enumerate()
            .filter(|(_, f)| matches!(f, Some(filter) if filter.matches(recipient)))
            .map(|(i, _)| i)
            .collect();

        partitions
            .entry((status, signature))
            .or_default()
            .push(recipient.clone());
    }

    let mut batches = Vec::new();
    for ((status, signature), members) in partitions {
        let segment = status.map(|i| segments[i].clone());
        let matched: Vec<String> = signature.iter().map(|&i| set.scoped()[i].clone()).collect();
        for (chunk_index, chunk) in members.chunks(max_batch_size).enumerate() {
            batches.push(PlannedBatch {
                segment: segment.clone(),
                scoped: matched.clone(),
                chunk_index,
                recipients: chunk.to_vec(),
            });
        }
    }

    Ok(batches)
}
