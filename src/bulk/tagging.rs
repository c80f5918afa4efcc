//! Correlation tags shared by the rows of one bulk insert or load.

use crate::error::{BulkError, WriteResult};
use crate::model::Model;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Parses a caller-supplied tag.
pub fn parse_tag(text: &str) -> WriteResult<Uuid> {
    Uuid::parse_str(text.trim())
        .map_err(|e| BulkError::invalid(format!("invalid correlation tag {text:?}: {e}")))
}

/// Tags every record lacking a correlation tag with `tag`, or with a fresh
/// v4 uuid generated once for the whole call.
///
/// Returns every tag present on the records afterwards, including tags the
/// caller had already set. Models without tag support yield an empty set.
pub fn attach_correlation_tags<M: Model>(records: &mut [M], tag: Option<Uuid>) -> BTreeSet<Uuid> {
    let mut tags = BTreeSet::new();
    if !M::schema().supports_correlation_tag() {
        return tags;
    }

    let tag = tag.unwrap_or_else(Uuid::new_v4);
    let mut attached = 0usize;

    for record in records.iter_mut() {
        let Some(tagged) = record.correlation_mut() else {
            continue;
        };
        match tagged.correlation_tag() {
            Some(existing) => {
                tags.insert(existing);
            }
            None => {
                tagged.set_correlation_tag(tag);
                attached += 1;
                tags.insert(tag);
            }
        }
    }

    log::trace!("attached correlation tag {} to {} records", tag, attached);
    tags
}
