//! Bounded walks over first-parent commit ancestry.

use std::collections::HashSet;

use crate::error::{Result, VersioningError};
use crate::store::SchemaRepository;

/// The commit itself followed by its first-parent ancestors, newest first,
/// stopping at the root or after `max_depth` parents.
pub async fn ancestor_chain<S: SchemaRepository + ?Sized>(
    store: &S,
    commit_id: &str,
    max_depth: usize,
) -> Result<Vec<String>> {
    let mut chain = vec![commit_id.to_string()];
    let mut current = commit_id.to_string();

    while chain.len() <= max_depth {
        match store.get_ancestry(&current).await? {
            Some(parent) => {
                chain.push(parent.clone());
                current = parent;
            }
            None => break,
        }
    }

    Ok(chain)
}

/// Most recent commit reachable from both `left` and `right`
pub async fn find_common_ancestor<S: SchemaRepository + ?Sized>(
    store: &S,
    left: &str,
    right: &str,
    max_depth: usize,
) -> Result<String> {
    let left_chain = ancestor_chain(store, left, max_depth).await?;
    let right_chain: HashSet<String> = ancestor_chain(store, right, max_depth)
        .await?
        .into_iter()
        .collect();

    left_chain
        .into_iter()
        .find(|commit| right_chain.contains(commit))
        .ok_or_else(|| VersioningError::DivergedHistory {
            left: left.to_string(),
            right: right.to_string(),
            max_depth,
        })
}

/// Whether `ancestor` is `descendant` or one of its first-parent ancestors
pub async fn is_ancestor<S: SchemaRepository + ?Sized>(
    store: &S,
    ancestor: &str,
    descendant: &str,
    max_depth: usize,
) -> Result<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    let chain = ancestor_chain(store, descendant, max_depth).await?;
    Ok(chain.iter().any(|c| c == ancestor))
}
