//! Fragment aggregation.
//!
//! Fragments key on (authority, attribute type). Inserting a different
//! fragment under an occupied cell is an error, never a silent overwrite;
//! re-inserting the identical fragment is harmless.

use std::collections::{BTreeMap, BTreeSet};

use tessera_core::{AttrType, AttributeLabel, AuthorityId, ReaderGid};
use tessera_policy::{KeyFragment, PartialKey, PolicyExpr};

use crate::error::{ReaderError, ReaderResult};

#[derive(Debug, Clone)]
pub struct AggregatedKey {
    gid: ReaderGid,
    fragments: BTreeMap<(AuthorityId, AttrType), KeyFragment>,
}

impl AggregatedKey {
    pub fn new(gid: ReaderGid) -> Self {
        Self {
            gid,
            fragments: BTreeMap::new(),
        }
    }

    pub fn gid(&self) -> &ReaderGid {
        &self.gid
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn insert(&mut self, fragment: KeyFragment) -> ReaderResult<()> {
        let cell = (fragment.authority_id, fragment.attr_type);
        match self.fragments.get(&cell) {
            None => {
                self.fragments.insert(cell, fragment);
                Ok(())
            }
            Some(existing) if *existing == fragment => Ok(()),
            Some(_) => Err(ReaderError::FragmentCollision {
                authority: cell.0,
                attr_type: cell.1,
            }),
        }
    }

    /// Merge a server response; the response must be addressed to this key's
    /// gid.
    pub fn merge(&mut self, partial: PartialKey) -> ReaderResult<()> {
        if partial.gid != self.gid {
            return Err(ReaderError::Rejected(format!(
                "partial key addressed to {}, aggregating for {}",
                partial.gid, self.gid
            )));
        }
        for fragment in partial.fragments {
            self.insert(fragment)?;
        }
        Ok(())
    }

    pub fn fragments(&self) -> Vec<KeyFragment> {
        self.fragments.values().cloned().collect()
    }

    pub fn held_labels(&self) -> BTreeSet<AttributeLabel> {
        self.fragments.values().map(|f| f.label.clone()).collect()
    }

    /// Labels a policy still needs beyond what is aggregated here.
    pub fn missing_for(&self, policy: &PolicyExpr) -> Vec<AttributeLabel> {
        policy.missing_labels(&self.held_labels())
    }
}
