//! Cluster-chain traversal, allocation, and freeing.
//!
//! `allocate` mirrors `PyFat.allocate_bytes`: scan from the free-cluster
//! hint, skipping bad/reserved cells, collect exactly as many free cells as
//! needed, link them, and move the hint to the last index examined (not the
//! last index allocated) so that repeated small allocations do not re-scan
//! from the start every time. `free_chain` mirrors `PyFat.free_cluster_chain`:
//! build the post-free state on a shadow copy, then install it atomically so
//! a mid-walk corruption error never leaves the table half-mutated.

use super::{ClusterValue, FatTable};
use crate::error::{ChainCorruption, FatError, Result};

/// A lazy, restartable iterator over a cluster chain's indices.
pub struct ClusterChain<'a> {
    fat: &'a FatTable,
    current: Option<u32>,
    done: bool,
}

impl<'a> ClusterChain<'a> {
    pub fn new(fat: &'a FatTable, start: u32) -> Self {
        ClusterChain {
            fat,
            current: Some(start),
            done: false,
        }
    }
}

impl<'a> Iterator for ClusterChain<'a> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let c = self.current?;
        match self.fat.classify(c) {
            ClusterValue::Data(next) => {
                self.current = Some(next);
                Some(Ok(c))
            }
            ClusterValue::Eoc | ClusterValue::SpecialEoc => {
                self.done = true;
                Some(Ok(c))
            }
            ClusterValue::Bad => {
                self.done = true;
                Some(Err(FatError::CorruptChain(ChainCorruption::BadCluster)))
            }
            ClusterValue::Free => {
                self.done = true;
                Some(Err(FatError::CorruptChain(ChainCorruption::FreeInChain)))
            }
            ClusterValue::Reserved(_) => {
                self.done = true;
                Some(Err(FatError::CorruptChain(ChainCorruption::InvalidValue)))
            }
        }
    }
}

/// Allocate `n` free clusters, link them into a chain, and return the
/// indices in chain order. `first_free_hint` is advanced to the last index
/// examined during the scan.
pub fn allocate(fat: &mut FatTable, first_free_hint: &mut u32, n: usize) -> Result<Vec<u32>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let min_data = fat.min_data();
    let max_data = fat.max_data();
    let mut found = Vec::with_capacity(n);
    let mut last_examined = *first_free_hint;
    let mut c = (*first_free_hint).max(min_data);

    while c <= max_data && found.len() < n {
        last_examined = c;
        if matches!(fat.classify(c), ClusterValue::Free) {
            found.push(c);
        }
        c += 1;
    }

    if found.len() < n {
        let bytes_free = found.len() as u64; // caller scales by bytes-per-cluster
        return Err(FatError::NoSpace {
            free_bytes: bytes_free,
        });
    }

    for w in found.windows(2) {
        fat.set_data(w[0], w[1]);
    }
    if let Some(&last) = found.last() {
        fat.set_eoc(last);
    }

    *first_free_hint = last_examined;
    Ok(found)
}

/// Free every cluster in the chain starting at `head`. The FAT is only
/// mutated after the full chain has been walked successfully.
pub fn free_chain(fat: &mut FatTable, first_free_hint: &mut u32, head: u32) -> Result<()> {
    let mut to_free = Vec::new();
    for cluster in ClusterChain::new(fat, head) {
        to_free.push(cluster?);
    }

    let mut shadow = fat.clone();
    for &c in &to_free {
        shadow.set_free(c);
    }
    *fat = shadow;

    if let Some(&min) = to_free.iter().min() {
        if min < *first_free_hint {
            *first_free_hint = min;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::FatType;

    fn fresh_table(n: usize) -> FatTable {
        FatTable::new(FatType::Fat16, n)
    }

    #[test]
    fn allocate_links_chain_and_terminates_with_eoc() {
        let mut fat = fresh_table(16);
        let mut hint = 2;
        let chain = allocate(&mut fat, &mut hint, 3).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(fat.classify(chain[0]), ClusterValue::Data(chain[1]));
        assert_eq!(fat.classify(chain[1]), ClusterValue::Data(chain[2]));
        assert_eq!(fat.classify(chain[2]), ClusterValue::Eoc);
    }

    #[test]
    fn traverse_collects_whole_chain() {
        let mut fat = fresh_table(16);
        let mut hint = 2;
        let chain = allocate(&mut fat, &mut hint, 4).unwrap();
        let walked: Vec<u32> = ClusterChain::new(&fat, chain[0])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(walked, chain);
    }

    #[test]
    fn free_then_realloc_reuses_clusters() {
        let mut fat = fresh_table(16);
        let mut hint = 2;
        let chain = allocate(&mut fat, &mut hint, 4).unwrap();
        let head = chain[0];
        free_chain(&mut fat, &mut hint, head).unwrap();
        for &c in &chain {
            assert_eq!(fat.classify(c), ClusterValue::Free);
        }
        assert!(hint <= head);
    }

    #[test]
    fn no_space_when_insufficient_free_clusters() {
        let mut fat = fresh_table(6); // only clusters 2..=5 usable
        let mut hint = 2;
        let err = allocate(&mut fat, &mut hint, 10).unwrap_err();
        assert!(matches!(err, FatError::NoSpace { .. }));
    }

    #[test]
    fn traverse_detects_free_in_chain_as_corruption() {
        let mut fat = fresh_table(8);
        fat.set_data(2, 3); // 3 is still free -> corrupt chain
        let err = ClusterChain::new(&fat, 2).last().unwrap().unwrap_err();
        assert!(matches!(
            err,
            FatError::CorruptChain(ChainCorruption::FreeInChain)
        ));
    }
}
