//! Splits an observation's pending files into backend-sized batches.

use std::collections::BTreeMap;

use crate::models::{DataFile, ObjectKey};

/// Files deleted together: one backend call inside one catalogue transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Storage location shared by every file in the batch
    pub location: i32,
    /// Position of this batch among the batches of its location
    pub index: usize,
    pub files: Vec<DataFile>,
}

impl Batch {
    pub fn object_keys(&self) -> Vec<ObjectKey> {
        self.files.iter().map(DataFile::object_key).collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files
            .iter()
            .map(|f| u64::try_from(f.size_bytes).unwrap_or_default())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Group files by location (ascending location code) and cut each group into
/// batches of at most `max_batch_size` files, keeping the input order.
///
/// A batch never mixes locations. A `max_batch_size` of zero is treated as one.
pub fn plan_batches(files: Vec<DataFile>, max_batch_size: usize) -> Vec<Batch> {
    let size = max_batch_size.max(1);

    let mut by_location: BTreeMap<i32, Vec<DataFile>> = BTreeMap::new();
    for file in files {
        by_location.entry(file.location).or_default().push(file);
    }

    let mut batches = Vec::new();
    for (location, files) in by_location {
        let mut remaining = files.into_iter().peekable();
        let mut index = 0;
        while remaining.peek().is_some() {
            batches.push(Batch {
                location,
                index,
                files: remaining.by_ref().take(size).collect(),
            });
            index += 1;
        }
    }

    batches
}
