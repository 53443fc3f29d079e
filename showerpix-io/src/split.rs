//! Deterministic train / validation / test partitioning.

use crate::{Error, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::str::FromStr;

/// Seed of the partition permutation.
pub const SPLIT_SEED: u64 = 42;

/// One of the three dataset partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Partition {
    Train,
    Validation,
    Test,
}

impl Partition {
    pub const ALL: [Self; 3] = [Self::Train, Self::Validation, Self::Test];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Self::Train),
            "validation" | "val" => Ok(Self::Validation),
            "test" => Ok(Self::Test),
            other => Err(Error::UnknownPartition(other.to_string())),
        }
    }
}

/// Frame indices of each partition.
///
/// The indices `0..n` are shuffled with a ChaCha8 generator seeded with
/// [`SPLIT_SEED`]; the first `floor(0.8 n)` go to training, the next
/// `floor(0.1 n)` to validation and the rest to test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionSplit {
    train: Vec<usize>,
    validation: Vec<usize>,
    test: Vec<usize>,
}

impl PartitionSplit {
    #[must_use]
    pub fn new(n_frames: usize) -> Self {
        Self::with_seed(n_frames, SPLIT_SEED)
    }

    #[must_use]
    pub fn with_seed(n_frames: usize, seed: u64) -> Self {
        let mut indices: Vec<usize> = (0..n_frames).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let n_train = n_frames * 8 / 10;
        let n_validation = n_frames / 10;
        let test = indices.split_off(n_train + n_validation);
        let validation = indices.split_off(n_train);
        Self {
            train: indices,
            validation,
            test,
        }
    }

    #[must_use]
    pub fn indices(&self, partition: Partition) -> &[usize] {
        match partition {
            Partition::Train => &self.train,
            Partition::Validation => &self.validation,
            Partition::Test => &self.test,
        }
    }

    #[must_use]
    pub fn len(&self, partition: Partition) -> usize {
        self.indices(partition).len()
    }

    /// Total number of frames across all partitions.
    #[must_use]
    pub fn total(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }
}
