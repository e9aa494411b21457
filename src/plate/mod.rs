pub mod normalizer;

/// Width of the `plate_number` column
pub const MAX_PLATE_LEN: usize = 16;

pub use normalizer::{Normalization, NormalizedPlate, PlateNormalizer, RejectReason};
