pub mod cutoff;
pub mod rule;

pub use cutoff::{compute_cutoffs, split_new, CUTOFF_LEN};
