pub mod batch;
pub mod range;

pub use batch::BatchRunner;
pub use range::{RangeReport, RangeScanner};
