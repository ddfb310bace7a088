//! Copy batches - instructions handed to the batch worker, in push order

mod prepare;
mod sort;

pub use prepare::CopyBatchPreparer;
pub use sort::{global_priority, operator_priority, sort_all_images, sort_operator_images};
