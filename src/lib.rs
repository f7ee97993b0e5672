// Library exports for metafri
pub mod alignments;
pub mod atoms;
pub mod config;
pub mod contact_map;
pub mod elapsed_time;
pub mod error;
pub mod external_predictor;
pub mod pipeline;
pub mod predictor;
pub mod query_batch;
pub mod scheduler;
pub mod search;
pub mod target_db;

pub use error::AnnotateError;
