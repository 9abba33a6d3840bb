pub mod constants;
pub mod cycle;
pub mod cycle_processor;
pub mod data_formats;
pub mod datatype;
pub mod db;
pub mod error;
pub mod errorcode;
pub mod flux;
pub mod gastype;
pub mod instruments;
pub mod processevent;
pub mod stats;
pub mod traits;
pub mod types;
pub mod utils;
pub mod validation;
