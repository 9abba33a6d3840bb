pub mod linreg;
pub mod stats;

pub use linreg::LinReg;
pub use stats::{pearson_correlation, population_std, round_to};
