pub mod cycle;
pub mod definition;
pub mod lag;
pub mod record;
pub mod window;

pub use cycle::{Cycle, CycleBuilder, CycleConfig};
pub use definition::CycleDefinition;
pub use record::{FluxRow, GasResult};
