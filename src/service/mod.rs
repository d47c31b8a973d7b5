//! Service layer module

pub mod driver;
pub mod lifecycle;
pub mod restorer;
pub mod types;

pub use driver::BatchDriver;
pub use lifecycle::{ProcessManager, ProcessState};
pub use restorer::ExpressionRestorer;
pub use types::*;
