pub mod config;
pub mod counters;
pub mod driver;
pub mod echo;
pub mod pool;
pub mod scheduler;
pub mod stats;
pub mod transport;

pub use config::*;
pub use counters::*;
pub use driver::*;
pub use echo::*;
pub use pool::*;
pub use scheduler::*;
pub use stats::*;
pub use transport::*;
