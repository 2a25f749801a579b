pub mod availability;
pub mod booking;
pub mod classifier;
pub mod expiry;
pub mod lock;
pub mod reservation;
pub mod retry;
pub mod session;
pub mod suggester;
pub mod validation;

pub use availability::*;
pub use booking::*;
pub use classifier::*;
pub use expiry::*;
pub use lock::*;
pub use reservation::*;
pub use retry::*;
pub use session::*;
pub use suggester::*;
pub use validation::*;
