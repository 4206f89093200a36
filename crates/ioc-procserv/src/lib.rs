pub mod backoff;
pub mod banner;
pub mod channel;
pub mod error;
pub mod ops;
pub mod protocol;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod state;
pub mod transport;

pub use backoff::*;
pub use banner::*;
pub use channel::*;
pub use error::*;
pub use ops::*;
pub use protocol::*;
pub use state::*;
pub use transport::*;
