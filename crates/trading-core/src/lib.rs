pub mod error;
pub mod session;
pub mod traits;
pub mod types;

pub use error::*;
pub use session::*;
pub use traits::*;
pub use types::*;
