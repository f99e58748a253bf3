pub mod events;
pub mod lock;
pub mod memory;
pub mod traits;

pub use events::*;
pub use lock::*;
pub use memory::*;
pub use traits::*;
