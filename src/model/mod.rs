pub mod branch;
pub mod change;
pub mod commit;
pub mod common;
pub mod conflict;
pub mod entity;
pub mod event;
pub mod merge;
pub mod rules;
pub mod snapshot;

pub use branch::*;
pub use change::*;
pub use commit::*;
pub use common::*;
pub use conflict::*;
pub use entity::*;
pub use event::*;
pub use merge::*;
pub use rules::*;
pub use snapshot::*;
