pub mod branch_ops;
pub mod conflict;
pub mod diff;
pub mod history;
pub mod merge;
pub mod resolve;
pub mod validate;

pub use branch_ops::*;
pub use conflict::*;
pub use diff::*;
pub use merge::*;
pub use resolve::*;
pub use validate::*;
