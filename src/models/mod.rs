pub mod brief;
pub mod calendar;
pub mod email;
pub mod github;
pub mod settings;

pub use brief::*;
pub use calendar::*;
pub use email::*;
pub use github::*;
pub use settings::*;
