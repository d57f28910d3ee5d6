pub mod brief;
pub mod calendar;
pub mod github;
pub mod settings;
