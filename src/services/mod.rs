pub mod aggregator;
pub mod cache;
pub mod calendar;
pub mod credentials;
pub mod email;
pub mod github;
pub mod recurrence;
pub mod retry;
pub mod settings_store;
