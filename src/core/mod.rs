pub mod errors;
pub mod identity;
pub mod matcher;
pub mod models;
pub mod notifier;
pub mod services;
pub mod traits;
