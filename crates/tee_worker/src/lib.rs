pub mod api;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod health;
pub mod priority;
pub mod queue;
pub mod sealing;
pub mod telemetry;

pub use dispatch::{Handler, JobServer, JobServerConfig};
pub use sealing::{KeyRing, OsKeystoreSealer, Sealer};
