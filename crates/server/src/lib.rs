//! HTTP/JSON front end of the remcache remote build cache

pub mod response;
pub mod router;
pub mod server;
pub mod settings;
pub mod state;
pub mod wire;

pub use router::Router;
pub use server::serve;
pub use settings::{ServerSettings, SettingsOverrides};
pub use state::AppState;
