pub mod audio;
pub mod chat;
pub mod config;
pub mod cookies;
pub mod error;
pub mod fetch;
pub mod formats;
pub mod links;
pub mod notify;
pub mod probe;
pub mod relay;
pub mod report;
pub mod runner;

pub use config::Config;
pub use error::FetchError;
pub use fetch::{FetchContext, Outcome};
pub use links::{classify, Platform, RecognizedLink};
pub use relay::{Incoming, Relay};
