pub mod throttle;
pub mod token;

pub use throttle::AuthThrottle;
pub use token::{TokenManager, TokenSession};

/// The three authentication policies from the external-interfaces table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum AuthMode {
    Required,
    Token,
    None,
}
