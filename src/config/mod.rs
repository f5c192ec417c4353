#[cfg(feature = "cli")]
pub mod cli;
pub mod profile;
pub mod secrets;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use profile::{Profile, ProfilesFile};
pub use secrets::Secrets;
