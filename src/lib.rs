pub mod config;
pub mod docker;
pub mod download;
pub mod exec;
pub mod helm;
pub mod host;
pub mod kind;
pub mod kubestuff;
pub mod preflight;
pub mod probe;
pub mod progress;
pub mod provision;
pub mod teardown;
pub mod topology;

#[cfg(test)]
mod testing;
