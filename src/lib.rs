// Public API
pub mod cli;
pub mod commands;

// Activation pipeline
pub mod activation;
pub mod compose;
pub mod deactivation;
pub mod fragment;
pub mod snapshot;
pub mod tools;

// Setup pipeline
pub mod bootstrap;
pub mod discovery;
pub mod setup;

// Core domain types
pub mod config;
pub mod environment;
pub mod error;
pub mod manifest;
pub mod platform;
pub mod repository;
mod template;
pub mod ui;
mod util;

pub use activation::{Activation, ActivationRequest, Invocation, ShellContext};
pub use environment::{EnvironmentVariables, Mutation, Shell};
pub use error::{DevEnvError, ErrorKind};
pub use manifest::Manifest;
pub use platform::{Architecture, OperatingSystem, Platform};
pub use repository::Repository;
pub use setup::{SetupOptions, SetupOutcome};
