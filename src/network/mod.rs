//! Control-plane networking

pub mod registration;

pub use registration::{Credentials, RegistrationClient};
