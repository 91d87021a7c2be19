pub mod auth;
pub mod chart;
pub mod rest;

pub use rest::router;
