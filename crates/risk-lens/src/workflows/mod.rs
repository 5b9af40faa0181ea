pub mod application;
pub mod explanation;
