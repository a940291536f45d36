pub mod auth;
pub mod booking;
pub mod settlement;
pub mod subscription;
pub mod utils;
pub mod wallet;
