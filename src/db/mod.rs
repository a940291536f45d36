pub mod booking;
pub mod memory;
pub mod subscription;
pub mod utils;
pub mod wallet;
