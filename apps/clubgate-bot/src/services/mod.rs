pub mod access_service;
pub mod payment_service;
pub mod sweeper;
pub mod verify_service;
