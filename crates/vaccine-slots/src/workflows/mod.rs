pub mod availability;
pub mod display;
pub mod districts;
pub mod notify;
