pub mod alert;
pub mod bluetooth;
pub mod logging;
