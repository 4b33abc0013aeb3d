pub mod assemble;
pub mod health;
pub mod receive;
pub mod uploads;
