pub mod controller;
pub mod models;
pub mod serialize;
pub mod worker;
