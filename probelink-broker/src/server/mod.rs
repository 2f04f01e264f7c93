pub mod listener;
pub mod params;
mod session;
