//! Domain models for the clinical notes engine.

mod appointment;
mod audit;
mod note;
mod user;

pub use appointment::*;
pub use audit::*;
pub use note::*;
pub use user::*;
