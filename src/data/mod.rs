pub mod grid;
pub mod motion;
