pub mod mastery;

pub use mastery::*;
