pub mod clock;
pub mod fold;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use fold::fold;
pub use types::{EventDetails, LearningEvent, MasteryAggregate, PASSING_SCORE, QUIZ_ATTEMPT};
