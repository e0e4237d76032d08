mod eligibility;
mod exams;
mod lives;

pub use eligibility::*;
pub use exams::*;
pub use lives::*;
