//! Course content: drip schedules and unlock computation

pub mod drip;

pub use drip::{
    elapsed_days, load_schedule, module_availability, schedule_access, Availability, CourseModule, DripSchedule,
    Lesson, LessonKind, ModuleAccess, RemainingTime,
};
