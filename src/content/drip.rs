//! Drip schedule: time-gated unlocking of course modules.
//!
//! Availability is a pure function of `(purchase time, now, schedule)` and
//! is recomputed on every call — nothing is cached or stored, so a later
//! correction of the clock or the purchase timestamp fixes itself.

use crate::core::{AppError, AppResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A course's day-indexed release plan. Read-only reference data, loaded
/// from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DripSchedule {
    pub course: String,
    pub modules: Vec<CourseModule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseModule {
    /// The module becomes visible starting on this day of access, 1-indexed:
    /// day 1 is available immediately after purchase.
    pub day_number: u32,
    pub title: String,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(rename = "type")]
    pub kind: LessonKind,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonKind {
    Video,
    Homework,
    Test,
    Material,
}

/// Human-scale countdown: hours when under a day, days otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingTime {
    Hours(i64),
    Days(i64),
}

impl RemainingTime {
    /// Countdown from `now` to `unlock_at`, rounded up (a module opening in
    /// 4h10m reads "5 hours", never "4 hours" and then a locked door).
    pub fn until(now: DateTime<Utc>, unlock_at: DateTime<Utc>) -> Self {
        let secs = (unlock_at - now).num_seconds().max(0);
        let hours = (secs + 3599) / 3600;
        if hours < 24 {
            RemainingTime::Hours(hours)
        } else {
            RemainingTime::Days((hours + 23) / 24)
        }
    }
}

impl std::fmt::Display for RemainingTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemainingTime::Hours(h) => write!(f, "{} ч.", h),
            RemainingTime::Days(d) => write!(f, "{} дн.", d),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Locked {
        unlock_at: DateTime<Utc>,
        remaining: RemainingTime,
    },
}

/// One module of a schedule with its computed availability.
#[derive(Debug, Clone)]
pub struct ModuleAccess<'a> {
    pub module: &'a CourseModule,
    pub availability: Availability,
}

/// Whole days elapsed since purchase (floor; negative if `now` precedes the
/// purchase, which keeps everything locked).
pub fn elapsed_days(purchased_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - purchased_at).num_seconds().div_euclid(86_400)
}

/// A module with `day_number` N is available from day N of access, i.e.
/// once `elapsed_days >= N - 1`.
pub fn module_availability(purchased_at: DateTime<Utc>, now: DateTime<Utc>, module: &CourseModule) -> Availability {
    let offset_days = i64::from(module.day_number.max(1)) - 1;
    if elapsed_days(purchased_at, now) >= offset_days {
        Availability::Available
    } else {
        let unlock_at = purchased_at + Duration::days(offset_days);
        Availability::Locked {
            unlock_at,
            remaining: RemainingTime::until(now, unlock_at),
        }
    }
}

/// Availability of every module in schedule order.
pub fn schedule_access<'a>(
    purchased_at: DateTime<Utc>,
    now: DateTime<Utc>,
    schedule: &'a DripSchedule,
) -> Vec<ModuleAccess<'a>> {
    schedule
        .modules
        .iter()
        .map(|module| ModuleAccess {
            module,
            availability: module_availability(purchased_at, now, module),
        })
        .collect()
}

/// Load a schedule from a JSON file and validate day numbers.
pub fn load_schedule(path: &Path) -> AppResult<DripSchedule> {
    let raw = std::fs::read_to_string(path)?;
    let schedule: DripSchedule = serde_json::from_str(&raw)?;
    for module in &schedule.modules {
        if module.day_number == 0 {
            return Err(AppError::Validation(format!(
                "schedule '{}': module '{}' has day_number 0 (days are 1-indexed)",
                schedule.course, module.title
            )));
        }
    }
    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn module(day_number: u32) -> CourseModule {
        CourseModule {
            day_number,
            title: format!("Модуль {}", day_number),
            lessons: vec![],
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn day_one_available_at_purchase_time() {
        assert_eq!(module_availability(t0(), t0(), &module(1)), Availability::Available);
    }

    #[test]
    fn day_three_unlocks_on_day_three() {
        let m = module(3);
        // One day in: still locked.
        match module_availability(t0(), t0() + Duration::days(1), &m) {
            Availability::Locked { unlock_at, .. } => assert_eq!(unlock_at, t0() + Duration::days(2)),
            Availability::Available => panic!("day 3 module must be locked on day 2"),
        }
        // Two full days in: open.
        assert_eq!(
            module_availability(t0(), t0() + Duration::days(2), &m),
            Availability::Available
        );
    }

    #[test]
    fn locked_before_purchase_timestamp() {
        // Clock skew: "now" before the purchase yields negative elapsed
        // days, which must not unlock anything past day 1.
        let m = module(2);
        match module_availability(t0(), t0() - Duration::hours(1), &m) {
            Availability::Locked { .. } => {}
            Availability::Available => panic!("future purchase must not unlock later modules"),
        }
    }

    #[test]
    fn countdown_under_a_day_is_in_hours() {
        let unlock_at = t0() + Duration::hours(5);
        assert_eq!(RemainingTime::until(t0(), unlock_at), RemainingTime::Hours(5));
    }

    #[test]
    fn countdown_over_a_day_is_in_days() {
        let unlock_at = t0() + Duration::hours(50);
        assert_eq!(RemainingTime::until(t0(), unlock_at), RemainingTime::Days(3));
    }

    #[test]
    fn countdown_rounds_up() {
        let unlock_at = t0() + Duration::hours(4) + Duration::minutes(10);
        assert_eq!(RemainingTime::until(t0(), unlock_at), RemainingTime::Hours(5));
    }

    #[test]
    fn schedule_access_orders_and_computes_all() {
        let schedule = DripSchedule {
            course: "marketing".into(),
            modules: vec![module(1), module(3), module(7)],
        };
        let access = schedule_access(t0(), t0() + Duration::days(2), &schedule);
        assert_eq!(access.len(), 3);
        assert_eq!(access[0].availability, Availability::Available);
        assert_eq!(access[1].availability, Availability::Available);
        match access[2].availability {
            Availability::Locked { remaining, .. } => assert_eq!(remaining, RemainingTime::Days(4)),
            Availability::Available => panic!("day 7 module open on day 3"),
        }
    }

    #[test]
    fn load_schedule_rejects_zero_day_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{ "course": "bad", "modules": [ { "day_number": 0, "title": "x" } ] }"#,
        )
        .unwrap();
        assert!(load_schedule(&path).is_err());
    }

    #[test]
    fn schedule_json_parses_lesson_kinds() {
        let raw = r#"{
            "course": "intro",
            "modules": [
                {
                    "day_number": 1,
                    "title": "Старт",
                    "lessons": [
                        { "type": "video", "title": "Добро пожаловать" },
                        { "type": "homework", "title": "Задание 1", "content": "Опишите цель" }
                    ]
                }
            ]
        }"#;
        let schedule: DripSchedule = serde_json::from_str(raw).unwrap();
        assert_eq!(schedule.modules[0].lessons[0].kind, LessonKind::Video);
        assert_eq!(schedule.modules[0].lessons[1].kind, LessonKind::Homework);
    }
}
