use chrono::{DateTime, Days, FixedOffset, NaiveTime, TimeZone, Timelike};

use crate::bedtime::schedule::{ScheduleConfig, TimeOfDay};

/// Decides whether an instant falls inside the bedtime window
///
/// All comparisons happen on minutes since midnight in the offset carried by
/// `now`, so the caller controls which timezone is "active".
pub struct WindowEvaluator;

impl WindowEvaluator {
    /// Check if `now` is inside the half-open window `[bedtime, wake)`
    pub fn is_within_bedtime_window<Tz: TimeZone>(
        now: &DateTime<Tz>,
        bedtime: TimeOfDay,
        wake: TimeOfDay,
    ) -> bool {
        let now_minutes = (now.hour() * 60 + now.minute()) as u16;
        Self::window_contains(now_minutes, bedtime.minutes(), wake.minutes())
    }

    /// Same as [`Self::is_within_bedtime_window`] for a stored schedule
    pub fn is_in_bedtime<Tz: TimeZone>(now: &DateTime<Tz>, schedule: &ScheduleConfig) -> bool {
        Self::is_within_bedtime_window(now, schedule.bedtime, schedule.wake)
    }

    /// Window membership on raw minutes-since-midnight values
    pub fn window_contains(now: u16, bedtime: u16, wake: u16) -> bool {
        if bedtime == wake {
            // Degenerate schedule: never active
            return false;
        }

        if bedtime > wake {
            now >= bedtime || now < wake
        } else {
            now >= bedtime && now < wake
        }
    }

    /// The latest instant at or before `now` at which a bedtime period began
    ///
    /// Returns `None` for a degenerate schedule, which has no periods.
    pub fn most_recent_bedtime_start(
        now: &DateTime<FixedOffset>,
        schedule: &ScheduleConfig,
    ) -> Option<DateTime<FixedOffset>> {
        if schedule.is_degenerate() {
            return None;
        }

        let bedtime = NaiveTime::from_hms_opt(
            schedule.bedtime.hour() as u32,
            schedule.bedtime.minute() as u32,
            0,
        )?;

        let today = now.date_naive();
        let day = if now.time() >= bedtime {
            today
        } else {
            today.checked_sub_days(Days::new(1))?
        };

        now.offset()
            .from_local_datetime(&day.and_time(bedtime))
            .single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_window_table() {
        // (bedtime, wake, now, expected)
        let cases: &[(&str, &str, &str, bool)] = &[
            // Crosses midnight
            ("22:00", "07:00", "21:59", false),
            ("22:00", "07:00", "22:00", true),
            ("22:00", "07:00", "23:30", true),
            ("22:00", "07:00", "00:00", true),
            ("22:00", "07:00", "06:59", true),
            ("22:00", "07:00", "07:00", false),
            ("22:00", "07:00", "12:00", false),
            // Same-day window
            ("09:00", "17:00", "08:59", false),
            ("09:00", "17:00", "09:00", true),
            ("09:00", "17:00", "12:00", true),
            ("09:00", "17:00", "16:59", true),
            ("09:00", "17:00", "17:00", false),
            ("09:00", "17:00", "23:00", false),
            // Edges of the day
            ("00:00", "06:00", "00:00", true),
            ("00:00", "06:00", "23:59", false),
            ("23:59", "00:00", "23:59", true),
            ("23:59", "00:00", "00:00", false),
            // Degenerate
            ("08:00", "08:00", "08:00", false),
            ("08:00", "08:00", "07:59", false),
            ("08:00", "08:00", "20:00", false),
        ];

        for (bedtime, wake, now, expected) in cases {
            let result =
                WindowEvaluator::window_contains(t(now).minutes(), t(bedtime).minutes(), t(wake).minutes());
            assert_eq!(
                result, *expected,
                "bedtime={} wake={} now={}",
                bedtime, wake, now
            );
        }
    }

    #[test]
    fn test_exhaustive_matches_reference_definition() {
        // Every minute of the day against a handful of schedules of each shape
        let schedules = [(1320u16, 420u16), (540, 1020), (0, 1), (1439, 0), (600, 600)];

        for (bedtime, wake) in schedules {
            for now in 0..crate::bedtime::schedule::MINUTES_PER_DAY {
                let expected = if bedtime == wake {
                    false
                } else if bedtime > wake {
                    now >= bedtime || now < wake
                } else {
                    now >= bedtime && now < wake
                };
                assert_eq!(WindowEvaluator::window_contains(now, bedtime, wake), expected);
            }
        }
    }

    #[test]
    fn test_boundary_law() {
        for (bedtime, wake) in [("22:00", "07:00"), ("09:00", "17:00")] {
            let (bedtime, wake) = (t(bedtime), t(wake));
            assert!(WindowEvaluator::window_contains(bedtime.minutes(), bedtime.minutes(), wake.minutes()));
            assert!(!WindowEvaluator::window_contains(wake.minutes(), bedtime.minutes(), wake.minutes()));
        }
    }

    #[test]
    fn test_uses_offset_of_now() {
        // 23:30 local in +02:00 is 21:30 UTC
        let now = at("2025-03-10T23:30:00+02:00");
        assert!(WindowEvaluator::is_within_bedtime_window(&now, t("22:00"), t("07:00")));

        let utc = now.with_timezone(&chrono::Utc);
        assert!(!WindowEvaluator::is_within_bedtime_window(&utc, t("22:00"), t("07:00")));
    }

    #[test]
    fn test_most_recent_bedtime_start() {
        let schedule = ScheduleConfig::new(t("22:00"), t("07:00"));

        let start = WindowEvaluator::most_recent_bedtime_start(&at("2025-03-10T23:00:00+01:00"), &schedule);
        assert_eq!(start, Some(at("2025-03-10T22:00:00+01:00")));

        let start = WindowEvaluator::most_recent_bedtime_start(&at("2025-03-10T06:30:00+01:00"), &schedule);
        assert_eq!(start, Some(at("2025-03-09T22:00:00+01:00")));

        let start = WindowEvaluator::most_recent_bedtime_start(&at("2025-03-10T22:00:00+01:00"), &schedule);
        assert_eq!(start, Some(at("2025-03-10T22:00:00+01:00")));
    }

    #[test]
    fn test_most_recent_bedtime_start_degenerate() {
        let schedule = ScheduleConfig::new(t("08:00"), t("08:00"));
        let start = WindowEvaluator::most_recent_bedtime_start(&at("2025-03-10T09:00:00Z"), &schedule);
        assert!(start.is_none());
    }
}
