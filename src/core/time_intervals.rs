use crate::config::Profile;
use crate::core::job::Job;
use crate::domain::model::{TimeInterval, TimeSeriesMode};
use crate::utils::error::{EtlError, Result};
use chrono::{Days, Months, NaiveDate};

/// Splits the profile interval into retrieval windows. Custom intervals win
/// over the mode; a missing mode means monthly.
pub fn generate_time_intervals(profile: &Profile) -> Result<Vec<TimeInterval>> {
    let (start, end) = profile.time_interval;
    if start > end {
        return Err(EtlError::InvalidConfigValueError {
            field: "time_interval".to_string(),
            value: format!("{} .. {}", start, end),
            reason: "start_date must be before end_date".to_string(),
        });
    }

    if let Some(custom) = &profile.time_series_custom_intervals {
        return Ok(custom.clone());
    }

    match profile.time_series_mode.unwrap_or(TimeSeriesMode::Monthly) {
        TimeSeriesMode::Daily => Ok(daterange(start, end).into_iter().map(|d| (d, d)).collect()),
        TimeSeriesMode::Monthly => month_windows(start, end, 1),
        TimeSeriesMode::Quarterly => month_windows(start, end, 3),
    }
}

/// Every date from `start` to `end`, inclusive.
pub fn daterange(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

fn month_windows(start: NaiveDate, end: NaiveDate, months: u32) -> Result<Vec<TimeInterval>> {
    let overflow = || EtlError::ProcessingError {
        message: format!("date arithmetic overflow after {}", start),
    };

    let mut intervals = Vec::new();
    let mut current = start;
    while current <= end {
        // Steps from the previous boundary; a clamped month end carries over.
        let next = current
            .checked_add_months(Months::new(months))
            .ok_or_else(overflow)?;
        let last_day = next.checked_sub_days(Days::new(1)).ok_or_else(overflow)?;
        intervals.push((current, last_day.min(end)));
        current = next;
    }
    Ok(intervals)
}

/// One sub-job per interval, each nested under the parent job id.
pub fn create_timeseries_jobs(profile: &Profile) -> Result<Vec<Job>> {
    let parent = Job::from_profile(profile);
    Ok(generate_time_intervals(profile)?
        .into_iter()
        .map(|interval| Job::for_interval(profile, interval, Some(parent.job_id.clone())))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::profile::sample_profile;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_daily_intervals() {
        let mut profile = sample_profile();
        profile.time_interval = (d(2022, 1, 1), d(2022, 1, 3));
        profile.time_series_mode = Some(TimeSeriesMode::Daily);

        let intervals = generate_time_intervals(&profile).unwrap();
        assert_eq!(
            intervals,
            vec![
                (d(2022, 1, 1), d(2022, 1, 1)),
                (d(2022, 1, 2), d(2022, 1, 2)),
                (d(2022, 1, 3), d(2022, 1, 3)),
            ]
        );
    }

    #[test]
    fn test_monthly_intervals_clip_to_end() {
        let mut profile = sample_profile();
        profile.time_interval = (d(2022, 1, 15), d(2022, 3, 20));
        profile.time_series_mode = Some(TimeSeriesMode::Monthly);

        let intervals = generate_time_intervals(&profile).unwrap();
        assert_eq!(
            intervals,
            vec![
                (d(2022, 1, 15), d(2022, 2, 14)),
                (d(2022, 2, 15), d(2022, 3, 14)),
                (d(2022, 3, 15), d(2022, 3, 20)),
            ]
        );
    }

    #[test]
    fn test_monthly_is_default_mode() {
        let mut profile = sample_profile();
        profile.time_interval = (d(2022, 1, 1), d(2022, 2, 28));
        profile.time_series_mode = None;

        let intervals = generate_time_intervals(&profile).unwrap();
        assert_eq!(
            intervals,
            vec![(d(2022, 1, 1), d(2022, 1, 31)), (d(2022, 2, 1), d(2022, 2, 28))]
        );
    }

    #[test]
    fn test_quarterly_intervals() {
        let mut profile = sample_profile();
        profile.time_interval = (d(2022, 1, 1), d(2022, 12, 31));
        profile.time_series_mode = Some(TimeSeriesMode::Quarterly);

        let intervals = generate_time_intervals(&profile).unwrap();
        assert_eq!(intervals.len(), 4);
        assert_eq!(intervals[0], (d(2022, 1, 1), d(2022, 3, 31)));
        assert_eq!(intervals[3], (d(2022, 10, 1), d(2022, 12, 31)));
    }

    #[test]
    fn test_month_end_start_steps_from_clamped_boundary() {
        let mut profile = sample_profile();
        profile.time_interval = (d(2022, 1, 31), d(2022, 4, 29));
        profile.time_series_mode = Some(TimeSeriesMode::Monthly);

        let intervals = generate_time_intervals(&profile).unwrap();
        assert_eq!(
            intervals,
            vec![
                (d(2022, 1, 31), d(2022, 2, 27)),
                (d(2022, 2, 28), d(2022, 3, 27)),
                (d(2022, 3, 28), d(2022, 4, 27)),
                (d(2022, 4, 28), d(2022, 4, 29)),
            ]
        );
    }

    #[test]
    fn test_quarter_from_month_end_steps_from_previous_boundary() {
        let mut profile = sample_profile();
        profile.time_interval = (d(2021, 11, 30), d(2022, 6, 30));
        profile.time_series_mode = Some(TimeSeriesMode::Quarterly);

        let intervals = generate_time_intervals(&profile).unwrap();
        assert_eq!(
            intervals,
            vec![
                (d(2021, 11, 30), d(2022, 2, 27)),
                (d(2022, 2, 28), d(2022, 5, 27)),
                (d(2022, 5, 28), d(2022, 6, 30)),
            ]
        );
    }

    #[test]
    fn test_custom_intervals_returned_unchanged() {
        let mut profile = sample_profile();
        let custom = vec![(d(2022, 1, 10), d(2022, 1, 12)), (d(2022, 1, 2), d(2022, 1, 3))];
        profile.time_series_custom_intervals = Some(custom.clone());
        profile.time_series_mode = Some(TimeSeriesMode::Daily);

        assert_eq!(generate_time_intervals(&profile).unwrap(), custom);
    }

    #[test]
    fn test_start_after_end_fails() {
        let mut profile = sample_profile();
        profile.time_interval = (d(2022, 2, 1), d(2022, 1, 1));
        assert!(generate_time_intervals(&profile).is_err());
    }

    #[test]
    fn test_create_timeseries_jobs_sets_parent() {
        let mut profile = sample_profile();
        profile.time_interval = (d(2022, 1, 1), d(2022, 1, 2));
        profile.time_series_mode = Some(TimeSeriesMode::Daily);

        let jobs = create_timeseries_jobs(&profile).unwrap();
        assert_eq!(jobs.len(), 2);
        for job in &jobs {
            assert_eq!(
                job.parent_job_id.as_deref(),
                Some("test_region__20220101_20220102")
            );
            assert!(job.job_id.starts_with("test_region__20220101_20220102/"));
        }
        assert_eq!(jobs[1].time_interval, (d(2022, 1, 2), d(2022, 1, 2)));
    }
}
