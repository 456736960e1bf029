// Database schema types and query helpers

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::classify::{Activity, ClassificationResult, ClassificationSource, ConfidenceMap};
use crate::error::{MonitorError, Result};

// ----- Activities -----

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// Local wall-clock time as stored
    pub date_time: String,
    pub activity: Activity,
    pub confidence: f64,
    pub source: ClassificationSource,
    pub degraded: bool,
    pub confidences: Option<ConfidenceMap>,
    pub metadata: Option<serde_json::Value>,
}

const ACTIVITY_COLUMNS: &str =
    "id, timestamp_ms, date_time, activity, confidence, source, degraded, confidences, metadata";

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn map_activity(row: &Row) -> rusqlite::Result<ActivityRecord> {
    let timestamp_ms: i64 = row.get(1)?;
    let activity: String = row.get(3)?;
    let source: String = row.get(5)?;
    let confidences: Option<String> = row.get(7)?;
    let metadata: Option<String> = row.get(8)?;

    Ok(ActivityRecord {
        id: row.get(0)?,
        timestamp: Utc
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .ok_or_else(|| conversion_error(1, format!("bad timestamp {}", timestamp_ms)))?,
        date_time: row.get(2)?,
        activity: Activity::parse(&activity)
            .ok_or_else(|| conversion_error(3, format!("unknown activity '{}'", activity)))?,
        confidence: row.get(4)?,
        source: ClassificationSource::parse(&source)
            .ok_or_else(|| conversion_error(5, format!("unknown source '{}'", source)))?,
        degraded: row.get::<_, i64>(6)? != 0,
        confidences: confidences.and_then(|s| serde_json::from_str(&s).ok()),
        metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

pub fn insert_activity(conn: &Connection, result: &ClassificationResult) -> Result<i64> {
    let date_time = result
        .timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    let confidences = serde_json::to_string(&result.confidence_by_activity)?;
    let metadata = serde_json::to_string(&result.metadata())?;

    conn.execute(
        "INSERT INTO activities (timestamp_ms, date_time, activity, confidence, source, degraded, confidences, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            result.timestamp.timestamp_millis(),
            date_time,
            result.activity.as_str(),
            result.confidence(),
            result.source.as_str(),
            result.degraded as i64,
            confidences,
            metadata,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_latest_activity(conn: &Connection) -> Result<Option<ActivityRecord>> {
    let sql = format!(
        "SELECT {} FROM activities ORDER BY timestamp_ms DESC, id DESC LIMIT 1",
        ACTIVITY_COLUMNS
    );
    let result = conn.query_row(&sql, [], map_activity).optional()?;
    Ok(result)
}

/// Newest first, optionally bounded by [start, end]
pub fn list_activities(
    conn: &Connection,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<ActivityRecord>> {
    let sql = format!(
        "SELECT {} FROM activities
         WHERE (?1 IS NULL OR timestamp_ms >= ?1) AND (?2 IS NULL OR timestamp_ms <= ?2)
         ORDER BY timestamp_ms DESC, id DESC LIMIT ?3",
        ACTIVITY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            start.map(|t| t.timestamp_millis()),
            end.map(|t| t.timestamp_millis()),
            limit
        ],
        map_activity,
    )?;
    let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// (timestamp_ms, activity) since `start`, oldest first
pub fn activity_timeline(conn: &Connection, start: DateTime<Utc>) -> Result<Vec<(i64, Activity)>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp_ms, activity FROM activities WHERE timestamp_ms >= ?1 ORDER BY timestamp_ms, id",
    )?;
    let rows = stmt.query_map(params![start.timestamp_millis()], |row| {
        let activity: String = row.get(1)?;
        Ok((row.get::<_, i64>(0)?, activity))
    })?;

    let mut timeline = Vec::new();
    for row in rows {
        let (ts, activity) = row?;
        match Activity::parse(&activity) {
            Some(a) => timeline.push((ts, a)),
            None => log::warn!("Skipping unknown activity '{}' at {}", activity, ts),
        }
    }
    Ok(timeline)
}

// ----- Statistics -----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
    Last24h,
}

impl Period {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Period::Day),
            "week" => Some(Period::Week),
            "month" => Some(Period::Month),
            "year" => Some(Period::Year),
            "last24h" | "24h" => Some(Period::Last24h),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
            Period::Last24h => "last24h",
        }
    }

    /// Start of the period containing `now`, in `now`'s time zone. Weeks start on Monday.
    pub fn start<Tz: TimeZone>(self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let last_24h = now.clone() - chrono::Duration::hours(24);
        let today = now.date_naive();
        let first_day = match self {
            Period::Last24h => return last_24h,
            Period::Day => Some(today),
            Period::Week => Some(today - chrono::Duration::days(today.weekday().num_days_from_monday() as i64)),
            Period::Month => today.with_day(1),
            Period::Year => NaiveDate::from_ymd_opt(today.year(), 1, 1),
        };

        first_day
            .and_then(|d| now.timezone().from_local_datetime(&d.and_time(NaiveTime::MIN)).earliest())
            .unwrap_or(last_24h)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityStatistics {
    pub period: Period,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total: u64,
    pub activity_counts: BTreeMap<Activity, u64>,
    /// Minutes, rounded to one decimal
    pub activity_durations: BTreeMap<Activity, f64>,
    pub most_frequent_activity: Option<Activity>,
    pub longest_activity: Option<Activity>,
}

/// Per-activity counts and durations (ms) from a time-ordered timeline. Each entry lasts
/// until the next one; the last lasts until `now_ms`.
pub fn summarize_timeline(
    timeline: &[(i64, Activity)],
    now_ms: i64,
) -> (BTreeMap<Activity, u64>, BTreeMap<Activity, i64>) {
    let mut counts = BTreeMap::new();
    let mut durations = BTreeMap::new();

    for (i, (ts, activity)) in timeline.iter().enumerate() {
        *counts.entry(*activity).or_insert(0) += 1;
        let until = timeline.get(i + 1).map(|(next, _)| *next).unwrap_or(now_ms);
        *durations.entry(*activity).or_insert(0) += (until - ts).max(0);
    }

    (counts, durations)
}

// Largest value; ties go to the earlier activity
fn arg_max<V: PartialOrd + Copy>(map: &BTreeMap<Activity, V>) -> Option<Activity> {
    let mut best: Option<(Activity, V)> = None;
    for (activity, value) in map {
        match best {
            Some((_, top)) if *value <= top => {}
            _ => best = Some((*activity, *value)),
        }
    }
    best.map(|(a, _)| a)
}

pub fn get_statistics<Tz: TimeZone>(
    conn: &Connection,
    period: Period,
    now: &DateTime<Tz>,
) -> Result<ActivityStatistics> {
    let start = period.start(now).with_timezone(&Utc);
    let end = now.with_timezone(&Utc);
    if start > end {
        return Err(MonitorError::Other("period starts in the future".to_string()));
    }

    let timeline = activity_timeline(conn, start)?;
    let (counts, durations_ms) = summarize_timeline(&timeline, end.timestamp_millis());

    let activity_durations = durations_ms
        .iter()
        .map(|(a, ms)| (*a, (*ms as f64 / 60_000.0 * 10.0).round() / 10.0))
        .collect();

    Ok(ActivityStatistics {
        period,
        start,
        end,
        total: timeline.len() as u64,
        most_frequent_activity: arg_max(&counts),
        longest_activity: arg_max(&durations_ms),
        activity_counts: counts,
        activity_durations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use crate::features::FeatureVector;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn result_at(activity: Activity, at: DateTime<Utc>) -> ClassificationResult {
        let mut weights = [0.05; 7];
        weights[activity.index()] = 0.7;
        ClassificationResult::from_confidences(
            ConfidenceMap::from_weights(weights),
            FeatureVector::default(),
            ClassificationSource::Rule,
            at,
        )
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, h, m, 0).unwrap()
    }

    #[test]
    fn test_insert_and_latest() {
        let conn = setup_db();
        assert!(get_latest_activity(&conn).unwrap().is_none());

        insert_activity(&conn, &result_at(Activity::Reading, at(9, 0))).unwrap();
        let id = insert_activity(&conn, &result_at(Activity::Eating, at(12, 0))).unwrap();

        let latest = get_latest_activity(&conn).unwrap().unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.activity, Activity::Eating);
        assert_eq!(latest.timestamp, at(12, 0));
        assert_eq!(latest.source, ClassificationSource::Rule);
        assert!((latest.confidence - 0.7).abs() < 1e-9);
        assert_eq!(latest.confidences.unwrap().top().0, Activity::Eating);
        assert_eq!(latest.metadata.unwrap()["trigger"], "direct");
    }

    #[test]
    fn test_list_range_and_limit() {
        let conn = setup_db();
        for (h, a) in [(8, Activity::Sleeping), (10, Activity::Reading), (12, Activity::Eating), (14, Activity::Busy)] {
            insert_activity(&conn, &result_at(a, at(h, 0))).unwrap();
        }

        let all = list_activities(&conn, None, None, 100).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].activity, Activity::Busy);

        let window = list_activities(&conn, Some(at(10, 0)), Some(at(12, 0)), 100).unwrap();
        let labels: Vec<_> = window.iter().map(|r| r.activity).collect();
        assert_eq!(labels, vec![Activity::Eating, Activity::Reading]);

        assert_eq!(list_activities(&conn, None, None, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_summarize_timeline_durations() {
        let timeline = vec![
            (0, Activity::Sleeping),
            (60_000, Activity::Eating),
            (180_000, Activity::Sleeping),
        ];
        let (counts, durations) = summarize_timeline(&timeline, 240_000);
        assert_eq!(counts[&Activity::Sleeping], 2);
        assert_eq!(counts[&Activity::Eating], 1);
        assert_eq!(durations[&Activity::Sleeping], 120_000);
        assert_eq!(durations[&Activity::Eating], 120_000);
    }

    #[test]
    fn test_summarize_empty_timeline() {
        let (counts, durations) = summarize_timeline(&[], 1_000);
        assert!(counts.is_empty());
        assert!(durations.is_empty());
    }

    #[test]
    fn test_statistics_for_day() {
        let conn = setup_db();
        // Yesterday, outside the period
        insert_activity(&conn, &result_at(Activity::Busy, at(0, 0) - chrono::Duration::hours(2))).unwrap();
        insert_activity(&conn, &result_at(Activity::Sleeping, at(1, 0))).unwrap();
        insert_activity(&conn, &result_at(Activity::Sleeping, at(2, 0))).unwrap();
        insert_activity(&conn, &result_at(Activity::Eating, at(7, 0))).unwrap();

        let stats = get_statistics(&conn, Period::Day, &at(7, 30)).unwrap();
        assert_eq!(stats.start, at(0, 0));
        assert_eq!(stats.total, 3);
        assert_eq!(stats.activity_counts[&Activity::Sleeping], 2);
        assert!(!stats.activity_counts.contains_key(&Activity::Busy));
        assert_eq!(stats.activity_durations[&Activity::Sleeping], 360.0);
        assert_eq!(stats.activity_durations[&Activity::Eating], 30.0);
        assert_eq!(stats.most_frequent_activity, Some(Activity::Sleeping));
        assert_eq!(stats.longest_activity, Some(Activity::Sleeping));
    }

    #[test]
    fn test_period_starts() {
        // 2024-05-15 is a Wednesday
        let now = at(15, 45);
        assert_eq!(Period::Day.start(&now), at(0, 0));
        assert_eq!(Period::Week.start(&now), Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap());
        assert_eq!(Period::Month.start(&now), Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert_eq!(Period::Year.start(&now), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(Period::Last24h.start(&now), Utc.with_ymd_and_hms(2024, 5, 14, 15, 45, 0).unwrap());
    }

    #[test]
    fn test_period_parse() {
        assert_eq!(Period::parse("week"), Some(Period::Week));
        assert_eq!(Period::parse("last24h"), Some(Period::Last24h));
        assert_eq!(Period::parse("24h"), Some(Period::Last24h));
        assert_eq!(Period::parse("decade"), None);
    }
}
