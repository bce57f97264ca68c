use chrono::{DateTime, SecondsFormat, Utc};

/// A persisted task record, as read back from the `tasks` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    /// Logical task identifier — primary key.
    pub id: String,
    /// Serialized settings. Opaque here; the worker layer owns parsing.
    pub settings_json: String,
    /// Timestamp (see [`format_ts`]) the task becomes eligible strictly after.
    pub next_run_start_at: String,
    /// Opaque exclusivity token; `Some` while a worker is executing the task.
    pub current_run_ticket: Option<String>,
}

impl TaskRecord {
    /// Parse `next_run_start_at` back into a UTC timestamp.
    ///
    /// `None` only if the column holds something `format_ts` never wrote,
    /// i.e. the row was edited out-of-band.
    pub fn next_run_start_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.next_run_start_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Whether some worker currently holds the execution ticket.
    pub fn is_claimed(&self) -> bool {
        self.current_run_ticket.is_some()
    }
}

/// Render a timestamp for storage in a TEXT column.
///
/// Fixed-width microsecond UTC form ("2026-03-01T08:00:00.000000Z") so that
/// lexicographic comparison in SQL matches chronological order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_is_fixed_width_and_ordered() {
        let early = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        let (a, b) = (format_ts(early), format_ts(late));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn roundtrip_through_record() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let record = TaskRecord {
            id: "t1".into(),
            settings_json: "{}".into(),
            next_run_start_at: format_ts(ts),
            current_run_ticket: None,
        };
        assert_eq!(record.next_run_start_at_utc(), Some(ts));
        assert!(!record.is_claimed());
    }
}
