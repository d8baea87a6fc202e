use std::fmt;

use serde::Serialize;

use super::AggregateRow;

/// A group whose percent change crossed the threshold.
///
/// Delivery (console, webhook, UI banner) is up to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    pub group: String,
    pub metric: String,
    pub first_value: f64,
    pub last_value: f64,
    /// Signed, in percent units.
    pub percent_change: f64,
    /// `"<group>: +50.000%"`
    pub text: String,
}

impl fmt::Display for AlertMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Alerts for rows with a defined `percent_change` whose magnitude is at
/// least `threshold_pct` (percent units, `20.0` = 20%). Rows with an
/// undefined change never alert.
pub fn evaluate(rows: &[AggregateRow], threshold_pct: f64) -> Vec<AlertMessage> {
    rows.iter()
        .filter_map(|row| {
            let pct = row.percent_change?;
            if pct.abs() < threshold_pct {
                return None;
            }

            Some(AlertMessage {
                group: row.group.clone(),
                metric: row.metric.clone(),
                first_value: row.first_value?,
                last_value: row.last_value?,
                percent_change: pct,
                text: format!("{}: {:+.3}%", row.group, pct),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::percent_change;
    use chrono::{TimeZone, Utc};

    fn row(group: &str, first: Option<f64>, last: Option<f64>) -> AggregateRow {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        AggregateRow {
            group: group.to_string(),
            metric: "followers".to_string(),
            first_at: at,
            last_at: at,
            samples: 2,
            first_value: first,
            last_value: last,
            delta: first.zip(last).map(|(f, l)| l - f),
            percent_change: percent_change(first, last),
        }
    }

    #[test]
    fn test_alert_text_is_signed_with_three_decimals() {
        let alerts = evaluate(&[row("A", Some(100.0), Some(150.0))], 20.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].text, "A: +50.000%");
        assert_eq!(alerts[0].to_string(), "A: +50.000%");

        let drops = evaluate(&[row("B", Some(300.0), Some(200.0))], 20.0);
        assert_eq!(drops[0].text, "B: -33.333%");
        assert_eq!(drops[0].metric, "followers");
    }

    #[test]
    fn test_threshold_is_inclusive_and_absolute() {
        let rows = [
            row("exact", Some(100.0), Some(120.0)),
            row("below", Some(100.0), Some(119.0)),
            row("down", Some(100.0), Some(75.0)),
        ];
        let groups: Vec<_> = evaluate(&rows, 20.0).into_iter().map(|a| a.group).collect();
        assert_eq!(groups, vec!["exact", "down"]);
    }

    #[test]
    fn test_undefined_change_never_alerts() {
        let rows = [
            row("zero", Some(0.0), Some(1_000.0)),
            row("new", None, Some(10.0)),
        ];
        assert!(evaluate(&rows, 0.0).is_empty());
        assert!(evaluate(&rows, 20.0).is_empty());
    }
}
