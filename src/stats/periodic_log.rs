//! The fixed-format periodic statistics line and its parser (§4.C, L1).

use std::collections::BTreeMap;

/// Durations carried in the log are truncated to milliseconds, then printed
/// in seconds to three decimal places.
fn format_secs(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

/// One task kind's done/fail/duration triple as it appears in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskKindSnapshot {
    pub done: u64,
    pub fail: u64,
    pub dur_min_ms: u64,
    pub dur_max_ms: u64,
    pub dur_avg_ms: u64,
}

/// Everything the periodic log line prints, in column order.
#[derive(Debug, Clone, Default)]
pub struct PeriodicSnapshot {
    pub copy: TaskKindSnapshot,
    pub list: TaskKindSnapshot,
    pub tx_bytes: u64,
    pub ctrl_msgs: u64,
    pub pulse_msgs: u64,
}

/// Formats the exact, newline-free line specified in §4.C.
#[must_use]
pub fn format_periodic_log(s: &PeriodicSnapshot) -> String {
    format!(
        "copy done:{} fail:{} dur:{},{},{} list done:{} fail:{} dur:{},{},{} txBytes:{} ctrlMsgs:{} pulseMsgs:{}",
        s.copy.done,
        s.copy.fail,
        format_secs(s.copy.dur_min_ms),
        format_secs(s.copy.dur_max_ms),
        format_secs(s.copy.dur_avg_ms),
        s.list.done,
        s.list.fail,
        format_secs(s.list.dur_min_ms),
        format_secs(s.list.dur_max_ms),
        format_secs(s.list.dur_avg_ms),
        s.tx_bytes,
        s.ctrl_msgs,
        s.pulse_msgs,
    )
}

/// Column names in the exact order L1 requires.
const COLUMN_ORDER: &[&str] = &[
    "copyDone",
    "copyFail",
    "copyDurMin",
    "copyDurMax",
    "copyDurAvg",
    "listDone",
    "listFail",
    "listDurMin",
    "listDurMax",
    "listDurAvg",
    "txBytes",
    "ctrlMsgs",
    "pulseMsgs",
];

/// Parses a line produced by [`format_periodic_log`] back into named
/// columns, in the order L1 specifies. Returns an empty map if the line
/// does not match the expected shape.
#[must_use]
pub fn parse_periodic_log(line: &str) -> BTreeMap<&'static str, String> {
    let mut result = BTreeMap::new();

    let rest = match line.strip_prefix("copy done:") {
        Some(r) => r,
        None => return result,
    };
    let Some((copy_done, rest)) = rest.split_once(" fail:") else { return result };
    let Some((copy_fail, rest)) = rest.split_once(" dur:") else { return result };
    let Some((copy_dur, rest)) = rest.split_once(" list done:") else { return result };
    let Some((list_done, rest)) = rest.split_once(" fail:") else { return result };
    let Some((list_fail, rest)) = rest.split_once(" dur:") else { return result };
    let Some((list_dur, rest)) = rest.split_once(" txBytes:") else { return result };
    let Some((tx_bytes, rest)) = rest.split_once(" ctrlMsgs:") else { return result };
    let Some((ctrl_msgs, pulse_msgs)) = rest.split_once(" pulseMsgs:") else { return result };

    let mut copy_parts = copy_dur.splitn(3, ',');
    let mut list_parts = list_dur.splitn(3, ',');
    let (Some(copy_min), Some(copy_max), Some(copy_avg)) = (copy_parts.next(), copy_parts.next(), copy_parts.next()) else {
        return result;
    };
    let (Some(list_min), Some(list_max), Some(list_avg)) = (list_parts.next(), list_parts.next(), list_parts.next()) else {
        return result;
    };

    let values = [
        copy_done, copy_fail, copy_min, copy_max, copy_avg, list_done, list_fail, list_min, list_max, list_avg, tx_bytes, ctrl_msgs,
        pulse_msgs,
    ];
    for (name, value) in COLUMN_ORDER.iter().zip(values.iter()) {
        result.insert(*name, (*value).to_string());
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_format_and_parse() {
        let snapshot = PeriodicSnapshot {
            copy: TaskKindSnapshot {
                done: 3,
                fail: 1,
                dur_min_ms: 100,
                dur_max_ms: 900,
                dur_avg_ms: 400,
            },
            list: TaskKindSnapshot {
                done: 2,
                fail: 0,
                dur_min_ms: 50,
                dur_max_ms: 60,
                dur_avg_ms: 55,
            },
            tx_bytes: 1024,
            ctrl_msgs: 7,
            pulse_msgs: 2,
        };
        let line = format_periodic_log(&snapshot);
        assert_eq!(line, "copy done:3 fail:1 dur:0.100,0.900,0.400 list done:2 fail:0 dur:0.050,0.060,0.055 txBytes:1024 ctrlMsgs:7 pulseMsgs:2");

        let columns = parse_periodic_log(&line);
        assert_eq!(columns.len(), COLUMN_ORDER.len());
        assert_eq!(columns["copyDone"], "3");
        assert_eq!(columns["listDurAvg"], "0.055");
        assert_eq!(columns["pulseMsgs"], "2");
    }

    #[test]
    fn unparseable_line_returns_empty() {
        assert!(parse_periodic_log("not a stats line").is_empty());
    }
}
