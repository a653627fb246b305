use crate::control::rail_system::components::{NodeId, TrainClass, TrainId};
use crate::general::Clock;
use async_trait::async_trait;
use chrono::NaiveTime;
use chrono::Timelike;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("could not read schedule: {0}")]
    Unreadable(#[from] std::io::Error),
    #[error("could not parse schedule: {0}")]
    Malformed(#[from] csv::Error),
}

/// One scheduled entry of a train into the section.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub train_no: TrainId,
    pub name: String,
    pub class: TrainClass,
    pub start_node: NodeId,
    pub end_node: NodeId,
    /// Seconds after midnight at which the train reaches the section.
    pub arrival_secs: Clock,
}

/// Anything able to produce the schedule of a section.
///
/// The driver only depends on this trait; the CSV reader below is one
/// implementation, database backed ones live outside the core.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn entries(&self, section: &str) -> Result<Vec<ScheduleEntry>, ScheduleError>;
}

/// Reads `<data_dir>/<section>_schedule.csv` with the columns
/// `Train No, Train Name, Start Node, End Node, Arrival time, Type`.
#[derive(Debug, Clone)]
pub struct CsvTimetable {
    data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Train No")]
    train_no: String,
    #[serde(rename = "Train Name", default)]
    train_name: String,
    #[serde(rename = "Start Node")]
    start_node: String,
    #[serde(rename = "End Node")]
    end_node: String,
    #[serde(rename = "Arrival time", default)]
    arrival_time: String,
    #[serde(rename = "Type", default)]
    class: TrainClass,
}

impl CsvTimetable {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        CsvTimetable {
            data_dir: data_dir.into(),
        }
    }

    fn schedule_path(&self, section: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}_schedule.csv", section.to_lowercase()))
    }
}

/// Parses the rows of one schedule document. Rows whose arrival time
/// does not parse are dropped, mirroring how incomplete timetable rows
/// are treated upstream.
pub fn parse_schedule(reader: impl std::io::Read) -> Result<Vec<ScheduleEntry>, ScheduleError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut entries = Vec::new();
    for row in csv_reader.deserialize::<CsvRow>() {
        let row = row?;
        let Some(arrival_secs) = parse_arrival(&row.arrival_time) else {
            warn!(
                train = %row.train_no,
                arrival = %row.arrival_time,
                "dropping schedule row with unparsable arrival time"
            );
            continue;
        };
        entries.push(ScheduleEntry {
            train_no: TrainId::new(&row.train_no),
            name: row.train_name,
            class: row.class,
            start_node: NodeId::new(&row.start_node),
            end_node: NodeId::new(&row.end_node),
            arrival_secs,
        });
    }
    Ok(entries)
}

fn parse_arrival(value: &str) -> Option<Clock> {
    let time = NaiveTime::parse_from_str(value.trim(), "%H:%M:%S").ok()?;
    Some(time.num_seconds_from_midnight() as Clock)
}

#[async_trait]
impl ScheduleSource for CsvTimetable {
    async fn entries(&self, section: &str) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let path = self.schedule_path(section);
        let entries = load_schedule_file(&path)?;
        info!(count = entries.len(), path = %path.display(), "✅ loaded schedule");
        Ok(entries)
    }
}

fn load_schedule_file(path: &Path) -> Result<Vec<ScheduleEntry>, ScheduleError> {
    let file = std::fs::File::open(path)?;
    parse_schedule(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::rail_system::components::TrainClass;

    const SCHEDULE: &str = "\
Train No,Train Name,Start Node,End Node,Arrival time,Type
12001,TRN-001-SHA,S-APP-1,T-EAST,00:00:10,Shatabdi
54321,TRN-321-PAS,S-APP-2,T-WEST,00:01:00,Passenger
99999,TRN-999-BAD,S-APP-1,T-EAST,not-a-time,Express
11111,TRN-111-UNK,S-APP-2,T-EAST,01:00:00,Goods Special
";

    #[test]
    fn parses_rows_and_drops_bad_arrivals() {
        let entries = parse_schedule(SCHEDULE.as_bytes()).unwrap();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].train_no, TrainId::new("12001"));
        assert_eq!(entries[0].class, TrainClass::Shatabdi);
        assert_eq!(entries[0].arrival_secs, 10);
        assert_eq!(entries[0].start_node, NodeId::new("S-APP-1"));

        assert_eq!(entries[1].arrival_secs, 60);

        // The unrecognised type is kept, at the lowest priority.
        assert_eq!(entries[2].class, TrainClass::Other);
        assert_eq!(entries[2].arrival_secs, 3600);
    }

    #[test]
    fn arrival_parsing() {
        assert_eq!(parse_arrival("00:00:00"), Some(0));
        assert_eq!(parse_arrival("01:02:03"), Some(3723));
        assert_eq!(parse_arrival(""), None);
        assert_eq!(parse_arrival("25:00:00"), None);
    }
}
