//! Event sinks for the backup simulation, plus transfer-log analysis

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use log::{debug, error, info};

use crate::bk_error::LogParseError;
use crate::bk_interface::{BlockId, Event, EventSink, SimTime};
use crate::bk_transfer::TransferKind;
use crate::bk_units::format_timespan;

// ============================================================================
// Console Narration Sink
// ============================================================================

/// Narrates the run through the `log` facade
pub struct ConsoleEventSink {
    enabled: bool,
}

impl ConsoleEventSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl EventSink for ConsoleEventSink {
    fn log(&mut self, time: SimTime, node: &str, event: Event) {
        if !self.enabled {
            return;
        }
        let t = format_timespan(time);

        match event {
            Event::Joined => info!("{}: {} joined the network", t, node),
            Event::Left => info!("{}: {} left the network", t, node),
            Event::WentOnline => info!("{}: {} is back online", t, node),
            Event::WentOffline => info!("{}: {} went offline", t, node),
            Event::Failed => info!("{}: {} failed and lost its disk", t, node),
            Event::Recovered => info!("{}: {} recovered with an empty disk", t, node),
            Event::TransferCompleted {
                uploader,
                downloader,
                block_id,
                restore,
            } => info!(
                "{}: block {} {} {} -> {}",
                t,
                block_id,
                if restore { "restored" } else { "backed up" },
                uploader,
                downloader
            ),
            Event::Recoverable => info!("{}: {} can now recover its data", t, node),
            Event::FullyRedundant => info!("{}: {} is fully backed up", t, node),
            Event::AtRisk { backed_up } => {
                info!("{}: {} is at risk ({} blocks backed up)", t, node, backed_up)
            }
            Event::DataLost { available } => {
                info!("{}: {} lost its data ({} blocks left)", t, node, available)
            }
            Event::TransferScheduled {
                uploader,
                downloader,
                block_id,
                restore,
                duration,
            } => debug!(
                "{}: {} -> {} block {}{} ({})",
                t,
                uploader,
                downloader,
                block_id,
                if restore { " (restore)" } else { "" },
                format_timespan(duration)
            ),
            Event::TransferCanceled {
                uploader,
                downloader,
                block_id,
            } => debug!(
                "{}: {} -> {} block {} canceled",
                t, uploader, downloader, block_id
            ),
            Event::BlockCounts {
                local,
                backed_up,
                remote_held,
            } => debug!(
                "{}: {} local={} backed_up={} held_for_others={}",
                t, node, local, backed_up, remote_held
            ),
        }
    }
}

// ============================================================================
// Transfer Log Sink
// ============================================================================

/// One line per completed transfer
pub fn format_transfer_line(
    kind: TransferKind,
    uploader: &str,
    downloader: &str,
    block_id: BlockId,
    time: SimTime,
) -> String {
    format!(
        "{}|Uploader: {}|Downloader: {}|Block ID: {}|Time: {}",
        kind.completion_name(),
        uploader,
        downloader,
        block_id,
        time
    )
}

fn transfer_line(time: SimTime, event: &Event) -> Option<String> {
    match event {
        Event::TransferCompleted {
            uploader,
            downloader,
            block_id,
            restore,
        } => {
            let kind = if *restore {
                TransferKind::Restore
            } else {
                TransferKind::Backup
            };
            Some(format_transfer_line(kind, uploader, downloader, *block_id, time))
        }
        _ => None,
    }
}

/// Writes the delimited transfer log
pub struct TransferLogSink<W: Write> {
    writer: W,
}

impl TransferLogSink<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> TransferLogSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

impl<W: Write> EventSink for TransferLogSink<W> {
    fn log(&mut self, time: SimTime, _node: &str, event: Event) {
        if let Some(line) = transfer_line(time, &event) {
            if let Err(e) = writeln!(self.writer, "{}", line) {
                error!("Error writing transfer log: {}", e);
            }
        }
    }
}

impl<W: Write> Drop for TransferLogSink<W> {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

// ============================================================================
// Collector Event Sink (In-Memory)
// ============================================================================

/// Collects events in memory for programmatic analysis
#[derive(Default)]
pub struct CollectorEventSink {
    pub events: Vec<EventRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub time: SimTime,
    pub node: String,
    pub event: Event,
}

impl CollectorEventSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    // Query helpers
    pub fn for_node<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a EventRecord> {
        self.events.iter().filter(move |e| e.node == node)
    }

    pub fn in_time_range(
        &self,
        start: SimTime,
        end: SimTime,
    ) -> impl Iterator<Item = &EventRecord> {
        self.events
            .iter()
            .filter(move |e| e.time >= start && e.time <= end)
    }

    /// Events whose `Event::name` is `name`
    pub fn count(&self, name: &str) -> usize {
        self.events.iter().filter(|e| e.event.name() == name).count()
    }

    pub fn count_for(&self, node: &str, name: &str) -> usize {
        self.for_node(node).filter(|e| e.event.name() == name).count()
    }

    pub fn count_by_type(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.events {
            *counts.entry(record.event.name()).or_insert(0) += 1;
        }
        counts
    }

    /// The transfer log this run would have written
    pub fn transfer_lines(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|r| transfer_line(r.time, &r.event))
            .collect()
    }
}

impl EventSink for CollectorEventSink {
    fn log(&mut self, time: SimTime, node: &str, event: Event) {
        self.events.push(EventRecord {
            time,
            node: node.to_string(),
            event,
        });
    }
}

// ============================================================================
// Multi Sink (Combine Multiple Sinks)
// ============================================================================

/// Combines multiple event sinks
#[derive(Default)]
pub struct MultiEventSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl MultiEventSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for MultiEventSink {
    fn log(&mut self, time: SimTime, node: &str, event: Event) {
        for sink in &mut self.sinks {
            sink.log(time, node, event.clone());
        }
    }
}

// ============================================================================
// Transfer Log Analysis
// ============================================================================

/// A parsed transfer log line
#[derive(Debug, Clone, PartialEq)]
pub struct TransferLine {
    pub kind: TransferKind,
    pub uploader: String,
    pub downloader: String,
    pub block_id: BlockId,
    pub time: SimTime,
}

fn field<'a>(
    parts: &[&'a str],
    index: usize,
    name: &'static str,
    line: &str,
) -> Result<&'a str, LogParseError> {
    parts
        .get(index)
        .and_then(|p| p.split_once(':'))
        .filter(|(label, _)| label.trim() == name)
        .map(|(_, value)| value.trim())
        .ok_or_else(|| LogParseError::MissingField {
            field: name,
            line: line.to_string(),
        })
}

pub fn parse_transfer_line(line: &str) -> Result<TransferLine, LogParseError> {
    let parts: Vec<&str> = line.trim().split('|').collect();
    let kind = match parts.first().map(|s| s.trim()) {
        Some("BlockBackupComplete") => TransferKind::Backup,
        Some("BlockRestoreComplete") => TransferKind::Restore,
        _ => {
            return Err(LogParseError::MissingField {
                field: "kind",
                line: line.to_string(),
            })
        }
    };
    let uploader = field(&parts, 1, "Uploader", line)?.to_string();
    let downloader = field(&parts, 2, "Downloader", line)?.to_string();
    let block = field(&parts, 3, "Block ID", line)?;
    let block_id = block.parse().map_err(|_| LogParseError::BadNumber {
        field: "Block ID",
        value: block.to_string(),
    })?;
    let time = field(&parts, 4, "Time", line)?;
    let time = time.parse().map_err(|_| LogParseError::BadNumber {
        field: "Time",
        value: time.to_string(),
    })?;
    Ok(TransferLine {
        kind,
        uploader,
        downloader,
        block_id,
        time,
    })
}

/// Read a whole transfer log, skipping blank lines
pub fn read_transfer_log<R: BufRead>(reader: R) -> Result<Vec<TransferLine>, LogParseError> {
    reader
        .lines()
        .map_while(Result::ok)
        .filter(|l| !l.trim().is_empty())
        .map(|l| parse_transfer_line(&l))
        .collect()
}

/// Completed uploads per uploader divided by the latest time in the log
pub fn upload_utilization(lines: &[TransferLine]) -> BTreeMap<String, f64> {
    let max_time = lines.iter().map(|l| l.time).fold(0.0, f64::max);
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for line in lines {
        *counts.entry(line.uploader.clone()).or_insert(0) += 1;
    }
    if max_time <= 0.0 {
        return counts.into_keys().map(|k| (k, 0.0)).collect();
    }
    counts
        .into_iter()
        .map(|(node, n)| (node, n as f64 / max_time))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn completed(up: &str, down: &str, block_id: BlockId, restore: bool) -> Event {
        Event::TransferCompleted {
            uploader: up.into(),
            downloader: down.into(),
            block_id,
            restore,
        }
    }

    #[test]
    fn test_transfer_line_format() {
        assert_eq!(
            format_transfer_line(TransferKind::Backup, "a-0", "b-1", 3, 12.5),
            "BlockBackupComplete|Uploader: a-0|Downloader: b-1|Block ID: 3|Time: 12.5"
        );
    }

    #[test]
    fn test_transfer_log_sink_writes_only_completions() {
        let mut sink = TransferLogSink::new(Vec::new());
        sink.log(1.0, "a-0", Event::Joined);
        sink.log(10.0, "a-0", completed("a-0", "b-0", 0, false));
        sink.log(
            12.0,
            "a-0",
            Event::TransferCanceled {
                uploader: "a-0".into(),
                downloader: "b-0".into(),
                block_id: 1,
            },
        );
        sink.log(20.0, "b-0", completed("b-0", "a-0", 0, true));

        let text = String::from_utf8(sink.get_ref().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("BlockRestoreComplete|Uploader: b-0"));
    }

    #[test]
    fn test_parse_transfer_line() {
        let line = parse_transfer_line(
            "BlockRestoreComplete|Uploader: b-0|Downloader: a-0|Block ID: 2|Time: 42.5",
        )
        .unwrap();
        assert_eq!(line.kind, TransferKind::Restore);
        assert_eq!(line.uploader, "b-0");
        assert_eq!(line.downloader, "a-0");
        assert_eq!(line.block_id, 2);
        assert_eq!(line.time, 42.5);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(matches!(
            parse_transfer_line("Something|Uploader: a"),
            Err(LogParseError::MissingField { field: "kind", .. })
        ));
        assert!(matches!(
            parse_transfer_line("BlockBackupComplete|Uploader: a|Downloader: b|Block ID: x|Time: 0"),
            Err(LogParseError::BadNumber { field: "Block ID", .. })
        ));
        assert!(matches!(
            parse_transfer_line("BlockBackupComplete|Uploader: a|Downloader: b"),
            Err(LogParseError::MissingField { field: "Block ID", .. })
        ));
    }

    #[test]
    fn test_upload_utilization() {
        let log = "\
BlockBackupComplete|Uploader: a|Downloader: b|Block ID: 0|Time: 10
BlockBackupComplete|Uploader: a|Downloader: c|Block ID: 1|Time: 20

BlockRestoreComplete|Uploader: b|Downloader: a|Block ID: 0|Time: 40
";
        let lines = read_transfer_log(log.as_bytes()).unwrap();
        assert_eq!(lines.len(), 3);

        let util = upload_utilization(&lines);
        assert_eq!(util.get("a"), Some(&0.05));
        assert_eq!(util.get("b"), Some(&0.025));
        assert_eq!(util.get("c"), None);
    }

    #[test]
    fn test_collector_queries() {
        let mut collector = CollectorEventSink::new();
        collector.log(0.0, "a-0", Event::Joined);
        collector.log(0.0, "b-0", Event::Joined);
        collector.log(5.0, "a-0", completed("a-0", "b-0", 0, false));
        collector.log(9.0, "a-0", Event::Recoverable);

        assert_eq!(collector.count("Joined"), 2);
        assert_eq!(collector.count_for("a-0", "Joined"), 1);
        assert_eq!(collector.for_node("a-0").count(), 3);
        assert_eq!(collector.in_time_range(1.0, 10.0).count(), 2);
        assert_eq!(collector.count_by_type().get("TransferCompleted"), Some(&1));
        assert_eq!(
            collector.transfer_lines(),
            vec!["BlockBackupComplete|Uploader: a-0|Downloader: b-0|Block ID: 0|Time: 5"]
        );
    }

    #[test]
    fn test_multi_sink_fans_out() {
        let first = Rc::new(RefCell::new(CollectorEventSink::new()));
        let second = Rc::new(RefCell::new(CollectorEventSink::new()));
        let mut multi = MultiEventSink::new();
        multi.add_sink(Box::new(first.clone()));
        multi.add_sink(Box::new(second.clone()));

        multi.log(3.0, "a-0", Event::Failed);
        assert_eq!(first.borrow().events.len(), 1);
        assert_eq!(first.borrow().events, second.borrow().events);
    }
}
