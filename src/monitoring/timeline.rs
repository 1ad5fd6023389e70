//! Execution Timeline
//!
//! Records when each step and each map item starts and finishes, for
//! reports and Gantt charts. Map items are identified as
//! `MapStep[index]/InnerStep`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Step started executing
    Started,
    /// Step completed successfully
    Completed,
    /// Step failed
    Failed,
    /// Step was still running when the run budget ran out
    Interrupted,
}

impl EventType {
    fn is_terminal(self) -> bool {
        !matches!(self, EventType::Started)
    }
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub step_id: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Tracks the execution timeline of a run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a step.
    pub fn add_event(&mut self, step_id: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            step_id: step_id.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Number of events of the given type.
    pub fn count(&self, event_type: EventType) -> usize {
        self.events.iter().filter(|e| e.event_type == event_type).count()
    }

    /// Steps that started but have no terminal event yet.
    pub fn open_steps(&self) -> Vec<String> {
        let mut open: Vec<String> = Vec::new();
        for event in &self.events {
            if event.event_type.is_terminal() {
                open.retain(|id| id != &event.step_id);
            } else {
                open.push(event.step_id.clone());
            }
        }
        open
    }

    /// Closes every open step with an `Interrupted` event.
    pub fn interrupt_open_steps(&mut self) {
        for step_id in self.open_steps() {
            self.add_event(step_id, EventType::Interrupted);
        }
    }

    /// Start/end offsets in milliseconds for every finished step, sorted by start.
    fn spans(&self) -> Vec<(String, u128, u128)> {
        let mut starts: HashMap<&str, u128> = HashMap::new();
        let mut spans = Vec::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();
            if event.event_type.is_terminal() {
                if let Some(start) = starts.remove(event.step_id.as_str()) {
                    spans.push((event.step_id.clone(), start, elapsed));
                }
            } else {
                starts.insert(event.step_id.as_str(), elapsed);
            }
        }

        spans.sort_by_key(|(_, start, _)| *start);
        spans
    }

    /// Generates an ASCII Gantt chart representation.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        for (step_id, start, end) in self.spans() {
            let start_pos = (start as f64 * scale) as usize;
            let width = ((end - start) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(width));

            output.push_str(&format!(
                "{} |{:<51}| ({} ms)\n",
                truncate(&step_id, 24),
                bar,
                end - start
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns step durations in milliseconds.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        self.spans()
            .into_iter()
            .map(|(step_id, start, end)| (step_id, end - start))
            .collect()
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a label to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    let count = s.chars().count();
    if count <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::default();
        assert!(timeline.get_events().is_empty());
        assert!(timeline.get_durations().is_empty());
    }

    #[test]
    fn test_get_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("CopyFile", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event("CopyFile", EventType::Completed);
        timeline.add_event("ReadFileContent", EventType::Started);

        let durations = timeline.get_durations();
        assert!(durations["CopyFile"] >= 30);
        assert!(!durations.contains_key("ReadFileContent"));
    }

    #[test]
    fn test_map_items_tracked_separately() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("putItem[0]/InsertRecord", EventType::Started);
        timeline.add_event("putItem[1]/InsertRecord", EventType::Started);
        timeline.add_event("putItem[1]/InsertRecord", EventType::Failed);
        timeline.add_event("putItem[0]/InsertRecord", EventType::Completed);

        assert_eq!(timeline.get_durations().len(), 2);
        assert_eq!(timeline.count(EventType::Started), 2);
        assert_eq!(timeline.count(EventType::Failed), 1);
    }

    #[test]
    fn test_interrupt_open_steps() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("ValidateFile", EventType::Started);
        timeline.add_event("ValidateFile", EventType::Completed);
        timeline.add_event("putItem", EventType::Started);
        timeline.add_event("putItem[0]/InsertRecord", EventType::Started);

        assert_eq!(timeline.open_steps(), vec!["putItem", "putItem[0]/InsertRecord"]);

        timeline.interrupt_open_steps();
        assert!(timeline.open_steps().is_empty());
        assert_eq!(timeline.count(EventType::Interrupted), 2);
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("step1", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("step1", EventType::Completed);
        timeline.add_event("a-very-long-map-step-name[12]/Inner", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("a-very-long-map-step-name[12]/Inner", EventType::Failed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("step1"));
        assert!(chart.contains("a-very-long-map-step-..."));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
    }
}
