use std::{
    fs::File,
    io::BufWriter,
    path::Path,
    sync::mpsc::Receiver,
};

use log::error;
use serde::Serialize;
use serde_jsonlines::JsonLinesWriter;

use crate::TallerError;

/// Writes every value received on `event_receiver` as one JSON line until the sender hangs up.
pub fn write_events<T: Serialize>(
    file: &Path,
    event_receiver: Receiver<T>,
) -> Result<(), TallerError> {
    let event_file = File::create(file).map_err(|e| TallerError::EventWriterError { source: e })?;
    let mut event_writer = JsonLinesWriter::new(BufWriter::new(event_file));
    for event in &event_receiver {
        if let Err(e) = event_writer.write(&event) {
            error!("Error while writing event to output file: {}", e);
        }
    }
    event_writer
        .flush()
        .map_err(|e| TallerError::EventWriterError { source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::OrchestratorEvent;
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[test]
    fn test_events_are_written_as_json_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("events.jsonl");
        let (tx, rx) = mpsc::channel();
        tx.send(OrchestratorEvent::Countdown {
            label: "GO!".to_string(),
        })
        .unwrap();
        tx.send(OrchestratorEvent::Released).unwrap();
        drop(tx);

        write_events(&path, rx).unwrap();

        let lines = serde_jsonlines::json_lines::<serde_json::Value, _>(&path)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "countdown");
        assert_eq!(lines[0]["label"], "GO!");
        assert_eq!(lines[1]["event"], "released");
    }
}
