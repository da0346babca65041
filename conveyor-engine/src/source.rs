//! External event sources and event selection

use anyhow::Context;
use conveyor_config::{EngineConfig, SourceConfig};
use conveyor_execution::{Fault, FaultKind};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::event::Event;

enum Origin {
    Generate { count: u64 },
    File(Lines<BufReader<File>>),
}

/// Events from the engine's configured source, in source order
///
/// `events_to_process` caps how many events are emitted; an event numbers
/// file restricts which source positions are emitted at all.
pub struct Source {
    origin: Origin,
    position: u64,
    emitted: u64,
    limit: Option<u64>,
    selection: Option<BTreeSet<u64>>,
}

impl Source {
    pub async fn open(engine: &EngineConfig) -> anyhow::Result<Self> {
        let origin = match &engine.source {
            SourceConfig::Generate { count } => Origin::Generate { count: *count },
            SourceConfig::File { path } => {
                let file = File::open(path)
                    .await
                    .with_context(|| format!("opening source file {}", path.display()))?;
                Origin::File(BufReader::new(file).lines())
            }
        };

        let selection = match &engine.event_numbers_file {
            Some(path) => Some(read_event_numbers(path).await?),
            None => None,
        };

        Ok(Self {
            origin,
            position: 0,
            emitted: 0,
            limit: engine.events_to_process,
            selection,
        })
    }

    pub async fn next(&mut self) -> anyhow::Result<Option<Event>> {
        loop {
            if self.limit.is_some_and(|limit| self.emitted >= limit) {
                return Ok(None);
            }
            if let Some(selection) = &self.selection {
                match selection.last() {
                    Some(last) if self.position <= *last => {}
                    _ => return Ok(None),
                }
            }

            let position = self.position;
            let data = match &mut self.origin {
                Origin::Generate { count } => {
                    if position >= *count {
                        return Ok(None);
                    }
                    json!({ "n": position })
                }
                Origin::File(lines) => match lines.next_line().await.context("reading source file")? {
                    Some(line) => line.into(),
                    None => return Ok(None),
                },
            };
            self.position += 1;

            if let Some(selection) = &self.selection {
                if !selection.contains(&position) {
                    continue;
                }
            }

            self.emitted += 1;
            return Ok(Some(Event::new(position, data)));
        }
    }
}

/// One event number per line; blank lines and `#` comments are skipped
pub async fn read_event_numbers(path: &Path) -> anyhow::Result<BTreeSet<u64>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading event numbers file {}", path.display()))?;

    let mut numbers = BTreeSet::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let number = line.parse::<u64>().map_err(|_| {
            Fault::of(
                FaultKind::ValueError,
                format!("{}:{}: not an event number: {}", path.display(), index + 1, line),
            )
        })?;
        numbers.insert(number);
    }
    Ok(numbers)
}
