//! External event sinks

use anyhow::Context;
use conveyor_config::SinkConfig;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};

use crate::event::Event;

/// Where the output stage writes events: one JSON line each
pub enum Sink {
    Stdout(BufWriter<Stdout>),
    File(BufWriter<File>),
    Discard,
}

impl Sink {
    pub async fn open(config: &SinkConfig) -> anyhow::Result<Self> {
        Ok(match config {
            SinkConfig::Stdout => Sink::Stdout(BufWriter::new(tokio::io::stdout())),
            SinkConfig::File { path } => {
                let file = File::create(path)
                    .await
                    .with_context(|| format!("creating sink file {}", path.display()))?;
                Sink::File(BufWriter::new(file))
            }
            SinkConfig::Discard => Sink::Discard,
        })
    }

    pub async fn write(&mut self, event: &Event) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        match self {
            Sink::Stdout(out) => out.write_all(&line).await.context("writing to stdout")?,
            Sink::File(out) => out.write_all(&line).await.context("writing sink file")?,
            Sink::Discard => {}
        }
        Ok(())
    }

    pub async fn finish(&mut self) -> anyhow::Result<()> {
        match self {
            Sink::Stdout(out) => out.flush().await?,
            Sink::File(out) => {
                out.flush().await?;
                out.get_ref().sync_all().await?;
            }
            Sink::Discard => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");

        let mut sink = Sink::open(&SinkConfig::File { path: path.clone() }).await.unwrap();
        sink.write(&Event::new(0, json!({"n": 0}))).await.unwrap();
        sink.write(&Event::new(1, json!("raw"))).await.unwrap();
        sink.finish().await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "{\"number\":0,\"data\":{\"n\":0}}\n{\"number\":1,\"data\":\"raw\"}\n"
        );
    }
}
