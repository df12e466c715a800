//! Decoding of `kubectl get --watch --output-watch-events -o json` output.

use executor_core::error::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub object: serde_json::Value,
}

impl WatchEvent {
    /// The pod carried by the event. `ERROR` events carry a status object instead.
    pub fn pod(&self) -> Result<Pod> {
        Ok(serde_json::from_value(self.object.clone())?)
    }

    pub fn message(&self) -> String {
        self.object
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("no message")
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pod {
    pub metadata: PodMetadata,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodMetadata {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    pub phase: Option<PodPhase>,
    #[serde(rename = "hostIP")]
    pub host_ip: Option<String>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerStatus {
    #[serde(default)]
    pub state: ContainerState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerState {
    pub terminated: Option<TerminatedState>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedState {
    pub exit_code: i32,
}

impl Pod {
    pub fn phase(&self) -> Option<PodPhase> {
        self.status.phase
    }

    /// Exit code of the last terminated container, falling back to the
    /// phase (0 for `Succeeded`, 1 otherwise).
    pub fn exit_code(&self) -> i32 {
        self.status
            .container_statuses
            .iter()
            .rev()
            .find_map(|c| c.state.terminated.as_ref().map(|t| t.exit_code))
            .unwrap_or(match self.status.phase {
                Some(PodPhase::Succeeded) => 0,
                _ => 1,
            })
    }
}

/// Incremental decoder: feed raw chunks, get back every complete event.
/// A partial trailing object is kept until the rest arrives.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<WatchEvent>> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut consumed = 0;
        let failure = {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<WatchEvent>();
            loop {
                match stream.next() {
                    Some(Ok(event)) => {
                        events.push(event);
                        consumed = stream.byte_offset();
                    }
                    Some(Err(e)) if e.is_eof() => break None,
                    Some(Err(e)) => break Some(e),
                    None => {
                        consumed = stream.byte_offset();
                        break None;
                    }
                }
            }
        };

        match failure {
            Some(e) => {
                // No way to resynchronise inside a broken object.
                self.buf.clear();
                Err(e.into())
            }
            None => {
                self.buf.drain(..consumed);
                Ok(events)
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
