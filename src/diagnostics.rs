use crate::pipeline::SampleCountChange;
use crate::source::ShaderStage;
use bevy::prelude::Resource;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Entries kept before the log trims itself.
pub const LOG_CAPACITY: usize = 2000;
/// Oldest entries dropped once [`LOG_CAPACITY`] is exceeded.
pub const LOG_TRIM: usize = 1000;

/// Something that happened while building or reloading a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadEvent {
    RebuildStarted {
        program: String,
    },
    Compiled {
        stage: ShaderStage,
        path: PathBuf,
        words: usize,
    },
    Reflected {
        attributes: usize,
        stride: u32,
        push_constant_size: u32,
    },
    Built {
        sample_count: u32,
    },
    Swapped {
        program: String,
    },
    SampleCountChanged(SampleCountChange),
    Failed {
        program: String,
        reason: String,
    },
}

impl ReloadEvent {
    pub fn is_failure(&self) -> bool {
        matches!(self, ReloadEvent::Failed { .. })
    }
}

impl fmt::Display for ReloadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadEvent::RebuildStarted { program } => write!(f, "rebuilding {program}"),
            ReloadEvent::Compiled { stage, path, words } => {
                write!(f, "compiled {stage} shader {} ({words} words)", path.display())
            }
            ReloadEvent::Reflected {
                attributes,
                stride,
                push_constant_size,
            } => write!(
                f,
                "reflected {attributes} vertex attributes, stride {stride}, push constants {push_constant_size} bytes"
            ),
            ReloadEvent::Built { sample_count } => {
                write!(f, "built pipeline ({sample_count}x MSAA)")
            }
            ReloadEvent::Swapped { program } => write!(f, "swapped in new pipeline for {program}"),
            ReloadEvent::SampleCountChanged(change) => write!(
                f,
                "sample count changed {} -> {}",
                change.previous, change.current
            ),
            ReloadEvent::Failed { program, reason } => {
                write!(f, "reload of {program} failed: {reason}")
            }
        }
    }
}

/// Receives reload events. Passed explicitly to whatever reports them.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, event: ReloadEvent);
}

/// Bounded, shareable event log for an overlay to display.
///
/// Cloning yields another handle to the same log, so one clone can be handed
/// to the coordinator and another inserted as a bevy resource for the UI.
/// Every recorded event is also mirrored to `tracing`.
#[derive(Resource, Clone, Default)]
pub struct ReloadLog {
    entries: Arc<Mutex<VecDeque<ReloadEvent>>>,
}

impl ReloadLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copies out the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<ReloadEvent> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Renders the entries as display lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.entries.lock().iter().map(ToString::to_string).collect()
    }

    pub fn failure_count(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.is_failure()).count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl fmt::Debug for ReloadLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadLog")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl DiagnosticsSink for ReloadLog {
    fn record(&self, event: ReloadEvent) {
        match &event {
            ReloadEvent::Failed { .. } => tracing::error!("{event}"),
            ReloadEvent::Swapped { .. } | ReloadEvent::SampleCountChanged(_) => {
                tracing::info!("{event}")
            }
            _ => tracing::debug!("{event}"),
        }

        let mut entries = self.entries.lock();
        entries.push_back(event);
        if entries.len() > LOG_CAPACITY {
            entries.drain(..LOG_TRIM);
        }
    }
}
