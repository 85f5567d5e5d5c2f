//! Observer trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::AnalyzerConfigBuilder::observer`] to follow a request as
//! it moves through download, extraction and the two LLM calls. The CLI uses
//! it to drive a spinner; a server could forward events to a websocket.
//!
//! All methods default to no-ops so implementors override only what they need.
//! Events for different papers may arrive concurrently from different tasks.

use std::fmt;
use std::sync::Arc;

/// Expensive steps of a cache miss, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Download,
    Extract,
    Summarize,
    ExtractTable,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Download => "downloading",
            Stage::Extract => "extracting text",
            Stage::Summarize => "summarising",
            Stage::ExtractTable => "extracting main table",
            Stage::Persist => "saving results",
        };
        f.write_str(s)
    }
}

pub trait PipelineObserver: Send + Sync {
    /// The request was answered from storage.
    fn on_cache_hit(&self, paper_id: &str) {
        let _ = paper_id;
    }

    fn on_stage_start(&self, paper_id: &str, stage: Stage) {
        let _ = (paper_id, stage);
    }

    fn on_stage_complete(&self, paper_id: &str, stage: Stage, elapsed_ms: u64) {
        let _ = (paper_id, stage, elapsed_ms);
    }
}

/// Observer used when none is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::AnalyzerConfig`].
pub type ProgressObserver = Arc<dyn PipelineObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PipelineObserver for Recorder {
        fn on_stage_start(&self, paper_id: &str, stage: Stage) {
            self.events.lock().unwrap().push(format!("{paper_id}:start:{stage}"));
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let o = NoopObserver;
        o.on_cache_hit("1");
        o.on_stage_start("1", Stage::Download);
        o.on_stage_complete("1", Stage::Download, 12);
    }

    #[test]
    fn defaults_only_fire_overridden_methods() {
        let r = Recorder::default();
        r.on_cache_hit("7");
        r.on_stage_start("7", Stage::Summarize);
        r.on_stage_complete("7", Stage::Summarize, 3);
        assert_eq!(*r.events.lock().unwrap(), vec!["7:start:summarising".to_string()]);
    }
}
