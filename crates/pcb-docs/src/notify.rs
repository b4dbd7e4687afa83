use crate::error::DocsError;
use log::{error, info};

/// Receives user-facing messages from a run. Calls are synchronous and
/// made from the worker thread.
pub trait Notifier: Send {
    fn error(&self, err: &DocsError);
    fn finished(&self, summary: &str);
}

/// Routes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn error(&self, err: &DocsError) {
        error!("{err}");
    }

    fn finished(&self, summary: &str) {
        info!("{summary}");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Keeps every message; clones share the same list.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct RecordingNotifier {
        pub errors: Arc<Mutex<Vec<String>>>,
        pub finished: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingNotifier {
        pub fn errors(&self) -> Vec<String> {
            self.errors.lock().unwrap().clone()
        }

        pub fn summaries(&self) -> Vec<String> {
            self.finished.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn error(&self, err: &DocsError) {
            self.errors.lock().unwrap().push(err.to_string());
        }

        fn finished(&self, summary: &str) {
            self.finished.lock().unwrap().push(summary.to_string());
        }
    }
}
