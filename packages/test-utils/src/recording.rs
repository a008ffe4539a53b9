//! Recording instrumentation for ordering tests
//!
//! Uses `unwrap_or_else(|e| e.into_inner())` when locking so a hook that
//! panics on purpose does not poison the log for the rest of the test.

use std::sync::{Arc, Mutex};

use dgs_dataloader::{
    BatchLoaderEnvironment, BatchOutcome, DataLoaderInstrumentation,
    DataLoaderInstrumentationContext, DispatchKey,
};

/// How a recorded batch settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Number of values the batch produced
    Values(usize),
    /// Display form of the batch error
    Error(String),
}

/// One hook notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Dispatch {
        hook: String,
        loader: String,
        keys: Vec<String>,
        has_context: bool,
    },
    Complete {
        hook: String,
        loader: String,
        outcome: Outcome,
    },
}

impl HookEvent {
    /// `"<hook>:dispatch"` or `"<hook>:complete"`
    pub fn label(&self) -> String {
        match self {
            Self::Dispatch { hook, .. } => format!("{}:dispatch", hook),
            Self::Complete { hook, .. } => format!("{}:complete", hook),
        }
    }
}

/// Shared, ordered log of hook notifications
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<HookEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: HookEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events().iter().map(HookEvent::label).collect()
    }

    /// Outcomes of all completions, in the order they were recorded
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HookEvent::Complete { outcome, .. } => Some(outcome),
                HookEvent::Dispatch { .. } => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Hook that records every notification in an [`EventLog`]
///
/// Keys are recorded in `Debug` form, sorted so mapped batches compare
/// deterministically.
#[derive(Debug, Clone)]
pub struct RecordingInstrumentation {
    label: String,
    log: EventLog,
    panic_on_dispatch: bool,
    panic_on_complete: bool,
}

impl RecordingInstrumentation {
    pub fn new(label: impl Into<String>, log: &EventLog) -> Self {
        Self {
            label: label.into(),
            log: log.clone(),
            panic_on_dispatch: false,
            panic_on_complete: false,
        }
    }

    /// Panic inside `on_dispatch` (nothing is recorded)
    pub fn panicking_on_dispatch(mut self) -> Self {
        self.panic_on_dispatch = true;
        self
    }

    /// Panic inside `on_complete`, after recording the completion
    pub fn panicking_on_complete(mut self) -> Self {
        self.panic_on_complete = true;
        self
    }

    pub fn into_hook(self) -> Arc<dyn DataLoaderInstrumentation> {
        Arc::new(self)
    }
}

impl DataLoaderInstrumentation for RecordingInstrumentation {
    fn on_dispatch(
        &self,
        name: &str,
        keys: &[&dyn DispatchKey],
        environment: &BatchLoaderEnvironment,
    ) -> Box<dyn DataLoaderInstrumentationContext> {
        if self.panic_on_dispatch {
            panic!("{} failed on dispatch", self.label);
        }

        let mut keys: Vec<String> = keys.iter().map(|key| format!("{:?}", key)).collect();
        keys.sort();
        self.log.push(HookEvent::Dispatch {
            hook: self.label.clone(),
            loader: name.to_string(),
            keys,
            has_context: environment.raw_context().is_some(),
        });

        Box::new(RecordingContext {
            hook: self.label.clone(),
            loader: name.to_string(),
            log: self.log.clone(),
            panic_on_complete: self.panic_on_complete,
        })
    }
}

struct RecordingContext {
    hook: String,
    loader: String,
    log: EventLog,
    panic_on_complete: bool,
}

impl DataLoaderInstrumentationContext for RecordingContext {
    fn on_complete(self: Box<Self>, outcome: BatchOutcome<'_>) {
        let outcome = match outcome {
            Ok(values) => Outcome::Values(values.len()),
            Err(err) => Outcome::Error(err.to_string()),
        };
        self.log.push(HookEvent::Complete {
            hook: self.hook.clone(),
            loader: self.loader.clone(),
            outcome,
        });
        if self.panic_on_complete {
            panic!("{} failed on completion", self.hook);
        }
    }
}
