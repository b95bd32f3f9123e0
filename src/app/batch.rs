use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::app::models::{BatchAction, BatchItem, BatchReport};

type ReportCallback = Box<dyn FnOnce(BatchReport) + Send>;

struct BatchState {
    order: Vec<String>,
    results: Vec<Option<BatchItem>>,
    finished: usize,
    on_done: Option<ReportCallback>,
}

/// Collects the completions of a set of concurrent invocations and hands a
/// single `BatchReport` to `on_done` once the last one has been recorded.
#[derive(Clone)]
pub struct BatchTracker {
    action: BatchAction,
    state: Arc<Mutex<BatchState>>,
}

impl BatchTracker {
    pub fn new<F>(action: BatchAction, targets: &[String], on_done: F) -> Self
    where
        F: FnOnce(BatchReport) + Send + 'static,
    {
        Self {
            action,
            state: Arc::new(Mutex::new(BatchState {
                order: targets.to_vec(),
                results: vec![None; targets.len()],
                finished: 0,
                on_done: Some(Box::new(on_done)),
            })),
        }
    }

    /// Records the result for the target at `index` (its position in the
    /// target list). Duplicate or out-of-range records are ignored.
    pub fn record(&self, index: usize, exit_code: i32, output: String) {
        let ready = {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let Some(target) = state.order.get(index).cloned() else {
                warn!(index, "batch result for unknown target");
                return;
            };
            let Some(slot) = state.results.get_mut(index).filter(|slot| slot.is_none()) else {
                warn!(index, target = %target, "duplicate batch result ignored");
                return;
            };
            *slot = Some(BatchItem {
                target,
                exit_code,
                output,
            });
            state.finished += 1;
            if state.finished == state.order.len() {
                let items = std::mem::take(&mut state.results);
                state.on_done.take().map(|callback| (callback, items))
            } else {
                None
            }
        };

        if let Some((callback, items)) = ready {
            callback(self.build_report(items));
        }
    }

    pub fn finished(&self) -> usize {
        self.state.lock().map(|state| state.finished).unwrap_or(0)
    }

    fn build_report(&self, items: Vec<Option<BatchItem>>) -> BatchReport {
        let total = items.len();
        let (succeeded, failed): (Vec<_>, Vec<_>) = items
            .into_iter()
            .flatten()
            .partition(|item| item.exit_code == 0);
        BatchReport {
            action: self.action,
            total,
            succeeded,
            failed,
        }
    }
}
