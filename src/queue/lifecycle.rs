//! Rolls the status of an inbox entry's elements up into the entry.

use crate::store::types::{Element, ElementStatus};

/// New status of an inbox entry given its elements, or `None` to leave it alone.
///
/// - all elements terminal: Canceled if cancellation was requested or any element was
///   canceled, else Failed if any failed, else Done,
/// - cancellation requested and elements still active: stays CancelRequested,
/// - any element started or finished: Running,
/// - otherwise: Acquired.
///
/// An entry without elements only changes when it is being canceled.
pub fn aggregate_status(current: ElementStatus, elements: &[Element]) -> Option<ElementStatus> {
    let cancel_requested = current == ElementStatus::CancelRequested;
    if elements.is_empty() {
        return cancel_requested.then_some(ElementStatus::Canceled);
    }

    let any = |status: ElementStatus| elements.iter().any(|e| e.status == status);

    if elements.iter().all(|e| e.status.is_terminal()) {
        let status = if cancel_requested || any(ElementStatus::Canceled) {
            ElementStatus::Canceled
        } else if any(ElementStatus::Failed) {
            ElementStatus::Failed
        } else {
            ElementStatus::Done
        };
        return Some(status);
    }

    if cancel_requested {
        return Some(ElementStatus::CancelRequested);
    }

    let started = elements.iter().any(|e| {
        e.status.is_terminal()
            || matches!(e.status, ElementStatus::Running | ElementStatus::CancelRequested)
    });
    Some(if started {
        ElementStatus::Running
    } else {
        ElementStatus::Acquired
    })
}

/// Mean `(PercentComplete, PercentSuccess)` over the elements.
pub fn mean_progress(elements: &[Element]) -> (u32, u32) {
    if elements.is_empty() {
        return (0, 0);
    }
    let n = elements.len() as u64;
    let complete: u64 = elements.iter().map(|e| u64::from(e.percent_complete)).sum();
    let success: u64 = elements.iter().map(|e| u64::from(e.percent_success)).sum();
    ((complete / n) as u32, (success / n) as u32)
}
