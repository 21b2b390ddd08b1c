//! Mock transfer service for testing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::transfer::{
    StartTransferRequest, TransferError, TransferService, TransferState, TransferStatus,
};

type ScriptedPoll = Result<TransferStatus, TransferError>;

#[derive(Debug, Default)]
struct TransferMockState {
    scripts: HashMap<String, VecDeque<ScriptedPoll>>,
    held: HashSet<String>,
    polls: HashMap<String, u32>,
    started: Vec<StartTransferRequest>,
    cancelled: Vec<String>,
    /// References polled at least once and not yet seen in a final state.
    open: HashSet<String>,
    max_open: usize,
    task_counter: u32,
    fail_cancel: bool,
    next_start_error: Option<TransferError>,
    panicking: HashSet<String>,
}

/// Mock implementation of the `TransferService` trait.
///
/// Each reference answers polls from a script. The last scripted entry
/// repeats once the script is exhausted; a reference with no script
/// answers `NotFound`. A held reference reports an idle `Active` status
/// until it is released.
#[derive(Debug, Clone, Default)]
pub struct MockTransferService {
    state: Arc<Mutex<TransferMockState>>,
}

impl MockTransferService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TransferMockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the sequence of poll answers for a reference.
    pub fn script_statuses(&self, reference: &str, statuses: Vec<ScriptedPoll>) {
        self.state()
            .scripts
            .insert(reference.to_string(), statuses.into());
    }

    /// Keep the reference in flight until `release` is called.
    pub fn hold(&self, reference: &str) {
        self.state().held.insert(reference.to_string());
    }

    /// Let a held reference finish with the given status.
    pub fn release(&self, reference: &str, status: TransferStatus) {
        let mut state = self.state();
        state
            .scripts
            .insert(reference.to_string(), VecDeque::from([Ok(status)]));
        state.held.remove(reference);
    }

    /// Wait until the reference has been polled at least once.
    pub async fn wait_for_poll(&self, reference: &str) {
        while self.poll_count(reference) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub fn poll_count(&self, reference: &str) -> u32 {
        self.state().polls.get(reference).copied().unwrap_or(0)
    }

    /// Highest number of transfers that were in flight at the same time.
    pub fn max_concurrent_transfers(&self) -> usize {
        self.state().max_open
    }

    pub fn started_transfers(&self) -> Vec<StartTransferRequest> {
        self.state().started.clone()
    }

    pub fn cancel_requests(&self) -> Vec<String> {
        self.state().cancelled.clone()
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.state().fail_cancel = fail;
    }

    pub fn fail_next_start(&self, error: TransferError) {
        self.state().next_start_error = Some(error);
    }

    /// Make every poll of the reference panic, as a buggy backend would.
    pub fn panic_on_poll(&self, reference: &str) {
        self.state().panicking.insert(reference.to_string());
    }
}

fn is_final(answer: &ScriptedPoll) -> bool {
    match answer {
        Ok(status) => status.state != TransferState::Active,
        Err(_) => true,
    }
}

#[async_trait]
impl TransferService for MockTransferService {
    async fn start_transfer(&self, request: &StartTransferRequest) -> Result<String, TransferError> {
        let mut state = self.state();
        if let Some(error) = state.next_start_error.take() {
            return Err(error);
        }
        state.task_counter += 1;
        state.started.push(request.clone());
        Ok(format!("transfer-{}", state.task_counter))
    }

    async fn get_transfer_status(&self, reference: &str) -> Result<TransferStatus, TransferError> {
        let mut state = self.state();
        *state.polls.entry(reference.to_string()).or_default() += 1;
        if state.panicking.contains(reference) {
            drop(state);
            panic!("transfer backend crashed while polling '{}'", reference);
        }

        let answer = if state.held.contains(reference) {
            Ok(TransferStatus::active(0, 0, 0))
        } else {
            match state.scripts.get_mut(reference) {
                Some(script) if script.len() > 1 => script
                    .pop_front()
                    .unwrap_or_else(|| Err(TransferError::NotFound(reference.to_string()))),
                Some(script) => script
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err(TransferError::NotFound(reference.to_string()))),
                None => Err(TransferError::NotFound(reference.to_string())),
            }
        };

        if is_final(&answer) {
            state.open.remove(reference);
        } else {
            state.open.insert(reference.to_string());
            state.max_open = state.max_open.max(state.open.len());
        }
        answer
    }

    async fn cancel_transfer(&self, reference: &str) -> Result<(), TransferError> {
        let mut state = self.state();
        state.cancelled.push(reference.to_string());
        state.open.remove(reference);
        if state.fail_cancel {
            return Err(TransferError::Rejected(format!(
                "task '{}' cannot be cancelled",
                reference
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_scripted_status_repeats() {
        let transfer = MockTransferService::new();
        transfer.script_statuses(
            "t",
            vec![
                Ok(TransferStatus::active(1, 0, 1)),
                Ok(TransferStatus::succeeded(2, 1, 1)),
            ],
        );
        assert_eq!(transfer.get_transfer_status("t").await.unwrap().bytes_transferred, 1);
        assert_eq!(transfer.get_transfer_status("t").await.unwrap().bytes_transferred, 2);
        assert_eq!(transfer.get_transfer_status("t").await.unwrap().bytes_transferred, 2);
        assert_eq!(transfer.poll_count("t"), 3);
    }

    #[tokio::test]
    async fn test_held_reference_stays_active() {
        let transfer = MockTransferService::new();
        transfer.hold("t");
        let status = transfer.get_transfer_status("t").await.unwrap();
        assert_eq!(status.state, TransferState::Active);
        assert_eq!(transfer.max_concurrent_transfers(), 1);

        transfer.release("t", TransferStatus::succeeded(5, 1, 1));
        let status = transfer.get_transfer_status("t").await.unwrap();
        assert_eq!(status.state, TransferState::Succeeded);
    }

    #[tokio::test]
    async fn test_unscripted_reference_is_not_found() {
        let transfer = MockTransferService::new();
        assert!(matches!(
            transfer.get_transfer_status("missing").await,
            Err(TransferError::NotFound(_))
        ));
    }
}
