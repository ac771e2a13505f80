use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::errors::ScanError;
use crate::events::{EventBus, ScanEvent};
use crate::models::{QuestionPrompt, QuestionResult};
use crate::questions::QuestionSource;

/// Pause/resume primitive plus the "ask one question, wait for the correct
/// answer" protocol. The gate is the sole mediator between the transport
/// (answers, pause/resume/stop) and the orchestrator task.
pub struct QuestionGate {
    scan_id: String,
    bus: Arc<EventBus>,
    source: Arc<dyn QuestionSource>,
    paused: AtomicBool,
    notify: Notify,
    pending: Mutex<Option<mpsc::UnboundedSender<usize>>>,
    cancel: CancellationToken,
}

impl QuestionGate {
    pub fn new(
        scan_id: impl Into<String>,
        bus: Arc<EventBus>,
        source: Arc<dyn QuestionSource>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scan_id: scan_id.into(),
            bus,
            source,
            paused: AtomicBool::new(false),
            notify: Notify::new(),
            pending: Mutex::new(None),
            cancel,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Clears the pause flag and wakes the waiting task.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Cooperative suspension point. Returns immediately when not paused;
    /// otherwise blocks until `resume` or cancellation.
    pub async fn wait_if_paused(&self) {
        loop {
            if !self.is_paused() || self.cancel.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after registering the waiter so a resume between the
            // first check and here is not missed.
            if !self.is_paused() || self.cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    /// Pushes an answer into the pending question. No-op if nothing pending.
    pub fn answer(&self, selected_answer: usize) {
        if let Some(tx) = self.pending.lock().unwrap().as_ref() {
            let _ = tx.send(selected_answer);
        }
    }

    /// Fetches a question for the phase tag and gates on it. `Ok(None)` means
    /// the pool is empty and the phase proceeds ungated.
    pub async fn ask_tag(&self, phase_tag: &str) -> Result<Option<QuestionResult>, ScanError> {
        match self.source.question_for_phase(phase_tag).await {
            Some(prompt) => self.ask(prompt).await.map(Some),
            None => Ok(None),
        }
    }

    /// Pauses the scan, publishes `question:asked`, and consumes answers
    /// until the correct one arrives. Every attempt is published as
    /// `question:result`; only the correct attempt resolves the call.
    pub async fn ask(&self, prompt: QuestionPrompt) -> Result<QuestionResult, ScanError> {
        self.paused.store(true, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.pending.lock().unwrap() = Some(tx);
        self.bus.publish(ScanEvent::QuestionAsked {
            scan_id: self.scan_id.clone(),
            prompt: prompt.clone(),
        });

        loop {
            let selected = tokio::select! {
                answer = rx.recv() => match answer {
                    Some(a) => a,
                    None => {
                        *self.pending.lock().unwrap() = None;
                        return Err(ScanError::Internal("question channel closed".into()));
                    }
                },
                _ = self.cancel.cancelled() => {
                    *self.pending.lock().unwrap() = None;
                    return Err(ScanError::Cancelled);
                }
            };

            self.bus.publish(ScanEvent::QuestionAnswered {
                scan_id: self.scan_id.clone(),
                selected_answer: selected,
            });

            let correct = selected == prompt.correct_index;
            let result = QuestionResult {
                prompt: prompt.clone(),
                user_answer: selected,
                correct,
                points_earned: if correct { prompt.points } else { 0 },
            };
            self.bus.publish(ScanEvent::QuestionResult {
                scan_id: self.scan_id.clone(),
                result: result.clone(),
            });

            if correct {
                *self.pending.lock().unwrap() = None;
                self.paused.store(false, Ordering::SeqCst);
                self.notify.notify_waiters();
                return Ok(result);
            }
            // Wrong answer: stay paused, wait for the next attempt.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionPrompt;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoQuestions;

    #[async_trait]
    impl QuestionSource for NoQuestions {
        async fn question_for_phase(&self, _phase_tag: &str) -> Option<QuestionPrompt> {
            None
        }
    }

    fn prompt(correct_index: usize) -> QuestionPrompt {
        QuestionPrompt {
            question_id: "q1".to_string(),
            phase_tag: "sqli-detection".to_string(),
            text: "pick one".to_string(),
            options: vec!["a".into(), "b".into(), "c".into()],
            answer_ids: vec!["a1".into(), "a2".into(), "a3".into()],
            correct_index,
            points: 10,
        }
    }

    fn gate() -> (Arc<QuestionGate>, Arc<EventBus>, CancellationToken) {
        let bus = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();
        let gate = Arc::new(QuestionGate::new(
            "s1",
            bus.clone(),
            Arc::new(NoQuestions),
            cancel.clone(),
        ));
        (gate, bus, cancel)
    }

    #[tokio::test]
    async fn test_wait_if_paused_passes_when_not_paused() {
        let (gate, _, _) = gate();
        tokio::time::timeout(Duration::from_millis(50), gate.wait_if_paused())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_if_paused_blocks_until_resume() {
        let (gate, _, _) = gate();
        gate.pause();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.wait_if_paused().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        gate.resume();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_gate_stays_paused_on_wrong_answers() {
        let (gate, bus, _) = gate();
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        bus.subscribe(move |event| {
            events_clone.lock().unwrap().push(event.name());
        });

        let ask_task = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.ask(prompt(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        gate.answer(0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gate.is_paused());
        gate.answer(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gate.is_paused());
        gate.answer(2);

        let result = tokio::time::timeout(Duration::from_millis(500), ask_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(result.correct);
        assert_eq!(result.user_answer, 2);
        assert_eq!(result.points_earned, 10);
        assert!(!gate.is_paused());

        let seen = events.lock().unwrap();
        let question_events: Vec<&&str> = seen
            .iter()
            .filter(|n| n.starts_with("question:"))
            .collect();
        assert_eq!(
            question_events,
            vec![
                &"question:asked",
                &"question:answered",
                &"question:result",
                &"question:answered",
                &"question:result",
                &"question:answered",
                &"question:result",
            ]
        );
    }

    #[tokio::test]
    async fn test_answer_without_pending_question_is_noop() {
        let (gate, bus, _) = gate();
        let count = Arc::new(Mutex::new(0usize));
        let count_clone = count.clone();
        bus.subscribe(move |_| *count_clone.lock().unwrap() += 1);
        gate.answer(1);
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ask_aborts_on_cancellation() {
        let (gate, _, cancel) = gate();
        let ask_task = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.ask(prompt(0)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_millis(200), ask_task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[tokio::test]
    async fn test_ask_tag_with_empty_pool_continues_ungated() {
        let (gate, _, _) = gate();
        let result = gate.ask_tag("discovery").await.unwrap();
        assert!(result.is_none());
        assert!(!gate.is_paused());
    }
}
