use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{CaptureError, Result};
use crate::processors::AggregationTable;
use crate::realtime::monitor::{SessionCounters, SessionState, SessionStatus};
use crate::{log, log_error};

/// `work` 한 번의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// 소스가 끝났다. 종료 신호 없이 루프를 빠져나간다.
    Finished,
}

/// 백그라운드 루프가 반복 호출하는 캡처 작업.
///
/// `work`는 poll timeout 안에 돌아와야 한다. 그래야 종료 신호가 제때 확인된다.
/// `finish`는 루프가 어떤 이유로 끝나든 한 번 호출된다.
pub trait CaptureWorker: Send + 'static {
    type Summary;

    fn name(&self) -> &str;

    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn work(&mut self) -> Result<Flow>;

    fn finish(&mut self) -> Result<()>;

    fn summary(&self) -> Self::Summary;

    fn counters(&self) -> Arc<SessionCounters>;
}

/// 워커 하나를 전용 스레드에서 돌리는 세션.
///
/// `start` -> (`status`, `live_totals`) -> `shutdown` -> `join` -> `summary`
pub struct CaptureSession<W: CaptureWorker> {
    worker: Option<W>,
    handle: Option<JoinHandle<(W, Result<()>)>>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
}

impl<W: CaptureWorker> CaptureSession<W> {
    pub fn new(worker: W) -> Self {
        let counters = worker.counters();
        Self {
            worker: Some(worker),
            handle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            counters,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state() != SessionState::Created {
            return Err(CaptureError::InvalidState(format!(
                "cannot start a session that is {}",
                self.state()
            )));
        }
        let Some(worker) = self.worker.take() else {
            return Err(CaptureError::InvalidState("session has no worker".to_string()));
        };

        let thread_name = format!("capture-{}", worker.name());
        let shutdown = Arc::clone(&self.shutdown);
        let counters = Arc::clone(&self.counters);
        self.counters.set_state(SessionState::Running);

        let spawned = thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_loop(worker, shutdown, counters));
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.counters.set_state(SessionState::Stopped);
                Err(CaptureError::InvalidState(format!(
                    "failed to spawn capture thread: {e}"
                )))
            }
        }
    }

    /// 종료 플래그만 세우고 바로 돌아온다. 여러 번 불러도 된다.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.state() == SessionState::Running {
            self.counters.set_state(SessionState::ShuttingDown);
        }
    }

    /// 루프가 끝날 때까지 기다린다. 루프를 끝낸 치명적 오류가 있으면 그대로 돌려준다.
    ///
    /// 이미 Stopped이면 아무것도 하지 않는다.
    pub fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return match self.state() {
                SessionState::Stopped => Ok(()),
                state => Err(CaptureError::InvalidState(format!(
                    "cannot join a session that is {state}"
                ))),
            };
        };

        let joined = handle.join();
        self.counters.set_state(SessionState::Stopped);
        match joined {
            Ok((worker, result)) => {
                self.worker = Some(worker);
                result
            }
            Err(_) => {
                log_error!("capture thread panicked");
                Err(CaptureError::WorkerPanicked)
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.counters.state()
    }

    pub fn status(&self) -> SessionStatus {
        self.counters.status()
    }

    /// 마지막 flush 시점의 grand total 사본
    pub fn live_totals(&self) -> AggregationTable {
        self.counters.live_totals()
    }

    pub fn summary(&self) -> Result<W::Summary> {
        Ok(self.stopped_worker()?.summary())
    }

    /// Stopped 상태에서만 워커에 접근할 수 있다
    pub fn stopped_worker(&self) -> Result<&W> {
        if self.state() != SessionState::Stopped {
            return Err(CaptureError::InvalidState(format!(
                "session is {}, not stopped",
                self.state()
            )));
        }
        self.worker
            .as_ref()
            .ok_or_else(|| CaptureError::InvalidState("worker was lost".to_string()))
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl<W: CaptureWorker> Drop for CaptureSession<W> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
            if let Err(e) = self.join() {
                log_error!("capture session ended with error: {e}");
            }
        }
    }
}

fn run_loop<W: CaptureWorker>(
    mut worker: W,
    shutdown: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
) -> (W, Result<()>) {
    log!("{} capture started", worker.name());

    let mut result = worker.begin();
    if result.is_ok() {
        result = drive(&mut worker, &shutdown);
    }

    if counters.state() == SessionState::Running {
        counters.set_state(SessionState::ShuttingDown);
    }

    // 루프가 오류로 끝났어도 finish는 시도한다. 먼저 난 오류를 돌려준다.
    let finished = worker.finish();
    let result = match (result, finished) {
        (Err(e), Err(finish_err)) => {
            log_error!("{} finish failed after error: {finish_err}", worker.name());
            Err(e)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    };

    match &result {
        Ok(()) => log!("{} capture stopped", worker.name()),
        Err(e) => log_error!("{} capture stopped with error: {e}", worker.name()),
    }
    (worker, result)
}

fn drive<W: CaptureWorker>(worker: &mut W, shutdown: &AtomicBool) -> Result<()> {
    while !shutdown.load(Ordering::SeqCst) {
        if worker.work()? == Flow::Finished {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// 정해진 횟수만큼 돌거나 실패하는 워커
    struct ScriptedWorker {
        remaining: Option<u32>,
        fail_at: Option<u32>,
        steps: u32,
        finished: u32,
        counters: Arc<SessionCounters>,
    }

    impl ScriptedWorker {
        fn new(remaining: Option<u32>, fail_at: Option<u32>) -> Self {
            Self {
                remaining,
                fail_at,
                steps: 0,
                finished: 0,
                counters: SessionCounters::new(),
            }
        }
    }

    impl CaptureWorker for ScriptedWorker {
        type Summary = (u32, u32);

        fn name(&self) -> &str {
            "scripted"
        }

        fn work(&mut self) -> Result<Flow> {
            self.steps += 1;
            if self.fail_at == Some(self.steps) {
                return Err(CaptureError::config("boom"));
            }
            match self.remaining.as_mut() {
                Some(0) => Ok(Flow::Finished),
                Some(n) => {
                    *n -= 1;
                    self.counters.add_accepted();
                    Ok(Flow::Continue)
                }
                None => {
                    thread::sleep(Duration::from_millis(1));
                    Ok(Flow::Continue)
                }
            }
        }

        fn finish(&mut self) -> Result<()> {
            self.finished += 1;
            Ok(())
        }

        fn summary(&self) -> Self::Summary {
            (self.steps, self.finished)
        }

        fn counters(&self) -> Arc<SessionCounters> {
            Arc::clone(&self.counters)
        }
    }

    #[test]
    fn test_lifecycle_until_exhausted() {
        let mut session = CaptureSession::new(ScriptedWorker::new(Some(3), None));
        assert_eq!(session.state(), SessionState::Created);
        assert!(matches!(session.summary(), Err(CaptureError::InvalidState(_))));

        session.start().unwrap();
        assert!(session.start().is_err());
        session.join().unwrap();

        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.status().accepted, 3);
        let (steps, finished) = session.summary().unwrap();
        assert_eq!(steps, 4);
        assert_eq!(finished, 1);

        // 두 번째 join과 shutdown은 no-op
        session.join().unwrap();
        session.shutdown();
        session.shutdown();
        assert_eq!(session.summary().unwrap().1, 1);
    }

    #[test]
    fn test_shutdown_stops_endless_worker() {
        let mut session = CaptureSession::new(ScriptedWorker::new(None, None));
        session.start().unwrap();
        thread::sleep(Duration::from_millis(10));
        session.shutdown();
        assert!(session.is_shutdown_requested());
        session.join().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.summary().unwrap().1, 1);
    }

    #[test]
    fn test_work_error_is_returned_from_join() {
        let mut session = CaptureSession::new(ScriptedWorker::new(None, Some(2)));
        session.start().unwrap();
        let err = session.join().unwrap_err();
        assert!(matches!(err, CaptureError::Config(_)));
        // 실패해도 finish는 호출되고 summary는 읽을 수 있다
        assert_eq!(session.summary().unwrap(), (2, 1));
    }

    #[test]
    fn test_join_before_start_is_invalid() {
        let mut session = CaptureSession::new(ScriptedWorker::new(Some(1), None));
        assert!(matches!(session.join(), Err(CaptureError::InvalidState(_))));
    }
}
