use crate::batch::{run_batch, BatchOperation, BatchReport};
use crate::config::AppConfig;
use crate::db::DbManager;
use crate::error::{EngineError, Result};
use crate::progress::{OperationContext, ProgressReporter};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Clears the busy flag when the worker finishes, however it finishes.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the one `DbManager` and runs at most one operation at a time.
pub struct Engine {
    db: Arc<Mutex<DbManager>>,
    busy: Arc<AtomicBool>,
    row_delay: Duration,
}

impl Engine {
    pub fn new(db: DbManager) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            busy: Arc::new(AtomicBool::new(false)),
            row_delay: Duration::ZERO,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(DbManager::from_config(config)).with_row_delay(config.row_delay())
    }

    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = delay;
        self
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    // A worker that panicked poisons the mutex; its connection guard has
    // already finalized, so the manager is safe to reuse.
    fn lock_db(&self) -> MutexGuard<'_, DbManager> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `op` on a blocking worker. Must be called from within a Tokio
    /// runtime. Fails with [`EngineError::Busy`] while another run is active.
    pub fn start<O>(&self, mut op: O, reporter: Arc<dyn ProgressReporter>) -> Result<OperationHandle>
    where
        O: BatchOperation + 'static,
    {
        if self.busy.swap(true, Ordering::SeqCst) {
            log::warn!("Refusing to start {}: another operation is running", op.name());
            return Err(EngineError::Busy);
        }
        let guard = BusyGuard(Arc::clone(&self.busy));

        let ctx = OperationContext::new(Arc::clone(&reporter)).with_row_delay(self.row_delay);
        let cancel = ctx.cancel.clone();
        let db = Arc::clone(&self.db);

        log::info!("Starting {}", op.name());
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let mut db = db.lock().unwrap_or_else(PoisonError::into_inner);
            run_batch(&mut op, &mut db, &ctx)
        });

        Ok(OperationHandle { cancel, task, reporter })
    }

    /// Connect, run `f`, finalize. For read-only inspection between runs;
    /// holds the busy flag so no operation can start meanwhile. Blocks, so
    /// async callers should go through `block_in_place` or `spawn_blocking`.
    pub fn with_db<T>(&self, f: impl FnOnce(&DbManager) -> Result<T>) -> Result<T> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Busy);
        }
        let _guard = BusyGuard(Arc::clone(&self.busy));
        let mut db = self.lock_db();
        let session = db.session()?;
        f(&session)
    }
}

/// A running operation: cancel it or await its report.
pub struct OperationHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<BatchReport>>,
    reporter: Arc<dyn ProgressReporter>,
}

impl OperationHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<BatchReport> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                let message = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                let err = EngineError::Worker(message);
                log::error!("{}", err);
                self.reporter.on_error(&err);
                Err(err)
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchState, RowOutcome};
    use crate::testutil::{Library, RecordingReporter};
    use crate::validator::FieldRule;
    use std::thread;

    #[derive(Clone, Copy)]
    enum Mode {
        Count,
        WaitForCancel,
        Panic,
    }

    struct Scripted(Mode);

    impl BatchOperation for Scripted {
        type Item = String;

        fn name(&self) -> &str {
            "Scripted"
        }

        fn mutates(&self) -> bool {
            false
        }

        fn field_rules(&self) -> Vec<FieldRule<'_>> {
            Vec::new()
        }

        fn enumerate(&mut self, db: &DbManager, _ctx: &OperationContext) -> Result<Vec<String>> {
            db.query("SELECT ID FROM djmdContent ORDER BY ID", [], |r| r.get(0))
        }

        fn describe(&self, item: &String) -> String {
            item.clone()
        }

        fn apply(&mut self, _db: &DbManager, _item: String, ctx: &OperationContext) -> Result<RowOutcome> {
            match self.0 {
                Mode::Count => Ok(RowOutcome::Skipped),
                Mode::WaitForCancel => {
                    for _ in 0..1000 {
                        if ctx.is_cancelled() {
                            return Ok(RowOutcome::Interrupted);
                        }
                        thread::sleep(Duration::from_millis(5));
                    }
                    Ok(RowOutcome::Skipped)
                }
                Mode::Panic => panic!("row blew up"),
            }
        }
    }

    fn engine_with_tracks(n: usize) -> (Library, Engine) {
        let lib = Library::new();
        for i in 0..n {
            lib.add_track(&i.to_string(), "/Music/A", &format!("t{i}.mp3"), None);
        }
        let engine = Engine::new(lib.manager());
        (lib, engine)
    }

    #[tokio::test]
    async fn runs_operation_and_releases_busy_flag() {
        let (_lib, engine) = engine_with_tracks(3);
        let reporter = Arc::new(RecordingReporter::default());
        let handle = engine.start(Scripted(Mode::Count), reporter.clone()).unwrap();
        let report = handle.join().await.unwrap();
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.skipped, 3);
        assert!(!engine.is_busy());
        assert_eq!(reporter.completions().len(), 1);
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_busy() {
        let (_lib, engine) = engine_with_tracks(2);
        let handle = engine
            .start(Scripted(Mode::WaitForCancel), Arc::new(RecordingReporter::default()))
            .unwrap();
        let second = engine.start(Scripted(Mode::Count), Arc::new(RecordingReporter::default()));
        assert!(matches!(second, Err(EngineError::Busy)));
        assert!(matches!(engine.with_db(|db| db.get_playlists()), Err(EngineError::Busy)));

        handle.cancel();
        let report = handle.join().await.unwrap();
        assert!(report.is_cancelled());
        assert_eq!(report.processed, 0);

        let again = engine.start(Scripted(Mode::Count), Arc::new(RecordingReporter::default()));
        assert!(again.unwrap().join().await.is_ok());
    }

    #[tokio::test]
    async fn start_is_rejected_during_inspection() {
        let (_lib, engine) = engine_with_tracks(2);
        let playlists = engine
            .with_db(|db| {
                assert!(engine.is_busy());
                let started = engine.start(Scripted(Mode::Count), Arc::new(RecordingReporter::default()));
                assert!(matches!(started, Err(EngineError::Busy)));
                assert!(matches!(engine.with_db(|_| Ok(())), Err(EngineError::Busy)));
                db.get_playlists()
            })
            .unwrap();
        assert!(playlists.is_empty());
        assert!(!engine.is_busy());

        let report = engine
            .start(Scripted(Mode::Count), Arc::new(RecordingReporter::default()))
            .unwrap()
            .join()
            .await
            .unwrap();
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn failed_inspection_releases_busy_flag() {
        let (_lib, engine) = engine_with_tracks(1);
        let err = engine
            .with_db(|db| db.query("SELECT nope FROM djmdContent", [], |r| r.get::<_, String>(0)))
            .unwrap_err();
        assert!(!matches!(err, EngineError::Busy));
        assert!(!engine.is_busy());
    }

    #[tokio::test]
    async fn worker_panic_becomes_error_and_engine_recovers() {
        let (_lib, engine) = engine_with_tracks(1);
        let reporter = Arc::new(RecordingReporter::default());
        let handle = engine.start(Scripted(Mode::Panic), reporter.clone()).unwrap();
        match handle.join().await {
            Err(EngineError::Worker(message)) => assert!(message.contains("row blew up")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(reporter.errors().len(), 1);
        assert!(!engine.is_busy());
        let connected = engine.with_db(|db| Ok(db.is_connected())).unwrap();
        assert!(connected);
        assert!(!engine.lock_db().is_connected());
    }
}
