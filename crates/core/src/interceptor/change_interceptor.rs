use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use log::{debug, error, info, warn};
use serde_json::Value;

use super::callbacks::{Interceptor, TransactionOutcome};
use super::frame::{ChangeCategory, FrameId, TransactionFrame};
use super::state::flag_transition;
use super::unit_of_work::UnitOfWork;
use crate::config::{DispatchPolicy, InterceptorConfig};
use crate::entity::{EntityRef, PersistentCollection};
use crate::errors::{Error, Result};
use crate::events::{ChangeEvent, ChangeEventSink};

/// A frame on a thread's stack.
#[derive(Debug)]
struct OpenFrame {
    id: FrameId,
    /// Opened by a recording callback rather than by a begin. The next begin
    /// on the thread adopts it instead of stacking a fresh frame on top.
    lazy: bool,
    changes: TransactionFrame,
}

/// Captures entity changes per transaction and fires them once the
/// transaction commits.
///
/// Each thread owns a stack of [`TransactionFrame`]s. Beginning a unit of work
/// pushes a frame, completing one pops it, and recording callbacks always
/// write into the top frame. A recording callback on a thread with no open
/// frame opens one lazily; a begin that follows adopts that frame.
///
/// On commit the popped frame is drained in [`FLUSH_ORDER`](super::FLUSH_ORDER)
/// into the sink. The frame leaves the stack before the first event fires, so
/// a failing or panicking sink never leaves state behind for the next unit of
/// work on that thread.
///
/// A thread's entry is removed when its last frame completes. Frames left open
/// by a thread that exits stay until [`discard_thread`](Self::discard_thread)
/// is called for it.
pub struct ChangeInterceptor {
    config: InterceptorConfig,
    sink: Arc<dyn ChangeEventSink>,
    stacks: DashMap<ThreadId, Vec<OpenFrame>>,
    next_frame: AtomicU64,
}

impl ChangeInterceptor {
    pub fn new(sink: Arc<dyn ChangeEventSink>) -> Self {
        Self::with_config(sink, InterceptorConfig::default())
    }

    pub fn with_config(sink: Arc<dyn ChangeEventSink>, config: InterceptorConfig) -> Self {
        Self {
            config,
            sink,
            stacks: DashMap::new(),
            next_frame: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    /// Opens a unit of work on the calling thread.
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork::begin(self)
    }

    /// Number of open frames on the calling thread.
    pub fn depth(&self) -> usize {
        self.stacks
            .get(&thread::current().id())
            .map_or(0, |stack| stack.len())
    }

    /// Number of entities recorded under `category` in the calling thread's
    /// top frame.
    pub fn pending(&self, category: ChangeCategory) -> usize {
        self.stacks
            .get(&thread::current().id())
            .and_then(|stack| stack.last().map(|open| open.changes.len(category)))
            .unwrap_or(0)
    }

    /// Number of threads that currently hold open frames.
    pub fn open_threads(&self) -> usize {
        self.stacks.len()
    }

    /// Drops every frame `thread` left open, without firing anything.
    ///
    /// Meant for threads that have exited mid-transaction. Returns the number
    /// of frames discarded.
    pub fn discard_thread(&self, thread: ThreadId) -> usize {
        match self.stacks.remove(&thread) {
            Some((_, stack)) => {
                warn!(
                    "Discarding {} open frame(s) of thread {:?}",
                    stack.len(),
                    thread
                );
                stack.len()
            }
            None => 0,
        }
    }

    fn next_frame_id(&self) -> FrameId {
        FrameId::new(self.next_frame.fetch_add(1, Ordering::Relaxed))
    }

    fn record(&self, category: ChangeCategory, entity: &EntityRef) {
        let mut stack = self.stacks.entry(thread::current().id()).or_default();
        if stack.is_empty() {
            debug!("No open frame on this thread, opening one");
            stack.push(OpenFrame {
                id: self.next_frame_id(),
                lazy: true,
                changes: TransactionFrame::default(),
            });
        }
        if let Some(open) = stack.last_mut() {
            if open.changes.record(category, entity.clone()) {
                debug!("Recorded {} as {:?}", entity.entity_type(), category);
            }
        }
    }

    fn pop_frame(&self) -> Option<TransactionFrame> {
        let id = thread::current().id();
        let frame = self.stacks.get_mut(&id)?.pop();
        self.stacks.remove_if(&id, |_, stack| stack.is_empty());
        frame.map(|open| open.changes)
    }

    /// Takes `frame` off the calling thread's stack, rolling back any frames
    /// still open above it. `None` if an enclosing completion already took it.
    fn detach_frame(&self, frame: FrameId) -> Option<TransactionFrame> {
        let thread = thread::current().id();
        let detached = {
            let mut stack = self.stacks.get_mut(&thread)?;
            let pos = stack.iter().rposition(|open| open.id == frame)?;
            let inner = stack.len() - pos - 1;
            if inner > 0 {
                warn!(
                    "Completing a unit of work with {} inner unit(s) still open, rolling them back",
                    inner
                );
                stack.truncate(pos + 1);
            }
            stack.pop()
        };
        self.stacks.remove_if(&thread, |_, stack| stack.is_empty());
        detached.map(|open| open.changes)
    }

    fn finish(&self, frame: TransactionFrame, outcome: TransactionOutcome) -> Result<()> {
        if !outcome.was_committed() {
            if !frame.is_empty() {
                debug!("Transaction rolled back, discarding captured changes");
            }
            return Ok(());
        }

        self.dispatch(frame)
    }

    fn dispatch(&self, frame: TransactionFrame) -> Result<()> {
        let pending = frame.drain();
        if pending.is_empty() {
            return Ok(());
        }

        let total = pending.len();
        let mut attempted = 0;
        let mut failed = 0;
        let mut first: Option<Error> = None;

        for (action, entity) in pending {
            attempted += 1;
            let event = ChangeEvent::new(action, entity);
            let topic = event.topic();
            let uuid = event.uuid.clone();

            if let Err(e) = self.sink.fire_event(event) {
                error!("Failed to fire {} for {}: {}", topic, uuid, e);
                failed += 1;
                if first.is_none() {
                    first = Some(e);
                }
                if self.config.dispatch_policy == DispatchPolicy::StopOnError {
                    break;
                }
            }
        }

        match first {
            None => {
                info!("Fired {} change event(s)", total);
                Ok(())
            }
            Some(first) => Err(Error::Dispatch {
                failed,
                attempted,
                first: Box::new(first),
            }),
        }
    }
}

impl Interceptor for ChangeInterceptor {
    fn on_save(&self, entity: &EntityRef, _state: &[Value], _property_names: &[&str]) -> bool {
        if entity.as_trackable().is_some() {
            self.record(ChangeCategory::Inserted, entity);
        }
        false
    }

    fn on_flush_dirty(
        &self,
        entity: &EntityRef,
        current_state: Option<&[Value]>,
        previous_state: Option<&[Value]>,
        property_names: &[&str],
    ) -> bool {
        let Some(trackable) = entity.as_trackable() else {
            return false;
        };
        self.record(ChangeCategory::Updated, entity);

        if let Some(flag) = trackable.status_flag() {
            let property = self.config.flag_property(flag);
            if let Some(category) = flag_transition(
                flag,
                property,
                property_names,
                current_state,
                previous_state,
            ) {
                self.record(category, entity);
            }
        }
        false
    }

    fn on_delete(&self, entity: &EntityRef, _state: &[Value], _property_names: &[&str]) {
        if entity.as_trackable().is_some() {
            self.record(ChangeCategory::Deleted, entity);
        }
    }

    fn on_collection_update(&self, collection: &dyn PersistentCollection) {
        // A changed child collection surfaces as an update of its owner.
        if let Some(owner) = collection.owner() {
            if owner.as_trackable().is_some() {
                debug!(
                    "Collection {} changed, marking owner {} updated",
                    collection.role(),
                    owner.entity_type()
                );
                self.record(ChangeCategory::Updated, &owner);
            }
        }
    }

    fn after_transaction_begin(&self) {
        self.begin_frame();
    }

    fn after_transaction_completion(&self, outcome: TransactionOutcome) -> Result<()> {
        let Some(frame) = self.pop_frame() else {
            debug!("Transaction completed with no open frame");
            return Ok(());
        };

        self.finish(frame, outcome)
    }

    fn begin_frame(&self) -> Option<FrameId> {
        let mut stack = self.stacks.entry(thread::current().id()).or_default();
        if let Some(open) = stack.last_mut().filter(|open| open.lazy) {
            open.lazy = false;
            debug!("Adopting frame opened before the transaction began");
            return Some(open.id);
        }

        let id = self.next_frame_id();
        stack.push(OpenFrame {
            id,
            lazy: false,
            changes: TransactionFrame::default(),
        });
        debug!("Opened frame at depth {}", stack.len());
        Some(id)
    }

    fn complete_frame(&self, frame: Option<FrameId>, outcome: TransactionOutcome) -> Result<()> {
        let Some(frame) = frame else {
            return self.after_transaction_completion(outcome);
        };

        match self.detach_frame(frame) {
            Some(changes) => self.finish(changes, outcome),
            None if outcome.was_committed() => Err(Error::UnitOfWorkClosed),
            None => {
                debug!("Unit of work was already rolled back by an enclosing one");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{OwnedCollection, Persistent, StatusFlag, Trackable};
    use crate::events::{Action, MockEventSink};
    use serde_json::json;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Concept {
        uuid: String,
        flag: Option<StatusFlag>,
    }

    impl Persistent for Concept {
        fn entity_type(&self) -> &str {
            "Concept"
        }

        fn as_trackable(&self) -> Option<&dyn Trackable> {
            Some(self)
        }
    }

    impl Trackable for Concept {
        fn uuid(&self) -> &str {
            &self.uuid
        }

        fn status_flag(&self) -> Option<StatusFlag> {
            self.flag
        }
    }

    /// Not trackable: persisted, but never reported.
    #[derive(Debug)]
    struct AuditRow;

    impl Persistent for AuditRow {
        fn entity_type(&self) -> &str {
            "AuditRow"
        }
    }

    fn concept(uuid: &str) -> EntityRef {
        Arc::new(Concept {
            uuid: uuid.to_string(),
            flag: None,
        })
    }

    fn flagged(uuid: &str, flag: StatusFlag) -> EntityRef {
        Arc::new(Concept {
            uuid: uuid.to_string(),
            flag: Some(flag),
        })
    }

    fn setup() -> (ChangeInterceptor, MockEventSink) {
        let sink = MockEventSink::new();
        (ChangeInterceptor::new(Arc::new(sink.clone())), sink)
    }

    const NAMES: [&str; 2] = ["name", "retired"];

    #[test]
    fn test_repeated_inserts_fire_one_created_event() {
        let (interceptor, sink) = setup();
        let a = concept("a");

        let uow = interceptor.begin();
        interceptor.on_save(&a, &[], &[]);
        interceptor.on_save(&a, &[], &[]);
        interceptor.on_save(&a, &[], &[]);
        uow.commit().unwrap();

        assert_eq!(sink.fired(), vec![(Action::Created, "a".to_string())]);
    }

    #[test]
    fn test_insert_and_update_fire_in_fixed_order() {
        let (interceptor, sink) = setup();
        let a = concept("a");
        let b = concept("b");

        let uow = interceptor.begin();
        interceptor.on_flush_dirty(
            &b,
            Some(&[json!("new name"), json!(false)][..]),
            Some(&[json!("old name"), json!(false)][..]),
            &NAMES,
        );
        interceptor.on_save(&a, &[json!("a"), json!(false)], &NAMES);
        uow.commit().unwrap();

        assert_eq!(
            sink.fired(),
            vec![
                (Action::Created, "a".to_string()),
                (Action::Updated, "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_delete_fires_purged_before_created() {
        let (interceptor, sink) = setup();
        let old = concept("same-uuid");
        let replacement = concept("same-uuid");

        let uow = interceptor.begin();
        interceptor.on_save(&replacement, &[], &[]);
        interceptor.on_delete(&old, &[], &[]);
        uow.commit().unwrap();

        assert_eq!(
            sink.actions_for("same-uuid"),
            vec![Action::Purged, Action::Created]
        );
    }

    #[test]
    fn test_retiring_fires_updated_and_retired() {
        let (interceptor, sink) = setup();
        let c = flagged("c", StatusFlag::Retired);

        let uow = interceptor.begin();
        interceptor.on_flush_dirty(
            &c,
            Some(&[json!("x"), json!(true)][..]),
            Some(&[json!("x"), json!(false)][..]),
            &NAMES,
        );
        uow.commit().unwrap();

        assert_eq!(sink.actions_for("c"), vec![Action::Updated, Action::Retired]);
    }

    #[test]
    fn test_already_retired_fires_only_updated() {
        let (interceptor, sink) = setup();
        let c = flagged("c", StatusFlag::Retired);

        let uow = interceptor.begin();
        interceptor.on_flush_dirty(
            &c,
            Some(&[json!("renamed"), json!(true)][..]),
            Some(&[json!("x"), json!(true)][..]),
            &NAMES,
        );
        uow.commit().unwrap();

        assert_eq!(sink.actions_for("c"), vec![Action::Updated]);
    }

    #[test]
    fn test_unvoiding_fires_updated_and_unvoided() {
        let (interceptor, sink) = setup();
        let c = flagged("c", StatusFlag::Voided);
        let names = ["voided", "value"];

        let uow = interceptor.begin();
        interceptor.on_flush_dirty(
            &c,
            Some(&[json!(false), json!(7)][..]),
            Some(&[json!(true), json!(7)][..]),
            &names,
        );
        uow.commit().unwrap();

        let actions = sink.actions_for("c");
        assert_eq!(actions, vec![Action::Updated, Action::Unvoided]);
        assert!(!actions.contains(&Action::Voided));
    }

    #[test]
    fn test_retireable_ignores_voided_property() {
        let (interceptor, sink) = setup();
        let c = flagged("c", StatusFlag::Retired);
        let names = ["voided", "retired"];

        let uow = interceptor.begin();
        interceptor.on_flush_dirty(
            &c,
            Some(&[json!(true), json!(false)][..]),
            Some(&[json!(false), json!(false)][..]),
            &names,
        );
        uow.commit().unwrap();

        assert_eq!(sink.actions_for("c"), vec![Action::Updated]);
    }

    #[test]
    fn test_configured_flag_property_name() {
        let sink = MockEventSink::new();
        let config = InterceptorConfig {
            retired_property: "is_retired".to_string(),
            ..InterceptorConfig::default()
        };
        let interceptor = ChangeInterceptor::with_config(Arc::new(sink.clone()), config);
        let c = flagged("c", StatusFlag::Retired);
        let names = ["is_retired"];

        let uow = interceptor.begin();
        interceptor.on_flush_dirty(&c, Some(&[json!(false)][..]), Some(&[json!(true)][..]), &names);
        uow.commit().unwrap();

        assert_eq!(sink.actions_for("c"), vec![Action::Updated, Action::Unretired]);
    }

    #[test]
    fn test_untracked_entities_are_ignored() {
        let (interceptor, sink) = setup();
        let row: EntityRef = Arc::new(AuditRow);

        let uow = interceptor.begin();
        assert!(!interceptor.on_save(&row, &[], &[]));
        assert!(!interceptor.on_flush_dirty(&row, None, None, &[]));
        interceptor.on_delete(&row, &[], &[]);
        interceptor.on_collection_update(&OwnedCollection::new("rows", row.clone()));
        assert_eq!(interceptor.pending(ChangeCategory::Inserted), 0);
        uow.commit().unwrap();

        assert!(sink.is_empty());
    }

    #[test]
    fn test_collection_change_updates_owner() {
        let (interceptor, sink) = setup();
        let owner = concept("owner");

        let uow = interceptor.begin();
        interceptor.on_collection_update(&OwnedCollection::new("answers", owner.clone()));
        interceptor.on_collection_update(&OwnedCollection::new("names", owner));
        interceptor.on_collection_update(&OwnedCollection::detached("orphans"));
        uow.commit().unwrap();

        assert_eq!(sink.fired(), vec![(Action::Updated, "owner".to_string())]);
    }

    #[test]
    fn test_rollback_fires_nothing_and_clears_frame() {
        let (interceptor, sink) = setup();
        let a = concept("a");

        let uow = interceptor.begin();
        interceptor.on_save(&a, &[], &[]);
        uow.rollback().unwrap();

        assert!(sink.is_empty());
        assert_eq!(interceptor.depth(), 0);

        let b = concept("b");
        let uow = interceptor.begin();
        interceptor.on_save(&b, &[], &[]);
        uow.commit().unwrap();

        assert_eq!(sink.fired(), vec![(Action::Created, "b".to_string())]);
    }

    #[test]
    fn test_dropped_unit_of_work_rolls_back() {
        let (interceptor, sink) = setup();
        {
            let _uow = interceptor.begin();
            interceptor.on_delete(&concept("a"), &[], &[]);
            assert_eq!(interceptor.depth(), 1);
        }

        assert_eq!(interceptor.depth(), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_lazy_frame_without_begin() {
        let (interceptor, sink) = setup();
        assert_eq!(interceptor.depth(), 0);

        interceptor.on_save(&concept("a"), &[], &[]);
        assert_eq!(interceptor.depth(), 1);
        assert_eq!(interceptor.pending(ChangeCategory::Inserted), 1);

        interceptor
            .after_transaction_completion(TransactionOutcome::Committed)
            .unwrap();

        assert_eq!(interceptor.depth(), 0);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_completion_without_frame_is_noop() {
        let (interceptor, sink) = setup();
        interceptor
            .after_transaction_completion(TransactionOutcome::Committed)
            .unwrap();
        assert!(sink.is_empty());
        assert_eq!(interceptor.depth(), 0);
    }

    #[test]
    fn test_nested_units_fire_at_their_own_completion() {
        let (interceptor, sink) = setup();
        let outer_obj = concept("outer");
        let inner_obj = concept("inner");

        let outer = interceptor.begin();
        interceptor.on_save(&outer_obj, &[], &[]);

        let inner = interceptor.begin();
        assert_eq!(interceptor.depth(), 2);
        interceptor.on_save(&inner_obj, &[], &[]);
        inner.commit().unwrap();

        assert_eq!(sink.fired(), vec![(Action::Created, "inner".to_string())]);
        assert_eq!(interceptor.depth(), 1);
        assert_eq!(interceptor.pending(ChangeCategory::Inserted), 1);

        outer.commit().unwrap();
        assert_eq!(
            sink.fired(),
            vec![
                (Action::Created, "inner".to_string()),
                (Action::Created, "outer".to_string()),
            ]
        );
        assert_eq!(interceptor.depth(), 0);
    }

    #[test]
    fn test_inner_rollback_keeps_outer_changes() {
        let (interceptor, sink) = setup();

        let outer = interceptor.begin();
        interceptor.on_save(&concept("kept"), &[], &[]);
        let inner = interceptor.begin();
        interceptor.on_save(&concept("dropped"), &[], &[]);
        inner.rollback().unwrap();
        outer.commit().unwrap();

        assert_eq!(sink.fired(), vec![(Action::Created, "kept".to_string())]);
    }

    #[test]
    fn test_outer_commit_rolls_back_open_inner_unit() {
        let (interceptor, sink) = setup();

        let outer = interceptor.begin();
        interceptor.on_save(&concept("outer-committed"), &[], &[]);
        let inner = interceptor.begin();
        interceptor.on_save(&concept("inner-rolled-back"), &[], &[]);

        outer.commit().unwrap();
        assert_eq!(interceptor.depth(), 0);
        inner.rollback().unwrap();

        assert_eq!(
            sink.fired(),
            vec![(Action::Created, "outer-committed".to_string())]
        );
        assert_eq!(interceptor.depth(), 0);
    }

    #[test]
    fn test_commit_after_enclosing_completion_is_refused() {
        let (interceptor, sink) = setup();

        let outer = interceptor.begin();
        let inner = interceptor.begin();
        interceptor.on_save(&concept("inner"), &[], &[]);
        outer.rollback().unwrap();

        // A later unit of work reaching the same depth must not be completed
        // by the stale guard.
        let fresh = interceptor.begin();
        let fresh_inner = interceptor.begin();
        interceptor.on_save(&concept("fresh"), &[], &[]);

        assert!(matches!(inner.commit(), Err(Error::UnitOfWorkClosed)));
        assert_eq!(interceptor.depth(), 2);

        fresh_inner.commit().unwrap();
        fresh.commit().unwrap();
        assert_eq!(sink.fired(), vec![(Action::Created, "fresh".to_string())]);
    }

    #[test]
    fn test_begin_adopts_frame_opened_before_it() {
        let (interceptor, sink) = setup();

        interceptor.on_save(&concept("pre-begin"), &[], &[]);
        assert_eq!(interceptor.depth(), 1);

        let uow = interceptor.begin();
        assert_eq!(interceptor.depth(), 1);
        interceptor.on_save(&concept("in-unit"), &[], &[]);
        uow.commit().unwrap();

        assert_eq!(interceptor.depth(), 0);
        let fired = sink.fired();
        assert_eq!(fired.len(), 2);
        assert!(fired.contains(&(Action::Created, "pre-begin".to_string())));
        assert!(fired.contains(&(Action::Created, "in-unit".to_string())));
    }

    #[test]
    fn test_nested_begin_does_not_adopt_outer_frame() {
        let (interceptor, sink) = setup();

        interceptor.on_save(&concept("outer"), &[], &[]);
        let outer = interceptor.begin();
        let inner = interceptor.begin();
        assert_eq!(interceptor.depth(), 2);
        interceptor.on_save(&concept("inner"), &[], &[]);
        inner.rollback().unwrap();
        outer.commit().unwrap();

        assert_eq!(sink.fired(), vec![(Action::Created, "outer".to_string())]);
    }

    #[test]
    fn test_discard_thread_drops_frames_left_by_exited_thread() {
        let (interceptor, sink) = setup();
        let interceptor = Arc::new(interceptor);

        let worker = {
            let interceptor = interceptor.clone();
            thread::spawn(move || {
                interceptor.on_save(&concept("abandoned"), &[], &[]);
                thread::current().id()
            })
        };
        let worker_id = worker.join().unwrap();

        assert_eq!(interceptor.open_threads(), 1);
        assert_eq!(interceptor.discard_thread(worker_id), 1);
        assert_eq!(interceptor.open_threads(), 0);
        assert_eq!(interceptor.discard_thread(worker_id), 0);
        assert!(sink.is_empty());
    }

    struct FailingSink {
        fail_uuid: String,
        delivered: Mutex<Vec<String>>,
    }

    impl ChangeEventSink for FailingSink {
        fn fire_event(&self, event: ChangeEvent) -> Result<()> {
            if event.uuid == self.fail_uuid {
                return Err(Error::Sink("bus rejected event".to_string()));
            }
            self.delivered.lock().unwrap().push(event.uuid);
            Ok(())
        }
    }

    fn failing_interceptor(policy: DispatchPolicy) -> (ChangeInterceptor, Arc<FailingSink>) {
        let sink = Arc::new(FailingSink {
            fail_uuid: "bad".to_string(),
            delivered: Mutex::new(Vec::new()),
        });
        let config = InterceptorConfig {
            dispatch_policy: policy,
            ..InterceptorConfig::default()
        };
        (ChangeInterceptor::with_config(sink.clone(), config), sink)
    }

    #[test]
    fn test_sink_failure_continues_and_reports() {
        let (interceptor, sink) = failing_interceptor(DispatchPolicy::ContinueOnError);

        let uow = interceptor.begin();
        interceptor.on_delete(&concept("bad"), &[], &[]);
        interceptor.on_save(&concept("good"), &[], &[]);
        let err = uow.commit().unwrap_err();

        match err {
            Error::Dispatch {
                failed, attempted, ..
            } => {
                assert_eq!(failed, 1);
                assert_eq!(attempted, 2);
            }
            other => panic!("Expected Dispatch error, got {other:?}"),
        }
        assert_eq!(*sink.delivered.lock().unwrap(), vec!["good".to_string()]);
        assert_eq!(interceptor.depth(), 0);
    }

    #[test]
    fn test_sink_failure_stops_when_configured() {
        let (interceptor, sink) = failing_interceptor(DispatchPolicy::StopOnError);

        let uow = interceptor.begin();
        interceptor.on_delete(&concept("bad"), &[], &[]);
        interceptor.on_save(&concept("good"), &[], &[]);
        let err = uow.commit().unwrap_err();

        assert!(matches!(
            err,
            Error::Dispatch {
                failed: 1,
                attempted: 1,
                ..
            }
        ));
        assert!(sink.delivered.lock().unwrap().is_empty());
        assert_eq!(interceptor.depth(), 0);
    }

    struct PanickingSink;

    impl ChangeEventSink for PanickingSink {
        fn fire_event(&self, _event: ChangeEvent) -> Result<()> {
            panic!("subscriber blew up");
        }
    }

    #[test]
    fn test_panicking_sink_leaves_no_frame_behind() {
        let interceptor = ChangeInterceptor::new(Arc::new(PanickingSink));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let uow = interceptor.begin();
            interceptor.on_save(&concept("a"), &[], &[]);
            let _ = uow.commit();
        }));

        assert!(result.is_err());
        assert_eq!(interceptor.depth(), 0);
        assert_eq!(interceptor.pending(ChangeCategory::Inserted), 0);
    }

    #[test]
    fn test_threads_have_independent_stacks() {
        let (interceptor, sink) = setup();
        let interceptor = Arc::new(interceptor);

        let outer = interceptor.begin();
        interceptor.on_save(&concept("main"), &[], &[]);

        let worker = {
            let interceptor = interceptor.clone();
            thread::spawn(move || {
                assert_eq!(interceptor.depth(), 0);
                let uow = interceptor.begin();
                interceptor.on_save(&concept("worker"), &[], &[]);
                uow.rollback().unwrap();
                interceptor.depth()
            })
        };
        assert_eq!(worker.join().unwrap(), 0);

        assert_eq!(interceptor.depth(), 1);
        outer.commit().unwrap();
        assert_eq!(sink.fired(), vec![(Action::Created, "main".to_string())]);
    }
}
