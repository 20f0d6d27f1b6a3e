#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;
    use std::rc::Rc;

    use crate::dispatch;
    use crate::*;

    /// Scripted store: counts builds and cancels, keeps live sinks so the
    /// test can emit later, and fails construction for chosen ids.
    #[derive(Clone, Default)]
    struct Store(Rc<StoreInner>);

    #[derive(Default)]
    struct StoreInner {
        builds: Cell<usize>,
        cancels: Cell<usize>,
        next_token: Cell<u64>,
        sinks: RefCell<Vec<(u64, u32, Sink<String>)>>,
        failing: RefCell<HashSet<u32>>,
        no_replay: Cell<bool>,
        reject_on_subscribe: Cell<bool>,
        on_subscribe: RefCell<Option<Box<dyn Fn(u32)>>>,
        log: RefCell<Vec<String>>,
    }

    impl Store {
        fn emit(&self, id: u32, value: &str) {
            let sinks: Vec<_> = self
                .0
                .sinks
                .borrow()
                .iter()
                .filter(|(_, sid, _)| *sid == id)
                .map(|(_, _, s)| s.clone())
                .collect();
            for s in sinks {
                s.send(value.to_string());
            }
        }

        fn fail(&self, id: u32, msg: &str) {
            let sinks: Vec<_> = self
                .0
                .sinks
                .borrow()
                .iter()
                .filter(|(_, sid, _)| *sid == id)
                .map(|(_, _, s)| s.clone())
                .collect();
            for s in sinks {
                s.fail(QueryError::delivery_msg(msg));
            }
        }

        fn sink_for(&self, id: u32) -> Sink<String> {
            self.0
                .sinks
                .borrow()
                .iter()
                .find(|(_, sid, _)| *sid == id)
                .map(|(_, _, s)| s.clone())
                .expect("no live stream for id")
        }

        fn live(&self) -> usize {
            self.0.sinks.borrow().len()
        }

        fn builds(&self) -> usize {
            self.0.builds.get()
        }

        fn cancels(&self) -> usize {
            self.0.cancels.get()
        }

        fn log(&self) -> Vec<String> {
            self.0.log.borrow().clone()
        }
    }

    #[derive(Clone, PartialEq, Debug)]
    struct Lookup {
        id: u32,
        limit: usize,
    }

    fn lookup(id: u32) -> Lookup {
        Lookup { id, limit: 10 }
    }

    impl Queryable for Lookup {
        type Context = Store;
        type Value = String;

        fn default_value() -> String {
            "none".to_string()
        }

        fn stream(&self, store: &Store) -> Result<QueryStream<String>, QueryError> {
            let id = self.id;
            if store.0.failing.borrow().contains(&id) {
                return Err(QueryError::construction_msg(format!("no table for {id}")));
            }
            store.0.builds.set(store.0.builds.get() + 1);
            let store = store.clone();
            Ok(stream_fn(move |sink: Sink<String>| {
                store.0.log.borrow_mut().push(format!("subscribe {id}"));
                if let Some(hook) = store.0.on_subscribe.borrow().as_ref() {
                    hook(id);
                }
                if store.0.reject_on_subscribe.get() {
                    sink.fail(QueryError::delivery_msg(format!("{id} rejected")));
                } else if !store.0.no_replay.get() {
                    sink.send(format!("{id}:initial"));
                }
                let token = store.0.next_token.get();
                store.0.next_token.set(token + 1);
                store.0.sinks.borrow_mut().push((token, id, sink));
                Subscription::new(move || {
                    store.0.log.borrow_mut().push(format!("cancel {id}"));
                    store.0.cancels.set(store.0.cancels.get() + 1);
                    store.0.sinks.borrow_mut().retain(|(t, _, _)| *t != token);
                })
            }))
        }
    }

    fn bump_counter(q: &Query<Lookup>) -> Rc<Cell<u32>> {
        let bumps = Rc::new(Cell::new(0));
        let b = bumps.clone();
        q.revision().subscribe(move |_| b.set(b.get() + 1));
        bumps
    }

    #[test]
    fn test_sync_first_emission_is_not_signalled() {
        let store = Store::default();
        let q = Query::constant(lookup(1), ContextSelector::value(store.clone()));
        let bumps = bump_counter(&q);

        assert_eq!(q.value(), "none");
        evaluate(&Scope::new(), || q.on_evaluate());
        assert_eq!(q.value(), "1:initial");
        assert_eq!(bumps.get(), 0);

        store.emit(1, "v2");
        // queued until the UI thread drains
        assert_eq!(q.value(), "1:initial");
        assert_eq!(dispatch::pending(), 1);
        assert_eq!(dispatch::drain(), 1);
        assert_eq!(bumps.get(), 1);
        assert_eq!(q.value(), "v2");
    }

    #[test]
    fn test_unchanged_request_builds_once() {
        let store = Store::default();
        let q = Query::constant(lookup(1), ContextSelector::value(store.clone()));
        for _ in 0..5 {
            q.on_evaluate();
        }
        assert_eq!(store.builds(), 1);
        assert_eq!(store.live(), 1);
        assert_eq!(store.cancels(), 0);
    }

    #[test]
    fn test_request_change_cancels_before_resubscribing() {
        let store = Store::default();
        let request = signal(lookup(1));
        let q = Query::bound(
            Binding::from_signal(&request),
            ContextSelector::value(store.clone()),
        );
        q.on_evaluate();

        // Queued from A, then A gets replaced before the drain.
        store.emit(1, "late from 1");
        request.set(lookup(2));
        q.on_evaluate();

        assert_eq!(store.log(), vec!["subscribe 1", "cancel 1", "subscribe 2"]);
        assert_eq!(store.live(), 1);
        assert_eq!(q.value(), "2:initial");

        dispatch::drain();
        assert_eq!(q.value(), "2:initial");
    }

    #[test]
    fn test_construction_error_keeps_last_value() {
        let store = Store::default();
        store.0.failing.borrow_mut().insert(2);
        let q = Query::initial(lookup(1), ContextSelector::value(store.clone()));
        q.on_evaluate();
        assert_eq!(q.value(), "1:initial");

        q.projection().request().set(lookup(2));
        q.on_evaluate();

        assert_eq!(q.value(), "1:initial");
        let err = q.projection().error().expect("construction error");
        assert!(err.is_construction());
        assert!(!q.is_observing());
        assert_eq!(store.live(), 0);

        // no automatic retry
        q.on_evaluate();
        assert_eq!(store.builds(), 1);

        // a different request gets a fresh attempt and a clean error slot
        q.projection().request().set(lookup(3));
        q.on_evaluate();
        assert!(q.projection().error().is_none());
        assert_eq!(q.value(), "3:initial");
        assert!(q.is_observing());
    }

    #[test]
    fn test_override_wins_over_seed() {
        let store = Store::default();
        let q = Query::initial(lookup(1), ContextSelector::value(store.clone()));
        let bumps = bump_counter(&q);
        q.on_evaluate();

        q.projection().request().set(lookup(7));
        assert_eq!(bumps.get(), 1);
        assert_eq!(q.projection().request().get(), lookup(7));

        for _ in 0..3 {
            q.on_evaluate();
        }
        assert_eq!(q.tracked_request(), Some(lookup(7)));
        assert_eq!(store.builds(), 2);
        assert_eq!(q.projection().override_request(), Some(lookup(7)));
    }

    #[test]
    fn test_override_persists_when_construction_fails() {
        let store = Store::default();
        store.0.failing.borrow_mut().insert(9);
        let q = Query::initial(lookup(1), ContextSelector::value(store.clone()));
        q.on_evaluate();
        q.projection().request().set(lookup(9));
        q.on_evaluate();

        assert!(q.projection().error().is_some());
        assert_eq!(q.projection().override_request(), Some(lookup(9)));
        assert_eq!(q.projection().request().get(), lookup(9));
    }

    #[test]
    fn test_constant_ignores_writes() {
        let store = Store::default();
        let q = Query::constant(lookup(1), ContextSelector::value(store.clone()));
        let bumps = bump_counter(&q);
        q.on_evaluate();

        q.projection().request().set(lookup(2));
        q.projection()
            .field(|r: &Lookup| r.limit, |r, v| r.limit = v)
            .set(99);
        q.on_evaluate();

        assert_eq!(bumps.get(), 0);
        assert_eq!(q.tracked_request(), Some(lookup(1)));
        assert_eq!(q.projection().request().get(), lookup(1));
        assert_eq!(store.builds(), 1);
    }

    #[test]
    fn test_bound_follows_external_changes() {
        let store = Store::default();
        let request = signal(lookup(1));
        let q = Query::bound(
            Binding::from_signal(&request),
            ContextSelector::value(store.clone()),
        );
        let bumps = bump_counter(&q);
        q.on_evaluate();

        request.set(lookup(4));
        assert_eq!(q.tracked_request(), Some(lookup(1)));
        q.on_evaluate();
        assert_eq!(q.tracked_request(), Some(lookup(4)));
        assert_eq!(q.value(), "4:initial");

        // projection writes land in the external state
        q.projection().request().set(lookup(5));
        assert_eq!(request.get(), lookup(5));
        assert_eq!(bumps.get(), 1);
        assert_eq!(q.projection().override_request(), None);
    }

    #[test]
    fn test_field_binding_writes_whole_request() {
        let store = Store::default();
        let q = Query::initial(lookup(1), ContextSelector::value(store.clone()));
        q.on_evaluate();

        let limit = q.projection().field(|r: &Lookup| r.limit, |r, v| r.limit = v);
        assert_eq!(limit.get(), 10);
        limit.set(25);
        assert_eq!(limit.get(), 25);
        assert_eq!(q.projection().request().get(), Lookup { id: 1, limit: 25 });

        q.on_evaluate();
        assert_eq!(store.builds(), 2);
    }

    #[test]
    fn test_observation_disable_and_reenable() {
        let store = Store::default();
        let q = Query::constant(lookup(1), ContextSelector::value(store.clone()));
        q.on_evaluate();
        assert!(q.is_observing());

        with_observation_enabled(false, || q.on_evaluate());
        assert!(!q.is_observing());
        assert_eq!(q.tracked_request(), None);
        assert_eq!(store.live(), 0);
        // kept while idle
        assert_eq!(q.value(), "1:initial");

        q.on_evaluate();
        assert!(q.is_observing());
        assert_eq!(store.builds(), 2);
    }

    #[test]
    fn test_emission_after_disable_is_dropped() {
        let store = Store::default();
        let q = Query::constant(lookup(1), ContextSelector::value(store.clone()));
        q.on_evaluate();
        let sink = store.sink_for(1);

        with_observation_enabled(false, || q.on_evaluate());
        sink.send("too late".to_string());
        dispatch::drain();
        assert_eq!(q.value(), "1:initial");
    }

    #[test]
    fn test_delivery_error_keeps_stale_value() {
        let store = Store::default();
        let request = signal(lookup(1));
        let q = Query::bound(
            Binding::from_signal(&request),
            ContextSelector::value(store.clone()),
        );
        let bumps = bump_counter(&q);
        q.on_evaluate();

        store.fail(1, "disk on fire");
        dispatch::drain();
        assert_eq!(bumps.get(), 1);
        assert_eq!(q.value(), "1:initial");
        assert!(q.projection().error().is_some_and(|e| e.is_delivery()));

        // failed streams ignore further values
        store.emit(1, "after failure");
        dispatch::drain();
        assert_eq!(q.value(), "1:initial");

        request.set(lookup(2));
        q.on_evaluate();
        assert!(q.projection().error().is_none());
    }

    #[test]
    fn test_emission_from_other_thread() {
        let store = Store::default();
        store.0.no_replay.set(true);
        let q = Query::constant(lookup(1), ContextSelector::value(store.clone()));
        q.on_evaluate();
        assert_eq!(q.value(), "none");

        let sink = store.sink_for(1);
        std::thread::spawn(move || {
            sink.send("from worker".to_string());
        })
        .join()
        .unwrap();

        assert_eq!(q.value(), "none");
        assert_eq!(dispatch::drain(), 1);
        assert_eq!(q.value(), "from worker");
    }

    #[test]
    fn test_wakeup_runs_on_post() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let woken = Arc::new(AtomicUsize::new(0));
        let w = woken.clone();
        dispatch::set_wakeup(move || {
            w.fetch_add(1, Ordering::SeqCst);
        });

        let store = Store::default();
        let q = Query::constant(lookup(1), ContextSelector::value(store.clone()));
        q.on_evaluate();
        // synchronous replay is not queued
        assert_eq!(woken.load(Ordering::SeqCst), 0);

        store.emit(1, "x");
        assert_eq!(woken.load(Ordering::SeqCst), 1);
        dispatch::clear_wakeup();
        dispatch::drain();
    }

    #[test]
    fn test_drop_cancels_and_unregisters() {
        let store = Store::default();
        let q = Query::constant(lookup(1), ContextSelector::value(store.clone()));
        q.on_evaluate();
        assert_eq!(dispatch::live_trackers(), 1);

        store.emit(1, "pending");
        drop(q);
        assert_eq!(store.live(), 0);
        assert_eq!(dispatch::live_trackers(), 0);
        assert_eq!(dispatch::drain(), 0);
    }

    #[test]
    fn test_remember_query_lives_with_scope() {
        let store = Store::default();
        let scope = Scope::new();
        let build = |scope: &Scope| {
            let store = store.clone();
            evaluate(scope, || {
                let q = remember_query("items", || {
                    Query::constant(lookup(3), ContextSelector::value(store))
                });
                assert!(is_evaluating());
                q.value()
            })
        };

        assert_eq!(build(&scope), "3:initial");
        assert_eq!(build(&scope), "3:initial");
        assert_eq!(store.builds(), 1);
        assert!(!is_evaluating());

        scope.dispose();
        assert_eq!(store.live(), 0);
    }

    #[test]
    fn test_local_context_selector() {
        let store = Store::default();
        let q = Query::constant(lookup(1), ContextSelector::local());

        q.on_evaluate();
        assert!(q.projection().error().is_some_and(|e| e.is_construction()));
        assert_eq!(store.builds(), 0);

        // still tracked: only a request change retries
        with_local(store.clone(), || q.on_evaluate());
        assert_eq!(store.builds(), 0);

        let q = Query::constant(lookup(1), ContextSelector::local());
        with_local(store.clone(), || q.on_evaluate());
        assert_eq!(q.value(), "1:initial");
    }

    #[test]
    fn test_print_traces_events() {
        let store = Store::default();
        let (sink, lines) = PrintSink::lines();
        let q = Query::constant(lookup(1), ContextSelector::value(store.clone()))
            .with_print(PrintConfig::new("items").sink(sink));
        q.on_evaluate();
        store.emit(1, "next");
        dispatch::drain();
        drop(q);

        assert_eq!(
            *lines.lock(),
            vec![
                "items: receive subscription",
                "items: receive value: (\"1:initial\")",
                "items: receive value: (\"next\")",
                "items: receive cancel",
            ]
        );
    }

    #[test]
    fn test_just_unit_context() {
        #[derive(Clone, PartialEq)]
        struct Fixed(u8);
        impl Queryable for Fixed {
            type Context = ();
            type Value = u8;
            fn default_value() -> u8 {
                0
            }
            fn stream(&self, _: &()) -> Result<QueryStream<u8>, QueryError> {
                Ok(just(self.0))
            }
        }

        let q = Query::initial_unit(Fixed(4));
        q.on_evaluate();
        assert_eq!(q.value(), 4);
        q.projection().request().set(Fixed(8));
        q.on_evaluate();
        assert_eq!(q.value(), 8);
        // finished one-shot streams still count as tracked
        assert!(q.is_observing());
    }

    #[test]
    fn test_signal_subscribe_and_unsubscribe() {
        let sig = signal(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let id = sig.subscribe(move |v| s.borrow_mut().push(*v));

        sig.set(1);
        sig.update(|v| *v += 1);
        assert!(sig.unsubscribe(id));
        sig.set(3);

        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(sig.get(), 3);
    }

    #[test]
    fn test_signal_subscriber_may_write_back() {
        let sig = signal(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (s, w) = (seen.clone(), sig.clone());
        sig.subscribe(move |v| {
            s.borrow_mut().push(*v);
            if *v == 1 {
                w.set(2);
            }
        });

        sig.set(1);
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(sig.get(), 2);
    }

    #[test]
    fn test_revision_subscriber_may_bump_again() {
        let rev = Revision::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (s, r) = (seen.clone(), rev.clone());
        rev.subscribe(move |v| {
            s.borrow_mut().push(v);
            if v == 1 {
                r.bump();
            }
        });

        rev.bump();
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(rev.get(), 2);
    }

    #[test]
    fn test_revision_subscriber_writes_projection() {
        let store = Store::default();
        let q = Rc::new(Query::initial(lookup(1), ContextSelector::value(store.clone())));
        q.on_evaluate();

        let weak = Rc::downgrade(&q);
        q.revision().subscribe(move |_| {
            if let Some(q) = weak.upgrade()
                && q.projection().request().get() == lookup(1)
            {
                q.projection().request().set(lookup(3));
            }
        });

        store.emit(1, "v2");
        dispatch::drain();
        assert_eq!(q.value(), "v2");
        assert_eq!(q.revision().get(), 2);
        assert_eq!(q.projection().override_request(), Some(lookup(3)));

        q.on_evaluate();
        assert_eq!(q.tracked_request(), Some(lookup(3)));
        assert_eq!(q.value(), "3:initial");
    }

    #[test]
    fn test_async_delivery_signals_before_mutating() {
        let store = Store::default();
        let q = Rc::new(Query::constant(lookup(1), ContextSelector::value(store.clone())));
        q.on_evaluate();

        let seen_at_signal = Rc::new(RefCell::new(Vec::new()));
        let (s, weak) = (seen_at_signal.clone(), Rc::downgrade(&q));
        q.revision().subscribe(move |_| {
            if let Some(q) = weak.upgrade() {
                s.borrow_mut().push(q.value());
            }
        });

        store.emit(1, "v2");
        dispatch::drain();
        assert_eq!(*seen_at_signal.borrow(), vec!["1:initial"]);
        assert_eq!(q.value(), "v2");
    }

    #[test]
    fn test_sync_failure_in_subscribe_is_not_signalled() {
        let store = Store::default();
        store.0.reject_on_subscribe.set(true);
        let q = Query::constant(lookup(1), ContextSelector::value(store.clone()));
        let bumps = bump_counter(&q);
        q.on_evaluate();

        assert_eq!(bumps.get(), 0);
        assert_eq!(q.value(), "none");
        let err = q.projection().error().expect("failure from subscribe");
        assert!(err.is_delivery());
        assert_eq!(err.inner().to_string(), "1 rejected");
        assert!(q.is_observing());
        assert!(store.sink_for(1).is_closed());
        assert_eq!(dispatch::pending(), 0);
    }

    #[test]
    fn test_reconcile_from_inside_subscribe() {
        let store = Store::default();
        let request = signal(lookup(1));
        let q = Rc::new(Query::bound(
            Binding::from_signal(&request),
            ContextSelector::value(store.clone()),
        ));

        let (weak, r) = (Rc::downgrade(&q), request.clone());
        *store.0.on_subscribe.borrow_mut() = Some(Box::new(move |id| {
            if id == 1 {
                r.set(lookup(2));
                if let Some(q) = weak.upgrade() {
                    q.on_evaluate();
                }
            }
        }));
        q.on_evaluate();

        assert_eq!(store.log(), vec!["subscribe 1", "subscribe 2", "cancel 1"]);
        assert_eq!(store.live(), 1);
        assert_eq!(q.tracked_request(), Some(lookup(2)));
        assert_eq!(q.value(), "2:initial");
        assert!(q.is_observing());
    }

    #[test]
    fn test_drop_with_live_projection_unregisters() {
        let store = Store::default();
        let q = Query::initial(lookup(1), ContextSelector::value(store.clone()));
        q.on_evaluate();
        let projection = q.projection();
        assert_eq!(dispatch::live_trackers(), 1);

        store.emit(1, "pending");
        drop(q);
        assert_eq!(store.live(), 0);
        assert_eq!(dispatch::live_trackers(), 0);
        assert_eq!(dispatch::drain(), 0);
        // the projection still reads the last state
        assert_eq!(projection.request().get(), lookup(1));
    }

    #[test]
    fn test_error_messages() {
        let err = QueryError::construction_msg("boom");
        assert_eq!(err.to_string(), "failed to build query stream: boom");
        assert_eq!(err.inner().to_string(), "boom");
        let err = QueryError::delivery_msg("gone");
        assert_eq!(err.to_string(), "query stream failed: gone");
    }

    #[test]
    fn test_detached_remember() {
        let a = remember_with_key("k", || 42);
        let b = remember_with_key("k", || 7);
        assert_eq!((*a, *b), (42, 42));
        assert!(forget_detached("k"));
        assert_eq!(*remember_with_key("k", || 7), 7);
    }
}
