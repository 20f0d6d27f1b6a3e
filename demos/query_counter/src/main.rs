use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use repose_query::prelude::*;
use repose_query_store::MemoryStore;

type Counters = MemoryStore<String, i64>;

#[derive(Clone, Debug, PartialEq)]
struct Above {
    threshold: i64,
}

impl Queryable for Above {
    type Context = Counters;
    type Value = Vec<i64>;

    fn default_value() -> Vec<i64> {
        Vec::new()
    }

    fn stream(&self, store: &Counters) -> Result<QueryStream<Vec<i64>>, QueryError> {
        let threshold = self.threshold;
        Ok(store.observe(move |_, v| *v > threshold)?)
    }
}

fn view() -> (String, QueryProjection<Above>) {
    let q = remember_query("above", || {
        Query::initial(Above { threshold: 0 }, ContextSelector::local())
            .with_print(PrintConfig::new("above").sink(PrintSink::Log))
    });
    let threshold = q.projection().field(|r: &Above| r.threshold, |r, v| r.threshold = v);
    let line = match q.projection().error() {
        Some(err) => format!("error: {err}"),
        None => format!("> {}: {:?}", threshold.get(), q.value()),
    };
    (line, q.projection())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let store = Counters::new();
    store.insert("a".into(), 1);
    store.insert("b".into(), 5);

    let dirty = Arc::new(AtomicBool::new(true));
    {
        let dirty = dirty.clone();
        set_wakeup(move || dirty.store(true, Ordering::Release));
    }

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..5 {
                thread::sleep(Duration::from_millis(20));
                store.update(&"a".to_string(), |v| *v += 2);
                store.insert(format!("n{i}"), i * 3);
            }
        })
    };

    let scope = Scope::new();
    let mut projection: Option<QueryProjection<Above>> = None;
    for frame in 0..12 {
        drain();
        if frame == 6
            && let Some(p) = &projection
        {
            // what a slider would do
            p.request().set(Above { threshold: 6 });
            dirty.store(true, Ordering::Release);
        }
        if dirty.swap(false, Ordering::AcqRel) {
            let (line, p) = with_local(store.clone(), || evaluate(&scope, view));
            projection = Some(p);
            println!("frame {frame:>2} {line}");
        }
        thread::sleep(Duration::from_millis(15));
    }

    writer
        .join()
        .map_err(|_| anyhow::anyhow!("writer thread panicked"))?;
    scope.dispose();
    log::info!("done, {} rows", store.len());
    Ok(())
}
