use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tracing::debug;

/// How queued request arguments combine during a burst. Boolean-ish flags
/// should OR together; everything else keeps the latest value.
pub trait MergeArgs: Clone + Send + 'static {
    fn merge(&mut self, newer: Self);
}

impl MergeArgs for () {
    fn merge(&mut self, _newer: Self) {}
}

impl MergeArgs for bool {
    fn merge(&mut self, newer: Self) {
        *self = *self || newer;
    }
}

type Action<A> = Arc<dyn Fn(A) -> BoxFuture<'static, ()> + Send + Sync>;

struct TriggerState<A> {
    running: bool,
    queued: Option<A>,
    /// Bumped whenever a pending timer must die; a sleeping timer task
    /// compares its snapshot against this before firing.
    timer_gen: u64,
}

struct TriggerInner<A> {
    name: String,
    debounce: Duration,
    action: Action<A>,
    state: Mutex<TriggerState<A>>,
}

/// Leading+trailing debounce: the first request in a burst runs
/// immediately; requests arriving while a run is in flight coalesce into
/// one trailing run (with merged args) after a quiet period; nothing fires
/// in between.
pub struct DebouncedTrigger<A: MergeArgs> {
    inner: Arc<TriggerInner<A>>,
}

impl<A: MergeArgs> DebouncedTrigger<A> {
    pub fn new(
        name: impl Into<String>,
        debounce: Duration,
        action: impl Fn(A) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(TriggerInner {
                name: name.into(),
                debounce,
                action: Arc::new(action),
                state: Mutex::new(TriggerState {
                    running: false,
                    queued: None,
                    timer_gen: 0,
                }),
            }),
        }
    }

    /// Request a run. Never blocks; the action executes on a spawned task.
    pub fn request(&self, args: A) {
        let mut st = self.inner.state.lock().unwrap();
        st.timer_gen += 1;
        if st.running {
            match st.queued.as_mut() {
                Some(q) => q.merge(args),
                None => st.queued = Some(args),
            }
            return;
        }
        st.running = true;
        drop(st);
        debug!(trigger = %self.inner.name, "leading edge");
        Self::spawn_run(self.inner.clone(), args);
    }

    fn spawn_run(inner: Arc<TriggerInner<A>>, args: A) {
        tokio::spawn(async move {
            let mut args = args;
            loop {
                (inner.action)(args).await;

                // Completion: either go idle, or arm the trailing timer
                // with whatever queued during the run.
                let (queued, gen) = {
                    let mut st = inner.state.lock().unwrap();
                    st.running = false;
                    let queued = st.queued.take();
                    if queued.is_some() {
                        st.timer_gen += 1;
                    }
                    (queued, st.timer_gen)
                };
                let Some(qargs) = queued else { return };

                tokio::time::sleep(inner.debounce).await;

                {
                    let mut st = inner.state.lock().unwrap();
                    // A newer request restarted the trigger while we slept.
                    if st.timer_gen != gen || st.running {
                        return;
                    }
                    st.running = true;
                }
                debug!(trigger = %inner.name, "trailing edge");
                args = qargs;
            }
        });
    }
}

impl<A: MergeArgs> Clone for DebouncedTrigger<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
