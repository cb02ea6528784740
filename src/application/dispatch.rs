//! Event delivery
//!
//! One dispatcher task per application drains the event queue and calls the
//! current handlers, so handlers of one application never run concurrently.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tracing::{debug, error};

use super::slots::{CallbackSlots, Handler};
use crate::protocol::Protocol;
use crate::supervisor::{Event, EventKind, ExitInfo, Lifecycle, Termination};

pub(crate) async fn run<P: Protocol>(
    mut events: UnboundedReceiver<Event<P::Unit>>,
    requeue: WeakUnboundedSender<Event<P::Unit>>,
    slots: Arc<CallbackSlots<P::Unit>>,
) {
    while let Some(Event { origin, kind }) = events.recv().await {
        match kind {
            EventKind::Stdout(unit) => {
                // A torn-down line reader delivers nothing more
                if origin.reader_open() {
                    invoke(slots.stdout(), unit);
                }
            }
            EventKind::Stderr(chunk) => invoke(slots.stderr(), chunk),
            EventKind::Exit(info) => {
                terminate::<P>(Termination::Exit, origin, info, &requeue, &slots)
            }
            EventKind::Close(info) => {
                terminate::<P>(Termination::Close, origin, info, &requeue, &slots)
            }
            EventKind::Deferred(which, info) => invoke(slots.termination(which), info),
        }
    }

    debug!(protocol = P::NAME, "Event dispatcher exiting");
}

/// Record the termination, then run or schedule its callback
fn terminate<P: Protocol>(
    which: Termination,
    origin: Arc<Lifecycle>,
    info: ExitInfo,
    requeue: &WeakUnboundedSender<Event<P::Unit>>,
    slots: &CallbackSlots<P::Unit>,
) {
    origin.observe_termination();

    if !P::DEFERS_TERMINATION {
        invoke(slots.termination(which), info);
        return;
    }

    origin.close_reader();
    match requeue.upgrade() {
        Some(queue) => {
            let _ = queue.send(Event::new(origin, EventKind::Deferred(which, info)));
        }
        // Application already dropped: nothing can race a restart
        None => invoke(slots.termination(which), info),
    }
}

fn invoke<T>(handler: Option<Handler<T>>, value: T) {
    let Some(handler) = handler else {
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
        error!("Application handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::protocol::{ByteProtocol, LineProtocol};

    /// Queue an exit followed by a stderr chunk and record handler order
    async fn delivery_order<P: Protocol>() -> (Vec<&'static str>, Arc<Lifecycle>) {
        let (tx, events) = mpsc::unbounded_channel();
        let slots = Arc::new(CallbackSlots::<P::Unit>::default());

        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        let exit_tx = seen_tx.clone();
        slots.set_termination(
            Termination::Exit,
            Arc::new(move |_: ExitInfo| drop(exit_tx.send("exit"))),
        );
        slots.set_stderr(Arc::new(move |_: Bytes| drop(seen_tx.send("stderr"))));

        let origin = Arc::new(Lifecycle::new(1));
        let exit = Event::new(origin.clone(), EventKind::Exit(ExitInfo::exited(0)));
        let stderr = Event::new(origin.clone(), EventKind::Stderr(Bytes::from_static(b"late")));
        assert!(tx.send(exit).is_ok());
        assert!(tx.send(stderr).is_ok());

        let dispatcher = tokio::spawn(run::<P>(events, tx.downgrade(), slots));
        let mut order = Vec::new();
        for _ in 0..2 {
            let name = timeout(Duration::from_secs(5), seen.recv())
                .await
                .expect("timed out waiting for handler")
                .expect("handler channel closed");
            order.push(name);
        }

        drop(tx);
        dispatcher.await.unwrap();
        (order, origin)
    }

    #[tokio::test]
    async fn test_line_termination_runs_after_queued_events() {
        let (order, origin) = delivery_order::<LineProtocol>().await;
        assert_eq!(order, vec!["stderr", "exit"]);
        assert!(!origin.is_running());
        assert!(!origin.reader_open());
    }

    #[tokio::test]
    async fn test_byte_termination_runs_inline() {
        let (order, origin) = delivery_order::<ByteProtocol>().await;
        assert_eq!(order, vec!["exit", "stderr"]);
        assert!(!origin.is_running());
        assert!(origin.reader_open());
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_delivery() {
        let (tx, events) = mpsc::unbounded_channel();
        let slots = Arc::new(CallbackSlots::<Bytes>::default());
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        slots.set_stdout(Arc::new(|_: Bytes| panic!("handler failure")));
        slots.set_stderr(Arc::new(move |chunk: Bytes| drop(seen_tx.send(chunk))));

        let origin = Arc::new(Lifecycle::new(1));
        tx.send(Event::new(
            origin.clone(),
            EventKind::Stdout(Bytes::from_static(b"boom")),
        ))
        .unwrap();
        tx.send(Event::new(origin, EventKind::Stderr(Bytes::from_static(b"still here"))))
            .unwrap();

        let dispatcher = tokio::spawn(run::<ByteProtocol>(events, tx.downgrade(), slots));
        let chunk = timeout(Duration::from_secs(5), seen.recv())
            .await
            .expect("timed out waiting for handler")
            .expect("handler channel closed");
        assert_eq!(chunk, Bytes::from_static(b"still here"));

        drop(tx);
        dispatcher.await.unwrap();
    }
}
