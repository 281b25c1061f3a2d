//! Mailbox delivery order and single-drainer behavior, observed through a
//! live fiber.

#[macro_use]
mod common;

use common::*;
use fiberline::{FiberMessage, FiberStatus, Mailbox};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const PRODUCERS: usize = 4;
const PER_PRODUCER: usize = 250;

#[test]
fn messages_from_one_sender_are_processed_in_send_order() {
    let runtime = test_runtime();
    test_phase!("messages_from_one_sender_are_processed_in_send_order");

    let gate = Gate::new();
    let wait = gate.clone();
    let fiber = runtime.fork(move |_cx| async move {
        wait.wait().await;
        Ok::<_, ()>(())
    });

    let log = Arc::new(Mutex::new(Vec::new()));
    for seq in 0..100_usize {
        let log = Arc::clone(&log);
        fiber
            .handle()
            .tell(FiberMessage::stateful(move |_fiber, _status| log.lock().push(seq)));
    }
    assert!(wait_until(Duration::from_secs(5), || log.lock().len() == 100));
    let observed = log.lock().clone();
    assert_with_log!(
        observed == (0..100).collect::<Vec<_>>(),
        "send order",
        "0..100",
        observed
    );

    gate.open();
    assert_exit_success!(fiber.await_exit(), ());
    test_complete!("messages_from_one_sender_are_processed_in_send_order");
}

#[test]
fn concurrent_senders_keep_per_sender_order() {
    let runtime = test_runtime();
    test_phase!("concurrent_senders_keep_per_sender_order");

    let gate = Gate::new();
    let wait = gate.clone();
    let fiber = runtime.fork(move |_cx| async move {
        wait.wait().await;
        Ok::<_, ()>(())
    });

    let log = Arc::new(Mutex::new(Vec::new()));
    let in_callback = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(PRODUCERS));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let handle = fiber.handle().clone();
            let log = Arc::clone(&log);
            let in_callback = Arc::clone(&in_callback);
            let overlaps = Arc::clone(&overlaps);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for seq in 0..PER_PRODUCER {
                    let log = Arc::clone(&log);
                    let in_callback = Arc::clone(&in_callback);
                    let overlaps = Arc::clone(&overlaps);
                    handle.tell(FiberMessage::stateful(move |_fiber, _status| {
                        if in_callback.swap(true, Ordering::SeqCst) {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        log.lock().push((producer, seq));
                        in_callback.store(false, Ordering::SeqCst);
                    }));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer panicked");
    }

    let total = PRODUCERS * PER_PRODUCER;
    assert!(wait_until(Duration::from_secs(10), || log.lock().len() == total));

    test_section!("verify");
    let observed = log.lock().clone();
    for producer in 0..PRODUCERS {
        let seqs: Vec<usize> = observed
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(seqs, (0..PER_PRODUCER).collect::<Vec<_>>(), "producer {producer}");
    }
    let overlaps = overlaps.load(Ordering::SeqCst);
    assert_with_log!(overlaps == 0, "callbacks never overlap", 0, overlaps);

    gate.open();
    assert_exit_success!(fiber.await_exit(), ());
    test_complete!("concurrent_senders_keep_per_sender_order", messages = total);
}

#[test]
fn stateful_messages_observe_interrupt_sent_between_them() {
    let runtime = test_runtime();
    test_phase!("stateful_messages_observe_interrupt_sent_between_them");

    let fiber = runtime.fork(|_cx| async move {
        Gate::new().wait().await;
        Ok::<_, ()>(())
    });

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let record = |statuses: &Arc<Mutex<Vec<FiberStatus>>>| {
        let statuses = Arc::clone(statuses);
        FiberMessage::stateful(move |_fiber, status| statuses.lock().push(status))
    };

    let handle = fiber.handle().clone();
    handle.tell(record(&statuses));
    handle.interrupt();
    handle.tell(record(&statuses));

    assert!(wait_until(Duration::from_secs(5), || statuses.lock().len() == 2));
    let statuses = statuses.lock().clone();
    assert!(
        matches!(statuses[0], FiberStatus::Suspended { .. }),
        "{statuses:?}"
    );
    assert_eq!(statuses[1], FiberStatus::Done);
    assert_exit_interrupted!(fiber.await_exit());
    test_complete!("stateful_messages_observe_interrupt_sent_between_them");
}

#[test]
fn yield_now_is_ignored_without_cooperative_yielding() {
    init_test_logging();
    test_phase!("yield_now_is_ignored_without_cooperative_yielding");
    let runtime = test_builder()
        .disable_flag(fiberline::RuntimeFlag::COOPERATIVE_YIELDING)
        .build()
        .unwrap();

    let value = runtime.run_sync(|cx| async move {
        let before = std::thread::current().id();
        for _ in 0..10 {
            cx.yield_now().await;
        }
        Ok::<_, ()>(before == std::thread::current().id())
    });
    // Without the flag the drain never hands the fiber to the pool, so it
    // stays on the calling thread.
    assert_eq!(value, Ok(true));
    test_complete!("yield_now_is_ignored_without_cooperative_yielding");
}

#[test]
fn raw_mailbox_claim_is_exclusive() {
    init_test_logging();
    let mailbox = Mailbox::new();
    mailbox.push(FiberMessage::YieldNow);
    assert!(mailbox.try_claim());
    assert!(!mailbox.try_claim());
    assert_eq!(mailbox.len(), 1);
    mailbox.release();
    assert!(mailbox.try_claim());
    mailbox.release();
}
