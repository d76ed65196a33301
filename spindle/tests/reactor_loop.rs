// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! End-to-end scenarios driving a reactor across threads: waiter pools
//! announcing timers, and the synchronization bridge completing tasks on
//! foreign threads.

use spindle::{Reactor, ReactorConfig, Task, TimerEvent, TimerEventType,
              TimerOptions, WaiterOptions, synchronize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Completes when a reactor timer flips the shared flag.
struct TimerBacked {
    state: Arc<Mutex<(bool, Option<Waker>)>>,
}

impl Future for TimerBacked {
    type Output = &'static str;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock().unwrap();
        if state.0 {
            Poll::Ready("timer completed the task")
        } else {
            state.1 = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[test]
fn test_synchronize_task_completed_by_reactor_thread() {
    let reactor = Reactor::new(ReactorConfig {
        max_threads: Some(1),
        ..ReactorConfig::default()
    })
    .unwrap();

    // Thread A drives the reactor loop.
    let reactor_for_loop = reactor.clone();
    let looper = std::thread::spawn(move || {
        let waiter =
            reactor_for_loop.register_waiter(WaiterOptions::default());
        reactor_for_loop.run(&waiter);
        reactor_for_loop.deregister_waiter(waiter);
    });

    // The task awaits a timer scheduled on the reactor.
    let state = Arc::new(Mutex::new((false, None::<Waker>)));
    let state_for_timer = state.clone();
    let mut options = TimerOptions::new().with_one_shot(true);
    options.show_event(TimerEventType::Deadline);
    let timer = reactor.create_timer(
        options,
        Arc::new(move |_event: &TimerEvent| {
            let waker = {
                let mut state = state_for_timer.lock().unwrap();
                state.0 = true;
                state.1.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        }),
    );
    timer
        .schedule(
            reactor.current_time() + Duration::from_millis(50),
            None,
        )
        .unwrap();

    // Thread B (this one) blocks until thread A fires the timer.
    let task = Task::spawn(async move { TimerBacked { state }.await });
    assert_eq!(synchronize(task), "timer completed the task");

    reactor.stop();
    looper.join().unwrap();
}

#[test]
fn test_run_blocks_until_stop_without_work() {
    let reactor = Reactor::new(ReactorConfig {
        max_threads: Some(1),
        ..ReactorConfig::default()
    })
    .unwrap();

    let reactor_for_loop = reactor.clone();
    let started = Instant::now();
    let looper = std::thread::spawn(move || {
        let waiter =
            reactor_for_loop.register_waiter(WaiterOptions::default());
        reactor_for_loop.run(&waiter);
        reactor_for_loop.deregister_waiter(waiter);
    });

    std::thread::sleep(Duration::from_millis(100));
    reactor.stop();
    looper.join().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[test]
fn test_multi_threaded_timer_throughput() {
    const NUM_PRODUCERS: usize = 4;
    const TIMERS_PER_PRODUCER: usize = 50;
    const NUM_WAITERS: usize = 3;

    let reactor = Reactor::new(ReactorConfig {
        max_threads: Some(NUM_WAITERS),
        ..ReactorConfig::default()
    })
    .unwrap();

    let announced = Arc::new(AtomicUsize::new(0));

    // Consumer waiters drive the reactor in parallel.
    let mut waiters = Vec::new();
    for _ in 0..NUM_WAITERS {
        let reactor_for_loop = reactor.clone();
        waiters.push(std::thread::spawn(move || {
            let waiter =
                reactor_for_loop.register_waiter(WaiterOptions::default());
            reactor_for_loop.run(&waiter);
            reactor_for_loop.deregister_waiter(waiter);
        }));
    }

    // Producers schedule one-shot timers from foreign threads.
    let mut producers = Vec::new();
    for producer in 0..NUM_PRODUCERS {
        let reactor_for_producer = reactor.clone();
        let announced_for_producer = announced.clone();
        producers.push(std::thread::spawn(move || {
            let mut timers = Vec::new();
            for index in 0..TIMERS_PER_PRODUCER {
                let announced = announced_for_producer.clone();
                let mut options = TimerOptions::new()
                    .with_id((producer * TIMERS_PER_PRODUCER + index) as i64)
                    .with_one_shot(true);
                options.show_event(TimerEventType::Deadline);
                let timer = reactor_for_producer.create_timer(
                    options,
                    Arc::new(move |_event: &TimerEvent| {
                        announced.fetch_add(1, Ordering::SeqCst);
                    }),
                );
                timer
                    .schedule(
                        reactor_for_producer.current_time()
                            + Duration::from_millis((index % 20) as u64),
                        None,
                    )
                    .unwrap();
                timers.push(timer);
            }
            timers
        }));
    }

    let _timers: Vec<_> = producers
        .into_iter()
        .map(|producer| producer.join().unwrap())
        .collect();

    // Every scheduled deadline is announced exactly once.
    let deadline = Instant::now() + Duration::from_secs(10);
    while announced.load(Ordering::SeqCst)
        < NUM_PRODUCERS * TIMERS_PER_PRODUCER
    {
        assert!(
            Instant::now() < deadline,
            "only {} of {} deadlines announced",
            announced.load(Ordering::SeqCst),
            NUM_PRODUCERS * TIMERS_PER_PRODUCER
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    // Settle briefly: no timer may fire twice.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        announced.load(Ordering::SeqCst),
        NUM_PRODUCERS * TIMERS_PER_PRODUCER
    );

    reactor.stop();
    for waiter in waiters {
        waiter.join().unwrap();
    }
}
