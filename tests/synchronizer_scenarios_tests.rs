//! Behavioral scenarios for every synchronizer variant
//! Tests focused on delivery order, eviction, bootstrap and shutdown semantics

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::{Duration, Instant},
};

use bsread_sync::{
    build_synchronizer, ChannelSchedule, Concurrency, MessageSynchronizer, Policy, SyncConfig,
};

#[derive(Debug, Clone, PartialEq)]
struct Message {
    channel: &'static str,
    pulse_id: i64,
    value: u64,
}

fn msg(channel: &'static str, pulse_id: i64) -> Message {
    Message {
        channel,
        pulse_id,
        value: pulse_id as u64,
    }
}

fn build(
    policy: Policy,
    concurrency: Concurrency,
    channels: Vec<ChannelSchedule>,
    config: SyncConfig,
) -> Box<dyn MessageSynchronizer<Message>> {
    build_synchronizer(
        policy,
        concurrency,
        channels,
        config,
        |m: &Message| m.channel,
        |m: &Message| m.pulse_id,
    )
    .unwrap()
}

fn channels_ab() -> Vec<ChannelSchedule> {
    vec![
        ChannelSchedule::every_pulse("A"),
        ChannelSchedule::every_pulse("B"),
    ]
}

// Scenarios A to C run with the startup skip enabled, which is the crate
// default. With it disabled the strict policy waits for pulse 1 to be
// evicted first; `strict_start_waits_for_oldest_pulse` covers that case.
fn scenario_config(send_incomplete: bool) -> SyncConfig {
    SyncConfig::unbounded()
        .with_max_buffered_records(Some(3))
        .with_send_incomplete_messages(send_incomplete)
        .with_send_first_complete(true)
}

const COMPLETE_ALL: [Concurrency; 2] = [Concurrency::LockFree, Concurrency::Locked];

const ALL_VARIANTS: [(Policy, Concurrency); 3] = [
    (Policy::CompleteAll, Concurrency::LockFree),
    (Policy::CompleteAll, Concurrency::Locked),
    (Policy::CompleteLatest, Concurrency::LockFree),
];

#[cfg(test)]
mod synchronizer_scenarios_tests {
    use super::*;

    fn feed_scenario_a(sync: &dyn MessageSynchronizer<Message>) {
        sync.add_message(msg("A", 1));
        sync.add_message(msg("A", 2));
        sync.add_message(msg("B", 2));
    }

    fn feed_scenario_b(sync: &dyn MessageSynchronizer<Message>) {
        for pulse_id in 3..=6 {
            sync.add_message(msg("A", pulse_id));
        }
        sync.add_message(msg("B", 4));
    }

    /// Test: First complete pulse supersedes an older partial one on startup
    #[test]
    fn scenario_a_first_complete_pulse_is_delivered() {
        for concurrency in COMPLETE_ALL {
            let sync = build(Policy::CompleteAll, concurrency, channels_ab(), scenario_config(false));
            feed_scenario_a(sync.as_ref());

            let pulse = sync.next_message().unwrap();
            assert_eq!(pulse.pulse_id(), 2, "{:?}", concurrency);
            assert_eq!(pulse.len(), 2);
            assert_eq!(pulse.get("A"), Some(&msg("A", 2)));
            assert_eq!(pulse.get("B"), Some(&msg("B", 2)));
            assert!(sync.try_next_message().is_none());
            assert_eq!(sync.stats().pulses_dropped, 1);
        }
    }

    /// Test: Capacity eviction drops an incomplete pulse
    #[test]
    fn scenario_b_capacity_eviction_drops_incomplete() {
        for concurrency in COMPLETE_ALL {
            let sync = build(Policy::CompleteAll, concurrency, channels_ab(), scenario_config(false));
            feed_scenario_a(sync.as_ref());
            assert_eq!(sync.next_message().unwrap().pulse_id(), 2);

            feed_scenario_b(sync.as_ref());

            let pulse = sync.next_message().unwrap();
            assert_eq!(pulse.pulse_id(), 4, "{:?}", concurrency);
            assert_eq!(pulse.len(), 2);
            assert!(sync.try_next_message().is_none());

            let stats = sync.stats();
            assert_eq!(stats.capacity_evictions, 1);
            assert_eq!(stats.pulses_delivered, 2);
            assert_eq!(stats.pulses_delivered_incomplete, 0);
        }
    }

    /// Test: Capacity eviction delivers partial records when enabled
    #[test]
    fn scenario_c_capacity_eviction_sends_incomplete() {
        for concurrency in COMPLETE_ALL {
            let sync = build(Policy::CompleteAll, concurrency, channels_ab(), scenario_config(true));
            feed_scenario_a(sync.as_ref());
            assert_eq!(sync.next_message().unwrap().pulse_id(), 2);

            feed_scenario_b(sync.as_ref());

            let partial = sync.next_message().unwrap();
            assert_eq!(partial.pulse_id(), 3, "{:?}", concurrency);
            assert!(!partial.is_complete());
            assert_eq!(partial.len(), 1);
            assert_eq!(partial.get("A"), Some(&msg("A", 3)));

            let complete = sync.next_message().unwrap();
            assert_eq!(complete.pulse_id(), 4);
            assert!(complete.is_complete());
            assert_eq!(sync.stats().pulses_delivered_incomplete, 1);
        }
    }

    /// Test: CompleteLatest delivers the newest complete pulse and ignores late data
    #[test]
    fn scenario_d_complete_latest_ignores_stale_pulse() {
        let sync = build(
            Policy::CompleteLatest,
            Concurrency::LockFree,
            channels_ab(),
            scenario_config(false),
        );
        feed_scenario_a(sync.as_ref());

        let pulse = sync.next_message().unwrap();
        assert_eq!(pulse.pulse_id(), 2);
        assert!(pulse.is_complete());

        sync.add_message(msg("B", 1));
        assert!(sync.try_next_message().is_none());
        assert_eq!(sync.buffer_size(), 0);

        let stats = sync.stats();
        assert_eq!(stats.stale_messages, 1);
        assert_eq!(stats.superseded_pulses, 1);
        assert_eq!(stats.pulses_delivered, 1);
    }

    /// Test: Without the startup rule the strict policy waits for the older pulse
    #[test]
    fn strict_start_waits_for_oldest_pulse() {
        for concurrency in COMPLETE_ALL {
            let config = scenario_config(false)
                .with_send_first_complete(false)
                .with_send_timeout(Some(Duration::from_millis(50)));
            let sync = build(Policy::CompleteAll, concurrency, channels_ab(), config);
            feed_scenario_a(sync.as_ref());

            assert!(sync.try_next_message().is_none(), "{:?}", concurrency);

            let start = Instant::now();
            let pulse = sync.next_message().unwrap();
            assert_eq!(pulse.pulse_id(), 2);
            assert!(pulse.is_complete());
            assert!(start.elapsed() >= Duration::from_millis(20));

            let stats = sync.stats();
            assert_eq!(stats.pulses_dropped, 1);
            assert!(stats.timeout_evictions >= 1);
        }
    }

    /// Test: Delivered records hold exactly the expected channels
    #[test]
    fn delivered_pulses_are_complete() {
        let channels = vec![
            ChannelSchedule::every_pulse("A"),
            ChannelSchedule::new("B", 2, 0).unwrap(),
            ChannelSchedule::new("C", 3, 1).unwrap(),
        ];

        for (policy, concurrency) in ALL_VARIANTS {
            let sync = build(policy, concurrency, channels.clone(), SyncConfig::default());
            for pulse_id in 1..=30 {
                for channel in &channels {
                    if channel.expects(pulse_id) {
                        let name = match channel.name() {
                            "A" => "A",
                            "B" => "B",
                            _ => "C",
                        };
                        sync.add_message(msg(name, pulse_id));
                    }
                }
            }

            let mut delivered = Vec::new();
            while let Some(pulse) = sync.try_next_message() {
                let expected = channels.iter().filter(|c| c.expects(pulse.pulse_id())).count();
                assert_eq!(pulse.len(), expected, "{:?}/{:?}", policy, concurrency);
                assert!(pulse.is_complete());
                delivered.push(pulse.pulse_id());
            }
            assert_eq!(delivered, (1..=30).collect::<Vec<_>>());
        }
    }

    /// Test: Gap detection holds a complete pulse back until the gap is resolved
    #[test]
    fn complete_all_waits_for_scheduled_gap() {
        let channels = vec![
            ChannelSchedule::every_pulse("A"),
            ChannelSchedule::new("B", 2, 0).unwrap(),
        ];

        for concurrency in COMPLETE_ALL {
            let sync = build(
                Policy::CompleteAll,
                concurrency,
                channels.clone(),
                SyncConfig::unbounded(),
            );
            sync.add_message(msg("A", 2));
            sync.add_message(msg("B", 2));
            assert_eq!(sync.next_message().unwrap().pulse_id(), 2);

            sync.add_message(msg("A", 4));
            sync.add_message(msg("B", 4));
            assert!(sync.try_next_message().is_none(), "{:?}", concurrency);

            sync.add_message(msg("A", 3));
            assert_eq!(sync.next_message().unwrap().pulse_id(), 3);
            assert_eq!(sync.next_message().unwrap().pulse_id(), 4);
        }
    }

    /// Test: A repeated channel value for the same pulse replaces the first one
    #[test]
    fn duplicate_channel_message_last_write_wins() {
        for (policy, concurrency) in ALL_VARIANTS {
            let sync = build(policy, concurrency, channels_ab(), SyncConfig::default());
            sync.add_message(Message {
                channel: "A",
                pulse_id: 1,
                value: 10,
            });
            sync.add_message(Message {
                channel: "A",
                pulse_id: 1,
                value: 20,
            });
            sync.add_message(msg("B", 1));

            let pulse = sync.next_message().unwrap();
            assert_eq!(pulse.get("A").map(|m| m.value), Some(20));
            assert_eq!(pulse.len(), 2);
            assert_eq!(sync.stats().messages_overwritten, 1);
        }
    }

    /// Test: Unknown channels and off-schedule pulses are dropped
    #[test]
    fn rejected_messages_are_counted() {
        let channels = vec![ChannelSchedule::new("A", 2, 0).unwrap()];
        for (policy, concurrency) in ALL_VARIANTS {
            let sync = build(policy, concurrency, channels.clone(), SyncConfig::default());
            sync.add_message(msg("X", 2));
            sync.add_message(msg("A", 3));
            assert_eq!(sync.buffer_size(), 0);

            sync.add_message(msg("A", 4));
            assert_eq!(sync.next_message().unwrap().pulse_id(), 4);

            let stats = sync.stats();
            assert_eq!(stats.messages_rejected, 2);
            assert_eq!(stats.messages_accepted, 1);
        }
    }

    /// Test: Close releases every blocked consumer and is idempotent
    #[test]
    fn close_releases_blocked_consumers() {
        for (policy, concurrency) in ALL_VARIANTS {
            let sync: Arc<dyn MessageSynchronizer<Message>> =
                Arc::from(build(policy, concurrency, channels_ab(), SyncConfig::unbounded()));
            let consumers = 4;
            let barrier = Arc::new(Barrier::new(consumers + 1));

            let handles: Vec<_> = (0..consumers)
                .map(|_| {
                    let sync = sync.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        sync.next_message()
                    })
                })
                .collect();

            barrier.wait();
            thread::sleep(Duration::from_millis(20));
            sync.close();
            sync.close();

            for handle in handles {
                assert!(handle.join().unwrap().is_none(), "{:?}/{:?}", policy, concurrency);
            }
            assert!(sync.is_closed());
            assert!(sync.next_message().is_none());

            sync.add_message(msg("A", 1));
            assert_eq!(sync.buffer_size(), 0);
            assert_eq!(sync.stats().messages_rejected, 1);
        }
    }

    /// Test: The first-message hook runs exactly once, on an accepted message
    #[test]
    fn first_message_hook_runs_once() {
        for (policy, concurrency) in ALL_VARIANTS {
            let sync = build(policy, concurrency, channels_ab(), SyncConfig::default());
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = calls.clone();
            sync.on_first_message(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

            sync.add_message(msg("X", 1));
            assert_eq!(calls.load(Ordering::SeqCst), 0);

            sync.add_message(msg("A", 1));
            sync.add_message(msg("B", 1));
            sync.add_message(msg("A", 2));
            assert_eq!(calls.load(Ordering::SeqCst), 1, "{:?}/{:?}", policy, concurrency);
        }
    }

    /// Test: A panicking first-message hook does not reach the producer
    #[test]
    fn first_message_hook_panic_is_contained() {
        let sync = build(
            Policy::CompleteAll,
            Concurrency::LockFree,
            channels_ab(),
            SyncConfig::default(),
        );
        sync.on_first_message(Box::new(|| panic!("hook failure")));

        sync.add_message(msg("A", 1));
        sync.add_message(msg("B", 1));
        assert_eq!(sync.next_message().unwrap().pulse_id(), 1);
    }

    /// Test: A parked consumer wakes up on its own to evict a timed-out pulse
    #[test]
    fn timeout_eviction_without_further_input() {
        for (policy, concurrency) in ALL_VARIANTS {
            let config = SyncConfig::unbounded()
                .with_send_timeout(Some(Duration::from_millis(50)))
                .with_send_incomplete_messages(true);
            let sync = build(policy, concurrency, channels_ab(), config);

            sync.add_message(msg("A", 1));

            let start = Instant::now();
            let pulse = sync.next_message().unwrap();
            assert_eq!(pulse.pulse_id(), 1, "{:?}/{:?}", policy, concurrency);
            assert!(!pulse.is_complete());
            assert!(start.elapsed() < Duration::from_secs(5));
            assert_eq!(sync.stats().timeout_evictions, 1);
        }
    }

    /// Test: Timed-out incomplete pulses are dropped when partial sends are disabled
    #[test]
    fn timeout_eviction_drops_incomplete() {
        for (policy, concurrency) in ALL_VARIANTS {
            let config = SyncConfig::unbounded().with_send_timeout(Some(Duration::from_millis(30)));
            let sync = build(policy, concurrency, channels_ab(), config);

            sync.add_message(msg("A", 1));
            thread::sleep(Duration::from_millis(60));
            assert!(sync.try_next_message().is_none());
            assert_eq!(sync.buffer_size(), 0, "{:?}/{:?}", policy, concurrency);

            sync.add_message(msg("B", 1));
            sync.add_message(msg("A", 2));
            sync.add_message(msg("B", 2));
            assert_eq!(sync.next_message().unwrap().pulse_id(), 2);
            assert_eq!(sync.stats().stale_messages, 1);
        }
    }

    /// Test: Buffer bound holds behind an unconsumed complete pulse
    #[test]
    fn buffer_bound_holds_without_consumer() {
        for (policy, concurrency) in ALL_VARIANTS {
            let config = SyncConfig::unbounded()
                .with_max_buffered_records(Some(3))
                .with_delivery_queue_capacity(1);
            let sync = build(policy, concurrency, channels_ab(), config);

            sync.add_message(msg("A", 1));
            sync.add_message(msg("B", 1));
            for pulse_id in 2..=100 {
                sync.add_message(msg("A", pulse_id));
                assert!(sync.buffer_size() <= 3, "{:?}/{:?} at {}", policy, concurrency, pulse_id);
            }

            let first = sync.next_message().unwrap();
            assert_eq!(first.pulse_id(), 1, "{:?}/{:?}", policy, concurrency);
            assert!(first.is_complete());

            for pulse_id in 98..=100 {
                sync.add_message(msg("B", pulse_id));
            }
            let mut delivered = Vec::new();
            while let Some(pulse) = sync.try_next_message() {
                assert!(pulse.is_complete());
                delivered.push(pulse.pulse_id());
            }
            assert!(delivered.ends_with(&[99, 100]), "{:?}/{:?}: {:?}", policy, concurrency, delivered);
            assert_eq!(sync.buffer_size(), 0);

            let stats = sync.stats();
            assert!(stats.capacity_evictions >= 96);
            assert_eq!(stats.pulses_delivered_incomplete, 0);
        }
    }

    /// Test: Channel registry is exposed read-only
    #[test]
    fn channels_are_exposed() {
        let sync = build(
            Policy::CompleteAll,
            Concurrency::Locked,
            channels_ab(),
            SyncConfig::default(),
        );
        let names: Vec<_> = sync.channels().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
