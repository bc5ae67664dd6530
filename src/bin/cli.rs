use clap::{App, Arg, ArgMatches, SubCommand};
use bsread_sync::{
    build_synchronizer, is_pulse_id_missing, ChannelSchedule, Concurrency, MessageSynchronizer,
    Policy, Result, SyncConfigBuilder, SyncError,
};
use log::{debug, info};
use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Synthetic message emitted by the simulated channels
#[derive(Debug, Clone)]
struct SimMessage {
    channel: String,
    pulse_id: i64,
    value: f64,
}

fn main() -> Result<()> {
    env_logger::init();

    let channels_arg = Arg::with_name("channels")
        .short("c")
        .long("channels")
        .value_name("NAME[:MODULO[:OFFSET]],...")
        .help("Comma separated channel schedules")
        .default_value("A:1:0,B:2:0,C:5:1")
        .takes_value(true);

    let matches = App::new("bsread-sync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multi-channel pulse synchronizer tool")
        .subcommand(
            SubCommand::with_name("simulate")
                .about("Drive a synchronizer with synthetic channels")
                .arg(channels_arg.clone())
                .arg(
                    Arg::with_name("pulses")
                        .short("n")
                        .long("pulses")
                        .value_name("COUNT")
                        .help("Number of pulses to emit")
                        .default_value("10000")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("policy")
                        .short("p")
                        .long("policy")
                        .value_name("POLICY")
                        .help("Delivery policy: all or latest")
                        .default_value("all")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("locked")
                        .long("locked")
                        .help("Use the lock-based realization (CompleteAll only)"),
                )
                .arg(
                    Arg::with_name("drop_every")
                        .short("d")
                        .long("drop-every")
                        .value_name("K")
                        .help("Each channel skips every K-th of its pulses (0 = never)")
                        .default_value("0")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("max_buffered")
                        .short("b")
                        .long("max-buffered")
                        .value_name("RECORDS")
                        .help("Buffered record bound (0 = unbounded)")
                        .default_value("1000")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("timeout_ms")
                        .short("t")
                        .long("timeout-ms")
                        .value_name("MILLIS")
                        .help("Send timeout in milliseconds (0 = none)")
                        .default_value("100")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("send_incomplete")
                        .long("send-incomplete")
                        .help("Deliver evicted partial pulses"),
                )
                .arg(
                    Arg::with_name("no_first_complete")
                        .long("no-first-complete")
                        .help("Do not skip pulses older than the first complete one"),
                )
                .arg(
                    Arg::with_name("consumers")
                        .short("m")
                        .long("consumers")
                        .value_name("COUNT")
                        .help("Number of consumer threads")
                        .default_value("1")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("gaps")
                .about("Check whether a pulse may be missing between two pulse-ids")
                .arg(channels_arg)
                .arg(
                    Arg::with_name("last")
                        .short("l")
                        .long("last")
                        .value_name("PULSE")
                        .help("Last resolved pulse-id")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("candidate")
                        .short("p")
                        .long("candidate")
                        .value_name("PULSE")
                        .help("Candidate pulse-id")
                        .required(true)
                        .takes_value(true),
                ),
        )
        .subcommand(SubCommand::with_name("info").about("Show version information"))
        .get_matches();

    match matches.subcommand() {
        ("simulate", Some(sim_matches)) => handle_simulate(sim_matches),
        ("gaps", Some(gap_matches)) => handle_gaps(gap_matches),
        ("info", Some(_)) => show_info(),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_arg<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T> {
    let raw = matches
        .value_of(name)
        .ok_or_else(|| SyncError::invalid_parameter(name, "Missing value"))?;
    raw.parse()
        .map_err(|_| SyncError::invalid_parameter(name, format!("Invalid value '{}'", raw)))
}

fn parse_channels(matches: &ArgMatches) -> Result<Vec<ChannelSchedule>> {
    matches
        .value_of("channels")
        .unwrap_or_default()
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(ChannelSchedule::from_str)
        .collect()
}

fn handle_simulate(matches: &ArgMatches) -> Result<()> {
    let channels = parse_channels(matches)?;
    let pulses: i64 = parse_arg(matches, "pulses")?;
    let policy: Policy = parse_arg(matches, "policy")?;
    let drop_every: i64 = parse_arg(matches, "drop_every")?;
    let max_buffered: usize = parse_arg(matches, "max_buffered")?;
    let timeout_ms: u64 = parse_arg(matches, "timeout_ms")?;
    let consumers: usize = parse_arg(matches, "consumers")?;
    let concurrency = if matches.is_present("locked") {
        Concurrency::Locked
    } else {
        Concurrency::LockFree
    };

    let mut builder = SyncConfigBuilder::new()
        .send_incomplete_messages(matches.is_present("send_incomplete"))
        .send_first_complete(!matches.is_present("no_first_complete"));
    builder = match max_buffered {
        0 => builder.unbounded_buffer(),
        bound => builder.max_buffered_records(bound),
    };
    builder = match timeout_ms {
        0 => builder.no_timeout(),
        millis => builder.send_timeout(Duration::from_millis(millis)),
    };
    let config = builder.build()?;
    let grace = config.send_timeout.unwrap_or(Duration::from_millis(500)) * 4;

    println!("Simulating {} pulses over {} channel(s)", pulses, channels.len());
    for channel in &channels {
        println!(
            "  - {} (modulo {}, offset {})",
            channel.name(),
            channel.modulo(),
            channel.offset()
        );
    }
    println!("Policy: {:?} ({:?}), consumers: {}", policy, concurrency, consumers);
    info!("Synchronizer configuration: {:?}", config);

    let sync: Arc<dyn MessageSynchronizer<SimMessage>> = Arc::from(build_synchronizer(
        policy,
        concurrency,
        channels.clone(),
        config,
        |m: &SimMessage| m.channel.as_str(),
        |m: &SimMessage| m.pulse_id,
    )?);

    let started = Arc::new(AtomicBool::new(false));
    {
        let started = started.clone();
        sync.on_first_message(Box::new(move || {
            started.store(true, Ordering::Release);
            info!("First message accepted");
        }));
    }

    let consumed = Arc::new(AtomicU64::new(0));
    let consumer_handles: Vec<_> = (0..consumers.max(1))
        .map(|_| {
            let sync = sync.clone();
            let consumed = consumed.clone();
            thread::spawn(move || {
                let mut incomplete = 0u64;
                let mut checksum = 0.0f64;
                while let Some(pulse) = sync.next_message() {
                    if !pulse.is_complete() {
                        incomplete += 1;
                    }
                    checksum += pulse.values().values().map(|m| m.value).sum::<f64>();
                    consumed.fetch_add(1, Ordering::AcqRel);
                }
                (incomplete, checksum)
            })
        })
        .collect();

    let start = Instant::now();
    let producer_handles: Vec<_> = channels
        .iter()
        .cloned()
        .map(|channel| {
            let sync = sync.clone();
            thread::spawn(move || {
                let mut emitted = 0i64;
                for pulse_id in (0..pulses).filter(|pulse_id| channel.expects(*pulse_id)) {
                    emitted += 1;
                    if drop_every > 0 && emitted % drop_every == 0 {
                        debug!("Channel '{}' skipping pulse {}", channel.name(), pulse_id);
                        continue;
                    }
                    sync.add_message(SimMessage {
                        channel: channel.name().to_string(),
                        pulse_id,
                        value: pulse_id as f64 * 0.5,
                    });
                }
            })
        })
        .collect();

    for handle in producer_handles {
        let _ = handle.join();
    }
    let produced = start.elapsed();

    // Let consumers drain what can still be resolved before closing.
    let drain_start = Instant::now();
    while drain_start.elapsed() < grace {
        let delivered = sync.stats().pulses_delivered;
        if sync.buffer_size() == 0 && consumed.load(Ordering::Acquire) == delivered {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    sync.close();

    let mut incomplete = 0;
    let mut checksum = 0.0;
    for handle in consumer_handles {
        if let Ok((count, sum)) = handle.join() {
            incomplete += count;
            checksum += sum;
        }
    }
    let elapsed = start.elapsed();
    let stats = sync.stats();

    println!("\nResults:");
    println!("  Production time: {:.2}ms", produced.as_secs_f64() * 1000.0);
    println!("  Total time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
    println!("  Messages accepted: {}", stats.messages_accepted);
    println!("  Messages rejected: {} ({} stale)", stats.messages_rejected, stats.stale_messages);
    println!("  Messages overwritten: {}", stats.messages_overwritten);
    println!("  Pulses consumed: {}", consumed.load(Ordering::Acquire));
    println!("  Pulses delivered incomplete: {}", incomplete);
    println!("  Pulses dropped: {}", stats.pulses_dropped);
    println!(
        "  Evictions: {} timeout, {} capacity, {} superseded",
        stats.timeout_evictions, stats.capacity_evictions, stats.superseded_pulses
    );
    println!("  Left in buffer: {}", sync.buffer_size());
    println!("  Value checksum: {:.1}", checksum);
    println!(
        "  Pulses/sec: {:.0}",
        stats.pulses_delivered as f64 / elapsed.as_secs_f64()
    );
    if !started.load(Ordering::Acquire) {
        println!("  No message was accepted");
    }

    Ok(())
}

fn handle_gaps(matches: &ArgMatches) -> Result<()> {
    let channels = parse_channels(matches)?;
    let last: i64 = parse_arg(matches, "last")?;
    let candidate: i64 = parse_arg(matches, "candidate")?;

    let missing = is_pulse_id_missing(last, candidate, &channels);
    println!(
        "Between pulse {} and {}: {}",
        last,
        candidate,
        if missing { "a scheduled pulse may be missing" } else { "no gap" }
    );
    for channel in &channels {
        let own = is_pulse_id_missing(last, candidate, std::slice::from_ref(channel));
        println!(
            "  - {} (modulo {}, offset {}): {}",
            channel.name(),
            channel.modulo(),
            channel.offset(),
            if own { "gap" } else { "ok" }
        );
    }
    Ok(())
}

fn show_info() -> Result<()> {
    println!("bsread-sync {}", bsread_sync::VERSION);
    println!("Policies: CompleteAll (lock-free, locked), CompleteLatest (lock-free)");
    Ok(())
}
