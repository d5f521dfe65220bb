//! End-to-end tests for the TCP upload server.

use irflash::{
    Error, FlashGeometry, IrTransmitter, LoadOptions, PulsePattern, ServerState, UploadConfig,
    UploadProgress, UploadServer, WakeSignaler, encode_flash, load_flash_pages,
};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Shutdown, TcpStream};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Bursts = Arc<Mutex<Vec<(u32, Vec<u32>)>>>;

/// Records every burst instead of emitting it.
#[derive(Clone, Default)]
struct RecordingTransmitter {
    bursts: Bursts,
}

impl IrTransmitter for RecordingTransmitter {
    fn transmit(&mut self, frequency_hz: u32, pattern: &PulsePattern) -> irflash::Result<()> {
        self.bursts
            .lock()
            .unwrap()
            .push((frequency_hz, pattern.as_slice().to_vec()));
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Panics on the first burst.
struct PanickingTransmitter;

impl IrTransmitter for PanickingTransmitter {
    fn transmit(&mut self, _frequency_hz: u32, _pattern: &PulsePattern) -> irflash::Result<()> {
        panic!("transmitter fault");
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

/// Two pages: one byte at 0x0000 and a 16-byte record at 0x0100.
const TWO_PAGE_HEX: &str = "\
:0100000000FF
:10010000000102030405060708090A0B0C0D0E0F77
:00000001FF
";

fn test_config() -> UploadConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    UploadConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        settle_delay: Duration::from_millis(10),
        page_delay: Duration::from_millis(5),
        ..UploadConfig::default()
    }
}

fn push_hex(port: u16, hex: &str) {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
    stream.write_all(hex.as_bytes()).unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
}

#[test]
fn upload_transmits_wake_then_every_page() {
    let tx = RecordingTransmitter::default();
    let bursts = Arc::clone(&tx.bursts);

    let mut handle = UploadServer::new(test_config(), tx).start().unwrap();
    let port = handle.local_addr().port();
    assert!(handle.state().is_listening());

    push_hex(port, TWO_PAGE_HEX);

    let status = handle
        .status()
        .wait_for(Duration::from_secs(10), |s| s.completed_uploads == 1)
        .expect("upload should complete");
    assert!(status.last_error.is_none());
    assert!(status.state.is_listening());

    let bursts = bursts.lock().unwrap().clone();
    assert_eq!(bursts.len(), 3, "wake burst plus one burst per page");
    assert!(bursts.iter().all(|(freq, pattern)| *freq == 38_000 && !pattern.is_empty()));

    let wake = WakeSignaler::default().encode("BOOT").unwrap();
    assert_eq!(bursts[0].1, wake.as_slice());

    let flash = load_flash_pages(
        TWO_PAGE_HEX.as_bytes(),
        FlashGeometry::default(),
        LoadOptions::default(),
    )
    .unwrap();
    let frames = encode_flash(&flash, 64).unwrap();
    assert_eq!(frames.len(), 2);
    for (frame, (_, pattern)) in frames.iter().zip(&bursts[1..]) {
        assert_eq!(frame.frame.to_pulses(490).as_slice(), pattern.as_slice());
    }

    handle.stop();
    assert_eq!(handle.state(), ServerState::Stopped);
}

#[test]
fn progress_events_arrive_in_order() {
    let (events_tx, events_rx) = mpsc::channel();
    let handle = UploadServer::new(test_config(), RecordingTransmitter::default())
        .on_progress(move |event| {
            let _ = events_tx.send(event.clone());
        })
        .start()
        .unwrap();

    push_hex(handle.local_addr().port(), TWO_PAGE_HEX);

    let mut events = Vec::new();
    while let Ok(event) = events_rx.recv_timeout(Duration::from_secs(10)) {
        let done = matches!(event, UploadProgress::Finished { .. });
        events.push(event);
        if done {
            break;
        }
    }

    assert!(matches!(events[0], UploadProgress::Connected { .. }));
    assert_eq!(
        events[1..],
        [
            UploadProgress::Woke,
            UploadProgress::Loaded { pages: 2 },
            UploadProgress::PageSent {
                sent: 1,
                total: 2,
                address: 0x0000
            },
            UploadProgress::PageSent {
                sent: 2,
                total: 2,
                address: 0x0100
            },
            UploadProgress::Finished { pages: 2 },
        ]
    );
}

#[test]
fn stop_unblocks_idle_listener_promptly() {
    let mut handle = UploadServer::new(test_config(), RecordingTransmitter::default())
        .start()
        .unwrap();
    let status = handle.status();
    assert!(status.state().is_listening());

    let start = Instant::now();
    handle.stop();

    assert_eq!(status.state(), ServerState::Stopped);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn stop_interrupts_settle_delay() {
    let tx = RecordingTransmitter::default();
    let bursts = Arc::clone(&tx.bursts);
    let (events_tx, events_rx) = mpsc::channel();

    let config = UploadConfig {
        settle_delay: Duration::from_secs(60),
        ..test_config()
    };
    let mut handle = UploadServer::new(config, tx)
        .on_progress(move |event| {
            let _ = events_tx.send(event.clone());
        })
        .start()
        .unwrap();

    push_hex(handle.local_addr().port(), TWO_PAGE_HEX);

    loop {
        let event = events_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("wake event");
        if event == UploadProgress::Woke {
            break;
        }
    }

    let start = Instant::now();
    handle.stop();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(handle.state(), ServerState::Stopped);

    // Only the wake burst went out
    assert_eq!(bursts.lock().unwrap().len(), 1);
}

#[test]
fn stop_releases_stalled_client() {
    let config = UploadConfig {
        settle_delay: Duration::ZERO,
        ..test_config()
    };
    let (events_tx, events_rx) = mpsc::channel();
    let mut handle = UploadServer::new(config, RecordingTransmitter::default())
        .on_progress(move |event| {
            let _ = events_tx.send(event.clone());
        })
        .start()
        .unwrap();

    // Connect but never finish the stream
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, handle.local_addr().port())).unwrap();
    stream.write_all(b":0100000000FF\n").unwrap();

    loop {
        let event = events_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("wake event");
        if event == UploadProgress::Woke {
            break;
        }
    }

    let start = Instant::now();
    handle.stop();
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn failed_upload_keeps_listener_running() {
    let tx = RecordingTransmitter::default();
    let bursts = Arc::clone(&tx.bursts);
    let handle = UploadServer::new(test_config(), tx).start().unwrap();
    let port = handle.local_addr().port();
    let status = handle.status();

    // Address 0x8000 is past the end of a 32 KiB part
    push_hex(port, ":01800000007F\n");
    let after_failure = status
        .wait_for(Duration::from_secs(10), |s| s.last_error.is_some())
        .expect("failure should be recorded");
    assert!(after_failure.state.is_listening());
    assert_eq!(after_failure.completed_uploads, 0);
    assert!(
        after_failure
            .last_error
            .unwrap()
            .contains("Malformed image")
    );

    push_hex(port, TWO_PAGE_HEX);
    let after_success = status
        .wait_for(Duration::from_secs(10), |s| s.completed_uploads == 1)
        .expect("second upload should complete");
    assert!(after_success.state.is_listening());

    // wake for the failed upload, then wake + 2 pages
    assert_eq!(bursts.lock().unwrap().len(), 4);
}

#[test]
fn empty_image_only_wakes_target() {
    let tx = RecordingTransmitter::default();
    let bursts = Arc::clone(&tx.bursts);
    let handle = UploadServer::new(test_config(), tx).start().unwrap();

    push_hex(handle.local_addr().port(), ":04000000FFFFFFFF00\n:00000001FF\n");

    handle
        .status()
        .wait_for(Duration::from_secs(10), |s| s.completed_uploads == 1)
        .expect("upload should complete");
    assert_eq!(bursts.lock().unwrap().len(), 1);
}

#[test]
fn bind_conflict_is_listener_failure() {
    let first = UploadServer::new(test_config(), RecordingTransmitter::default())
        .start()
        .unwrap();

    let config = UploadConfig {
        port: first.local_addr().port(),
        ..test_config()
    };
    let err = UploadServer::new(config, RecordingTransmitter::default())
        .start()
        .err()
        .expect("second bind should fail");
    assert!(matches!(err, Error::ListenerFailure(_)));
}

#[test]
fn client_timeout_aborts_only_stalled_upload() {
    let config = UploadConfig {
        settle_delay: Duration::ZERO,
        client_timeout: Some(Duration::from_millis(50)),
        ..test_config()
    };
    let (events_tx, events_rx) = mpsc::channel();
    let handle = UploadServer::new(config, RecordingTransmitter::default())
        .on_progress(move |event| {
            let _ = events_tx.send(event.clone());
        })
        .start()
        .unwrap();
    let port = handle.local_addr().port();
    let status = handle.status();

    // Send part of an image and keep the connection open
    let mut stalled = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
    stalled.write_all(b":0100000000FF\n").unwrap();

    let reason = loop {
        let event = events_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("stalled upload should fail");
        if let UploadProgress::Failed { reason } = event {
            break reason;
        }
    };
    assert!(reason.contains("I/O"), "unexpected reason: {reason}");

    let after_timeout = status.snapshot();
    assert!(after_timeout.state.is_listening());
    assert!(after_timeout.last_error.unwrap().contains("I/O"));
    drop(stalled);

    push_hex(port, TWO_PAGE_HEX);
    let after_success = status
        .wait_for(Duration::from_secs(10), |s| s.completed_uploads == 1)
        .expect("next upload should complete");
    assert!(after_success.state.is_listening());
}

#[test]
fn worker_panic_publishes_stopped() {
    let config = UploadConfig {
        settle_delay: Duration::ZERO,
        ..test_config()
    };
    let handle = UploadServer::new(config, PanickingTransmitter).start().unwrap();
    let port = handle.local_addr().port();
    let status = handle.status();

    // The server may drop the connection mid-write
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
    let _ = stream.write_all(TWO_PAGE_HEX.as_bytes());
    let _ = stream.shutdown(Shutdown::Write);

    let stopped = status
        .wait_for(Duration::from_secs(10), |s| s.state == ServerState::Stopped)
        .expect("server should report Stopped after its thread dies");
    assert!(stopped.last_error.unwrap().contains("panicked"));

    // The listener went away with the thread
    let start = Instant::now();
    while TcpStream::connect((Ipv4Addr::LOCALHOST, port)).is_ok() {
        assert!(start.elapsed() < Duration::from_secs(5), "listener still open");
        std::thread::sleep(Duration::from_millis(20));
    }
    handle.wait();
}
