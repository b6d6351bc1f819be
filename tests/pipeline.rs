//! End-to-end pipeline tests: a synthetic host renders solid colors, the
//! mock codec provider records what reaches the encoder and muxer. Tests
//! skip silently on machines without a usable graphics adapter.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{init_logging, session_lock, MockProvider, TestHost};
use sdr_core::console;
use sdr_core::Library;

/// Puts every recorder variable a test relies on into a known state; the
/// registry is process-wide and other tests may have touched it.
fn set_base_vars() {
    let registry = console::registry();
    let set = |name: &str, value: &str| {
        registry
            .find(name)
            .expect("variable registered by Library::load")
            .set(value);
    };

    set("sdr_outputdir", "");
    set("sdr_video_encoder", "libx264rgb");
    set("sdr_video_pxformat", "");
    set("sdr_video_fps", "60");
    set("sdr_video_sample_mult", "1");
    set("sdr_video_sample_exposure", "0.5");
    set("sdr_video_d3d11_staging", "1");
    set("sdr_audio_only", "0");
    set("sdr_audio_disable_video", "1");
    set("sdr_endmovieflash", "0");
    set("sdr_endmoviequit", "0");
}

fn load_library(host: &Arc<TestHost>, provider: &Arc<MockProvider>) -> Arc<Library> {
    let library = Library::load(host.clone(), provider.clone());
    set_base_vars();
    library
}

#[test]
fn pass_through_emits_every_tick_after_the_first() {
    let _guard = session_lock();
    init_logging();

    let Some(host) = TestHost::create(64, 48) else {
        eprintln!("no graphics adapter, skipping");
        return;
    };
    let provider = MockProvider::new();
    let library = load_library(&host, &provider);

    host.fill(64, 128, 192, 255);

    library.start_movie("movie.mp4").unwrap();
    assert!(library.is_recording());

    for _ in 0..11 {
        library.tick_render();
    }

    library.end_movie();
    assert!(!library.is_recording());

    let log = provider.log.lock().unwrap();

    // First tick only publishes the backbuffer.
    assert_eq!(log.frames.len(), 10);
    assert_eq!(log.packet_pts, (0..10).collect::<Vec<i64>>());
    assert!(log.header_written);
    assert!(log.flushed);
    assert!(log.trailer_written);

    // BGR0 layout: B, G, R, zero for every pixel.
    let frame = &log.frames[0];
    assert_eq!(&frame[0..8], &[64, 128, 192, 0, 64, 128, 192, 0]);
}

#[test]
fn sampling_reproduces_constant_input() {
    let _guard = session_lock();
    init_logging();

    let Some(host) = TestHost::create(64, 48) else {
        eprintln!("no graphics adapter, skipping");
        return;
    };
    let provider = MockProvider::new();
    let library = load_library(&host, &provider);

    console::registry()
        .find("sdr_video_sample_mult")
        .unwrap()
        .set("4");
    console::registry()
        .find("sdr_video_sample_exposure")
        .unwrap()
        .set("1");

    host.fill(10, 200, 90, 255);

    library.start_movie("sampled.mkv").unwrap();

    // One skipped tick, then 4 accumulation ticks per emitted frame.
    for _ in 0..(1 + 4 * 3) {
        library.tick_render();
    }

    library.end_movie();

    let log = provider.log.lock().unwrap();
    assert_eq!(log.frames.len(), 3);
    assert_eq!(log.packet_pts, vec![0, 1, 2]);

    // With exposure 1 a steady input must come back out exactly, modulo
    // one count of accumulation rounding.
    for frame in &log.frames {
        for pixel in frame.chunks(4) {
            assert!((pixel[0] as i32 - 10).abs() <= 1, "b={}", pixel[0]);
            assert!((pixel[1] as i32 - 200).abs() <= 1, "g={}", pixel[1]);
            assert!((pixel[2] as i32 - 90).abs() <= 1, "r={}", pixel[2]);
            assert_eq!(pixel[3], 0);
        }
    }
}

#[test]
fn immediate_end_flushes_the_single_inflight_frame() {
    let _guard = session_lock();
    init_logging();

    let Some(host) = TestHost::create(32, 32) else {
        eprintln!("no graphics adapter, skipping");
        return;
    };
    let provider = MockProvider::new();
    let library = load_library(&host, &provider);

    host.fill(1, 2, 3, 255);

    library.start_movie("short.avi").unwrap();
    library.tick_render(); // skipped first frame
    library.tick_render(); // the one real frame
    library.end_movie();

    let log = provider.log.lock().unwrap();
    assert_eq!(log.packet_pts, vec![0]);
    assert!(log.trailer_written);
    drop(log);

    // Idempotent end: the second call is a no-op.
    library.end_movie();
    assert!(!library.is_recording());
}

#[test]
fn start_rejects_unknown_encoder_and_bad_names() {
    let _guard = session_lock();
    init_logging();

    let Some(host) = TestHost::create(32, 32) else {
        eprintln!("no graphics adapter, skipping");
        return;
    };
    let provider = MockProvider::new();
    let library = load_library(&host, &provider);

    console::registry()
        .find("sdr_video_encoder")
        .unwrap()
        .set("libx265");
    assert!(library.start_movie("movie.mp4").is_err());
    assert!(!library.is_recording());

    set_base_vars();

    assert!(library.start_movie("movie.webm").is_err());
    assert!(library.start_movie("con.mp4").is_err());
    assert!(library.start_movie("movie").is_err());
    assert!(!library.is_recording());

    // Failed starts leave the host framerate untouched.
    let host_framerate = console::registry().find_or_register("host_framerate", "0");
    assert_eq!(host_framerate.get_int(), 0);
}

#[test]
fn encoder_stall_applies_backpressure_without_loss() {
    let _guard = session_lock();
    init_logging();

    let Some(host) = TestHost::create(32, 32) else {
        eprintln!("no graphics adapter, skipping");
        return;
    };
    let provider = MockProvider::new();
    let library = load_library(&host, &provider);

    host.fill(7, 7, 7, 255);

    // Stall every encode long enough for the capture side to run ahead.
    provider.stall_ms.store(20, Ordering::Relaxed);

    library.start_movie("stalled.mp4").unwrap();

    for index in 0..150 {
        library.tick_render();
        if index == 100 {
            provider.stall_ms.store(0, Ordering::Relaxed);
        }
    }

    library.end_movie();

    let log = provider.log.lock().unwrap();

    // Every captured frame made it through in order with no PTS gaps.
    assert_eq!(log.frames.len(), 149);
    assert_eq!(log.packet_pts, (0..149).collect::<Vec<i64>>());
}

#[test]
fn audio_only_session_writes_a_patched_wav() {
    let _guard = session_lock();
    init_logging();

    let Some(host) = TestHost::create(32, 32) else {
        eprintln!("no graphics adapter, skipping");
        return;
    };
    let provider = MockProvider::new();
    let library = load_library(&host, &provider);

    console::registry().find("sdr_audio_only").unwrap().set("1");

    library.start_movie("session.mp4").unwrap();
    assert!(library.is_recording());
    assert!(library.suppresses_host_video());

    let samples = vec![0i16; 512];
    for _ in 0..5 {
        library.tick_audio(&samples);
    }

    library.end_movie();

    let wav = host.output_dir().join("session.wav");
    let bytes = std::fs::read(&wav).expect("wav file exists");

    assert_eq!(&bytes[0..4], b"RIFF");
    let riff_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    assert_eq!(riff_size as usize, bytes.len() - 8);

    // First audio callback is skipped, four buffers of 512 samples land.
    let data_size = u32::from_le_bytes(bytes[42..46].try_into().unwrap());
    assert_eq!(data_size, 4 * 512 * 2);

    // No video-path activity at all.
    assert!(provider.log.lock().unwrap().frames.is_empty());
}

#[test]
fn console_command_requires_a_name() {
    let _guard = session_lock();
    init_logging();

    let Some(host) = TestHost::create(32, 32) else {
        eprintln!("no graphics adapter, skipping");
        return;
    };
    let provider = MockProvider::new();
    let library = load_library(&host, &provider);

    console::registry().execute("startmovie").unwrap();
    assert!(!library.is_recording());

    console::registry().execute("startmovie cmd.mp4").unwrap();
    assert!(library.is_recording());

    console::registry().execute("endmovie").unwrap();
    assert!(!library.is_recording());
}
