//! End-to-end tests over synthetic NSx and NEV files written to disk.
//!
//! Run with: cargo test --test integration_tests

use blackrock_core::test_utils::{NevBuilder, NsxBuilder, NsxChannel, SpikeChannel};
use blackrock_core::types::{DigitalInput, UnimplementedEvent};
use blackrock_core::{
    open_with, DecodeError, DeviceEvent, EventClass, EventRecord, NevFile, NsxFile, ReaderOptions,
    Recording, Waveform, WaveformScaling,
};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn no_cache() -> ReaderOptions {
    ReaderOptions::default().without_cache()
}

fn cache_in(dir: &Path) -> ReaderOptions {
    ReaderOptions::default().with_cache_dir(dir.join("_bmcache_"))
}

fn scenario_waveform() -> Vec<i16> {
    (0..48).map(|i| (i as i16 - 24) * 37).collect()
}

fn write_scenario_nev(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("scenario.nev");
    NevBuilder::new()
        .spike_channel(SpikeChannel::new(1).factor(1000).width(48, 2))
        .spike(4500, 1, 1, &scenario_waveform())
        .write_to(&path)
        .unwrap();
    path
}

/// One electrode with 48 two-byte samples and a digitization factor of 1000.
#[test]
fn test_spike_scenario() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_scenario_nev(&dir);

    let nev = NevFile::open_with(&path, no_cache()).unwrap();
    // 336-byte basic header plus one 32-byte extended header.
    assert_eq!(nev.basic_header().unwrap().bytes_in_headers, 368);

    let events = nev.events(EventClass::Spike(1)).unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
        EventRecord::Spike(spike) => {
            assert_eq!(spike.timestamp, 4500);
            assert_eq!(spike.unit_classification, 1);
            let expected: Vec<f64> = scenario_waveform()
                .iter()
                .map(|&s| s as f64 * 1000.0)
                .collect();
            assert_eq!(spike.waveform, Waveform::Scaled(expected));
            assert_eq!(spike.waveform.len(), 48);
        }
        other => panic!("expected a spike, got {:?}", other),
    }
}

#[test]
fn test_spike_scenario_raw_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_scenario_nev(&dir);

    let options = no_cache().with_waveform_scaling(WaveformScaling::Raw);
    let nev = NevFile::open_with(&path, options).unwrap();
    let waveforms = nev.spike_waveforms(1).unwrap();
    let expected: Vec<i32> = scenario_waveform().iter().map(|&s| s as i32).collect();
    assert_eq!(waveforms.waveforms, vec![Waveform::Raw(expected)]);
    assert_eq!(waveforms.time_ms.len(), 48);
}

#[test]
fn test_sampling_frequency_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.ns3");
    NsxBuilder::new()
        .period(2)
        .time_resolution(30000)
        .channel(NsxChannel::new(1, "elec1"))
        .channel(NsxChannel::new(2, "elec2"))
        .write_to(&path)
        .unwrap();

    let nsx = NsxFile::open_with(&path, no_cache()).unwrap();
    assert_eq!(nsx.basic_header().unwrap().channel_count, 2);
    assert_eq!(nsx.sampling_frequency().unwrap(), 15000.0);
}

#[test]
fn test_header_length_matches_extended_region() {
    let dir = tempfile::tempdir().unwrap();
    let nev_path = dir.path().join("a.nev");
    NevBuilder::new()
        .spike_channel(SpikeChannel::new(1))
        .spike_channel(SpikeChannel::new(2))
        .label(1, "one")
        .label(2, "two")
        .filter(1, 300, 7500)
        .array_name("array A")
        .map_file("map.cmp")
        .write_to(&nev_path)
        .unwrap();
    let nev = NevFile::open_with(&nev_path, no_cache()).unwrap();
    assert_eq!(nev.basic_header().unwrap().bytes_in_headers, 336 + 7 * 32);
    assert_eq!(
        nev.channel_map().unwrap().labels(),
        vec![(1, "one".to_string()), (2, "two".to_string())]
    );

    let nsx_path = dir.path().join("a.ns5");
    NsxBuilder::new()
        .channel(NsxChannel::new(3, "x"))
        .channel(NsxChannel::new(4, "y"))
        .channel(NsxChannel::new(5, "z"))
        .write_to(&nsx_path)
        .unwrap();
    let nsx = NsxFile::open_with(&nsx_path, no_cache()).unwrap();
    assert_eq!(nsx.basic_header().unwrap().bytes_in_headers, 314 + 3 * 66);
    assert_eq!(nsx.channel_map().unwrap().len(), 3);
}

#[test]
fn test_calibration_identity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.ns5");
    let raw = [-32768i16, -1234, -1, 0, 1, 999, 32767];
    NsxBuilder::new()
        .channel(NsxChannel::new(1, "a").range(-1000, 1000, -1000, 1000))
        .generated_frames(raw.len(), |i, _| raw[i])
        .write_to(&path)
        .unwrap();

    let nsx = NsxFile::open_with(&path, no_cache()).unwrap();
    let series = nsx.channel_series(1, None, None, None).unwrap();
    let expected: Vec<f64> = raw.iter().map(|&d| d as f64).collect();
    assert_eq!(series.samples, expected);
}

#[test]
fn test_cache_is_transparent() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let nev_path = NevBuilder::new()
        .spike_channel(SpikeChannel::new(3).factor(4).width(8, 2))
        .digital(10, 0xA5A5)
        .spike(20, 3, 2, &[1, -2, 3, -4, 5, -6, 7, -8])
        .comment_event(30, "hello")
        .raw_packet(40, 65533);
    let path = dir.path().join("cached.nev");
    nev_path.write_to(&path).unwrap();

    let classes = [
        EventClass::Digital,
        EventClass::Spike(3),
        EventClass::Comment,
        EventClass::Device(DeviceEvent::Tracking),
    ];
    let cold_nev = NevFile::open_with(&path, cache_in(dir.path())).unwrap();
    let cold: Vec<_> = classes.iter().map(|&c| cold_nev.events(c).unwrap()).collect();
    cold_nev.close();

    let cache_dir = dir.path().join("_bmcache_");
    let entries = std::fs::read_dir(&cache_dir).unwrap().count();
    // One entry for the index plus one per classification.
    assert_eq!(entries, 1 + classes.len());

    let warm_nev = NevFile::open_with(&path, cache_in(dir.path())).unwrap();
    let warm: Vec<_> = classes.iter().map(|&c| warm_nev.events(c).unwrap()).collect();
    assert_eq!(cold, warm);
    assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), entries);

    let nsx_path = dir.path().join("cached.ns5");
    NsxBuilder::new()
        .channel(NsxChannel::new(1, "a").range(-100, 100, -50, 50))
        .channel(NsxChannel::new(2, "b"))
        .generated_frames(200, |i, c| (i as i16 - 100) * (c as i16 + 1))
        .write_to(&nsx_path)
        .unwrap();
    let cold_nsx = NsxFile::open_with(&nsx_path, cache_in(dir.path())).unwrap();
    let cold_series = cold_nsx.channel_series(1, None, None, Some(4.0)).unwrap();
    let warm_nsx = NsxFile::open_with(&nsx_path, cache_in(dir.path())).unwrap();
    let warm_series = warm_nsx.channel_series(1, None, None, Some(4.0)).unwrap();
    assert_eq!(cold_series, warm_series);
    assert_eq!(cold_series.len(), 50);
}

#[test]
fn test_cache_separates_files_with_the_same_name() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("shared-cache");
    let options = ReaderOptions::default().with_cache_dir(&cache);

    let first = dir.path().join("one");
    let second = dir.path().join("two");
    std::fs::create_dir_all(&first).unwrap();
    std::fs::create_dir_all(&second).unwrap();
    NevBuilder::new()
        .digital(1, 111)
        .write_to(first.join("same.nev"))
        .unwrap();
    NevBuilder::new()
        .application("other rig")
        .digital(1, 222)
        .write_to(second.join("same.nev"))
        .unwrap();

    let a = NevFile::open_with(first.join("same.nev"), options.clone()).unwrap();
    let b = NevFile::open_with(second.join("same.nev"), options).unwrap();
    assert_eq!(a.digital_events().unwrap()[0].digital_value, 111);
    assert_eq!(b.digital_events().unwrap()[0].digital_value, 222);
}

#[test]
fn test_truncated_files() {
    let dir = tempfile::tempdir().unwrap();

    let nev_path = dir.path().join("truncated.nev");
    let mut bytes = NevBuilder::new().digital(1, 1).digital(2, 2).to_bytes();
    bytes.truncate(bytes.len() - 3);
    std::fs::write(&nev_path, bytes).unwrap();
    let nev = NevFile::open_with(&nev_path, no_cache()).unwrap();
    assert!(matches!(
        nev.events(EventClass::Digital),
        Err(DecodeError::TruncatedFile { .. })
    ));
    // The header itself is still available.
    assert!(nev.channel_map().is_ok());

    let nsx_path = dir.path().join("truncated.ns5");
    let mut bytes = NsxBuilder::new()
        .channel(NsxChannel::new(1, "a"))
        .channel(NsxChannel::new(2, "b"))
        .frames(&[[1, 2], [3, 4]])
        .to_bytes();
    bytes.pop();
    std::fs::write(&nsx_path, bytes).unwrap();
    let nsx = NsxFile::open_with(&nsx_path, no_cache()).unwrap();
    assert!(matches!(
        nsx.channel_series(1, None, None, None),
        Err(DecodeError::TruncatedFile { .. })
    ));
}

#[test]
fn test_no_extended_headers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bare.nev");
    NevBuilder::new().digital(5, 6).write_to(&path).unwrap();

    let nev = NevFile::open_with(&path, no_cache()).unwrap();
    assert!(nev.channel_map().unwrap().is_empty());
    assert!(nev.auxiliary_records().unwrap().is_empty());
    assert_eq!(
        nev.digital_events().unwrap(),
        vec![DigitalInput {
            timestamp: 5,
            insertion_reason: 1,
            reserved: 0,
            digital_value: 6,
        }]
    );
}

#[test]
fn test_unknown_extended_header_poisons_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.nev");
    let mut bytes = NevBuilder::new()
        .array_name("A")
        .label(1, "x")
        .digital(1, 1)
        .to_bytes();
    bytes[336 + 32..336 + 40].copy_from_slice(b"NOTATAG!");
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(
        NevFile::open_with(&path, no_cache()),
        Err(DecodeError::UnknownRecordType(_))
    ));

    let lazy = NevFile::open_lazy(&path, no_cache()).unwrap();
    let first = lazy.available_event_classifications().unwrap_err().to_string();
    let second = lazy.basic_header().unwrap_err().to_string();
    assert_eq!(first, second);
    assert!(first.contains("NOTATAG!"));
}

#[test]
fn test_device_events_are_enumerated_not_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.nev");
    NevBuilder::new()
        .raw_packet(1, 65534)
        .raw_packet(2, 65530)
        .raw_packet(3, 65534)
        .write_to(&path)
        .unwrap();

    let nev = NevFile::open_with(&path, no_cache()).unwrap();
    assert_eq!(
        nev.available_event_classifications().unwrap(),
        vec![
            EventClass::Device(DeviceEvent::Configuration),
            EventClass::Device(DeviceEvent::VideoSync),
        ]
    );
    let video = nev
        .events(EventClass::Device(DeviceEvent::VideoSync))
        .unwrap();
    assert_eq!(
        video,
        vec![
            EventRecord::Unimplemented(UnimplementedEvent {
                timestamp: 1,
                packet_id: 65534
            }),
            EventRecord::Unimplemented(UnimplementedEvent {
                timestamp: 3,
                packet_id: 65534
            }),
        ]
    );
    assert!(nev.events(EventClass::Comment).unwrap().is_empty());
}

#[test]
fn test_channel_series_window_and_downsampling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("window.ns5");
    // 1 kHz, 1000 stored points after 100 zero-padded ones.
    NsxBuilder::new()
        .period(30)
        .time_resolution(30000)
        .start_timestamp(100)
        .channel(NsxChannel::new(8, "a"))
        .generated_frames(1000, |_, _| 500)
        .write_to(&path)
        .unwrap();

    let nsx = NsxFile::open_with(&path, no_cache()).unwrap();
    let full = nsx.channel_series(8, None, None, None).unwrap();
    assert_eq!(full.len(), 1100);
    assert_eq!(full.zero_pad, 100);
    assert_eq!(full.time[0], 0.0);
    assert!((full.time[1099] - 1.1).abs() < 1e-12);

    let window = nsx.channel_series(8, Some(0.5), Some(0.6), None).unwrap();
    assert!(window.time.iter().all(|&t| (0.5..=0.6).contains(&t)));
    assert!(window.samples.iter().all(|&s| s == 500.0));
    assert_eq!(window.zero_pad, 0);

    let reduced = nsx.channel_series(8, Some(0.2), None, Some(10.0)).unwrap();
    let kept = full.time.iter().filter(|&&t| t >= 0.2).count();
    assert_eq!(reduced.len(), kept / 10);
    assert!(reduced.time[0] >= 0.2);

    assert!(matches!(
        nsx.channel_series(8, None, None, Some(-1.0)),
        Err(DecodeError::InvalidDownsampleFactor(_))
    ));
    assert!(matches!(
        nsx.channel_series(9, None, None, None),
        Err(DecodeError::UnknownChannel(9))
    ));
}

#[test]
fn test_open_dispatches_on_file_type() {
    let dir = tempfile::tempdir().unwrap();
    let nev = write_scenario_nev(&dir);
    match open_with(&nev, no_cache()).unwrap() {
        Recording::Nev(file) => assert_eq!(file.spike_timestamps(1).unwrap(), vec![4500]),
        other => panic!("expected an NEV recording, got {:?}", other.path()),
    }
}

/// A repeated electrode id would shift every later channel's frame ordinal.
#[test]
fn test_duplicate_nsx_electrode_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dup.ns5");
    NsxBuilder::new()
        .channel(NsxChannel::new(1, "a"))
        .channel(NsxChannel::new(1, "b"))
        .channel(NsxChannel::new(3, "c"))
        .frames(&[[10, 20, 30], [11, 21, 31]])
        .write_to(&path)
        .unwrap();

    assert!(matches!(
        NsxFile::open_with(&path, no_cache()),
        Err(DecodeError::InvalidHeader(_))
    ));
    let lazy = NsxFile::open_lazy(&path, no_cache()).unwrap();
    assert!(matches!(
        lazy.channel_series(3, None, None, None),
        Err(DecodeError::InvalidHeader(_))
    ));
}

#[test]
fn test_tiny_downsample_factor_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiny.ns5");
    NsxBuilder::new()
        .channel(NsxChannel::new(1, "a"))
        .frames(&[[1], [2], [3]])
        .write_to(&path)
        .unwrap();

    let nsx = NsxFile::open_with(&path, no_cache()).unwrap();
    for factor in [1e-300, 1e-9] {
        assert!(matches!(
            nsx.channel_series(1, None, None, Some(factor)),
            Err(DecodeError::InvalidDownsampleFactor(_))
        ));
    }
    assert_eq!(nsx.channel_series(1, None, None, Some(0.5)).unwrap().len(), 6);
}
