//! # Audio Stream
//!
//! PCM16 capture to a RIFF/WAVE file. The host's audio-mix output is
//! intercepted on its own callback; each sample buffer is copied into a
//! queue and a worker thread serially appends it to the file. The format
//! is fixed: 44100 Hz, 16-bit, 2 channels.
//!
//! The `RIFF` and `data` chunk sizes are unknowable while writing, so both
//! are written as zero on open and patched on finish from the actual byte
//! counts: RIFF size is file length minus eight, data size is the PCM
//! bytes written.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::warn;

use crate::error::{Error, Result};
use crate::movie::queue::Counters;

pub const SAMPLE_RATE: u32 = 44_100;
pub const SAMPLE_BITS: u16 = 16;
pub const CHANNELS: u16 = 2;

// Byte offsets of the two sizes patched at close.
const RIFF_SIZE_OFFSET: u64 = 4;
const DATA_SIZE_OFFSET: u64 = 42;

pub struct WaveWriter {
    file: BufWriter<File>,
    data_bytes: u32,
}

impl WaveWriter {
    /// Creates the file and writes the header with zeroed sizes.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .map_err(|err| Error::config("could not create audio file").with_source(err))?;
        let mut file = BufWriter::new(file);

        let block_align = CHANNELS * SAMPLE_BITS / 8;
        let avg_bytes_per_sec = SAMPLE_RATE * block_align as u32;

        let write = |file: &mut BufWriter<File>| -> std::io::Result<()> {
            file.write_all(b"RIFF")?;
            file.write_all(&0u32.to_le_bytes())?;
            file.write_all(b"WAVE")?;

            // WAVEFORMATEX-shaped fmt chunk: 18 bytes, cbSize zero.
            file.write_all(b"fmt ")?;
            file.write_all(&18u32.to_le_bytes())?;
            file.write_all(&1u16.to_le_bytes())?; // PCM
            file.write_all(&CHANNELS.to_le_bytes())?;
            file.write_all(&SAMPLE_RATE.to_le_bytes())?;
            file.write_all(&avg_bytes_per_sec.to_le_bytes())?;
            file.write_all(&block_align.to_le_bytes())?;
            file.write_all(&SAMPLE_BITS.to_le_bytes())?;
            file.write_all(&0u16.to_le_bytes())?; // cbSize

            file.write_all(b"data")?;
            file.write_all(&0u32.to_le_bytes())?;
            Ok(())
        };

        write(&mut file)
            .map_err(|err| Error::config("could not write audio header").with_source(err))?;

        Ok(Self {
            file,
            data_bytes: 0,
        })
    }

    pub fn write_pcm16(&mut self, samples: &[i16]) -> Result<()> {
        for sample in samples {
            self.file
                .write_all(&sample.to_le_bytes())
                .map_err(|err| Error::config("could not append audio data").with_source(err))?;
        }

        self.data_bytes += (samples.len() * 2) as u32;
        Ok(())
    }

    pub fn data_bytes(&self) -> u32 {
        self.data_bytes
    }

    /// Patches both chunk sizes and closes the file.
    pub fn finish(mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|err| Error::config("could not flush audio file").with_source(err))?;

        let mut file = self.file.into_inner().map_err(|_| {
            Error::config("could not flush audio file")
        })?;

        let file_len = file
            .seek(SeekFrom::End(0))
            .map_err(|err| Error::config("could not measure audio file").with_source(err))?;

        let patch = |file: &mut File, offset: u64, value: u32| -> std::io::Result<()> {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&value.to_le_bytes())
        };

        patch(&mut file, RIFF_SIZE_OFFSET, (file_len - 8) as u32)
            .and_then(|_| patch(&mut file, DATA_SIZE_OFFSET, self.data_bytes))
            .map_err(|err| Error::config("could not patch audio header").with_source(err))?;

        Ok(())
    }
}

/// Queue plus worker thread mirroring the video side's shape.
pub struct AudioStream {
    tx: Sender<Vec<i16>>,
    counters: Arc<Counters>,
    thread: Option<JoinHandle<WaveWriter>>,
}

impl AudioStream {
    pub fn open(path: &Path, counters: Arc<Counters>, stop: Arc<AtomicBool>) -> Result<Self> {
        let writer = WaveWriter::open(path)?;
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker_counters = counters.clone();
        let thread = thread::Builder::new()
            .name("sdr-audio".into())
            .spawn(move || audio_worker(writer, rx, stop, worker_counters))
            .expect("could not spawn audio thread");

        Ok(Self {
            tx,
            counters,
            thread: Some(thread),
        })
    }

    /// Called from the host's audio callback with one mixed buffer.
    pub fn write_samples(&self, samples: Vec<i16>) {
        self.counters.audio_enqueued();
        let _ = self.tx.send(samples);
    }

    /// Joins the worker and patches the header. The stop flag must already
    /// be set.
    pub fn finish(mut self) -> Result<()> {
        let thread = self.thread.take().expect("audio stream already finished");
        drop(self.tx);

        let writer = thread
            .join()
            .map_err(|_| Error::fatal("audio thread panicked"))?;

        writer.finish()
    }
}

fn audio_worker(
    mut writer: WaveWriter,
    rx: Receiver<Vec<i16>>,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
) -> WaveWriter {
    let mut write = |samples: Vec<i16>| {
        counters.audio_dequeued();
        if let Err(err) = writer.write_pcm16(&samples) {
            warn!("dropping audio buffer: {err}");
        }
    };

    loop {
        match rx.recv_timeout(Duration::from_millis(1)) {
            Ok(samples) => {
                write(samples);
                while let Ok(samples) = rx.try_recv() {
                    write(samples);
                }
            }
            Err(_) => {
                if stop.load(Ordering::Acquire) {
                    while let Ok(samples) = rx.try_recv() {
                        write(samples);
                    }
                    break;
                }
            }
        }
    }

    writer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wave_sizes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut writer = WaveWriter::open(&path).unwrap();
        let samples: Vec<i16> = (0..1000).map(|v| v as i16).collect();
        writer.write_pcm16(&samples).unwrap();
        writer.write_pcm16(&samples).unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let file_len = bytes.len() as u32;

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let riff_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(riff_size, file_len - 8);

        let data_size =
            u32::from_le_bytes(bytes[DATA_SIZE_OFFSET as usize..46].try_into().unwrap());
        assert_eq!(data_size, 4000);
        assert_eq!(file_len as usize, 46 + 4000);
    }

    #[test]
    fn fmt_chunk_is_waveformatex_shaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fmt.wav");

        WaveWriter::open(&path).unwrap().finish().unwrap();
        let bytes = std::fs::read(&path).unwrap();

        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 18);
        // PCM, stereo, 44100 Hz, 176400 B/s, block align 4, 16 bits.
        assert_eq!(u16::from_le_bytes(bytes[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(bytes[22..24].try_into().unwrap()), 2);
        assert_eq!(
            u32::from_le_bytes(bytes[24..28].try_into().unwrap()),
            44_100
        );
        assert_eq!(
            u32::from_le_bytes(bytes[28..32].try_into().unwrap()),
            176_400
        );
        assert_eq!(u16::from_le_bytes(bytes[32..34].try_into().unwrap()), 4);
        assert_eq!(u16::from_le_bytes(bytes[34..36].try_into().unwrap()), 16);
        assert_eq!(&bytes[38..42], b"data");
    }

    #[test]
    fn stream_drains_through_worker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.wav");

        let counters = Counters::new();
        let stop = Arc::new(AtomicBool::new(false));
        let stream = AudioStream::open(&path, counters.clone(), stop.clone()).unwrap();

        for _ in 0..16 {
            stream.write_samples(vec![0i16; 512]);
        }

        stop.store(true, Ordering::Release);
        stream.finish().unwrap();

        assert_eq!(counters.buffered_items(), 0);

        let bytes = std::fs::read(&path).unwrap();
        let data_size =
            u32::from_le_bytes(bytes[DATA_SIZE_OFFSET as usize..46].try_into().unwrap());
        assert_eq!(data_size, 16 * 512 * 2);
    }
}
