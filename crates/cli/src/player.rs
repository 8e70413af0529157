//! Streaming session against the simulated media source
//!
//! Must run inside a [`tokio::task::LocalSet`]: the proxies are `!Send` and
//! the event pump and garbage collector are spawned with `spawn_local`.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tokio::task::{spawn_local, JoinHandle};
use tracing::{debug, info, warn};

use mse2_media_core::prelude::*;

use crate::config::PlayerConfig;

/// What happened during a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSummary {
    pub content_type: String,
    pub appends: usize,
    pub bytes_appended: usize,
    pub quota_retries: usize,
    pub gc_removals: usize,
    pub aborted: bool,
    pub removed: bool,
    pub buffered: Vec<(f64, f64)>,
    pub playhead: f64,
}

/// State shared between the streaming loop, the pump and the collector
#[derive(Default)]
struct Playback {
    playhead: Cell<f64>,
    appends_complete: Cell<bool>,
    /// Stops the collector
    finished: Cell<bool>,
    /// Stops the event pump; set only after the collector has exited
    stopped: Cell<bool>,
    gc_removals: Cell<usize>,
    quota_ready: Notify,
}

impl Playback {
    /// Move the playhead through buffered media; stalls at a range end
    fn advance(&self, buffered: &TimeRanges, step: f64) {
        let position = self.playhead.get();
        let next = buffered
            .iter()
            .find(|&(_, end)| end > position)
            .map(|(start, end)| (position.max(start) + step).min(end));
        if let Some(next) = next {
            self.playhead.set(next);
        }
    }

    fn has_ended(&self, buffered: &TimeRanges) -> bool {
        let end = buffered.iter().last().map_or(0.0, |(_, end)| end);
        self.appends_complete.get() && self.playhead.get() >= end
    }
}

/// Where appended bytes come from
enum ChunkSource {
    File(File),
    Synthetic { remaining: usize, next: u8 },
}

impl ChunkSource {
    async fn open(config: &PlayerConfig) -> Result<Self> {
        match &config.src {
            Some(path) => {
                let file = File::open(path)
                    .await
                    .with_context(|| format!("opening {}", path.display()))?;
                Ok(ChunkSource::File(file))
            }
            None => Ok(ChunkSource::Synthetic {
                remaining: config.synthetic_bytes,
                next: 0,
            }),
        }
    }

    async fn next_chunk(&mut self, size: usize) -> Result<Option<Bytes>> {
        match self {
            ChunkSource::File(file) => {
                let mut buf = vec![0u8; size];
                let read = file.read(&mut buf).await?;
                if read == 0 {
                    return Ok(None);
                }
                buf.truncate(read);
                Ok(Some(Bytes::from(buf)))
            }
            ChunkSource::Synthetic { remaining, next } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let len = size.min(*remaining);
                *remaining -= len;
                let chunk = Bytes::from(vec![*next; len]);
                *next = next.wrapping_add(1);
                Ok(Some(chunk))
            }
        }
    }
}

/// Stream the configured media, play it out and tear down
pub async fn run(config: PlayerConfig) -> Result<PlaybackSummary> {
    let content_type = config.content_type();
    let source = SimulatedMediaSource::new();
    let container = ContainerProxy::new(source.clone());
    let playback = Rc::new(Playback::default());
    let tick = Duration::from_millis(config.tick_ms);

    // Queued before attachment; dispatched once the pump attaches the source.
    let added = container.add_buffer(content_type);
    let pump = spawn_local(pump_events(
        source.clone(),
        Rc::clone(&playback),
        tick,
        config.playback_rate,
    ));

    let buffer = added.await.context("adding the source buffer")?;
    info!("🎬 Source buffer ready for {}", content_type);
    if let Some(sim) = source.buffer(0) {
        sim.set_quota(config.quota_bytes);
        sim.set_seconds_per_byte(config.seconds_per_byte);
    }
    if !config.buffer.is_empty() {
        buffer
            .configure(config.buffer.clone())
            .await
            .context("applying initial buffer options")?;
    }

    let collector: Option<JoinHandle<()>> = config.gc_seconds.map(|interval| {
        spawn_local(collect_garbage(
            container.clone(),
            buffer.clone(),
            Rc::clone(&playback),
            interval,
            tick,
        ))
    });

    let mut summary = stream(&config, &buffer, &playback).await?;
    summary.content_type = content_type.to_string();

    container
        .end_of_stream(None)
        .await
        .context("signalling end of stream")?;
    playback.appends_complete.set(true);
    info!("📼 All appends complete, stream ended");

    let mut ticker = tokio::time::interval(tick);
    while !playback.has_ended(&buffer.buffered()?) {
        ticker.tick().await;
    }
    info!("⏹️  Playback ended at {:.3}s", playback.playhead.get());

    summary.buffered = buffer.buffered()?.iter().collect();
    summary.playhead = playback.playhead.get();

    playback.finished.set(true);
    if let Some(collector) = collector {
        collector.await?;
    }
    summary.gc_removals = playback.gc_removals.get();

    if config.remove_on_end {
        container
            .remove_buffer(&buffer)
            .await
            .context("removing the source buffer")?;
        info!("🗑️  Source buffer removed");
        summary.removed = true;
    }

    playback.stopped.set(true);
    pump.await?;
    Ok(summary)
}

/// Append chunks until the source runs dry or the abort count is reached
async fn stream(
    config: &PlayerConfig,
    buffer: &BufferProxy,
    playback: &Playback,
) -> Result<PlaybackSummary> {
    let mut summary = PlaybackSummary::default();
    let mut chunks = ChunkSource::open(config).await?;

    while let Some(chunk) = chunks.next_chunk(config.chunk_size).await? {
        loop {
            match buffer.append(chunk.clone()).await {
                Ok(()) => break,
                Err(e) if e.is_quota_exceeded() => {
                    if config.gc_seconds.is_none() {
                        bail!("buffer is full and garbage collection is disabled: {}", e);
                    }
                    debug!("Quota exceeded, waiting for garbage collection");
                    summary.quota_retries += 1;
                    playback.quota_ready.notified().await;
                }
                Err(e) => return Err(e).context("appending media"),
            }
        }
        summary.appends += 1;
        summary.bytes_appended += chunk.len();

        if config.abort_after.map_or(false, |limit| summary.appends >= limit) {
            warn!("✂️  Aborting source buffer after {} appends", summary.appends);
            buffer.abort()?;
            buffer
                .configure(
                    BufferOptions::new()
                        .with_timestamp_offset(0.0)
                        .with_append_window(0.0, f64::INFINITY),
                )
                .await
                .context("resetting buffer options after abort")?;
            summary.aborted = true;
            break;
        }
    }

    Ok(summary)
}

/// Drive the simulated source: attach it, complete updates, play media
async fn pump_events(
    source: Rc<SimulatedMediaSource>,
    playback: Rc<Playback>,
    tick: Duration,
    rate: f64,
) {
    source.attach();
    let step = tick.as_secs_f64() * rate;
    let mut ticker = tokio::time::interval(tick);

    while !playback.stopped.get() {
        ticker.tick().await;
        source.complete_all_updates();
        source.finish_end_of_stream();
        if let Some(buffered) = source.buffer(0).and_then(|b| b.buffered().ok()) {
            playback.advance(&buffered, step);
        }
    }
    debug!("Event pump stopped");
}

/// Drop media more than one keyframe interval behind the playhead
async fn collect_garbage(
    container: ContainerProxy,
    buffer: BufferProxy,
    playback: Rc<Playback>,
    interval: f64,
    tick: Duration,
) {
    let mut ticker = tokio::time::interval(tick);

    while !playback.finished.get() {
        ticker.tick().await;
        let Some(start) = buffer.buffered().ok().and_then(|b| b.start(0)) else {
            continue;
        };
        let playhead = playback.playhead.get();
        if playhead - start <= 2.0 * interval {
            continue;
        }

        match buffer.remove_range(0.0, playhead - interval).await {
            Ok(()) => {
                debug!("Collected media before {:.3}s", playhead - interval);
                playback.gc_removals.set(playback.gc_removals.get() + 1);
                if playback.appends_complete.get() {
                    // Removal reopens an ended stream.
                    if let Err(e) = container.end_of_stream(None).await {
                        warn!("End of stream after collection failed: {}", e);
                    }
                }
                playback.quota_ready.notify_one();
            }
            Err(e) => warn!("Garbage collection failed: {}", e),
        }
    }
}
