use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::models::Story;

pub const DEFAULT_DURATION: Duration = Duration::from_millis(5000);
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
/// Shortest tick period a handle will run at.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Outcome of a tick or a manual navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Stay,
    Moved(usize),
    Closed,
}

/// Progress through an ordered list of stories. Each tick adds
/// `100 / (duration / tick)` percent; reaching 100 moves to the next story.
#[derive(Debug, Clone)]
pub struct StoryAdvancer {
    len: usize,
    index: usize,
    elapsed_ticks: u32,
    ticks_per_story: u32,
    closed: bool,
}

impl StoryAdvancer {
    pub fn new(len: usize, duration: Duration, tick: Duration) -> Self {
        let tick_ms = tick.as_millis().max(1);
        let ticks = (duration.as_millis() / tick_ms).clamp(1, u32::MAX as u128) as u32;
        Self {
            len,
            index: 0,
            elapsed_ticks: 0,
            ticks_per_story: ticks,
            closed: len == 0,
        }
    }

    pub fn starting_at(mut self, index: usize) -> Self {
        if index < self.len {
            self.index = index;
        }
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Percent of the current story shown, in `[0, 100]`.
    pub fn progress(&self) -> f64 {
        (self.elapsed_ticks as f64 * 100.0 / self.ticks_per_story as f64).min(100.0)
    }

    pub fn step(&self) -> f64 {
        100.0 / self.ticks_per_story as f64
    }

    pub fn tick(&mut self) -> Advance {
        if self.closed {
            return Advance::Closed;
        }
        self.elapsed_ticks += 1;
        if self.elapsed_ticks >= self.ticks_per_story {
            self.next()
        } else {
            Advance::Stay
        }
    }

    pub fn next(&mut self) -> Advance {
        if self.closed {
            return Advance::Closed;
        }
        if self.index + 1 >= self.len {
            return self.close();
        }
        self.index += 1;
        self.elapsed_ticks = 0;
        Advance::Moved(self.index)
    }

    /// No-op on the first story.
    pub fn previous(&mut self) -> Advance {
        if self.closed {
            return Advance::Closed;
        }
        if self.index == 0 {
            return Advance::Stay;
        }
        self.index -= 1;
        self.elapsed_ticks = 0;
        Advance::Moved(self.index)
    }

    pub fn close(&mut self) -> Advance {
        self.closed = true;
        self.elapsed_ticks = 0;
        Advance::Closed
    }
}

/// A periodic tick thread. Every tick carries the generation it was started
/// with; the thread stops when cancelled or dropped.
pub struct Ticker {
    stop: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Ticker {
    pub fn start(generation: u64, period: Duration, ticks: Sender<u64>) -> Self {
        let period = period.max(MIN_TICK);
        let (stop_tx, stop_rx) = unbounded::<()>();
        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {
                    if ticks.send(generation).is_err() {
                        break;
                    }
                }
                _ => break,
            }
        });
        Self {
            stop: stop_tx,
            thread: Some(handle),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.stop.send(());
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Plays a list of stories: owns the advancer and the tick handle, restarting
/// the handle whenever the shown story changes.
pub struct StoryViewer {
    stories: Vec<Story>,
    advancer: StoryAdvancer,
    period: Duration,
    ticks_tx: Sender<u64>,
    ticks_rx: Receiver<u64>,
    ticker: Option<Ticker>,
    generation: u64,
}

impl StoryViewer {
    pub fn open(stories: Vec<Story>, start: usize, duration: Duration, tick: Duration) -> Self {
        let tick = tick.max(MIN_TICK);
        let (ticks_tx, ticks_rx) = unbounded();
        let advancer = StoryAdvancer::new(stories.len(), duration, tick).starting_at(start);
        let mut viewer = Self {
            stories,
            advancer,
            period: tick,
            ticks_tx,
            ticks_rx,
            ticker: None,
            generation: 0,
        };
        if !viewer.advancer.is_closed() {
            viewer.restart_ticker();
        }
        viewer
    }

    pub fn current(&self) -> Option<&Story> {
        if self.advancer.is_closed() {
            return None;
        }
        self.stories.get(self.advancer.index())
    }

    pub fn index(&self) -> usize {
        self.advancer.index()
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    pub fn progress(&self) -> f64 {
        self.advancer.progress()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_closed(&self) -> bool {
        self.advancer.is_closed()
    }

    pub fn next(&mut self) -> Advance {
        let outcome = self.advancer.next();
        self.settle(outcome)
    }

    pub fn previous(&mut self) -> Advance {
        let outcome = self.advancer.previous();
        self.settle(outcome)
    }

    pub fn close(&mut self) -> Advance {
        let outcome = self.advancer.close();
        self.settle(outcome)
    }

    /// Waits up to `timeout` for the next tick of the live handle and applies
    /// it. Returns `None` when no tick arrived in time.
    pub fn pump(&mut self, timeout: Duration) -> Option<Advance> {
        if self.advancer.is_closed() {
            return Some(Advance::Closed);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let generation = self.ticks_rx.recv_timeout(remaining).ok()?;
            if generation != self.generation {
                debug!(generation, live = self.generation, "story: stale tick ignored");
                continue;
            }
            let outcome = self.advancer.tick();
            return Some(self.settle(outcome));
        }
    }

    fn settle(&mut self, outcome: Advance) -> Advance {
        match outcome {
            Advance::Stay => {}
            Advance::Moved(index) => {
                debug!(index, "story: moved");
                self.restart_ticker();
            }
            Advance::Closed => {
                debug!("story: viewer closed");
                self.stop_ticker();
            }
        }
        outcome
    }

    fn restart_ticker(&mut self) {
        self.stop_ticker();
        self.generation += 1;
        self.ticker = Some(Ticker::start(
            self.generation,
            self.period,
            self.ticks_tx.clone(),
        ));
    }

    fn stop_ticker(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }
}
