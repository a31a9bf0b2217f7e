// A device with no sound, just a clock. It runs on its own thread, takes
// commands over a channel (it never blocks the caller) and reports position
// ticks back on another channel, which is all the transport needs to drive a
// real renderer.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use super::{DeviceEvent, OutputDevice};
use crate::error::DeviceError;
use crate::session::GeneratedSequence;
use crate::shared::{LOOP_FOREVER, Position};

const EVENT_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub enum ClockCommand {
    Load(Arc<GeneratedSequence>),
    StartAt(u32),
    Halt,
    ResumeFrom(Position),
    SetLoopCount(u32),
}

pub struct ClockDevice {
    tx: Option<Sender<ClockCommand>>,
    loaded: bool,
    worker: Option<JoinHandle<()>>,
}

impl ClockDevice {
    pub fn start(tick: Duration, command_capacity: usize) -> anyhow::Result<(Self, Receiver<DeviceEvent>)> {
        let (tx, rx) = crossbeam_channel::bounded::<ClockCommand>(command_capacity.max(1));
        let (events_tx, events_rx) = crossbeam_channel::bounded::<DeviceEvent>(EVENT_CAPACITY);

        let worker = std::thread::Builder::new()
            .name("barline-clock".to_string())
            .spawn(move || Clock::new(events_tx).run(rx, tick))
            .context("failed to spawn clock thread")?;

        Ok((
            Self {
                tx: Some(tx),
                loaded: false,
                worker: Some(worker),
            },
            events_rx,
        ))
    }

    fn send(&self, cmd: ClockCommand) -> Result<(), DeviceError> {
        let tx = self.tx.as_ref().ok_or(DeviceError::Disconnected)?;
        tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => DeviceError::Unavailable("clock command queue is full".to_string()),
            TrySendError::Disconnected(_) => DeviceError::Disconnected,
        })
    }
}

impl OutputDevice for ClockDevice {
    fn load(&mut self, sequence: Arc<GeneratedSequence>) -> Result<(), DeviceError> {
        self.send(ClockCommand::Load(sequence))?;
        self.loaded = true;
        Ok(())
    }

    fn start_at(&mut self, bar: u32) -> Result<(), DeviceError> {
        if !self.loaded {
            return Err(DeviceError::NothingLoaded);
        }
        self.send(ClockCommand::StartAt(bar))
    }

    fn halt_emission(&mut self) {
        if let Err(e) = self.send(ClockCommand::Halt) {
            log::warn!("clock halt not delivered: {e}");
        }
    }

    fn resume_from(&mut self, position: Position) -> Result<(), DeviceError> {
        if !self.loaded {
            return Err(DeviceError::NothingLoaded);
        }
        self.send(ClockCommand::ResumeFrom(position))
    }

    fn set_loop_count(&mut self, count: u32) {
        if let Err(e) = self.send(ClockCommand::SetLoopCount(count)) {
            log::warn!("clock loop count not delivered: {e}");
        }
    }
}

impl Drop for ClockDevice {
    fn drop(&mut self) {
        self.tx = None; // disconnecting is the shutdown signal
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ── Clock thread ───────────────────────────────────────────────────

struct Clock {
    events: Sender<DeviceEvent>,
    sequence: Option<Arc<GeneratedSequence>>,
    running: bool,
    beats: f64, // absolute beats from structure bar 0
    loop_count: u32,
    loops_left: u32,
    last: Instant,
}

impl Clock {
    fn new(events: Sender<DeviceEvent>) -> Self {
        Self {
            events,
            sequence: None,
            running: false,
            beats: 0.0,
            loop_count: 1,
            loops_left: 1,
            last: Instant::now(),
        }
    }

    fn run(mut self, rx: Receiver<ClockCommand>, tick: Duration) {
        loop {
            match rx.recv_timeout(tick) {
                Ok(cmd) => self.handle_cmd(cmd),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            // drain anything else queued before advancing
            while let Ok(cmd) = rx.try_recv() {
                self.handle_cmd(cmd);
            }
            self.advance();
        }
        log::debug!("clock thread exiting");
    }

    fn handle_cmd(&mut self, cmd: ClockCommand) {
        match cmd {
            ClockCommand::Load(seq) => self.sequence = Some(seq),
            ClockCommand::StartAt(bar) => {
                let Some(bpb) = self.beats_per_bar() else { return };
                self.beats = bar as f64 * bpb;
                self.loops_left = self.loop_count;
                self.arm();
            }
            ClockCommand::Halt => self.running = false,
            ClockCommand::ResumeFrom(pos) => {
                let Some(bpb) = self.beats_per_bar() else { return };
                self.beats = pos.bar as f64 * bpb + pos.beat;
                self.arm();
            }
            ClockCommand::SetLoopCount(n) => {
                self.loop_count = n.max(1);
                self.loops_left = self.loop_count;
            }
        }
    }

    fn beats_per_bar(&self) -> Option<f64> {
        self.sequence.as_ref().map(|s| s.beats_per_bar.max(1) as f64)
    }

    fn arm(&mut self) {
        self.running = true;
        self.last = Instant::now();
        self.report();
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.last = now;

        if !self.running {
            return;
        }
        let Some(seq) = self.sequence.clone() else { return };
        let bpb = seq.beats_per_bar.max(1) as f64;
        let start = seq.start_bar as f64 * bpb;
        let end = seq.end_bar as f64 * bpb;

        self.beats += elapsed * seq.tempo_bpm as f64 / 60.0;

        if self.beats >= end {
            let another_pass = self.loop_count == LOOP_FOREVER || self.loops_left > 1;
            if another_pass && end > start {
                if self.loop_count != LOOP_FOREVER {
                    self.loops_left -= 1;
                }
                self.beats = start + (self.beats - end) % (end - start);
            } else {
                self.running = false;
                self.beats = end;
                let _ = self.events.try_send(DeviceEvent::EndOfSequence);
                return;
            }
        }
        self.report();
    }

    fn report(&self) {
        let Some(bpb) = self.beats_per_bar() else { return };
        let bar = (self.beats / bpb).floor();
        let position = Position::new(bar as u32, self.beats - bar * bpb);
        let _ = self.events.try_send(DeviceEvent::Position(position));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(tempo_bpm: f32, bars: u32) -> Arc<GeneratedSequence> {
        Arc::new(GeneratedSequence {
            tempo_bpm,
            beats_per_bar: 4,
            start_bar: 0,
            end_bar: bars,
            events: Vec::new(),
        })
    }

    fn positions(rx: &Receiver<DeviceEvent>, until: Duration) -> (Vec<Position>, bool) {
        let deadline = Instant::now() + until;
        let mut seen = Vec::new();
        let mut ended = false;
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(DeviceEvent::Position(p)) => seen.push(p),
                Ok(DeviceEvent::EndOfSequence) => {
                    ended = true;
                    break;
                }
                Err(_) => break,
            }
        }
        (seen, ended)
    }

    #[test]
    fn start_without_sequence_is_refused() {
        let (mut clock, _events) = ClockDevice::start(Duration::from_millis(5), 16).unwrap();
        assert_eq!(clock.start_at(0), Err(DeviceError::NothingLoaded));
        assert_eq!(clock.resume_from(Position::default()), Err(DeviceError::NothingLoaded));
    }

    #[test]
    fn running_clock_moves_forward() {
        let (mut clock, events) = ClockDevice::start(Duration::from_millis(2), 16).unwrap();
        // 6000 bpm = 100 beats/s, 25 bars/s
        clock.load(sequence(6000.0, 1000)).unwrap();
        clock.start_at(3).unwrap();

        let (seen, ended) = positions(&events, Duration::from_millis(100));
        assert!(!ended);
        assert!(seen.len() > 2);
        assert_eq!(seen[0], Position::at_bar(3));
        let beats: Vec<f64> = seen.iter().map(|p| p.bar as f64 * 4.0 + p.beat).collect();
        assert!(beats.windows(2).all(|w| w[1] >= w[0]));
        assert!(beats.last().copied().unwrap_or(0.0) > 12.0);
    }

    #[test]
    fn end_of_sequence_without_loops() {
        let (mut clock, events) = ClockDevice::start(Duration::from_millis(2), 16).unwrap();
        clock.load(sequence(6000.0, 2)).unwrap();
        clock.set_loop_count(1);
        clock.start_at(0).unwrap();

        let (seen, ended) = positions(&events, Duration::from_secs(2));
        assert!(ended);
        assert!(seen.iter().all(|p| p.bar < 2));
    }

    #[test]
    fn looping_clock_wraps_instead_of_ending() {
        let (mut clock, events) = ClockDevice::start(Duration::from_millis(2), 16).unwrap();
        clock.load(sequence(6000.0, 1)).unwrap();
        clock.set_loop_count(LOOP_FOREVER);
        clock.start_at(0).unwrap();

        let (seen, ended) = positions(&events, Duration::from_millis(150));
        assert!(!ended);
        assert!(seen.iter().all(|p| p.bar == 0));
    }

    #[test]
    fn halted_clock_goes_quiet() {
        let (mut clock, events) = ClockDevice::start(Duration::from_millis(2), 16).unwrap();
        clock.load(sequence(120.0, 100)).unwrap();
        clock.start_at(0).unwrap();
        clock.halt_emission();
        std::thread::sleep(Duration::from_millis(20));
        while events.try_recv().is_ok() {}

        let (seen, _) = positions(&events, Duration::from_millis(40));
        assert!(seen.is_empty());
    }
}
