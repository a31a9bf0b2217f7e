#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use barline::{
    CancelToken, ClickTrack, DeviceError, DeviceEvent, GeneratedSequence, GenerationError, OutputDevice, Position,
    Section, SectionId, SequenceGenerator, Song, SongContext, TransportConfig, TransportController, TransportEvent,
};
use crossbeam_channel::{Receiver, Sender};

// S1[0..4) S2[4..6) S3[6..10), arranged as [S1, S1, S3] -> parts at 0, 4, 8
pub fn song() -> Arc<Song> {
    let mut song = Song::new(
        "scenario",
        120.0,
        vec![
            Section::new(1, "S1", 0, 4),
            Section::new(2, "S2", 4, 2),
            Section::new(3, "S3", 6, 4),
        ],
    );
    song.push_part(SectionId(1));
    song.push_part(SectionId(1));
    song.push_part(SectionId(3));
    Arc::new(song)
}

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Load { start_bar: u32, end_bar: u32 },
    StartAt(u32),
    Halt,
    ResumeFrom(Position),
    LoopCount(u32),
}

// Records every call; start/resume can be made to fail. A successful jump
// reports its target position, like a real device would, after flushing any
// stale tick the test queued up.
struct ScriptedDevice {
    calls: Arc<Mutex<Vec<Call>>>,
    fail: Arc<AtomicBool>,
    ticks: Sender<DeviceEvent>,
    stale: Arc<Mutex<Vec<Position>>>,
}

impl ScriptedDevice {
    fn jumped_to(&self, position: Position) {
        for old in self.stale.lock().unwrap().drain(..) {
            let _ = self.ticks.send(DeviceEvent::Position(old));
        }
        let _ = self.ticks.send(DeviceEvent::Position(position));
    }
}

impl OutputDevice for ScriptedDevice {
    fn load(&mut self, sequence: Arc<GeneratedSequence>) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().push(Call::Load {
            start_bar: sequence.start_bar,
            end_bar: sequence.end_bar,
        });
        Ok(())
    }

    fn start_at(&mut self, bar: u32) -> Result<(), DeviceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeviceError::Unavailable("unplugged".into()));
        }
        self.calls.lock().unwrap().push(Call::StartAt(bar));
        self.jumped_to(Position::at_bar(bar));
        Ok(())
    }

    fn halt_emission(&mut self) {
        self.calls.lock().unwrap().push(Call::Halt);
    }

    fn resume_from(&mut self, position: Position) -> Result<(), DeviceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeviceError::Unavailable("unplugged".into()));
        }
        self.calls.lock().unwrap().push(Call::ResumeFrom(position));
        self.jumped_to(position);
        Ok(())
    }

    fn set_loop_count(&mut self, count: u32) {
        self.calls.lock().unwrap().push(Call::LoopCount(count));
    }
}

/// The test's side of the scripted device.
pub struct Probe {
    calls: Arc<Mutex<Vec<Call>>>,
    fail: Arc<AtomicBool>,
    ticks: Sender<DeviceEvent>,
    stale: Arc<Mutex<Vec<Position>>>,
}

impl Probe {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> Option<Call> {
        self.calls.lock().unwrap().last().cloned()
    }

    pub fn loads(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Load { .. })).count()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn tick(&self, bar: u32, beat: f64) {
        self.ticks.send(DeviceEvent::Position(Position::new(bar, beat))).unwrap();
    }

    // delivered by the device on its next jump, ahead of the jump itself
    pub fn queue_stale_tick(&self, position: Position) {
        self.stale.lock().unwrap().push(position);
    }

    pub fn end_of_sequence(&self) {
        self.ticks.send(DeviceEvent::EndOfSequence).unwrap();
    }
}

/// Generator that waits for the test to open a gate, and counts its runs.
pub struct Gate {
    open: Sender<()>,
    runs: Arc<AtomicUsize>,
    reject: Arc<AtomicBool>,
}

impl Gate {
    pub fn open(&self) {
        self.open.send(()).unwrap();
    }

    // lets every future run straight through
    pub fn open_wide(&self) {
        for _ in 0..64 {
            let _ = self.open.send(());
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

pub fn gated_generator() -> (Arc<dyn SequenceGenerator>, Gate) {
    let (open, gate_rx) = crossbeam_channel::unbounded::<()>();
    let runs = Arc::new(AtomicUsize::new(0));
    let reject = Arc::new(AtomicBool::new(false));
    let (worker_runs, worker_reject) = (runs.clone(), reject.clone());

    let generator = move |ctx: &SongContext, cancel: &CancelToken| -> Result<GeneratedSequence, GenerationError> {
        worker_runs.fetch_add(1, Ordering::SeqCst);
        loop {
            cancel.check()?;
            if gate_rx.recv_timeout(Duration::from_millis(2)).is_ok() {
                break;
            }
        }
        if worker_reject.load(Ordering::SeqCst) {
            return Err(GenerationError::Rejected("no harmony for this section".into()));
        }
        ClickTrack.generate(ctx, cancel)
    };
    let generator: Arc<dyn SequenceGenerator> = Arc::new(generator);
    (generator, Gate { open, runs, reject })
}

pub fn controller_with(generator: Arc<dyn SequenceGenerator>) -> (TransportController, Probe) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let fail = Arc::new(AtomicBool::new(false));
    let stale = Arc::new(Mutex::new(Vec::new()));
    let (ticks_tx, ticks_rx) = crossbeam_channel::unbounded();
    let device = ScriptedDevice {
        calls: calls.clone(),
        fail: fail.clone(),
        ticks: ticks_tx.clone(),
        stale: stale.clone(),
    };
    let controller =
        TransportController::new(Box::new(device), ticks_rx, generator, &TransportConfig::default()).unwrap();
    (controller, Probe { calls, fail, ticks: ticks_tx, stale })
}

/// Controller with the scenario song attached and enabled, click-track generator.
pub fn enabled_controller() -> (TransportController, Probe) {
    let (controller, probe) = controller_with(Arc::new(ClickTrack));
    controller.set_song(song());
    controller.set_enabled(true).unwrap();
    (controller, probe)
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    done()
}

pub fn wait_for_event(
    rx: &Receiver<TransportEvent>,
    timeout: Duration,
    mut wanted: impl FnMut(&TransportEvent) -> bool,
) -> Option<TransportEvent> {
    let deadline = Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(event) if wanted(&event) => return Some(event),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
    None
}
