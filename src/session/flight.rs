// Single-flight background generation.
//
// Generation can be slow, so it never runs on the caller's thread. Each request
// for a context either joins the task already running for an equal context or
// spawns a new one. Everyone waiting on a task gets the same outcome, delivered
// over a channel once the worker finishes.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};

use super::generator::{CancelToken, GeneratedSequence, SequenceGenerator};
use crate::error::GenerationError;
use crate::pipeline::context::SongContext;

pub type Outcome = Result<Arc<GeneratedSequence>, GenerationError>;

#[derive(Default)]
struct FlightState {
    outcome: Option<Outcome>,
    waiters: Vec<Sender<Outcome>>,
}

struct Flight {
    cancel: CancelToken,
    state: Mutex<FlightState>,
}

impl Flight {
    fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            state: Mutex::new(FlightState::default()),
        }
    }

    fn subscribe(&self) -> Receiver<Outcome> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut state = lock(&self.state);
        match &state.outcome {
            Some(outcome) => {
                let _ = tx.send(outcome.clone());
            }
            None => state.waiters.push(tx),
        }
        rx
    }

    fn finish(&self, outcome: Outcome) {
        let mut state = lock(&self.state);
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
        state.outcome = Some(outcome);
    }
}

/// A caller's view of one generation task.
#[derive(Clone)]
pub struct FlightHandle {
    context: SongContext,
    flight: Arc<Flight>,
    joined: bool,
}

impl FlightHandle {
    pub fn context(&self) -> &SongContext {
        &self.context
    }

    // true when this request attached to a task someone else started
    pub fn joined_existing(&self) -> bool {
        self.joined
    }

    /// Blocks until the task finishes.
    pub fn wait(&self) -> Outcome {
        self.flight
            .subscribe()
            .recv()
            .unwrap_or(Err(GenerationError::Cancelled))
    }

    pub fn try_outcome(&self) -> Option<Outcome> {
        lock(&self.flight.state).outcome.clone()
    }

    // Cancels the task for everyone attached to it
    pub fn cancel(&self) {
        self.flight.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flight.cancel.is_cancelled()
    }

    pub fn same_task(&self, other: &FlightHandle) -> bool {
        Arc::ptr_eq(&self.flight, &other.flight)
    }
}

pub struct GenerationFlights {
    generator: Arc<dyn SequenceGenerator>,
    in_flight: Arc<Mutex<HashMap<SongContext, Arc<Flight>>>>,
    started: AtomicUsize,
}

impl GenerationFlights {
    pub fn new(generator: Arc<dyn SequenceGenerator>) -> Self {
        Self {
            generator,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            started: AtomicUsize::new(0),
        }
    }

    /// How many generation tasks have been spawned so far.
    pub fn tasks_started(&self) -> usize {
        self.started.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn request(&self, context: &SongContext) -> FlightHandle {
        let mut map = lock(&self.in_flight);

        // a cancelled task is on its way out; never hand it to a new caller
        if let Some(flight) = map.get(context).filter(|f| !f.cancel.is_cancelled()) {
            log::debug!("joining in-flight generation for \"{}\"", context.song().name);
            return FlightHandle {
                context: context.clone(),
                flight: flight.clone(),
                joined: true,
            };
        }

        let flight = Arc::new(Flight::new());
        map.insert(context.clone(), flight.clone());
        drop(map);

        self.started.fetch_add(1, Ordering::Relaxed);
        log::debug!("starting generation for \"{}\"", context.song().name);

        let worker_flight = flight.clone();
        let worker_ctx = context.clone();
        let generator = self.generator.clone();
        let in_flight = self.in_flight.clone();
        let spawned = std::thread::Builder::new()
            .name("barline-generate".to_string())
            .spawn(move || run_flight(&*generator, &worker_ctx, &worker_flight, &in_flight));

        if let Err(e) = spawned {
            log::warn!("could not spawn generation worker: {e}");
            retire(&self.in_flight, context, &flight);
            flight.finish(Err(GenerationError::Rejected(format!("could not start generation: {e}"))));
        }

        FlightHandle {
            context: context.clone(),
            flight,
            joined: false,
        }
    }
}

fn run_flight(
    generator: &dyn SequenceGenerator,
    context: &SongContext,
    flight: &Arc<Flight>,
    in_flight: &Mutex<HashMap<SongContext, Arc<Flight>>>,
) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| generator.generate(context, &flight.cancel)));
    let outcome = match result {
        // finished, but somebody gave up on it meanwhile
        Ok(Ok(_)) if flight.cancel.is_cancelled() => Err(GenerationError::Cancelled),
        Ok(Ok(sequence)) => Ok(Arc::new(sequence)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(GenerationError::Rejected("generator panicked".to_string())),
    };

    match &outcome {
        Ok(seq) => log::debug!("generated {} events for \"{}\"", seq.events.len(), context.song().name),
        Err(e) => log::info!("generation for \"{}\" ended: {e}", context.song().name),
    }

    retire(in_flight, context, flight);
    flight.finish(outcome);
}

// Drop the map entry, but only if it still points at this flight
fn retire(in_flight: &Mutex<HashMap<SongContext, Arc<Flight>>>, context: &SongContext, flight: &Arc<Flight>) {
    let mut map = lock(in_flight);
    if map.get(context).is_some_and(|f| Arc::ptr_eq(f, flight)) {
        map.remove(context);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
