//! Cooperative state model
//!
//! A [`StateModel`] holds the current state, the next event to process and
//! a run status. A type implementing [`StateHandler`] owns a model and
//! supplies one handler per state; the provided methods of the trait drive
//! execution:
//!
//! ```text
//!   start_model(READY, START)
//!          │
//!          ▼
//!   ┌──────────────┐  transition(s, e)   ┌──────────────┐
//!   │ RunningReady │◄────────────────────│ run_state(s) │
//!   └──────┬───────┘────────────────────►└──────┬───────┘
//!          │                                     │ post_next_event(NOP)
//!          │ end_model() / handler error         ▼
//!          ▼                             ┌────────────────┐
//!   ┌──────────────┐    resume_model(e)  │ RunningWaiting │
//!   │     Done     │◄─ ─ ─ ─ ─ ─ ─ ─ ─ ─ └────────────────┘
//!   └──────────────┘
//! ```
//!
//! The model never blocks. A handler that starts asynchronous work posts
//! [`Event::NOP`], which returns control to the caller; the completion
//! path later calls [`StateHandler::resume_model`] with the event to
//! process.
//!
//! Any error returned by a handler, and any attempt to post an event or
//! enter a state that is not in the model's dictionaries, aborts the model:
//! it ends in the `END` state with the failed flag set, and
//! [`StateHandler::on_model_failure`] is invoked. Nothing propagates past
//! the run loop.

use std::fmt;
use std::marker::PhantomData;

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::labels::{Event, LabeledValueSet};

/// A closed set of states for one kind of model
///
/// Implemented by plain `#[repr(u16)]` enums. Every model has the `NEW`
/// pseudo-state it is created in and the `END` state it terminates in.
pub trait ModelState: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// State of a model that has not been started
    const NEW: Self;
    /// Terminal state
    const END: Self;

    /// Dictionary tag of this state
    fn value(self) -> u16;

    /// Display label of this state
    fn label(self) -> &'static str;
}

/// Run status of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    /// Created, not started
    New,
    /// Handlers are being invoked
    RunningReady,
    /// Suspended until [`StateHandler::resume_model`]
    RunningWaiting,
    /// Terminal; never cleared
    Done,
}

/// Event and state dictionaries for one kind of model
///
/// Built once per model type and shared by all of its instances. A model
/// refuses to start on dictionaries that were never verified.
#[derive(Debug)]
pub struct ModelDictionaries<S> {
    events: LabeledValueSet,
    states: LabeledValueSet,
    verified: bool,
    _states: PhantomData<fn() -> S>,
}

impl<S: ModelState> Default for ModelDictionaries<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ModelState> ModelDictionaries<S> {
    /// Create empty, unverified dictionaries
    pub fn new() -> Self {
        Self {
            events: LabeledValueSet::new(),
            states: LabeledValueSet::new(),
            verified: false,
            _states: PhantomData,
        }
    }

    /// Define and verify the dictionaries of handler type `H`
    pub fn build<H>() -> Result<Self>
    where
        H: StateHandler<State = S>,
    {
        let mut dictionaries = Self::new();
        H::define_events(&mut dictionaries)?;
        H::verify_events(&dictionaries)?;
        H::define_states(&mut dictionaries)?;
        H::verify_states(&dictionaries)?;
        dictionaries.verified = true;
        Ok(dictionaries)
    }

    /// Register an event
    pub fn define_event(&mut self, event: Event, label: &'static str) -> Result<()> {
        self.verified = false;
        self.events.define(event.value(), label)
    }

    /// Register a state
    pub fn define_state(&mut self, state: S) -> Result<()> {
        self.verified = false;
        self.states.define(state.value(), state.label())
    }

    /// Fail on the first of `required` that is not defined
    pub fn verify_events(&self, required: &[Event]) -> Result<()> {
        let values: Vec<u16> = required.iter().map(|event| event.value()).collect();
        self.events.verify_all(&values)
    }

    /// Fail on the first of `required` that is not defined
    pub fn verify_states(&self, required: &[S]) -> Result<()> {
        let values: Vec<u16> = required.iter().map(|state| state.value()).collect();
        self.states.verify_all(&values)
    }

    /// Whether both dictionaries were built and verified
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// The event dictionary
    pub fn events(&self) -> &LabeledValueSet {
        &self.events
    }

    /// The state dictionary
    pub fn states(&self) -> &LabeledValueSet {
        &self.states
    }
}

/// The run-time state of one model instance
#[derive(Debug)]
pub struct StateModel<S: ModelState> {
    dictionaries: &'static ModelDictionaries<S>,
    curr_state: S,
    prev_state: S,
    last_event: Event,
    next_event: Event,
    on_entry: bool,
    status: ModelStatus,
    failed: bool,
    posted: bool,
}

impl<S: ModelState> StateModel<S> {
    /// Events every model requires
    pub const REQUIRED_EVENTS: [Event; 4] = [Event::NOP, Event::START, Event::END, Event::FAIL];

    /// Create a model in the `NEW` state
    pub fn new(dictionaries: &'static ModelDictionaries<S>) -> Self {
        Self {
            dictionaries,
            curr_state: S::NEW,
            prev_state: S::NEW,
            last_event: Event::NOP,
            next_event: Event::NOP,
            on_entry: false,
            status: ModelStatus::New,
            failed: false,
            posted: false,
        }
    }

    /// Define the events every model requires
    pub fn define_events(dictionaries: &mut ModelDictionaries<S>) -> Result<()> {
        dictionaries.define_event(Event::NOP, "NOP_EVT")?;
        dictionaries.define_event(Event::START, "START_EVT")?;
        dictionaries.define_event(Event::END, "END_EVT")?;
        dictionaries.define_event(Event::FAIL, "FAIL_EVT")?;
        Ok(())
    }

    /// Verify the events every model requires
    pub fn verify_events(dictionaries: &ModelDictionaries<S>) -> Result<()> {
        dictionaries.verify_events(&Self::REQUIRED_EVENTS)
    }

    /// Define the pseudo-states every model has
    pub fn define_states(dictionaries: &mut ModelDictionaries<S>) -> Result<()> {
        dictionaries.define_state(S::NEW)?;
        dictionaries.define_state(S::END)?;
        Ok(())
    }

    /// Verify the pseudo-states every model has
    pub fn verify_states(dictionaries: &ModelDictionaries<S>) -> Result<()> {
        dictionaries.verify_states(&[S::NEW, S::END])
    }

    /// Enter `state` and post `event`
    ///
    /// Transitioning to the current state re-runs its handler without
    /// raising the on-entry flag.
    pub fn transition(&mut self, state: S, event: Event) -> Result<()> {
        self.set_state(state)?;
        self.post_next_event(event)
    }

    /// Post the event the current state's handler processes next
    ///
    /// Posting [`Event::NOP`] suspends a running model.
    pub fn post_next_event(&mut self, event: Event) -> Result<()> {
        if !self.dictionaries.events().is_defined(event.value()) {
            return Err(Error::state_model(format!(
                "event {} is not defined",
                event.value()
            )));
        }

        self.last_event = self.next_event;
        self.next_event = event;
        self.posted = true;

        match self.status {
            ModelStatus::RunningReady | ModelStatus::RunningWaiting => {
                self.status = if event == Event::NOP {
                    ModelStatus::RunningWaiting
                } else {
                    ModelStatus::RunningReady
                };
            }
            ModelStatus::New | ModelStatus::Done => {}
        }

        Ok(())
    }

    /// Terminate the model normally
    pub fn end_model(&mut self) {
        self.prev_state = self.curr_state;
        self.curr_state = S::END;
        self.last_event = self.next_event;
        self.next_event = Event::END;
        self.on_entry = false;
        self.posted = true;
        self.status = ModelStatus::Done;
    }

    /// Returns whether this is the first invocation since entering the
    /// current state, clearing the flag
    pub fn do_on_entry(&mut self) -> bool {
        std::mem::replace(&mut self.on_entry, false)
    }

    /// Current state
    pub fn curr_state(&self) -> S {
        self.curr_state
    }

    /// State before the most recent state change
    pub fn prev_state(&self) -> S {
        self.prev_state
    }

    /// Event to be processed by the current state's handler
    pub fn next_event(&self) -> Event {
        self.next_event
    }

    /// Event processed before [`Self::next_event`] was posted
    pub fn last_event(&self) -> Event {
        self.last_event
    }

    /// Run status
    pub fn status(&self) -> ModelStatus {
        self.status
    }

    /// Not yet started
    pub fn is_model_new(&self) -> bool {
        self.status == ModelStatus::New
    }

    /// Started and not done
    pub fn is_model_running(&self) -> bool {
        matches!(
            self.status,
            ModelStatus::RunningReady | ModelStatus::RunningWaiting
        )
    }

    /// Suspended awaiting an external completion
    pub fn is_model_waiting(&self) -> bool {
        self.status == ModelStatus::RunningWaiting
    }

    /// Terminated, normally or not
    pub fn is_model_done(&self) -> bool {
        self.status == ModelStatus::Done
    }

    /// Terminated abnormally
    pub fn did_model_fail(&self) -> bool {
        self.status == ModelStatus::Done && self.failed
    }

    /// Label of an event, or `UNDEFINED`
    pub fn event_label(&self, event: Event) -> &'static str {
        self.dictionaries.events().label(event.value())
    }

    /// Label of a state, or `UNDEFINED`
    pub fn state_label(&self, state: S) -> &'static str {
        self.dictionaries.states().label(state.value())
    }

    /// Current state and next event, for log messages
    pub fn context_str(&self) -> String {
        format!(
            "current state: [ {} {} ] next event: [ {} {} ]",
            self.curr_state.value(),
            self.state_label(self.curr_state),
            self.next_event.value(),
            self.event_label(self.next_event)
        )
    }

    /// Previous state and last event, for log messages
    pub fn prev_context_str(&self) -> String {
        format!(
            "previous state: [ {} {} ] last event: [ {} {} ]",
            self.prev_state.value(),
            self.state_label(self.prev_state),
            self.last_event.value(),
            self.event_label(self.last_event)
        )
    }

    fn set_state(&mut self, state: S) -> Result<()> {
        if !self.dictionaries.states().is_defined(state.value()) {
            return Err(Error::state_model(format!("state {:?} is not defined", state)));
        }

        self.prev_state = self.curr_state;
        self.curr_state = state;
        self.on_entry = state != S::END && self.prev_state != self.curr_state;
        Ok(())
    }

    fn abort(&mut self) {
        self.prev_state = self.curr_state;
        self.curr_state = S::END;
        self.last_event = self.next_event;
        self.next_event = Event::FAIL;
        self.on_entry = false;
        self.failed = true;
        self.status = ModelStatus::Done;
    }
}

/// A type that owns a [`StateModel`] and handles its states
///
/// Implementors supply the dictionaries and one handler per state
/// (`run_state` is an exhaustive match over the state enum). The provided
/// methods are the engine.
pub trait StateHandler {
    /// The closed state set of this model
    type State: ModelState;

    /// The model being driven
    fn model(&self) -> &StateModel<Self::State>;

    /// The model being driven
    fn model_mut(&mut self) -> &mut StateModel<Self::State>;

    /// Add this model's events to `dictionaries`
    fn define_events(dictionaries: &mut ModelDictionaries<Self::State>) -> Result<()>;

    /// Check that every event this model uses is defined
    fn verify_events(dictionaries: &ModelDictionaries<Self::State>) -> Result<()>;

    /// Add this model's states to `dictionaries`
    fn define_states(dictionaries: &mut ModelDictionaries<Self::State>) -> Result<()>;

    /// Check that every state this model uses is defined
    fn verify_states(dictionaries: &ModelDictionaries<Self::State>) -> Result<()>;

    /// Invoke the handler of `state`
    ///
    /// The handler reads [`StateModel::next_event`] and must either
    /// transition, post an event, or end the model. Returning an error
    /// aborts the model.
    fn run_state(&mut self, state: Self::State) -> Result<()>;

    /// Called once after the model aborts
    fn on_model_failure(&mut self, _explanation: &str) {}

    /// Enter `start_state`, post `start_event` and run
    ///
    /// Fails without running if the model is not new or its dictionaries
    /// were never verified.
    fn start_model(&mut self, start_state: Self::State, start_event: Event) -> Result<()> {
        let model = self.model_mut();
        if !model.dictionaries.is_verified() {
            return Err(Error::state_model(
                "cannot start model: dictionaries have not been verified",
            ));
        }

        if model.status != ModelStatus::New {
            return Err(Error::state_model(format!(
                "cannot start model: it is not new, {}",
                model.context_str()
            )));
        }

        model.status = ModelStatus::RunningReady;
        let posted = model
            .set_state(start_state)
            .and_then(|_| model.post_next_event(start_event));

        match posted {
            Ok(()) => self.run_model(),
            Err(err) => self.abort_model(&err.to_string()),
        }

        Ok(())
    }

    /// Invoke handlers until the model waits or is done
    fn run_model(&mut self) {
        while self.model().status == ModelStatus::RunningReady {
            let state = self.model().curr_state;
            self.model_mut().posted = false;

            if let Err(err) = self.run_state(state) {
                self.abort_model(&err.to_string());
                break;
            }

            let model = self.model();
            if model.status == ModelStatus::RunningReady && !model.posted {
                let explanation = format!(
                    "handler for {} posted no event",
                    model.state_label(state)
                );
                self.abort_model(&explanation);
            }
        }
    }

    /// Post `event` to a waiting model and run it
    fn resume_model(&mut self, event: Event) -> Result<()> {
        let model = self.model_mut();
        if model.status != ModelStatus::RunningWaiting {
            return Err(Error::state_model(format!(
                "cannot resume model: it is not waiting, {}",
                model.context_str()
            )));
        }

        model.status = ModelStatus::RunningReady;
        debug!("Resuming model with event {}", model.event_label(event));

        match model.post_next_event(event) {
            Ok(()) => self.run_model(),
            Err(err) => self.abort_model(&err.to_string()),
        }

        Ok(())
    }

    /// Force the model into the failed terminal state
    fn abort_model(&mut self, explanation: &str) {
        let model = self.model_mut();
        error!("State model aborted: {} ({})", explanation, model.context_str());
        model.abort();
        self.on_model_failure(explanation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(u16)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum PingState {
        New = 0,
        End = 1,
        Ready = 2,
        Pinging = 3,
    }

    impl ModelState for PingState {
        const NEW: Self = PingState::New;
        const END: Self = PingState::End;

        fn value(self) -> u16 {
            self as u16
        }

        fn label(self) -> &'static str {
            match self {
                PingState::New => "NEW_ST",
                PingState::End => "END_ST",
                PingState::Ready => "READY_ST",
                PingState::Pinging => "PINGING_ST",
            }
        }
    }

    const PING_SENT: Event = Event::new(Event::FIRST_DERIVED);
    const PONG: Event = Event::new(Event::FIRST_DERIVED + 1);

    /// Sends a ping on entry, waits for a pong, and counts handler calls.
    struct PingModel {
        model: StateModel<PingState>,
        entries: usize,
        runs: usize,
        failure: Option<String>,
        stall: bool,
    }

    impl PingModel {
        fn new() -> Self {
            let dictionaries = ModelDictionaries::build::<PingModel>().unwrap();
            Self::with_dictionaries(Box::leak(Box::new(dictionaries)))
        }

        fn with_dictionaries(dictionaries: &'static ModelDictionaries<PingState>) -> Self {
            Self {
                model: StateModel::new(dictionaries),
                entries: 0,
                runs: 0,
                failure: None,
                stall: false,
            }
        }
    }

    impl StateHandler for PingModel {
        type State = PingState;

        fn model(&self) -> &StateModel<PingState> {
            &self.model
        }

        fn model_mut(&mut self) -> &mut StateModel<PingState> {
            &mut self.model
        }

        fn define_events(dictionaries: &mut ModelDictionaries<PingState>) -> Result<()> {
            StateModel::define_events(dictionaries)?;
            dictionaries.define_event(PING_SENT, "PING_SENT_EVT")?;
            dictionaries.define_event(PONG, "PONG_EVT")
        }

        fn verify_events(dictionaries: &ModelDictionaries<PingState>) -> Result<()> {
            StateModel::verify_events(dictionaries)?;
            dictionaries.verify_events(&[PING_SENT, PONG])
        }

        fn define_states(dictionaries: &mut ModelDictionaries<PingState>) -> Result<()> {
            StateModel::define_states(dictionaries)?;
            dictionaries.define_state(PingState::Ready)?;
            dictionaries.define_state(PingState::Pinging)
        }

        fn verify_states(dictionaries: &ModelDictionaries<PingState>) -> Result<()> {
            StateModel::verify_states(dictionaries)?;
            dictionaries.verify_states(&[PingState::Ready, PingState::Pinging])
        }

        fn run_state(&mut self, state: PingState) -> Result<()> {
            self.runs += 1;
            match state {
                PingState::Ready => match self.model.next_event() {
                    Event::START => self.model.transition(PingState::Pinging, PING_SENT),
                    other => Err(Error::invalid_context(format!("unexpected {}", other))),
                },
                PingState::Pinging => {
                    if self.model.do_on_entry() {
                        self.entries += 1;
                    }
                    if self.stall {
                        return Ok(());
                    }
                    match self.model.next_event() {
                        PING_SENT => self.model.post_next_event(Event::NOP),
                        PONG => {
                            self.model.end_model();
                            Ok(())
                        }
                        other => Err(Error::invalid_context(format!("unexpected {}", other))),
                    }
                }
                PingState::New | PingState::End => {
                    Err(Error::invalid_context(format!("{:?} has no handler", state)))
                }
            }
        }

        fn on_model_failure(&mut self, explanation: &str) {
            self.failure = Some(explanation.to_string());
        }
    }

    #[test]
    fn test_start_runs_until_nop() {
        let mut ping = PingModel::new();
        assert!(ping.model().is_model_new());

        ping.start_model(PingState::Ready, Event::START).unwrap();

        assert_eq!(ping.model().status(), ModelStatus::RunningWaiting);
        assert_eq!(ping.model().curr_state(), PingState::Pinging);
        assert_eq!(ping.model().next_event(), Event::NOP);
        assert_eq!(ping.runs, 2);
        assert_eq!(ping.entries, 1);
    }

    #[test]
    fn test_resume_drives_to_done() {
        let mut ping = PingModel::new();
        ping.start_model(PingState::Ready, Event::START).unwrap();

        ping.resume_model(PONG).unwrap();

        assert!(ping.model().is_model_done());
        assert!(!ping.model().did_model_fail());
        assert_eq!(ping.model().curr_state(), PingState::End);
        assert_eq!(ping.model().next_event(), Event::END);
        // Same state, no new entry
        assert_eq!(ping.entries, 1);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut ping = PingModel::new();
        ping.start_model(PingState::Ready, Event::START).unwrap();

        assert!(ping.start_model(PingState::Ready, Event::START).is_err());
        assert!(ping.model().is_model_waiting());
    }

    #[test]
    fn test_resume_requires_waiting() {
        let mut ping = PingModel::new();
        assert!(ping.resume_model(PONG).is_err());
        assert!(ping.model().is_model_new());
    }

    #[test]
    fn test_unverified_dictionaries_refuse_to_start() {
        let mut dictionaries = ModelDictionaries::<PingState>::new();
        PingModel::define_events(&mut dictionaries).unwrap();
        PingModel::define_states(&mut dictionaries).unwrap();
        let mut ping = PingModel::with_dictionaries(Box::leak(Box::new(dictionaries)));

        let err = ping.start_model(PingState::Ready, Event::START).unwrap_err();
        assert!(err.to_string().contains("not been verified"));
        assert!(ping.model().is_model_new());
        assert_eq!(ping.runs, 0);
    }

    #[test]
    fn test_undefined_event_aborts_model() {
        let mut ping = PingModel::new();
        ping.start_model(PingState::Ready, Event::START).unwrap();

        ping.resume_model(Event::new(4242)).unwrap();

        assert!(ping.model().did_model_fail());
        assert_eq!(ping.model().curr_state(), PingState::End);
        assert_eq!(ping.model().next_event(), Event::FAIL);
        assert!(ping.failure.unwrap().contains("4242"));
    }

    #[test]
    fn test_unexpected_event_aborts_model() {
        let mut ping = PingModel::new();
        ping.start_model(PingState::Ready, Event::START).unwrap();

        ping.resume_model(Event::START).unwrap();

        assert!(ping.model().did_model_fail());
        assert!(ping.failure.is_some());
    }

    #[test]
    fn test_handler_without_event_aborts() {
        let mut ping = PingModel::new();
        ping.stall = true;

        ping.start_model(PingState::Ready, Event::START).unwrap();

        assert!(ping.model().did_model_fail());
        assert!(ping.failure.unwrap().contains("posted no event"));
    }

    #[test]
    fn test_dictionaries_verify_only_after_define() {
        let mut dictionaries = ModelDictionaries::<PingState>::new();
        assert!(PingModel::verify_events(&dictionaries).is_err());
        assert!(PingModel::verify_states(&dictionaries).is_err());

        PingModel::define_events(&mut dictionaries).unwrap();
        PingModel::define_states(&mut dictionaries).unwrap();

        assert!(PingModel::verify_events(&dictionaries).is_ok());
        assert!(PingModel::verify_states(&dictionaries).is_ok());
    }

    #[test]
    fn test_context_strings_use_labels() {
        let mut ping = PingModel::new();
        ping.start_model(PingState::Ready, Event::START).unwrap();

        assert_eq!(
            ping.model().context_str(),
            "current state: [ 3 PINGING_ST ] next event: [ 0 NOP_EVT ]"
        );
        assert!(ping.model().prev_context_str().contains("READY_ST"));
    }
}
