//!
//! The Profile is the administrative state shared between the callers of an
//! execution context and its worker.
//!
//! Every mutator takes the internal lock for the duration of the mutation
//! only.  Callers needing a consistent multi-step read take a
//! [`ProfileView`], which releases the lock when it is dropped.
//!

use std::{
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use rtec_core::{ComponentId, ExecutionKind, ProfileSnapshot, Properties};

use crate::{
    error::{EcError, Result},
    state_machine::LifecycleStateMachine,
};

/// The data behind the profile lock
struct ProfileData {
    kind: ExecutionKind,
    rate: f64,
    owner: Option<ComponentId>,
    participants: Vec<Arc<LifecycleStateMachine>>,
    properties: Properties,
}

/// Thread-safe administrative state of an execution context
pub struct Profile {
    data: RwLock<ProfileData>,
}

/// A read-locked view of the profile.
///
/// The lock is held for as long as the view lives, on every exit path.
pub struct ProfileView<'a> {
    guard: RwLockReadGuard<'a, ProfileData>,
}

impl ProfileView<'_> {
    /// The participants in insertion order
    pub fn participants(&self) -> &[Arc<LifecycleStateMachine>] {
        &self.guard.participants
    }

    /// The timing model
    pub fn kind(&self) -> ExecutionKind {
        self.guard.kind
    }

    /// The configured rate (in Hz)
    pub fn rate(&self) -> f64 {
        self.guard.rate
    }

    /// The component owning the execution context
    pub fn owner(&self) -> Option<ComponentId> {
        self.guard.owner
    }

    /// The property bag
    pub fn properties(&self) -> &Properties {
        &self.guard.properties
    }
}

/// Turn a rate into a period, rejecting rates that are not strictly
/// positive or whose period is not representable
pub(crate) fn rate_to_period(rate: f64) -> Result<Duration> {
    if !(rate > 0.0) || !rate.is_finite() {
        return Err(EcError::BadParameter(format!(
            "rate must be strictly positive, got {}",
            rate
        )));
    }
    match Duration::try_from_secs_f64(1.0 / rate) {
        Ok(period) if !period.is_zero() => Ok(period),
        _ => Err(EcError::BadParameter(format!(
            "rate {} has no representable period",
            rate
        ))),
    }
}

impl Profile {
    /// Create a new profile without participants.
    pub fn new(kind: ExecutionKind, rate: f64) -> Result<Self> {
        rate_to_period(rate)?;
        Ok(Self {
            data: RwLock::new(ProfileData {
                kind,
                rate,
                owner: None,
                participants: Vec::new(),
                properties: Properties::new(),
            }),
        })
    }

    /// Take a read-locked view of the whole profile
    pub fn view(&self) -> ProfileView<'_> {
        ProfileView { guard: self.read() }
    }

    /// The configured rate (in Hz)
    pub fn rate(&self) -> f64 {
        self.read().rate
    }

    /// The configured period
    pub fn period(&self) -> Duration {
        // The rate was validated when it was set
        Duration::from_secs_f64(1.0 / self.rate())
    }

    /// Set the rate (in Hz).
    ///
    /// Non-positive rates are rejected and leave the previous rate intact.
    pub fn set_rate(&self, rate: f64) -> Result<()> {
        rate_to_period(rate)?;
        self.write().rate = rate;
        Ok(())
    }

    /// Set the period.
    ///
    /// A zero period is rejected and leaves the previous period intact.
    pub fn set_period(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(EcError::BadParameter(
                "period must be strictly positive".into(),
            ));
        }
        self.write().rate = 1.0 / period.as_secs_f64();
        Ok(())
    }

    /// The timing model
    pub fn kind(&self) -> ExecutionKind {
        self.read().kind
    }

    /// Set the timing model
    pub fn set_kind(&self, kind: ExecutionKind) {
        self.write().kind = kind;
    }

    /// The component owning the execution context
    pub fn owner(&self) -> Option<ComponentId> {
        self.read().owner
    }

    /// Set the component owning the execution context
    pub fn set_owner(&self, owner: Option<ComponentId>) {
        self.write().owner = owner;
    }

    /// A copy of the property bag
    pub fn properties(&self) -> Properties {
        self.read().properties.clone()
    }

    /// Replace the property bag
    pub fn set_properties(&self, properties: Properties) {
        self.write().properties = properties;
    }

    /// Set a single property
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().properties.insert(key.into(), value.into());
    }

    /// Append a participant.
    ///
    /// Fails if a participant with the same id is already present.
    pub fn add_component(&self, participant: Arc<LifecycleStateMachine>) -> Result<()> {
        let mut data = self.write();
        if data.participants.iter().any(|p| p.id() == participant.id()) {
            return Err(EcError::AlreadyParticipant(participant.id()));
        }
        data.participants.push(participant);
        Ok(())
    }

    /// Remove a participant, returning it.
    ///
    /// Fails if no participant has the given id.
    pub fn remove_component(&self, id: ComponentId) -> Result<Arc<LifecycleStateMachine>> {
        let mut data = self.write();
        let index = data
            .participants
            .iter()
            .position(|p| p.id() == id)
            .ok_or(EcError::NotParticipant(id))?;
        Ok(data.participants.remove(index))
    }

    /// Find a participant by id
    pub fn find(&self, id: ComponentId) -> Option<Arc<LifecycleStateMachine>> {
        self.read()
            .participants
            .iter()
            .find(|p| p.id() == id)
            .cloned()
    }

    /// A copy of the participant list
    pub fn participants(&self) -> Vec<Arc<LifecycleStateMachine>> {
        self.read().participants.clone()
    }

    /// A deep copy of the profile
    pub fn snapshot(&self) -> ProfileSnapshot {
        let data = self.read();
        ProfileSnapshot {
            kind: data.kind,
            rate: data.rate,
            owner: data.owner,
            participants: data.participants.iter().map(|p| p.id()).collect(),
            properties: data.properties.clone(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ProfileData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProfileData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}
