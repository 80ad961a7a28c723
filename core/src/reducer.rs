//! The Reducer trait: business rules as a pure function.
//!
//! A reducer validates an action against the current state, updates the
//! state in place and returns descriptions of the side effects the runtime
//! must perform. It never performs I/O itself, so every rule can be tested
//! without a store.

use crate::error::Result;
use smallvec::SmallVec;

/// The Reducer trait - core abstraction for business logic
///
/// # Type Parameters
///
/// - `State`: The domain state this reducer operates on
/// - `Action`: The action type this reducer processes
/// - `Environment`: The injected dependencies this reducer needs
/// - `Effect`: The side-effect descriptions it emits
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// The environment type with injected dependencies
    type Environment;

    /// The effect descriptions this reducer emits
    type Effect;

    /// Reduce an action into state changes and effects
    ///
    /// This is a pure function that:
    /// 1. Validates the action
    /// 2. Updates state in place
    /// 3. Returns effect descriptions to be executed
    ///
    /// # Errors
    ///
    /// A rejected action returns the rejection and leaves `state` untouched.
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<SmallVec<[Self::Effect; 4]>>;
}
