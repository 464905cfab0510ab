//! Cursor lifecycle state machine
//!
//! Every cursor moves through the same states:
//!
//! ```text
//! CLOSED --open--> ACTIVE --exhaust--> IDLE --close--> CLOSED
//!                    ^                   |
//!                    +-------jump--------+
//! ```
//!
//! `DESTROYED` is terminal and only reached by pooled cursors that the
//! lookahead engine retires.

use super::context::QueryContext;
use super::error::{ExecutorError, ExecutorResult};

/// Lifecycle state of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Closed,
    Active,
    Idle,
    Destroyed,
}

/// Lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorEvent {
    Open,
    Exhaust,
    Jump,
    Close,
    Destroy,
}

impl CursorEvent {
    fn operation(self) -> &'static str {
        match self {
            CursorEvent::Open => "open",
            CursorEvent::Exhaust => "next",
            CursorEvent::Jump => "jump",
            CursorEvent::Close => "close",
            CursorEvent::Destroy => "destroy",
        }
    }

    /// State the event leads to when it is allowed
    fn target(self) -> CursorState {
        match self {
            CursorEvent::Open | CursorEvent::Jump => CursorState::Active,
            CursorEvent::Exhaust => CursorState::Idle,
            CursorEvent::Close => CursorState::Closed,
            CursorEvent::Destroy => CursorState::Destroyed,
        }
    }
}

impl CursorState {
    /// Apply `event`, or report the violation
    pub fn transition(self, event: CursorEvent) -> ExecutorResult<CursorState> {
        use CursorState::*;
        let allowed = match event {
            CursorEvent::Open => self == Closed,
            CursorEvent::Exhaust | CursorEvent::Jump => matches!(self, Active | Idle),
            // closing twice is tolerated
            CursorEvent::Close => self != Destroyed,
            CursorEvent::Destroy => true,
        };
        if allowed {
            Ok(event.target())
        } else {
            Err(ExecutorError::Lifecycle {
                operation: event.operation(),
                state: self,
            })
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, CursorState::Active | CursorState::Idle)
    }
}

/// Lifecycle bookkeeping embedded in every cursor
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: CursorState,
    checks: bool,
}

impl Lifecycle {
    pub fn new(checks: bool) -> Self {
        Self {
            state: CursorState::Closed,
            checks,
        }
    }

    pub fn for_context(context: &QueryContext) -> Self {
        Self::new(context.config().lifecycle_checks)
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == CursorState::Active
    }

    pub fn is_idle(&self) -> bool {
        self.state == CursorState::Idle
    }

    pub fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    fn apply(&mut self, event: CursorEvent) -> ExecutorResult<()> {
        match self.state.transition(event) {
            Ok(state) => {
                self.state = state;
                Ok(())
            }
            Err(e) if self.checks => Err(e),
            Err(_) => {
                self.state = event.target();
                Ok(())
            }
        }
    }

    pub fn open(&mut self) -> ExecutorResult<()> {
        self.apply(CursorEvent::Open)
    }

    /// Mark the cursor idle after its input ran out
    pub fn exhaust(&mut self) {
        if self.state.is_open() {
            self.state = CursorState::Idle;
        }
    }

    pub fn jump(&mut self) -> ExecutorResult<()> {
        self.apply(CursorEvent::Jump)
    }

    pub fn close(&mut self) -> ExecutorResult<()> {
        self.apply(CursorEvent::Close)
    }

    pub fn destroy(&mut self) {
        self.state = CursorState::Destroyed;
    }

    /// Prologue of every `next()`: check for cancellation and state.
    /// Returns false when the cursor is idle and must yield nothing.
    pub fn begin_next(&self, context: &QueryContext) -> ExecutorResult<bool> {
        context.check_query_cancelation()?;
        if self.checks && !self.state.is_open() {
            return Err(ExecutorError::Lifecycle {
                operation: "next",
                state: self.state,
            });
        }
        Ok(self.is_active())
    }

    /// Bindings may only be advanced or canceled while the cursor is closed
    pub fn check_closed(&self, operation: &'static str) -> ExecutorResult<()> {
        if self.checks && !self.is_closed() {
            return Err(ExecutorError::Lifecycle {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use CursorEvent::*;
        use CursorState::*;
        assert_eq!(Closed.transition(Open).unwrap(), Active);
        assert_eq!(Active.transition(Exhaust).unwrap(), Idle);
        assert_eq!(Idle.transition(Jump).unwrap(), Active);
        assert_eq!(Idle.transition(Close).unwrap(), Closed);
        assert_eq!(Closed.transition(Close).unwrap(), Closed);
        assert_eq!(Active.transition(Destroy).unwrap(), Destroyed);
        assert!(Active.transition(Open).is_err());
        assert!(Closed.transition(Jump).is_err());
        assert!(Closed.transition(Exhaust).is_err());
        assert!(Destroyed.transition(Close).is_err());
    }

    #[test]
    fn test_lifecycle_violation_reported() {
        let mut lc = Lifecycle::new(true);
        lc.open().unwrap();
        let err = lc.open().unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::Lifecycle {
                operation: "open",
                state: CursorState::Active
            }
        ));
        assert!(lc.check_closed("next_bindings").is_err());
        lc.exhaust();
        assert!(lc.is_idle());
        lc.close().unwrap();
        lc.close().unwrap();
        assert!(lc.check_closed("next_bindings").is_ok());
    }

    #[test]
    fn test_lifecycle_checks_disabled() {
        let mut lc = Lifecycle::new(false);
        lc.open().unwrap();
        lc.open().unwrap();
        assert!(lc.is_active());
        assert!(lc.check_closed("cancel_bindings").is_ok());
        lc.destroy();
        lc.close().unwrap();
        assert!(lc.is_closed());
    }
}
