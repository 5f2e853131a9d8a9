//! Call lifecycle phases and the transition table between them.

crate::labelled_enum! {
    /// The phase a call session is in.
    ///
    /// | Phase | Exits to |
    /// |-------|----------|
    /// | `INCOMING` | `AUTH_CHECK` |
    /// | `AUTH_CHECK` | `AUTHENTICATED`, `ENROLLING`, `SIGNUP`, `RE_ENROLL`, `FALLBACK` |
    /// | `ENROLLING` | `AUTHENTICATED`, `FALLBACK` |
    /// | `RE_ENROLL` | `ENROLLING`, `FALLBACK` |
    /// | `SIGNUP` | `FALLBACK`, `TERMINATED` |
    /// | `AUTHENTICATED` | `SUPPORT_TURN` |
    /// | `SUPPORT_TURN` | `SUPPORT_TURN`, `FALLBACK`, `TERMINATED` |
    /// | `FALLBACK` | `TERMINATED` |
    /// | `TERMINATED` | none |
    ///
    /// `FALLBACK` is additionally reachable from every non-terminal phase,
    /// since any escalation trigger may fire wherever the call currently is.
    pub enum CallPhase {
        Incoming => "INCOMING",
        AuthCheck => "AUTH_CHECK",
        Enrolling => "ENROLLING",
        ReEnroll => "RE_ENROLL",
        Signup => "SIGNUP",
        Authenticated => "AUTHENTICATED",
        SupportTurn => "SUPPORT_TURN",
        Fallback => "FALLBACK",
        Terminated => "TERMINATED",
    }
}

impl CallPhase {
    /// Phases reachable from `self` through the regular table, excluding the
    /// escalation edge into `FALLBACK`.
    pub fn successors(self) -> &'static [CallPhase] {
        use CallPhase::*;
        match self {
            Incoming => &[AuthCheck],
            AuthCheck => &[Authenticated, Enrolling, Signup, ReEnroll],
            Enrolling => &[Authenticated],
            ReEnroll => &[Enrolling],
            Signup => &[Terminated],
            Authenticated => &[SupportTurn],
            SupportTurn => &[SupportTurn, Terminated],
            Fallback => &[Terminated],
            Terminated => &[],
        }
    }

    /// Returns `true` once the call has received its final instruction.
    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: CallPhase) -> bool {
        if next == Self::Fallback {
            return !self.is_terminal() && self != Self::Fallback;
        }
        self.successors().contains(&next)
    }
}

/// Checks that a recorded sequence of phases is a legal walk through the
/// transition table starting at `INCOMING`.
pub fn is_valid_path(phases: &[CallPhase]) -> bool {
    match phases.first() {
        Some(CallPhase::Incoming) => phases
            .windows(2)
            .all(|pair| pair[0].can_transition_to(pair[1])),
        Some(_) => false,
        None => true,
    }
}
