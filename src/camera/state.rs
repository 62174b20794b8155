//! Per-session capture state machine.
//!
//! Tracks focus/exposure convergence for one still-capture sequence and
//! decides the next hardware request on each device result. The machine is
//! pure: it owns no channels and submits nothing itself; the device handle's
//! worker applies the returned [`StateAction`].

use crate::camera::backend::{AutoExposureState, AutoFocusState, ConvergenceResult};

/// Convergence phase of the open session.
///
/// Transitions are one-directional within a capture sequence, except
/// Previewing ↔ WaitingFocusLock which restarts on every capture request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    /// Live preview running; no still capture in progress.
    Previewing,
    /// Focus-lock trigger sent; waiting for the sweep to settle.
    WaitingFocusLock,
    /// Pre-capture metering trigger sent; waiting for it to start.
    WaitingPrecapture,
    /// Metering started; waiting for it to finish.
    WaitingPrecaptureDone,
    /// Final exposure issued; waiting for the frame.
    ImageTaken,
}

/// The hardware request to issue after processing a device result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateAction {
    /// Keep waiting.
    None,
    /// Send the pre-capture metering trigger.
    RunPrecapture,
    /// Stop the preview stream and issue the final exposure.
    Capture,
}

impl CaptureState {
    /// Advances the machine on one device result.
    ///
    /// An absent auto-focus status means the device does not report focus at
    /// all; the sequence proceeds rather than waiting forever. Likewise an
    /// absent auto-exposure status counts as converged.
    pub fn on_result(&mut self, result: &ConvergenceResult) -> StateAction {
        match self {
            CaptureState::Previewing | CaptureState::ImageTaken => StateAction::None,

            CaptureState::WaitingFocusLock => match result.auto_focus {
                None => {
                    *self = CaptureState::WaitingPrecapture;
                    StateAction::RunPrecapture
                }
                Some(
                    AutoFocusState::Inactive
                    | AutoFocusState::FocusedLocked
                    | AutoFocusState::NotFocusedLocked,
                ) => match result.auto_exposure {
                    None | Some(AutoExposureState::Converged) => {
                        *self = CaptureState::ImageTaken;
                        StateAction::Capture
                    }
                    Some(_) => {
                        *self = CaptureState::WaitingPrecapture;
                        StateAction::RunPrecapture
                    }
                },
                // Sweep still running.
                Some(AutoFocusState::Scanning) => StateAction::None,
            },

            CaptureState::WaitingPrecapture => {
                match result.auto_exposure {
                    None
                    | Some(AutoExposureState::Precapture)
                    | Some(AutoExposureState::Converged) => {
                        *self = CaptureState::WaitingPrecaptureDone;
                    }
                    Some(_) => {}
                }
                StateAction::None
            }

            CaptureState::WaitingPrecaptureDone => match result.auto_exposure {
                Some(AutoExposureState::Precapture) => StateAction::None,
                _ => {
                    *self = CaptureState::ImageTaken;
                    StateAction::Capture
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(
        auto_focus: Option<AutoFocusState>,
        auto_exposure: Option<AutoExposureState>,
    ) -> ConvergenceResult {
        ConvergenceResult {
            auto_focus,
            auto_exposure,
        }
    }

    #[test]
    fn test_locked_and_converged_captures_immediately() {
        let mut state = CaptureState::WaitingFocusLock;
        let action = state.on_result(&result(
            Some(AutoFocusState::FocusedLocked),
            Some(AutoExposureState::Converged),
        ));
        assert_eq!(action, StateAction::Capture);
        assert_eq!(state, CaptureState::ImageTaken);
    }

    #[test]
    fn test_absent_focus_never_deadlocks() {
        // A device that reports no focus state at all must still reach
        // ImageTaken without ever seeing an exposure-converged result.
        let mut state = CaptureState::WaitingFocusLock;

        assert_eq!(
            state.on_result(&result(None, None)),
            StateAction::RunPrecapture
        );
        assert_eq!(state, CaptureState::WaitingPrecapture);

        assert_eq!(state.on_result(&result(None, None)), StateAction::None);
        assert_eq!(state, CaptureState::WaitingPrecaptureDone);

        assert_eq!(state.on_result(&result(None, None)), StateAction::Capture);
        assert_eq!(state, CaptureState::ImageTaken);
    }

    #[test]
    fn test_scanning_keeps_waiting() {
        let mut state = CaptureState::WaitingFocusLock;
        for _ in 0..3 {
            let action = state.on_result(&result(Some(AutoFocusState::Scanning), None));
            assert_eq!(action, StateAction::None);
            assert_eq!(state, CaptureState::WaitingFocusLock);
        }
    }

    #[test]
    fn test_unconverged_exposure_runs_precapture() {
        let mut state = CaptureState::WaitingFocusLock;
        let action = state.on_result(&result(
            Some(AutoFocusState::NotFocusedLocked),
            Some(AutoExposureState::Searching),
        ));
        assert_eq!(action, StateAction::RunPrecapture);
        assert_eq!(state, CaptureState::WaitingPrecapture);
    }

    #[test]
    fn test_full_precapture_sequence() {
        let mut state = CaptureState::WaitingFocusLock;
        state.on_result(&result(
            Some(AutoFocusState::FocusedLocked),
            Some(AutoExposureState::Searching),
        ));
        assert_eq!(state, CaptureState::WaitingPrecapture);

        // Metering has not started yet; stay put.
        state.on_result(&result(None, Some(AutoExposureState::Searching)));
        assert_eq!(state, CaptureState::WaitingPrecapture);

        state.on_result(&result(None, Some(AutoExposureState::Precapture)));
        assert_eq!(state, CaptureState::WaitingPrecaptureDone);

        // Still metering.
        assert_eq!(
            state.on_result(&result(None, Some(AutoExposureState::Precapture))),
            StateAction::None
        );

        let action = state.on_result(&result(None, Some(AutoExposureState::Converged)));
        assert_eq!(action, StateAction::Capture);
        assert_eq!(state, CaptureState::ImageTaken);
    }

    #[test]
    fn test_results_ignored_outside_capture_sequence() {
        let mut state = CaptureState::Previewing;
        assert_eq!(
            state.on_result(&result(
                Some(AutoFocusState::FocusedLocked),
                Some(AutoExposureState::Converged)
            )),
            StateAction::None
        );
        assert_eq!(state, CaptureState::Previewing);

        let mut state = CaptureState::ImageTaken;
        assert_eq!(state.on_result(&result(None, None)), StateAction::None);
        assert_eq!(state, CaptureState::ImageTaken);
    }
}
